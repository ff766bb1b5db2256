//! In-memory connector for tests.
//!
//! Every `connect` creates a duplex pipe and spawns a tiny server on the far end that
//! answers each request with the serving endpoint's port, so tests can see which
//! endpoint a call was routed to.

use std::collections::HashSet;
use std::io;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use driftwire::Endpoint;
use driftwire::FrameCodec;
use driftwire::FrameReader;
use driftwire::JsonSerializer;
use driftwire::Message;
use driftwire::Response;
use driftwire::codec::DEFAULT_MAX_FRAME_LEN;
use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot;

use crate::connection::BoxedStream;
use crate::connection::Connector;

#[derive(Default)]
pub struct DuplexConnector {
    refused: Mutex<HashSet<u16>>,
    attempts: AtomicUsize,
    kill_switches: DashMap<u16, Vec<oneshot::Sender<()>>>,
}

impl DuplexConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes connects to `port` fail until `accept` is called.
    pub fn refuse(&self, port: u16) {
        self.refused.lock().unwrap().insert(port);
    }

    pub fn accept(&self, port: u16) {
        self.refused.lock().unwrap().remove(&port);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Closes the server side of every open pipe to `port`.
    pub fn kill(&self, port: u16) {
        if let Some((_, switches)) = self.kill_switches.remove(&port) {
            for switch in switches {
                let _ = switch.send(());
            }
        }
    }
}

#[async_trait::async_trait]
impl Connector for DuplexConnector {
    async fn connect(&self, endpoint: &Endpoint) -> io::Result<BoxedStream> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.refused.lock().unwrap().contains(&endpoint.port) {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        }

        let (client, server) = tokio::io::duplex(64 * 1024);
        let (kill_tx, kill_rx) = oneshot::channel();
        self.kill_switches.entry(endpoint.port).or_default().push(kill_tx);
        tokio::spawn(serve(endpoint.port, server, kill_rx));
        Ok(Box::new(client))
    }
}

async fn serve(port: u16, stream: tokio::io::DuplexStream, mut kill: oneshot::Receiver<()>) {
    let codec = FrameCodec::new(Arc::new(JsonSerializer), DEFAULT_MAX_FRAME_LEN);
    let (read, mut write) = tokio::io::split(stream);
    let mut reader = FrameReader::new(read, codec.clone());

    loop {
        tokio::select! {
            _ = &mut kill => return,
            message = reader.next_message() => {
                let Ok(Some(Message::Request(request))) = message else { return };
                if request.is_heartbeat() {
                    continue;
                }
                let response = Response::ok(request.call_id, serde_json::json!(port));
                let Ok(frame) = codec.encode(&Message::Response(response)) else { return };
                if write.write_all(&frame).await.is_err() {
                    return;
                }
            }
        }
    }
}
