//! # Connections
//!
//! One persistent stream to one endpoint. Two tasks own the stream halves:
//!
//! - the **writer** drains an outbound queue of encoded frames and sends a heartbeat
//!   whenever the stream has been write-idle for the heartbeat interval;
//! - the **reader** decodes response frames and completes the matching pending call.
//!
//! Callers never touch the socket. `send_request` registers the call, queues its
//! frame, and returns immediately. When either task stops, the connection is marked
//! closed and every call still pending on it fails with `ConnectionClosed`.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use driftwire::ClientConfig;
use driftwire::Endpoint;
use driftwire::FrameCodec;
use driftwire::FrameReader;
use driftwire::JsonSerializer;
use driftwire::Message;
use driftwire::Request;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::error::Error;
use crate::error::Result;
use crate::future::InvocationFuture;
use crate::pending::PendingTable;

/// A bidirectional byte stream a connection can run over.
pub trait Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Stream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type BoxedStream = Box<dyn Stream>;

/// Opens streams to endpoints.
///
/// This trait is designed to be object-safe (`Arc<dyn Connector>`), so tests can swap
/// the network for in-memory pipes.
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, endpoint: &Endpoint) -> io::Result<BoxedStream>;
}

/// Plain TCP.
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpConnector;

#[async_trait::async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, endpoint: &Endpoint) -> io::Result<BoxedStream> {
        let stream = TcpStream::connect(endpoint.address()).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}

/// Per-connection settings derived from the client configuration.
#[derive(Clone)]
pub struct ConnectionOptions {
    pub codec: FrameCodec,
    pub heartbeat_interval: Duration,
    pub slow_call_threshold: Duration,
}

impl ConnectionOptions {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            codec: FrameCodec::new(Arc::new(JsonSerializer), config.max_frame_len),
            heartbeat_interval: config.heartbeat_interval(),
            slow_call_threshold: config.slow_call_threshold(),
        }
    }
}

pub struct Connection {
    endpoint: Endpoint,
    outbound: mpsc::UnboundedSender<Bytes>,
    pending: Arc<PendingTable>,
    closed: Arc<watch::Sender<bool>>,
    options: ConnectionOptions,
    handle: Handle,
}

impl Connection {
    /// Takes ownership of `stream` and starts the reader and writer tasks on `handle`.
    pub fn spawn<S: Stream>(
        endpoint: Endpoint,
        stream: S,
        options: ConnectionOptions,
        handle: &Handle,
    ) -> Arc<Self> {
        let (read_half, write_half) = tokio::io::split(stream);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);
        let closed = Arc::new(closed);
        let pending = Arc::new(PendingTable::new());

        handle.spawn(write_loop(
            endpoint.clone(),
            write_half,
            outbound_rx,
            closed.clone(),
            options.codec.clone(),
            options.heartbeat_interval,
        ));
        handle.spawn(read_loop(
            endpoint.clone(),
            FrameReader::new(read_half, options.codec.clone()),
            pending.clone(),
            closed.clone(),
        ));

        Arc::new(Self {
            endpoint,
            outbound,
            pending,
            closed,
            options,
            handle: handle.clone(),
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn pending(&self) -> &Arc<PendingTable> {
        &self.pending
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once the connection has closed for any reason.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Stops both tasks. Pending calls fail with `ConnectionClosed`.
    pub fn close(&self) {
        if !self.closed.send_replace(true) {
            info!(endpoint = %self.endpoint, "closing connection");
        }
    }

    /// Registers `request` as pending and queues its frame.
    ///
    /// The returned future settles when the response arrives or the connection closes.
    pub fn send_request(&self, request: Request) -> Result<InvocationFuture> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed(self.endpoint.address()));
        }

        let future = InvocationFuture::with_pending(
            &request,
            self.handle.clone(),
            self.options.slow_call_threshold,
            Arc::downgrade(&self.pending),
        );
        if !self.pending.insert(future.clone()) {
            return Err(Error::Runtime(format!("duplicate call id {}", request.call_id)));
        }

        let call_id = request.call_id.clone();
        let frame = match self.options.codec.encode(&Message::Request(request)) {
            Ok(frame) => frame,
            Err(e) => {
                error!(%call_id, error = %e, "failed to encode request");
                self.pending.remove(&call_id);
                return Err(e.into());
            }
        };

        if self.outbound.send(frame).is_err() {
            self.pending.remove(&call_id);
            return Err(Error::ConnectionClosed(self.endpoint.address()));
        }

        // The reader may have failed everything between the check above and the insert.
        if self.is_closed() && self.pending.remove(&call_id).is_some() {
            return Err(Error::ConnectionClosed(self.endpoint.address()));
        }

        debug!(%call_id, endpoint = %self.endpoint, "request queued");
        Ok(future)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.closed.send_replace(true);
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.endpoint.address())
            .field("pending", &self.pending.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Resolves once `rx` reads true or its sender is gone. Holds no borrow guard on return.
async fn until_set(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|set| *set).await;
}

async fn write_loop<W: AsyncWrite + Unpin>(
    endpoint: Endpoint,
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
    closed: Arc<watch::Sender<bool>>,
    codec: FrameCodec,
    heartbeat_interval: Duration,
) {
    let mut closed_rx = closed.subscribe();

    loop {
        tokio::select! {
            biased;
            _ = until_set(&mut closed_rx) => break,
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = writer.write_all(&frame).await {
                    warn!(%endpoint, error = %e, "write failed");
                    break;
                }
            }
            _ = tokio::time::sleep(heartbeat_interval) => {
                match codec.encode(&Message::Request(Request::heartbeat())) {
                    Ok(frame) => {
                        if let Err(e) = writer.write_all(&frame).await {
                            warn!(%endpoint, error = %e, "heartbeat failed");
                            break;
                        }
                        debug!(%endpoint, "heartbeat sent");
                    }
                    Err(e) => error!(%endpoint, error = %e, "failed to encode heartbeat"),
                }
            }
        }
    }

    closed.send_replace(true);
    let _ = writer.shutdown().await;
}

async fn read_loop<R: AsyncRead + Unpin>(
    endpoint: Endpoint,
    mut reader: FrameReader<R>,
    pending: Arc<PendingTable>,
    closed: Arc<watch::Sender<bool>>,
) {
    let mut closed_rx = closed.subscribe();

    let reason = loop {
        tokio::select! {
            biased;
            _ = until_set(&mut closed_rx) => break "closed locally".to_string(),
            message = reader.next_message() => match message {
                Ok(Some(Message::Response(response))) => {
                    pending.complete(response);
                }
                Ok(Some(Message::Request(request))) => {
                    debug!(%endpoint, call_id = %request.call_id, "ignoring request from server");
                }
                Ok(None) => break "closed by peer".to_string(),
                Err(e) => break e.to_string(),
            },
        }
    };

    info!(%endpoint, %reason, "connection closed");
    closed.send_replace(true);

    let failed = pending.fail_all(Error::ConnectionClosed(endpoint.address()));
    if failed > 0 {
        warn!(%endpoint, failed, "failed pending calls on close");
    }
}

#[cfg(test)]
mod tests {
    use driftwire::Response;
    use driftwire::codec::DEFAULT_MAX_FRAME_LEN;
    use serde_json::json;
    use tokio::io::DuplexStream;

    use super::*;

    fn options(heartbeat: Duration) -> ConnectionOptions {
        ConnectionOptions {
            codec: FrameCodec::new(Arc::new(JsonSerializer), DEFAULT_MAX_FRAME_LEN),
            heartbeat_interval: heartbeat,
            slow_call_threshold: Duration::from_secs(5),
        }
    }

    fn pair(heartbeat: Duration) -> (Arc<Connection>, FrameReader<tokio::io::ReadHalf<DuplexStream>>, tokio::io::WriteHalf<DuplexStream>) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let conn = Connection::spawn(
            Endpoint::new("127.0.0.1", 7000).with_service("Hello", "1.0"),
            client,
            options(heartbeat),
            &Handle::current(),
        );
        let (read, write) = tokio::io::split(server);
        (conn, FrameReader::new(read, options(heartbeat).codec), write)
    }

    async fn reply(write: &mut tokio::io::WriteHalf<DuplexStream>, response: Response) {
        let frame = options(Duration::from_secs(30)).codec.encode(&Message::Response(response)).unwrap();
        write.write_all(&frame).await.unwrap();
    }

    #[tokio::test]
    async fn test_response_completes_matching_call() {
        let (conn, mut server_rx, mut server_tx) = pair(Duration::from_secs(30));

        let a = conn.send_request(Request::new("a", "Hello", "greet", "1.0", vec![json!(1)])).unwrap();
        let b = conn.send_request(Request::new("b", "Hello", "greet", "1.0", vec![json!(2)])).unwrap();

        let Some(Message::Request(first)) = server_rx.next_message().await.unwrap() else {
            panic!("expected request");
        };
        assert_eq!(first.call_id, "a");
        assert_eq!(first.parameters, vec![json!(1)]);

        // Answer out of order.
        reply(&mut server_tx, Response::ok("b", json!("Hi 2"))).await;
        reply(&mut server_tx, Response::ok("a", json!("Hi 1"))).await;

        assert_eq!(b.wait().await.unwrap(), json!("Hi 2"));
        assert_eq!(a.wait().await.unwrap(), json!("Hi 1"));
        assert!(conn.pending().is_empty());
    }

    #[tokio::test]
    async fn test_heartbeat_when_write_idle() {
        let (_conn, mut server_rx, _server_tx) = pair(Duration::from_millis(20));

        let message = tokio::time::timeout(Duration::from_secs(2), server_rx.next_message())
            .await
            .unwrap()
            .unwrap();
        let Some(Message::Request(beat)) = message else {
            panic!("expected heartbeat");
        };
        assert!(beat.is_heartbeat());
    }

    #[tokio::test]
    async fn test_peer_close_fails_pending_calls() {
        let (conn, server_rx, server_tx) = pair(Duration::from_secs(30));
        let fut = conn.send_request(Request::new("x", "Hello", "greet", "1.0", vec![])).unwrap();

        drop(server_rx);
        drop(server_tx);

        let result = tokio::time::timeout(Duration::from_secs(2), fut.wait()).await.unwrap();
        assert_eq!(result, Err(Error::ConnectionClosed("127.0.0.1:7000".into())));

        tokio::time::timeout(Duration::from_secs(2), conn.closed()).await.unwrap();
        assert!(conn.is_closed());
        assert!(conn.send_request(Request::new("y", "Hello", "greet", "1.0", vec![])).is_err());
    }

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test]
    async fn test_loop_futures_are_send() {
        let (client, _server) = tokio::io::duplex(1024);
        let (read, write) = tokio::io::split(client);
        let (closed, _) = watch::channel(false);
        let closed = Arc::new(closed);
        let (_tx, rx) = mpsc::unbounded_channel();
        let codec = options(Duration::from_secs(30)).codec;
        let endpoint = Endpoint::new("127.0.0.1", 7000);

        let writer = write_loop(endpoint.clone(), write, rx, closed.clone(), codec.clone(), Duration::from_secs(30));
        let reader = read_loop(
            endpoint,
            FrameReader::new(read, codec),
            Arc::new(PendingTable::new()),
            closed,
        );
        assert_send(&writer);
        assert_send(&reader);
    }

    #[tokio::test]
    async fn test_local_close() {
        let (conn, _server_rx, _server_tx) = pair(Duration::from_secs(30));
        let fut = conn.send_request(Request::new("x", "Hello", "greet", "1.0", vec![])).unwrap();

        conn.close();
        assert!(matches!(fut.wait().await, Err(Error::ConnectionClosed(_))));
    }
}
