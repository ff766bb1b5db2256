//! # TCP Server
//!
//! Accepts connections, decodes request frames, hands each request to the
//! [`Dispatcher`], and writes responses back through a per-connection writer task.
//! A connection with no inbound traffic for the idle timeout is closed.
//!
//! When given a registry, the server publishes its endpoint after binding and removes
//! it again on [`ServerHandle::shutdown`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use driftreg::Registry;
use driftwire::Endpoint;
use driftwire::FrameCodec;
use driftwire::FrameReader;
use driftwire::JsonSerializer;
use driftwire::Message;
use driftwire::Response;
use driftwire::ServerConfig;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::dispatcher::Dispatcher;
use crate::error::Error;
use crate::error::Result;
use crate::publisher::Publication;
use crate::service::Service;

pub struct Server {
    config: ServerConfig,
    dispatcher: Arc<Dispatcher>,
    codec: FrameCodec,
}

impl Server {
    pub fn new(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            dispatcher: Arc::new(Dispatcher::new(config.worker_pool_size)),
            codec: FrameCodec::new(Arc::new(JsonSerializer), config.max_frame_len),
            config,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn register_service(&self, interface: &str, version: &str, service: Arc<dyn Service>) -> &Self {
        self.dispatcher.register(interface, version, service);
        self
    }

    /// Binds, starts accepting, and publishes the endpoint to `registry` if given.
    pub async fn start(self, registry: Option<Arc<dyn Registry>>) -> Result<ServerHandle> {
        let listener = TcpListener::bind(&self.config.bind_addr)
            .await
            .map_err(|e| Error::Bind {
                addr: self.config.bind_addr.clone(),
                reason: e.to_string(),
            })?;
        let local_addr = listener.local_addr()?;

        let host = match &self.config.advertise_host {
            Some(host) => host.clone(),
            None => {
                if local_addr.ip().is_unspecified() {
                    warn!(%local_addr, "bound to a wildcard address without advertise_host");
                }
                local_addr.ip().to_string()
            }
        };
        let mut endpoint = Endpoint::new(host, local_addr.port());
        endpoint.services = self.dispatcher.descriptors();

        let publication = match registry {
            Some(registry) => {
                if endpoint.services.is_empty() {
                    return Err(Error::NoServices(local_addr));
                }
                Some(Publication::publish(registry, endpoint.clone()).await?)
            }
            None => None,
        };

        let (shutdown, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(
            listener,
            self.dispatcher.clone(),
            self.codec.clone(),
            self.config.idle_timeout(),
            shutdown_rx,
        ));
        info!(%local_addr, "server started");

        Ok(ServerHandle {
            local_addr,
            endpoint,
            dispatcher: self.dispatcher,
            shutdown,
            accept_task: Some(accept_task),
            publication,
        })
    }
}

/// A running server.
pub struct ServerHandle {
    local_addr: SocketAddr,
    endpoint: Endpoint,
    dispatcher: Arc<Dispatcher>,
    shutdown: watch::Sender<bool>,
    accept_task: Option<JoinHandle<()>>,
    publication: Option<Publication>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn publication_path(&self) -> Option<&str> {
        self.publication.as_ref().map(Publication::path)
    }

    /// Unpublishes, stops accepting, and closes every connection.
    pub async fn shutdown(mut self) {
        if let Some(publication) = self.publication.take() {
            publication.unpublish().await;
        }
        self.dispatcher.close();
        self.shutdown.send_replace(true);
        if let Some(task) = self.accept_task.take() {
            let _ = task.await;
        }
        info!(local_addr = %self.local_addr, "server stopped");
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

async fn until_stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn accept_loop(
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    codec: FrameCodec,
    idle_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let connection_shutdown = shutdown.clone();
    loop {
        tokio::select! {
            _ = until_stopped(&mut shutdown) => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        warn!(%peer, error = %e, "failed to set nodelay");
                    }
                    debug!(%peer, "accepted connection");
                    tokio::spawn(serve_connection(
                        stream,
                        peer,
                        dispatcher.clone(),
                        codec.clone(),
                        idle_timeout,
                        connection_shutdown.clone(),
                    ));
                }
                Err(e) => error!(error = %e, "failed to accept connection"),
            },
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    codec: FrameCodec,
    idle_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let (read_half, write_half) = stream.into_split();
    let (outbound, outbound_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_loop(peer, write_half, outbound_rx));
    let mut reader = FrameReader::new(read_half, codec.clone());

    loop {
        let next = tokio::select! {
            _ = until_stopped(&mut shutdown) => break,
            next = tokio::time::timeout(idle_timeout, reader.next_message()) => next,
        };

        match next {
            Err(_) => {
                warn!(%peer, idle = ?idle_timeout, "channel idle, closing it");
                break;
            }
            Ok(Ok(Some(Message::Request(request)))) => {
                let dispatcher = dispatcher.clone();
                let codec = codec.clone();
                let outbound = outbound.clone();
                tokio::spawn(async move {
                    let Some(response) = dispatcher.dispatch(request).await else {
                        return;
                    };
                    let call_id = response.call_id.clone();
                    let Some(frame) = encode_response(&codec, response) else {
                        return;
                    };
                    if outbound.send(frame).is_ok() {
                        debug!(%call_id, "send response");
                    }
                });
            }
            Ok(Ok(Some(Message::Response(response)))) => {
                warn!(%peer, call_id = %response.call_id, "unexpected response from client, ignored");
            }
            Ok(Ok(None)) => {
                debug!(%peer, "client closed connection");
                break;
            }
            Ok(Err(e)) => {
                warn!(%peer, error = %e, "server caught exception");
                break;
            }
        }
    }

    // Responses already in flight still go out; the writer ends with the last sender.
    drop(outbound);
    if *shutdown.borrow() {
        writer.abort();
    } else {
        let _ = writer.await;
    }
}

/// Encodes `response`. A response that cannot be encoded is replaced by an error
/// response naming the failure, so the caller is never left waiting.
fn encode_response(codec: &FrameCodec, response: Response) -> Option<Bytes> {
    let call_id = response.call_id.clone();
    let error = match codec.encode(&Message::Response(response)) {
        Ok(frame) => return Some(frame),
        Err(e) => e,
    };
    error!(%call_id, error = %error, "failed to encode response");

    match codec.encode(&Message::Response(Response::failed(&call_id, error.to_string()))) {
        Ok(frame) => Some(frame),
        Err(e) => {
            error!(%call_id, error = %e, "failed to encode error response");
            None
        }
    }
}

async fn write_loop(peer: SocketAddr, mut write_half: OwnedWriteHalf, mut outbound: mpsc::UnboundedReceiver<Bytes>) {
    while let Some(frame) = outbound.recv().await {
        if let Err(e) = write_half.write_all(&frame).await {
            warn!(%peer, error = %e, "write failed");
            break;
        }
    }
    let _ = write_half.shutdown().await;
}
