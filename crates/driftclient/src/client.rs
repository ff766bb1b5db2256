//! # RPC Client
//!
//! `Client` owns the I/O runtime and the [`ConnectionRegistry`]. A call builds a
//! [`Request`] with a fresh call id, routes it to a live connection, queues the frame,
//! and returns the [`InvocationFuture`] immediately.
//!
//! [`ServiceStub`] binds an interface and version so callers only name the method.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use driftreg::Registry;
use driftwire::ClientConfig;
use driftwire::Request;
use driftwire::Value;
use driftwire::service_key;
use tokio::runtime::Handle;
use tokio::runtime::Runtime;
use tracing::debug;
use tracing::info;

use crate::balancer;
use crate::connection::ConnectionOptions;
use crate::connection::Connector;
use crate::connection::TcpConnector;
use crate::discovery::Discovery;
use crate::error::Error;
use crate::error::Result;
use crate::future::InvocationFuture;
use crate::registry::ConnectionRegistry;

pub struct Client {
    config: ClientConfig,
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
    connections: Arc<ConnectionRegistry>,
    discovery: Mutex<Option<Discovery>>,
    stopped: AtomicBool,
}

impl Client {
    /// Builds a client with its own I/O runtime of `io_threads` workers, connecting
    /// over TCP.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.io_threads)
            .thread_name("drift-io")
            .enable_all()
            .build()
            .map_err(|e| Error::Runtime(e.to_string()))?;
        let handle = runtime.handle().clone();

        let mut client = Self::with_handle(config, handle, Arc::new(TcpConnector))?;
        client.runtime = Mutex::new(Some(runtime));
        Ok(client)
    }

    /// Builds a client on an existing runtime. `stop` leaves that runtime running.
    pub fn with_handle(config: ClientConfig, handle: Handle, connector: Arc<dyn Connector>) -> Result<Self> {
        config.validate()?;
        let connections = ConnectionRegistry::new(
            balancer::for_strategy(config.strategy),
            connector,
            ConnectionOptions::from_config(&config),
            config.connect_pool_size,
            config.wait_timeout(),
            handle.clone(),
        );
        info!(strategy = %config.strategy, "client started");

        Ok(Self {
            config,
            runtime: Mutex::new(None),
            handle,
            connections,
            discovery: Mutex::new(None),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    /// Follows the endpoints published in `registry`. Replaces any previous discovery.
    pub fn discover(&self, registry: Arc<dyn Registry>) -> Result<()> {
        if self.is_stopped() {
            return Err(Error::Stopped);
        }
        let discovery = Discovery::start(registry, self.connections.clone(), &self.handle)?;
        let previous = self
            .discovery
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(discovery);
        if let Some(previous) = previous {
            previous.stop();
        }
        Ok(())
    }

    /// Sends `method` on `interface`/`version` with `args`.
    ///
    /// Blocks while no connection is live, up to the configured wait timeout. Do not
    /// call from inside an async task.
    pub fn call(
        &self,
        interface: &str,
        version: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<InvocationFuture> {
        if self.is_stopped() {
            return Err(Error::Stopped);
        }
        dispatch(&self.connections, interface, version, method, args)
    }

    /// A stub bound to one service.
    pub fn stub(&self, interface: impl Into<String>, version: impl Into<String>) -> ServiceStub {
        ServiceStub {
            connections: self.connections.clone(),
            interface: interface.into(),
            version: version.into(),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Stops discovery, closes every connection, and shuts down the owned runtime.
    /// Idempotent.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(discovery) = self.discovery.lock().unwrap_or_else(|e| e.into_inner()).take() {
            discovery.stop();
        }
        self.connections.stop();

        if let Some(runtime) = self.runtime.lock().unwrap_or_else(|e| e.into_inner()).take() {
            runtime.shutdown_background();
        }
        info!("client stopped");
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A handle for calling one `(interface, version)`.
#[derive(Clone)]
pub struct ServiceStub {
    connections: Arc<ConnectionRegistry>,
    interface: String,
    version: String,
}

impl ServiceStub {
    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn service_key(&self) -> String {
        service_key(&self.interface, &self.version)
    }

    /// Sends `method` and returns the future without waiting.
    pub fn call(&self, method: &str, args: Vec<Value>) -> Result<InvocationFuture> {
        if self.connections.is_stopped() {
            return Err(Error::Stopped);
        }
        dispatch(&self.connections, &self.interface, &self.version, method, args)
    }

    /// Sends `method` and blocks for the result.
    pub fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        self.call(method, args)?.get()
    }
}

fn dispatch(
    connections: &ConnectionRegistry,
    interface: &str,
    version: &str,
    method: &str,
    args: Vec<Value>,
) -> Result<InvocationFuture> {
    let conn = connections.choose_connection(&service_key(interface, version))?;

    let mut call_id = new_call_id();
    while conn.pending().contains(&call_id) {
        call_id = new_call_id();
    }

    debug!(%call_id, interface, method, endpoint = %conn.endpoint(), "sending request");
    conn.send_request(Request::new(call_id, interface, method, version, args))
}

fn new_call_id() -> String {
    format!("{:032x}", rand::random::<u128>())
}
