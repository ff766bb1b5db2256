//! Runs a hello server and a client in one process, sharing an in-memory registry.
//!
//! ```text
//! driftdemo [client-config.json]
//! RUST_LOG=debug DRIFT_STRATEGY=lfu driftdemo
//! ```

use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use driftclient::Client;
use driftreg::MemoryRegistry;
use driftreg::Registry;
use driftserver::MethodTable;
use driftserver::Server;
use driftserver::arg;
use driftwire::ClientConfig;
use driftwire::ServerConfig;
use serde_json::json;
use tracing::info;
use tracing::warn;
use tracing_subscriber::EnvFilter;

fn hello_service() -> MethodTable {
    MethodTable::new()
        .method("hello", |args| Ok(json!(format!("Hi {}", arg::<i64>(&args, 0)?))))
        .method("sum", |args| {
            let items: Vec<i64> = arg(&args, 0)?;
            Ok(json!(items.iter().sum::<i64>()))
        })
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let client_config = match std::env::args().nth(1) {
        Some(path) => ClientConfig::from_json_file(&path).with_context(|| format!("loading {}", path))?,
        None => ClientConfig::default(),
    }
    .apply_env()?;
    let server_config = ServerConfig {
        bind_addr: "127.0.0.1:0".into(),
        ..ServerConfig::default()
    }
    .apply_env()?;

    let server_runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("drift-server")
        .enable_all()
        .build()?;
    let registry = Arc::new(MemoryRegistry::new());

    let server = Server::new(server_config)?;
    server.register_service("Hello", "1.0", Arc::new(hello_service()));
    let published: Arc<dyn Registry> = registry.clone();
    let server = server_runtime.block_on(server.start(Some(published)))?;
    info!(addr = %server.local_addr(), "hello server listening");

    let client = Client::new(client_config)?;
    client.discover(registry)?;
    let hello = client.stub("Hello", "1.0");

    for n in 1..=3 {
        let reply = hello.invoke("hello", vec![json!(n)])?;
        info!(%reply, "sync call");
    }

    let (tx, rx) = mpsc::channel();
    for n in 0..5 {
        let tx = tx.clone();
        let future = hello.call("sum", vec![json!((0..=n).collect::<Vec<i64>>())])?;
        future.add_callback(move |outcome| {
            let _ = tx.send((n, outcome));
        });
    }
    drop(tx);
    while let Ok((n, outcome)) = rx.recv_timeout(Duration::from_secs(5)) {
        match outcome {
            Ok(total) => info!(n, %total, "async call"),
            Err(e) => warn!(n, error = %e, "async call failed"),
        }
    }

    match hello.invoke("goodbye", vec![]) {
        Ok(v) => info!(%v, "unexpected reply"),
        Err(e) => info!(error = %e, "remote errors come back as values"),
    }

    client.stop();
    server_runtime.block_on(server.shutdown());
    Ok(())
}
