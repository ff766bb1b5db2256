// File: crates/driftserver/tests/end_to_end.rs
//
// A published server and a discovering client sharing one in-memory registry.

use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use anyhow::Result;
use driftclient::Client;
use driftclient::Error as ClientError;
use driftreg::MemoryRegistry;
use driftreg::REGISTRY_PATH;
use driftreg::Registry;
use driftserver::MethodTable;
use driftserver::Server;
use driftserver::ServerHandle;
use driftserver::arg;
use driftwire::ClientConfig;
use driftwire::ServerConfig;
use serde_json::json;
use tokio::io::AsyncReadExt;
use tokio::runtime::Runtime;

fn server_runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

fn hello_service() -> MethodTable {
    MethodTable::new()
        .method("hello", |args| Ok(json!(format!("Hi {}", arg::<i64>(&args, 0)?))))
        .method("fail", |_| Err("no luck".to_string()))
        .method("big", |_| Ok(json!("x".repeat(70 * 1024))))
}

fn start(rt: &Runtime, registry: Arc<MemoryRegistry>, heartbeat_secs: u64) -> Result<ServerHandle> {
    let server = Server::new(ServerConfig {
        bind_addr: "127.0.0.1:0".into(),
        heartbeat_interval_secs: heartbeat_secs,
        ..ServerConfig::default()
    })?;
    server.register_service("Hello", "1.0", Arc::new(hello_service()));
    let registry: Arc<dyn Registry> = registry;
    Ok(rt.block_on(server.start(Some(registry)))?)
}

fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn test_hello_round_trip() -> Result<()> {
    let rt = server_runtime();
    let registry = Arc::new(MemoryRegistry::new());
    let _server = start(&rt, registry.clone(), 30)?;

    let client = Client::new(ClientConfig::default())?;
    client.discover(registry.clone())?;

    let hello = client.stub("Hello", "1.0");
    assert_eq!(hello.invoke("hello", vec![json!(3)])?, json!("Hi 3"));
    assert_eq!(hello.invoke("fail", vec![]).unwrap_err(), ClientError::Remote("no luck".into()));
    assert_eq!(
        hello.invoke("missing", vec![]).unwrap_err(),
        ClientError::Remote("no such method: missing".into())
    );

    let futures: Vec<_> = (0..20)
        .map(|n| hello.call("hello", vec![json!(n)]))
        .collect::<driftclient::Result<_>>()?;
    for (n, future) in futures.iter().enumerate() {
        assert_eq!(future.get_timeout(Duration::from_secs(5))?, json!(format!("Hi {}", n)));
    }

    client.stop();
    Ok(())
}

#[test]
fn test_oversize_result_reaches_caller_as_error() -> Result<()> {
    let rt = server_runtime();
    let registry = Arc::new(MemoryRegistry::new());
    let _server = start(&rt, registry.clone(), 30)?;

    let client = Client::new(ClientConfig::default())?;
    client.discover(registry)?;
    let hello = client.stub("Hello", "1.0");

    let err = hello.call("big", vec![])?.get_timeout(Duration::from_secs(3)).unwrap_err();
    match err {
        ClientError::Remote(message) => assert!(message.contains("byte limit"), "{}", message),
        other => panic!("expected a remote error, got {:?}", other),
    }

    // The connection survives.
    assert_eq!(hello.invoke("hello", vec![json!(5)])?, json!("Hi 5"));
    Ok(())
}

#[test]
fn test_shutdown_unpublishes_and_client_forgets() -> Result<()> {
    let rt = server_runtime();
    let registry = Arc::new(MemoryRegistry::new());
    let server = start(&rt, registry.clone(), 30)?;
    let endpoint = server.endpoint().clone();

    let client = Client::new(ClientConfig {
        wait_timeout_ms: 200,
        ..ClientConfig::default()
    })?;
    client.discover(registry.clone())?;
    wait_until("connected", || client.connections().is_live(&endpoint));

    rt.block_on(server.shutdown());
    assert!(rt.block_on(registry.children(REGISTRY_PATH))?.is_empty());
    wait_until("forgotten", || !client.connections().is_known(&endpoint));

    assert_eq!(
        client.stub("Hello", "1.0").call("hello", vec![json!(1)]).unwrap_err(),
        ClientError::NoAvailableConnection
    );
    Ok(())
}

#[test]
fn test_idle_connection_is_closed_by_server() -> Result<()> {
    let rt = server_runtime();
    let server = start(&rt, Arc::new(MemoryRegistry::new()), 1)?;
    let addr = server.local_addr();

    rt.block_on(async {
        let mut socket = tokio::net::TcpStream::connect(addr).await?;
        let started = Instant::now();
        let mut buf = [0u8; 16];
        let n = tokio::time::timeout(Duration::from_secs(10), socket.read(&mut buf)).await??;
        assert_eq!(n, 0);
        assert!(started.elapsed() >= Duration::from_secs(2));
        anyhow::Ok(())
    })
}

#[test]
fn test_heartbeats_keep_connection_open() -> Result<()> {
    let rt = server_runtime();
    let registry = Arc::new(MemoryRegistry::new());
    let server = start(&rt, registry.clone(), 1)?;
    let endpoint = server.endpoint().clone();

    let client = Client::new(ClientConfig {
        heartbeat_interval_secs: 1,
        ..ClientConfig::default()
    })?;
    client.discover(registry)?;
    wait_until("connected", || client.connections().is_live(&endpoint));
    let before = client.connections().choose_connection("Hello#1.0")?;

    // Longer than the server's idle timeout of three seconds.
    std::thread::sleep(Duration::from_millis(4500));

    assert!(!before.is_closed());
    assert_eq!(client.stub("Hello", "1.0").invoke("hello", vec![json!(7)])?, json!("Hi 7"));
    Ok(())
}
