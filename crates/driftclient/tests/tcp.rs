// File: crates/driftclient/tests/tcp.rs
//
// Client against a hand-written server on a real TCP socket.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use driftclient::Client;
use driftclient::Error;
use driftwire::ClientConfig;
use driftwire::Endpoint;
use driftwire::FrameCodec;
use driftwire::FrameReader;
use driftwire::JsonSerializer;
use driftwire::Message;
use driftwire::Response;
use driftwire::codec::DEFAULT_MAX_FRAME_LEN;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::runtime::Runtime;

fn server_runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

/// Answers `say(n)` with `"Hi n"` and `fail()` with an error; never answers `hang`.
async fn serve(listener: TcpListener) {
    let codec = FrameCodec::new(Arc::new(JsonSerializer), DEFAULT_MAX_FRAME_LEN);
    loop {
        let Ok((socket, _)) = listener.accept().await else { return };
        let codec = codec.clone();
        tokio::spawn(async move {
            let (read, mut write) = socket.into_split();
            let mut reader = FrameReader::new(read, codec.clone());
            while let Ok(Some(Message::Request(request))) = reader.next_message().await {
                if request.is_heartbeat() {
                    continue;
                }
                let response = match request.method.as_str() {
                    "say" => Response::ok(&request.call_id, json!(format!("Hi {}", request.parameters[0]))),
                    "fail" => Response::failed(&request.call_id, "boom"),
                    _ => continue,
                };
                let frame = codec.encode(&Message::Response(response)).unwrap();
                if write.write_all(&frame).await.is_err() {
                    return;
                }
            }
        });
    }
}

fn start_server(rt: &Runtime) -> Result<Endpoint> {
    let listener = rt.block_on(TcpListener::bind("127.0.0.1:0"))?;
    let port = listener.local_addr()?.port();
    rt.spawn(serve(listener));
    Ok(Endpoint::new("127.0.0.1", port).with_service("Hello", "1.0"))
}

#[test]
fn test_round_trip_over_tcp() -> Result<()> {
    let server = server_runtime();
    let endpoint = start_server(&server)?;

    let client = Client::new(ClientConfig::default())?;
    client.connections().reconcile(vec![endpoint]);

    let stub = client.stub("Hello", "1.0");
    assert_eq!(stub.invoke("say", vec![json!(3)])?, json!("Hi 3"));

    let futures: Vec<_> = (0..10)
        .map(|n| stub.call("say", vec![json!(n)]))
        .collect::<driftclient::Result<_>>()?;
    for (n, future) in futures.iter().enumerate() {
        assert_eq!(future.get_timeout(Duration::from_secs(2))?, json!(format!("Hi {}", n)));
    }

    client.stop();
    Ok(())
}

#[test]
fn test_remote_error_and_timeout() -> Result<()> {
    let server = server_runtime();
    let endpoint = start_server(&server)?;

    let client = Client::new(ClientConfig::default())?;
    client.connections().reconcile(vec![endpoint]);
    let stub = client.stub("Hello", "1.0");

    assert_eq!(stub.invoke("fail", vec![]).unwrap_err(), Error::Remote("boom".into()));

    let future = stub.call("hang", vec![])?;
    let started = std::time::Instant::now();
    let err = future.get_timeout(Duration::from_millis(100)).unwrap_err();
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert!(matches!(err, Error::Timeout { ref method, .. } if method == "hang"));

    let conn = client.connections().choose_connection("Hello#1.0")?;
    assert!(!conn.pending().contains(future.call_id()));
    Ok(())
}

#[test]
fn test_server_shutdown_fails_pending_calls() -> Result<()> {
    let server = server_runtime();
    let endpoint = start_server(&server)?;

    let client = Client::new(ClientConfig::default())?;
    client.connections().reconcile(vec![endpoint.clone()]);

    let future = client.call("Hello", "1.0", "hang", vec![])?;
    server.shutdown_background();

    let err = future.get_timeout(Duration::from_secs(5)).unwrap_err();
    assert_eq!(err, Error::ConnectionClosed(endpoint.address()));
    Ok(())
}
