//! End-to-end tests driving the proxy through its TCP listen surface
//!
//! Every test runs a real accept loop on loopback, with origins bound to
//! ephemeral loopback ports. Interface records use 127.0.0.1 so outbound
//! binds succeed without special host configuration.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use mwan_proxy::balancer::{EngineConfig, SelectionEngine};
use mwan_proxy::events::EventLog;
use mwan_proxy::iface::IfaceRecord;
use mwan_proxy::proxy::{
    run_accept_loop, ProxyListener, SessionConfig, RESPONSE_200, RESPONSE_502, RESPONSE_503,
};

fn engine_over(ips: &[Ipv4Addr]) -> Arc<SelectionEngine> {
    let records = ips
        .iter()
        .enumerate()
        .map(|(i, ip)| Arc::new(IfaceRecord::new(format!("test{i}"), *ip)))
        .collect();
    Arc::new(SelectionEngine::new(records, EngineConfig::default()))
}

fn test_session_config() -> SessionConfig {
    SessionConfig {
        head_read_timeout: Duration::from_secs(2),
        connect_timeout: Duration::from_millis(500),
        idle_timeout: Duration::from_secs(5),
        close_wait: Duration::from_secs(1),
    }
}

async fn start_proxy(engine: Arc<SelectionEngine>) -> SocketAddr {
    let listener = ProxyListener::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let addr = listener.local_addr();

    tokio::spawn(run_accept_loop(
        listener,
        engine,
        Arc::new(EventLog::noop()),
        test_session_config(),
    ));

    addr
}

/// Spawn an origin that echoes everything it reads, for any number of
/// connections.
async fn start_echo_origin() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        loop {
            let (mut socket, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => break,
            };
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                while let Ok(n) = socket.read(&mut buf).await {
                    if n == 0 || socket.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    port
}

/// Poll until `cond` holds or the deadline passes.
async fn wait_until(mut cond: impl FnMut() -> bool, what: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for: {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn connect_through(proxy: SocketAddr, origin_port: u16) -> TcpStream {
    let mut client = TcpStream::connect(proxy).await.unwrap();
    client
        .write_all(format!("CONNECT 127.0.0.1:{origin_port} HTTP/1.1\r\n\r\n").as_bytes())
        .await
        .unwrap();

    let mut status = vec![0u8; RESPONSE_200.len()];
    client.read_exact(&mut status).await.unwrap();
    assert_eq!(status, RESPONSE_200);
    client
}

#[tokio::test]
async fn connect_tunnel_carries_bytes_both_ways() {
    let origin_port = start_echo_origin().await;
    let engine = engine_over(&[Ipv4Addr::LOCALHOST, Ipv4Addr::LOCALHOST]);
    let proxy = start_proxy(Arc::clone(&engine)).await;

    let mut client = connect_through(proxy, origin_port).await;

    client.write_all(b"hello through the tunnel").await.unwrap();
    let mut echoed = vec![0u8; 24];
    client.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"hello through the tunnel");

    drop(client);

    let engine_ref = Arc::clone(&engine);
    wait_until(
        move || {
            engine_ref
                .interfaces()
                .iter()
                .map(|i| i.successful_requests())
                .sum::<u64>()
                == 1
        },
        "session success recorded",
    )
    .await;

    // 24 bytes each way, all counted against the carrying interface
    let bytes: u64 = engine.interfaces().iter().map(|i| i.bytes_sent()).sum();
    assert_eq!(bytes, 48);
}

#[tokio::test]
async fn round_robin_alternates_across_sessions() {
    let origin_port = start_echo_origin().await;
    let engine = engine_over(&[Ipv4Addr::LOCALHOST, Ipv4Addr::LOCALHOST]);
    let proxy = start_proxy(Arc::clone(&engine)).await;

    for completed in 1..=4u64 {
        let client = connect_through(proxy, origin_port).await;
        drop(client);

        let engine_ref = Arc::clone(&engine);
        wait_until(
            move || {
                engine_ref
                    .interfaces()
                    .iter()
                    .map(|i| i.successful_requests())
                    .sum::<u64>()
                    == completed
            },
            "session completion",
        )
        .await;
    }

    // 4 sessions over a 2-entry rotation: each record carried exactly 2
    for iface in engine.interfaces() {
        assert_eq!(iface.successful_requests(), 2);
        assert_eq!(iface.active_connections(), 0);
    }
}

#[tokio::test]
async fn plain_http_head_replayed_verbatim() {
    // Origin that captures the request bytes before answering.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let origin_port = listener.local_addr().unwrap().port();
    let (captured_tx, captured_rx) = tokio::sync::oneshot::channel::<Vec<u8>>();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut head = Vec::new();
        let mut buf = vec![0u8; 4096];
        while !head.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            head.extend_from_slice(&buf[..n]);
        }
        captured_tx.send(head).unwrap();
        socket
            .write_all(b"HTTP/1.1 204 No Content\r\n\r\n")
            .await
            .unwrap();
    });

    let engine = engine_over(&[Ipv4Addr::LOCALHOST, Ipv4Addr::LOCALHOST]);
    let proxy = start_proxy(engine).await;

    // Absolute-form target, deliberately no Host header: destination comes
    // from the URL, and the head is replayed untouched.
    let request =
        format!("GET http://127.0.0.1:{origin_port}/foo HTTP/1.1\r\nX-Marker: e2e\r\n\r\n");
    let mut client = TcpStream::connect(proxy).await.unwrap();
    client.write_all(request.as_bytes()).await.unwrap();

    let captured = captured_rx.await.unwrap();
    assert_eq!(captured, request.as_bytes(), "head must replay byte-exact");

    let mut response = Vec::new();
    client.read_to_end(&mut response).await.unwrap();
    assert!(response.starts_with(b"HTTP/1.1 204"));
}

#[tokio::test]
async fn link_local_only_yields_503() {
    let engine = engine_over(&[Ipv4Addr::new(169, 254, 1, 2)]);
    let proxy = start_proxy(engine).await;

    let mut client = TcpStream::connect(proxy).await.unwrap();
    let mut response = Vec::new();
    client.read_to_end(&mut response).await.unwrap();
    assert_eq!(response, RESPONSE_503);
}

#[tokio::test]
async fn unreachable_origin_yields_502() {
    let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let dead_port = probe.local_addr().unwrap().port();
    drop(probe);

    let engine = engine_over(&[Ipv4Addr::LOCALHOST, Ipv4Addr::LOCALHOST]);
    let proxy = start_proxy(Arc::clone(&engine)).await;

    let mut client = TcpStream::connect(proxy).await.unwrap();
    client
        .write_all(format!("CONNECT 127.0.0.1:{dead_port} HTTP/1.1\r\n\r\n").as_bytes())
        .await
        .unwrap();

    let mut response = Vec::new();
    client.read_to_end(&mut response).await.unwrap();
    assert_eq!(response, RESPONSE_502);

    // One failed attempt per rotation entry, all on the same IP
    let failed: u64 = engine.interfaces().iter().map(|i| i.failed_requests()).sum();
    assert_eq!(failed, 2);
}

#[tokio::test]
async fn failover_reaches_origin_via_second_interface() {
    let origin_port = start_echo_origin().await;

    // First interface cannot bind (TEST-NET-3), second is loopback.
    let engine = engine_over(&[Ipv4Addr::new(203, 0, 113, 7), Ipv4Addr::LOCALHOST]);
    let proxy = start_proxy(Arc::clone(&engine)).await;

    let mut client = connect_through(proxy, origin_port).await;
    client.write_all(b"failover").await.unwrap();
    let mut echoed = vec![0u8; 8];
    client.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"failover");
    drop(client);

    let bad = Arc::clone(&engine.interfaces()[0]);
    let engine_ref = Arc::clone(&engine);
    wait_until(
        move || engine_ref.interfaces()[1].successful_requests() == 1,
        "failover session success",
    )
    .await;

    assert_eq!(bad.failed_requests(), 1);
    assert_eq!(engine.consecutive_failures(bad.ip()), 1);
    assert_eq!(bad.status(), mwan_proxy::iface::IfaceStatus::Degraded);
}

#[tokio::test]
async fn malformed_head_closes_without_response() {
    let engine = engine_over(&[Ipv4Addr::LOCALHOST, Ipv4Addr::LOCALHOST]);
    let proxy = start_proxy(engine).await;

    let mut client = TcpStream::connect(proxy).await.unwrap();
    client.write_all(b"NOT-HTTP\r\n\r\n").await.unwrap();

    let mut response = Vec::new();
    client.read_to_end(&mut response).await.unwrap();
    assert!(response.is_empty());
}
