//! Per-connection session state machine
//!
//! One session per accepted client. The session picks an interface, reads
//! and parses the request head, establishes the outbound connection with
//! failover, and then hands the connection pair to two forwarding pumps.
//! The first pump to finish cancels its sibling; teardown waits for the
//! sibling's acknowledgement before updating interface statistics.
//!
//! ```text
//! ACCEPTED --[interface picked]--> HEAD_READ --[parsed]--> CONNECTING
//! ACCEPTED --[no valid iface]----> 503 -> CLOSED
//! HEAD_READ --[timeout / parse error]--> CLOSED (silent)
//! CONNECTING --[all attempts fail]--> 502 -> CLOSED
//! CONNECTING --[connected]--> 200 (CONNECT) or head replay --> TUNNELING
//! TUNNELING --[either pump ends]--> TEARDOWN -> CLOSED
//! ```
//!
//! No error escapes `run()`; the acceptor is never impacted by a session.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::connect::connect_with_failover;
use super::forward::{pump, Direction};
use super::head::{RequestHead, MAX_HEAD_SIZE};
use crate::balancer::SelectionEngine;
use crate::config::TimeoutConfig;
use crate::error::{MwanProxyError, SessionError};
use crate::events::{format_bytes, EventKind, EventLog, Severity};
use crate::iface::IfaceRecord;

/// Sent when no interface can be selected
pub const RESPONSE_503: &[u8] = b"HTTP/1.1 503 Service Unavailable\r\n\r\n";

/// Sent when every connect attempt failed
pub const RESPONSE_502: &[u8] = b"HTTP/1.1 502 Bad Gateway\r\n\r\n";

/// Sent to the client when a CONNECT tunnel is established
pub const RESPONSE_200: &[u8] = b"HTTP/1.1 200 Connection established\r\n\r\n";

/// Timeouts governing one session
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Deadline for the first read from the client
    pub head_read_timeout: Duration,
    /// Per-attempt outbound connect timeout
    pub connect_timeout: Duration,
    /// Per-read idle timeout while forwarding
    pub idle_timeout: Duration,
    /// Cap on the graceful close at teardown
    pub close_wait: Duration,
}

impl From<&TimeoutConfig> for SessionConfig {
    fn from(timeouts: &TimeoutConfig) -> Self {
        Self {
            head_read_timeout: timeouts.head_read(),
            connect_timeout: timeouts.connect(),
            idle_timeout: timeouts.idle(),
            close_wait: timeouts.close_wait(),
        }
    }
}

/// One client connection and its outbound counterpart
pub struct Session {
    client: TcpStream,
    client_addr: SocketAddr,
    engine: Arc<SelectionEngine>,
    events: Arc<EventLog>,
    config: SessionConfig,
}

impl Session {
    /// Create a session for an accepted client socket
    #[must_use]
    pub fn new(
        client: TcpStream,
        client_addr: SocketAddr,
        engine: Arc<SelectionEngine>,
        events: Arc<EventLog>,
        config: SessionConfig,
    ) -> Self {
        Self {
            client,
            client_addr,
            engine,
            events,
            config,
        }
    }

    /// Drive the session from accept to teardown
    ///
    /// Consumes the session; all errors are handled internally.
    pub async fn run(self) {
        let Self {
            mut client,
            client_addr,
            engine,
            events,
            config,
        } = self;

        let started = Instant::now();

        // Interface selection. Without one the client gets a 503 and
        // nothing else happens.
        let iface = match engine.select() {
            Ok(iface) => iface,
            Err(e) => {
                error!("Interface selection failed: {}", e);
                let _ = client.write_all(RESPONSE_503).await;
                let _ = client.flush().await;
                close_stream(client, config.close_wait).await;
                return;
            }
        };
        iface.connection_opened();

        events.emit(
            EventKind::Connection,
            Severity::Info,
            Some(iface.as_ref()),
            &format!("new client {client_addr}"),
        );

        // Head read and parse. Malformed or silent clients are closed
        // without a response.
        let head = match read_head(&mut client, config.head_read_timeout).await {
            Ok(head) => head,
            Err(e) => {
                error!("Session from {} ended before connect: {}", client_addr, e);
                iface.connection_closed();
                close_stream(client, config.close_wait).await;
                return;
            }
        };
        debug!("{} from {}", head, client_addr);

        // Outbound connect with failover across interfaces.
        let connected = connect_with_failover(
            &engine,
            Arc::clone(&iface),
            &head.host,
            head.port,
            config.connect_timeout,
        )
        .await;

        let (mut remote, used) = match connected {
            Ok(pair) => pair,
            Err(e) => {
                warn!("Session {} -> {} failed: {}", client_addr, head, e);
                let _ = client.write_all(RESPONSE_502).await;
                let _ = client.flush().await;
                iface.connection_closed();
                close_stream(client, config.close_wait).await;
                return;
            }
        };

        // Failover may have moved the session to another interface; keep
        // the active-connection accounting on the one actually carrying it.
        let iface = if Arc::ptr_eq(&iface, &used) {
            iface
        } else {
            iface.connection_closed();
            used.connection_opened();
            used
        };

        // Establish: CONNECT gets the 200 line, plain HTTP replays the
        // original head to the origin byte-for-byte.
        let primed = if head.is_connect() {
            match client.write_all(RESPONSE_200).await {
                Ok(()) => client.flush().await,
                Err(e) => Err(e),
            }
        } else {
            match remote.write_all(head.raw()).await {
                Ok(()) => remote.flush().await,
                Err(e) => Err(e),
            }
        };

        let bytes = if let Err(e) = primed {
            // The remote was established, so the session still counts; there
            // is just nothing to pump.
            error!("Error establishing tunnel for {}: {}", head, e);
            close_stream(client, config.close_wait).await;
            close_stream(remote, config.close_wait).await;
            0
        } else {
            tunnel(client, remote, &iface, &events, config).await
        };

        // TEARDOWN: statistics, success mark, report check, accounting.
        let elapsed = started.elapsed();
        iface.update_stats(bytes, elapsed);
        engine.maybe_report_stats();
        iface.mark_success();
        iface.connection_closed();

        info!(
            "Session {} -> {} finished: {} in {:.2}s via {}",
            client_addr,
            head,
            format_bytes(bytes),
            elapsed.as_secs_f64(),
            iface.name(),
        );
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("client_addr", &self.client_addr)
            .finish()
    }
}

/// Read and parse the request head within the deadline
async fn read_head(
    client: &mut TcpStream,
    deadline: Duration,
) -> Result<RequestHead, MwanProxyError> {
    let mut buf = vec![0u8; MAX_HEAD_SIZE];

    let n = match timeout(deadline, client.read(&mut buf)).await {
        Ok(Ok(0)) => {
            return Err(SessionError::client_closed("EOF before request").into());
        }
        Ok(Ok(n)) => n,
        Ok(Err(e)) => return Err(SessionError::from(e).into()),
        Err(_) => return Err(SessionError::HeadReadTimeout.into()),
    };

    Ok(RequestHead::parse(&buf[..n])?)
}

/// Run both forwarding pumps until the first finishes, cancel the sibling,
/// then close both streams gracefully. Returns the session's byte total.
async fn tunnel(
    client: TcpStream,
    remote: TcpStream,
    iface: &Arc<IfaceRecord>,
    events: &Arc<EventLog>,
    config: SessionConfig,
) -> u64 {
    let transferred = Arc::new(AtomicU64::new(0));

    let (client_rd, client_wr) = client.into_split();
    let (remote_rd, remote_wr) = remote.into_split();

    let (c2u_cancel, c2u_cancelled) = oneshot::channel();
    let (u2c_cancel, u2c_cancelled) = oneshot::channel();

    let mut c2u = tokio::spawn(pump(
        client_rd,
        remote_wr,
        Direction::ClientToUpstream,
        config.idle_timeout,
        Arc::clone(&transferred),
        Arc::clone(events),
        Arc::clone(iface),
        c2u_cancelled,
    ));
    let mut u2c = tokio::spawn(pump(
        remote_rd,
        client_wr,
        Direction::UpstreamToClient,
        config.idle_timeout,
        Arc::clone(&transferred),
        Arc::clone(events),
        Arc::clone(iface),
        u2c_cancelled,
    ));

    // First pump to finish cancels the sibling; the sibling's completion is
    // awaited before teardown proceeds.
    let (c2u_out, u2c_out) = tokio::select! {
        out = &mut c2u => {
            let _ = u2c_cancel.send(());
            (out, u2c.await)
        }
        out = &mut u2c => {
            let _ = c2u_cancel.send(());
            (c2u.await, out)
        }
    };

    // Reunite the halves the pumps handed back and close both sockets with
    // the close-wait cap; anything that fails here is abandoned.
    if let (Ok(c2u_out), Ok(u2c_out)) = (c2u_out, u2c_out) {
        if let Ok(client) = c2u_out.reader.reunite(u2c_out.writer) {
            close_stream(client, config.close_wait).await;
        }
        if let Ok(remote) = u2c_out.reader.reunite(c2u_out.writer) {
            close_stream(remote, config.close_wait).await;
        }
    }

    transferred.load(Ordering::Relaxed)
}

/// Best-effort graceful close, capped by the close-wait budget
async fn close_stream(mut stream: TcpStream, close_wait: Duration) {
    if let Ok(Err(e)) = timeout(close_wait, stream.shutdown()).await {
        debug!("Error closing stream: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::EngineConfig;
    use std::net::Ipv4Addr;

    fn engine_with(ips: &[[u8; 4]]) -> Arc<SelectionEngine> {
        let records = ips
            .iter()
            .map(|ip| Arc::new(IfaceRecord::new("test", Ipv4Addr::from(*ip))))
            .collect();
        Arc::new(SelectionEngine::new(records, EngineConfig::default()))
    }

    fn session_config() -> SessionConfig {
        SessionConfig {
            head_read_timeout: Duration::from_millis(200),
            connect_timeout: Duration::from_millis(500),
            idle_timeout: Duration::from_secs(5),
            close_wait: Duration::from_secs(1),
        }
    }

    async fn run_session(
        engine: Arc<SelectionEngine>,
        config: SessionConfig,
    ) -> (tokio::net::TcpStream, tokio::task::JoinHandle<()>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::net::TcpStream::connect(addr).await.unwrap();
        let (accepted, peer) = listener.accept().await.unwrap();

        let session = Session::new(
            accepted,
            peer,
            engine,
            Arc::new(EventLog::noop()),
            config,
        );
        (client, tokio::spawn(session.run()))
    }

    #[tokio::test]
    async fn test_503_when_only_link_local() {
        let engine = engine_with(&[[169, 254, 1, 2]]);
        let (mut client, handle) = run_session(engine, session_config()).await;

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        assert_eq!(response, RESPONSE_503);

        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_silent_close_on_head_timeout() {
        let engine = engine_with(&[[127, 0, 0, 1], [127, 0, 0, 1]]);
        let (mut client, handle) = run_session(engine.clone(), session_config()).await;

        // Send nothing; the session must close without any response bytes.
        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        assert!(response.is_empty());

        handle.await.unwrap();
        // The head-read path never marks the interface failed.
        assert_eq!(engine.interfaces()[0].failed_requests(), 0);
    }

    #[tokio::test]
    async fn test_silent_close_on_parse_error() {
        let engine = engine_with(&[[127, 0, 0, 1], [127, 0, 0, 1]]);
        let (mut client, handle) = run_session(engine, session_config()).await;

        client.write_all(b"garbage\r\n\r\n").await.unwrap();

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        assert!(response.is_empty());

        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_502_when_origin_unreachable() {
        // Grab a port that nothing is listening on.
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let dead_port = probe.local_addr().unwrap().port();
        drop(probe);

        let engine = engine_with(&[[127, 0, 0, 1], [127, 0, 0, 1]]);
        let (mut client, handle) = run_session(engine.clone(), session_config()).await;

        client
            .write_all(format!("CONNECT 127.0.0.1:{dead_port} HTTP/1.1\r\n\r\n").as_bytes())
            .await
            .unwrap();

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        assert_eq!(response, RESPONSE_502);

        handle.await.unwrap();
        // Both rotation slots point at the same IP, so both failed attempts
        // land on the same consecutive-failure counter.
        assert_eq!(engine.consecutive_failures(Ipv4Addr::LOCALHOST), 2);
    }

    #[tokio::test]
    async fn test_connect_tunnel_round_trip() {
        let origin = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let origin_port = origin.local_addr().unwrap().port();

        // Echo server
        tokio::spawn(async move {
            let (mut socket, _) = origin.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                socket.write_all(&buf[..n]).await.unwrap();
            }
        });

        let engine = engine_with(&[[127, 0, 0, 1], [127, 0, 0, 1]]);
        let (mut client, handle) = run_session(engine.clone(), session_config()).await;

        client
            .write_all(format!("CONNECT 127.0.0.1:{origin_port} HTTP/1.1\r\n\r\n").as_bytes())
            .await
            .unwrap();

        let mut status = vec![0u8; RESPONSE_200.len()];
        client.read_exact(&mut status).await.unwrap();
        assert_eq!(status, RESPONSE_200);

        client.write_all(b"tunneled payload").await.unwrap();
        let mut echoed = vec![0u8; 16];
        client.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, b"tunneled payload");

        drop(client);
        handle.await.unwrap();

        let iface = Arc::clone(&engine.interfaces()[0]);
        assert_eq!(iface.successful_requests(), 1);
        assert!(iface.bytes_sent() >= 32);
        assert_eq!(iface.active_connections(), 0);
    }
}
