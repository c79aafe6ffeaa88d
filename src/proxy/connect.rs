//! Outbound connection establishment
//!
//! Connects to the origin with the socket bound to a chosen interface's
//! local address, so the kernel routes the flow out of that interface.
//! A failed attempt feeds the selection engine and the next interface is
//! tried, up to one attempt per configured interface.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, TcpKeepalive, Type};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::balancer::SelectionEngine;
use crate::error::OutboundError;
use crate::iface::IfaceRecord;

/// Resolve `host:port` to the first IPv4 address
async fn resolve_v4(host: &str, port: u16) -> Result<SocketAddr, OutboundError> {
    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| OutboundError::resolve(host, e.to_string()))?;

    addrs
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| OutboundError::resolve(host, "no IPv4 address"))
}

/// Create the outbound socket bound to the interface's source address
fn create_bound_socket(local_ip: Ipv4Addr) -> Result<Socket, OutboundError> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| OutboundError::socket_option("create", e.to_string()))?;

    // Binding to (iface.ip, 0) is the load-balancing mechanism: the kernel
    // routes the connection out of the interface owning that address.
    let local = SocketAddr::V4(SocketAddrV4::new(local_ip, 0));
    socket.bind(&local.into()).map_err(|e| {
        OutboundError::socket_option("bind", format!("Failed to bind to {local_ip}: {e}"))
    })?;

    socket
        .set_nonblocking(true)
        .map_err(|e| OutboundError::socket_option("O_NONBLOCK", e.to_string()))?;

    // Keepalive catches dead peers on long-lived tunnels.
    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(60))
        .with_interval(Duration::from_secs(15));
    socket
        .set_tcp_keepalive(&keepalive)
        .map_err(|e| OutboundError::socket_option("TCP_KEEPALIVE", e.to_string()))?;

    Ok(socket)
}

/// Connect to `host:port` with the local socket bound to `local_ip`
///
/// The attempt is capped by `connect_timeout`; the timeout is tuned for
/// fast failover, not reachability guarantees.
///
/// # Errors
///
/// Returns `OutboundError` on resolution failure, socket setup failure,
/// connection failure, or timeout.
pub async fn connect_via(
    local_ip: Ipv4Addr,
    host: &str,
    port: u16,
    connect_timeout: Duration,
) -> Result<TcpStream, OutboundError> {
    let addr = resolve_v4(host, port).await?;
    let socket = create_bound_socket(local_ip)?;

    // Initiate the non-blocking connect; EINPROGRESS is the expected result.
    match socket.connect(&addr.into()) {
        Ok(()) => {}
        Err(ref e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {}
        Err(e) => {
            return Err(OutboundError::connection_failed(host, port, e.to_string()));
        }
    }

    let std_stream: std::net::TcpStream = socket.into();
    let stream = TcpStream::from_std(std_stream)
        .map_err(|e| OutboundError::connection_failed(host, port, e.to_string()))?;

    // Wait for the connect to finish, then surface any SO_ERROR.
    let connect_result = timeout(connect_timeout, async {
        stream
            .writable()
            .await
            .map_err(|e| OutboundError::connection_failed(host, port, e.to_string()))?;

        match stream.take_error() {
            Ok(Some(e)) => Err(OutboundError::connection_failed(host, port, e.to_string())),
            Ok(None) => Ok(()),
            Err(e) => Err(OutboundError::connection_failed(host, port, e.to_string())),
        }
    })
    .await;

    match connect_result {
        Ok(Ok(())) => {
            if let Err(e) = stream.set_nodelay(true) {
                warn!("Failed to set TCP_NODELAY: {}", e);
            }
            debug!("Connected to {}:{} from {}", host, port, local_ip);
            Ok(stream)
        }
        Ok(Err(e)) => Err(e),
        Err(_) => Err(OutboundError::Timeout {
            host: host.to_string(),
            port,
            timeout_secs: connect_timeout.as_secs(),
        }),
    }
}

/// Connect with fast failover across the engine's interfaces
///
/// Starts on `iface`; each failed attempt is reported to the engine (which
/// may degrade or quarantine the interface) and the next selection is
/// tried. Gives up after one attempt per configured interface.
///
/// Returns the connected stream together with the interface that carried it.
///
/// # Errors
///
/// Returns `OutboundError::AllInterfacesFailed` when every attempt failed.
pub async fn connect_with_failover(
    engine: &SelectionEngine,
    mut iface: Arc<IfaceRecord>,
    host: &str,
    port: u16,
    connect_timeout: Duration,
) -> Result<(TcpStream, Arc<IfaceRecord>), OutboundError> {
    let attempts = engine.interface_count();

    for attempt in 0..attempts {
        match connect_via(iface.ip(), host, port, connect_timeout).await {
            Ok(stream) => return Ok((stream, iface)),
            Err(e) => {
                warn!(
                    "Connect attempt {}/{} to {}:{} via {} failed: {}",
                    attempt + 1,
                    attempts,
                    host,
                    port,
                    iface,
                    e
                );
                engine.mark_failed(&iface, &e.to_string());

                match engine.select() {
                    Ok(next) => iface = next,
                    Err(e) => {
                        warn!("Reselection after failed connect impossible: {}", e);
                        break;
                    }
                }
            }
        }
    }

    Err(OutboundError::AllInterfacesFailed {
        host: host.to_string(),
        port,
        attempts,
    })
}
