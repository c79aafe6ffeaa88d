//! One-direction forwarding pump
//!
//! Each tunnel runs two pumps, one per direction. A pump copies bytes until
//! EOF, an idle timeout, a peer reset, an error, or a cancellation signal
//! from its sibling finishing first. Timeouts and resets are session-health
//! events, not interface failures, so they are reported to the event log
//! and never reach the selection engine.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, error};

use crate::events::{format_bytes, EventKind, EventLog, Severity};
use crate::iface::IfaceRecord;

/// Read buffer size for forwarding
pub const FORWARD_BUFFER_SIZE: usize = 32 * 1024;

/// Which way a pump is moving bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Bytes read from the client, written to the origin
    ClientToUpstream,
    /// Bytes read from the origin, written to the client
    UpstreamToClient,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ClientToUpstream => write!(f, "client -> upstream"),
            Self::UpstreamToClient => write!(f, "upstream -> client"),
        }
    }
}

/// What a finished pump hands back to the session
///
/// The reader and writer come back so the session can reunite the stream
/// halves and close them gracefully.
#[derive(Debug)]
pub struct PumpOutcome<R, W> {
    /// Bytes moved by this pump
    pub bytes: u64,
    /// The read half, returned for teardown
    pub reader: R,
    /// The write half, returned for teardown
    pub writer: W,
}

/// Copy bytes from `reader` to `writer` until the stream ends
///
/// Every chunk is also added to `transferred`, the session-wide
/// accumulator, so the running total survives even if the sibling pump
/// finishes first and this one is cancelled mid-stream. Accounting is
/// additive-only; short writes are never re-subtracted.
///
/// Cancellation arrives on `cancel`; the pump stops before its next read
/// or write and returns what it has.
pub async fn pump<R, W>(
    mut reader: R,
    mut writer: W,
    direction: Direction,
    idle_timeout: Duration,
    transferred: Arc<AtomicU64>,
    events: Arc<EventLog>,
    iface: Arc<IfaceRecord>,
    mut cancel: oneshot::Receiver<()>,
) -> PumpOutcome<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; FORWARD_BUFFER_SIZE];
    let mut bytes: u64 = 0;

    loop {
        let read = tokio::select! {
            biased;

            _ = &mut cancel => {
                debug!("Forward {} cancelled after {}", direction, format_bytes(bytes));
                break;
            }

            read = timeout(idle_timeout, reader.read(&mut buf)) => read,
        };

        let n = match read {
            Err(_) => {
                events.emit(
                    EventKind::Timeout,
                    Severity::Warning,
                    Some(iface.as_ref()),
                    &format!("{} after {}", direction, format_bytes(bytes)),
                );
                break;
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                events.emit(
                    EventKind::Reset,
                    Severity::Warning,
                    Some(iface.as_ref()),
                    &format!("{} after {}", direction, format_bytes(bytes)),
                );
                break;
            }
            Ok(Err(e)) => {
                error!(
                    "Error forwarding {}: {} (interface: {}, transferred: {})",
                    direction,
                    e,
                    iface.name(),
                    format_bytes(bytes)
                );
                break;
            }
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => n,
        };

        bytes += n as u64;
        transferred.fetch_add(n as u64, Ordering::Relaxed);

        let write = tokio::select! {
            biased;

            _ = &mut cancel => {
                debug!("Forward {} cancelled after {}", direction, format_bytes(bytes));
                break;
            }

            write = async {
                writer.write_all(&buf[..n]).await?;
                writer.flush().await
            } => write,
        };

        match write {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                events.emit(
                    EventKind::Reset,
                    Severity::Warning,
                    Some(iface.as_ref()),
                    &format!("{} after {}", direction, format_bytes(bytes)),
                );
                break;
            }
            Err(e) => {
                error!(
                    "Error forwarding {}: {} (interface: {}, transferred: {})",
                    direction,
                    e,
                    iface.name(),
                    format_bytes(bytes)
                );
                break;
            }
        }
    }

    PumpOutcome {
        bytes,
        reader,
        writer,
    }
}
