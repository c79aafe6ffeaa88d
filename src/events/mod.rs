//! Structured proxy events
//!
//! Sessions and forwarding pumps report what happened to them through an
//! `EventLog`: one line per event, emitted both through `tracing` and,
//! when a log file is configured, appended to disk by a background writer.
//!
//! Event lines have a fixed shape so they stay grep-able:
//!
//! ```text
//! 2026-08-02 14:03:11.482 | INFO | CONNECTION | [eth0:10.0.0.2] | new client 127.0.0.1:51224
//! 2026-08-02 14:03:42.007 | WARNING | TIMEOUT | [wlan0:192.168.1.7] | upstream -> client after 1.2 MB
//! ```

mod writer;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Local;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::iface::IfaceRecord;

/// Kind of event being reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A client connection was accepted and assigned an interface
    Connection,
    /// A forwarding direction went idle past its deadline
    Timeout,
    /// A peer reset the connection mid-transfer
    Reset,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connection => write!(f, "CONNECTION"),
            Self::Timeout => write!(f, "TIMEOUT"),
            Self::Reset => write!(f, "RESET"),
        }
    }
}

/// Severity attached to an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Routine event
    Info,
    /// Degraded but expected condition (timeouts, resets)
    Warning,
    /// Unexpected failure
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARNING"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

/// Sink for structured proxy events
///
/// Cheap to share (`Arc<EventLog>`); submission is lock-light and never
/// blocks a session. Events that cannot be queued for the file writer are
/// counted, not retried.
pub struct EventLog {
    tx: Mutex<Option<mpsc::Sender<String>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
    path: Option<PathBuf>,
    dropped: AtomicU64,
}

impl EventLog {
    /// Create an event log that only forwards to `tracing`
    #[must_use]
    pub fn noop() -> Self {
        Self {
            tx: Mutex::new(None),
            writer: Mutex::new(None),
            path: None,
            dropped: AtomicU64::new(0),
        }
    }

    /// Create an event log backed by a timestamped file under `dir`
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the directory or file cannot
    /// be created.
    pub async fn with_file(dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let (path, tx, handle) = writer::spawn_writer(dir.as_ref()).await?;
        Ok(Self {
            tx: Mutex::new(Some(tx)),
            writer: Mutex::new(Some(handle)),
            path: Some(path),
            dropped: AtomicU64::new(0),
        })
    }

    /// Path of the on-disk log file, if one is open
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Number of events dropped because the writer queue was full
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Report an event
    ///
    /// `iface` tags the line with `[name:ip]`; sessions that failed before
    /// an interface was assigned pass `None` and get `[no-interface]`.
    pub fn emit(
        &self,
        kind: EventKind,
        severity: Severity,
        iface: Option<&IfaceRecord>,
        details: &str,
    ) {
        let tag = match iface {
            Some(iface) => format!("[{}:{}]", iface.name(), iface.ip()),
            None => "[no-interface]".to_string(),
        };

        match severity {
            Severity::Info => info!("{} | {} | {}", kind, tag, details),
            Severity::Warning => warn!("{} | {} | {}", kind, tag, details),
            Severity::Error => error!("{} | {} | {}", kind, tag, details),
        }

        let sender = self.tx.lock().clone();
        if let Some(sender) = sender {
            let line = format!(
                "{} | {} | {} | {} | {}",
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                severity,
                kind,
                tag,
                details
            );
            if sender.try_send(line).is_err() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Flush pending lines and stop the file writer
    pub async fn shutdown(&self) {
        // Dropping the sender ends the writer's recv loop.
        drop(self.tx.lock().take());

        let handle = self.writer.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog")
            .field("path", &self.path)
            .field("dropped", &self.dropped())
            .finish()
    }
}

/// Format a byte count for humans: B/KB/MB/GB with one decimal, TB above
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];

    let mut value = bytes as f64;
    for unit in UNITS {
        if value < 1024.0 {
            return format!("{value:.1} {unit}");
        }
        value /= 1024.0;
    }
    format!("{value:.1} TB")
}
