//! Per-interface statistics and health status
//!
//! One `IfaceRecord` exists per usable local IPv4 source address. The record
//! is shared by every session routed through that interface, so all counters
//! are atomics and the response-time average sits behind a small mutex.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

// Status is stored as an atomic u8 so sessions can read it without locking.
const STATUS_ACTIVE: u8 = 0;
const STATUS_DEGRADED: u8 = 1;
const STATUS_FAILED: u8 = 2;

/// Health status of an interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IfaceStatus {
    /// Interface is healthy
    Active,
    /// Interface has recent failures below the quarantine threshold
    Degraded,
    /// Interface crossed the consecutive-failure threshold
    Failed,
}

impl std::fmt::Display for IfaceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "ACTIVE"),
            Self::Degraded => write!(f, "DEGRADED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

#[inline]
const fn status_to_u8(status: IfaceStatus) -> u8 {
    match status {
        IfaceStatus::Active => STATUS_ACTIVE,
        IfaceStatus::Degraded => STATUS_DEGRADED,
        IfaceStatus::Failed => STATUS_FAILED,
    }
}

#[inline]
const fn u8_to_status(value: u8) -> IfaceStatus {
    match value {
        STATUS_DEGRADED => IfaceStatus::Degraded,
        STATUS_FAILED => IfaceStatus::Failed,
        _ => IfaceStatus::Active,
    }
}

/// Response-time state guarded together so the moving average and the
/// failure instant update consistently.
#[derive(Debug, Default)]
struct Timing {
    /// Cumulative moving average of session durations, in seconds
    avg_response_time: f64,
    /// Instant of the most recent failure, if any
    last_failure: Option<Instant>,
}

/// One usable local IPv4 source address with its counters
///
/// Identity (`name`, `ip`) is immutable; everything else is mutated
/// concurrently by sessions and the selection engine.
#[derive(Debug)]
pub struct IfaceRecord {
    name: String,
    ip: Ipv4Addr,
    status: AtomicU8,
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    bytes_sent: AtomicU64,
    active_connections: AtomicU64,
    timing: Mutex<Timing>,
}

impl IfaceRecord {
    /// Create a new record for the given interface
    pub fn new(name: impl Into<String>, ip: Ipv4Addr) -> Self {
        Self {
            name: name.into(),
            ip,
            status: AtomicU8::new(STATUS_ACTIVE),
            total_requests: AtomicU64::new(0),
            successful_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            active_connections: AtomicU64::new(0),
            timing: Mutex::new(Timing::default()),
        }
    }

    /// OS interface label
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Local IPv4 source address
    #[must_use]
    pub const fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    /// Current health status
    #[must_use]
    pub fn status(&self) -> IfaceStatus {
        u8_to_status(self.status.load(Ordering::Relaxed))
    }

    /// Overwrite the health status (selection engine only)
    pub fn set_status(&self, status: IfaceStatus) {
        self.status.store(status_to_u8(status), Ordering::Relaxed);
    }

    /// Record a finished session: bytes transferred and total duration.
    ///
    /// Bumps `total_requests` and folds the duration into the cumulative
    /// moving average `mean += (elapsed - mean) / total`.
    pub fn update_stats(&self, bytes: u64, elapsed: Duration) {
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
        let total = self.total_requests.fetch_add(1, Ordering::Relaxed) + 1;

        let mut timing = self.timing.lock();
        let elapsed_secs = elapsed.as_secs_f64();
        timing.avg_response_time += (elapsed_secs - timing.avg_response_time) / total as f64;
    }

    /// Mark one request as successful
    pub fn mark_success(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.successful_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Mark one request as failed and stamp the failure instant
    pub fn mark_failed(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
        self.timing.lock().last_failure = Some(Instant::now());
    }

    /// Success rate as a percentage, 0.0 when nothing finished yet
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let successful = self.successful_requests.load(Ordering::Relaxed);
        let failed = self.failed_requests.load(Ordering::Relaxed);
        let finished = successful + failed;
        if finished == 0 {
            return 0.0;
        }
        (successful as f64 / finished as f64) * 100.0
    }

    /// A session started using this interface
    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// A session using this interface ended; never drops below zero
    pub fn connection_closed(&self) {
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            });
    }

    /// Currently active sessions
    #[must_use]
    pub fn active_connections(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Total requests observed (stats updates plus success/failure marks)
    #[must_use]
    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    /// Successfully completed requests
    #[must_use]
    pub fn successful_requests(&self) -> u64 {
        self.successful_requests.load(Ordering::Relaxed)
    }

    /// Failed requests
    #[must_use]
    pub fn failed_requests(&self) -> u64 {
        self.failed_requests.load(Ordering::Relaxed)
    }

    /// Total bytes sent through this interface
    #[must_use]
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Cumulative moving average of session durations, in seconds
    #[must_use]
    pub fn avg_response_time(&self) -> f64 {
        self.timing.lock().avg_response_time
    }

    /// Elapsed time since the most recent failure, if one happened
    #[must_use]
    pub fn time_since_last_failure(&self) -> Option<Duration> {
        self.timing.lock().last_failure.map(|at| at.elapsed())
    }

    /// Get a snapshot of all statistics
    #[must_use]
    pub fn snapshot(&self) -> IfaceSnapshot {
        IfaceSnapshot {
            name: self.name.clone(),
            ip: self.ip,
            status: self.status(),
            active_connections: self.active_connections(),
            total_requests: self.total_requests(),
            successful_requests: self.successful_requests(),
            failed_requests: self.failed_requests(),
            success_rate: self.success_rate(),
            avg_response_time_secs: self.avg_response_time(),
            bytes_sent: self.bytes_sent(),
        }
    }
}

impl std::fmt::Display for IfaceRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}, {})", self.name, self.ip, self.status())
    }
}

/// Snapshot of one interface's statistics at a point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IfaceSnapshot {
    /// Interface name
    pub name: String,
    /// Local IPv4 address
    pub ip: Ipv4Addr,
    /// Health status
    pub status: IfaceStatus,
    /// Active sessions
    pub active_connections: u64,
    /// Total requests
    pub total_requests: u64,
    /// Successful requests
    pub successful_requests: u64,
    /// Failed requests
    pub failed_requests: u64,
    /// Success rate percentage
    pub success_rate: f64,
    /// Average session duration in seconds
    pub avg_response_time_secs: f64,
    /// Bytes sent
    pub bytes_sent: u64,
}
