//! Round-robin interface selection with failure quarantine
//!
//! The engine owns the health bookkeeping shared by all sessions: the
//! round-robin cursor, the per-IP consecutive-failure counts, and the
//! quarantine map. Selection never blocks on I/O; quarantine entries are
//! evicted lazily when a selection looks at them.
//!
//! # Liveness over strict health
//!
//! If every selectable interface sits in quarantine, the engine clears all
//! health state and hands out the first candidate anyway. A proxy that
//! refuses every connection because both uplinks misbehaved five seconds
//! ago is worse than one that retries them.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error::SelectError;
use crate::events::format_bytes;
use crate::iface::{IfaceRecord, IfaceSnapshot, IfaceStatus};

/// Consecutive failures before an interface is quarantined
pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// How long a quarantined interface stays unselectable
pub const FAILURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Minimum interval between statistics reports
pub const STATS_INTERVAL: Duration = Duration::from_secs(30);

/// Tunable thresholds for the selection engine
///
/// Defaults match the production constants; tests inject shorter windows.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Consecutive failures before quarantine
    pub max_consecutive_failures: u32,
    /// Quarantine duration
    pub failure_timeout: Duration,
    /// Statistics report interval
    pub stats_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: MAX_CONSECUTIVE_FAILURES,
            failure_timeout: FAILURE_TIMEOUT,
            stats_interval: STATS_INTERVAL,
        }
    }
}

/// Health bookkeeping shared across sessions, guarded by one mutex
#[derive(Debug)]
struct HealthState {
    /// IP -> instant it entered quarantine
    quarantine: HashMap<Ipv4Addr, Instant>,
    /// IP -> consecutive failures since the last success or quarantine
    consecutive_failures: HashMap<Ipv4Addr, u32>,
    /// When the last statistics report was emitted
    last_stats_report: Instant,
}

/// Round-robin interface selector with quarantine and fast failover
pub struct SelectionEngine {
    interfaces: Vec<Arc<IfaceRecord>>,
    cursor: AtomicUsize,
    config: EngineConfig,
    health: Mutex<HealthState>,
}

impl SelectionEngine {
    /// Create an engine over the configured interfaces
    ///
    /// The list keeps its configured order; a single-interface setup is
    /// expected to arrive already duplicated so the rotation alternates.
    #[must_use]
    pub fn new(interfaces: Vec<Arc<IfaceRecord>>, config: EngineConfig) -> Self {
        Self {
            interfaces,
            cursor: AtomicUsize::new(0),
            config,
            health: Mutex::new(HealthState {
                quarantine: HashMap::new(),
                consecutive_failures: HashMap::new(),
                last_stats_report: Instant::now(),
            }),
        }
    }

    /// Configured interfaces, in rotation order
    #[must_use]
    pub fn interfaces(&self) -> &[Arc<IfaceRecord>] {
        &self.interfaces
    }

    /// Number of configured interfaces (duplicates included)
    #[must_use]
    pub fn interface_count(&self) -> usize {
        self.interfaces.len()
    }

    /// Engine thresholds
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Pick the next usable interface
    ///
    /// Link-local addresses are filtered out first; the rotation then walks
    /// at most one full round past quarantined entries, advancing the cursor
    /// once per attempt. If everything is quarantined, all health state is
    /// cleared and the first candidate is returned.
    ///
    /// # Errors
    ///
    /// `SelectError::NoInterfaces` when the engine has no interfaces at all,
    /// `SelectError::NoValidInterfaces` when every interface is link-local.
    pub fn select(&self) -> Result<Arc<IfaceRecord>, SelectError> {
        if self.interfaces.is_empty() {
            return Err(SelectError::NoInterfaces);
        }

        let candidates: Vec<&Arc<IfaceRecord>> = self
            .interfaces
            .iter()
            .filter(|iface| !iface.ip().is_link_local())
            .collect();

        if candidates.is_empty() {
            return Err(SelectError::NoValidInterfaces);
        }

        let mut health = self.health.lock();

        for _ in 0..candidates.len() {
            let index = self.cursor.fetch_add(1, Ordering::Relaxed) % candidates.len();
            let iface = candidates[index];

            if !Self::in_quarantine(&mut health, iface.ip(), self.config.failure_timeout) {
                return Ok(Arc::clone(iface));
            }
        }

        // Every candidate is quarantined: reset all health state and hand
        // out the first one.
        warn!(
            "All {} interfaces quarantined; resetting health state",
            candidates.len()
        );
        health.quarantine.clear();
        health.consecutive_failures.clear();

        Ok(Arc::clone(candidates[0]))
    }

    /// Check the quarantine map, evicting the entry if it has expired
    fn in_quarantine(health: &mut HealthState, ip: Ipv4Addr, timeout: Duration) -> bool {
        let Some(entered) = health.quarantine.get(&ip).copied() else {
            return false;
        };

        if entered.elapsed() > timeout {
            health.quarantine.remove(&ip);
            false
        } else {
            true
        }
    }

    /// Record a failed connect attempt on `iface`
    ///
    /// Bumps the interface counters, then either degrades the interface or,
    /// at the consecutive-failure threshold, quarantines it and resets its
    /// failure count.
    pub fn mark_failed(&self, iface: &IfaceRecord, error: &str) {
        iface.mark_failed();

        let mut health = self.health.lock();
        let count = health
            .consecutive_failures
            .entry(iface.ip())
            .and_modify(|n| *n += 1)
            .or_insert(1);

        if *count >= self.config.max_consecutive_failures {
            let failures = *count;
            health.quarantine.insert(iface.ip(), Instant::now());
            health.consecutive_failures.insert(iface.ip(), 0);
            iface.set_status(IfaceStatus::Failed);
            drop(health);

            warn!(
                "Interface {} ({}) marked as FAILED: \
                 consecutive failures: {}, last error: {}, \
                 success rate: {:.1}%, average response time: {:.2}s; \
                 switching to backup interface",
                iface.name(),
                iface.ip(),
                failures,
                error,
                iface.success_rate(),
                iface.avg_response_time(),
            );
        } else {
            let failures = *count;
            let threshold = self.config.max_consecutive_failures;
            iface.set_status(IfaceStatus::Degraded);
            drop(health);

            info!(
                "Interface {} degraded: failure count {}/{}, error: {}",
                iface.name(),
                failures,
                threshold,
                error,
            );
        }
    }

    /// Whether `ip` is currently quarantined (without evicting)
    #[must_use]
    pub fn is_quarantined(&self, ip: Ipv4Addr) -> bool {
        let health = self.health.lock();
        match health.quarantine.get(&ip) {
            Some(entered) => entered.elapsed() <= self.config.failure_timeout,
            None => false,
        }
    }

    /// Current consecutive-failure count for `ip`
    #[must_use]
    pub fn consecutive_failures(&self, ip: Ipv4Addr) -> u32 {
        self.health
            .lock()
            .consecutive_failures
            .get(&ip)
            .copied()
            .unwrap_or(0)
    }

    /// Number of quarantined interfaces (stale entries included)
    #[must_use]
    pub fn quarantine_len(&self) -> usize {
        self.health.lock().quarantine.len()
    }

    /// Snapshot every interface's statistics
    #[must_use]
    pub fn snapshots(&self) -> Vec<IfaceSnapshot> {
        self.interfaces.iter().map(|i| i.snapshot()).collect()
    }

    /// Emit the periodic statistics report if the interval has elapsed
    ///
    /// Called on session end; nothing fires while the proxy is idle.
    pub fn maybe_report_stats(&self) {
        {
            let mut health = self.health.lock();
            if health.last_stats_report.elapsed() < self.config.stats_interval {
                return;
            }
            health.last_stats_report = Instant::now();
        }

        info!("=== Interface Statistics Report ===");
        for snapshot in self.snapshots() {
            let marker = match snapshot.status {
                IfaceStatus::Active => "+",
                IfaceStatus::Degraded => "!",
                IfaceStatus::Failed => "x",
            };
            info!(
                "[{}] {} ({}): status: {}, active connections: {}, \
                 total requests: {}, successful: {}, failed: {}, \
                 success rate: {:.1}%, average response time: {:.2}s, \
                 data transferred: {}",
                marker,
                snapshot.name,
                snapshot.ip,
                snapshot.status,
                snapshot.active_connections,
                snapshot.total_requests,
                snapshot.successful_requests,
                snapshot.failed_requests,
                snapshot.success_rate,
                snapshot.avg_response_time_secs,
                format_bytes(snapshot.bytes_sent),
            );
        }
        info!("==============================");
    }
}

impl std::fmt::Debug for SelectionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectionEngine")
            .field("interfaces", &self.interfaces.len())
            .field("quarantined", &self.quarantine_len())
            .finish()
    }
}
