//! Configuration types for mwan-proxy
//!
//! Configuration is loaded from JSON files and validated at startup.
//! Timeouts and balancer thresholds default to the production constants.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::balancer::EngineConfig;
use crate::error::ConfigError;

/// Lowest listen port accepted (ports below are privileged)
pub const MIN_LISTEN_PORT: u16 = 1024;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Listen configuration
    #[serde(default)]
    pub listen: ListenConfig,

    /// Interfaces to balance across (at most two; empty means the
    /// interactive setup fills the list at startup)
    #[serde(default)]
    pub interfaces: Vec<InterfaceConfig>,

    /// Balancer thresholds
    #[serde(default)]
    pub balancer: BalancerConfig,

    /// Session timeouts
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen.validate()?;
        self.balancer.validate()?;
        self.timeouts.validate()?;

        if self.interfaces.len() > 2 {
            return Err(ConfigError::validation(format!(
                "At most 2 interfaces may be configured, got {}",
                self.interfaces.len()
            )));
        }
        for iface in &self.interfaces {
            iface.validate()?;
        }

        Ok(())
    }

    /// Create a minimal default configuration
    #[must_use]
    pub fn default_config() -> Self {
        Self {
            listen: ListenConfig::default(),
            interfaces: Vec::new(),
            balancer: BalancerConfig::default(),
            timeouts: TimeoutConfig::default(),
            log: LogConfig::default(),
        }
    }

    /// Interfaces to feed the selection engine
    ///
    /// A single configured interface is duplicated so the round-robin
    /// rotation still alternates.
    #[must_use]
    pub fn selected_interfaces(&self) -> Vec<InterfaceConfig> {
        match self.interfaces.as_slice() {
            [only] => vec![only.clone(), only.clone()],
            other => other.to_vec(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

/// Listen configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenConfig {
    /// Listen address (e.g., "127.0.0.1:8080")
    pub address: SocketAddr,
}

impl ListenConfig {
    /// Validate listen configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.address.port() < MIN_LISTEN_PORT {
            return Err(ConfigError::validation(format!(
                "Listen port must be between {} and 65535, got {}",
                MIN_LISTEN_PORT,
                self.address.port()
            )));
        }
        Ok(())
    }
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8080".parse().unwrap(),
        }
    }
}

/// One interface the proxy may originate connections from
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct InterfaceConfig {
    /// OS interface label
    pub name: String,
    /// IPv4 address to bind outbound sockets to
    pub ip: Ipv4Addr,
}

impl InterfaceConfig {
    /// Create an interface entry
    pub fn new(name: impl Into<String>, ip: Ipv4Addr) -> Self {
        Self {
            name: name.into(),
            ip,
        }
    }

    /// Validate the interface entry
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::validation("Interface name cannot be empty"));
        }
        Ok(())
    }
}

/// Balancer thresholds
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BalancerConfig {
    /// Consecutive failures before quarantine
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    /// Quarantine duration in seconds
    #[serde(default = "default_failure_timeout_secs")]
    pub failure_timeout_secs: u64,

    /// Statistics report interval in seconds
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
}

impl BalancerConfig {
    /// Validate balancer configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_consecutive_failures == 0 {
            return Err(ConfigError::validation(
                "max_consecutive_failures must be greater than 0",
            ));
        }
        if self.failure_timeout_secs == 0 {
            return Err(ConfigError::validation(
                "failure_timeout_secs must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Convert to the engine's threshold set
    #[must_use]
    pub const fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_consecutive_failures: self.max_consecutive_failures,
            failure_timeout: Duration::from_secs(self.failure_timeout_secs),
            stats_interval: Duration::from_secs(self.stats_interval_secs),
        }
    }
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: default_max_consecutive_failures(),
            failure_timeout_secs: default_failure_timeout_secs(),
            stats_interval_secs: default_stats_interval_secs(),
        }
    }
}

/// Session timeouts
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimeoutConfig {
    /// Deadline for reading the request head, in seconds
    #[serde(default = "default_head_read_secs")]
    pub head_read_secs: u64,

    /// Per-attempt outbound connect timeout, in seconds
    #[serde(default = "default_connect_secs")]
    pub connect_secs: u64,

    /// Per-read idle timeout while forwarding, in seconds
    #[serde(default = "default_idle_secs")]
    pub idle_secs: u64,

    /// Cap on the graceful close wait at teardown, in seconds
    #[serde(default = "default_close_wait_secs")]
    pub close_wait_secs: u64,
}

impl TimeoutConfig {
    /// Validate timeout configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.head_read_secs == 0 {
            return Err(ConfigError::validation(
                "head_read_secs must be greater than 0",
            ));
        }
        if self.connect_secs == 0 {
            return Err(ConfigError::validation(
                "connect_secs must be greater than 0",
            ));
        }
        if self.idle_secs == 0 {
            return Err(ConfigError::validation("idle_secs must be greater than 0"));
        }
        Ok(())
    }

    /// Head read deadline as a Duration
    #[must_use]
    pub const fn head_read(&self) -> Duration {
        Duration::from_secs(self.head_read_secs)
    }

    /// Connect timeout as a Duration
    #[must_use]
    pub const fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    /// Forward idle timeout as a Duration
    #[must_use]
    pub const fn idle(&self) -> Duration {
        Duration::from_secs(self.idle_secs)
    }

    /// Close wait cap as a Duration
    #[must_use]
    pub const fn close_wait(&self) -> Duration {
        Duration::from_secs(self.close_wait_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            head_read_secs: default_head_read_secs(),
            connect_secs: default_connect_secs(),
            idle_secs: default_idle_secs(),
            close_wait_secs: default_close_wait_secs(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "text" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for the event log file
    #[serde(default = "default_log_directory")]
    pub directory: PathBuf,

    /// Whether to write the event log file at all
    #[serde(default = "default_true")]
    pub file_enabled: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            directory: default_log_directory(),
            file_enabled: true,
        }
    }
}

const fn default_max_consecutive_failures() -> u32 {
    3
}

const fn default_failure_timeout_secs() -> u64 {
    5
}

const fn default_stats_interval_secs() -> u64 {
    30
}

const fn default_head_read_secs() -> u64 {
    5
}

const fn default_connect_secs() -> u64 {
    2
}

const fn default_idle_secs() -> u64 {
    10
}

const fn default_close_wait_secs() -> u64 {
    1
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}

fn default_log_directory() -> PathBuf {
    PathBuf::from("proxy_logs")
}

const fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default_config();
        config.validate().unwrap();
        assert_eq!(config.listen.address.port(), 8080);
        assert_eq!(config.balancer.max_consecutive_failures, 3);
        assert_eq!(config.timeouts.connect_secs, 2);
    }

    #[test]
    fn test_listen_port_range() {
        let mut config = Config::default_config();
        config.listen.address = "127.0.0.1:80".parse().unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));

        config.listen.address = "127.0.0.1:1024".parse().unwrap();
        config.validate().unwrap();
    }

    #[test]
    fn test_single_interface_duplicated() {
        let mut config = Config::default_config();
        config
            .interfaces
            .push(InterfaceConfig::new("eth0", Ipv4Addr::new(10, 0, 0, 2)));

        let selected = config.selected_interfaces();
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0], selected[1]);
    }

    #[test]
    fn test_two_interfaces_kept_in_order() {
        let mut config = Config::default_config();
        config
            .interfaces
            .push(InterfaceConfig::new("eth0", Ipv4Addr::new(10, 0, 0, 2)));
        config
            .interfaces
            .push(InterfaceConfig::new("wlan0", Ipv4Addr::new(10, 0, 0, 3)));

        let selected = config.selected_interfaces();
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].name, "eth0");
        assert_eq!(selected[1].name, "wlan0");
    }

    #[test]
    fn test_too_many_interfaces_rejected() {
        let mut config = Config::default_config();
        for i in 0..3 {
            config
                .interfaces
                .push(InterfaceConfig::new("eth0", Ipv4Addr::new(10, 0, 0, i + 1)));
        }
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_interface_name_rejected() {
        let iface = InterfaceConfig::new("", Ipv4Addr::new(10, 0, 0, 2));
        assert!(iface.validate().is_err());
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        let mut config = Config::default_config();
        config.timeouts.connect_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_engine_config_conversion() {
        let balancer = BalancerConfig::default();
        let engine = balancer.engine_config();
        assert_eq!(engine.max_consecutive_failures, 3);
        assert_eq!(engine.failure_timeout, Duration::from_secs(5));
        assert_eq!(engine.stats_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_duration_accessors() {
        let timeouts = TimeoutConfig::default();
        assert_eq!(timeouts.head_read(), Duration::from_secs(5));
        assert_eq!(timeouts.connect(), Duration::from_secs(2));
        assert_eq!(timeouts.idle(), Duration::from_secs(10));
        assert_eq!(timeouts.close_wait(), Duration::from_secs(1));
    }
}
