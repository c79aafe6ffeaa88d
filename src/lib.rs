//! mwan-proxy: multi-WAN HTTP/HTTPS forward proxy
//!
//! A local forward proxy that multiplexes outbound traffic across multiple
//! host network interfaces. Each outbound connection is bound to the local
//! address of a round-robin-selected interface; interfaces that keep
//! failing are quarantined for a cooldown and resurrected afterwards.
//!
//! # Features
//!
//! - **Round-robin load distribution**: outbound connections alternate
//!   across up to two configured interfaces
//! - **Fast failover**: 2 s connect timeout, immediate retry on the next
//!   interface, quarantine after repeated failures
//! - **CONNECT tunneling**: HTTPS passes through opaquely
//! - **Plain HTTP forwarding**: the original request head is replayed to
//!   the origin byte-for-byte
//! - **Structured events**: connection, timeout, and reset events go to
//!   `tracing` and an on-disk log file
//!
//! # Architecture
//!
//! ```text
//! Client -> ProxyListener -> Session -> SelectionEngine -> IfaceRecord
//!                               |
//!                               +-> connect (bound to iface ip) -> Origin
//!                               +-> forward pumps (both directions)
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use mwan_proxy::balancer::{EngineConfig, SelectionEngine};
//! use mwan_proxy::events::EventLog;
//! use mwan_proxy::iface::IfaceRecord;
//! use mwan_proxy::proxy::{run_accept_loop, ProxyListener, SessionConfig};
//! use mwan_proxy::config::Config;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default_config();
//!
//! let interfaces = config
//!     .selected_interfaces()
//!     .into_iter()
//!     .map(|i| Arc::new(IfaceRecord::new(i.name, i.ip)))
//!     .collect();
//! let engine = Arc::new(SelectionEngine::new(
//!     interfaces,
//!     config.balancer.engine_config(),
//! ));
//!
//! let listener = ProxyListener::bind(config.listen.address).await?;
//! let events = Arc::new(EventLog::noop());
//! run_accept_loop(listener, engine, events, SessionConfig::from(&config.timeouts)).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`balancer`]: Interface health tracking and round-robin selection
//! - [`cli`]: Interactive startup prompts
//! - [`config`]: Configuration types and loading
//! - [`error`]: Error types
//! - [`events`]: Structured event logging
//! - [`iface`]: Interface records and discovery
//! - [`proxy`]: Listener, sessions, head parsing, forwarding

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]

pub mod balancer;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod iface;
pub mod proxy;

// Re-export commonly used types at the crate root
pub use balancer::{EngineConfig, SelectionEngine};
pub use config::{
    load_config, load_config_str, load_config_with_env, BalancerConfig, Config, InterfaceConfig,
    ListenConfig, LogConfig, TimeoutConfig,
};
pub use error::{
    ConfigError, ListenerError, MwanProxyError, OutboundError, RequestError, SelectError,
    SessionError,
};
pub use events::{format_bytes, EventKind, EventLog, Severity};
pub use iface::{discover_interfaces, DiscoveredInterface, IfaceRecord, IfaceSnapshot, IfaceStatus};
pub use proxy::{
    run_accept_loop, ProxyListener, RequestHead, Session, SessionConfig, MAX_HEAD_SIZE,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
