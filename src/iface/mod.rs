//! Interface records and discovery
//!
//! This module provides the per-interface statistics record shared by all
//! sessions and the IPv4 address discovery used at startup.

mod discover;
mod record;

pub use discover::{discover_interfaces, DiscoveredInterface};
pub use record::{IfaceRecord, IfaceSnapshot, IfaceStatus};
