//! Interface health tracking and round-robin selection

mod engine;

pub use engine::{
    EngineConfig, SelectionEngine, FAILURE_TIMEOUT, MAX_CONSECUTIVE_FAILURES, STATS_INTERVAL,
};
