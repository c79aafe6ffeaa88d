//! Configuration types and loading

mod loader;
mod types;

pub use loader::{
    apply_env_overrides, create_default_config, load_config, load_config_str, load_config_with_env,
};
pub use types::{
    BalancerConfig, Config, InterfaceConfig, ListenConfig, LogConfig, TimeoutConfig,
    MIN_LISTEN_PORT,
};
