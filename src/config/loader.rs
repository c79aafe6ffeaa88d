//! Configuration loading and management
//!
//! This module handles loading configuration from files and environment
//! variables.

use std::path::Path;

use tracing::{debug, info};

use super::types::Config;
use crate::error::ConfigError;

/// Load configuration from a JSON file
///
/// # Arguments
///
/// * `path` - Path to the configuration file
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read or parsed.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();

    debug!("Loading configuration from {:?}", path);

    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    let contents = std::fs::read_to_string(path)?;

    let config: Config = serde_json::from_str(&contents)
        .map_err(|e| ConfigError::ParseError(format!("Failed to parse JSON: {e} at {path:?}")))?;

    config.validate()?;

    info!(
        "Configuration loaded: listen={}, {} interfaces",
        config.listen.address,
        config.interfaces.len()
    );

    Ok(config)
}

/// Load configuration from a JSON string
///
/// # Errors
///
/// Returns `ConfigError` if parsing or validation fails.
pub fn load_config_str(json: &str) -> Result<Config, ConfigError> {
    let config: Config =
        serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    config.validate()?;

    Ok(config)
}

/// Load configuration with environment variable overrides
///
/// Environment variables:
/// - `MWAN_PROXY_LISTEN_ADDR`: Override listen address
/// - `MWAN_PROXY_LOG_LEVEL`: Override log level
/// - `MWAN_PROXY_LOG_DIR`: Override event log directory
///
/// # Errors
///
/// Returns `ConfigError` if loading or parsing fails.
pub fn load_config_with_env(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let mut config = load_config(path)?;
    apply_env_overrides(&mut config)?;
    Ok(config)
}

/// Apply environment overrides to an already-loaded configuration
///
/// # Errors
///
/// Returns `ConfigError::EnvError` when an override value does not parse,
/// and re-validates the result.
pub fn apply_env_overrides(config: &mut Config) -> Result<(), ConfigError> {
    if let Ok(addr) = std::env::var("MWAN_PROXY_LISTEN_ADDR") {
        config.listen.address = addr.parse().map_err(|_| ConfigError::EnvError {
            name: "MWAN_PROXY_LISTEN_ADDR".into(),
            reason: format!("Invalid socket address: {addr}"),
        })?;
        debug!("Listen address overridden to {}", config.listen.address);
    }

    if let Ok(level) = std::env::var("MWAN_PROXY_LOG_LEVEL") {
        config.log.level = level;
        debug!("Log level overridden to {}", config.log.level);
    }

    if let Ok(dir) = std::env::var("MWAN_PROXY_LOG_DIR") {
        config.log.directory = dir.into();
        debug!("Log directory overridden to {:?}", config.log.directory);
    }

    config.validate()?;

    Ok(())
}

/// Create a default configuration file at the given path
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be written.
pub fn create_default_config(path: impl AsRef<Path>) -> Result<(), ConfigError> {
    let config = Config::default_config();
    let json = serde_json::to_string_pretty(&config)
        .map_err(|e| ConfigError::ParseError(format!("Failed to serialize config: {e}")))?;

    std::fs::write(path, json)?;
    Ok(())
}
