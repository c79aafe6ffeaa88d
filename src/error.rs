//! Error types for mwan-proxy
//!
//! This module defines the error hierarchy for the multi-WAN forward proxy.
//! Errors are categorized by subsystem and carry a recovery classification.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Top-level error type for mwan-proxy
#[derive(Debug, Error)]
pub enum MwanProxyError {
    /// Configuration errors (file parsing, validation)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Listener and accept errors
    #[error("Listener error: {0}")]
    Listener(#[from] ListenerError),

    /// Interface selection errors
    #[error("Selection error: {0}")]
    Select(#[from] SelectError),

    /// Request head parsing errors
    #[error("Request error: {0}")]
    Request(#[from] RequestError),

    /// Outbound connection errors
    #[error("Outbound error: {0}")]
    Outbound(#[from] OutboundError),

    /// Session handling errors
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// I/O errors not covered by other categories
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl MwanProxyError {
    /// Check if this error is recoverable (can retry operation)
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(_) => false,
            Self::Listener(e) => e.is_recoverable(),
            Self::Select(e) => e.is_recoverable(),
            Self::Request(e) => e.is_recoverable(),
            Self::Outbound(e) => e.is_recoverable(),
            Self::Session(e) => e.is_recoverable(),
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::ConnectionReset
            ),
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found or inaccessible
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Validation error (invalid values, missing required fields)
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// Environment variable error
    #[error("Environment variable error: {name}: {reason}")]
    EnvError { name: String, reason: String },

    /// I/O error while reading config
    #[error("I/O error reading configuration: {0}")]
    IoError(#[from] io::Error),
}

impl ConfigError {
    /// Config errors are generally not recoverable without user intervention
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        false
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }
}

/// Listener and accept errors
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Failed to bind to the listen address
    #[error("Failed to bind to {addr}: {reason}")]
    BindError { addr: SocketAddr, reason: String },

    /// Failed to accept a connection
    #[error("Accept error: {0}")]
    AcceptError(String),

    /// I/O error
    #[error("Listener I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl ListenerError {
    /// Check if this error is recoverable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::BindError { .. } => false,
            Self::AcceptError(_) => true,
            Self::IoError(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
            ),
        }
    }

    /// Create a bind error
    pub fn bind(addr: SocketAddr, reason: impl Into<String>) -> Self {
        Self::BindError {
            addr,
            reason: reason.into(),
        }
    }

    /// Create an accept error
    pub fn accept(reason: impl Into<String>) -> Self {
        Self::AcceptError(reason.into())
    }
}

/// Interface selection errors
#[derive(Debug, Error)]
pub enum SelectError {
    /// No interfaces configured at all
    #[error("No interfaces available")]
    NoInterfaces,

    /// Every configured interface is link-local
    #[error("No valid interfaces available: all configured addresses are link-local")]
    NoValidInterfaces,
}

impl SelectError {
    /// Selection errors indicate a configuration problem, not a transient state
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        false
    }
}

/// Request head parsing errors
#[derive(Debug, Error)]
pub enum RequestError {
    /// Request line did not tokenize as `METHOD URL PROTOCOL`
    #[error("Malformed request line: {0:?}")]
    MalformedRequestLine(String),

    /// CONNECT target was not `host:port`
    #[error("Invalid CONNECT authority: {0:?}")]
    InvalidAuthority(String),

    /// Port component was not a valid decimal port
    #[error("Invalid port in {0:?}")]
    InvalidPort(String),

    /// Plain request carried neither a Host header nor an absolute URL
    #[error("Unsupported request target: {0:?}")]
    UnsupportedTarget(String),
}

impl RequestError {
    /// Parse errors come from the client; the session closes, nothing retries
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        false
    }
}

/// Outbound connection errors
#[derive(Debug, Error)]
pub enum OutboundError {
    /// A single connect attempt failed
    #[error("Failed to connect to {host}:{port}: {reason}")]
    ConnectionFailed {
        host: String,
        port: u16,
        reason: String,
    },

    /// A single connect attempt timed out
    #[error("Connection to {host}:{port} timed out after {timeout_secs}s")]
    Timeout {
        host: String,
        port: u16,
        timeout_secs: u64,
    },

    /// Hostname did not resolve to an IPv4 address
    #[error("Failed to resolve {host}: {reason}")]
    Resolve { host: String, reason: String },

    /// Failed to set up the outbound socket (bind, non-blocking, keepalive)
    #[error("Failed to set outbound socket option {option}: {reason}")]
    SocketOption { option: String, reason: String },

    /// Every interface was tried and every attempt failed
    #[error("All {attempts} connect attempts to {host}:{port} failed")]
    AllInterfacesFailed {
        host: String,
        port: u16,
        attempts: usize,
    },

    /// I/O error during connection
    #[error("Outbound I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl OutboundError {
    /// Check if this error is recoverable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::ConnectionFailed { .. } | Self::Timeout { .. } | Self::Resolve { .. } => true,
            Self::SocketOption { .. } | Self::AllInterfacesFailed { .. } => false,
            Self::IoError(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionReset
            ),
        }
    }

    /// Create a connection failed error
    pub fn connection_failed(
        host: impl Into<String>,
        port: u16,
        reason: impl Into<String>,
    ) -> Self {
        Self::ConnectionFailed {
            host: host.into(),
            port,
            reason: reason.into(),
        }
    }

    /// Create a resolve error
    pub fn resolve(host: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Resolve {
            host: host.into(),
            reason: reason.into(),
        }
    }

    /// Create a socket option error
    pub fn socket_option(option: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SocketOption {
            option: option.into(),
            reason: reason.into(),
        }
    }
}

/// Session handling errors
#[derive(Debug, Error)]
pub enum SessionError {
    /// Client did not send a request head within the deadline
    #[error("Timed out reading request head")]
    HeadReadTimeout,

    /// Client closed the connection before sending a request
    #[error("Client closed connection: {reason}")]
    ClientClosed { reason: String },

    /// I/O error
    #[error("Session I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl SessionError {
    /// Check if this error is recoverable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::HeadReadTimeout | Self::ClientClosed { .. } => false,
            Self::IoError(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
            ),
        }
    }

    /// Create a client closed error
    pub fn client_closed(reason: impl Into<String>) -> Self {
        Self::ClientClosed {
            reason: reason.into(),
        }
    }
}

/// Type alias for Result with `MwanProxyError`
pub type Result<T> = std::result::Result<T, MwanProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_recovery_classification() {
        // Config errors are not recoverable
        let config_err = ConfigError::ValidationError("test".into());
        assert!(!config_err.is_recoverable());

        // Accept errors are recoverable
        let listener_err = ListenerError::accept("test");
        assert!(listener_err.is_recoverable());

        // Bind errors are not
        let bind_err = ListenerError::bind("127.0.0.1:8080".parse().unwrap(), "in use");
        assert!(!bind_err.is_recoverable());

        // Single connect failures are recoverable (next interface is tried)
        let timeout_err = OutboundError::Timeout {
            host: "example.com".into(),
            port: 443,
            timeout_secs: 2,
        };
        assert!(timeout_err.is_recoverable());

        // Exhausting every interface is not
        let exhausted = OutboundError::AllInterfacesFailed {
            host: "example.com".into(),
            port: 443,
            attempts: 2,
        };
        assert!(!exhausted.is_recoverable());

        // Parse errors are terminal for the session
        let parse_err = RequestError::MalformedRequestLine(String::new());
        assert!(!parse_err.is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let err = SelectError::NoValidInterfaces;
        assert!(err.to_string().contains("link-local"));

        let err = OutboundError::connection_failed("example.com", 443, "connection refused");
        let msg = err.to_string();
        assert!(msg.contains("example.com:443"));
        assert!(msg.contains("connection refused"));
    }

    #[test]
    fn test_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::TimedOut, "timeout");
        let proxy_err: MwanProxyError = io_err.into();
        assert!(proxy_err.is_recoverable());

        let config_err = ConfigError::ValidationError("invalid".into());
        let proxy_err: MwanProxyError = config_err.into();
        assert!(!proxy_err.is_recoverable());
    }
}
