//! Proxy listener and accept loop
//!
//! Binds the local listen address and spawns one session task per accepted
//! client. Session failures never propagate here; the only errors that can
//! stop the loop are unrecoverable accept errors.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

use super::session::{Session, SessionConfig};
use crate::balancer::SelectionEngine;
use crate::error::{ListenerError, MwanProxyError};
use crate::events::EventLog;

/// TCP listener for the forward proxy
pub struct ProxyListener {
    tcp_listener: TcpListener,
    local_addr: SocketAddr,
}

impl ProxyListener {
    /// Bind the listen address
    ///
    /// # Errors
    ///
    /// Returns `ListenerError::BindError` if binding fails.
    pub async fn bind(addr: SocketAddr) -> Result<Self, ListenerError> {
        let tcp_listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ListenerError::bind(addr, e.to_string()))?;

        // The configured port may be 0 in tests; report the real one.
        let local_addr = tcp_listener.local_addr().map_err(ListenerError::from)?;

        info!("Proxy listening on {}", local_addr);

        Ok(Self {
            tcp_listener,
            local_addr,
        })
    }

    /// The bound listen address
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept one client connection
    ///
    /// # Errors
    ///
    /// Returns `ListenerError::AcceptError` if the accept fails.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), ListenerError> {
        self.tcp_listener
            .accept()
            .await
            .map_err(|e| ListenerError::accept(e.to_string()))
    }
}

impl std::fmt::Debug for ProxyListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyListener")
            .field("local_addr", &self.local_addr)
            .finish()
    }
}

/// Run the accept loop, spawning one session per client
///
/// Runs until an unrecoverable accept error occurs; the caller typically
/// races this future against a shutdown signal.
///
/// # Errors
///
/// Returns the listener error that stopped the loop.
pub async fn run_accept_loop(
    listener: ProxyListener,
    engine: Arc<SelectionEngine>,
    events: Arc<EventLog>,
    config: SessionConfig,
) -> Result<(), MwanProxyError> {
    info!(
        "Starting accept loop on {} ({} interfaces)",
        listener.local_addr(),
        engine.interface_count()
    );

    loop {
        match listener.accept().await {
            Ok((client, client_addr)) => {
                debug!("Accepted connection from {}", client_addr);
                let session = Session::new(
                    client,
                    client_addr,
                    Arc::clone(&engine),
                    Arc::clone(&events),
                    config,
                );
                tokio::spawn(session.run());
            }
            Err(e) => {
                if e.is_recoverable() {
                    debug!("Recoverable accept error: {}", e);
                    continue;
                }
                return Err(e.into());
            }
        }
    }
}
