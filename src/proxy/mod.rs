//! Forward-proxy core: head parsing, outbound connect, sessions, pumps
//!
//! # Data flow
//!
//! ```text
//! client --> ProxyListener --> Session
//!                                |-- SelectionEngine: pick interface
//!                                |-- RequestHead: parse first bytes
//!                                |-- connect_with_failover: bind + connect
//!                                `-- two pumps: client <-> origin
//! ```

mod connect;
mod forward;
mod head;
mod listener;
mod session;

pub use connect::{connect_via, connect_with_failover};
pub use forward::{pump, Direction, PumpOutcome, FORWARD_BUFFER_SIZE};
pub use head::{RequestHead, MAX_HEAD_SIZE};
pub use listener::{run_accept_loop, ProxyListener};
pub use session::{
    Session, SessionConfig, RESPONSE_200, RESPONSE_502, RESPONSE_503,
};
