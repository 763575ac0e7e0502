//! Reconnect-resilient transport and scrollback reconstruction for remote
//! pseudo-terminal sessions.
//!
//! The crate reconstructs exact terminal display state on a client from two
//! server-side sources: a compact binary snapshot format
//! ([`protocol::decode_snapshot`]) folded into a [`client::ScrollbackBuffer`],
//! and a line-oriented replay stream carried by the
//! [`transport::SessionTransport`]. A [`connection::ConnectionManager`] owns
//! the lifecycle: retry backoff, circuit breaking, offline input queueing,
//! and single-active-manager-per-session enforcement.

pub mod client;
pub mod connection;
pub mod logging;
pub mod model;
pub mod protocol;
pub mod session;
pub mod transport;

pub use client::ScrollbackBuffer;
pub use connection::{
    ConnectionError, ConnectionManager, ConnectionStatus, ManagerConfig, SessionEvent,
    SessionRegistry,
};
pub use model::{Cell, CellAttributes, Color};
pub use protocol::{FormatError, Snapshot, decode_snapshot, encode_snapshot};
pub use session::{SessionBackend, SessionConfig, SessionError};
pub use transport::{NamedKey, SessionTransport, TerminalInput, TransportConfig};
