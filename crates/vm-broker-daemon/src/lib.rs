//! VM broker daemon
//!
//! Serves the broker's request façade as JSON over WebSocket. See
//! [`protocol`] for the wire format.

#![warn(missing_docs)]

pub mod handlers;
pub mod logging;
pub mod protocol;
pub mod server;
pub mod signals;

pub use protocol::{Envelope, ErrorCode, Reply, Request, Response};
pub use server::Server;
