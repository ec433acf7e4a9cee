//! Network transports for the channel relay.
//!
//! Two listener flavors wrap raw connections into hub participants:
//!
//! - [`TcpRelayListener`] — length-prefixed envelope frames over a byte
//!   stream, with resumable decoding across partial reads.
//! - [`WsRelayListener`] — one envelope per WebSocket message; text and
//!   binary frames are treated identically.
//!
//! Each accepted connection runs on its own task so a slow or malicious
//! peer never stalls framing or dispatch for others. [`Client`] is the TCP
//! connector used by the CLI and the integration tests.

pub mod client;
pub mod error;
pub mod tcp;
pub mod ws;

pub use client::Client;
pub use error::{Result, TransportError};
pub use tcp::TcpRelayListener;
pub use ws::WsRelayListener;
