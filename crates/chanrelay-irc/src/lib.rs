//! IRC bridge for the channel relay.
//!
//! The bridge presents itself to the hub as ordinary backend connections:
//! [`IrcBridge`] manages the server roster on `irc:servers`, and each
//! [`IrcSession`] bridges one server, translating between IRC lines and
//! `chat:*` broadcasts.

pub mod bridge;
pub mod session;
pub mod wire;

pub use bridge::{IrcBridge, SERVERS_CHANNEL};
pub use session::{IrcSession, ServerConfig, DEFAULT_IRC_PORT};
