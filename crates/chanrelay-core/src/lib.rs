//! Connection abstraction, subscription registry and broadcast hub.
//!
//! This is the routing engine of chanrelay. Every participant — TCP socket,
//! WebSocket, IRC bridge, backlog writer — registers with the [`Hub`] and
//! becomes a peer on a shared broadcast bus. The hub fans every broadcast
//! out to every *other* registered connection; each connection then filters
//! deliveries against its own subscription state. Visibility is
//! subscription-gated at the recipient, not centrally.

pub mod backend;
pub mod connection;
pub mod error;
pub mod fields;
pub mod hub;
pub mod state;

pub use backend::{spawn_backend, Backend, BackendCtx, BackendHandle};
pub use connection::{commands, error_reply, handle_inbound, Action};
pub use error::{RelayError, Result};
pub use hub::{ConnectionId, Hub, Inbox, Registration};
pub use state::ConnState;
