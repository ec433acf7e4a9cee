//! Message envelope and length-prefixed wire framing for the channel relay.
//!
//! Every message exchanged through the relay is a JSON object carrying at
//! least a `channel` and a `cmd`, plus a sender-stamped `msgId` and an
//! optional `replyTo` for request/reply correlation. Over TCP each object is
//! framed with a 4-byte little-endian length prefix; over WebSocket the
//! transport provides message boundaries and the object travels bare.
//!
//! No partial reads, no buffer management in user code.

pub mod codec;
pub mod envelope;
pub mod error;

pub use codec::{
    decode_payload, encode_frame, Decoded, EnvelopeCodec, DEFAULT_MAX_PAYLOAD, LENGTH_PREFIX_SIZE,
};
pub use envelope::Envelope;
pub use error::{FrameError, FrameFault, Result};
