use bytes::{Buf, BufMut, BytesMut};
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder};

use crate::envelope::Envelope;
use crate::error::{FrameError, FrameFault, Result};

/// Frame header: 4-byte little-endian payload length.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Outcome of decoding one complete frame.
///
/// A fault is fatal to the single frame only: the decoder consumes the bad
/// frame (skipping an oversized payload as the bytes stream past) and keeps
/// decoding, so one malformed message never corrupts the rest of the stream.
#[derive(Debug)]
pub enum Decoded {
    /// A well-formed envelope.
    Envelope(Envelope),
    /// A frame that could not be decoded, with salvaged reply context.
    Fault(FrameFault),
}

/// Encode a serialized payload into the wire format.
///
/// Wire format:
/// ```text
/// ┌───────────────┬────────────────────┐
/// │ Length (4B LE)│ Payload (JSON)     │
/// └───────────────┴────────────────────┘
/// ```
pub fn encode_frame(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > u32::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            declared: payload.len(),
            max: u32::MAX as usize,
        });
    }
    dst.reserve(LENGTH_PREFIX_SIZE + payload.len());
    dst.put_u32_le(payload.len() as u32);
    dst.put_slice(payload);
    Ok(())
}

/// Decode a complete payload into an envelope, salvaging reply context
/// (`channel`, `msgId`) from the raw JSON when the envelope is malformed.
pub fn decode_payload(bytes: &[u8]) -> std::result::Result<Envelope, FrameFault> {
    let value: Value = match serde_json::from_slice(bytes) {
        Ok(value) => value,
        Err(err) => return Err(FrameFault::bare(err.into())),
    };

    let channel = value
        .get("channel")
        .and_then(Value::as_str)
        .map(str::to_string);
    let msg_id = value
        .get("msgId")
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok());

    Envelope::parse(value).map_err(|error| FrameFault {
        channel,
        msg_id,
        error,
    })
}

/// Length-prefix framing codec for envelope streams.
///
/// Resumable across partial reads: with fewer than 4 header bytes, or fewer
/// than the declared payload length buffered, `decode` returns `Ok(None)`
/// and retains the partial buffer for the next read event.
#[derive(Debug)]
pub struct EnvelopeCodec {
    max_payload: usize,
    /// Bytes of an oversized payload still to be discarded.
    skip_remaining: usize,
}

impl EnvelopeCodec {
    /// Create a codec with an explicit payload sanity bound.
    pub fn new(max_payload: usize) -> Self {
        Self {
            max_payload,
            skip_remaining: 0,
        }
    }
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD)
    }
}

impl Decoder for EnvelopeCodec {
    type Item = Decoded;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Decoded>> {
        if self.skip_remaining > 0 {
            let n = src.len().min(self.skip_remaining);
            src.advance(n);
            self.skip_remaining -= n;
            if self.skip_remaining > 0 {
                return Ok(None);
            }
        }

        if src.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let declared = u32::from_le_bytes(src[0..LENGTH_PREFIX_SIZE].try_into().expect("4 bytes"))
            as usize;

        if declared > self.max_payload {
            // The frame boundary is still trustworthy; drop the payload as
            // it streams past and report the fault once.
            src.advance(LENGTH_PREFIX_SIZE);
            let n = src.len().min(declared);
            src.advance(n);
            self.skip_remaining = declared - n;
            return Ok(Some(Decoded::Fault(FrameFault::bare(
                FrameError::PayloadTooLarge {
                    declared,
                    max: self.max_payload,
                },
            ))));
        }

        if src.len() < LENGTH_PREFIX_SIZE + declared {
            src.reserve(LENGTH_PREFIX_SIZE + declared - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_SIZE);
        let payload = src.split_to(declared);

        Ok(Some(match decode_payload(&payload) {
            Ok(envelope) => Decoded::Envelope(envelope),
            Err(fault) => Decoded::Fault(fault),
        }))
    }
}

impl Encoder<Envelope> for EnvelopeCodec {
    type Error = FrameError;

    fn encode(&mut self, envelope: Envelope, dst: &mut BytesMut) -> Result<()> {
        let payload = envelope.to_bytes()?;
        if payload.len() > self.max_payload {
            return Err(FrameError::PayloadTooLarge {
                declared: payload.len(),
                max: self.max_payload,
            });
        }
        encode_frame(&payload, dst)
    }
}
