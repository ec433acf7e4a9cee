use uuid::Uuid;

/// Errors that can occur while framing or decoding envelopes.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The declared payload length exceeds the configured maximum.
    #[error("payload too large ({declared} bytes, max {max})")]
    PayloadTooLarge { declared: usize, max: usize },

    /// The payload is not valid JSON.
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// The payload decoded to something other than a JSON object.
    #[error("payload is not a JSON object")]
    NotAnObject,

    /// A required envelope field is missing or has the wrong type.
    #[error("missing or non-string field `{0}`")]
    MissingField(&'static str),

    /// An identifier field is present but not a valid UUID.
    #[error("field `{field}` is not a valid message id: {value:?}")]
    InvalidId { field: &'static str, value: String },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FrameError>;

/// A recoverable decode failure, fatal to a single frame only.
///
/// Carries whatever routing context could be salvaged from the bad payload
/// so the connection can address an error reply back to the sender (echoing
/// the channel and correlating via `replyTo` when `msgId` was readable).
#[derive(Debug)]
pub struct FrameFault {
    /// The `channel` of the faulting message, if it was recoverable.
    pub channel: Option<String>,
    /// The `msgId` of the faulting message, if it was recoverable.
    pub msg_id: Option<Uuid>,
    /// What went wrong.
    pub error: FrameError,
}

impl FrameFault {
    /// A fault with no salvageable context.
    pub fn bare(error: FrameError) -> Self {
        Self {
            channel: None,
            msg_id: None,
            error,
        }
    }
}

impl std::fmt::Display for FrameFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.error.fmt(f)
    }
}
