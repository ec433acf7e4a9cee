use chanrelay_frame::FrameError;

/// Errors raised while interpreting or routing messages.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// A required payload field is missing.
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    /// A payload field has the wrong type.
    #[error("field `{field}` is not a {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },

    /// An application message arrived without a `msgId`.
    #[error("application message is missing `msgId`")]
    MissingMsgId,

    /// A backend (bridge/persistence) operation failed.
    #[error("backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, RelayError>;
