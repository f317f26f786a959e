use thiserror::Error;

/// Failures while parsing or encoding a wire frame.
///
/// Every variant here corresponds to a malformed-frame condition: the caller
/// is expected to log and close the connection rather than attempt recovery.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("connection closed before a complete frame was read")]
    UnexpectedEof,

    #[error("expected prefix byte '{expected}', found '{found}'")]
    InvalidPrefix { expected: char, found: char },

    #[error("invalid size field: {0}")]
    InvalidLength(String),

    #[error("declared length {declared} did not match {actual} bytes read")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("argument is not valid UTF-8")]
    InvalidUtf8,

    #[error("unrecognized command {0:?}")]
    UnknownCommand(String),

    #[error("command requires at least {min} arguments, got {got}")]
    MissingArguments { min: usize, got: usize },

    #[error("invalid message id: {0}")]
    InvalidMessageId(String),

    #[error("invalid heartbeat interval: {0}")]
    InvalidHeartbeat(String),

    #[error("json encode/decode error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
