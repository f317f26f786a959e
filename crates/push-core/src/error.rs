use thiserror::Error;

/// The error taxonomy shared by every layer of the push service: channels,
/// the registry, the router, and the external-store backend all surface one
/// of these. Callers decide propagation per variant (see each call site) —
/// this type only names the failure, it doesn't prescribe handling.
#[derive(Debug, Error)]
pub enum PushError {
    #[error("channel is at its subscriber capacity")]
    MaxConn,

    #[error("token was not recognized for this channel")]
    AuthToken,

    #[error("token has already been added to this channel")]
    TokenExist,

    #[error("message has already expired")]
    MsgExpired,

    #[error("duplicate message id {0}")]
    DuplicateMid(i64),

    #[error("no channel exists for this key")]
    ChannelNotExist,

    #[error("channel has expired")]
    ChannelExpired,

    #[error("unsupported channel type")]
    ChannelType,

    #[error("malformed command: {0}")]
    CmdFormat(String),

    #[error("redis configuration error: {0}")]
    ConfigRedis(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("backend returned unexpected data: {0}")]
    BackendData(String),

    #[error("internal io error: {0}")]
    InternalIo(String),
}

impl From<push_protocol::FrameError> for PushError {
    fn from(e: push_protocol::FrameError) -> Self {
        PushError::CmdFormat(e.to_string())
    }
}
