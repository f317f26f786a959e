use serde::{Deserialize, Serialize};

/// The envelope returned by every admin HTTP endpoint: `{"msg": ..., "ret": ...}`.
/// Endpoints always answer with HTTP 200 and discriminate success/failure via
/// `ret` rather than the status code (only a wrong HTTP method yields 405).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlEnvelope {
    pub msg: String,
    pub ret: i32,
}

impl ControlEnvelope {
    pub fn new(msg: impl Into<String>, ret: i32) -> Self {
        Self {
            msg: msg.into(),
            ret,
        }
    }

    pub fn ok(msg: impl Into<String>) -> Self {
        Self::new(msg, ret_codes::OK)
    }
}

/// Numeric return codes for the `{msg, ret}` control envelope.
pub mod ret_codes {
    pub const OK: i32 = 0;
    pub const CREATE_CHANNEL: i32 = 1;
    pub const GET_CHANNEL: i32 = 3;
    pub const ADD_TOKEN: i32 = 4;
    pub const PUSH_MSG: i32 = 5;
    pub const PARAM_ERR: i32 = 65534;
    pub const INTERNAL_ERR: i32 = 65535;
}
