/// A single published message. `expire_ns` and `mid` are the only ordering
/// and lifetime metadata the server tracks; `msg` is the opaque payload
/// handed back to subscribers verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub msg: String,
    pub mid: i64,
    pub expire_ns: i64,
}

impl Message {
    pub fn new(msg: impl Into<String>, mid: i64, expire_ns: i64) -> Self {
        Self {
            msg: msg.into(),
            mid,
            expire_ns,
        }
    }

    /// A message is expired once the current clock has passed its deadline.
    pub fn is_expired(&self, now_ns: i64) -> bool {
        now_ns >= self.expire_ns
    }

    pub fn to_envelope(&self) -> push_protocol::MessageEnvelope {
        push_protocol::MessageEnvelope {
            msg: self.msg.clone(),
            mid: self.mid,
        }
    }
}

/// Current time as nanoseconds since `UNIX_EPOCH`, the unit every deadline
/// and expiry check in this crate is expressed in.
pub fn now_ns() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
        .as_nanos() as i64
}
