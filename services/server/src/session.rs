//! The Subscribe Session Loop (spec §4.7), shared by the TCP and WebSocket
//! listeners. Everything transport-specific (parsing the initial request,
//! the readiness heartbeat byte on TCP only, and how the heartbeat exchange
//! is physically read/written) lives behind [`HeartbeatIo`] and the caller's
//! own [`push_core::MessageSink`]; this module only implements the state
//! machine in the table in §4.7.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use push_core::{ConnId, MessageSink};
use tracing::{info, warn};

use crate::state::AppState;

/// The parsed, transport-agnostic parameters of a subscribe attempt.
pub struct SubscribeParams {
    pub key: String,
    pub mid: i64,
    pub heartbeat_sec: u64,
    pub token: Option<String>,
    /// Whether to write the single readiness heartbeat byte once auth
    /// succeeds, before replay (spec §4.7 step 6). TCP-only; WebSocket
    /// subscribers never see this byte.
    pub emit_readiness: bool,
}

/// What happened the last time we waited for a heartbeat byte from the
/// client.
pub enum HeartbeatEvent {
    /// The client sent exactly `h`; reply in kind and keep the loop going.
    Received,
    /// The client sent something other than `h`; close.
    BadFrame,
    /// Read timeout, I/O error, or EOF; close.
    Disconnected,
}

/// Physically waits for and replies to heartbeats. TCP and WebSocket each
/// implement this over their own socket type.
#[async_trait]
pub trait HeartbeatIo: Send {
    async fn wait_heartbeat(&mut self, read_deadline: Duration) -> HeartbeatEvent;
    async fn reply_heartbeat(&mut self) -> bool;
}

/// Resolves the effective heartbeat period: the subscriber's requested value
/// if present and positive, else the configured default. Returns `None` for
/// zero or negative requested values — spec §8 requires those be rejected
/// outright rather than silently falling back to the default.
pub fn effective_heartbeat_sec(requested: Option<u64>, default_sec: u64) -> Option<u64> {
    match requested {
        Some(0) => None,
        Some(h) => Some(h),
        None => Some(default_sec),
    }
}

/// Runs steps 4-10 of the session state machine for one subscriber
/// connection: locate-or-create the channel, auth, replay, attach, then
/// loop on heartbeats until the client goes quiet or misbehaves.
///
/// `conn` must already be a unique id for this connection (minted by
/// [`AppState::next_conn_id`]); `sink` is how `push`/`send` write frames
/// back to this subscriber.
pub async fn run(
    state: &AppState,
    conn: ConnId,
    params: SubscribeParams,
    sink: Arc<dyn MessageSink>,
    mut io: impl HeartbeatIo,
) {
    let SubscribeParams {
        key,
        mid,
        heartbeat_sec,
        token,
        emit_readiness,
    } = params;

    let channel = match state.registry.get(&key).await {
        Ok(channel) => channel,
        Err(_) if !state.config.auth => state.registry.new_or_refresh(&key).await,
        Err(err) => {
            warn!(key, %err, "subscribe: no channel and auth enabled, closing");
            return;
        }
    };

    if state.config.auth {
        let Some(token) = token.as_deref().filter(|t| !t.is_empty()) else {
            warn!(key, "subscribe: auth enabled but no token supplied, closing");
            return;
        };
        if let Err(err) = channel.auth_token(token).await {
            warn!(key, %err, "subscribe: token rejected, closing");
            return;
        }
    }

    if emit_readiness && sink.write_heartbeat().await.is_err() {
        warn!(key, "subscribe: readiness write failed, closing");
        return;
    }

    if let Err(err) = channel.send(conn, sink.as_ref(), mid).await {
        warn!(key, %err, "subscribe: replay failed, closing");
        return;
    }

    if let Err(err) = channel.add_conn(conn, sink.clone(), mid).await {
        warn!(key, %err, "subscribe: add_conn failed, closing");
        return;
    }

    info!(key, mid, conn, "subscriber attached");

    let read_deadline = Duration::from_secs(heartbeat_sec.saturating_mul(2));
    loop {
        match io.wait_heartbeat(read_deadline).await {
            HeartbeatEvent::Received => {
                if !io.reply_heartbeat().await {
                    break;
                }
            }
            HeartbeatEvent::BadFrame | HeartbeatEvent::Disconnected => break,
        }
    }

    channel.remove_conn(conn).await;
    info!(key, conn, "subscriber detached");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_heartbeat_uses_default_when_absent() {
        assert_eq!(effective_heartbeat_sec(None, 30), Some(30));
    }

    #[test]
    fn effective_heartbeat_uses_requested_when_positive() {
        assert_eq!(effective_heartbeat_sec(Some(5), 30), Some(5));
    }

    #[test]
    fn effective_heartbeat_rejects_zero() {
        assert_eq!(effective_heartbeat_sec(Some(0), 30), None);
    }
}
