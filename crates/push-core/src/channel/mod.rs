pub mod external;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::PushError;
use crate::message::Message;

/// An opaque per-connection identifier, minted by whatever owns the socket
/// (the session loop in `services/server`). Channels never interpret it
/// beyond using it as a map key.
pub type ConnId = u64;

/// Anything a channel can write a framed message to. TCP and WebSocket
/// sessions each implement this over their own socket type; the channel
/// itself stays transport-agnostic.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn write_message(&self, envelope: &push_protocol::MessageEnvelope) -> std::io::Result<()>;

    /// Writes the single-byte heartbeat readiness signal sent once, right
    /// after auth and before replay.
    async fn write_heartbeat(&self) -> std::io::Result<()>;
}

/// The capability contract shared by the in-memory and external-store
/// channel variants. The registry stores channels behind `Arc<dyn Channel>`.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Publishes `message`, fanning it out to every attached connection
    /// whose last-delivered mid is below it. A per-connection write failure
    /// is skipped, not treated as fatal — the session loop's reader side is
    /// responsible for detecting and removing dead connections.
    async fn push(&self, message: Message) -> Result<(), PushError>;

    /// Replays stored messages with `mid > since_mid` to `conn`, pruning any
    /// expired entries encountered along the way. Returns the highest mid
    /// actually written (or `since_mid` if nothing was sent).
    async fn send(
        &self,
        conn: ConnId,
        sink: &dyn MessageSink,
        since_mid: i64,
    ) -> Result<i64, PushError>;

    /// Attaches `conn` for future fan-out, recording `sink` so `push` can
    /// write to it directly without the caller staying involved.
    async fn add_conn(
        &self,
        conn: ConnId,
        sink: Arc<dyn MessageSink>,
        last_mid: i64,
    ) -> Result<(), PushError>;

    async fn remove_conn(&self, conn: ConnId);

    async fn add_token(&self, token: &str) -> Result<(), PushError>;

    async fn auth_token(&self, token: &str) -> Result<(), PushError>;

    fn set_deadline(&self, deadline_ns: i64);

    fn is_timed_out(&self, now_ns: i64) -> bool;

    /// Closes every attached connection. Individual close failures are
    /// logged by the caller, not propagated.
    async fn close(&self) -> Vec<ConnId>;
}
