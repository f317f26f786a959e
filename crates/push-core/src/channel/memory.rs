use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Channel, ConnId, MessageSink};
use crate::buffer::OrderedBuffer;
use crate::error::PushError;
use crate::message::{now_ns, Message};

struct Inner {
    conns: HashMap<ConnId, (Arc<dyn MessageSink>, i64)>,
    buffer: OrderedBuffer,
    tokens: HashSet<String>,
}

/// The in-memory `Channel` variant: buffer, tokens, and connections all live
/// in process memory behind a single lock. Grounded directly on the
/// reference implementation's `InnerChannel` (`SendMsg`/`PushMsg`/`AddConn`/
/// `RemoveConn`/token and deadline bookkeeping).
///
/// `deadline_ns` deliberately lives outside `inner`, in its own `AtomicI64`:
/// `Registry::new_or_refresh` calls `set_deadline` while holding only the
/// bucket lock, and a busy channel can have `inner` locked across a fan-out
/// write for the whole call — spec §4.5 requires the deadline refresh to be
/// unconditional, so it can't be allowed to fail under contention.
pub struct InMemoryChannel {
    inner: Mutex<Inner>,
    deadline_ns: AtomicI64,
    max_stored_message: usize,
    max_subscriber_per_key: usize,
}

impl InMemoryChannel {
    pub fn new(deadline_ns: i64, max_stored_message: usize, max_subscriber_per_key: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                conns: HashMap::new(),
                buffer: OrderedBuffer::new(),
                tokens: HashSet::new(),
            }),
            deadline_ns: AtomicI64::new(deadline_ns),
            max_stored_message,
            max_subscriber_per_key,
        }
    }
}

#[async_trait]
impl Channel for InMemoryChannel {
    async fn push(&self, message: Message) -> Result<(), PushError> {
        let now = now_ns();
        if message.is_expired(now) {
            return Err(PushError::MsgExpired);
        }
        let mut inner = self.inner.lock().await;
        if inner.buffer.len() + 1 > self.max_stored_message {
            inner.buffer.evict_smallest();
        }
        let mid = message.mid;
        let envelope = message.to_envelope();
        if inner.buffer.insert_unique(message).is_err() {
            return Err(PushError::DuplicateMid(mid));
        }

        for (conn, (sink, last_mid)) in inner.conns.iter_mut() {
            if *last_mid >= mid {
                continue;
            }
            match sink.write_message(&envelope).await {
                Ok(()) => *last_mid = mid,
                Err(e) => {
                    tracing::warn!(conn, error = %e, "fan-out write failed, leaving connection for reader to detect");
                }
            }
        }
        Ok(())
    }

    async fn send(
        &self,
        conn: ConnId,
        sink: &dyn MessageSink,
        since_mid: i64,
    ) -> Result<i64, PushError> {
        let now = now_ns();
        let mut inner = self.inner.lock().await;
        let replay = inner.buffer.drain_replay(since_mid, now);
        let mut last_mid = since_mid;
        for message in &replay {
            sink.write_message(&message.to_envelope())
                .await
                .map_err(|e| PushError::InternalIo(e.to_string()))?;
            last_mid = message.mid;
        }
        if let Some((_, recorded)) = inner.conns.get_mut(&conn) {
            *recorded = last_mid;
        }
        Ok(last_mid)
    }

    async fn add_conn(
        &self,
        conn: ConnId,
        sink: Arc<dyn MessageSink>,
        last_mid: i64,
    ) -> Result<(), PushError> {
        let mut inner = self.inner.lock().await;
        if inner.conns.len() + 1 > self.max_subscriber_per_key {
            return Err(PushError::MaxConn);
        }
        inner.conns.insert(conn, (sink, last_mid));
        Ok(())
    }

    async fn remove_conn(&self, conn: ConnId) {
        self.inner.lock().await.conns.remove(&conn);
    }

    async fn add_token(&self, token: &str) -> Result<(), PushError> {
        let mut inner = self.inner.lock().await;
        if !inner.tokens.insert(token.to_owned()) {
            return Err(PushError::TokenExist);
        }
        Ok(())
    }

    async fn auth_token(&self, token: &str) -> Result<(), PushError> {
        let mut inner = self.inner.lock().await;
        if !inner.tokens.remove(token) {
            return Err(PushError::AuthToken);
        }
        Ok(())
    }

    fn set_deadline(&self, deadline_ns: i64) {
        self.deadline_ns.store(deadline_ns, Ordering::Relaxed);
    }

    fn is_timed_out(&self, now_ns: i64) -> bool {
        now_ns > self.deadline_ns.load(Ordering::Relaxed)
    }

    async fn close(&self) -> Vec<ConnId> {
        let mut inner = self.inner.lock().await;
        let ids: Vec<ConnId> = inner.conns.keys().copied().collect();
        inner.conns.clear();
        ids
    }
}
