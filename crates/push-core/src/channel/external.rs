use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::sync::Mutex;

use super::{Channel, ConnId, MessageSink};
use crate::error::PushError;
use crate::message::{now_ns, Message};

/// The capability contract an external key-value store must provide for the
/// externalized `Channel` variant. Named after the Redis commands the
/// shipped implementation maps them to, but kept abstract so another store
/// could implement it.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Ordered (mid, payload) pairs with score strictly greater than
    /// `exclusive_min`, ascending. (`ZRANGEBYSCORE`)
    async fn range_by_score(
        &self,
        bucket: &str,
        exclusive_min: i64,
    ) -> Result<Vec<(i64, String)>, PushError>;

    /// Removes one scored member by its score. (`ZREM`)
    async fn delete_by_score(&self, bucket: &str, score: i64) -> Result<(), PushError>;

    /// Adds `member` with `score`. (`ZADD`)
    async fn score_add(&self, bucket: &str, score: i64, member: &str) -> Result<(), PushError>;

    /// Adds `member` to a set, returning `true` if it was newly inserted.
    /// (`SADD`)
    async fn set_add(&self, bucket: &str, member: &str) -> Result<bool, PushError>;

    /// Removes `member` from a set, returning `true` if it was present.
    /// (`SREM`)
    async fn set_remove(&self, bucket: &str, member: &str) -> Result<bool, PushError>;

    /// Increments `field` within a hash by `delta`, returning the new value.
    /// (`HINCRBY`)
    async fn counter_inc(&self, bucket: &str, field: &str, delta: i64) -> Result<i64, PushError>;
}

/// A `Backend` backed by a pooled Redis-compatible connection.
pub struct RedisBackend {
    pool: deadpool_redis::Pool,
}

impl RedisBackend {
    pub fn new(pool: deadpool_redis::Pool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection, PushError> {
        self.pool
            .get()
            .await
            .map_err(|e| PushError::BackendUnavailable(e.to_string()))
    }
}

#[async_trait]
impl Backend for RedisBackend {
    async fn range_by_score(
        &self,
        bucket: &str,
        exclusive_min: i64,
    ) -> Result<Vec<(i64, String)>, PushError> {
        let mut conn = self.conn().await?;
        let members: Vec<(String, i64)> = conn
            .zrangebyscore_withscores(bucket, format!("({exclusive_min}"), "+inf")
            .await
            .map_err(|e| PushError::BackendData(e.to_string()))?;
        Ok(members.into_iter().map(|(m, s)| (s, m)).collect())
    }

    async fn delete_by_score(&self, bucket: &str, score: i64) -> Result<(), PushError> {
        let mut conn = self.conn().await?;
        let members: Vec<String> = conn
            .zrangebyscore(bucket, score, score)
            .await
            .map_err(|e| PushError::BackendData(e.to_string()))?;
        for member in members {
            let _: i64 = conn
                .zrem(bucket, member)
                .await
                .map_err(|e| PushError::BackendData(e.to_string()))?;
        }
        Ok(())
    }

    async fn score_add(&self, bucket: &str, score: i64, member: &str) -> Result<(), PushError> {
        let mut conn = self.conn().await?;
        let _: i64 = conn
            .zadd(bucket, member, score)
            .await
            .map_err(|e| PushError::BackendData(e.to_string()))?;
        Ok(())
    }

    async fn set_add(&self, bucket: &str, member: &str) -> Result<bool, PushError> {
        let mut conn = self.conn().await?;
        let added: i64 = conn
            .sadd(bucket, member)
            .await
            .map_err(|e| PushError::BackendData(e.to_string()))?;
        Ok(added > 0)
    }

    async fn set_remove(&self, bucket: &str, member: &str) -> Result<bool, PushError> {
        let mut conn = self.conn().await?;
        let removed: i64 = conn
            .srem(bucket, member)
            .await
            .map_err(|e| PushError::BackendData(e.to_string()))?;
        Ok(removed > 0)
    }

    async fn counter_inc(&self, bucket: &str, field: &str, delta: i64) -> Result<i64, PushError> {
        let mut conn = self.conn().await?;
        conn.hincr(bucket, field, delta)
            .await
            .map_err(|e| PushError::BackendData(e.to_string()))
    }
}

struct Inner {
    conns: HashMap<ConnId, (Arc<dyn MessageSink>, i64)>,
}

/// The external-store `Channel` variant: the message buffer and token set
/// live in `backend`, addressed by `key`; the live connection map is still
/// local to this process (a remote store cannot hold an open socket).
///
/// `push` fans out to local connections exactly like [`super::memory::InMemoryChannel`]
/// but does not write the published message through to `backend` — the
/// reference implementation this is grounded on never did either (see
/// `redis_channel.go`'s `PushMsg`, a stub), and whether cross-process replay
/// is meant to be populated through a different path is left as an open
/// question rather than guessed at here.
///
/// `deadline_ns` lives in its own `AtomicI64`, outside `inner`: `push`,
/// `add_conn`, and `remove_conn` all hold `inner`'s lock across a network
/// write (fan-out or a backend counter call), and `Registry::new_or_refresh`
/// only holds the bucket lock when it calls `set_deadline` — the refresh
/// must not be allowed to fail just because a publish is in flight.
pub struct ExternalChannel {
    key: String,
    backend: Arc<dyn Backend>,
    node: String,
    inner: Mutex<Inner>,
    deadline_ns: AtomicI64,
    max_stored_message: usize,
    max_subscriber_per_key: usize,
}

impl ExternalChannel {
    pub fn new(
        key: impl Into<String>,
        backend: Arc<dyn Backend>,
        node: impl Into<String>,
        deadline_ns: i64,
        max_stored_message: usize,
        max_subscriber_per_key: usize,
    ) -> Self {
        Self {
            key: key.into(),
            backend,
            node: node.into(),
            inner: Mutex::new(Inner {
                conns: HashMap::new(),
            }),
            deadline_ns: AtomicI64::new(deadline_ns),
            max_stored_message,
            max_subscriber_per_key,
        }
    }

    fn messages_bucket(&self) -> String {
        format!("m_{}", self.key)
    }

    fn tokens_bucket(&self) -> String {
        format!("t_{}", self.key)
    }

    fn online_bucket(&self) -> String {
        format!("o_{}", self.key)
    }
}

#[async_trait]
impl Channel for ExternalChannel {
    async fn push(&self, message: Message) -> Result<(), PushError> {
        let now = now_ns();
        if message.is_expired(now) {
            return Err(PushError::MsgExpired);
        }
        let mid = message.mid;
        let envelope = message.to_envelope();
        let mut inner = self.inner.lock().await;
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
        let bucket = self.messages_bucket();
        let now = now_ns();
        let stored = self.backend.range_by_score(&bucket, since_mid).await?;
        let mut last_mid = since_mid;
        for (mid, payload) in stored {
            let msg = Message::new(payload, mid, i64::MAX);
            if msg.is_expired(now) {
                self.backend.delete_by_score(&bucket, mid).await?;
                continue;
            }
            sink.write_message(&msg.to_envelope())
                .await
                .map_err(|e| PushError::InternalIo(e.to_string()))?;
            last_mid = mid;
        }
        let mut inner = self.inner.lock().await;
        if let Some((_, recorded)) = inner.conns.get_mut(&conn) {
            *recorded = last_mid;
        }
        let _ = self.max_stored_message; // capacity is enforced on the backend side, not here
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
        drop(inner);
        let _ = self
            .backend
            .counter_inc(&self.online_bucket(), &self.node, 1)
            .await;
        Ok(())
    }

    async fn remove_conn(&self, conn: ConnId) {
        self.inner.lock().await.conns.remove(&conn);
        let _ = self
            .backend
            .counter_inc(&self.online_bucket(), &self.node, -1)
            .await;
    }

    async fn add_token(&self, token: &str) -> Result<(), PushError> {
        if self.backend.set_add(&self.tokens_bucket(), token).await? {
            Ok(())
        } else {
            Err(PushError::TokenExist)
        }
    }

    async fn auth_token(&self, token: &str) -> Result<(), PushError> {
        if self
            .backend
            .set_remove(&self.tokens_bucket(), token)
            .await?
        {
            Ok(())
        } else {
            Err(PushError::AuthToken)
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct FakeBackend {
        scored: StdMutex<HashMap<String, Vec<(i64, String)>>>,
        sets: StdMutex<HashMap<String, std::collections::HashSet<String>>>,
        counters: StdMutex<HashMap<(String, String), i64>>,
    }

    impl FakeBackend {
        fn new() -> Self {
            Self {
                scored: StdMutex::new(HashMap::new()),
                sets: StdMutex::new(HashMap::new()),
                counters: StdMutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl Backend for FakeBackend {
        async fn range_by_score(
            &self,
            bucket: &str,
            exclusive_min: i64,
        ) -> Result<Vec<(i64, String)>, PushError> {
            let mut entries = self
                .scored
                .lock()
                .unwrap()
                .get(bucket)
                .cloned()
                .unwrap_or_default();
            entries.retain(|(mid, _)| *mid > exclusive_min);
            entries.sort_by_key(|(mid, _)| *mid);
            Ok(entries)
        }

        async fn delete_by_score(&self, bucket: &str, score: i64) -> Result<(), PushError> {
            if let Some(entries) = self.scored.lock().unwrap().get_mut(bucket) {
                entries.retain(|(mid, _)| *mid != score);
            }
            Ok(())
        }

        async fn score_add(&self, bucket: &str, score: i64, member: &str) -> Result<(), PushError> {
            self.scored
                .lock()
                .unwrap()
                .entry(bucket.to_owned())
                .or_default()
                .push((score, member.to_owned()));
            Ok(())
        }

        async fn set_add(&self, bucket: &str, member: &str) -> Result<bool, PushError> {
            Ok(self
                .sets
                .lock()
                .unwrap()
                .entry(bucket.to_owned())
                .or_default()
                .insert(member.to_owned()))
        }

        async fn set_remove(&self, bucket: &str, member: &str) -> Result<bool, PushError> {
            Ok(self
                .sets
                .lock()
                .unwrap()
                .entry(bucket.to_owned())
                .or_default()
                .remove(member))
        }

        async fn counter_inc(
            &self,
            bucket: &str,
            field: &str,
            delta: i64,
        ) -> Result<i64, PushError> {
            let mut counters = self.counters.lock().unwrap();
            let entry = counters
                .entry((bucket.to_owned(), field.to_owned()))
                .or_insert(0);
            *entry += delta;
            Ok(*entry)
        }
    }

    struct RecordingSink {
        writes: StdMutex<Vec<push_protocol::MessageEnvelope>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                writes: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl MessageSink for RecordingSink {
        async fn write_message(
            &self,
            envelope: &push_protocol::MessageEnvelope,
        ) -> std::io::Result<()> {
            self.writes.lock().unwrap().push(envelope.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn send_replays_from_backend_ascending() {
        let backend = Arc::new(FakeBackend::new());
        backend.score_add("m_k1", 5, "a").await.unwrap();
        backend.score_add("m_k1", 7, "b").await.unwrap();
        let ch = ExternalChannel::new("k1", backend, "node1", i64::MAX, 20, 10);

        let sink = RecordingSink::new();
        let last = ch.send(1, &sink, 0).await.unwrap();
        assert_eq!(last, 7);
        let mids: Vec<i64> = sink.writes.lock().unwrap().iter().map(|e| e.mid).collect();
        assert_eq!(mids, vec![5, 7]);
    }

    #[tokio::test]
    async fn token_roundtrip_through_backend() {
        let backend = Arc::new(FakeBackend::new());
        let ch = ExternalChannel::new("k1", backend, "node1", i64::MAX, 20, 10);
        ch.add_token("t1").await.unwrap();
        ch.auth_token("t1").await.unwrap();
        let err = ch.auth_token("t1").await.unwrap_err();
        assert!(matches!(err, PushError::AuthToken));
    }

    #[tokio::test]
    async fn push_does_not_write_through_to_backend() {
        let backend = Arc::new(FakeBackend::new());
        let ch = ExternalChannel::new("k1", backend.clone(), "node1", i64::MAX, 20, 10);
        let sink = Arc::new(RecordingSink::new());
        ch.add_conn(1, sink.clone(), 0).await.unwrap();

        ch.push(Message::new("hi", 1, i64::MAX)).await.unwrap();

        assert_eq!(sink.writes.lock().unwrap().len(), 1);
        assert!(backend
            .scored
            .lock()
            .unwrap()
            .get("m_k1")
            .map(|v| v.is_empty())
            .unwrap_or(true));
    }

    #[tokio::test]
    async fn add_conn_increments_online_counter() {
        let backend = Arc::new(FakeBackend::new());
        let ch = ExternalChannel::new("k1", backend.clone(), "node1", i64::MAX, 20, 10);
        ch.add_conn(1, Arc::new(RecordingSink::new()), 0)
            .await
            .unwrap();
        ch.remove_conn(1).await;
        let count = *backend
            .counters
            .lock()
            .unwrap()
            .get(&("o_k1".to_owned(), "node1".to_owned()))
            .unwrap();
        assert_eq!(count, 0);
    }

    struct BlockingSink {
        started: tokio::sync::Notify,
        proceed: tokio::sync::Notify,
    }

    impl BlockingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                started: tokio::sync::Notify::new(),
                proceed: tokio::sync::Notify::new(),
            })
        }
    }

    #[async_trait]
    impl MessageSink for BlockingSink {
        async fn write_message(
            &self,
            _envelope: &push_protocol::MessageEnvelope,
        ) -> std::io::Result<()> {
            self.started.notify_one();
            self.proceed.notified().await;
            Ok(())
        }

        async fn write_heartbeat(&self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn set_deadline_refreshes_while_a_fan_out_write_is_in_flight() {
        // Same regression as the in-memory variant: `push` holds `inner`'s
        // lock across a connection's write, and the registry must still be
        // able to refresh the deadline concurrently.
        let backend = Arc::new(FakeBackend::new());
        let ch = Arc::new(ExternalChannel::new(
            "k1",
            backend,
            "node1",
            100,
            20,
            10,
        ));
        let sink = BlockingSink::new();
        ch.add_conn(1, sink.clone(), 0).await.unwrap();

        let ch_for_push = ch.clone();
        let push_task = tokio::spawn(async move {
            ch_for_push
                .push(Message::new("x", 1, i64::MAX))
                .await
                .unwrap();
        });

        sink.started.notified().await;
        ch.set_deadline(200);
        assert!(!ch.is_timed_out(101));

        sink.proceed.notify_one();
        push_task.await.unwrap();
    }
}
