use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::channel::Channel;
use crate::error::PushError;
use crate::hash::murmur2_32;
use crate::message::now_ns;

/// Builds a fresh channel for a key that doesn't exist yet in a bucket. The
/// registry is channel-variant-agnostic; callers supply this factory once at
/// construction (in-memory or external-store, per `channel_type`).
pub type ChannelFactory = Arc<dyn Fn(&str, i64) -> Arc<dyn Channel> + Send + Sync>;

struct Bucket {
    channels: Mutex<HashMap<String, Arc<dyn Channel>>>,
}

/// The bucketed key→channel directory. Bucket count is fixed at
/// construction (a power of two); never resized. Exactly one mutex per
/// bucket, never held while acquiring a channel's own lock.
pub struct Registry {
    buckets: Vec<Bucket>,
    mask: u32,
    channel_expire_ns: i64,
    factory: ChannelFactory,
}

impl Registry {
    pub fn new(bucket_count: usize, channel_expire_ns: i64, factory: ChannelFactory) -> Self {
        assert!(
            bucket_count.is_power_of_two(),
            "channel_bucket must be a power of two"
        );
        let buckets = (0..bucket_count)
            .map(|_| Bucket {
                channels: Mutex::new(HashMap::new()),
            })
            .collect();
        Self {
            buckets,
            mask: (bucket_count - 1) as u32,
            channel_expire_ns,
            factory,
        }
    }

    fn bucket_index(&self, key: &str) -> usize {
        (murmur2_32(key.as_bytes()) & self.mask) as usize
    }

    /// Returns the channel for `key`, creating it if absent. Refreshes the
    /// deadline on every call that finds (or creates) a live channel.
    pub async fn new_or_refresh(&self, key: &str) -> Arc<dyn Channel> {
        let bucket = &self.buckets[self.bucket_index(key)];
        let now = now_ns();
        let deadline = now + self.channel_expire_ns;
        let mut channels = bucket.channels.lock().await;
        if let Some(existing) = channels.get(key) {
            existing.set_deadline(deadline);
            return existing.clone();
        }
        let channel = (self.factory)(key, deadline);
        channels.insert(key.to_owned(), channel.clone());
        channel
    }

    /// Looks up `key` without creating it. Fails with `ChannelNotExist` if
    /// absent, or `ChannelExpired` (after removing and closing it) if its
    /// deadline has passed.
    pub async fn get(&self, key: &str) -> Result<Arc<dyn Channel>, PushError> {
        let bucket = &self.buckets[self.bucket_index(key)];
        let now = now_ns();
        let mut channels = bucket.channels.lock().await;
        let Some(channel) = channels.get(key).cloned() else {
            return Err(PushError::ChannelNotExist);
        };
        if channel.is_timed_out(now) {
            channels.remove(key);
            drop(channels);
            channel.close().await;
            return Err(PushError::ChannelExpired);
        }
        Ok(channel)
    }
}
