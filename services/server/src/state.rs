use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use push_core::channel::external::{Backend, RedisBackend};
use push_core::channel::memory::InMemoryChannel;
use push_core::channel::Channel;
use push_core::config::{ChannelType, Config};
use push_core::hash::HashRouter;
use push_core::pool::BufferPool;
use push_core::registry::Registry;

/// Process-wide shared state: the channel registry, the write-buffer pool,
/// and (for the external-store variant) the backend router and per-node
/// connection pools. Constructed once in `main` and cloned cheaply (every
/// field is an `Arc`) into every connection handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<Registry>,
    pub buffer_pool: Arc<BufferPool>,
    pub started_at_ns: i64,
    conn_id_seq: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);
        let registry = Arc::new(build_registry(&config));
        let buffer_pool = Arc::new(BufferPool::new(config.write_buf_num, config.write_buf_byte));
        Self {
            config,
            registry,
            buffer_pool,
            started_at_ns: push_core::now_ns(),
            conn_id_seq: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn next_conn_id(&self) -> push_core::ConnId {
        self.conn_id_seq.fetch_add(1, Ordering::Relaxed)
    }
}

fn build_registry(config: &Config) -> Registry {
    let channel_expire_ns = config.channel_expire_sec.saturating_mul(1_000_000_000);
    let max_stored_message = config.max_stored_message;
    let max_subscriber_per_key = config.max_subscriber_per_key;

    match config.channel_type {
        ChannelType::Memory => Registry::new(
            config.channel_bucket,
            channel_expire_ns,
            Arc::new(move |_key, deadline| {
                Arc::new(InMemoryChannel::new(
                    deadline,
                    max_stored_message,
                    max_subscriber_per_key,
                )) as Arc<dyn Channel>
            }),
        ),
        ChannelType::External => {
            let node = config.node.clone();
            let backends = build_backends(config);
            let sole_node = if backends.len() == 1 {
                backends.keys().next().cloned()
            } else {
                None
            };
            let router = HashRouter::build(&backends.keys().cloned().collect::<Vec<_>>(), 160);
            Registry::new(
                config.channel_bucket,
                channel_expire_ns,
                Arc::new(move |key, deadline| {
                    // Backend selection per spec §4.3/§4.4: with a single
                    // configured node the router is bypassed; otherwise each
                    // channel key is routed independently, so channels for
                    // different keys may land on different backend nodes.
                    let selected = sole_node
                        .clone()
                        .or_else(|| router.route(key).map(str::to_owned))
                        .expect("at least one redis node is configured");
                    let backend = backends
                        .get(&selected)
                        .expect("router must select a configured node")
                        .clone();
                    Arc::new(push_core::channel::external::ExternalChannel::new(
                        key,
                        backend,
                        node.clone(),
                        deadline,
                        max_stored_message,
                        max_subscriber_per_key,
                    )) as Arc<dyn Channel>
                }),
            )
        }
    }
}

/// Builds one pooled backend connection per configured `redis` node.
fn build_backends(config: &Config) -> HashMap<String, Arc<dyn Backend>> {
    config
        .redis
        .iter()
        .map(|(name, node_cfg)| {
            let mut pool_cfg =
                deadpool_redis::Config::from_url(format!("redis://{}", node_cfg.addr));
            pool_cfg.pool = Some(deadpool_redis::PoolConfig {
                max_size: (node_cfg.idle + node_cfg.active).max(1) as usize,
                ..Default::default()
            });
            let pool = pool_cfg
                .create_pool(Some(deadpool_redis::Runtime::Tokio1))
                .expect("failed to build redis pool");
            (name.clone(), Arc::new(RedisBackend::new(pool)) as Arc<dyn Backend>)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use push_core::config::RawConfig;

    #[test]
    fn next_conn_id_is_monotonic_and_unique() {
        let config = RawConfig::default().validate().unwrap();
        let state = AppState::new(config);
        let a = state.next_conn_id();
        let b = state.next_conn_id();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[tokio::test]
    async fn registry_is_shared_across_clones() {
        let config = RawConfig::default().validate().unwrap();
        let state = AppState::new(config);
        let clone = state.clone();
        state.registry.new_or_refresh("k1").await;
        assert!(clone.registry.get("k1").await.is_ok());
    }
}
