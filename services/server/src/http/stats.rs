//! `GET /stat?type=memory|server|golang|config` — best-effort process
//! counters, flattened into the same `{msg,ret}`-shaped JSON the rest of the
//! admin API uses. Grounded on `original_source/stat.go`, deliberately
//! shallow: no allocator/runtime profiling, just what `std`/`tokio` expose
//! cheaply.

use std::collections::HashMap;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StatQuery {
    #[serde(rename = "type")]
    kind: Option<String>,
}

pub async fn stat(State(state): State<AppState>, Query(query): Query<StatQuery>) -> Json<Value> {
    let uptime_sec = (push_core::now_ns() - state.started_at_ns) / 1_000_000_000;

    let body = match query.kind.as_deref() {
        Some("config") => config_stats(&state),
        Some("golang") => runtime_stats(),
        Some("memory") => memory_stats(),
        _ => server_stats(&state, uptime_sec),
    };

    Json(json!({ "msg": "ok", "ret": 0, "data": body }))
}

fn server_stats(state: &AppState, uptime_sec: i64) -> Value {
    json!({
        "uptime_sec": uptime_sec,
        "node": state.config.node,
        "addr": state.config.addr,
        "admin_addr": state.config.admin_addr,
        "protocol": format!("{:?}", state.config.protocol),
        "channel_type": format!("{:?}", state.config.channel_type),
    })
}

fn runtime_stats() -> Value {
    json!({
        "rust_target": std::env::consts::ARCH,
        "os": std::env::consts::OS,
        "num_cpus": std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1),
    })
}

fn memory_stats() -> Value {
    // Process-level allocator stats aren't exposed by std; this endpoint
    // reports what's cheaply available rather than pulling in a profiling
    // dependency for a best-effort admin counter.
    let pid = std::process::id();
    json!({ "pid": pid })
}

fn config_stats(state: &AppState) -> Value {
    let redis: HashMap<&String, &str> = state
        .config
        .redis
        .iter()
        .map(|(name, node)| (name, node.addr.as_str()))
        .collect();

    json!({
        "addr": state.config.addr,
        "admin_addr": state.config.admin_addr,
        "node": state.config.node,
        "message_expire_sec": state.config.message_expire_sec,
        "channel_expire_sec": state.config.channel_expire_sec,
        "max_stored_message": state.config.max_stored_message,
        "max_subscriber_per_key": state.config.max_subscriber_per_key,
        "channel_bucket": state.config.channel_bucket,
        "heartbeat_sec": state.config.heartbeat_sec,
        "auth": state.config.auth,
        "protocol": format!("{:?}", state.config.protocol),
        "channel_type": format!("{:?}", state.config.channel_type),
        "redis": redis,
        "debug": state.config.debug,
    })
}
