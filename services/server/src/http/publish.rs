//! `POST /pub?key=&mid=&expire=` — the Publish Handler (spec §4.8). Grounded
//! on `original_source/pubsub.go`'s `PublishHandle`.

use axum::extract::{Query, State};
use axum::Json;
use push_core::Message;
use push_protocol::{ret_codes, ControlEnvelope};
use serde::Deserialize;
use tracing::warn;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PublishQuery {
    key: String,
    mid: String,
    expire: Option<String>,
}

pub async fn publish(
    State(state): State<AppState>,
    Query(query): Query<PublishQuery>,
    body: axum::body::Bytes,
) -> Json<ControlEnvelope> {
    let Ok(mid) = query.mid.parse::<i64>() else {
        return Json(ControlEnvelope::new("param error", ret_codes::PARAM_ERR));
    };

    let requested_expire_sec = query
        .expire
        .as_deref()
        .and_then(|s| s.parse::<i64>().ok())
        .unwrap_or(0);
    let effective_expire_sec = requested_expire_sec.max(state.config.message_expire_sec);
    let expire_ns = push_core::now_ns() + effective_expire_sec.saturating_mul(1_000_000_000);

    let payload = String::from_utf8_lossy(&body).into_owned();

    let channel = match state.registry.get(&query.key).await {
        Ok(channel) => channel,
        Err(err) => {
            warn!(key = query.key, %err, "publish: channel not found");
            return Json(ControlEnvelope::new(
                "can't get a channel",
                ret_codes::GET_CHANNEL,
            ));
        }
    };

    if let Err(err) = channel
        .push(Message::new(payload, mid, expire_ns))
        .await
    {
        warn!(key = query.key, mid, %err, "publish: push failed");
        return Json(ControlEnvelope::new("push msg failed", ret_codes::PUSH_MSG));
    }

    Json(ControlEnvelope::ok("ok"))
}
