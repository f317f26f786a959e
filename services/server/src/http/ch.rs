//! `GET /ch?key=&token=` — issues a single-use subscribe token (spec §6).
//! Only mounted when `config.auth` is enabled. Grounded on
//! `original_source/pubsub.go`'s `ChannelHandle`.

use axum::extract::{Query, State};
use axum::Json;
use push_protocol::{ret_codes, ControlEnvelope};
use serde::Deserialize;
use tracing::warn;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChannelQuery {
    key: String,
    token: String,
}

pub async fn add_token(
    State(state): State<AppState>,
    Query(query): Query<ChannelQuery>,
) -> Json<ControlEnvelope> {
    if query.key.is_empty() || query.token.is_empty() {
        return Json(ControlEnvelope::new("param error", ret_codes::PARAM_ERR));
    }

    let channel = state.registry.new_or_refresh(&query.key).await;
    if let Err(err) = channel.add_token(&query.token).await {
        warn!(key = query.key, %err, "ch: add_token failed");
        return Json(ControlEnvelope::new(
            "add token failed",
            ret_codes::ADD_TOKEN,
        ));
    }

    Json(ControlEnvelope::ok("ok"))
}
