//! The WebSocket half of the subscribe protocol: upgrade at `/sub`, query
//! parameters `key`, `mid`, `heartbeat`, `token` (spec §6). Grounded on
//! `original_source/pubsub_http.go`'s `SubscribeHandle` for parameter
//! semantics; the readiness byte step is intentionally *not* sent here
//! (spec §4.7 step 6 marks it TCP-only).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use push_protocol::{MessageEnvelope, HEARTBEAT_BYTE};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::warn;

use crate::session::{self, HeartbeatEvent, HeartbeatIo, SubscribeParams};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SubscribeQuery {
    key: String,
    mid: String,
    heartbeat: Option<u64>,
    token: Option<String>,
}

pub async fn sub_handler(
    State(state): State<AppState>,
    Query(query): Query<SubscribeQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query))
}

async fn handle_socket(socket: WebSocket, state: AppState, query: SubscribeQuery) {
    let Ok(mid) = query.mid.parse::<i64>() else {
        warn!(key = query.key, mid = query.mid, "ws: invalid mid, closing");
        return;
    };
    let Some(heartbeat_sec) =
        session::effective_heartbeat_sec(query.heartbeat, state.config.heartbeat_sec)
    else {
        warn!(key = query.key, "ws: non-positive heartbeat rejected");
        return;
    };

    let (write, read) = socket.split();
    let sink: Arc<dyn push_core::MessageSink> = Arc::new(WsSink {
        write: Mutex::new(write),
    });

    let conn = state.next_conn_id();
    let io = WsHeartbeatIo {
        read,
        sink: sink.clone(),
    };
    session::run(
        &state,
        conn,
        SubscribeParams {
            key: query.key,
            mid,
            heartbeat_sec,
            token: query.token,
            emit_readiness: false,
        },
        sink,
        io,
    )
    .await;
}

struct WsSink {
    write: Mutex<futures_util::stream::SplitSink<WebSocket, Message>>,
}

#[async_trait]
impl push_core::MessageSink for WsSink {
    async fn write_message(&self, envelope: &MessageEnvelope) -> std::io::Result<()> {
        let json = serde_json::to_string(envelope)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
        self.write
            .lock()
            .await
            .send(Message::Text(json))
            .await
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::BrokenPipe, err.to_string()))
    }

    async fn write_heartbeat(&self) -> std::io::Result<()> {
        self.write
            .lock()
            .await
            .send(Message::Text(String::from_utf8_lossy(&[HEARTBEAT_BYTE]).into_owned()))
            .await
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::BrokenPipe, err.to_string()))
    }
}

struct WsHeartbeatIo {
    read: futures_util::stream::SplitStream<WebSocket>,
    sink: Arc<dyn push_core::MessageSink>,
}

#[async_trait]
impl HeartbeatIo for WsHeartbeatIo {
    async fn wait_heartbeat(&mut self, read_deadline: Duration) -> HeartbeatEvent {
        let deadline = tokio::time::Instant::now() + read_deadline;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout_at(deadline, self.read.next()).await {
                Ok(Some(Ok(Message::Text(text)))) if text == "h" => {
                    return HeartbeatEvent::Received
                }
                Ok(Some(Ok(Message::Binary(bytes)))) if bytes.as_slice() == [HEARTBEAT_BYTE] => {
                    return HeartbeatEvent::Received
                }
                // Ping/Pong are handled transparently by the websocket layer;
                // they don't count as the client's `h` heartbeat, but seeing
                // one shouldn't tear the connection down either.
                Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => {
                    if remaining.is_zero() {
                        return HeartbeatEvent::Disconnected;
                    }
                    continue;
                }
                Ok(Some(Ok(Message::Close(_)))) | Ok(None) => return HeartbeatEvent::Disconnected,
                Ok(Some(Ok(_))) => return HeartbeatEvent::BadFrame,
                Ok(Some(Err(_))) => return HeartbeatEvent::Disconnected,
                Err(_) => return HeartbeatEvent::Disconnected,
            }
        }
    }

    async fn reply_heartbeat(&mut self) -> bool {
        self.sink.write_heartbeat().await.is_ok()
    }
}
