//! The same basic fan-out scenario as `tcp_subscribe.rs`, over the
//! WebSocket transport (spec §8), confirming no readiness byte is sent and
//! the heartbeat exchange uses `h` text frames instead of a bare byte.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use push_core::config::RawConfig;
use push_core::Message;
use server::state::AppState;
use tokio_tungstenite::tungstenite::Message as WsMessage;

fn config(addr: &str, admin_addr: &str) -> push_core::Config {
    RawConfig {
        addr: Some(addr.to_owned()),
        admin_addr: Some(admin_addr.to_owned()),
        auth: Some(0),
        protocol: Some(0),
        heartbeat_sec: Some(1),
        ..Default::default()
    }
    .validate()
    .unwrap()
}

async fn spawn_ws(state: AppState) {
    let router = server::build_subscribe_router(state.clone());
    let listener = tokio::net::TcpListener::bind(&state.config.addr)
        .await
        .unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn basic_fan_out_over_websocket() {
    let state = AppState::new(config("127.0.0.1:18090", "127.0.0.1:18091"));
    spawn_ws(state.clone()).await;

    let url = "ws://127.0.0.1:18090/sub?key=k1&mid=0&heartbeat=1";
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();

    let channel = state.registry.get("k1").await.unwrap();
    channel
        .push(Message::new("hi", 1, i64::MAX))
        .await
        .unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(1), ws.next())
        .await
        .expect("no frame received")
        .expect("stream ended")
        .unwrap();
    let WsMessage::Text(text) = frame else {
        panic!("expected a text frame, got {frame:?}");
    };
    let envelope: push_protocol::MessageEnvelope = serde_json::from_str(&text).unwrap();
    assert_eq!(envelope.msg, "hi");
    assert_eq!(envelope.mid, 1);

    // The server waits for our heartbeat and replies in kind.
    ws.send(WsMessage::Text("h".to_owned())).await.unwrap();
    let reply = tokio::time::timeout(Duration::from_secs(1), ws.next())
        .await
        .expect("no heartbeat reply")
        .expect("stream ended")
        .unwrap();
    assert_eq!(reply, WsMessage::Text("h".to_owned()));
}
