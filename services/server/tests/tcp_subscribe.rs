//! End-to-end scenarios over the raw TCP subscribe protocol (spec §8):
//! basic fan-out, replay-before-attach, replay-skip, capacity eviction,
//! token auth, and heartbeat timeout.

use std::time::Duration;

use push_core::config::RawConfig;
use push_core::Message;
use push_protocol::{encode_message_frame, MessageEnvelope};
use server::state::AppState;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

fn config(
    addr: &str,
    admin_addr: &str,
    auth: bool,
    max_stored_message: usize,
) -> push_core::Config {
    RawConfig {
        addr: Some(addr.to_owned()),
        admin_addr: Some(admin_addr.to_owned()),
        auth: Some(u8::from(auth)),
        max_stored_message: Some(max_stored_message),
        heartbeat_sec: Some(1),
        ..Default::default()
    }
    .validate()
    .unwrap()
}

async fn spawn_tcp(state: AppState) {
    tokio::spawn(server::listeners::tcp::serve(state));
    // Give the listener a moment to bind before the first connect.
    tokio::time::sleep(Duration::from_millis(50)).await;
}

fn sub_frame(key: &str, mid: i64, heartbeat: Option<u64>, token: Option<&str>) -> Vec<u8> {
    let mut args = vec!["sub".to_owned(), key.to_owned(), mid.to_string()];
    if let Some(h) = heartbeat {
        args.push(h.to_string());
    } else if token.is_some() {
        args.push(String::new());
    }
    if let Some(t) = token {
        args.push(t.to_owned());
    }
    let mut buf = format!("*{}\r\n", args.len()).into_bytes();
    for a in &args {
        buf.extend_from_slice(format!("${}\r\n", a.len()).as_bytes());
        buf.extend_from_slice(a.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }
    buf
}

async fn expect_readiness_byte(reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>) {
    let mut byte = [0u8; 1];
    timeout(Duration::from_secs(1), reader.read_exact(&mut byte))
        .await
        .expect("readiness byte timed out")
        .unwrap();
    assert_eq!(byte[0], push_protocol::HEARTBEAT_BYTE);
}

async fn read_one_frame(
    reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
) -> MessageEnvelope {
    let mut header = Vec::new();
    loop {
        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte).await.unwrap();
        header.push(byte[0]);
        if header.ends_with(b"\r\n") {
            break;
        }
    }
    let declared: usize = std::str::from_utf8(&header[1..header.len() - 2])
        .unwrap()
        .parse()
        .unwrap();
    let mut body = vec![0u8; declared];
    reader.read_exact(&mut body).await.unwrap();
    let mut crlf = [0u8; 2];
    reader.read_exact(&mut crlf).await.unwrap();
    assert_eq!(&crlf, b"\r\n");
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn basic_fan_out_delivers_exact_frame() {
    let state = AppState::new(config("127.0.0.1:18070", "127.0.0.1:18071", false, 20));
    spawn_tcp(state.clone()).await;

    let stream = TcpStream::connect("127.0.0.1:18070").await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    write_half
        .write_all(&sub_frame("k1", 0, Some(1), None))
        .await
        .unwrap();
    expect_readiness_byte(&mut reader).await;

    let channel = state.registry.get("k1").await.unwrap();
    channel
        .push(Message::new("hi", 1, i64::MAX))
        .await
        .unwrap();

    let envelope = MessageEnvelope {
        msg: "hi".to_owned(),
        mid: 1,
    };
    let expected = encode_message_frame(&envelope).unwrap();

    let mut got = vec![0u8; expected.len()];
    timeout(Duration::from_secs(1), reader.read_exact(&mut got))
        .await
        .expect("frame timed out")
        .unwrap();
    assert_eq!(got, expected);
}

#[tokio::test]
async fn replay_delivers_messages_stored_before_attach() {
    let state = AppState::new(config("127.0.0.1:18072", "127.0.0.1:18073", false, 20));
    let channel = state.registry.new_or_refresh("k1").await;
    channel.push(Message::new("a", 5, i64::MAX)).await.unwrap();
    channel.push(Message::new("b", 7, i64::MAX)).await.unwrap();

    spawn_tcp(state.clone()).await;
    let stream = TcpStream::connect("127.0.0.1:18072").await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    write_half
        .write_all(&sub_frame("k1", 0, Some(1), None))
        .await
        .unwrap();
    expect_readiness_byte(&mut reader).await;

    let first = read_one_frame(&mut reader).await;
    let second = read_one_frame(&mut reader).await;
    assert_eq!(first.mid, 5);
    assert_eq!(second.mid, 7);
}

#[tokio::test]
async fn replay_skips_messages_at_or_below_requested_mid() {
    let state = AppState::new(config("127.0.0.1:18074", "127.0.0.1:18075", false, 20));
    let channel = state.registry.new_or_refresh("k1").await;
    channel.push(Message::new("a", 5, i64::MAX)).await.unwrap();
    channel.push(Message::new("b", 7, i64::MAX)).await.unwrap();

    spawn_tcp(state.clone()).await;
    let stream = TcpStream::connect("127.0.0.1:18074").await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    write_half
        .write_all(&sub_frame("k1", 5, Some(1), None))
        .await
        .unwrap();
    expect_readiness_byte(&mut reader).await;

    let only = read_one_frame(&mut reader).await;
    assert_eq!(only.mid, 7);
}

#[tokio::test]
async fn capacity_eviction_keeps_only_most_recent_messages() {
    let state = AppState::new(config("127.0.0.1:18076", "127.0.0.1:18077", false, 3));
    let channel = state.registry.new_or_refresh("k1").await;
    for mid in 1..=4 {
        channel
            .push(Message::new(format!("m{mid}"), mid, i64::MAX))
            .await
            .unwrap();
    }

    spawn_tcp(state.clone()).await;
    let stream = TcpStream::connect("127.0.0.1:18076").await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    write_half
        .write_all(&sub_frame("k1", 0, Some(1), None))
        .await
        .unwrap();
    expect_readiness_byte(&mut reader).await;

    let mut received = Vec::new();
    for _ in 0..3 {
        received.push(read_one_frame(&mut reader).await.mid);
    }
    assert_eq!(received, vec![2, 3, 4]);
}

#[tokio::test]
async fn token_auth_round_trip_and_single_use() {
    let state = AppState::new(config("127.0.0.1:18078", "127.0.0.1:18079", true, 20));
    let channel = state.registry.new_or_refresh("k1").await;
    channel.add_token("tok-1").await.unwrap();

    spawn_tcp(state.clone()).await;

    let stream = TcpStream::connect("127.0.0.1:18078").await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    write_half
        .write_all(&sub_frame("k1", 0, Some(1), Some("tok-1")))
        .await
        .unwrap();
    expect_readiness_byte(&mut reader).await;

    let stream2 = TcpStream::connect("127.0.0.1:18078").await.unwrap();
    let (read_half2, mut write_half2) = stream2.into_split();
    let mut reader2 = BufReader::new(read_half2);
    write_half2
        .write_all(&sub_frame("k1", 0, Some(1), Some("tok-1")))
        .await
        .unwrap();

    // Reused token: auth fails, so the connection closes without ever
    // writing the readiness byte.
    let mut byte = [0u8; 1];
    let result = timeout(Duration::from_millis(300), reader2.read_exact(&mut byte)).await;
    assert!(result.is_err() || result.unwrap().map(|n| n == 0).unwrap_or(true));
}

#[tokio::test]
async fn heartbeat_timeout_detaches_idle_connection() {
    let state = AppState::new(config("127.0.0.1:18080", "127.0.0.1:18081", false, 20));
    spawn_tcp(state.clone()).await;

    let stream = TcpStream::connect("127.0.0.1:18080").await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    write_half
        .write_all(&sub_frame("k1", 0, Some(1), None))
        .await
        .unwrap();
    expect_readiness_byte(&mut reader).await;

    // Never send a heartbeat reply; the server's read deadline is 2x the
    // configured 1s heartbeat, so the connection is dropped within ~3s.
    tokio::time::sleep(Duration::from_secs(3)).await;

    let mut byte = [0u8; 1];
    let result = timeout(Duration::from_millis(200), reader.read_exact(&mut byte)).await;
    assert!(result.is_err() || result.unwrap().map(|n| n == 0).unwrap_or(true));
}
