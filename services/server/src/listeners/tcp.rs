//! The custom framed TCP listener (spec §4.6/§4.9): accept loop, per-socket
//! option tuning, and the TCP half of the Subscribe Session Loop. Grounded on
//! `original_source/pubsub_tcp.go`'s `StartTCP`/`handleTCPConn`.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use push_core::pool::BufferPool;
use push_protocol::{
    encode_message_frame_into, read_request_args, FrameError, MessageEnvelope, SubscribeRequest,
    HEARTBEAT_BYTE,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::session::{self, HeartbeatEvent, HeartbeatIo, SubscribeParams};
use crate::state::AppState;

/// The first-packet read deadline applied before a subscribe request has
/// even been parsed, so idle port-scanners don't tie up a worker forever.
const FIRST_PACKET_DEADLINE: Duration = Duration::from_secs(5);

pub async fn serve(state: AppState) -> io::Result<()> {
    let listener = TcpListener::bind(&state.config.addr).await?;
    info!(addr = %state.config.addr, "tcp subscribe listener started");

    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                warn!(%err, "tcp accept failed");
                continue;
            }
        };
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(socket, &state).await {
                warn!(%peer, %err, "tcp subscribe connection ended with error");
            }
        });
    }
}

fn tune_socket(stream: &TcpStream, state: &AppState) -> io::Result<()> {
    let sock_ref = socket2::SockRef::from(stream);
    sock_ref.set_keepalive(state.config.tcp_keepalive)?;
    sock_ref.set_recv_buffer_size(state.config.read_buf_byte)?;
    sock_ref.set_send_buffer_size(state.config.write_buf_byte)?;
    Ok(())
}

async fn handle_connection(stream: TcpStream, state: &AppState) -> io::Result<()> {
    tune_socket(&stream, state)?;

    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::with_capacity(state.config.read_buf_byte, read_half);

    let args = match tokio::time::timeout(FIRST_PACKET_DEADLINE, read_request_args(&mut reader))
        .await
    {
        Ok(Ok(args)) => args,
        Ok(Err(err)) => {
            warn!(%err, "tcp: malformed subscribe frame, closing");
            return Ok(());
        }
        Err(_) => {
            warn!("tcp: no request within first-packet deadline, closing");
            return Ok(());
        }
    };

    let request = match SubscribeRequest::parse(&args) {
        Ok(req) => req,
        Err(FrameError::UnknownCommand(cmd)) => {
            warn!(cmd, "tcp: unknown command, closing");
            return Ok(());
        }
        Err(err) => {
            warn!(%err, "tcp: bad subscribe command, closing");
            return Ok(());
        }
    };

    let Some(heartbeat_sec) =
        session::effective_heartbeat_sec(request.heartbeat_sec, state.config.heartbeat_sec)
    else {
        warn!(key = request.key, "tcp: non-positive heartbeat rejected");
        return Ok(());
    };

    let sink: Arc<dyn push_core::MessageSink> = Arc::new(TcpSink {
        writer: Mutex::new(write_half),
        buffer_pool: state.buffer_pool.clone(),
    });

    let conn = state.next_conn_id();
    let io = TcpHeartbeatIo {
        reader,
        sink: sink.clone(),
    };
    session::run(
        state,
        conn,
        SubscribeParams {
            key: request.key,
            mid: request.mid,
            heartbeat_sec,
            token: request.token,
            emit_readiness: true,
        },
        sink,
        io,
    )
    .await;
    Ok(())
}

struct TcpSink {
    writer: Mutex<OwnedWriteHalf>,
    buffer_pool: Arc<BufferPool>,
}

#[async_trait]
impl push_core::MessageSink for TcpSink {
    async fn write_message(&self, envelope: &MessageEnvelope) -> io::Result<()> {
        let mut buf = self.buffer_pool.acquire().await;
        let result = encode_message_frame_into(&mut buf, envelope)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()));
        let write_result = match result {
            Ok(()) => self.writer.lock().await.write_all(&buf).await,
            Err(err) => Err(err),
        };
        self.buffer_pool.release(buf).await;
        write_result
    }

    async fn write_heartbeat(&self) -> io::Result<()> {
        self.writer.lock().await.write_all(&[HEARTBEAT_BYTE]).await
    }
}

struct TcpHeartbeatIo {
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    sink: Arc<dyn push_core::MessageSink>,
}

#[async_trait]
impl HeartbeatIo for TcpHeartbeatIo {
    async fn wait_heartbeat(&mut self, read_deadline: Duration) -> HeartbeatEvent {
        let mut byte = [0u8; 1];
        match tokio::time::timeout(read_deadline, self.reader.read_exact(&mut byte)).await {
            Ok(Ok(0)) => HeartbeatEvent::Disconnected,
            Ok(Ok(_)) if byte[0] == HEARTBEAT_BYTE => HeartbeatEvent::Received,
            Ok(Ok(_)) => HeartbeatEvent::BadFrame,
            Ok(Err(_)) => HeartbeatEvent::Disconnected,
            Err(_) => HeartbeatEvent::Disconnected,
        }
    }

    async fn reply_heartbeat(&mut self) -> bool {
        self.sink.write_heartbeat().await.is_ok()
    }
}
