use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::FrameError;

/// The JSON body delivered to a subscriber for each live or replayed message.
///
/// Only `msg` and `mid` cross the wire — a message's expiry deadline is
/// server-internal bookkeeping and is never serialized to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub msg: String,
    pub mid: i64,
}

/// Wraps a serialized [`MessageEnvelope`] in the TCP length-prefixed frame:
/// `$<N>\r\n<N JSON bytes>\r\n`.
pub fn encode_message_frame(envelope: &MessageEnvelope) -> Result<Vec<u8>, FrameError> {
    let json = serde_json::to_vec(envelope)?;
    let mut out = Vec::with_capacity(json.len() + 16);
    out.push(b'$');
    out.extend_from_slice(json.len().to_string().as_bytes());
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&json);
    out.extend_from_slice(b"\r\n");
    Ok(out)
}

/// Like [`encode_message_frame`] but writes into a caller-supplied, reusable
/// buffer instead of allocating a fresh `Vec` — the shape a pooled write
/// buffer on the fan-out hot path needs (spec's per-channel write-buffer
/// pool). `out` is appended to, not cleared; callers own that policy.
pub fn encode_message_frame_into(out: &mut BytesMut, envelope: &MessageEnvelope) -> Result<(), FrameError> {
    let json = serde_json::to_vec(envelope)?;
    out.put_u8(b'$');
    out.extend_from_slice(json.len().to_string().as_bytes());
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&json);
    out.extend_from_slice(b"\r\n");
    Ok(())
}

/// Parses a complete `$<N>\r\n<N JSON bytes>\r\n` frame back into a
/// [`MessageEnvelope`]. Used by tests to assert the round trip; production
/// code only ever encodes (subscribers never send message frames to us).
pub fn decode_message_frame(bytes: &[u8]) -> Result<MessageEnvelope, FrameError> {
    if bytes.first() != Some(&b'$') {
        return Err(FrameError::InvalidPrefix {
            expected: '$',
            found: bytes.first().map(|b| *b as char).unwrap_or('\0'),
        });
    }
    let header_end = bytes
        .windows(2)
        .position(|w| w == b"\r\n")
        .ok_or(FrameError::UnexpectedEof)?;
    let len: usize = std::str::from_utf8(&bytes[1..header_end])
        .map_err(|_| FrameError::InvalidUtf8)?
        .parse()
        .map_err(|e| FrameError::InvalidLength(format!("{e}")))?;
    let body_start = header_end + 2;
    let body_end = body_start + len;
    let total_expected = body_end + 2;
    if bytes.len() < total_expected {
        return Err(FrameError::LengthMismatch {
            declared: len,
            actual: bytes.len().saturating_sub(body_start),
        });
    }
    if &bytes[body_end..total_expected] != b"\r\n" {
        return Err(FrameError::LengthMismatch {
            declared: len,
            actual: body_end - body_start,
        });
    }
    let envelope = serde_json::from_slice(&bytes[body_start..body_end])?;
    Ok(envelope)
}
