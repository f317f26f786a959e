//! Wire types and framing for the push service's subscriber protocols.
//!
//! The TCP transport frames every outbound message as `$<N>\r\n<N JSON bytes>\r\n`
//! and reads subscribe requests as `*<argc>\r\n$<len>\r\n<arg>\r\n...`. The
//! WebSocket transport carries the same JSON payloads unframed, one per
//! text/binary frame. Both transports exchange a bare `h` byte as heartbeat.

pub mod control;
pub mod error;
pub mod message;
pub mod request;

pub use control::{ret_codes, ControlEnvelope};
pub use error::FrameError;
pub use message::{decode_message_frame, encode_message_frame, encode_message_frame_into, MessageEnvelope};
pub use request::{read_request_args, SubscribeRequest};

/// The single-byte heartbeat exchanged in both directions once attached.
pub const HEARTBEAT_BYTE: u8 = b'h';
