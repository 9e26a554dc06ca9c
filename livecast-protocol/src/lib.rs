//! Network protocol definitions for the livecast session server.
//!
//! This crate defines the binary protocol spoken between the livecast
//! server and its viewing clients. Beyond the handshake and keep-alive,
//! the server pushes change notifications (channel list, recordings,
//! timers) that tell clients to reload their views.
//!
//! # Frame Format
//!
//! ```text
//! +--------+--------+--------+------------------+
//! | Magic  | Length | Type   |     Payload      |
//! | "LCST" | u32 LE | u16 LE |    (variable)    |
//! +--------+--------+--------+------------------+
//! | 4 bytes| 4 bytes| 2 bytes|  Length bytes    |
//! ```
//!
//! # Example
//!
//! ```rust
//! use livecast_protocol::{encode_server_message, decode_header, decode_server_message, ServerMessage, HEADER_SIZE};
//! use bytes::Bytes;
//!
//! let encoded = encode_server_message(&ServerMessage::ChannelListChanged).unwrap();
//! let header = decode_header(&encoded).unwrap().unwrap();
//! let payload = Bytes::copy_from_slice(&encoded[HEADER_SIZE..]);
//! let decoded = decode_server_message(header.message_type, payload).unwrap();
//! assert_eq!(decoded, ServerMessage::ChannelListChanged);
//! ```

pub mod codec;
pub mod error;
pub mod types;

pub use codec::{
    decode_client_message, decode_header, decode_server_message, encode_client_message,
    encode_server_message, FrameHeader, HEADER_SIZE,
};
pub use error::{ErrorCode, ProtocolError};
pub use types::{ClientMessage, MessageType, ServerMessage, MAGIC, MAX_FRAME_SIZE, PROTOCOL_VERSION};
