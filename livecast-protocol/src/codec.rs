//! Codec for encoding and decoding protocol messages.
//!
//! Frame format:
//! ```text
//! +--------+--------+--------+------------------+
//! | Magic  | Length | Type   |     Payload      |
//! | "LCST" | u32 LE | u16 LE |    (variable)    |
//! +--------+--------+--------+------------------+
//! | 4 bytes| 4 bytes| 2 bytes|  Length bytes    |
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::types::*;

/// Frame header size: 4 (magic) + 4 (length) + 2 (type) = 10 bytes.
pub const HEADER_SIZE: usize = 10;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Payload length in bytes.
    pub payload_len: u32,
    /// Message type.
    pub message_type: MessageType,
}

/// Encode a client message into bytes.
pub fn encode_client_message(msg: &ClientMessage) -> Result<Bytes, ProtocolError> {
    let mut payload = BytesMut::new();

    match msg {
        ClientMessage::Hello { version, client_name } => {
            payload.put_u16_le(*version);
            encode_string(&mut payload, client_name);
        }
        ClientMessage::Ping => {
            // Empty payload
        }
    }

    encode_frame(msg.message_type(), payload.freeze())
}

/// Encode a server message into bytes.
pub fn encode_server_message(msg: &ServerMessage) -> Result<Bytes, ProtocolError> {
    let mut payload = BytesMut::new();

    match msg {
        ServerMessage::HelloAck {
            version,
            session_id,
            success,
        } => {
            payload.put_u16_le(*version);
            payload.put_u32_le(*session_id);
            payload.put_u8(if *success { 1 } else { 0 });
        }
        ServerMessage::Pong
        | ServerMessage::ChannelListChanged
        | ServerMessage::RecordingsChanged
        | ServerMessage::TimersChanged => {
            // Empty payload
        }
        ServerMessage::Error { error_code, message } => {
            payload.put_u16_le(*error_code);
            encode_string(&mut payload, message);
        }
    }

    encode_frame(msg.message_type(), payload.freeze())
}

/// Encode a frame with magic, length, type, and payload.
fn encode_frame(msg_type: MessageType, payload: Bytes) -> Result<Bytes, ProtocolError> {
    let payload_len = payload.len() as u32;
    if payload_len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload_len, MAX_FRAME_SIZE));
    }

    let mut frame = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    frame.put_slice(&MAGIC);
    frame.put_u32_le(payload_len);
    frame.put_u16_le(msg_type.into());
    frame.put_slice(&payload);

    Ok(frame.freeze())
}

fn encode_string(buf: &mut BytesMut, s: &str) {
    let bytes = s.as_bytes();
    let len = bytes.len().min(u16::MAX as usize);
    buf.put_u16_le(len as u16);
    buf.put_slice(&bytes[..len]);
}

fn decode_string(buf: &mut Bytes) -> Result<String, ProtocolError> {
    ensure_remaining(buf, 2)?;
    let len = buf.get_u16_le() as usize;
    ensure_remaining(buf, len)?;
    let bytes = buf.copy_to_bytes(len);
    String::from_utf8(bytes.to_vec()).map_err(|e| ProtocolError::DecodeError(e.to_string()))
}

fn ensure_remaining(buf: &Bytes, expected: usize) -> Result<(), ProtocolError> {
    if buf.remaining() < expected {
        return Err(ProtocolError::IncompleteFrame {
            expected,
            actual: buf.remaining(),
        });
    }
    Ok(())
}

/// Decode a frame header.
///
/// Returns `Ok(None)` if the buffer does not yet hold a complete header.
pub fn decode_header(buf: &[u8]) -> Result<Option<FrameHeader>, ProtocolError> {
    if buf.len() < HEADER_SIZE {
        return Ok(None);
    }

    // Check magic
    let magic = [buf[0], buf[1], buf[2], buf[3]];
    if magic != MAGIC {
        return Err(ProtocolError::InvalidMagic(magic));
    }

    // Read length
    let payload_len = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
    if payload_len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload_len, MAX_FRAME_SIZE));
    }

    // Read message type
    let type_val = u16::from_le_bytes([buf[8], buf[9]]);
    let message_type =
        MessageType::try_from(type_val).map_err(ProtocolError::UnknownMessageType)?;

    Ok(Some(FrameHeader {
        payload_len,
        message_type,
    }))
}

/// Decode a client message from a frame payload.
/// The buffer should start at the payload (after the header).
pub fn decode_client_message(
    msg_type: MessageType,
    mut payload: Bytes,
) -> Result<ClientMessage, ProtocolError> {
    match msg_type {
        MessageType::Hello => {
            ensure_remaining(&payload, 2)?;
            let version = payload.get_u16_le();
            let client_name = decode_string(&mut payload)?;
            Ok(ClientMessage::Hello {
                version,
                client_name,
            })
        }
        MessageType::Ping => Ok(ClientMessage::Ping),
        other => Err(ProtocolError::UnexpectedMessageType(other.into())),
    }
}

/// Decode a server message from a frame payload.
/// The buffer should start at the payload (after the header).
pub fn decode_server_message(
    msg_type: MessageType,
    mut payload: Bytes,
) -> Result<ServerMessage, ProtocolError> {
    match msg_type {
        MessageType::HelloAck => {
            ensure_remaining(&payload, 7)?;
            let version = payload.get_u16_le();
            let session_id = payload.get_u32_le();
            let success = payload.get_u8() != 0;
            Ok(ServerMessage::HelloAck {
                version,
                session_id,
                success,
            })
        }
        MessageType::Pong => Ok(ServerMessage::Pong),
        MessageType::ChannelListChanged => Ok(ServerMessage::ChannelListChanged),
        MessageType::RecordingsChanged => Ok(ServerMessage::RecordingsChanged),
        MessageType::TimersChanged => Ok(ServerMessage::TimersChanged),
        MessageType::Error => {
            ensure_remaining(&payload, 2)?;
            let error_code = payload.get_u16_le();
            let message = decode_string(&mut payload)?;
            Ok(ServerMessage::Error {
                error_code,
                message,
            })
        }
        other => Err(ProtocolError::UnexpectedMessageType(other.into())),
    }
}
