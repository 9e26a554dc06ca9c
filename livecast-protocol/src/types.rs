//! Message type definitions for the livecast network protocol.

use serde::{Deserialize, Serialize};

/// Protocol version.
pub const PROTOCOL_VERSION: u16 = 1;

/// Magic bytes for frame header: "LCST".
pub const MAGIC: [u8; 4] = *b"LCST";

/// Maximum frame payload size (1 MB).
pub const MAX_FRAME_SIZE: u32 = 1024 * 1024;

/// Message type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum MessageType {
    // Handshake (0x00xx)
    /// Client hello with protocol version.
    Hello = 0x0001,
    /// Server hello response.
    HelloAck = 0x0002,

    // Notifications (0x06xx)
    /// The channel list changed on the server.
    ChannelListChanged = 0x0600,
    /// The recordings list changed on the server.
    RecordingsChanged = 0x0601,
    /// The timer list changed on the server.
    TimersChanged = 0x0602,

    // Misc (0xFFxx)
    /// Error response.
    Error = 0xFF00,
    /// Keep-alive ping.
    Ping = 0xFF01,
    /// Keep-alive pong.
    Pong = 0xFF02,
}

impl TryFrom<u16> for MessageType {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, u16> {
        match value {
            0x0001 => Ok(MessageType::Hello),
            0x0002 => Ok(MessageType::HelloAck),
            0x0600 => Ok(MessageType::ChannelListChanged),
            0x0601 => Ok(MessageType::RecordingsChanged),
            0x0602 => Ok(MessageType::TimersChanged),
            0xFF00 => Ok(MessageType::Error),
            0xFF01 => Ok(MessageType::Ping),
            0xFF02 => Ok(MessageType::Pong),
            _ => Err(value),
        }
    }
}

impl From<MessageType> for u16 {
    fn from(value: MessageType) -> Self {
        value as u16
    }
}

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Handshake with protocol version and a free-form client name.
    Hello { version: u16, client_name: String },
    /// Keep-alive ping.
    Ping,
}

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Handshake response carrying the id assigned to the session.
    HelloAck {
        version: u16,
        session_id: u32,
        success: bool,
    },
    /// Keep-alive pong.
    Pong,
    /// Clients should reload their channel list.
    ChannelListChanged,
    /// Clients should reload their recordings list.
    RecordingsChanged,
    /// Clients should reload their timers.
    TimersChanged,
    /// Error response.
    Error { error_code: u16, message: String },
}

impl ClientMessage {
    /// Returns the message type for this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            ClientMessage::Hello { .. } => MessageType::Hello,
            ClientMessage::Ping => MessageType::Ping,
        }
    }
}

impl ServerMessage {
    /// Returns the message type for this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            ServerMessage::HelloAck { .. } => MessageType::HelloAck,
            ServerMessage::Pong => MessageType::Pong,
            ServerMessage::ChannelListChanged => MessageType::ChannelListChanged,
            ServerMessage::RecordingsChanged => MessageType::RecordingsChanged,
            ServerMessage::TimersChanged => MessageType::TimersChanged,
            ServerMessage::Error { .. } => MessageType::Error,
        }
    }

    /// Whether this message is an unsolicited change notification.
    pub fn is_notification(&self) -> bool {
        matches!(
            self,
            ServerMessage::ChannelListChanged
                | ServerMessage::RecordingsChanged
                | ServerMessage::TimersChanged
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_from_u16() {
        assert_eq!(MessageType::try_from(0x0600), Ok(MessageType::ChannelListChanged));
        assert_eq!(MessageType::try_from(0xFF02), Ok(MessageType::Pong));
        assert_eq!(MessageType::try_from(0x1234), Err(0x1234));
    }

    #[test]
    fn test_notification_classification() {
        assert!(ServerMessage::TimersChanged.is_notification());
        assert!(ServerMessage::RecordingsChanged.is_notification());
        assert!(!ServerMessage::Pong.is_notification());
        assert!(!ServerMessage::HelloAck {
            version: PROTOCOL_VERSION,
            session_id: 1,
            success: true
        }
        .is_notification());
    }
}
