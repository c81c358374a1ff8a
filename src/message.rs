//! Module that contains the messages sent between neighbours and their wire codec.

use crate::ring::ProcessId;
use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use std::{error::Error, fmt, io};
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

/// Maximum length in bytes of one encoded message, newline excluded.
pub const MAX_FRAME_LENGTH: usize = 1024;

/// Enum that represents the messages that travel on a channel.
///
/// Encoded as one JSON object per line, tagged by the `message` field:
/// `{"message":"token","sender":1,"receiver":2}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "message", rename_all = "snake_case")]
pub enum Message {
    Token {
        sender: ProcessId,
        receiver: ProcessId,
    },
    Marker {
        sender: ProcessId,
        receiver: ProcessId,
        snapshot_id: u64,
        initiator: ProcessId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Token,
    Marker,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token => write!(f, "token"),
            Self::Marker => write!(f, "marker"),
        }
    }
}

impl Message {
    /// Function that creates a token addressed to `receiver`.
    pub fn token(sender: ProcessId, receiver: ProcessId) -> Self {
        Self::Token { sender, receiver }
    }

    /// Function that creates a marker for snapshot `snapshot_id` addressed to `receiver`.
    pub fn marker(
        sender: ProcessId,
        receiver: ProcessId,
        snapshot_id: u64,
        initiator: ProcessId,
    ) -> Self {
        Self::Marker {
            sender,
            receiver,
            snapshot_id,
            initiator,
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Token { .. } => MessageKind::Token,
            Self::Marker { .. } => MessageKind::Marker,
        }
    }

    pub fn sender(&self) -> ProcessId {
        match self {
            Self::Token { sender, .. } | Self::Marker { sender, .. } => *sender,
        }
    }

    pub fn receiver(&self) -> ProcessId {
        match self {
            Self::Token { receiver, .. } | Self::Marker { receiver, .. } => *receiver,
        }
    }

    /// Function that returns the same message re-addressed from `sender` to `receiver`.
    pub fn relay(&self, sender: ProcessId, receiver: ProcessId) -> Self {
        match self {
            Self::Token { .. } => Self::token(sender, receiver),
            Self::Marker {
                snapshot_id,
                initiator,
                ..
            } => Self::marker(sender, receiver, *snapshot_id, *initiator),
        }
    }

    /// Function that returns the message as a JSON formatted `String`.
    pub fn to_json_string(&self) -> Result<String, Box<dyn Error + Send + Sync>> {
        Ok(serde_json::to_string(self)?)
    }

    /// Function that parses a message from a JSON formatted `String`.
    pub fn from_json_string(line: &str) -> Result<Self, Box<dyn Error + Send + Sync>> {
        Ok(serde_json::from_str::<Self>(line)?)
    }
}

/// Enum that represents one decoded line of a channel.
///
/// Undecodable lines are surfaced instead of failing the stream so the receive loop
/// can drop them and keep reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Message(Message),
    Malformed(String),
}

/// Codec that frames messages as newline-delimited JSON with a bounded line length.
#[derive(Debug, Clone)]
pub struct MessageCodec {
    lines: LinesCodec,
}

impl MessageCodec {
    pub fn new() -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(MAX_FRAME_LENGTH),
        }
    }

    fn frame(result: Result<Option<String>, LinesCodecError>) -> Result<Option<Frame>, io::Error> {
        match result {
            Ok(Some(line)) => Ok(Some(match Message::from_json_string(&line) {
                Ok(message) => Frame::Message(message),
                Err(e) => Frame::Malformed(format!("{e}: {line}")),
            })),
            Ok(None) => Ok(None),
            // the inner codec skips to the next newline on its own
            Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(Frame::Malformed(format!(
                "line longer than {MAX_FRAME_LENGTH} bytes"
            )))),
            // the inner codec has already consumed a line that is not UTF-8
            Err(LinesCodecError::Io(e)) if e.kind() == io::ErrorKind::InvalidData => {
                Ok(Some(Frame::Malformed(e.to_string())))
            }
            Err(LinesCodecError::Io(e)) => Err(e),
        }
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for MessageCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, io::Error> {
        Self::frame(self.lines.decode(src))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, io::Error> {
        Self::frame(self.lines.decode_eof(src))
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = io::Error;

    fn encode(&mut self, message: Message, dst: &mut BytesMut) -> Result<(), io::Error> {
        let line = serde_json::to_string(&message)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.lines.encode(line, dst).map_err(|e| match e {
            LinesCodecError::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format_is_tagged_json() {
        let token = Message::token(1, 2);
        assert_eq!(
            token.to_json_string().unwrap(),
            r#"{"message":"token","sender":1,"receiver":2}"#
        );

        let marker = Message::from_json_string(
            r#"{"message":"marker","sender":3,"receiver":4,"snapshot_id":7,"initiator":3}"#,
        )
        .unwrap();
        assert_eq!(marker, Message::marker(3, 4, 7, 3));
        assert_eq!(marker.kind(), MessageKind::Marker);
    }

    #[test]
    fn relay_keeps_snapshot_fields() {
        let marker = Message::marker(3, 4, 7, 3);
        assert_eq!(marker.relay(4, 5), Message::marker(4, 5, 7, 3));
        assert_eq!(Message::token(1, 2).relay(2, 3), Message::token(2, 3));
    }

    #[test]
    fn codec_splits_lines_and_keeps_going_after_garbage() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(Message::token(1, 2), &mut buf).unwrap();
        buf.extend_from_slice(b"{\"message\":\"potato\"}\n");
        codec.encode(Message::marker(1, 2, 9, 1), &mut buf).unwrap();

        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Frame::Message(Message::token(1, 2)))
        );
        assert!(matches!(
            codec.decode(&mut buf).unwrap(),
            Some(Frame::Malformed(_))
        ));
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Frame::Message(Message::marker(1, 2, 9, 1)))
        );
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn oversized_line_is_dropped() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&vec![b'x'; MAX_FRAME_LENGTH + 10]);
        buf.extend_from_slice(b"\n");
        codec.encode(Message::token(5, 1), &mut buf).unwrap();

        assert!(matches!(
            codec.decode(&mut buf).unwrap(),
            Some(Frame::Malformed(_))
        ));
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Frame::Message(Message::token(5, 1)))
        );
    }

    #[test]
    fn invalid_utf8_line_is_dropped() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::from(&b"\xff\xfe garbage\n"[..]);
        codec.encode(Message::token(1, 2), &mut buf).unwrap();

        assert!(matches!(
            codec.decode(&mut buf).unwrap(),
            Some(Frame::Malformed(_))
        ));
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Frame::Message(Message::token(1, 2)))
        );
    }

    #[test]
    fn partial_line_waits_for_more_bytes() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::from(&br#"{"message":"token","sen"#[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"der\":2,\"receiver\":3}\n");
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Frame::Message(Message::token(2, 3)))
        );
    }
}
