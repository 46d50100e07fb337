//! Protocol Messages
//!
//! Routing envelope for client-gateway traffic over WebSocket binary messages.
//!
//! ```text
//! ┌──────────────┬─────────┬──────────────────┐
//! │ len: u16 BE  │ tag: u8 │ payload          │   len = 1 + payload.len()
//! └──────────────┴─────────┴──────────────────┘
//! ```
//!
//! A single WebSocket message may carry several frames back to back.
//! The gateway only decodes the payload of the control messages it handles
//! itself (authenticate, join-path); everything else is opaque.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_LEN: usize = 2;

/// Largest payload a single frame can describe.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize - 1;

// =============================================================================
// ROUTING TAGS
// =============================================================================

/// Routing tag carried in the first byte after the length prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Open a seek for a game.
    SeekRequest = 0,
    /// Direct match request to another player.
    MatchRequest = 1,
    /// Accept or cancel a sought game.
    SoughtGameProcess = 2,
    /// Move, pass, exchange, challenge.
    ClientGameplayEvent = 3,
    /// Full game history for a realm member (outbound).
    GameHistoryRefresher = 6,
    /// Error envelope (outbound).
    ErrorMessage = 7,
    /// Opponent's clock ran out.
    TimedOut = 13,
    /// Decline a direct match request.
    DeclineMatchRequest = 19,
    /// Chat line.
    ChatMessage = 20,
    /// Present a signed token.
    TokenSocketLogin = 40,
    /// Ask to join the realm behind a path.
    JoinPath = 41,
    /// Leave the current realm.
    UnjoinRealm = 42,
}

impl MessageType {
    /// Tag byte on the wire.
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Broker event kind for messages forwarded verbatim to the backend.
    ///
    /// `None` for messages the gateway handles itself or never receives.
    pub fn forward_kind(self) -> Option<&'static str> {
        match self {
            MessageType::SeekRequest => Some("seekRequest"),
            MessageType::MatchRequest => Some("matchRequest"),
            MessageType::DeclineMatchRequest => Some("declineMatchRequest"),
            MessageType::SoughtGameProcess => Some("soughtGameProcess"),
            MessageType::ClientGameplayEvent => Some("gameplayEvent"),
            MessageType::ChatMessage => Some("chatMessage"),
            MessageType::TimedOut => Some("timedOut"),
            MessageType::GameHistoryRefresher
            | MessageType::ErrorMessage
            | MessageType::TokenSocketLogin
            | MessageType::JoinPath
            | MessageType::UnjoinRealm => None,
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        Ok(match tag {
            0 => MessageType::SeekRequest,
            1 => MessageType::MatchRequest,
            2 => MessageType::SoughtGameProcess,
            3 => MessageType::ClientGameplayEvent,
            6 => MessageType::GameHistoryRefresher,
            7 => MessageType::ErrorMessage,
            13 => MessageType::TimedOut,
            19 => MessageType::DeclineMatchRequest,
            20 => MessageType::ChatMessage,
            40 => MessageType::TokenSocketLogin,
            41 => MessageType::JoinPath,
            42 => MessageType::UnjoinRealm,
            other => return Err(ProtocolError::UnknownTag(other)),
        })
    }
}

// =============================================================================
// FRAMES
// =============================================================================

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Buffer ended inside a length prefix.
    #[error("truncated frame header")]
    Truncated,
    /// Length prefix points past the end of the buffer, or is zero.
    #[error("frame length {declared} does not fit {available} available bytes")]
    LengthMismatch {
        /// Length from the prefix.
        declared: usize,
        /// Bytes left in the buffer.
        available: usize,
    },
    /// Payload too large for the length prefix.
    #[error("frame payload of {0} bytes is too large")]
    FrameTooLarge(usize),
    /// Routing tag not known to the gateway.
    #[error("message type {0} not handled")]
    UnknownTag(u8),
    /// Control payload could not be decoded.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

/// An inbound frame with its routing tag still raw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Routing tag byte.
    pub tag: u8,
    /// Payload after the tag.
    pub payload: Bytes,
}

impl RawFrame {
    /// Resolve the routing tag.
    pub fn message_type(&self) -> Result<MessageType, ProtocolError> {
        MessageType::try_from(self.tag)
    }
}

/// Split a WebSocket message into frames.
///
/// Fails on the first malformed envelope; frames before it are discarded
/// with the rest since the boundary of anything after is unknowable.
pub fn decode_frames(data: impl Into<Bytes>) -> Result<Vec<RawFrame>, ProtocolError> {
    let mut buf: Bytes = data.into();
    let mut frames = Vec::new();

    while buf.has_remaining() {
        if buf.remaining() < LENGTH_PREFIX_LEN {
            return Err(ProtocolError::Truncated);
        }
        let declared = buf.get_u16() as usize;
        if declared == 0 || declared > buf.remaining() {
            return Err(ProtocolError::LengthMismatch {
                declared,
                available: buf.remaining(),
            });
        }
        let mut body = buf.split_to(declared);
        let tag = body.get_u8();
        frames.push(RawFrame { tag, payload: body });
    }

    Ok(frames)
}

/// Build one outbound frame.
pub fn encode_frame(kind: MessageType, payload: &[u8]) -> Result<Bytes, ProtocolError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }
    let mut out = BytesMut::with_capacity(LENGTH_PREFIX_LEN + 1 + payload.len());
    out.put_u16((payload.len() + 1) as u16);
    out.put_u8(kind.tag());
    out.put_slice(payload);
    Ok(out.freeze())
}

// =============================================================================
// CONTROL PAYLOADS
// =============================================================================

/// Payload of [`MessageType::TokenSocketLogin`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSocketLogin {
    /// Signed token.
    pub token: String,
}

/// Payload of [`MessageType::JoinPath`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinPath {
    /// Client-side path, e.g. `/` or `/game/abc123`.
    pub path: String,
}

/// Payload of [`MessageType::ErrorMessage`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Human-readable message.
    pub message: String,
}

/// Decode a JSON control payload.
pub fn decode_payload<T: DeserializeOwned>(payload: &[u8]) -> Result<T, ProtocolError> {
    serde_json::from_slice(payload).map_err(|e| ProtocolError::InvalidPayload(e.to_string()))
}

/// Build an error envelope frame carrying `message`.
pub fn error_frame(message: impl Into<String>) -> Bytes {
    let body = ErrorMessage { message: message.into() };
    // A String-only struct always serializes.
    let json = serde_json::to_vec(&body).unwrap_or_default();
    encode_frame(MessageType::ErrorMessage, &json).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_bytes(tag: u8, payload: &[u8]) -> Vec<u8> {
        let mut v = ((payload.len() + 1) as u16).to_be_bytes().to_vec();
        v.push(tag);
        v.extend_from_slice(payload);
        v
    }

    #[test]
    fn test_decode_single_frame() {
        let data = frame_bytes(41, br#"{"path":"/"}"#);
        let frames = decode_frames(data).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].message_type().unwrap(), MessageType::JoinPath);

        let join: JoinPath = decode_payload(&frames[0].payload).unwrap();
        assert_eq!(join.path, "/");
    }

    #[test]
    fn test_decode_back_to_back_frames() {
        let mut data = frame_bytes(0, b"seek");
        data.extend(frame_bytes(42, b""));
        data.extend(frame_bytes(20, b"hello"));

        let frames = decode_frames(data).unwrap();
        let tags: Vec<u8> = frames.iter().map(|f| f.tag).collect();
        assert_eq!(tags, vec![0, 42, 20]);
        assert_eq!(&frames[0].payload[..], b"seek");
        assert!(frames[1].payload.is_empty());
        assert_eq!(&frames[2].payload[..], b"hello");
    }

    #[test]
    fn test_truncated_header() {
        assert_eq!(decode_frames(vec![0u8]), Err(ProtocolError::Truncated));
    }

    #[test]
    fn test_length_past_end() {
        let mut data = frame_bytes(3, b"abcdef");
        data.truncate(5);
        assert!(matches!(
            decode_frames(data),
            Err(ProtocolError::LengthMismatch { declared: 7, available: 3 })
        ));
    }

    #[test]
    fn test_zero_length_rejected() {
        assert!(matches!(
            decode_frames(vec![0u8, 0u8]),
            Err(ProtocolError::LengthMismatch { declared: 0, .. })
        ));
    }

    #[test]
    fn test_unknown_tag() {
        let frames = decode_frames(frame_bytes(250, b"x")).unwrap();
        assert_eq!(frames[0].message_type(), Err(ProtocolError::UnknownTag(250)));
    }

    #[test]
    fn test_encode_matches_wire_layout() {
        let frame = encode_frame(MessageType::ChatMessage, b"hi").unwrap();
        assert_eq!(&frame[..], &frame_bytes(20, b"hi")[..]);
    }

    #[test]
    fn test_error_frame_decodes() {
        let frame = error_frame("message type 99 not handled");
        let frames = decode_frames(frame).unwrap();
        assert_eq!(frames[0].message_type().unwrap(), MessageType::ErrorMessage);
        let err: ErrorMessage = decode_payload(&frames[0].payload).unwrap();
        assert_eq!(err.message, "message type 99 not handled");
    }

    #[test]
    fn test_forward_kinds() {
        assert_eq!(MessageType::SeekRequest.forward_kind(), Some("seekRequest"));
        assert_eq!(MessageType::ClientGameplayEvent.forward_kind(), Some("gameplayEvent"));
        assert_eq!(MessageType::JoinPath.forward_kind(), None);
        assert_eq!(MessageType::TokenSocketLogin.forward_kind(), None);
    }

    #[test]
    fn test_invalid_control_payload() {
        let result: Result<JoinPath, _> = decode_payload(b"not json");
        assert!(matches!(result, Err(ProtocolError::InvalidPayload(_))));
    }
}
