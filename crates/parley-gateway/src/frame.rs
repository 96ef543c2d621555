// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transport frames and the client message codec.
//!
//! Client -> Server (JSON):
//! ```json
//! {"session_type": 1, "message_to": "2", "content": "hi"}
//! ```
//!
//! Server -> Client (JSON), the persisted message:
//! ```json
//! {"id": "…", "session_id": "…", "session_type": 1, "message_from": "1",
//!  "message_to": "2", "content": "hi", "created_at": "2026-01-01T12:00:00.000000Z"}
//! ```

use chrono::{DateTime, Utc};
use serde::Deserialize;

use parley_core::wire::{i64_string, i64_string_option};
use parley_core::{Message, ParleyError, SessionType};

/// A transport-level frame. The connection manager only ever sees these;
/// the concrete transport is adapted at the boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

/// An inbound client frame before the server stamps it.
///
/// `id`, `message_from`, and `created_at` are advisory and overwritten;
/// only `message_to` and `content` are required.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundFrame {
    #[serde(default, with = "i64_string_option")]
    pub id: Option<i64>,
    #[serde(default, with = "i64_string_option")]
    pub session_id: Option<i64>,
    #[serde(default)]
    pub session_type: SessionType,
    #[serde(default, with = "i64_string_option")]
    pub message_from: Option<i64>,
    #[serde(with = "i64_string")]
    pub message_to: i64,
    pub content: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl InboundFrame {
    /// Decode a text (or UTF-8 binary) frame payload.
    pub fn decode(payload: &str) -> Result<Self, ParleyError> {
        serde_json::from_str(payload)
            .map_err(|e| ParleyError::InvalidParam(format!("malformed frame: {e}")))
    }

    /// Convert into a draft message. The dispatcher overwrites the
    /// authoritative fields before anything is persisted.
    pub fn into_draft(self) -> Message {
        Message {
            id: self.id.unwrap_or_default(),
            session_id: self.session_id.unwrap_or_default(),
            session_type: self.session_type,
            from: self.message_from.unwrap_or_default(),
            to: self.message_to,
            content: self.content,
            created_at: self.created_at.unwrap_or_else(parley_core::timestamp_now),
            deleted_at: None,
        }
    }
}

/// Decode a transport frame carrying a client message.
///
/// Returns `Ok(None)` for frames that are not data frames.
pub fn decode_data_frame(frame: &Frame) -> Result<Option<Message>, ParleyError> {
    let payload = match frame {
        Frame::Text(text) => text.as_str(),
        Frame::Binary(bytes) => std::str::from_utf8(bytes)
            .map_err(|e| ParleyError::InvalidParam(format!("binary frame is not UTF-8: {e}")))?,
        _ => return Ok(None),
    };
    InboundFrame::decode(payload).map(|f| Some(f.into_draft()))
}

/// Encode a persisted message as an outbound text frame.
pub fn encode_message(message: &Message) -> Result<Frame, ParleyError> {
    message.to_json().map(Frame::Text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn minimal_frame_decodes() {
        let frame = InboundFrame::decode(r#"{"message_to":"2","content":"hi"}"#).unwrap();
        assert_eq!(frame.message_to, 2);
        assert_eq!(frame.session_type, SessionType::DIRECT);
        assert!(frame.id.is_none());
    }

    #[test]
    fn advisory_fields_are_accepted_in_any_form() {
        let frame = InboundFrame::decode(
            r#"{"id":"","session_id":0,"session_type":1,"message_from":"99",
                "message_to":2,"content":"hi","created_at":"2026-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(frame.id, None);
        assert_eq!(frame.message_from, Some(99));
        assert!(frame.created_at.is_some());
    }

    #[test]
    fn missing_recipient_is_invalid() {
        let err = InboundFrame::decode(r#"{"content":"hi"}"#).unwrap_err();
        assert!(matches!(err, ParleyError::InvalidParam(_)));
        assert!(InboundFrame::decode("not json").is_err());
    }

    #[test]
    fn binary_utf8_frames_are_data() {
        let frame = Frame::Binary(br#"{"message_to":"5","content":"b"}"#.to_vec());
        let draft = decode_data_frame(&frame).unwrap().unwrap();
        assert_eq!(draft.to, 5);
        assert_eq!(decode_data_frame(&Frame::Ping(vec![])).unwrap(), None);
        assert!(decode_data_frame(&Frame::Binary(vec![0xff, 0xfe])).is_err());
    }

    proptest! {
        #[test]
        fn encoded_message_decodes_to_same_payload(
            id in any::<i64>(),
            from in any::<i64>(),
            to in any::<i64>(),
            content in ".*",
        ) {
            let message = Message {
                id,
                session_id: parley_core::direct_session_id(from, to),
                session_type: SessionType::DIRECT,
                from,
                to,
                content,
                created_at: parley_core::timestamp_now(),
                deleted_at: None,
            };
            let Frame::Text(text) = encode_message(&message).unwrap() else {
                panic!("expected a text frame");
            };
            let draft = InboundFrame::decode(&text).unwrap().into_draft();
            prop_assert_eq!(draft, message);
        }
    }
}
