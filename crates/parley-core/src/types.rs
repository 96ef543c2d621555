// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Data model of the direct-messaging core.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ParleyError;
use crate::wire::i64_string;

/// Number of Unicode code points kept in a session's last-message summary.
pub const SUMMARY_RUNES: usize = 5;

/// Largest page a paged query may request.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Conversation kind. Only [`SessionType::DIRECT`] is handled by the core;
/// other values are reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionType(pub i32);

impl SessionType {
    /// One-to-one conversation.
    pub const DIRECT: SessionType = SessionType(1);

    pub fn is_direct(self) -> bool {
        self == Self::DIRECT
    }
}

impl Default for SessionType {
    fn default() -> Self {
        Self::DIRECT
    }
}

/// A persisted direct message. Immutable once appended to the store.
///
/// The serde representation is the client frame payload, which is also the
/// broker message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(with = "i64_string")]
    pub id: i64,
    #[serde(with = "i64_string")]
    pub session_id: i64,
    pub session_type: SessionType,
    #[serde(rename = "message_from", with = "i64_string")]
    pub from: i64,
    #[serde(rename = "message_to", with = "i64_string")]
    pub to: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Encode as the JSON frame payload.
    pub fn to_json(&self) -> Result<String, ParleyError> {
        serde_json::to_string(self).map_err(|e| ParleyError::Internal(format!(
            "failed to encode message {}: {e}",
            self.id
        )))
    }

    /// Decode a JSON frame payload.
    pub fn from_json(json: &str) -> Result<Self, ParleyError> {
        serde_json::from_str(json)
            .map_err(|e| ParleyError::InvalidParam(format!("malformed message payload: {e}")))
    }
}

/// A per-user inbox row for one direct conversation.
///
/// Each conversation has two of these, one owned by each participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    #[serde(with = "i64_string")]
    pub session_id: i64,
    #[serde(with = "i64_string")]
    pub user_id: i64,
    #[serde(with = "i64_string")]
    pub target_id: i64,
    pub target_type: SessionType,
    #[serde(with = "i64_string")]
    pub last_message_id: i64,
    pub last_message: String,
    pub last_message_time: DateTime<Utc>,
    pub unread_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// The fields an `upsert_unread` applies to one owner's session row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUpdate {
    pub target_id: i64,
    pub target_type: SessionType,
    pub last_message_id: i64,
    pub last_message: String,
    pub last_message_time: DateTime<Utc>,
    /// Added to `unread_count`; also the initial count of a new row.
    pub unread_delta: u32,
}

impl SessionUpdate {
    /// Update for the recipient's row: the peer is the sender, one more unread.
    pub fn for_recipient(message: &Message) -> Self {
        Self::from_message(message, message.from, 1)
    }

    /// Update for the sender's own row: the peer is the recipient, unread unchanged.
    pub fn for_sender(message: &Message) -> Self {
        Self::from_message(message, message.to, 0)
    }

    fn from_message(message: &Message, target_id: i64, unread_delta: u32) -> Self {
        Self {
            target_id,
            target_type: message.session_type,
            last_message_id: message.id,
            last_message: summarize(&message.content),
            last_message_time: message.created_at,
            unread_delta,
        }
    }
}

/// One page of a conversation's history, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessagePage {
    pub total: u64,
    pub messages: Vec<Message>,
}

/// Health status reported by adapter health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Adapter is fully operational.
    Healthy,
    /// Adapter is operational but experiencing issues.
    Degraded(String),
    /// Adapter is not operational.
    Unhealthy(String),
}

/// Current time at the microsecond precision the stores persist, so a
/// stamped message compares equal to its stored copy.
pub fn timestamp_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// First [`SUMMARY_RUNES`] code points of `content`.
pub fn summarize(content: &str) -> String {
    content.chars().take(SUMMARY_RUNES).collect()
}

/// Deterministic session id for the direct conversation between `a` and `b`.
///
/// Order-insensitive: `direct_session_id(a, b) == direct_session_id(b, a)`.
/// The result is always non-negative so it fits a signed SQLite integer
/// and a JavaScript-safe decimal string alike.
pub fn direct_session_id(a: i64, b: i64) -> i64 {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let digest = Sha256::digest(format!("direct:{lo}:{hi}").as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) & (i64::MAX as u64)) as i64
}

/// Check paging bounds: `page_no >= 1` and `1 <= page_size <= MAX_PAGE_SIZE`.
pub fn validate_page(page_no: u32, page_size: u32) -> Result<(), ParleyError> {
    if page_no < 1 {
        return Err(ParleyError::InvalidParam(format!(
            "page_no must be >= 1, got {page_no}"
        )));
    }
    if page_size < 1 || page_size > MAX_PAGE_SIZE {
        return Err(ParleyError::InvalidParam(format!(
            "page_size must be within 1..={MAX_PAGE_SIZE}, got {page_size}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn sample_message() -> Message {
        Message {
            id: 1_234_567_890_123_456_789,
            session_id: direct_session_id(1, 2),
            session_type: SessionType::DIRECT,
            from: 1,
            to: 2,
            content: "hi".to_string(),
            created_at: Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap(),
            deleted_at: None,
        }
    }

    #[test]
    fn summary_truncates_by_code_point() {
        assert_eq!(summarize("今天天气真好呀"), "今天天气真");
        assert_eq!(summarize("hi"), "hi");
        assert_eq!(summarize(""), "");
        assert_eq!(summarize("hello"), "hello");
        assert_eq!(summarize("hello!"), "hello");
    }

    #[test]
    fn summary_boundaries() {
        for len in [0usize, 1, 5, 6, 10_000] {
            let content: String = std::iter::repeat('é').take(len).collect();
            assert_eq!(summarize(&content).chars().count(), len.min(SUMMARY_RUNES));
        }
    }

    proptest! {
        #[test]
        fn summary_is_a_prefix_of_at_most_five_runes(content in ".*") {
            let summary = summarize(&content);
            prop_assert_eq!(summary.chars().count(), content.chars().count().min(SUMMARY_RUNES));
            prop_assert!(content.starts_with(&summary));
        }

        #[test]
        fn session_id_is_symmetric_and_non_negative(a in any::<i64>(), b in any::<i64>()) {
            let forward = direct_session_id(a, b);
            prop_assert_eq!(forward, direct_session_id(b, a));
            prop_assert!(forward >= 0);
        }
    }

    #[test]
    fn timestamp_now_has_microsecond_precision() {
        let now = timestamp_now();
        assert_eq!(now.timestamp_subsec_nanos() % 1_000, 0);
    }

    #[test]
    fn different_pairs_get_different_session_ids() {
        assert_ne!(direct_session_id(1, 2), direct_session_id(1, 3));
        assert_ne!(direct_session_id(1, 2), direct_session_id(2, 2));
    }

    #[test]
    fn message_json_uses_string_ids_and_wire_names() {
        let json = sample_message().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["id"], "1234567890123456789");
        assert_eq!(value["message_from"], "1");
        assert_eq!(value["message_to"], "2");
        assert_eq!(value["session_type"], 1);
        assert_eq!(value["created_at"], "2026-01-01T12:00:00Z");
        assert!(value.get("deleted_at").is_none());
    }

    #[test]
    fn message_json_roundtrip_is_identity() {
        let msg = sample_message();
        let decoded = Message::from_json(&msg.to_json().unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn malformed_payload_is_invalid_param() {
        let err = Message::from_json("{\"id\": true}").unwrap_err();
        assert!(matches!(err, ParleyError::InvalidParam(_)));
    }

    #[test]
    fn session_updates_pick_peer_and_delta() {
        let msg = sample_message();
        let recipient = SessionUpdate::for_recipient(&msg);
        assert_eq!(recipient.target_id, 1);
        assert_eq!(recipient.unread_delta, 1);
        assert_eq!(recipient.last_message, "hi");

        let sender = SessionUpdate::for_sender(&msg);
        assert_eq!(sender.target_id, 2);
        assert_eq!(sender.unread_delta, 0);
        assert_eq!(sender.last_message_id, msg.id);
    }

    #[test]
    fn page_bounds_are_enforced() {
        assert!(validate_page(1, 1).is_ok());
        assert!(validate_page(3, MAX_PAGE_SIZE).is_ok());
        assert!(matches!(validate_page(0, 10), Err(ParleyError::InvalidParam(_))));
        assert!(matches!(validate_page(1, 0), Err(ParleyError::InvalidParam(_))));
        assert!(matches!(validate_page(1, 101), Err(ParleyError::InvalidParam(_))));
    }
}
