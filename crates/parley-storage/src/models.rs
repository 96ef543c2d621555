// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Row mapping between SQLite and the domain types in `parley-core`.
//!
//! Timestamps are stored as fixed-width RFC 3339 text with microsecond
//! precision, so lexical order in SQL equals chronological order.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::Row;

pub use parley_core::types::{Message, Session, SessionType};

/// Column list matching [`message_from_row`].
pub(crate) const MESSAGE_COLUMNS: &str =
    "id, session_id, session_type, message_from, message_to, content, created_at, deleted_at";

/// Column list matching [`session_from_row`].
pub(crate) const SESSION_COLUMNS: &str = "session_id, user_id, target_id, target_type, \
     last_message_id, last_message, last_message_time, unread_count, created_at, updated_at, deleted_at";

/// A queued broker delivery as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRow {
    pub id: i64,
    pub queue: String,
    pub body: String,
    pub content_type: String,
    /// How many times this row has been handed to a consumer, including now.
    pub delivery_count: i64,
    pub created_at: String,
}

/// Format a timestamp for storage.
pub fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn ts_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(idx, &raw)
}

fn opt_ts_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|r| parse_ts(idx, &r)).transpose()
}

pub(crate) fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        session_id: row.get(1)?,
        session_type: SessionType(row.get(2)?),
        from: row.get(3)?,
        to: row.get(4)?,
        content: row.get(5)?,
        created_at: ts_column(row, 6)?,
        deleted_at: opt_ts_column(row, 7)?,
    })
}

pub(crate) fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        session_id: row.get(0)?,
        user_id: row.get(1)?,
        target_id: row.get(2)?,
        target_type: SessionType(row.get(3)?),
        last_message_id: row.get(4)?,
        last_message: row.get(5)?,
        last_message_time: ts_column(row, 6)?,
        unread_count: row.get(7)?,
        created_at: ts_column(row, 8)?,
        updated_at: ts_column(row, 9)?,
        deleted_at: opt_ts_column(row, 10)?,
    })
}

pub(crate) fn delivery_from_row(row: &Row<'_>) -> rusqlite::Result<DeliveryRow> {
    Ok(DeliveryRow {
        id: row.get(0)?,
        queue: row.get(1)?,
        body: row.get(2)?,
        content_type: row.get(3)?,
        delivery_count: row.get(4)?,
        created_at: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn stored_timestamps_sort_lexically() {
        let earlier = Utc.with_ymd_and_hms(2026, 1, 1, 9, 59, 59).unwrap();
        let later = Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap();
        assert!(format_ts(&earlier) < format_ts(&later));
        assert_eq!(format_ts(&later), "2026-01-01T10:00:00.000000Z");
    }

    #[test]
    fn timestamp_roundtrip() {
        let ts = parley_core::timestamp_now();
        assert_eq!(parse_ts(0, &format_ts(&ts)).unwrap(), ts);
    }
}
