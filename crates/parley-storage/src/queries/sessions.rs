// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-user session (inbox) operations.

use parley_core::{timestamp_now, ParleyError, SessionUpdate};
use rusqlite::params;

use crate::database::Database;
use crate::models::{format_ts, session_from_row, Session, SESSION_COLUMNS};

/// The owner's live sessions, most recently updated first.
pub async fn list_for(db: &Database, owner: i64) -> Result<Vec<Session>, ParleyError> {
    db.connection()
        .call(move |conn| -> Result<Vec<Session>, rusqlite::Error> {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 WHERE user_id = ?1 AND deleted_at IS NULL
                 ORDER BY updated_at DESC, id DESC"
            ))?;
            let rows = stmt
                .query_map(params![owner], session_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Fetch one live session row.
pub async fn get(
    db: &Database,
    owner: i64,
    session_id: i64,
) -> Result<Option<Session>, ParleyError> {
    db.connection()
        .call(move |conn| -> Result<Option<Session>, rusqlite::Error> {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 WHERE user_id = ?1 AND session_id = ?2 AND deleted_at IS NULL"
            ))?;
            let mut rows = stmt.query_map(params![owner, session_id], session_from_row)?;
            rows.next().transpose()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Create or update the owner's row in one statement.
///
/// The `last_*` fields only move forward in `last_message_time`; the unread
/// delta is always added.
pub async fn upsert_unread(
    db: &Database,
    owner: i64,
    session_id: i64,
    update: &SessionUpdate,
) -> Result<(), ParleyError> {
    let update = update.clone();
    let now = format_ts(&timestamp_now());
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute(
                "INSERT INTO sessions (session_id, user_id, target_id, target_type, last_message_id,
                                       last_message, last_message_time, unread_count,
                                       created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
                 ON CONFLICT (user_id, target_id) WHERE deleted_at IS NULL DO UPDATE SET
                     last_message_id = CASE WHEN excluded.last_message_time >= sessions.last_message_time
                                            THEN excluded.last_message_id ELSE sessions.last_message_id END,
                     last_message = CASE WHEN excluded.last_message_time >= sessions.last_message_time
                                         THEN excluded.last_message ELSE sessions.last_message END,
                     last_message_time = MAX(sessions.last_message_time, excluded.last_message_time),
                     unread_count = sessions.unread_count + excluded.unread_count,
                     updated_at = excluded.updated_at",
                params![
                    session_id,
                    owner,
                    update.target_id,
                    update.target_type.0,
                    update.last_message_id,
                    update.last_message,
                    format_ts(&update.last_message_time),
                    i64::from(update.unread_delta),
                    now,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Zero the owner's unread counter. A missing row is [`ParleyError::NotFound`].
pub async fn clear_unread(db: &Database, owner: i64, session_id: i64) -> Result<(), ParleyError> {
    let changed = db
        .connection()
        .call(move |conn| -> Result<usize, rusqlite::Error> {
            conn.execute(
                "UPDATE sessions SET unread_count = 0
                 WHERE user_id = ?1 AND session_id = ?2 AND deleted_at IS NULL",
                params![owner, session_id],
            )
        })
        .await
        .map_err(crate::database::map_tr_err)?;
    if changed == 0 {
        return Err(ParleyError::NotFound(format!(
            "session {session_id} for user {owner}"
        )));
    }
    Ok(())
}
