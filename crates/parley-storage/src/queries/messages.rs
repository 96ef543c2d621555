// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Direct message log operations.

use parley_core::{validate_page, MessagePage, ParleyError, MAX_PAGE_SIZE};
use rusqlite::{params, ErrorCode};

use crate::database::Database;
use crate::models::{format_ts, message_from_row, Message, MESSAGE_COLUMNS};

/// Both directions of the `(a, b)` conversation, soft-deleted rows excluded.
const PAIR_FILTER: &str = "((message_from = ?1 AND message_to = ?2) OR (message_from = ?2 AND message_to = ?1)) \
     AND deleted_at IS NULL";

/// Insert a message. A duplicate id is reported as [`ParleyError::Conflict`].
pub async fn append(db: &Database, msg: &Message) -> Result<(), ParleyError> {
    let msg = msg.clone();
    db.connection()
        .call(move |conn| -> Result<Result<(), ParleyError>, rusqlite::Error> {
            let inserted = conn.execute(
                "INSERT INTO messages (id, session_id, session_type, message_from, message_to,
                                       content, created_at, deleted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    msg.id,
                    msg.session_id,
                    msg.session_type.0,
                    msg.from,
                    msg.to,
                    msg.content,
                    format_ts(&msg.created_at),
                    msg.deleted_at.as_ref().map(format_ts),
                ],
            );
            match inserted {
                Ok(_) => Ok(Ok(())),
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == ErrorCode::ConstraintViolation
                        && err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
                {
                    Ok(Err(ParleyError::Conflict(format!(
                        "message id {} already exists",
                        msg.id
                    ))))
                }
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(crate::database::map_tr_err)?
}

/// One page of the `(a, b)` conversation, newest first.
pub async fn list_pair(
    db: &Database,
    a: i64,
    b: i64,
    page_no: u32,
    page_size: u32,
) -> Result<MessagePage, ParleyError> {
    validate_page(page_no, page_size)?;
    let offset = i64::from(page_no - 1) * i64::from(page_size);
    let limit = i64::from(page_size);
    db.connection()
        .call(move |conn| -> Result<MessagePage, rusqlite::Error> {
            let total: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM messages WHERE {PAIR_FILTER}"),
                params![a, b],
                |row| row.get(0),
            )?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE {PAIR_FILTER}
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?3 OFFSET ?4"
            ))?;
            let messages = stmt
                .query_map(params![a, b, limit, offset], message_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(MessagePage {
                total: total.max(0) as u64,
                messages,
            })
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Messages of the `(a, b)` conversation after `cursor_id`, oldest first.
///
/// A cursor of `0` starts from the first message. A cursor that is not a
/// message of this conversation is [`ParleyError::NotFound`].
pub async fn list_since(
    db: &Database,
    a: i64,
    b: i64,
    cursor_id: i64,
    limit: u32,
) -> Result<Vec<Message>, ParleyError> {
    if limit < 1 || limit > MAX_PAGE_SIZE {
        return Err(ParleyError::InvalidParam(format!(
            "limit must be within 1..={MAX_PAGE_SIZE}, got {limit}"
        )));
    }
    let limit = i64::from(limit);
    db.connection()
        .call(move |conn| -> Result<Result<Vec<Message>, ParleyError>, rusqlite::Error> {
            let cursor_ts = if cursor_id == 0 {
                String::new()
            } else {
                let found = conn.query_row(
                    &format!("SELECT created_at FROM messages WHERE id = ?3 AND {PAIR_FILTER}"),
                    params![a, b, cursor_id],
                    |row| row.get::<_, String>(0),
                );
                match found {
                    Ok(ts) => ts,
                    Err(rusqlite::Error::QueryReturnedNoRows) => {
                        return Ok(Err(ParleyError::NotFound(format!(
                            "cursor message {cursor_id}"
                        ))));
                    }
                    Err(e) => return Err(e),
                }
            };
            // The empty string sorts before every stored timestamp.
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE {PAIR_FILTER}
                   AND (created_at > ?3 OR (created_at = ?3 AND id > ?4))
                 ORDER BY created_at ASC, id ASC
                 LIMIT ?5"
            ))?;
            let messages = stmt
                .query_map(params![a, b, cursor_ts, cursor_id, limit], message_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Ok(messages))
        })
        .await
        .map_err(crate::database::map_tr_err)?
}

/// Soft-delete a message. Returns whether a live row was marked.
pub async fn soft_delete(db: &Database, id: i64) -> Result<bool, ParleyError> {
    let now = format_ts(&parley_core::timestamp_now());
    db.connection()
        .call(move |conn| -> Result<bool, rusqlite::Error> {
            let changed = conn.execute(
                "UPDATE messages SET deleted_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
                params![now, id],
            )?;
            Ok(changed > 0)
        })
        .await
        .map_err(crate::database::map_tr_err)
}
