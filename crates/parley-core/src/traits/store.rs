// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message and session store traits.

use async_trait::async_trait;

use crate::error::ParleyError;
use crate::types::{Message, MessagePage, Session, SessionUpdate};

/// Durable, append-only message log. The store is the ordering authority
/// for a conversation: `(created_at ASC, id ASC)`.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Insert one message. The caller has already set `id` and `created_at`.
    ///
    /// A duplicate `id` fails with [`ParleyError::Conflict`]; it is never
    /// silently ignored.
    async fn append(&self, message: &Message) -> Result<(), ParleyError>;

    /// Messages exchanged between `a` and `b` (either direction), newest
    /// first, soft-deleted rows excluded.
    ///
    /// `page_no >= 1` and `1 <= page_size <= 100`, otherwise
    /// [`ParleyError::InvalidParam`].
    async fn list_pair(
        &self,
        a: i64,
        b: i64,
        page_no: u32,
        page_size: u32,
    ) -> Result<MessagePage, ParleyError>;

    /// Messages between `a` and `b` strictly after `cursor_id` in
    /// `(created_at, id)` order, oldest first. A cursor of `0` starts from
    /// the beginning; an unknown cursor is [`ParleyError::NotFound`].
    async fn list_since(
        &self,
        a: i64,
        b: i64,
        cursor_id: i64,
        limit: u32,
    ) -> Result<Vec<Message>, ParleyError>;
}

/// Per-user inbox rows.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// The owner's non-deleted rows, most recently updated first.
    async fn list_for(&self, owner: i64) -> Result<Vec<Session>, ParleyError>;

    /// Atomic read-modify-write of the owner's row for `session_id`.
    ///
    /// Creates the row with `unread_count = update.unread_delta` when it is
    /// missing; otherwise applies the `last_*` fields (never moving
    /// `last_message_time` backwards) and adds `unread_delta`. Safe under
    /// concurrent writers for the same row.
    async fn upsert_unread(
        &self,
        owner: i64,
        session_id: i64,
        update: &SessionUpdate,
    ) -> Result<(), ParleyError>;

    /// Reset the owner's unread counter for `session_id` to zero.
    async fn clear_unread(&self, owner: i64, session_id: i64) -> Result<(), ParleyError>;
}
