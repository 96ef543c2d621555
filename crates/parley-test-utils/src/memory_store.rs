// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory message and session stores with the same ordering, paging,
//! and conflict rules as the SQLite implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use parley_core::{
    timestamp_now, validate_page, HealthStatus, Message, MessagePage, MessageStore, ParleyError,
    PluginAdapter, Session, SessionStore, SessionUpdate, MAX_PAGE_SIZE,
};

#[derive(Debug, Default)]
struct Inner {
    messages: Vec<Message>,
    sessions: HashMap<(i64, i64), Session>,
    fail_sessions: bool,
}

/// In-memory store implementing both [`MessageStore`] and [`SessionStore`].
/// Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

fn between(m: &Message, a: i64, b: i64) -> bool {
    m.deleted_at.is_none() && ((m.from == a && m.to == b) || (m.from == b && m.to == a))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every appended message, in append order.
    pub async fn messages(&self) -> Vec<Message> {
        self.inner.lock().await.messages.clone()
    }

    /// The owner's row for the conversation with `target_id`.
    pub async fn session(&self, owner: i64, target_id: i64) -> Option<Session> {
        self.inner
            .lock()
            .await
            .sessions
            .get(&(owner, target_id))
            .cloned()
    }

    /// Make subsequent session updates fail.
    pub async fn set_fail_sessions(&self, fail: bool) {
        self.inner.lock().await.fail_sessions = fail;
    }
}

#[async_trait]
impl PluginAdapter for MemoryStore {
    fn name(&self) -> &str {
        "memory-store"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    async fn health_check(&self) -> Result<HealthStatus, ParleyError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), ParleyError> {
        Ok(())
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn append(&self, message: &Message) -> Result<(), ParleyError> {
        let mut inner = self.inner.lock().await;
        if inner.messages.iter().any(|m| m.id == message.id) {
            return Err(ParleyError::Conflict(format!(
                "message id {} already exists",
                message.id
            )));
        }
        inner.messages.push(message.clone());
        Ok(())
    }

    async fn list_pair(
        &self,
        a: i64,
        b: i64,
        page_no: u32,
        page_size: u32,
    ) -> Result<MessagePage, ParleyError> {
        validate_page(page_no, page_size)?;
        let inner = self.inner.lock().await;
        let mut pair: Vec<&Message> = inner.messages.iter().filter(|m| between(m, a, b)).collect();
        pair.sort_by(|x, y| (y.created_at, y.id).cmp(&(x.created_at, x.id)));
        let offset = (page_no as usize - 1) * page_size as usize;
        Ok(MessagePage {
            total: pair.len() as u64,
            messages: pair
                .into_iter()
                .skip(offset)
                .take(page_size as usize)
                .cloned()
                .collect(),
        })
    }

    async fn list_since(
        &self,
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
        let inner = self.inner.lock().await;
        let mut pair: Vec<&Message> = inner.messages.iter().filter(|m| between(m, a, b)).collect();
        pair.sort_by_key(|m| (m.created_at, m.id));
        let start = if cursor_id == 0 {
            0
        } else {
            pair.iter()
                .position(|m| m.id == cursor_id)
                .map(|i| i + 1)
                .ok_or_else(|| ParleyError::NotFound(format!("cursor message {cursor_id}")))?
        };
        Ok(pair
            .into_iter()
            .skip(start)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn list_for(&self, owner: i64) -> Result<Vec<Session>, ParleyError> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<Session> = inner
            .sessions
            .values()
            .filter(|s| s.user_id == owner && s.deleted_at.is_none())
            .cloned()
            .collect();
        rows.sort_by(|x, y| y.updated_at.cmp(&x.updated_at));
        Ok(rows)
    }

    async fn upsert_unread(
        &self,
        owner: i64,
        session_id: i64,
        update: &SessionUpdate,
    ) -> Result<(), ParleyError> {
        let mut inner = self.inner.lock().await;
        if inner.fail_sessions {
            return Err(ParleyError::storage("session failure injected"));
        }
        let now = timestamp_now();
        let row = inner
            .sessions
            .entry((owner, update.target_id))
            .or_insert_with(|| Session {
                session_id,
                user_id: owner,
                target_id: update.target_id,
                target_type: update.target_type,
                last_message_id: update.last_message_id,
                last_message: update.last_message.clone(),
                last_message_time: update.last_message_time,
                unread_count: 0,
                created_at: now,
                updated_at: now,
                deleted_at: None,
            });
        if update.last_message_time >= row.last_message_time {
            row.last_message_id = update.last_message_id;
            row.last_message = update.last_message.clone();
            row.last_message_time = update.last_message_time;
        }
        row.unread_count += update.unread_delta;
        row.updated_at = now;
        Ok(())
    }

    async fn clear_unread(&self, owner: i64, session_id: i64) -> Result<(), ParleyError> {
        let mut inner = self.inner.lock().await;
        let row = inner
            .sessions
            .values_mut()
            .find(|s| s.user_id == owner && s.session_id == session_id && s.deleted_at.is_none())
            .ok_or_else(|| ParleyError::NotFound(format!("session {session_id} for user {owner}")))?;
        row.unread_count = 0;
        Ok(())
    }
}
