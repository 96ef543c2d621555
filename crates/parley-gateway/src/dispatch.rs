// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-message dispatch pipeline: stamp, intercept, persist, update
//! sessions, fan out.
//!
//! The store is the source of truth. A message that fails to persist is
//! dropped before anything else observes it; session and publish failures
//! after a successful persist are logged and swallowed.

use std::sync::Arc;

use tracing::{debug, error, warn};

use parley_core::{
    direct_session_id, timestamp_now, Broker, ContentInterceptor, ErrorKind, IdGenerator, Message,
    MessageStore, ParleyError, SessionStore, SessionUpdate,
};

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Persisted. Session and publish failures, if any, were logged.
    Persisted(Message),
    /// Dropped by the content interceptor.
    Rejected,
    /// Dropped because the frame was not a valid direct message.
    Invalid,
    /// Dropped because the store refused it.
    PersistFailed(ErrorKind),
}

/// Shared, stateless pipeline. One instance serves every connection.
#[derive(Clone)]
pub struct Dispatcher {
    messages: Arc<dyn MessageStore>,
    sessions: Arc<dyn SessionStore>,
    broker: Arc<dyn Broker>,
    ids: Arc<dyn IdGenerator>,
    interceptor: Arc<dyn ContentInterceptor>,
}

impl Dispatcher {
    pub fn new(
        messages: Arc<dyn MessageStore>,
        sessions: Arc<dyn SessionStore>,
        broker: Arc<dyn Broker>,
        ids: Arc<dyn IdGenerator>,
        interceptor: Arc<dyn ContentInterceptor>,
    ) -> Self {
        Self {
            messages,
            sessions,
            broker,
            ids,
            interceptor,
        }
    }

    /// The message store the pipeline persists into.
    pub fn messages(&self) -> &Arc<dyn MessageStore> {
        &self.messages
    }

    /// The session store the pipeline updates.
    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    /// Overwrite the server-authoritative fields of a client draft.
    pub fn stamp(&self, user_id: i64, mut draft: Message) -> Result<Message, ParleyError> {
        if !draft.session_type.is_direct() {
            return Err(ParleyError::InvalidParam(format!(
                "unsupported session_type {}",
                draft.session_type.0
            )));
        }
        if draft.to <= 0 {
            return Err(ParleyError::InvalidParam(format!(
                "invalid recipient {}",
                draft.to
            )));
        }
        draft.from = user_id;
        draft.id = self.ids.next_id();
        draft.session_id = direct_session_id(draft.from, draft.to);
        draft.created_at = timestamp_now();
        draft.deleted_at = None;
        Ok(draft)
    }

    /// Run the full pipeline for one message received from `user_id`.
    pub async fn dispatch(&self, user_id: i64, draft: Message) -> DispatchOutcome {
        let message = match self.stamp(user_id, draft) {
            Ok(m) => m,
            Err(e) => {
                debug!(user_id, error = %e, "dropping invalid message");
                return DispatchOutcome::Invalid;
            }
        };

        if !self.interceptor.accept(&message) {
            debug!(
                user_id,
                message_id = message.id,
                interceptor = self.interceptor.name(),
                "message rejected by interceptor"
            );
            return DispatchOutcome::Rejected;
        }

        if let Err(e) = self.messages.append(&message).await {
            let kind = e.kind();
            if kind == ErrorKind::Conflict {
                error!(
                    user_id,
                    message_id = message.id,
                    error = %e,
                    "id generator produced a duplicate message id"
                );
            } else {
                error!(user_id, message_id = message.id, error = %e, "failed to persist message");
            }
            return DispatchOutcome::PersistFailed(kind);
        }

        let updates = [
            (message.to, SessionUpdate::for_recipient(&message)),
            (message.from, SessionUpdate::for_sender(&message)),
        ];
        for (owner, update) in &updates {
            if let Err(e) = self
                .sessions
                .upsert_unread(*owner, message.session_id, update)
                .await
            {
                warn!(
                    owner,
                    session_id = message.session_id,
                    message_id = message.id,
                    error = %e,
                    "failed to update session"
                );
            }
        }

        self.publish(message.to, &message).await;
        if message.from != message.to {
            self.publish(message.from, &message).await;
        }

        debug!(user_id, message_id = message.id, to = message.to, "message dispatched");
        DispatchOutcome::Persisted(message)
    }

    async fn publish(&self, user_id: i64, message: &Message) {
        if let Err(e) = self.broker.publish(user_id, message).await {
            warn!(user_id, message_id = message.id, error = %e, "failed to publish message");
        }
    }
}
