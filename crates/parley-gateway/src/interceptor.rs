// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Content interceptors run by the dispatcher before a message is persisted.

use std::sync::Arc;

use parley_config::model::InterceptorConfig;
use parley_core::{ContentInterceptor, Message};

/// Accepts every message.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl ContentInterceptor for AcceptAll {
    fn name(&self) -> &str {
        "accept_all"
    }

    fn accept(&self, _message: &Message) -> bool {
        true
    }
}

/// Rejects empty content and content longer than `max_runes` code points.
#[derive(Debug, Clone, Copy)]
pub struct MaxLength {
    max_runes: usize,
}

impl MaxLength {
    pub fn new(max_runes: usize) -> Self {
        Self { max_runes }
    }
}

impl ContentInterceptor for MaxLength {
    fn name(&self) -> &str {
        "max_length"
    }

    fn accept(&self, message: &Message) -> bool {
        if message.content.is_empty() {
            return false;
        }
        // Stop counting once over the limit.
        message.content.chars().take(self.max_runes + 1).count() <= self.max_runes
    }
}

/// Accepts only when every member accepts. An empty chain accepts all.
#[derive(Default, Clone)]
pub struct InterceptorChain {
    members: Vec<Arc<dyn ContentInterceptor>>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, interceptor: Arc<dyn ContentInterceptor>) -> Self {
        self.members.push(interceptor);
        self
    }

    /// Name of the first member that rejects `message`, if any.
    pub fn rejected_by(&self, message: &Message) -> Option<&str> {
        self.members
            .iter()
            .find(|m| !m.accept(message))
            .map(|m| m.name())
    }
}

impl ContentInterceptor for InterceptorChain {
    fn name(&self) -> &str {
        "chain"
    }

    fn accept(&self, message: &Message) -> bool {
        self.rejected_by(message).is_none()
    }
}

/// Build the interceptor configured in `[interceptor]`.
pub fn from_config(config: &InterceptorConfig) -> Arc<dyn ContentInterceptor> {
    match config.max_content_runes {
        Some(max) => Arc::new(InterceptorChain::new().with(Arc::new(MaxLength::new(max)))),
        None => Arc::new(AcceptAll),
    }
}
