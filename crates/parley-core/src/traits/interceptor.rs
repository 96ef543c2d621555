// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Content interception hook.

use crate::types::Message;

/// Pure predicate deciding whether an inbound message is accepted.
///
/// Runs on the dispatch path of the sending connection and must not block
/// on I/O.
pub trait ContentInterceptor: Send + Sync {
    /// Name used in logs when a message is rejected.
    fn name(&self) -> &str;

    fn accept(&self, message: &Message) -> bool;
}
