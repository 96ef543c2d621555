// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Connection identity.

use async_trait::async_trait;

use crate::error::ParleyError;

/// Turns the credentials presented at upgrade time into a user id.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Resolve `token` to a stable user id, or fail with
    /// [`ParleyError::Unauthorized`].
    async fn resolve(&self, token: &str) -> Result<i64, ParleyError>;
}
