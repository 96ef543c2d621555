// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message id source.

/// Monotonic, process-unique 64-bit id source.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> i64;
}
