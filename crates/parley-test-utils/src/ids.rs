// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deterministic id generators.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use parley_core::IdGenerator;

/// Hands out a scripted list of ids, then repeats the last one forever
/// (an empty script yields `0`).
/// `FixedIdGenerator::new(vec![7])` models a generator stuck on one id.
#[derive(Debug)]
pub struct FixedIdGenerator {
    ids: Vec<i64>,
    next: AtomicUsize,
}

impl FixedIdGenerator {
    pub fn new(ids: Vec<i64>) -> Self {
        Self {
            ids,
            next: AtomicUsize::new(0),
        }
    }
}

impl IdGenerator for FixedIdGenerator {
    fn next_id(&self) -> i64 {
        let i = self.next.fetch_add(1, Ordering::SeqCst);
        let last = self.ids.len().saturating_sub(1);
        self.ids.get(i.min(last)).copied().unwrap_or_default()
    }
}

/// Counts up from a starting id.
#[derive(Debug)]
pub struct SequenceIdGenerator {
    next: AtomicI64,
}

impl SequenceIdGenerator {
    pub fn starting_at(first: i64) -> Self {
        Self {
            next: AtomicI64::new(first),
        }
    }
}

impl Default for SequenceIdGenerator {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

impl IdGenerator for SequenceIdGenerator {
    fn next_id(&self) -> i64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}
