// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Snowflake-style 64-bit id generation.
//!
//! Layout (most significant first): 1 sign bit (always 0), 41 bits of
//! milliseconds since [`EPOCH_MILLIS`], 10 bits of node id, 12 bits of
//! per-millisecond sequence.

use std::sync::Mutex;

use chrono::Utc;

use crate::error::ParleyError;
use crate::traits::IdGenerator;

/// 2024-01-01T00:00:00Z in Unix milliseconds.
pub const EPOCH_MILLIS: i64 = 1_704_067_200_000;

const NODE_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const MAX_NODE_ID: u16 = (1 << NODE_BITS) - 1;
const MAX_SEQUENCE: i64 = (1 << SEQUENCE_BITS) - 1;

#[derive(Debug)]
struct State {
    last_millis: i64,
    sequence: i64,
}

/// Process-unique, strictly monotonic id generator.
///
/// If the wall clock steps backwards the generator keeps issuing ids from
/// the last observed millisecond, borrowing from the future when the
/// sequence overflows, so ids never repeat or decrease.
#[derive(Debug)]
pub struct SnowflakeGenerator {
    node_id: i64,
    state: Mutex<State>,
}

impl SnowflakeGenerator {
    /// Create a generator for `node_id` (0..=1023).
    pub fn new(node_id: u16) -> Result<Self, ParleyError> {
        if node_id > MAX_NODE_ID {
            return Err(ParleyError::Config(format!(
                "node_id must be <= {MAX_NODE_ID}, got {node_id}"
            )));
        }
        Ok(Self {
            node_id: i64::from(node_id),
            state: Mutex::new(State {
                last_millis: 0,
                sequence: 0,
            }),
        })
    }

    fn compose(&self, millis: i64, sequence: i64) -> i64 {
        (millis << (NODE_BITS + SEQUENCE_BITS)) | (self.node_id << SEQUENCE_BITS) | sequence
    }

    fn next_at(&self, now_millis: i64) -> i64 {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let now = (now_millis - EPOCH_MILLIS).max(0);

        if now > state.last_millis {
            state.last_millis = now;
            state.sequence = 0;
        } else {
            state.sequence += 1;
            if state.sequence > MAX_SEQUENCE {
                state.last_millis += 1;
                state.sequence = 0;
            }
        }
        self.compose(state.last_millis, state.sequence)
    }
}

impl IdGenerator for SnowflakeGenerator {
    fn next_id(&self) -> i64 {
        self.next_at(Utc::now().timestamp_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_node() {
        assert!(SnowflakeGenerator::new(1024).is_err());
        assert!(SnowflakeGenerator::new(1023).is_ok());
    }

    #[test]
    fn ids_are_strictly_increasing() {
        let generator = SnowflakeGenerator::new(7).unwrap();
        let mut previous = generator.next_id();
        for _ in 0..10_000 {
            let id = generator.next_id();
            assert!(id > previous, "{id} should exceed {previous}");
            previous = id;
        }
    }

    #[test]
    fn clock_going_backwards_does_not_repeat_ids() {
        let generator = SnowflakeGenerator::new(1).unwrap();
        let t = EPOCH_MILLIS + 10_000;
        let a = generator.next_at(t);
        let b = generator.next_at(t - 5_000);
        let c = generator.next_at(t - 9_000);
        assert!(a < b && b < c);
    }

    #[test]
    fn sequence_overflow_advances_the_millisecond() {
        let generator = SnowflakeGenerator::new(0).unwrap();
        let t = EPOCH_MILLIS + 1;
        let ids: Vec<i64> = (0..=(MAX_SEQUENCE + 1)).map(|_| generator.next_at(t)).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        let last = *ids.last().unwrap();
        assert_eq!(last >> (NODE_BITS + SEQUENCE_BITS), 2);
    }

    #[test]
    fn node_id_is_embedded() {
        let generator = SnowflakeGenerator::new(513).unwrap();
        let id = generator.next_id();
        assert_eq!((id >> SEQUENCE_BITS) & i64::from(MAX_NODE_ID), 513);
        assert!(id > 0);
    }
}
