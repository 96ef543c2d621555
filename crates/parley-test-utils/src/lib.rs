// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Parley integration tests.
//!
//! Provides in-memory collaborators and test harness infrastructure for
//! fast, deterministic tests without a database file or a network socket.
//!
//! # Components
//!
//! - [`MemoryBroker`] - per-user fan-out with manual ack and requeue
//! - [`MemoryStore`] - message and session stores in process memory
//! - [`MockTransport`] - scriptable frame transport with captured writes
//! - [`FixedIdGenerator`] / [`SequenceIdGenerator`] - deterministic ids
//! - [`TestHarness`] - dispatcher and connection manager wired together

pub mod harness;
pub mod ids;
pub mod memory_broker;
pub mod memory_store;
pub mod mock_transport;

pub use harness::{TestHarness, TestHarnessBuilder};
pub use ids::{FixedIdGenerator, SequenceIdGenerator};
pub use memory_broker::MemoryBroker;
pub use memory_store::MemoryStore;
pub use mock_transport::{MockClient, MockTransport};
