// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable per-user fan-out broker backed by the Parley SQLite database.
//!
//! Each user owns an exchange bound to one queue per device class. Published
//! messages are persisted as delivery rows and survive restarts; a delivery
//! stays in the queue until the consuming connection acknowledges it.

pub mod consumer;
pub mod sqlite;

pub use consumer::SqliteConsumer;
pub use sqlite::SqliteBroker;
