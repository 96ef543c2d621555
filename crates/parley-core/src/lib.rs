// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Parley direct-messaging core.
//!
//! This crate provides the data model, the error taxonomy, and the traits
//! of every collaborator the connection manager and dispatcher depend on:
//! message and session stores, the fan-out broker, the identity resolver,
//! the id generator, and the content interceptor.

pub mod error;
pub mod ids;
pub mod traits;
pub mod types;
pub mod wire;

// Re-export key items at crate root for ergonomic imports.
pub use error::{ErrorKind, ParleyError};
pub use ids::SnowflakeGenerator;
pub use types::{
    direct_session_id, summarize, timestamp_now, validate_page, HealthStatus, Message, MessagePage, Session,
    SessionType, SessionUpdate, MAX_PAGE_SIZE, SUMMARY_RUNES,
};

pub use traits::{
    Broker, Consumer, ContentInterceptor, Delivery, IdGenerator, IdentityResolver,
    MessageStore, PluginAdapter, SessionStore,
};
