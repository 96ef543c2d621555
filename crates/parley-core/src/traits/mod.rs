// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Collaborator traits injected into the connection manager and dispatcher.
//!
//! Async traits use `#[async_trait]` so they can be held as `Arc<dyn ...>`.

pub mod adapter;
pub mod broker;
pub mod identity;
pub mod ids;
pub mod interceptor;
pub mod store;

pub use adapter::PluginAdapter;
pub use broker::{Broker, Consumer, Delivery};
pub use identity::IdentityResolver;
pub use ids::IdGenerator;
pub use interceptor::ContentInterceptor;
pub use store::{MessageStore, SessionStore};
