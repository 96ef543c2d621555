// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP/WebSocket gateway for the Parley direct-messaging core.
//!
//! A client holds one WebSocket per device. Frames it sends go through the
//! [`Dispatcher`] (stamp, intercept, persist, session updates, fan-out);
//! frames it receives come from its own broker queue, so the sender's echo
//! and the recipient's copy travel the same path.

pub mod auth;
pub mod connection;
pub mod dispatch;
pub mod frame;
pub mod handlers;
pub mod interceptor;
pub mod outbound;
pub mod server;
pub mod ws;

pub use auth::HmacTokenResolver;
pub use connection::{
    ConnectionHandle, ConnectionManager, ConnectionSettings, ConnectionState, DRAIN_TIMEOUT,
};
pub use dispatch::{DispatchOutcome, Dispatcher};
pub use frame::Frame;
pub use interceptor::{AcceptAll, InterceptorChain, MaxLength};
pub use outbound::{OutboundBuffer, PushOutcome};
pub use server::{GatewaySettings, GatewayState, HealthState};
