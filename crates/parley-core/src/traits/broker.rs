// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-user fan-out broker.
//!
//! Each user `u` owns an exchange `"<u>_exchange"`. Every consumer gets its
//! own live queue `"<u>_<class>.<tag>"` bound to that exchange, so each
//! connected device sees every message. The durable queue `"<u>_<class>"`
//! holds the backlog: it receives a copy only while no live queue of its
//! class exists, and it takes back whatever a live queue still holds when
//! that queue is retired. Topology is declared lazily and idempotently.

use async_trait::async_trait;

use crate::error::ParleyError;
use crate::types::Message;

/// Exchange name for user `user_id`.
pub fn exchange_name(user_id: i64) -> String {
    format!("{user_id}_exchange")
}

/// Durable backlog queue for user `user_id` and `device_class`.
pub fn queue_name(user_id: i64, device_class: &str) -> String {
    format!("{user_id}_{device_class}")
}

/// Live queue owned by the consumer tagged `consumer_tag`.
pub fn live_queue_name(user_id: i64, device_class: &str, consumer_tag: &str) -> String {
    format!("{}.{consumer_tag}", queue_name(user_id, device_class))
}

/// A queued message handed to a consumer and awaiting acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Broker-assigned tag used to acknowledge this delivery.
    pub delivery_tag: u64,
    /// Whether this message was handed out before without being acked.
    pub redelivered: bool,
    pub message: Message,
}

/// Write side of the broker.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Enqueue a persistent copy of `message` on every live queue bound to
    /// `user_id`'s exchange, and on each backlog queue whose class has no
    /// live queue.
    async fn publish(&self, user_id: i64, message: &Message) -> Result<(), ParleyError>;

    /// Declare a live queue for `device_class` and consume it together with
    /// the class backlog, oldest first, with manual acknowledgement.
    async fn consume(
        &self,
        user_id: i64,
        device_class: &str,
    ) -> Result<Box<dyn Consumer>, ParleyError>;
}

/// Read side of one live queue plus its backlog, owned by a single
/// connection.
///
/// Deliveries that are not acked before [`Consumer::cancel`] end up in the
/// backlog and are redelivered to the next consumer of the class.
#[async_trait]
pub trait Consumer: Send {
    /// Consumer tag, unique per consume call.
    fn tag(&self) -> &str;

    /// Name of the live queue owned by this consumer.
    fn queue(&self) -> &str;

    /// Wait for the next delivery in queue order. `Ok(None)` once cancelled.
    async fn next(&mut self) -> Result<Option<Delivery>, ParleyError>;

    /// Acknowledge a delivery; it will not be redelivered.
    async fn ack(&mut self, delivery_tag: u64) -> Result<(), ParleyError>;

    /// Stop consuming, requeue every unacknowledged delivery and retire the
    /// live queue into the backlog. Idempotent.
    async fn cancel(&mut self) -> Result<(), ParleyError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topology_names() {
        assert_eq!(exchange_name(42), "42_exchange");
        assert_eq!(queue_name(42, "computer"), "42_computer");
        assert_eq!(queue_name(7, "mobile"), "7_mobile");
        assert_eq!(live_queue_name(7, "mobile", "ctag-1"), "7_mobile.ctag-1");
    }
}
