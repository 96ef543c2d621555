// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! [`Broker`] implementation over the shared SQLite database.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Notify;
use tracing::{debug, info};

use parley_config::model::BrokerConfig;
use parley_core::traits::broker::{exchange_name, live_queue_name, queue_name};
use parley_core::{Broker, Consumer, HealthStatus, Message, ParleyError, PluginAdapter};
use parley_storage::queries::broker as q;
use parley_storage::Database;

use crate::consumer::SqliteConsumer;

/// Content type stamped on every message body.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Wake-up signals for consumers waiting on an empty queue, by queue name.
#[derive(Debug, Default, Clone)]
pub(crate) struct Wakers {
    inner: Arc<DashMap<String, Arc<Notify>>>,
}

impl Wakers {
    pub(crate) fn get(&self, queue: &str) -> Arc<Notify> {
        self.inner
            .entry(queue.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    pub(crate) fn wake(&self, queue: &str) {
        if let Some(notify) = self.inner.get(queue) {
            notify.notify_waiters();
        }
    }

    pub(crate) fn forget(&self, queue: &str) {
        self.inner.remove(queue);
    }
}

/// SQLite-backed broker.
///
/// Topology is declared lazily: `publish` declares the user's exchange and
/// default-class backlog queue, `consume` declares the backlog of the
/// requested class plus a live queue owned by the new consumer. Each live
/// queue gets its own copy of every message, so connections of one class
/// do not compete. A backlog only fills while no live queue shadows it.
pub struct SqliteBroker {
    db: Database,
    config: BrokerConfig,
    wakers: Wakers,
}

impl SqliteBroker {
    /// Open the broker on `db`. Live queues left by a previous process fold
    /// into their backlogs and every unacked delivery becomes pending again.
    pub async fn open(db: Database, config: BrokerConfig) -> Result<Self, ParleyError> {
        let recovered = q::recover(&db).await?;
        if recovered > 0 {
            info!(recovered, "requeued deliveries left unacked by a previous run");
        }
        Ok(Self {
            db,
            config,
            wakers: Wakers::default(),
        })
    }

    /// Device classes accepted by [`Broker::consume`].
    pub fn device_classes(&self) -> &[String] {
        &self.config.device_classes
    }

    /// Pending (unclaimed) deliveries for `user_id`'s `device_class`, on the
    /// backlog and every live queue of that class.
    pub async fn pending(&self, user_id: i64, device_class: &str) -> Result<u64, ParleyError> {
        q::pending_count(&self.db, &queue_name(user_id, device_class)).await
    }

    /// Deliveries claimed but not yet acked for `user_id`'s `device_class`.
    pub async fn unacked(&self, user_id: i64, device_class: &str) -> Result<u64, ParleyError> {
        q::unacked_count(&self.db, &queue_name(user_id, device_class)).await
    }
}

#[async_trait]
impl PluginAdapter for SqliteBroker {
    fn name(&self) -> &str {
        "sqlite-broker"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    async fn health_check(&self) -> Result<HealthStatus, ParleyError> {
        match self.db.ping().await {
            Ok(()) => Ok(HealthStatus::Healthy),
            Err(e) => Ok(HealthStatus::Unhealthy(e.to_string())),
        }
    }

    async fn shutdown(&self) -> Result<(), ParleyError> {
        // Wake idle consumers so they observe their connections closing.
        for entry in self.wakers.inner.iter() {
            entry.value().notify_waiters();
        }
        debug!("broker shut down");
        Ok(())
    }
}

#[async_trait]
impl Broker for SqliteBroker {
    async fn publish(&self, user_id: i64, message: &Message) -> Result<(), ParleyError> {
        let exchange = exchange_name(user_id);
        let default_queue = queue_name(user_id, &self.config.default_device_class);
        q::declare_bound_queue(&self.db, &exchange, &default_queue).await?;

        let body = message.to_json()?;
        let queues = q::publish(&self.db, &exchange, message.id, &body, JSON_CONTENT_TYPE).await?;
        for queue in &queues {
            self.wakers.wake(queue);
        }
        debug!(
            user_id,
            message_id = message.id,
            queues = queues.len(),
            "message published"
        );
        Ok(())
    }

    async fn consume(
        &self,
        user_id: i64,
        device_class: &str,
    ) -> Result<Box<dyn Consumer>, ParleyError> {
        if !self.config.device_classes.iter().any(|c| c == device_class) {
            return Err(ParleyError::InvalidParam(format!(
                "unknown device class '{device_class}'"
            )));
        }
        let backlog = queue_name(user_id, device_class);
        let tag = format!("ctag-{}", uuid::Uuid::new_v4());
        let live = live_queue_name(user_id, device_class, &tag);
        q::declare_live_queue(&self.db, &exchange_name(user_id), &live, &backlog).await?;

        let consumer = SqliteConsumer::new(
            self.db.clone(),
            tag,
            live,
            backlog,
            self.wakers.clone(),
            self.config.poll_interval(),
        );
        debug!(user_id, queue = consumer.queue(), tag = consumer.tag(), "consumer started");
        Ok(Box::new(consumer))
    }
}
