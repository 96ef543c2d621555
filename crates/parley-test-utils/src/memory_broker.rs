// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory broker with the same topology and ack semantics as the SQLite
//! broker, plus hooks for simulating failures.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use parley_core::traits::broker::{live_queue_name, queue_name};
use parley_core::{Broker, Consumer, Delivery, HealthStatus, Message, ParleyError, PluginAdapter};

#[derive(Debug, Clone)]
struct Queued {
    tag: u64,
    message: Message,
    redelivered: bool,
}

#[derive(Debug, Default)]
struct Queue {
    /// Sorted by delivery tag.
    pending: VecDeque<Queued>,
    unacked: HashMap<u64, (String, Queued)>,
    notify: Arc<Notify>,
    /// Set on live queues.
    backlog: Option<String>,
}

impl Queue {
    fn holds(&self, message_id: i64) -> bool {
        self.pending.iter().any(|e| e.message.id == message_id)
            || self.unacked.values().any(|(_, e)| e.message.id == message_id)
    }

    fn insert_sorted(&mut self, entry: Queued) {
        let at = self.pending.partition_point(|e| e.tag < entry.tag);
        self.pending.insert(at, entry);
    }
}

#[derive(Debug, Default)]
struct Inner {
    bindings: HashMap<i64, BTreeSet<String>>,
    queues: HashMap<String, Queue>,
    next_tag: u64,
    published: Vec<(i64, Message)>,
    fail_publish: bool,
}

impl Inner {
    fn declare(&mut self, user_id: i64, queue: &str, backlog: Option<&str>) -> Arc<Notify> {
        self.bindings
            .entry(user_id)
            .or_default()
            .insert(queue.to_string());
        let q = self.queues.entry(queue.to_string()).or_insert_with(|| Queue {
            backlog: backlog.map(str::to_string),
            ..Queue::default()
        });
        q.notify.clone()
    }

    fn shadowed(&self, user_id: i64, backlog: &str) -> bool {
        self.bindings.get(&user_id).is_some_and(|bound| {
            bound.iter().any(|name| {
                self.queues
                    .get(name)
                    .is_some_and(|q| q.backlog.as_deref() == Some(backlog))
            })
        })
    }

    fn targets(&self, user_id: i64) -> Vec<String> {
        let Some(bound) = self.bindings.get(&user_id) else {
            return Vec::new();
        };
        bound
            .iter()
            .filter(|name| {
                self.queues.get(name.as_str()).is_some_and(|q| {
                    q.backlog.is_some() || !self.shadowed(user_id, name)
                })
            })
            .cloned()
            .collect()
    }

    fn requeue(&mut self, queue: &str, holder: Option<&str>) -> usize {
        let Some(q) = self.queues.get_mut(queue) else {
            return 0;
        };
        let back: Vec<u64> = q
            .unacked
            .iter()
            .filter(|(_, (tag, _))| holder.is_none_or(|h| h == tag.as_str()))
            .map(|(id, _)| *id)
            .collect();
        for id in &back {
            if let Some((_, mut entry)) = q.unacked.remove(id) {
                entry.redelivered = true;
                q.insert_sorted(entry);
            }
        }
        if !back.is_empty() {
            q.notify.notify_waiters();
        }
        back.len()
    }

    /// Fold a live queue into its backlog and forget it. Returns the number
    /// of entries moved.
    fn retire(&mut self, queue: &str) -> usize {
        let Some(live) = self.queues.remove(queue) else {
            return 0;
        };
        for bound in self.bindings.values_mut() {
            bound.remove(queue);
        }
        let Some(backlog) = live.backlog.and_then(|name| self.queues.get_mut(&name)) else {
            return 0;
        };
        let leftovers = live.pending.into_iter().chain(
            live.unacked.into_values().map(|(_, mut entry)| {
                entry.redelivered = true;
                entry
            }),
        );
        let mut moved = 0;
        for entry in leftovers {
            if !backlog.holds(entry.message.id) {
                backlog.insert_sorted(entry);
                moved += 1;
            }
        }
        if moved > 0 {
            backlog.notify.notify_waiters();
        }
        moved
    }

    /// Sum `count` over `queue` and the live queues it backs.
    fn count_with_live(&self, queue: &str, count: impl Fn(&Queue) -> usize) -> usize {
        self.queues
            .iter()
            .filter(|(name, q)| name.as_str() == queue || q.backlog.as_deref() == Some(queue))
            .map(|(_, q)| count(q))
            .sum()
    }
}

/// In-memory [`Broker`]. Clones share state.
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    inner: Arc<Mutex<Inner>>,
    default_class: String,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new("computer")
    }
}

impl MemoryBroker {
    pub fn new(default_class: &str) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            default_class: default_class.to_string(),
        }
    }

    /// Every successful publish, in order, as `(user_id, message)`.
    pub async fn published(&self) -> Vec<(i64, Message)> {
        self.inner.lock().await.published.clone()
    }

    /// Pending (unclaimed) messages for a device class, live queues included.
    pub async fn pending(&self, user_id: i64, device_class: &str) -> usize {
        let inner = self.inner.lock().await;
        inner.count_with_live(&queue_name(user_id, device_class), |q| q.pending.len())
    }

    /// Claimed but unacknowledged messages for a device class.
    pub async fn unacked(&self, user_id: i64, device_class: &str) -> usize {
        let inner = self.inner.lock().await;
        inner.count_with_live(&queue_name(user_id, device_class), |q| q.unacked.len())
    }

    /// Make subsequent publishes fail.
    pub async fn set_fail_publish(&self, fail: bool) {
        self.inner.lock().await.fail_publish = fail;
    }

    /// Return every unacked message to its queue and fold live queues into
    /// their backlogs, as a broker restart does.
    pub async fn recover(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let names: Vec<String> = inner.queues.keys().cloned().collect();
        let requeued: usize = names.iter().map(|q| inner.requeue(q, None)).sum();
        let live: Vec<String> = inner
            .queues
            .iter()
            .filter(|(_, q)| q.backlog.is_some())
            .map(|(name, _)| name.clone())
            .collect();
        live.iter().for_each(|q| {
            inner.retire(q);
        });
        requeued
    }
}

#[async_trait]
impl PluginAdapter for MemoryBroker {
    fn name(&self) -> &str {
        "memory-broker"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    async fn health_check(&self) -> Result<HealthStatus, ParleyError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), ParleyError> {
        Ok(())
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, user_id: i64, message: &Message) -> Result<(), ParleyError> {
        let mut inner = self.inner.lock().await;
        if inner.fail_publish {
            return Err(ParleyError::broker("publish failure injected"));
        }
        inner.declare(user_id, &queue_name(user_id, &self.default_class), None);
        for queue in inner.targets(user_id) {
            inner.next_tag += 1;
            let tag = inner.next_tag;
            if let Some(q) = inner.queues.get_mut(&queue) {
                if q.holds(message.id) {
                    continue;
                }
                q.pending.push_back(Queued {
                    tag,
                    message: message.clone(),
                    redelivered: false,
                });
                q.notify.notify_waiters();
            }
        }
        inner.published.push((user_id, message.clone()));
        Ok(())
    }

    async fn consume(
        &self,
        user_id: i64,
        device_class: &str,
    ) -> Result<Box<dyn Consumer>, ParleyError> {
        let tag = format!("mem-{}", uuid::Uuid::new_v4());
        let backlog = queue_name(user_id, device_class);
        let queue = live_queue_name(user_id, device_class, &tag);
        let (live_notify, backlog_notify) = {
            let mut inner = self.inner.lock().await;
            let backlog_notify = inner.declare(user_id, &backlog, None);
            (inner.declare(user_id, &queue, Some(backlog.as_str())), backlog_notify)
        };
        Ok(Box::new(MemoryConsumer {
            inner: self.inner.clone(),
            queue,
            backlog,
            tag,
            live_notify,
            backlog_notify,
            cancelled: false,
        }))
    }
}

struct MemoryConsumer {
    inner: Arc<Mutex<Inner>>,
    queue: String,
    backlog: String,
    tag: String,
    live_notify: Arc<Notify>,
    backlog_notify: Arc<Notify>,
    cancelled: bool,
}

impl MemoryConsumer {
    /// Pop the oldest pending entry across the live queue and the backlog.
    fn claim(&self, inner: &mut Inner) -> Option<Delivery> {
        let front = |name: &str| {
            inner
                .queues
                .get(name)
                .and_then(|q| q.pending.front())
                .map(|e| e.tag)
        };
        let from = match (front(&self.queue), front(&self.backlog)) {
            (Some(live), Some(backlog)) if backlog < live => &self.backlog,
            (Some(_), _) => &self.queue,
            (None, Some(_)) => &self.backlog,
            (None, None) => return None,
        };
        let q = inner.queues.get_mut(from)?;
        let entry = q.pending.pop_front()?;
        let delivery = Delivery {
            delivery_tag: entry.tag,
            redelivered: entry.redelivered,
            message: entry.message.clone(),
        };
        q.unacked.insert(entry.tag, (self.tag.clone(), entry));
        Some(delivery)
    }

    fn release(inner: &mut Inner, queue: &str, backlog: &str, tag: &str) {
        inner.requeue(queue, Some(tag));
        inner.requeue(backlog, Some(tag));
        inner.retire(queue);
    }
}

#[async_trait]
impl Consumer for MemoryConsumer {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn queue(&self) -> &str {
        &self.queue
    }

    async fn next(&mut self) -> Result<Option<Delivery>, ParleyError> {
        loop {
            if self.cancelled {
                return Ok(None);
            }
            let on_live = self.live_notify.notified();
            let on_backlog = self.backlog_notify.notified();
            tokio::pin!(on_live, on_backlog);
            on_live.as_mut().enable();
            on_backlog.as_mut().enable();
            {
                let mut inner = self.inner.lock().await;
                if let Some(delivery) = self.claim(&mut inner) {
                    return Ok(Some(delivery));
                }
            }
            tokio::select! {
                _ = &mut on_live => {}
                _ = &mut on_backlog => {}
            }
        }
    }

    async fn ack(&mut self, delivery_tag: u64) -> Result<(), ParleyError> {
        let mut inner = self.inner.lock().await;
        let mut held = None;
        for name in [&self.queue, &self.backlog] {
            let Some(q) = inner.queues.get_mut(name) else {
                continue;
            };
            let ours = q
                .unacked
                .get(&delivery_tag)
                .is_some_and(|(holder, _)| *holder == self.tag);
            if ours {
                held = q.unacked.remove(&delivery_tag);
                break;
            }
        }
        match held {
            Some(_) => Ok(()),
            None => Err(ParleyError::broker(format!(
                "delivery {delivery_tag} is not held by {}",
                self.tag
            ))),
        }
    }

    async fn cancel(&mut self) -> Result<(), ParleyError> {
        if !self.cancelled {
            self.cancelled = true;
            let mut inner = self.inner.lock().await;
            Self::release(&mut inner, &self.queue, &self.backlog, &self.tag);
        }
        Ok(())
    }
}

impl Drop for MemoryConsumer {
    fn drop(&mut self) {
        if self.cancelled {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let inner = self.inner.clone();
        let queue = std::mem::take(&mut self.queue);
        let backlog = std::mem::take(&mut self.backlog);
        let tag = std::mem::take(&mut self.tag);
        handle.spawn(async move {
            let mut inner = inner.lock().await;
            Self::release(&mut inner, &queue, &backlog, &tag);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::{direct_session_id, timestamp_now, SessionType};

    fn message(id: i64) -> Message {
        Message {
            id,
            session_id: direct_session_id(1, 2),
            session_type: SessionType::DIRECT,
            from: 1,
            to: 2,
            content: "x".into(),
            created_at: timestamp_now(),
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn cancel_requeues_in_original_order() {
        let broker = MemoryBroker::default();
        let mut first = broker.consume(2, "computer").await.unwrap();
        for id in 1..=3 {
            broker.publish(2, &message(id)).await.unwrap();
        }
        let a = first.next().await.unwrap().unwrap();
        let b = first.next().await.unwrap().unwrap();
        first.ack(a.delivery_tag).await.unwrap();
        first.cancel().await.unwrap();
        assert!(first.next().await.unwrap().is_none());

        let mut second = broker.consume(2, "computer").await.unwrap();
        let again = second.next().await.unwrap().unwrap();
        assert_eq!(again.message.id, b.message.id);
        assert!(again.redelivered);
        assert_eq!(second.next().await.unwrap().unwrap().message.id, 3);
    }

    #[tokio::test]
    async fn ack_by_other_consumer_fails() {
        let broker = MemoryBroker::default();
        let mut a = broker.consume(2, "computer").await.unwrap();
        let mut b = broker.consume(2, "computer").await.unwrap();
        broker.publish(2, &message(1)).await.unwrap();
        let d = a.next().await.unwrap().unwrap();
        assert!(b.ack(d.delivery_tag).await.is_err());
        assert!(a.ack(d.delivery_tag).await.is_ok());
    }

    #[tokio::test]
    async fn each_consumer_of_a_class_gets_every_message() {
        let broker = MemoryBroker::default();
        let mut a = broker.consume(2, "computer").await.unwrap();
        let mut b = broker.consume(2, "computer").await.unwrap();
        for id in 1..=2 {
            broker.publish(2, &message(id)).await.unwrap();
        }
        for consumer in [&mut a, &mut b] {
            for id in 1..=2 {
                let d = consumer.next().await.unwrap().unwrap();
                assert_eq!(d.message.id, id);
                consumer.ack(d.delivery_tag).await.unwrap();
            }
        }
        assert_eq!(broker.pending(2, "computer").await, 0);
    }

    #[tokio::test]
    async fn recover_folds_live_queues_once_per_message() {
        let broker = MemoryBroker::default();
        let mut a = broker.consume(2, "computer").await.unwrap();
        let _b = broker.consume(2, "computer").await.unwrap();
        broker.publish(2, &message(1)).await.unwrap();
        a.next().await.unwrap().unwrap();
        assert_eq!(broker.unacked(2, "computer").await, 1);
        assert_eq!(broker.pending(2, "computer").await, 1);

        assert_eq!(broker.recover().await, 1);
        assert_eq!(broker.pending(2, "computer").await, 1);
        assert_eq!(broker.unacked(2, "computer").await, 0);
    }
}
