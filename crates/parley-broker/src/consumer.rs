// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Manual-ack consumer over one live queue and its backlog.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use parley_core::{Consumer, Delivery, Message, ParleyError};
use parley_storage::queries::broker as q;
use parley_storage::Database;

use crate::sqlite::Wakers;

/// Consumer of one live queue, also draining the backlog of its class.
/// Claimed deliveries are held under this consumer's tag until acked;
/// cancelling (or dropping) requeues them and folds the live queue back
/// into the backlog.
pub struct SqliteConsumer {
    db: Database,
    tag: String,
    queue: String,
    backlog: String,
    wakers: Wakers,
    poll_interval: Duration,
    cancelled: bool,
}

impl SqliteConsumer {
    pub(crate) fn new(
        db: Database,
        tag: String,
        queue: String,
        backlog: String,
        wakers: Wakers,
        poll_interval: Duration,
    ) -> Self {
        Self {
            db,
            tag,
            queue,
            backlog,
            wakers,
            poll_interval,
            cancelled: false,
        }
    }
}

/// Give back everything `tag` holds and retire its live `queue`.
async fn release(db: &Database, wakers: &Wakers, tag: &str, queue: &str) -> Result<usize, ParleyError> {
    let requeued = q::requeue_consumer(db, tag).await?;
    let retired = q::retire_live_queue(db, queue).await?;
    wakers.forget(queue);
    if let Some((backlog, moved)) = retired {
        if moved > 0 {
            wakers.wake(&backlog);
        }
    }
    Ok(requeued)
}

#[async_trait]
impl Consumer for SqliteConsumer {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn queue(&self) -> &str {
        &self.queue
    }

    async fn next(&mut self) -> Result<Option<Delivery>, ParleyError> {
        let live = self.wakers.get(&self.queue);
        let backlog = self.wakers.get(&self.backlog);
        let queues = [self.queue.clone(), self.backlog.clone()];
        loop {
            if self.cancelled {
                return Ok(None);
            }
            // Register interest before looking, so a publish that lands
            // between the empty claim and the wait still wakes us.
            let on_live = live.notified();
            let on_backlog = backlog.notified();
            tokio::pin!(on_live, on_backlog);
            on_live.as_mut().enable();
            on_backlog.as_mut().enable();

            if let Some(row) = q::claim_next(&self.db, &queues, &self.tag).await? {
                match Message::from_json(&row.body) {
                    Ok(message) => {
                        return Ok(Some(Delivery {
                            delivery_tag: row.id as u64,
                            redelivered: row.delivery_count > 1,
                            message,
                        }));
                    }
                    Err(e) => {
                        warn!(queue = %row.queue, delivery = row.id, error = %e, "discarding undecodable delivery");
                        q::discard(&self.db, row.id).await?;
                        continue;
                    }
                }
            }

            tokio::select! {
                _ = &mut on_live => {}
                _ = &mut on_backlog => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    async fn ack(&mut self, delivery_tag: u64) -> Result<(), ParleyError> {
        let id = i64::try_from(delivery_tag)
            .map_err(|_| ParleyError::InvalidParam(format!("delivery tag {delivery_tag}")))?;
        if q::ack(&self.db, id, &self.tag).await? {
            Ok(())
        } else {
            Err(ParleyError::broker(format!(
                "delivery {delivery_tag} is not held by consumer {}",
                self.tag
            )))
        }
    }

    async fn cancel(&mut self) -> Result<(), ParleyError> {
        if self.cancelled {
            return Ok(());
        }
        self.cancelled = true;
        let requeued = release(&self.db, &self.wakers, &self.tag, &self.queue).await?;
        debug!(queue = %self.queue, tag = %self.tag, requeued, "consumer cancelled");
        Ok(())
    }
}

impl Drop for SqliteConsumer {
    fn drop(&mut self) {
        if self.cancelled {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(tag = %self.tag, "consumer dropped outside a runtime; unacked deliveries wait for restart");
            return;
        };
        let db = self.db.clone();
        let tag = std::mem::take(&mut self.tag);
        let queue = std::mem::take(&mut self.queue);
        let wakers = self.wakers.clone();
        handle.spawn(async move {
            if let Err(e) = release(&db, &wakers, &tag, &queue).await {
                warn!(%tag, error = %e, "failed to release deliveries of dropped consumer");
            }
        });
    }
}
