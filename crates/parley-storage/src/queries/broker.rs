// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable broker tables: topology and crash-safe deliveries.
//!
//! A delivery is `pending` until a consumer claims it, then `unacked` under
//! that consumer's tag until it is acked (deleted) or requeued.
//!
//! Queues come in two kinds. A backlog queue (`backlog IS NULL`) is durable
//! and outlives connections. A live queue belongs to one consumer and names
//! its backlog; when it is retired its deliveries move to that backlog.

use parley_core::ParleyError;
use rusqlite::{params, params_from_iter, OptionalExtension, Transaction};

use crate::database::Database;
use crate::models::{delivery_from_row, DeliveryRow};

/// Declare a fanout exchange. Idempotent.
pub async fn declare_exchange(db: &Database, exchange: &str) -> Result<(), ParleyError> {
    let exchange = exchange.to_string();
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute(
                "INSERT OR IGNORE INTO broker_exchanges (name) VALUES (?1)",
                params![exchange],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

fn bind_backlog(tx: &Transaction<'_>, exchange: &str, queue: &str) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT OR IGNORE INTO broker_exchanges (name) VALUES (?1)",
        params![exchange],
    )?;
    tx.execute(
        "INSERT OR IGNORE INTO broker_queues (name) VALUES (?1)",
        params![queue],
    )?;
    tx.execute(
        "INSERT OR IGNORE INTO broker_bindings (exchange, queue) VALUES (?1, ?2)",
        params![exchange, queue],
    )?;
    Ok(())
}

/// Declare `exchange`, a durable backlog `queue`, and the binding between
/// them in one transaction. Idempotent.
pub async fn declare_bound_queue(
    db: &Database,
    exchange: &str,
    queue: &str,
) -> Result<(), ParleyError> {
    let exchange = exchange.to_string();
    let queue = queue.to_string();
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            let tx = conn.transaction()?;
            bind_backlog(&tx, &exchange, &queue)?;
            tx.commit()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Declare a live `queue` bound to `exchange` that falls back to `backlog`.
/// The backlog and its binding are declared too.
pub async fn declare_live_queue(
    db: &Database,
    exchange: &str,
    queue: &str,
    backlog: &str,
) -> Result<(), ParleyError> {
    let exchange = exchange.to_string();
    let queue = queue.to_string();
    let backlog = backlog.to_string();
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            let tx = conn.transaction()?;
            bind_backlog(&tx, &exchange, &backlog)?;
            tx.execute(
                "INSERT OR IGNORE INTO broker_queues (name, durable, backlog) VALUES (?1, 0, ?2)",
                params![queue, backlog],
            )?;
            tx.execute(
                "INSERT OR IGNORE INTO broker_bindings (exchange, queue) VALUES (?1, ?2)",
                params![exchange, queue],
            )?;
            tx.commit()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Queues currently bound to `exchange`, by name.
pub async fn bound_queues(db: &Database, exchange: &str) -> Result<Vec<String>, ParleyError> {
    let exchange = exchange.to_string();
    db.connection()
        .call(move |conn| -> Result<Vec<String>, rusqlite::Error> {
            let mut stmt = conn.prepare(
                "SELECT queue FROM broker_bindings WHERE exchange = ?1 ORDER BY queue",
            )?;
            let rows = stmt
                .query_map(params![exchange], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(rows)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Route a message to `exchange`: one copy per bound live queue, plus one
/// per bound backlog queue that has no live queue of its own. Returns the
/// queues that received a copy; all copies are written in one transaction.
pub async fn publish(
    db: &Database,
    exchange: &str,
    message_id: i64,
    body: &str,
    content_type: &str,
) -> Result<Vec<String>, ParleyError> {
    let exchange = exchange.to_string();
    let body = body.to_string();
    let content_type = content_type.to_string();
    db.connection()
        .call(move |conn| -> Result<Vec<String>, rusqlite::Error> {
            let tx = conn.transaction()?;
            let targets = {
                let mut stmt = tx.prepare(
                    "SELECT q.name FROM broker_bindings b
                     JOIN broker_queues q ON q.name = b.queue
                     WHERE b.exchange = ?1
                       AND (q.backlog IS NOT NULL
                            OR NOT EXISTS (
                                SELECT 1 FROM broker_queues live
                                JOIN broker_bindings lb ON lb.queue = live.name
                                WHERE live.backlog = q.name AND lb.exchange = ?1))
                     ORDER BY q.name",
                )?;
                stmt.query_map(params![exchange], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?
            };
            for queue in &targets {
                tx.execute(
                    "INSERT OR IGNORE INTO broker_deliveries (queue, message_id, body, content_type)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![queue, message_id, body, content_type],
                )?;
            }
            tx.commit()?;
            Ok(targets)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Claim the oldest pending delivery across `queues` for `consumer_tag`.
pub async fn claim_next(
    db: &Database,
    queues: &[String],
    consumer_tag: &str,
) -> Result<Option<DeliveryRow>, ParleyError> {
    if queues.is_empty() {
        return Ok(None);
    }
    let queues = queues.to_vec();
    let consumer_tag = consumer_tag.to_string();
    db.connection()
        .call(move |conn| -> Result<Option<DeliveryRow>, rusqlite::Error> {
            let tx = conn.transaction()?;
            let placeholders = vec!["?"; queues.len()].join(", ");
            let next = tx
                .query_row(
                    &format!(
                        "SELECT id, queue, body, content_type, delivery_count, created_at
                         FROM broker_deliveries
                         WHERE queue IN ({placeholders}) AND status = 'pending'
                         ORDER BY id ASC
                         LIMIT 1"
                    ),
                    params_from_iter(queues.iter()),
                    delivery_from_row,
                )
                .optional()?;
            let Some(row) = next else {
                tx.commit()?;
                return Ok(None);
            };
            tx.execute(
                "UPDATE broker_deliveries
                 SET status = 'unacked', consumer_tag = ?1, delivery_count = delivery_count + 1
                 WHERE id = ?2",
                params![consumer_tag, row.id],
            )?;
            tx.commit()?;
            Ok(Some(DeliveryRow {
                delivery_count: row.delivery_count + 1,
                ..row
            }))
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Acknowledge (delete) a delivery held by `consumer_tag`. Returns whether
/// a row was removed.
pub async fn ack(db: &Database, id: i64, consumer_tag: &str) -> Result<bool, ParleyError> {
    let consumer_tag = consumer_tag.to_string();
    db.connection()
        .call(move |conn| -> Result<bool, rusqlite::Error> {
            let removed = conn.execute(
                "DELETE FROM broker_deliveries
                 WHERE id = ?1 AND status = 'unacked' AND consumer_tag = ?2",
                params![id, consumer_tag],
            )?;
            Ok(removed > 0)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Return every delivery held by `consumer_tag` to the pending state.
pub async fn requeue_consumer(db: &Database, consumer_tag: &str) -> Result<usize, ParleyError> {
    let consumer_tag = consumer_tag.to_string();
    db.connection()
        .call(move |conn| -> Result<usize, rusqlite::Error> {
            conn.execute(
                "UPDATE broker_deliveries SET status = 'pending', consumer_tag = NULL
                 WHERE status = 'unacked' AND consumer_tag = ?1",
                params![consumer_tag],
            )
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Move the deliveries of every live queue matched by `filter` into its
/// backlog as pending, then drop those queues. A message the backlog
/// already holds is not copied twice. Returns the number of moved rows.
fn fold_live_queues(tx: &Transaction<'_>, filter: &str, arg: Option<&str>) -> rusqlite::Result<usize> {
    let live = format!("SELECT name FROM broker_queues WHERE backlog IS NOT NULL {filter}");
    let args: Vec<&str> = arg.into_iter().collect();
    let moved = tx.execute(
        &format!(
            "UPDATE OR IGNORE broker_deliveries
             SET queue = (SELECT backlog FROM broker_queues q WHERE q.name = broker_deliveries.queue),
                 status = 'pending', consumer_tag = NULL
             WHERE queue IN ({live})"
        ),
        params_from_iter(args.iter()),
    )?;
    tx.execute(
        &format!("DELETE FROM broker_deliveries WHERE queue IN ({live})"),
        params_from_iter(args.iter()),
    )?;
    tx.execute(
        &format!("DELETE FROM broker_bindings WHERE queue IN ({live})"),
        params_from_iter(args.iter()),
    )?;
    tx.execute(
        &format!("DELETE FROM broker_queues WHERE name IN ({live})"),
        params_from_iter(args.iter()),
    )?;
    Ok(moved)
}

/// Retire one live queue into its backlog. Returns the backlog name and how
/// many deliveries moved, or `None` if `queue` is not a live queue.
pub async fn retire_live_queue(
    db: &Database,
    queue: &str,
) -> Result<Option<(String, usize)>, ParleyError> {
    let queue = queue.to_string();
    db.connection()
        .call(move |conn| -> Result<Option<(String, usize)>, rusqlite::Error> {
            let tx = conn.transaction()?;
            let backlog: Option<String> = tx
                .query_row(
                    "SELECT backlog FROM broker_queues WHERE name = ?1 AND backlog IS NOT NULL",
                    params![queue],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(backlog) = backlog else {
                tx.commit()?;
                return Ok(None);
            };
            let moved = fold_live_queues(&tx, "AND name = ?1", Some(&queue))?;
            tx.commit()?;
            Ok(Some((backlog, moved)))
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Crash recovery, run once at startup when no consumer from a previous
/// process can still be alive: every live queue folds into its backlog and
/// every unacked delivery becomes pending again. Returns the number of
/// deliveries made available.
pub async fn recover(db: &Database) -> Result<usize, ParleyError> {
    db.connection()
        .call(|conn| -> Result<usize, rusqlite::Error> {
            let tx = conn.transaction()?;
            let folded = fold_live_queues(&tx, "", None)?;
            let requeued = tx.execute(
                "UPDATE broker_deliveries SET status = 'pending', consumer_tag = NULL
                 WHERE status = 'unacked'",
                [],
            )?;
            tx.commit()?;
            Ok(folded + requeued)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Remove a delivery regardless of state. Used for bodies that can never be
/// decoded.
pub async fn discard(db: &Database, id: i64) -> Result<(), ParleyError> {
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute("DELETE FROM broker_deliveries WHERE id = ?1", params![id])?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Number of deliveries on `queue` and the live queues backed by it, in the
/// given `status`.
async fn count_with_live(db: &Database, queue: &str, status: &'static str) -> Result<u64, ParleyError> {
    let queue = queue.to_string();
    db.connection()
        .call(move |conn| -> Result<i64, rusqlite::Error> {
            conn.query_row(
                "SELECT COUNT(*) FROM broker_deliveries
                 WHERE status = ?2
                   AND (queue = ?1 OR queue IN (SELECT name FROM broker_queues WHERE backlog = ?1))",
                params![queue, status],
                |row| row.get(0),
            )
        })
        .await
        .map(|n| n.max(0) as u64)
        .map_err(crate::database::map_tr_err)
}

/// Pending deliveries on `queue`, counting the live queues it backs.
pub async fn pending_count(db: &Database, queue: &str) -> Result<u64, ParleyError> {
    count_with_live(db, queue, "pending").await
}

/// Unacked deliveries on `queue`, counting the live queues it backs.
pub async fn unacked_count(db: &Database, queue: &str) -> Result<u64, ParleyError> {
    count_with_live(db, queue, "unacked").await
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn topology() -> Database {
        let db = Database::open_in_memory().await.unwrap();
        declare_bound_queue(&db, "7_exchange", "7_computer").await.unwrap();
        declare_bound_queue(&db, "7_exchange", "7_mobile").await.unwrap();
        db
    }

    fn queues(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[tokio::test]
    async fn declaration_is_idempotent() {
        let db = topology().await;
        declare_bound_queue(&db, "7_exchange", "7_computer").await.unwrap();
        declare_exchange(&db, "7_exchange").await.unwrap();
        assert_eq!(
            bound_queues(&db, "7_exchange").await.unwrap(),
            queues(&["7_computer", "7_mobile"])
        );
    }

    #[tokio::test]
    async fn publish_without_live_queues_fills_every_backlog() {
        let db = topology().await;
        let targets = publish(&db, "7_exchange", 1, "{}", "application/json").await.unwrap();
        assert_eq!(targets, queues(&["7_computer", "7_mobile"]));
        assert_eq!(pending_count(&db, "7_computer").await.unwrap(), 1);
        assert_eq!(pending_count(&db, "7_mobile").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn live_queues_each_get_a_copy_and_shadow_their_backlog() {
        let db = topology().await;
        declare_live_queue(&db, "7_exchange", "7_computer.a", "7_computer").await.unwrap();
        declare_live_queue(&db, "7_exchange", "7_computer.b", "7_computer").await.unwrap();

        let targets = publish(&db, "7_exchange", 1, "{}", "application/json").await.unwrap();
        assert_eq!(targets, queues(&["7_computer.a", "7_computer.b", "7_mobile"]));

        let a = claim_next(&db, &queues(&["7_computer.a", "7_computer"]), "a").await.unwrap();
        let b = claim_next(&db, &queues(&["7_computer.b", "7_computer"]), "b").await.unwrap();
        assert_eq!(a.unwrap().queue, "7_computer.a");
        assert_eq!(b.unwrap().queue, "7_computer.b");
    }

    #[tokio::test]
    async fn publish_without_bindings_is_dropped() {
        let db = Database::open_in_memory().await.unwrap();
        declare_exchange(&db, "8_exchange").await.unwrap();
        let targets = publish(&db, "8_exchange", 1, "{}", "application/json").await.unwrap();
        assert!(targets.is_empty());
    }

    #[tokio::test]
    async fn claims_are_fifo_and_exclusive() {
        let db = topology().await;
        for (id, body) in [(1, "a"), (2, "b"), (3, "c")] {
            publish(&db, "7_exchange", id, body, "text/plain").await.unwrap();
        }
        let backlog = queues(&["7_computer"]);
        let first = claim_next(&db, &backlog, "c1").await.unwrap().unwrap();
        let second = claim_next(&db, &backlog, "c2").await.unwrap().unwrap();
        assert_eq!(first.body, "a");
        assert_eq!(second.body, "b");
        assert_eq!(first.delivery_count, 1);
        assert_eq!(pending_count(&db, "7_computer").await.unwrap(), 1);
        assert_eq!(unacked_count(&db, "7_computer").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn claim_takes_backlog_before_newer_live_rows() {
        let db = topology().await;
        publish(&db, "7_exchange", 1, "old", "text/plain").await.unwrap();
        declare_live_queue(&db, "7_exchange", "7_computer.a", "7_computer").await.unwrap();
        publish(&db, "7_exchange", 2, "new", "text/plain").await.unwrap();

        let mine = queues(&["7_computer.a", "7_computer"]);
        assert_eq!(claim_next(&db, &mine, "a").await.unwrap().unwrap().body, "old");
        assert_eq!(claim_next(&db, &mine, "a").await.unwrap().unwrap().body, "new");
        assert!(claim_next(&db, &mine, "a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ack_requires_the_holding_consumer() {
        let db = topology().await;
        publish(&db, "7_exchange", 1, "a", "text/plain").await.unwrap();
        let backlog = queues(&["7_computer"]);
        let row = claim_next(&db, &backlog, "c1").await.unwrap().unwrap();
        assert!(!ack(&db, row.id, "someone-else").await.unwrap());
        assert!(ack(&db, row.id, "c1").await.unwrap());
        assert!(!ack(&db, row.id, "c1").await.unwrap());
        assert!(claim_next(&db, &backlog, "c1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn requeued_delivery_returns_in_original_position() {
        let db = topology().await;
        publish(&db, "7_exchange", 1, "a", "text/plain").await.unwrap();
        publish(&db, "7_exchange", 2, "b", "text/plain").await.unwrap();
        let backlog = queues(&["7_computer"]);
        let a = claim_next(&db, &backlog, "c1").await.unwrap().unwrap();
        assert_eq!(requeue_consumer(&db, "c1").await.unwrap(), 1);

        let again = claim_next(&db, &backlog, "c2").await.unwrap().unwrap();
        assert_eq!(again.id, a.id);
        assert_eq!(again.delivery_count, 2);
    }

    #[tokio::test]
    async fn retired_live_queue_folds_into_backlog_once() {
        let db = topology().await;
        declare_live_queue(&db, "7_exchange", "7_computer.a", "7_computer").await.unwrap();
        declare_live_queue(&db, "7_exchange", "7_computer.b", "7_computer").await.unwrap();
        publish(&db, "7_exchange", 1, "a", "text/plain").await.unwrap();
        publish(&db, "7_exchange", 2, "b", "text/plain").await.unwrap();
        let held = claim_next(&db, &queues(&["7_computer.a"]), "a").await.unwrap().unwrap();

        let (backlog, moved) = retire_live_queue(&db, "7_computer.a").await.unwrap().unwrap();
        assert_eq!((backlog.as_str(), moved), ("7_computer", 2));
        // The backlog already holds both ids, so b's copies are dropped.
        let (_, moved) = retire_live_queue(&db, "7_computer.b").await.unwrap().unwrap();
        assert_eq!(moved, 0);
        assert!(retire_live_queue(&db, "7_computer.b").await.unwrap().is_none());

        assert_eq!(pending_count(&db, "7_computer").await.unwrap(), 2);
        let again = claim_next(&db, &queues(&["7_computer"]), "c").await.unwrap().unwrap();
        assert_eq!(again.id, held.id);
        assert_eq!(again.delivery_count, 2);
        assert_eq!(
            bound_queues(&db, "7_exchange").await.unwrap(),
            queues(&["7_computer", "7_mobile"])
        );
    }

    #[tokio::test]
    async fn recovery_requeues_unacked_and_folds_live_queues() {
        let db = topology().await;
        publish(&db, "7_exchange", 1, "a", "text/plain").await.unwrap();
        declare_live_queue(&db, "7_exchange", "7_computer.a", "7_computer").await.unwrap();
        publish(&db, "7_exchange", 2, "b", "text/plain").await.unwrap();
        claim_next(&db, &queues(&["7_computer.a", "7_computer"]), "a").await.unwrap().unwrap();
        claim_next(&db, &queues(&["7_mobile"]), "m").await.unwrap().unwrap();

        // Message 2 folds back from the live queue and both copies of 1 requeue.
        assert_eq!(recover(&db).await.unwrap(), 3);
        assert_eq!(pending_count(&db, "7_computer").await.unwrap(), 2);
        assert_eq!(pending_count(&db, "7_mobile").await.unwrap(), 2);
        assert_eq!(unacked_count(&db, "7_computer").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn discard_removes_poison() {
        let db = topology().await;
        publish(&db, "7_exchange", 1, "not json", "text/plain").await.unwrap();
        let row = claim_next(&db, &queues(&["7_computer"]), "c1").await.unwrap().unwrap();
        discard(&db, row.id).await.unwrap();
        assert!(!ack(&db, row.id, "c1").await.unwrap());
    }
}
