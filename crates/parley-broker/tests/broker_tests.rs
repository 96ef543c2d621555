// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durability and ordering tests for the SQLite broker.

use std::time::Duration;

use parley_broker::SqliteBroker;
use parley_config::model::BrokerConfig;
use parley_core::{direct_session_id, timestamp_now, Broker, Message, SessionType};
use parley_storage::Database;
use tempfile::tempdir;

fn message(id: i64, content: &str) -> Message {
    Message {
        id,
        session_id: direct_session_id(1, 2),
        session_type: SessionType::DIRECT,
        from: 1,
        to: 2,
        content: content.to_string(),
        created_at: timestamp_now(),
        deleted_at: None,
    }
}

fn config() -> BrokerConfig {
    BrokerConfig {
        poll_interval_ms: 50,
        ..BrokerConfig::default()
    }
}

#[tokio::test]
async fn deliveries_arrive_in_publish_order() {
    let db = Database::open_in_memory().await.unwrap();
    let broker = SqliteBroker::open(db, config()).await.unwrap();
    let mut consumer = broker.consume(2, "computer").await.unwrap();
    for i in 1..=5 {
        broker.publish(2, &message(i, &format!("m{i}"))).await.unwrap();
    }
    for i in 1..=5 {
        let d = consumer.next().await.unwrap().unwrap();
        assert_eq!(d.message.id, i);
        consumer.ack(d.delivery_tag).await.unwrap();
    }
}

#[tokio::test]
async fn waiting_consumer_wakes_on_publish() {
    let db = Database::open_in_memory().await.unwrap();
    let broker = SqliteBroker::open(db, BrokerConfig {
        poll_interval_ms: 60_000,
        ..BrokerConfig::default()
    })
    .await
    .unwrap();
    let mut consumer = broker.consume(2, "computer").await.unwrap();
    let waiter = tokio::spawn(async move { consumer.next().await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    broker.publish(2, &message(1, "wake")).await.unwrap();

    let delivery = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .expect("consumer was not woken")
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(delivery.message.content, "wake");
}

#[tokio::test]
async fn cancelled_consumer_hands_unacked_delivery_to_the_next() {
    let db = Database::open_in_memory().await.unwrap();
    let broker = SqliteBroker::open(db, config()).await.unwrap();
    let mut first = broker.consume(2, "computer").await.unwrap();
    broker.publish(2, &message(1, "hello")).await.unwrap();

    let d = first.next().await.unwrap().unwrap();
    first.cancel().await.unwrap();
    first.cancel().await.unwrap();
    assert!(first.next().await.unwrap().is_none());

    let mut second = broker.consume(2, "computer").await.unwrap();
    let again = second.next().await.unwrap().unwrap();
    assert_eq!(again.message, d.message);
    assert!(again.redelivered);
    second.ack(again.delivery_tag).await.unwrap();
    assert_eq!(broker.pending(2, "computer").await.unwrap(), 0);
}

#[tokio::test]
async fn unacked_delivery_survives_a_crash() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("broker.db").display().to_string();

    let db = Database::open(&path).await.unwrap();
    let broker = SqliteBroker::open(db.clone(), config()).await.unwrap();
    let mut consumer = broker.consume(2, "computer").await.unwrap();
    broker.publish(2, &message(1, "hello")).await.unwrap();
    let d = consumer.next().await.unwrap().unwrap();
    // Simulate a crash: neither ack nor cancel runs.
    std::mem::forget(consumer);
    drop(broker);
    db.close().await.unwrap();

    let db = Database::open(&path).await.unwrap();
    let broker = SqliteBroker::open(db, config()).await.unwrap();
    assert_eq!(broker.pending(2, "computer").await.unwrap(), 1);
    let mut consumer = broker.consume(2, "computer").await.unwrap();
    let again = consumer.next().await.unwrap().unwrap();
    assert_eq!(again.message, d.message);
    assert!(again.redelivered);
}

#[tokio::test]
async fn acked_delivery_is_never_redelivered() {
    let db = Database::open_in_memory().await.unwrap();
    let broker = SqliteBroker::open(db, config()).await.unwrap();
    let mut consumer = broker.consume(2, "computer").await.unwrap();
    broker.publish(2, &message(1, "once")).await.unwrap();
    let d = consumer.next().await.unwrap().unwrap();
    consumer.ack(d.delivery_tag).await.unwrap();
    consumer.cancel().await.unwrap();

    let mut next = broker.consume(2, "computer").await.unwrap();
    let got = tokio::time::timeout(Duration::from_millis(200), next.next()).await;
    assert!(got.is_err(), "acked delivery was redelivered");
}

#[tokio::test]
async fn every_live_consumer_of_a_class_gets_its_own_copy() {
    let db = Database::open_in_memory().await.unwrap();
    let broker = SqliteBroker::open(db, config()).await.unwrap();
    let mut desk = broker.consume(2, "computer").await.unwrap();
    let mut laptop = broker.consume(2, "computer").await.unwrap();
    broker.publish(2, &message(1, "both")).await.unwrap();

    let a = desk.next().await.unwrap().unwrap();
    let b = laptop.next().await.unwrap().unwrap();
    assert_eq!(a.message, b.message);
    assert_ne!(a.delivery_tag, b.delivery_tag);
    desk.ack(a.delivery_tag).await.unwrap();
    laptop.ack(b.delivery_tag).await.unwrap();
    assert_eq!(broker.pending(2, "computer").await.unwrap(), 0);
    assert_eq!(broker.unacked(2, "computer").await.unwrap(), 0);
}

#[tokio::test]
async fn leftovers_of_a_closed_consumer_reach_its_sibling() {
    let db = Database::open_in_memory().await.unwrap();
    let broker = SqliteBroker::open(db, config()).await.unwrap();
    let mut desk = broker.consume(2, "computer").await.unwrap();
    let mut laptop = broker.consume(2, "computer").await.unwrap();
    broker.publish(2, &message(1, "first")).await.unwrap();
    broker.publish(2, &message(2, "second")).await.unwrap();

    // The desk holds message 1 and never sees message 2 before closing.
    desk.next().await.unwrap().unwrap();
    for id in 1..=2 {
        let d = laptop.next().await.unwrap().unwrap();
        assert_eq!(d.message.id, id);
        laptop.ack(d.delivery_tag).await.unwrap();
    }
    desk.cancel().await.unwrap();
    assert_eq!(broker.pending(2, "computer").await.unwrap(), 2);

    // At-least-once: the sibling sees the folded copies again.
    let again = laptop.next().await.unwrap().unwrap();
    assert_eq!(again.message.id, 1);
    assert!(again.redelivered);
    let fresh = laptop.next().await.unwrap().unwrap();
    assert_eq!(fresh.message.id, 2);
    assert!(!fresh.redelivered);
}
