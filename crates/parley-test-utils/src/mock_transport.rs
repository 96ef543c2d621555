// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock frame transport for deterministic connection tests.
//!
//! `MockTransport` builds the two halves the connection manager runs over
//! plus a [`MockClient`] that plays the remote device: it injects inbound
//! frames and observes every frame the server writes.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use futures::Sink;
use tokio::sync::{watch, Mutex, Notify};

use parley_core::{Message, ParleyError};
use parley_gateway::Frame;

/// Server-side write half handed to the connection manager.
pub type MockSink = Pin<Box<dyn Sink<Frame, Error = ParleyError> + Send>>;

/// Server-side read half handed to the connection manager.
pub type MockStream = UnboundedReceiver<Result<Frame, ParleyError>>;

struct Wire {
    written: Mutex<Vec<Frame>>,
    notify: Notify,
    inbound: UnboundedSender<Result<Frame, ParleyError>>,
    blocked: watch::Sender<bool>,
    hung_up: watch::Sender<bool>,
    auto_pong: bool,
    write_delay: Option<Duration>,
}

impl Wire {
    async fn write(&self, frame: Frame) -> Result<(), ParleyError> {
        let mut blocked = self.blocked.subscribe();
        let unblocked = blocked.wait_for(|b| !*b).await.is_ok();
        if !unblocked {
            return Err(closed());
        }
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }
        if *self.hung_up.borrow() {
            return Err(closed());
        }
        if self.auto_pong {
            if let Frame::Ping(payload) = &frame {
                let _ = self.inbound.unbounded_send(Ok(Frame::Pong(payload.clone())));
            }
        }
        self.written.lock().await.push(frame);
        self.notify.notify_waiters();
        Ok(())
    }
}

fn closed() -> ParleyError {
    ParleyError::Channel {
        message: "mock transport closed".into(),
        source: None,
    }
}

/// Builder for a mock transport.
pub struct MockTransport {
    auto_pong: bool,
    write_delay: Option<Duration>,
    blocked: bool,
}

impl MockTransport {
    /// A transport whose client answers every ping.
    pub fn new() -> Self {
        Self {
            auto_pong: true,
            write_delay: None,
            blocked: false,
        }
    }

    /// Whether the client answers pings automatically.
    pub fn with_auto_pong(mut self, auto_pong: bool) -> Self {
        self.auto_pong = auto_pong;
        self
    }

    /// Delay every server write by `delay`.
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    /// Start with writes blocked until [`MockClient::unblock_writes`].
    pub fn with_blocked_writes(mut self) -> Self {
        self.blocked = true;
        self
    }

    /// Split into the server's sink and stream and the client handle.
    pub fn build(self) -> (MockSink, MockStream, MockClient) {
        let (inbound, stream) = mpsc::unbounded();
        let wire = Arc::new(Wire {
            written: Mutex::new(Vec::new()),
            notify: Notify::new(),
            inbound,
            blocked: watch::Sender::new(self.blocked),
            hung_up: watch::Sender::new(false),
            auto_pong: self.auto_pong,
            write_delay: self.write_delay,
        });
        let sink = futures::sink::unfold(wire.clone(), |wire, frame: Frame| async move {
            wire.write(frame).await?;
            Ok::<_, ParleyError>(wire)
        });
        let client = MockClient {
            wire,
            cursor: Arc::new(Mutex::new(0)),
        };
        (Box::pin(sink), stream, client)
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// The remote end of a mock transport.
#[derive(Clone)]
pub struct MockClient {
    wire: Arc<Wire>,
    // Index of the next written frame `next_message` inspects.
    cursor: Arc<Mutex<usize>>,
}

impl MockClient {
    /// Deliver a raw frame to the server.
    pub fn send_frame(&self, frame: Frame) {
        let _ = self.wire.inbound.unbounded_send(Ok(frame));
    }

    /// Deliver a text frame to the server.
    pub fn send_text(&self, text: impl Into<String>) {
        self.send_frame(Frame::Text(text.into()));
    }

    /// Send a direct message the way a browser client would.
    pub fn send_message(&self, to: i64, content: &str) {
        let payload = serde_json::json!({
            "session_type": 1,
            "message_to": to.to_string(),
            "content": content,
        });
        self.send_text(payload.to_string());
    }

    /// Inject a transport read error.
    pub fn fail_read(&self) {
        let _ = self.wire.inbound.unbounded_send(Err(closed()));
    }

    /// Every frame the server has written so far.
    pub async fn sent_frames(&self) -> Vec<Frame> {
        self.wire.written.lock().await.clone()
    }

    /// Messages the server has written so far, in write order.
    pub async fn received_messages(&self) -> Vec<Message> {
        self.wire
            .written
            .lock()
            .await
            .iter()
            .filter_map(as_message)
            .collect()
    }

    /// Wait up to `wait` for the next message frame the server writes.
    pub async fn next_message(&self, wait: Duration) -> Option<Message> {
        let mut cursor = self.cursor.lock().await;
        let found = self
            .wait_until(wait, |frames| {
                frames
                    .iter()
                    .enumerate()
                    .skip(*cursor)
                    .find_map(|(i, f)| as_message(f).map(|m| (i, m)))
            })
            .await;
        let (index, message) = found?;
        *cursor = index + 1;
        Some(message)
    }

    /// Wait up to `wait` for the server's close frame.
    pub async fn wait_for_close(&self, wait: Duration) -> bool {
        self.wait_until(wait, |frames| frames.contains(&Frame::Close).then_some(()))
            .await
            .is_some()
    }

    /// Stop the server's writes from completing.
    pub fn block_writes(&self) {
        self.wire.blocked.send_replace(true);
    }

    /// Let blocked writes through.
    pub fn unblock_writes(&self) {
        self.wire.blocked.send_replace(false);
    }

    /// Drop the connection without a close frame: reads end, writes fail.
    pub fn hang_up(&self) {
        self.wire.hung_up.send_replace(true);
        self.wire.inbound.close_channel();
    }

    async fn wait_until<T>(&self, wait: Duration, check: impl Fn(&[Frame]) -> Option<T>) -> Option<T> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let notified = self.wire.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(found) = check(self.wire.written.lock().await.as_slice()) {
                return Some(found);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }
}

fn as_message(frame: &Frame) -> Option<Message> {
    match frame {
        Frame::Text(text) => Message::from_json(text).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};

    #[tokio::test]
    async fn writes_are_captured_and_pings_answered() {
        let (mut sink, mut stream, client) = MockTransport::new().build();
        sink.send(Frame::Ping(vec![1])).await.unwrap();
        assert_eq!(client.sent_frames().await, vec![Frame::Ping(vec![1])]);
        assert_eq!(stream.next().await.unwrap().unwrap(), Frame::Pong(vec![1]));
    }

    #[tokio::test]
    async fn hang_up_ends_reads_and_fails_writes() {
        let (mut sink, mut stream, client) = MockTransport::new().build();
        client.hang_up();
        assert!(stream.next().await.is_none());
        assert!(sink.send(Frame::Close).await.is_err());
        assert!(!client.wait_for_close(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn blocked_writes_wait_for_unblock() {
        let (mut sink, _stream, client) = MockTransport::new().with_blocked_writes().build();
        let write = tokio::spawn(async move { sink.send(Frame::Close).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(client.sent_frames().await.is_empty());
        client.unblock_writes();
        write.await.unwrap().unwrap();
        assert!(client.wait_for_close(Duration::from_secs(1)).await);
    }
}
