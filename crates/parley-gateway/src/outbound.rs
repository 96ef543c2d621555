// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bounded outbound buffer between a connection's consume task and its
//! write task. This is the connection's back-pressure point.

use std::collections::VecDeque;

use parley_config::model::BackpressurePolicy;
use tokio::sync::{Mutex, Notify};

use crate::frame::Frame;

/// Result of offering a frame to the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The frame was queued.
    Queued,
    /// The buffer was full; the oldest frame was evicted to make room.
    DroppedOldest,
    /// The buffer was full and the policy is to close the connection.
    /// The frame was not queued.
    Full,
    /// The buffer no longer accepts frames.
    Closed,
}

#[derive(Debug, Default)]
struct State {
    frames: VecDeque<Frame>,
    closed: bool,
}

/// Single-consumer bounded FIFO of frames.
#[derive(Debug)]
pub struct OutboundBuffer {
    state: Mutex<State>,
    ready: Notify,
    capacity: usize,
    policy: BackpressurePolicy,
}

impl OutboundBuffer {
    pub fn new(capacity: usize, policy: BackpressurePolicy) -> Self {
        Self {
            state: Mutex::new(State {
                frames: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            ready: Notify::new(),
            capacity: capacity.max(1),
            policy,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> BackpressurePolicy {
        self.policy
    }

    /// Offer a frame without waiting.
    pub async fn push(&self, frame: Frame) -> PushOutcome {
        let outcome = {
            let mut state = self.state.lock().await;
            if state.closed {
                return PushOutcome::Closed;
            }
            if state.frames.len() < self.capacity {
                state.frames.push_back(frame);
                PushOutcome::Queued
            } else {
                match self.policy {
                    BackpressurePolicy::Close => return PushOutcome::Full,
                    BackpressurePolicy::DropOldest => {
                        state.frames.pop_front();
                        state.frames.push_back(frame);
                        PushOutcome::DroppedOldest
                    }
                }
            }
        };
        self.ready.notify_one();
        outcome
    }

    /// Wait for the next frame. Returns `None` once the buffer is closed and
    /// everything queued before the close has been taken.
    pub async fn pop(&self) -> Option<Frame> {
        loop {
            let notified = self.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.state.lock().await;
                if let Some(frame) = state.frames.pop_front() {
                    return Some(frame);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Stop accepting frames. Already queued frames can still be popped.
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
        self.ready.notify_waiters();
        self.ready.notify_one();
    }

    /// Drop every queued frame and close.
    pub async fn release(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        state.frames.clear();
        drop(state);
        self.ready.notify_waiters();
        self.ready.notify_one();
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.frames.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
