// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Connection manager: the lifecycle of one authenticated client connection.
//!
//! ```text
//!  connecting --consume_ok--> open --peer_close--> draining --flush--> closed
//!                               \--read_error / write_error / cancel--> closed
//! ```
//!
//! An open connection runs four tasks sharing one outbound buffer:
//! - read: decodes frames and dispatches them serially, and enforces the
//!   pong deadline
//! - write: the only task that writes to the transport; control frames
//!   first, then the outbound buffer
//! - heartbeat: asks the write task for a ping every `ping_period`
//! - consume: moves broker deliveries into the outbound buffer, acking each
//!   only once it is buffered
//!
//! Every task watches the connection's cancellation token. Unacked
//! deliveries are requeued by the broker when the consumer is cancelled.
//! Draining lasts at most [`DRAIN_TIMEOUT`].

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::{Sink, SinkExt, Stream, StreamExt};
use strum::Display;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use parley_config::model::{BackpressurePolicy, ConnectionConfig};
use parley_core::{Broker, Consumer, ParleyError};

use crate::dispatch::Dispatcher;
use crate::frame::{decode_data_frame, encode_message, Frame};
use crate::outbound::{OutboundBuffer, PushOutcome};

/// How long the final close frame may take to write.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// How long a connection may stay draining after the peer's close frame
/// before it is torn down with whatever is still buffered.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Capacity of the control-frame channel (pings, pongs).
const CONTROL_CAPACITY: usize = 16;

/// Observable lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Open,
    Draining,
    Closed,
}

/// Liveness and buffering parameters of every connection.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub pong_wait: Duration,
    pub ping_period: Duration,
    pub outbound_capacity: usize,
    pub backpressure: BackpressurePolicy,
}

impl From<&ConnectionConfig> for ConnectionSettings {
    fn from(config: &ConnectionConfig) -> Self {
        Self {
            pong_wait: config.pong_wait(),
            ping_period: config.ping_period(),
            outbound_capacity: config.outbound_capacity,
            backpressure: config.backpressure,
        }
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self::from(&ConnectionConfig::default())
    }
}

/// Handle to a running connection.
#[derive(Debug)]
pub struct ConnectionHandle {
    conn_id: String,
    user_id: i64,
    state: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ConnectionHandle {
    pub fn conn_id(&self) -> &str {
        &self.conn_id
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// A receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Terminate the connection. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Wait until the connection is closed and cleaned up.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!(conn_id = %self.conn_id, error = %e, "connection task failed");
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct LiveConnection {
    user_id: i64,
}

/// Accepts transports and runs connections over them.
#[derive(Clone)]
pub struct ConnectionManager {
    dispatcher: Dispatcher,
    broker: Arc<dyn Broker>,
    settings: ConnectionSettings,
    shutdown: CancellationToken,
    live: Arc<DashMap<String, LiveConnection>>,
}

impl ConnectionManager {
    pub fn new(dispatcher: Dispatcher, broker: Arc<dyn Broker>, settings: ConnectionSettings) -> Self {
        Self {
            dispatcher,
            broker,
            settings,
            shutdown: CancellationToken::new(),
            live: Arc::new(DashMap::new()),
        }
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Number of connections that have not yet been cleaned up.
    pub fn live_connections(&self) -> usize {
        self.live.len()
    }

    /// Number of live connections owned by `user_id`.
    pub fn connections_of(&self, user_id: i64) -> usize {
        self.live.iter().filter(|c| c.value().user_id == user_id).count()
    }

    /// Cancel every connection, current and future.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Start a connection for `user_id` over a split transport.
    pub fn connect<S, R>(&self, sink: S, stream: R, user_id: i64, device_class: &str) -> ConnectionHandle
    where
        S: Sink<Frame, Error = ParleyError> + Send + Unpin + 'static,
        R: Stream<Item = Result<Frame, ParleyError>> + Send + Unpin + 'static,
    {
        let conn_id = uuid::Uuid::new_v4().to_string();
        let cancel = self.shutdown.child_token();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        self.live.insert(conn_id.clone(), LiveConnection { user_id });

        let span = tracing::info_span!("connection", %conn_id, user_id, device = %device_class);
        let run = Run {
            manager: self.clone(),
            conn_id: conn_id.clone(),
            user_id,
            device_class: device_class.to_string(),
            cancel: cancel.clone(),
            state: state_tx,
        };
        let task = tokio::spawn(run.execute(sink, stream).instrument(span));

        ConnectionHandle {
            conn_id,
            user_id,
            state: state_rx,
            cancel,
            task,
        }
    }
}

/// State shared by the four tasks of one connection.
struct Shared {
    user_id: i64,
    buffer: OutboundBuffer,
    cancel: CancellationToken,
    state: watch::Sender<ConnectionState>,
}

impl Shared {
    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|current| {
            // Closed is terminal; Draining only follows Open.
            let allowed = match (*current, next) {
                (ConnectionState::Closed, _) => false,
                (ConnectionState::Draining, ConnectionState::Open) => false,
                (a, b) => a != b,
            };
            if allowed {
                *current = next;
            }
            allowed
        });
    }

    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }
}

struct Run {
    manager: ConnectionManager,
    conn_id: String,
    user_id: i64,
    device_class: String,
    cancel: CancellationToken,
    state: watch::Sender<ConnectionState>,
}

impl Run {
    async fn execute<S, R>(self, mut sink: S, stream: R)
    where
        S: Sink<Frame, Error = ParleyError> + Send + Unpin + 'static,
        R: Stream<Item = Result<Frame, ParleyError>> + Send + Unpin + 'static,
    {
        let Run {
            manager,
            conn_id,
            user_id,
            device_class,
            cancel,
            state,
        } = self;
        let settings = manager.settings.clone();

        let consumer = match manager.broker.consume(user_id, &device_class).await {
            Ok(consumer) => consumer,
            Err(e) => {
                warn!(error = %e, "failed to start consuming; closing connection");
                let _ = timeout(CLOSE_GRACE, sink.send(Frame::Close)).await;
                let _ = state.send(ConnectionState::Closed);
                manager.live.remove(&conn_id);
                return;
            }
        };

        let shared = Arc::new(Shared {
            user_id,
            buffer: OutboundBuffer::new(settings.outbound_capacity, settings.backpressure),
            cancel,
            state,
        });
        shared.set_state(ConnectionState::Open);
        info!(queue = consumer.queue(), "connection open");

        let (control_tx, control_rx) = mpsc::channel(CONTROL_CAPACITY);
        let span = tracing::Span::current();
        let tasks = [
            tokio::spawn(
                write_task(shared.clone(), sink, control_rx).instrument(span.clone()),
            ),
            tokio::spawn(
                read_task(
                    shared.clone(),
                    stream,
                    control_tx.clone(),
                    manager.dispatcher.clone(),
                    settings.pong_wait,
                )
                .instrument(span.clone()),
            ),
            tokio::spawn(
                heartbeat_task(shared.clone(), control_tx, settings.ping_period)
                    .instrument(span.clone()),
            ),
            tokio::spawn(consume_task(shared.clone(), consumer).instrument(span)),
        ];
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "connection task panicked");
                shared.cancel.cancel();
            }
        }

        // Cleanup runs once, after every task has exited.
        shared.cancel.cancel();
        shared.buffer.release().await;
        shared.set_state(ConnectionState::Closed);
        manager.live.remove(&conn_id);
        info!("connection closed");
    }
}

async fn write_task<S>(shared: Arc<Shared>, mut sink: S, mut control: mpsc::Receiver<Frame>)
where
    S: Sink<Frame, Error = ParleyError> + Send + Unpin,
{
    let mut write_failed = false;
    let mut control_open = true;
    loop {
        let frame = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            ctrl = control.recv(), if control_open => match ctrl {
                Some(frame) => frame,
                None => {
                    control_open = false;
                    continue;
                }
            },
            next = shared.buffer.pop() => match next {
                Some(frame) => frame,
                // Closed and flushed: only happens while draining or on cleanup.
                None => break,
            },
        };
        let written = tokio::select! {
            written = sink.send(frame) => written,
            // A stalled transport must not hold the connection open.
            _ = shared.cancel.cancelled() => {
                write_failed = true;
                break;
            }
        };
        if let Err(e) = written {
            debug!(error = %e, "write failed");
            write_failed = true;
            break;
        }
    }

    if !write_failed {
        match timeout(CLOSE_GRACE, sink.send(Frame::Close)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "close frame not delivered"),
            Err(_) => debug!("close frame timed out"),
        }
        let _ = timeout(CLOSE_GRACE, sink.close()).await;
    }
    if shared.state() == ConnectionState::Draining {
        debug!("drained outbound buffer");
    }
    shared.cancel.cancel();
}

async fn read_task<R>(
    shared: Arc<Shared>,
    mut stream: R,
    control: mpsc::Sender<Frame>,
    dispatcher: Dispatcher,
    pong_wait: Duration,
) where
    R: Stream<Item = Result<Frame, ParleyError>> + Send + Unpin,
{
    let mut deadline = Instant::now() + pong_wait;
    loop {
        let next = tokio::select! {
            _ = shared.cancel.cancelled() => return,
            next = timeout_at(deadline, stream.next()) => next,
        };
        let frame = match next {
            Err(_) => {
                info!(?pong_wait, "no pong before read deadline; closing connection");
                break;
            }
            Ok(None) => {
                debug!("transport ended");
                break;
            }
            Ok(Some(Err(e))) => {
                debug!(error = %e, "read failed");
                break;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Frame::Pong(_) => deadline = Instant::now() + pong_wait,
            Frame::Ping(payload) => {
                if control.try_send(Frame::Pong(payload)).is_err() {
                    debug!("control channel full; dropping pong");
                }
            }
            Frame::Close => {
                info!("peer closed; draining");
                shared.set_state(ConnectionState::Draining);
                shared.buffer.close().await;
                // The write task flushes, sends the close frame, and cancels.
                tokio::select! {
                    _ = shared.cancel.cancelled() => return,
                    _ = tokio::time::sleep(DRAIN_TIMEOUT) => {
                        warn!(timeout = ?DRAIN_TIMEOUT, "outbound buffer not flushed in time; closing connection");
                        break;
                    }
                }
            }
            data => match decode_data_frame(&data) {
                Ok(Some(draft)) => {
                    dispatcher.dispatch(shared.user_id, draft).await;
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "skipping malformed frame"),
            },
        }
    }
    shared.cancel.cancel();
}

async fn heartbeat_task(shared: Arc<Shared>, control: mpsc::Sender<Frame>, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => return,
            _ = ticker.tick() => {
                if control.send(Frame::Ping(Vec::new())).await.is_err() {
                    return;
                }
            }
        }
    }
}

async fn consume_task(shared: Arc<Shared>, mut consumer: Box<dyn Consumer>) {
    loop {
        let next = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            next = consumer.next() => next,
        };
        let delivery = match next {
            Ok(Some(delivery)) => delivery,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "broker consume failed; closing connection");
                shared.cancel.cancel();
                break;
            }
        };

        let frame = match encode_message(&delivery.message) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(message_id = delivery.message.id, error = %e, "dropping unencodable delivery");
                ack(consumer.as_mut(), delivery.delivery_tag).await;
                continue;
            }
        };
        match shared.buffer.push(frame).await {
            PushOutcome::Queued => {}
            PushOutcome::DroppedOldest => {
                warn!(
                    capacity = shared.buffer.capacity(),
                    "outbound buffer full; dropped oldest frame"
                );
            }
            PushOutcome::Full => {
                warn!(
                    capacity = shared.buffer.capacity(),
                    "outbound buffer full; closing connection"
                );
                shared.cancel.cancel();
                break;
            }
            // Draining or closing: leave the delivery unacked for redelivery.
            PushOutcome::Closed => break,
        }
        ack(consumer.as_mut(), delivery.delivery_tag).await;
    }

    if let Err(e) = consumer.cancel().await {
        warn!(queue = consumer.queue(), error = %e, "failed to cancel consumer");
    }
}

async fn ack(consumer: &mut dyn Consumer, delivery_tag: u64) {
    if let Err(e) = consumer.ack(delivery_tag).await {
        warn!(delivery_tag, error = %e, "failed to ack delivery");
    }
}
