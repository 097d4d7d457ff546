//! One live WebSocket connection and its two pumps.
//!
//! Every connection is served by exactly two Tokio tasks:
//!
//! - **Inbound pump**: the only reader.  Enforces the read deadline (refreshed
//!   by pongs), hands each binary frame to the connection's [`ConnectionApp`],
//!   and fires the disconnect notification when it stops.
//! - **Outbound pump**: the only writer.  Drains the outbound queue, coalesces
//!   whatever is already queued into one binary message, sends keepalive
//!   pings, and is the only place the transport is released.
//!
//! The WebSocket is split into a stream half and a sink half, one per pump, so
//! the two never contend for a lock.
//!
//! # Teardown
//!
//! [`ConnectionHandle::teardown`] runs once, in this order:
//!
//! ```text
//! detach application → unlink from registry → close transport → close queue
//! ```
//!
//! Anything that looks at the handle after the first step sees "detached"
//! and backs off instead of reaching an application that is going away.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, timeout, timeout_at, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, trace, warn};
use wsrelay_core::BinaryBuffer;

use crate::domain::{AppError, ConnectionApp, ConnectionId, HubConfig};
use crate::infrastructure::error::HubError;

type WsSink<S> = SplitSink<WebSocketStream<S>, Message>;
type WsSource<S> = SplitStream<WebSocketStream<S>>;

/// A registered connection.
///
/// Owned by the registry's id map and by the two pump tasks.  The handle
/// itself holds no socket: the socket halves live inside the pumps.
pub struct ConnectionHandle {
    id: ConnectionId,
    /// Cleared first during teardown.
    app: RwLock<Option<Arc<dyn ConnectionApp>>>,
    /// Dropping the sender closes the queue once in-flight enqueuers finish.
    outbound: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    /// Set to `true` to make the inbound pump stop reading.
    transport_closed: watch::Sender<bool>,
    torn_down: AtomicBool,
}

/// Receiving ends consumed by [`ConnectionHandle::start`].  Holding them in
/// one value that `start` takes by move is what limits a handle to a single
/// pair of pumps.
pub(crate) struct PumpEnds {
    queue: mpsc::Receiver<Vec<u8>>,
    closed: watch::Receiver<bool>,
}

impl ConnectionHandle {
    /// Creates a handle whose pumps are not running yet.
    pub(crate) fn new(
        id: ConnectionId,
        app: Arc<dyn ConnectionApp>,
        outbound_capacity: usize,
    ) -> (Arc<Self>, PumpEnds) {
        let (queue_tx, queue_rx) = mpsc::channel(outbound_capacity.max(1));
        let (closed_tx, closed_rx) = watch::channel(false);
        let handle = Arc::new(Self {
            id,
            app: RwLock::new(Some(app)),
            outbound: Mutex::new(Some(queue_tx)),
            transport_closed: closed_tx,
            torn_down: AtomicBool::new(false),
        });
        let ends = PumpEnds {
            queue: queue_rx,
            closed: closed_rx,
        };
        (handle, ends)
    }

    /// Splits `ws` and spawns the inbound and outbound pumps.
    pub(crate) fn start<S>(self: &Arc<Self>, ws: WebSocketStream<S>, ends: PumpEnds, config: &HubConfig)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, stream) = ws.split();
        tokio::spawn(outbound_pump(
            Arc::clone(self),
            sink,
            ends.queue,
            config.write_wait,
            config.ping_period(),
        ));
        tokio::spawn(inbound_pump(
            Arc::clone(self),
            stream,
            ends.closed,
            config.pong_wait,
        ));
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// `false` once teardown has started.
    pub fn is_attached(&self) -> bool {
        self.app().is_some()
    }

    /// Queues `payload` for the outbound pump, waiting while the queue is full.
    ///
    /// # Errors
    ///
    /// [`HubError::QueueClosed`] if the connection is being torn down.
    pub async fn enqueue(&self, payload: Vec<u8>) -> Result<(), HubError> {
        let sender = self
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(sender) = sender else {
            return Err(HubError::QueueClosed(self.id));
        };
        sender
            .send(payload)
            .await
            .map_err(|_| HubError::QueueClosed(self.id))
    }

    /// One HTML table row for the status page, or `None` once detached.
    pub fn status_row(&self) -> Option<String> {
        let app = self.app()?;
        Some(format!(
            "<tr><td scope=\"row\">{}</td>{}</tr>",
            self.id,
            app.status_text()
        ))
    }

    /// Detaches the application, runs `unlink`, closes the transport and
    /// closes the outbound queue, in that order.
    ///
    /// Only the first call does anything; it returns `true`.
    pub(crate) fn teardown(&self, unlink: impl FnOnce()) -> bool {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.app
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        unlink();
        self.release_transport();
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        true
    }

    /// Runs the application's send-eligibility predicate on a private copy of
    /// `check` rewound to 0.  A detached handle matches nothing.
    pub(crate) fn check_eligibility(&self, check: &BinaryBuffer) -> Result<usize, AppError> {
        let Some(app) = self.app() else {
            return Ok(0);
        };
        let mut copy = check.clone();
        copy.set_index_head();
        app.check_send_eligibility(&mut copy)
    }

    fn app(&self) -> Option<Arc<dyn ConnectionApp>> {
        self.app
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn release_transport(&self) {
        self.transport_closed.send_replace(true);
    }

    fn deliver(&self, payload: Vec<u8>) {
        let Some(app) = self.app() else {
            debug!(connection = self.id, "inbound frame dropped: connection detached");
            return;
        };
        let mut frame = BinaryBuffer::from_bytes(0, payload);
        if let Err(e) = app.on_message_arrived(self.id, &mut frame) {
            warn!(connection = self.id, error = %e, "application rejected inbound frame");
        }
    }

    /// Appends the prepared form of `payload` to `frame`.  A detached handle
    /// appends nothing.
    fn prepare_into(&self, frame: &mut Vec<u8>, payload: Vec<u8>) -> Result<(), HubError> {
        let Some(app) = self.app() else {
            return Ok(());
        };
        let prepared = app.prepare_outbound(payload)?;
        if frame.is_empty() {
            *frame = prepared;
        } else {
            frame.extend_from_slice(&prepared);
        }
        Ok(())
    }

    fn notify_disconnected(&self) {
        match self.app() {
            Some(app) => app.on_disconnected(self.id),
            None => debug!(connection = self.id, "detached; skipping disconnect notification"),
        }
    }
}

// ── Inbound pump ──────────────────────────────────────────────────────────────

async fn inbound_pump<S>(
    handle: Arc<ConnectionHandle>,
    mut stream: WsSource<S>,
    mut closed: watch::Receiver<bool>,
    pong_wait: Duration,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let id = handle.id;
    debug!(connection = id, "inbound pump started");
    let mut deadline = Instant::now() + pong_wait;

    let outcome: Result<(), HubError> = loop {
        let next = tokio::select! {
            _ = closed.wait_for(|closed| *closed) => break Ok(()),
            next = timeout_at(deadline, stream.next()) => next,
        };
        let message = match next {
            Err(_) => break Err(HubError::ReadTimeout),
            Ok(None) => break Err(HubError::Transport(WsError::ConnectionClosed)),
            Ok(Some(Err(e))) => break Err(HubError::Transport(e)),
            Ok(Some(Ok(message))) => message,
        };
        match message {
            Message::Binary(payload) => handle.deliver(payload.to_vec()),
            Message::Pong(_) => {
                deadline = Instant::now() + pong_wait;
                trace!(connection = id, "pong received; read deadline extended");
            }
            // tungstenite queues the pong reply on its own.
            Message::Ping(_) => {}
            Message::Close(frame) => {
                debug!(connection = id, ?frame, "peer sent close");
                break Err(HubError::Transport(WsError::ConnectionClosed));
            }
            Message::Text(_) | Message::Frame(_) => {
                break Err(HubError::ProtocolViolation("only binary frames are accepted"));
            }
        }
    };

    match &outcome {
        Ok(()) => debug!(connection = id, "inbound pump stopped: transport closed"),
        Err(HubError::ProtocolViolation(what)) => {
            warn!(connection = id, "inbound pump stopped: protocol violation: {what}")
        }
        Err(e) => info!(connection = id, error = %e, "inbound pump stopped"),
    }
    handle.notify_disconnected();
}

// ── Outbound pump ─────────────────────────────────────────────────────────────

async fn outbound_pump<S>(
    handle: Arc<ConnectionHandle>,
    mut sink: WsSink<S>,
    mut queue: mpsc::Receiver<Vec<u8>>,
    write_wait: Duration,
    ping_period: Duration,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let id = handle.id;
    debug!(connection = id, "outbound pump started");
    let mut ticker = interval_at(Instant::now() + ping_period, ping_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let outcome: Result<(), HubError> = loop {
        tokio::select! {
            next = queue.recv() => {
                let Some(first) = next else {
                    // Queue closed by teardown.
                    if let Err(e) = send_with_deadline(&mut sink, Message::Close(None), write_wait).await {
                        debug!(connection = id, error = %e, "close frame not delivered");
                    }
                    break Ok(());
                };
                if let Err(e) = write_batch(&handle, &mut sink, &mut queue, first, write_wait).await {
                    break Err(e);
                }
            }
            _ = ticker.tick() => {
                if let Err(e) = send_with_deadline(&mut sink, Message::Ping(Vec::new().into()), write_wait).await {
                    break Err(e);
                }
                trace!(connection = id, "keepalive ping sent");
            }
        }
    };

    match &outcome {
        Ok(()) => debug!(connection = id, "outbound pump stopped: queue closed"),
        Err(e) => info!(connection = id, error = %e, "outbound pump stopped"),
    }
    // The only place the transport is released.
    let _ = timeout(write_wait, sink.close()).await;
    handle.release_transport();
}

/// Writes `first` plus everything already queued as one binary message.
async fn write_batch<S>(
    handle: &ConnectionHandle,
    sink: &mut WsSink<S>,
    queue: &mut mpsc::Receiver<Vec<u8>>,
    first: Vec<u8>,
    write_wait: Duration,
) -> Result<(), HubError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut frame = Vec::new();
    handle.prepare_into(&mut frame, first)?;

    // Counted once so a busy producer cannot hold this batch open.
    let queued = queue.len();
    for _ in 0..queued {
        match queue.try_recv() {
            Ok(payload) => handle.prepare_into(&mut frame, payload)?,
            Err(_) => break,
        }
    }

    // Every payload was skipped because the handle is detached: write nothing.
    if frame.is_empty() {
        return Ok(());
    }
    trace!(connection = handle.id, bytes = frame.len(), batched = queued + 1, "writing frame");
    send_with_deadline(sink, Message::Binary(frame.into()), write_wait).await
}

async fn send_with_deadline<S>(
    sink: &mut WsSink<S>,
    message: Message,
    write_wait: Duration,
) -> Result<(), HubError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match timeout(write_wait, sink.send(message)).await {
        Ok(result) => result.map_err(HubError::from),
        Err(_) => Err(HubError::WriteTimeout),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
