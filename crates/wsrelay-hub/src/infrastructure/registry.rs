//! Connection registry: id allocation, the id → handle map, addressed and
//! selective sends, and the broadcast dispatch loop.
//!
//! # Concurrency
//!
//! The map is guarded by a `std::sync::Mutex`.  The lock is held only for map
//! reads and writes, never across an `.await` and never while an application
//! callback runs: send operations snapshot the handles they need first.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};
use wsrelay_core::BinaryBuffer;

use crate::domain::{BroadcastHandler, ConnectionApp, ConnectionId, HubConfig};
use crate::infrastructure::connection::ConnectionHandle;
use crate::infrastructure::error::HubError;
use crate::infrastructure::websocket_config;

/// Owns every live connection.
///
/// Always used behind an `Arc`: applications keep a [`Weak`] to it so they
/// can send and remove without creating a reference cycle.
pub struct ConnectionRegistry {
    config: HubConfig,
    next_id: AtomicU64,
    connections: Mutex<HashMap<ConnectionId, Arc<ConnectionHandle>>>,
    intake: mpsc::Sender<Vec<u8>>,
}

impl ConnectionRegistry {
    /// Creates a registry and spawns its dispatch loop, which feeds every
    /// intake payload to `handler`.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn start(config: HubConfig, handler: Arc<dyn BroadcastHandler>) -> Arc<Self> {
        Self::start_with(config, |_| handler)
    }

    /// Like [`start`](Self::start), for handlers that need to reach the
    /// registry themselves.  `make_handler` receives a weak reference to the
    /// registry being built.
    pub fn start_with<F>(config: HubConfig, make_handler: F) -> Arc<Self>
    where
        F: FnOnce(Weak<Self>) -> Arc<dyn BroadcastHandler>,
    {
        let (intake_tx, intake_rx) = mpsc::channel(config.intake_capacity.max(1));
        let registry = Arc::new(Self {
            config,
            next_id: AtomicU64::new(0),
            connections: Mutex::new(HashMap::new()),
            intake: intake_tx,
        });
        let handler = make_handler(Arc::downgrade(&registry));
        tokio::spawn(dispatch_loop(intake_rx, handler));
        registry
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Upgrades `stream` to a WebSocket and registers it.
    ///
    /// # Errors
    ///
    /// [`HubError::Handshake`] if the upgrade fails.  Nothing is registered
    /// in that case.
    pub async fn register<S>(&self, app: Arc<dyn ConnectionApp>, stream: S) -> Result<Arc<ConnectionHandle>, HubError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let ws = tokio_tungstenite::accept_async_with_config(stream, Some(websocket_config(&self.config)))
            .await
            .map_err(HubError::Handshake)?;
        Ok(self.attach(app, ws))
    }

    /// Registers an already-upgraded WebSocket, assigns the next id and
    /// starts both pumps.
    pub fn attach<S>(&self, app: Arc<dyn ConnectionApp>, ws: WebSocketStream<S>) -> Arc<ConnectionHandle>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (handle, ends) = {
            let mut map = self.lock_map();
            let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
            let (handle, ends) = ConnectionHandle::new(id, app, self.config.outbound_capacity);
            map.insert(id, Arc::clone(&handle));
            (handle, ends)
        };
        handle.start(ws, ends, &self.config);
        info!(connection = handle.id(), "connection registered");
        handle
    }

    /// Tears down connection `id`: detaches its application, drops it from
    /// the map, closes its transport and closes its outbound queue.
    ///
    /// # Errors
    ///
    /// [`HubError::UnknownConnection`] if `id` is not registered, including
    /// when it was already removed.
    pub fn remove(&self, id: ConnectionId) -> Result<(), HubError> {
        let handle = self
            .lock_map()
            .get(&id)
            .cloned()
            .ok_or(HubError::UnknownConnection(id))?;
        let performed = handle.teardown(|| {
            self.lock_map().remove(&id);
        });
        if !performed {
            return Err(HubError::UnknownConnection(id));
        }
        info!(connection = id, "connection removed");
        Ok(())
    }

    /// Removes every registered connection and returns how many were removed.
    pub fn remove_all(&self) -> usize {
        self.ids()
            .into_iter()
            .filter(|&id| self.remove(id).is_ok())
            .count()
    }

    /// Queues `payload` on one connection.
    ///
    /// Waits while that connection's outbound queue is full.
    pub async fn send_to_one(&self, id: ConnectionId, payload: Vec<u8>) -> Result<(), HubError> {
        let handle = self
            .lock_map()
            .get(&id)
            .cloned()
            .ok_or(HubError::UnknownConnection(id))?;
        handle.enqueue(payload).await
    }

    /// Asks every connection's application whether it matches `check` and
    /// returns the sum of the positive answers.
    ///
    /// When `send` is given, its wire bytes are queued on every matching
    /// connection.  Connections torn down in the meantime are skipped.
    ///
    /// # Errors
    ///
    /// [`HubError::Eligibility`] naming the first connection whose predicate
    /// failed.  Payloads already queued by then stay queued.
    pub async fn selective_send(&self, check: &BinaryBuffer, send: Option<&BinaryBuffer>) -> Result<usize, HubError> {
        let payload = send.map(|buf| buf.slice_for_send().to_vec());
        let mut matched = 0;

        for handle in self.snapshot() {
            let count = handle
                .check_eligibility(check)
                .map_err(|source| HubError::Eligibility {
                    id: handle.id(),
                    source,
                })?;
            if count == 0 {
                continue;
            }
            matched += count;
            if let Some(payload) = &payload {
                if let Err(e) = handle.enqueue(payload.clone()).await {
                    debug!(connection = handle.id(), error = %e, "selective send skipped connection");
                }
            }
        }
        Ok(matched)
    }

    /// Hands `payload` to the dispatch loop without waiting.
    ///
    /// # Errors
    ///
    /// - [`HubError::IntakeFull`] when the intake channel is at capacity.
    /// - [`HubError::IntakeClosed`] when the dispatch loop is gone.
    pub fn broadcast_intake(&self, payload: Vec<u8>) -> Result<(), HubError> {
        self.intake.try_send(payload).map_err(|e| match e {
            TrySendError::Full(_) => HubError::IntakeFull,
            TrySendError::Closed(_) => HubError::IntakeClosed,
        })
    }

    pub fn len(&self) -> usize {
        self.lock_map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_map().is_empty()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.lock_map().contains_key(&id)
    }

    /// Registered ids in ascending order.
    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.lock_map().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// HTML table rows, one per attached connection, ordered by id.
    pub fn status_rows(&self) -> String {
        self.snapshot()
            .iter()
            .filter_map(|handle| handle.status_row())
            .collect()
    }

    fn snapshot(&self) -> Vec<Arc<ConnectionHandle>> {
        let mut handles: Vec<_> = self.lock_map().values().cloned().collect();
        handles.sort_unstable_by_key(|handle| handle.id());
        handles
    }

    fn lock_map(&self) -> MutexGuard<'_, HashMap<ConnectionId, Arc<ConnectionHandle>>> {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn dispatch_loop(mut intake: mpsc::Receiver<Vec<u8>>, handler: Arc<dyn BroadcastHandler>) {
    debug!("broadcast dispatch loop started");
    while let Some(payload) = intake.recv().await {
        if let Err(e) = handler.on_broadcast_arrived(payload).await {
            warn!(error = %e, "broadcast handler failed");
        }
    }
    debug!("broadcast dispatch loop stopped");
}

// ── Tests ─────────────────────────────────────────────────────────────────────
