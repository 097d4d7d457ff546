//! WebSocket server: the TCP accept loop.
//!
//! Each accepted stream is handed to its own Tokio task, which performs the
//! WebSocket upgrade and registers the connection.  A slow or hostile
//! handshake therefore never delays the next `accept()`.
//!
//! The loop polls `accept()` with a 200 ms timeout so it notices the shared
//! `running` flag even when nobody is connecting.  When the flag clears, the
//! loop stops and every registered connection is removed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::domain::ConnectionApp;
use crate::infrastructure::registry::ConnectionRegistry;

/// Binds `registry.config().bind_addr` and runs [`serve`] on it.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot be bound (e.g., the port is
/// already in use or the process lacks permission to bind).
pub async fn run_server<F>(registry: Arc<ConnectionRegistry>, make_app: F, running: Arc<AtomicBool>) -> anyhow::Result<()>
where
    F: Fn() -> Arc<dyn ConnectionApp> + Send + Sync + 'static,
{
    let addr = registry.config().bind_addr;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind WebSocket listener on {addr}"))?;
    serve(listener, registry, make_app, running).await
}

/// Accepts connections on `listener` until `running` is cleared.
///
/// `make_app` is called once per accepted stream to create that connection's
/// application object.
pub async fn serve<F>(
    listener: TcpListener,
    registry: Arc<ConnectionRegistry>,
    make_app: F,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()>
where
    F: Fn() -> Arc<dyn ConnectionApp> + Send + Sync + 'static,
{
    let local = listener
        .local_addr()
        .context("failed to read listener address")?;
    info!("hub listening on {local}");

    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping accept loop");
            break;
        }

        match timeout(Duration::from_millis(200), listener.accept()).await {
            Ok(Ok((stream, peer_addr))) => {
                info!("new connection from {peer_addr}");
                let registry = Arc::clone(&registry);
                let app = make_app();
                tokio::spawn(async move {
                    if let Err(e) = registry.register(app, stream).await {
                        warn!("rejected connection from {peer_addr}: {e}");
                    }
                });
            }
            Ok(Err(e)) => {
                // Transient (e.g. out of file descriptors); keep accepting.
                error!("accept error: {e}");
            }
            Err(_) => {
                // No connection in the last 200 ms; re-check the flag.
            }
        }
    }

    let removed = registry.remove_all();
    info!(removed, "accept loop stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
