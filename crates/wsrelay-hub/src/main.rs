//! wsrelay hub: entry point.
//!
//! Accepts WebSocket connections and serves the room relay on them: peers
//! JOIN a room, SAY something to everyone in it, and ask WHO is there.
//!
//! # Usage
//!
//! ```text
//! wsrelay-hub [OPTIONS]
//!
//! Options:
//!   --config <FILE>             TOML configuration file
//!   --bind <IP>                 Listener IP address [default: 0.0.0.0]
//!   --port <PORT>               Listener port [default: 8080]
//!   --pong-wait <SECS>          Read deadline, refreshed by pongs [default: 60]
//!   --write-wait <SECS>         Deadline for one write [default: 10]
//!   --max-message-size <BYTES>  Largest accepted inbound message [default: 1024]
//!   --outbound-capacity <N>     Per-connection outbound queue size [default: 256]
//!   --intake-capacity <N>       Broadcast intake size [default: 64]
//!   --print-config              Print the effective configuration and exit
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable                   | Flag                  |
//! |----------------------------|-----------------------|
//! | `WSRELAY_CONFIG`           | `--config`            |
//! | `WSRELAY_BIND`             | `--bind`              |
//! | `WSRELAY_PORT`             | `--port`              |
//! | `WSRELAY_PONG_WAIT`        | `--pong-wait`         |
//! | `WSRELAY_WRITE_WAIT`       | `--write-wait`        |
//! | `WSRELAY_MAX_MESSAGE_SIZE` | `--max-message-size`  |
//! | `WSRELAY_OUTBOUND_CAPACITY`| `--outbound-capacity` |
//! | `WSRELAY_INTAKE_CAPACITY`  | `--intake-capacity`   |
//!
//! A flag (or its variable) beats the config file, which beats the built-in
//! default.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use wsrelay_hub::application::{RoomMember, RoomRelay};
use wsrelay_hub::domain::{BroadcastHandler, ConnectionApp, HubConfig};
use wsrelay_hub::infrastructure::config_file::{load_config, HubConfigFile};
use wsrelay_hub::infrastructure::{run_server, ConnectionRegistry};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// WebSocket relay hub.
///
/// Every flag is optional; unset flags fall back to the config file and then
/// to the built-in defaults.
#[derive(Debug, Parser)]
#[command(
    name = "wsrelay-hub",
    about = "WebSocket hub relaying binary frames between rooms of peers",
    version
)]
struct Cli {
    /// TOML configuration file with a `[hub]` table.
    #[arg(long, env = "WSRELAY_CONFIG")]
    config: Option<PathBuf>,

    /// IP address to bind the listener to.
    #[arg(long, env = "WSRELAY_BIND")]
    bind: Option<String>,

    /// TCP port to listen on.
    #[arg(long, env = "WSRELAY_PORT")]
    port: Option<u16>,

    /// Seconds without a pong before a peer is dropped.  Pings go out at
    /// 9/10 of this.
    #[arg(long, env = "WSRELAY_PONG_WAIT")]
    pong_wait: Option<u64>,

    /// Seconds allowed for a single write.
    #[arg(long, env = "WSRELAY_WRITE_WAIT")]
    write_wait: Option<u64>,

    /// Largest inbound message in bytes.
    #[arg(long, env = "WSRELAY_MAX_MESSAGE_SIZE")]
    max_message_size: Option<usize>,

    /// Payloads that may wait in one connection's outbound queue.
    #[arg(long, env = "WSRELAY_OUTBOUND_CAPACITY")]
    outbound_capacity: Option<usize>,

    /// Payloads that may wait in the broadcast intake.
    #[arg(long, env = "WSRELAY_INTAKE_CAPACITY")]
    intake_capacity: Option<usize>,

    /// Print the effective configuration as TOML and exit.
    #[arg(long)]
    print_config: bool,
}

impl Cli {
    /// Builds the effective [`HubConfig`]: defaults, then the config file,
    /// then flags.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be loaded or `--bind` is
    /// not an IP address.
    fn into_hub_config(self) -> anyhow::Result<HubConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)
                .with_context(|| format!("failed to load config file {}", path.display()))?
                .into_config(),
            None => HubConfig::default(),
        };

        let ip = match &self.bind {
            Some(bind) => bind
                .parse::<IpAddr>()
                .with_context(|| format!("invalid bind address: '{bind}'"))?,
            None => config.bind_addr.ip(),
        };
        let port = self.port.unwrap_or(config.bind_addr.port());
        config.bind_addr = SocketAddr::new(ip, port);

        if let Some(secs) = self.pong_wait {
            config.pong_wait = Duration::from_secs(secs);
        }
        if let Some(secs) = self.write_wait {
            config.write_wait = Duration::from_secs(secs);
        }
        if let Some(size) = self.max_message_size {
            config.max_message_size = size;
        }
        if let Some(capacity) = self.outbound_capacity {
            config.outbound_capacity = capacity;
        }
        if let Some(capacity) = self.intake_capacity {
            config.intake_capacity = capacity;
        }
        Ok(config)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG controls verbosity; `info` when unset or invalid.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let print_config = cli.print_config;
    let config = cli.into_hub_config()?;

    if print_config {
        print!("{}", HubConfigFile::from_config(&config).to_toml()?);
        return Ok(());
    }

    info!(
        "wsrelay hub starting: bind={}, pong_wait={:?}, max_message_size={}",
        config.bind_addr, config.pong_wait, config.max_message_size
    );

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);

    // The accept loop checks `running` every 200 ms.
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; initiating graceful shutdown");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    let registry = ConnectionRegistry::start_with(config, |weak| {
        Arc::new(RoomRelay::new(weak)) as Arc<dyn BroadcastHandler>
    });
    let weak = Arc::downgrade(&registry);
    let make_app = move || Arc::new(RoomMember::new(weak.clone())) as Arc<dyn ConnectionApp>;

    run_server(registry, make_app, running).await?;

    info!("wsrelay hub stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
