//! Infrastructure layer for wsrelay-hub.
//!
//! Everything that touches a socket, a task or a file lives here.
//!
//! # Responsibilities
//!
//! - Accepting TCP connections and performing the WebSocket upgrade
//! - Running the inbound and outbound pump of every connection
//! - Keeping the id → connection map and serving addressed sends
//! - Loading the optional TOML configuration file
//!
//! # What does NOT belong here?
//!
//! - Payload semantics (that is the application layer)
//! - Capability traits and `HubConfig` (that is the domain layer)

pub mod config_file;
pub mod connection;
pub mod error;
pub mod registry;
pub mod ws_server;

use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;

use crate::domain::HubConfig;

pub use connection::ConnectionHandle;
pub use error::HubError;
pub use registry::ConnectionRegistry;
pub use ws_server::{run_server, serve};

/// tungstenite settings derived from `config`: inbound messages and frames
/// larger than `max_message_size` are refused by the protocol layer.
pub fn websocket_config(config: &HubConfig) -> WebSocketConfig {
    let mut ws = WebSocketConfig::default();
    ws.read_buffer_size = config.read_buffer_size;
    ws.write_buffer_size = config.write_buffer_size;
    ws.max_message_size = Some(config.max_message_size);
    ws.max_frame_size = Some(config.max_message_size);
    ws
}
