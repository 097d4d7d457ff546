//! Domain layer for wsrelay-hub.
//!
//! Pure types with no sockets and no tasks: the runtime configuration and the
//! capability traits through which the hub talks to the embedding
//! application.

pub mod capability;
pub mod config;

pub use capability::{AppError, BroadcastHandler, ConnectionApp, ConnectionId};
pub use config::HubConfig;
