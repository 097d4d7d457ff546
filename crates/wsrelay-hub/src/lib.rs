//! wsrelay-hub library crate.
//!
//! A connection hub for persistent WebSocket links.  The hub accepts many
//! peers, keeps each alive with ping/pong, funnels every read of a connection
//! through one inbound pump and every write through one outbound pump, and
//! relays opaque binary payloads between the application and the peers
//! (unicast, filtered multicast or broadcast).
//!
//! # Architecture
//!
//! ```text
//! Peers (binary WebSocket frames)
//!         ↕
//! [wsrelay-hub]
//!   ├── domain/           HubConfig, ConnectionId, capability traits
//!   ├── application/      relay_room: the default room-based application
//!   └── infrastructure/
//!         ├── connection/ ConnectionHandle: inbound + outbound pumps
//!         ├── registry/   ConnectionRegistry: id map, sends, dispatch loop
//!         ├── ws_server/  TCP accept loop
//!         └── config_file/ TOML configuration
//! ```
//!
//! # Layer rules
//!
//! - `domain` depends on `wsrelay-core` only (no sockets, no tasks).
//! - `application` depends on `domain` and on the registry's public API.
//! - `infrastructure` owns all I/O: `tokio`, `tokio-tungstenite`, files.

/// Domain layer: configuration and capability interfaces.
pub mod domain;

/// Application layer: the room relay used by the binary.
pub mod application;

/// Infrastructure layer: connections, registry, accept loop, config file.
pub mod infrastructure;
