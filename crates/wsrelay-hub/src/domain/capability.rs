//! Capability interfaces the hub calls into.
//!
//! The hub never interprets payloads.  What a frame *means* is decided by the
//! embedding application through two traits:
//!
//! - [`ConnectionApp`]: one instance per connection.  Receives inbound
//!   frames, transforms outbound payloads, answers send-eligibility checks
//!   and is told when its connection goes away.
//! - [`BroadcastHandler`]: one instance per registry.  Receives payloads
//!   handed to the registry's broadcast intake.

use async_trait::async_trait;
use thiserror::Error;
use wsrelay_core::{BinaryBuffer, BufferError};

/// Identifier assigned by the registry.  Starts at 1, never reused.
pub type ConnectionId = u64;

/// Failure reported by an application capability.
#[derive(Debug, Error)]
pub enum AppError {
    /// A frame could not be parsed or built.
    #[error(transparent)]
    Buffer(#[from] BufferError),

    /// The application refused the frame or the operation.
    #[error("{0}")]
    Rejected(String),
}

/// Per-connection application behaviour.
///
/// Methods are called from the connection's pump tasks and from whichever
/// task calls the registry's send operations, so implementations must be
/// `Send + Sync` and must not block.
pub trait ConnectionApp: Send + Sync {
    /// A binary frame arrived on connection `id`.  `frame` is positioned at 0.
    ///
    /// An error is logged and the connection stays open.
    fn on_message_arrived(&self, id: ConnectionId, frame: &mut BinaryBuffer) -> Result<(), AppError>;

    /// Transforms a queued payload into the bytes written to the peer.
    ///
    /// An error aborts the connection's outbound pump.
    fn prepare_outbound(&self, payload: Vec<u8>) -> Result<Vec<u8>, AppError>;

    /// Returns how many matches this connection has for `check`; a positive
    /// count makes it a recipient of a selective send.
    ///
    /// `check` is a private copy positioned at 0.
    fn check_send_eligibility(&self, check: &mut BinaryBuffer) -> Result<usize, AppError>;

    /// The inbound pump for connection `id` has stopped.  Normally answered
    /// by removing `id` from the registry.
    fn on_disconnected(&self, id: ConnectionId);

    /// HTML table cells describing this connection for the status page.
    fn status_text(&self) -> String;
}

/// Registry-wide application behaviour.
#[async_trait]
pub trait BroadcastHandler: Send + Sync {
    /// A payload was taken from the broadcast intake.  Errors are logged by
    /// the dispatch loop and never stop it.
    async fn on_broadcast_arrived(&self, payload: Vec<u8>) -> Result<(), AppError>;
}
