//! Error type for hub operations.

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::domain::{AppError, ConnectionId};

/// Errors raised by the registry and by the connection pumps.
///
/// Registry operations return these to their caller.  Pump errors have no
/// caller: they end the pump, are logged, and lead to the disconnect
/// notification.
#[derive(Debug, Error)]
pub enum HubError {
    /// Read or write failure on the WebSocket.
    #[error("transport error: {0}")]
    Transport(#[from] WsError),

    /// The WebSocket upgrade of an accepted stream failed.
    #[error("WebSocket handshake failed: {0}")]
    Handshake(#[source] WsError),

    /// The peer sent something other than a binary data frame.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    /// No pong arrived within the read deadline.
    #[error("read deadline expired")]
    ReadTimeout,

    /// A write did not complete within the write deadline.
    #[error("write deadline expired")]
    WriteTimeout,

    /// An addressed operation named an id that is not registered.
    #[error("unknown connection id {0}")]
    UnknownConnection(ConnectionId),

    /// A connection's send-eligibility check failed; the whole selective send
    /// was abandoned.
    #[error("send-eligibility check failed on connection {id}: {source}")]
    Eligibility {
        id: ConnectionId,
        #[source]
        source: AppError,
    },

    /// An application capability reported a failure.
    #[error("application error: {0}")]
    Application(#[from] AppError),

    /// The connection is being torn down and no longer accepts payloads.
    #[error("outbound queue of connection {0} is closed")]
    QueueClosed(ConnectionId),

    /// The broadcast intake is at capacity.
    #[error("broadcast intake is full")]
    IntakeFull,

    /// The dispatch loop has stopped.
    #[error("broadcast intake is closed")]
    IntakeClosed,
}
