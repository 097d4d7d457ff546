//! Shared helpers for the hub integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::io::DuplexStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use wsrelay_core::BinaryBuffer;
use wsrelay_hub::domain::{AppError, BroadcastHandler, ConnectionApp, ConnectionId, HubConfig};
use wsrelay_hub::infrastructure::websocket_config;

pub type Client<S> = WebSocketStream<S>;

/// Something a [`RecordingApp`] saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Message(ConnectionId, Vec<u8>),
    Disconnected(ConnectionId),
}

/// Records callbacks into a channel.
///
/// The eligibility check frame is a single `u32`; an app matches when it
/// equals the app's tag.
pub struct RecordingApp {
    tag: u32,
    prefix: Option<u8>,
    events: UnboundedSender<Event>,
}

impl RecordingApp {
    pub fn new(tag: u32, events: UnboundedSender<Event>) -> Arc<Self> {
        Arc::new(Self {
            tag,
            prefix: None,
            events,
        })
    }

    /// Prepends `prefix` to every outbound payload.
    pub fn with_prefix(tag: u32, prefix: u8, events: UnboundedSender<Event>) -> Arc<Self> {
        Arc::new(Self {
            tag,
            prefix: Some(prefix),
            events,
        })
    }
}

impl ConnectionApp for RecordingApp {
    fn on_message_arrived(&self, id: ConnectionId, frame: &mut BinaryBuffer) -> Result<(), AppError> {
        let _ = self.events.send(Event::Message(id, frame.as_bytes().to_vec()));
        Ok(())
    }

    fn prepare_outbound(&self, mut payload: Vec<u8>) -> Result<Vec<u8>, AppError> {
        if let Some(prefix) = self.prefix {
            payload.insert(0, prefix);
        }
        Ok(payload)
    }

    fn check_send_eligibility(&self, check: &mut BinaryBuffer) -> Result<usize, AppError> {
        Ok(usize::from(check.read_u32()? == self.tag))
    }

    fn on_disconnected(&self, id: ConnectionId) {
        let _ = self.events.send(Event::Disconnected(id));
    }

    fn status_text(&self) -> String {
        format!("<td>tag {}</td>", self.tag)
    }
}

/// Forwards every broadcast payload into a channel.
pub struct RecordingBroadcast(pub UnboundedSender<Vec<u8>>);

#[async_trait]
impl BroadcastHandler for RecordingBroadcast {
    async fn on_broadcast_arrived(&self, payload: Vec<u8>) -> Result<(), AppError> {
        let _ = self.0.send(payload);
        Ok(())
    }
}

pub fn recording_broadcast() -> (Arc<dyn BroadcastHandler>, UnboundedReceiver<Vec<u8>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(RecordingBroadcast(tx)), rx)
}

/// An in-memory WebSocket: the server end is configured from `config`.
pub async fn ws_pair(config: &HubConfig) -> (WebSocketStream<DuplexStream>, Client<DuplexStream>) {
    ws_pair_sized(config, 64 * 1024).await
}

/// Like [`ws_pair`], with at most `pipe_bytes` in flight between the ends.
pub async fn ws_pair_sized(
    config: &HubConfig,
    pipe_bytes: usize,
) -> (WebSocketStream<DuplexStream>, Client<DuplexStream>) {
    let (server, client) = tokio::io::duplex(pipe_bytes);
    let server = WebSocketStream::from_raw_socket(server, Role::Server, Some(websocket_config(config))).await;
    let client = WebSocketStream::from_raw_socket(client, Role::Client, None).await;
    (server, client)
}

/// Check frame selecting the app tagged `tag`.
pub fn check_for(tag: u32) -> BinaryBuffer {
    let mut check = BinaryBuffer::new(4);
    check.append_u32(tag).expect("u32 fits");
    check
}

pub async fn recv_within<T>(rx: &mut UnboundedReceiver<T>, wait: Duration) -> Option<T> {
    tokio::time::timeout(wait, rx.recv()).await.ok().flatten()
}

/// Next binary payload from `client`, skipping control frames.  `None` on
/// timeout, close or error.
pub async fn next_binary<S>(client: &mut Client<S>, wait: Duration) -> Option<Vec<u8>>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        match tokio::time::timeout_at(deadline, client.next()).await {
            Ok(Some(Ok(Message::Binary(payload)))) => return Some(payload.to_vec()),
            Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => continue,
            _ => return None,
        }
    }
}
