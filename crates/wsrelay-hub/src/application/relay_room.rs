//! Room relay: the default application served by the `wsrelay-hub` binary.
//!
//! Peers join a named room and talk to everyone in it.
//!
//! # Frames
//!
//! Peer → hub (several commands may be packed into one message):
//!
//! ```text
//! 0x01 JOIN [room:str]
//! 0x02 SAY  [text:str]     must be the last command in the message
//! 0x03 WHO                 asks how many peers share the room
//! ```
//!
//! Hub → peer:
//!
//! ```text
//! 0x82 SAID  [from:u32][text:str]
//! 0x83 COUNT [count:u16]
//! ```
//!
//! A SAY is not delivered directly: it is re-headered as
//! `[room:str][from:u32][text:str]` and handed to the registry's broadcast
//! intake.  [`RoomRelay`] picks it up from there and does a selective send
//! to every member of `room`, using `[room:str]` as the check frame.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use async_trait::async_trait;
use tracing::{debug, info, warn};
use wsrelay_core::{encoded_str_size, BinaryBuffer};

use crate::domain::{AppError, BroadcastHandler, ConnectionApp, ConnectionId};
use crate::infrastructure::{ConnectionRegistry, HubError};

pub const OP_JOIN: u8 = 0x01;
pub const OP_SAY: u8 = 0x02;
pub const OP_WHO: u8 = 0x03;
pub const OP_SAID: u8 = 0x82;
pub const OP_COUNT: u8 = 0x83;

/// Size of the `[op:u8][from:u32]` header of a SAID frame.
const SAID_HEADER: usize = 5;

// ── Per-connection side ───────────────────────────────────────────────────────

/// One peer's membership.  Created by the accept loop for every connection.
pub struct RoomMember {
    registry: Weak<ConnectionRegistry>,
    room: Mutex<Option<String>>,
}

impl RoomMember {
    pub fn new(registry: Weak<ConnectionRegistry>) -> Self {
        Self {
            registry,
            room: Mutex::new(None),
        }
    }

    /// The joined room, if any.
    pub fn room(&self) -> Option<String> {
        self.room
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn join(&self, id: ConnectionId, room: String) {
        info!(connection = id, room = %room, "joined room");
        *self.room.lock().unwrap_or_else(PoisonError::into_inner) = Some(room);
    }

    fn joined_room(&self) -> Result<String, AppError> {
        self.room()
            .ok_or_else(|| AppError::Rejected("command requires JOIN first".into()))
    }

    /// Forwards the rest of `frame` (the SAY text) to the broadcast intake.
    fn say(&self, id: ConnectionId, frame: &mut BinaryBuffer) -> Result<(), AppError> {
        let room = self.joined_room()?;
        let from = sender_id(id)?;
        // The text must parse before anything is forwarded.
        frame.clone().read_string()?;

        let mut out = BinaryBuffer::reframe(0, encoded_str_size(&room) + 4, frame);
        out.append_string(&room)?;
        out.append_u32(from)?;
        out.set_index_tail();
        frame.set_index_tail();

        upgrade(&self.registry)?
            .broadcast_intake(out.into_send_bytes())
            .map_err(hub_error)
    }

    /// Counts the members of the joined room and replies with COUNT.
    fn who(&self, id: ConnectionId) -> Result<(), AppError> {
        let check = room_check(&self.joined_room()?)?;
        let registry = upgrade(&self.registry)?;

        tokio::spawn(async move {
            let count = match registry.selective_send(&check, None).await {
                Ok(count) => count,
                Err(e) => {
                    warn!(connection = id, error = %e, "WHO count failed");
                    return;
                }
            };
            let mut reply = BinaryBuffer::new(3);
            let built = reply
                .append_u8(OP_COUNT)
                .and_then(|()| reply.append_u16(u16::try_from(count).unwrap_or(u16::MAX)));
            if let Err(e) = built {
                warn!(connection = id, error = %e, "WHO reply not built");
                return;
            }
            if let Err(e) = registry.send_to_one(id, reply.into_send_bytes()).await {
                debug!(connection = id, error = %e, "WHO reply not delivered");
            }
        });
        Ok(())
    }
}

impl ConnectionApp for RoomMember {
    fn on_message_arrived(&self, id: ConnectionId, frame: &mut BinaryBuffer) -> Result<(), AppError> {
        while frame.has_more() {
            match frame.read_u8()? {
                OP_JOIN => {
                    let room = frame.read_string()?;
                    self.join(id, room);
                }
                OP_SAY => return self.say(id, frame),
                OP_WHO => self.who(id)?,
                other => {
                    return Err(AppError::Rejected(format!("unknown command 0x{other:02x}")));
                }
            }
        }
        Ok(())
    }

    fn prepare_outbound(&self, payload: Vec<u8>) -> Result<Vec<u8>, AppError> {
        Ok(payload)
    }

    /// `check` is `[room:str]`; matches when it names this member's room.
    fn check_send_eligibility(&self, check: &mut BinaryBuffer) -> Result<usize, AppError> {
        let wanted = check.read_string()?;
        let room = self.room.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(usize::from(room.as_deref() == Some(wanted.as_str())))
    }

    fn on_disconnected(&self, id: ConnectionId) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        if let Err(e) = registry.remove(id) {
            debug!(connection = id, error = %e, "already removed");
        }
    }

    fn status_text(&self) -> String {
        match self.room() {
            Some(room) => format!("<td>{}</td>", escape_html(&room)),
            None => "<td>-</td>".to_string(),
        }
    }
}

// ── Registry-wide side ────────────────────────────────────────────────────────

/// Delivers broadcast payloads `[room:str][from:u32][text:str]` to the
/// members of `room` as SAID frames.
pub struct RoomRelay {
    registry: Weak<ConnectionRegistry>,
}

impl RoomRelay {
    pub fn new(registry: Weak<ConnectionRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl BroadcastHandler for RoomRelay {
    async fn on_broadcast_arrived(&self, payload: Vec<u8>) -> Result<(), AppError> {
        let mut frame = BinaryBuffer::from_bytes(0, payload);
        let room = frame.read_string()?;
        let from = frame.read_u32()?;
        frame.clone().read_string()?;

        let check = room_check(&room)?;
        let mut out = BinaryBuffer::reframe(0, SAID_HEADER, &frame);
        out.append_u8(OP_SAID)?;
        out.append_u32(from)?;
        out.set_index_tail();

        let registry = upgrade(&self.registry)?;
        let delivered = registry
            .selective_send(&check, Some(&out))
            .await
            .map_err(hub_error)?;
        debug!(room = %room, from, delivered, "room message relayed");
        Ok(())
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn room_check(room: &str) -> Result<BinaryBuffer, AppError> {
    let mut check = BinaryBuffer::new(encoded_str_size(room));
    check.append_string(room)?;
    Ok(check)
}

fn sender_id(id: ConnectionId) -> Result<u32, AppError> {
    u32::try_from(id).map_err(|_| AppError::Rejected(format!("connection id {id} does not fit in u32")))
}

fn upgrade(registry: &Weak<ConnectionRegistry>) -> Result<Arc<ConnectionRegistry>, AppError> {
    registry
        .upgrade()
        .ok_or_else(|| AppError::Rejected("hub is shutting down".into()))
}

fn hub_error(e: HubError) -> AppError {
    AppError::Rejected(e.to_string())
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

// ── Tests ─────────────────────────────────────────────────────────────────────
