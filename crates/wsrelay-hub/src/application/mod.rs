//! Application layer for wsrelay-hub.
//!
//! The hub core moves opaque payloads; this layer decides what they mean.
//!
//! # Responsibilities
//!
//! - Parsing peer commands out of inbound frames
//! - Choosing recipients through send-eligibility checks
//! - Building the frames sent back to peers
//!
//! # What does NOT belong here?
//!
//! - Sockets, pumps and the accept loop (that is infrastructure)
//! - Wire-level integer and string encoding (that is `wsrelay-core`)

pub mod relay_room;

pub use relay_room::{RoomMember, RoomRelay};
