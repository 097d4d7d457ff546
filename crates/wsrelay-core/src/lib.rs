//! # wsrelay-core
//!
//! Shared library for wsrelay containing the binary frame codec.
//!
//! Every binary WebSocket message relayed by the hub carries a payload built
//! with [`BinaryBuffer`]: a byte vector with a single read/write cursor that
//! encodes big-endian integers (1, 2, 3, 4 and 8 bytes) and length-prefixed
//! UTF-16 strings.  This crate has no async code, no sockets and no
//! knowledge of connections; the hub crate and any embedding application
//! both depend on it to agree on the wire format.

pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `wsrelay_core::BinaryBuffer`.
pub use protocol::buffer::{encoded_str_size, BinaryBuffer, IntWidth};
pub use protocol::error::BufferError;
