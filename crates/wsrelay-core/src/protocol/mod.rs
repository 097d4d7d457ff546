//! Frame payload codec: the growable buffer and its error type.

pub mod buffer;
pub mod error;

pub use buffer::{encoded_str_size, BinaryBuffer, IntWidth, DEFAULT_INCREMENT, MAX_STRING_UNITS};
pub use error::BufferError;
