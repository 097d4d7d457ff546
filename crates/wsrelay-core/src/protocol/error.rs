//! Error type for the binary buffer codec.

use thiserror::Error;

/// Errors raised while appending to or reading from a
/// [`BinaryBuffer`](crate::protocol::buffer::BinaryBuffer).
///
/// Every variant is recoverable: the failing append or read leaves the
/// buffer's cursor exactly where it was, so the caller can report the problem
/// and carry on with the next frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// The value does not fit in the requested number of bytes.
    #[error("value {value} does not fit in {width} byte(s)")]
    ValueTooLarge { value: u64, width: usize },

    /// The string has 0x8000 or more UTF-16 code units and its length prefix
    /// would not fit in 15 bits.
    #[error("string too long: {0} UTF-16 code units (limit is 0x7FFF)")]
    StringTooLong(usize),

    /// Growth is disabled and the write would run past the end of the buffer.
    #[error("buffer overflow: need {needed} bytes, capacity is {capacity}")]
    BufferOverflow { needed: usize, capacity: usize },

    /// Fewer bytes remain after the cursor than the read requires.
    #[error("out of data: need {needed} bytes, {available} available")]
    OutOfData { needed: usize, available: usize },

    /// A decoded string contained an unpaired UTF-16 surrogate.
    #[error("string is not well-formed UTF-16")]
    InvalidUtf16,
}
