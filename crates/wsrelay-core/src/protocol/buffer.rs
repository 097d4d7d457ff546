//! Growable binary buffer with a read/write cursor.
//!
//! Wire format:
//! ```text
//! integer : 1, 2, 3, 4 or 8 bytes, big-endian, unsigned
//!           (8-byte values round-trip through i64 two's complement)
//! string  : [units:2][unit:2] * units   -- UTF-16 code units, units < 0x8000
//! ```
//!
//! A single cursor (`index`) is shared by appends and reads.  Builders append
//! from index 0 and hand the buffer to [`BinaryBuffer::slice_for_send`];
//! parsers wrap a received payload at index 0 and read until
//! [`BinaryBuffer::has_more`] returns `false`.
//!
//! # Why integers are split byte by byte
//!
//! Every multi-byte integer is decomposed into halves (4 bytes = 2 + 2,
//! 2 bytes = 1 + 1) until it reaches the 1-byte primitive.  The primitive is
//! the only place that checks the value range, so a value that is too large
//! for its width always fails on the most significant byte, before anything
//! has been written.  `append_int` repeats the range check up front so a
//! rejected value neither reports an overflow nor grows the buffer.

use tracing::debug;

use crate::protocol::error::BufferError;

/// Bytes added to the backing vector when an append runs past its end.
pub const DEFAULT_INCREMENT: usize = 1024;

/// Size of the length prefix in front of every encoded string.
pub const STR_LEN_SIZE: usize = 2;

/// Size of one encoded UTF-16 code unit.
pub const CHAR_SIZE: usize = 2;

/// Exclusive upper bound on the number of code units in one string.
pub const MAX_STRING_UNITS: usize = 0x8000;

/// Supported integer widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntWidth {
    One = 1,
    Two = 2,
    Three = 3,
    Four = 4,
    Eight = 8,
}

impl IntWidth {
    /// Number of bytes this width occupies on the wire.
    pub const fn bytes(self) -> usize {
        self as usize
    }
}

/// Returns the number of bytes `text` occupies once appended with
/// [`BinaryBuffer::append_string`].
///
/// Used to size the header region passed to [`BinaryBuffer::reframe`].
pub fn encoded_str_size(text: &str) -> usize {
    STR_LEN_SIZE + text.encode_utf16().count() * CHAR_SIZE
}

/// A byte vector plus a cursor and a growth increment.
///
/// Invariant: `index <= buf.len()` after every public operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryBuffer {
    buf: Vec<u8>,
    index: usize,
    /// Bytes to grow by when an append runs out of room.  0 disables growth.
    increment: usize,
}

impl BinaryBuffer {
    /// Creates a zero-filled buffer of `size` bytes with the cursor at 0.
    pub fn new(size: usize) -> Self {
        Self::with_index(0, size)
    }

    /// Creates a zero-filled buffer of `size` bytes with the cursor at `index`.
    ///
    /// Starting past 0 reserves a header region that can be filled in later
    /// with [`set_index`](Self::set_index).
    pub fn with_index(index: usize, size: usize) -> Self {
        Self {
            buf: vec![0; size],
            index: index.min(size),
            increment: DEFAULT_INCREMENT,
        }
    }

    /// Takes ownership of `bytes` and places the cursor at `index`.
    ///
    /// This is how received payloads are parsed: the pump hands over the
    /// message body and the application reads from index 0.
    pub fn from_bytes(index: usize, bytes: Vec<u8>) -> Self {
        Self {
            index: index.min(bytes.len()),
            buf: bytes,
            increment: DEFAULT_INCREMENT,
        }
    }

    /// Builds a new buffer holding `header_size` zero bytes followed by the
    /// unconsumed tail of `other` (from `other`'s cursor to its end).
    ///
    /// The cursor of the new buffer is placed at `index`, normally 0 so the
    /// caller can write the new header in front of the copied body.
    pub fn reframe(index: usize, header_size: usize, other: &BinaryBuffer) -> Self {
        let tail = &other.buf[other.index.min(other.buf.len())..];
        let mut buf = vec![0; header_size + tail.len()];
        buf[header_size..].copy_from_slice(tail);
        Self {
            index: index.min(buf.len()),
            buf,
            increment: DEFAULT_INCREMENT,
        }
    }

    /// Sets the growth increment.  `0` turns growth off: appends past the end
    /// then fail with [`BufferError::BufferOverflow`].
    pub fn with_increment(mut self, increment: usize) -> Self {
        self.increment = increment;
        self
    }

    pub fn increment(&self) -> usize {
        self.increment
    }

    /// Current cursor position.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Moves the cursor, clamped to the buffer length.
    pub fn set_index(&mut self, index: usize) {
        self.index = index.min(self.buf.len());
    }

    pub fn set_index_head(&mut self) {
        self.index = 0;
    }

    pub fn set_index_tail(&mut self) {
        self.index = self.buf.len();
    }

    /// Length of the backing vector (not the number of bytes written).
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Bytes between the cursor and the end of the backing vector.
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.index)
    }

    /// `true` while unread bytes remain; parsers loop on this to consume
    /// several commands packed into one payload.
    pub fn has_more(&self) -> bool {
        self.index < self.buf.len()
    }

    /// The whole backing vector, including any unused tail.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    /// Returns the part of the buffer that should go on the wire.
    ///
    /// If the cursor stopped short of the end (the buffer was over-allocated
    /// and only partly filled) this is `[0, index)`; otherwise it is the
    /// whole backing vector.
    pub fn slice_for_send(&self) -> &[u8] {
        if self.index < self.buf.len() {
            &self.buf[..self.index]
        } else {
            &self.buf
        }
    }

    /// Owned variant of [`slice_for_send`](Self::slice_for_send).
    pub fn into_send_bytes(mut self) -> Vec<u8> {
        if self.index < self.buf.len() {
            self.buf.truncate(self.index);
        }
        self.buf
    }

    // ── Appending ────────────────────────────────────────────────────────────

    /// Appends `value` big-endian in `width` bytes.
    ///
    /// # Errors
    ///
    /// - [`BufferError::ValueTooLarge`] if `value` needs more than `width` bytes.
    /// - [`BufferError::BufferOverflow`] if growth is disabled and the buffer
    ///   is full.
    ///
    /// On error the cursor is unchanged.
    pub fn append_int(&mut self, width: IntWidth, value: u64) -> Result<(), BufferError> {
        let start = self.index;
        if width != IntWidth::Eight && value >> (8 * width.bytes()) != 0 {
            return Err(BufferError::ValueTooLarge {
                value,
                width: width.bytes(),
            });
        }
        self.reserve(width.bytes())?;
        let result = match width {
            IntWidth::One => self.put_1byte(value),
            IntWidth::Two => self.put_2bytes(value),
            IntWidth::Three => self.put_3bytes(value),
            IntWidth::Four => self.put_4bytes(value),
            IntWidth::Eight => self.put_8bytes(value),
        };
        result.map_err(|e| {
            self.index = start;
            match e {
                BufferError::ValueTooLarge { .. } => BufferError::ValueTooLarge {
                    value,
                    width: width.bytes(),
                },
                other => other,
            }
        })
    }

    pub fn append_u8(&mut self, value: u8) -> Result<(), BufferError> {
        self.append_int(IntWidth::One, u64::from(value))
    }

    pub fn append_u16(&mut self, value: u16) -> Result<(), BufferError> {
        self.append_int(IntWidth::Two, u64::from(value))
    }

    /// Appends the low 24 bits of `value`; fails if any higher bit is set.
    pub fn append_u24(&mut self, value: u32) -> Result<(), BufferError> {
        self.append_int(IntWidth::Three, u64::from(value))
    }

    pub fn append_u32(&mut self, value: u32) -> Result<(), BufferError> {
        self.append_int(IntWidth::Four, u64::from(value))
    }

    /// Appends the two's-complement bits of `value` in 8 bytes.
    pub fn append_i64(&mut self, value: i64) -> Result<(), BufferError> {
        self.append_int(IntWidth::Eight, value as u64)
    }

    /// Appends a length-prefixed UTF-16 string.
    ///
    /// # Errors
    ///
    /// - [`BufferError::StringTooLong`] if `text` has 0x8000 or more code units.
    /// - [`BufferError::BufferOverflow`] if growth is disabled and the encoded
    ///   string does not fit.
    pub fn append_string(&mut self, text: &str) -> Result<(), BufferError> {
        let units: Vec<u16> = text.encode_utf16().collect();
        if units.len() >= MAX_STRING_UNITS {
            return Err(BufferError::StringTooLong(units.len()));
        }
        // Reserve the whole string up front so growth happens at most once.
        self.reserve(STR_LEN_SIZE + units.len() * CHAR_SIZE)?;
        self.put_2bytes(units.len() as u64)?;
        for unit in units {
            self.put_2bytes(u64::from(unit))?;
        }
        Ok(())
    }

    /// Ensures `additional` bytes fit after the cursor, growing if allowed.
    ///
    /// Growth adds the configured increment, or the exact deficit when that
    /// is larger.
    fn reserve(&mut self, additional: usize) -> Result<(), BufferError> {
        let needed = self.index + additional;
        let size = self.buf.len();
        if needed <= size {
            return Ok(());
        }
        if self.increment == 0 {
            return Err(BufferError::BufferOverflow {
                needed,
                capacity: size,
            });
        }
        let grow = (needed - size).max(self.increment);
        self.buf.resize(size + grow, 0);
        debug!(from = size, to = self.buf.len(), "binary buffer extended");
        Ok(())
    }

    fn put_1byte(&mut self, value: u64) -> Result<(), BufferError> {
        if value >= 0x100 {
            return Err(BufferError::ValueTooLarge { value, width: 1 });
        }
        self.reserve(1)?;
        self.buf[self.index] = value as u8;
        self.index += 1;
        Ok(())
    }

    fn put_2bytes(&mut self, value: u64) -> Result<(), BufferError> {
        self.put_1byte(value / 0x100)?;
        self.put_1byte(value % 0x100)
    }

    fn put_3bytes(&mut self, value: u64) -> Result<(), BufferError> {
        self.put_1byte(value / 0x1_0000)?;
        self.put_2bytes(value % 0x1_0000)
    }

    fn put_4bytes(&mut self, value: u64) -> Result<(), BufferError> {
        self.put_2bytes(value / 0x1_0000)?;
        self.put_2bytes(value % 0x1_0000)
    }

    fn put_8bytes(&mut self, value: u64) -> Result<(), BufferError> {
        self.put_4bytes(value / 0x1_0000_0000)?;
        self.put_4bytes(value % 0x1_0000_0000)
    }

    // ── Reading ──────────────────────────────────────────────────────────────

    /// Reads a big-endian unsigned integer of `width` bytes.
    ///
    /// # Errors
    ///
    /// [`BufferError::OutOfData`] if fewer than `width` bytes remain; the
    /// cursor is not moved.
    pub fn read_int(&mut self, width: IntWidth) -> Result<u64, BufferError> {
        self.require(width.bytes())?;
        Ok(match width {
            IntWidth::One => self.take_1byte(),
            IntWidth::Two => self.take_2bytes(),
            IntWidth::Three => self.take_3bytes(),
            IntWidth::Four => self.take_4bytes(),
            IntWidth::Eight => self.take_8bytes(),
        })
    }

    pub fn read_u8(&mut self) -> Result<u8, BufferError> {
        self.read_int(IntWidth::One).map(|v| v as u8)
    }

    pub fn read_u16(&mut self) -> Result<u16, BufferError> {
        self.read_int(IntWidth::Two).map(|v| v as u16)
    }

    pub fn read_u24(&mut self) -> Result<u32, BufferError> {
        self.read_int(IntWidth::Three).map(|v| v as u32)
    }

    pub fn read_u32(&mut self) -> Result<u32, BufferError> {
        self.read_int(IntWidth::Four).map(|v| v as u32)
    }

    pub fn read_i64(&mut self) -> Result<i64, BufferError> {
        self.read_int(IntWidth::Eight).map(|v| v as i64)
    }

    /// Reads a length-prefixed UTF-16 string.
    ///
    /// # Errors
    ///
    /// - [`BufferError::OutOfData`] if the prefix or the body is truncated.
    /// - [`BufferError::InvalidUtf16`] if the body holds an unpaired surrogate.
    ///
    /// On error the cursor is unchanged.
    pub fn read_string(&mut self) -> Result<String, BufferError> {
        let start = self.index;
        let result = self.take_string();
        if result.is_err() {
            self.index = start;
        }
        result
    }

    fn take_string(&mut self) -> Result<String, BufferError> {
        let count = self.read_int(IntWidth::Two)? as usize;
        self.require(count * CHAR_SIZE)?;
        let units: Vec<u16> = (0..count).map(|_| self.take_2bytes() as u16).collect();
        String::from_utf16(&units).map_err(|_| BufferError::InvalidUtf16)
    }

    fn require(&self, needed: usize) -> Result<(), BufferError> {
        let available = self.remaining();
        if available < needed {
            return Err(BufferError::OutOfData { needed, available });
        }
        Ok(())
    }

    // The take_* helpers assume `require` has already been checked.

    fn take_1byte(&mut self) -> u64 {
        let value = u64::from(self.buf[self.index]);
        self.index += 1;
        value
    }

    fn take_2bytes(&mut self) -> u64 {
        let high = self.take_1byte();
        let low = self.take_1byte();
        high * 0x100 + low
    }

    fn take_3bytes(&mut self) -> u64 {
        let high = self.take_1byte();
        let low = self.take_2bytes();
        high * 0x1_0000 + low
    }

    fn take_4bytes(&mut self) -> u64 {
        let high = self.take_2bytes();
        let low = self.take_2bytes();
        high * 0x1_0000 + low
    }

    fn take_8bytes(&mut self) -> u64 {
        let high = self.take_4bytes();
        let low = self.take_4bytes();
        (high << 32) | low
    }
}

impl From<Vec<u8>> for BinaryBuffer {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from_bytes(0, bytes)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
