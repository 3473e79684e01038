//! Growable byte buffer used to emit and backpatch bytecode.

use crate::opcode::{Op, OPERAND_WIDTH};

/// Append-only byte buffer with in-place rewrites.
///
/// Offsets handed out by the append methods are logical indices into the
/// buffer and remain valid when the underlying storage grows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteBuffer {
    bytes: Vec<u8>,
}

impl ByteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
        }
    }

    /// Logical length.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Append one byte, returning its offset.
    pub fn add_byte(&mut self, byte: u8) -> usize {
        let offset = self.bytes.len();
        self.bytes.push(byte);
        offset
    }

    /// Append an opcode, returning its offset.
    pub fn add_op(&mut self, op: Op) -> usize {
        self.add_byte(op as u8)
    }

    /// Append a run of bytes, returning the offset of the first one.
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        let offset = self.bytes.len();
        self.bytes.extend_from_slice(bytes);
        offset
    }

    /// Append a little-endian `i64`.
    pub fn add_int(&mut self, value: i64) -> usize {
        self.append(&value.to_le_bytes())
    }

    /// Append a little-endian `f64`.
    pub fn add_float(&mut self, value: f64) -> usize {
        self.append(&value.to_le_bytes())
    }

    /// Reserve an 8-byte operand to be rewritten later.
    pub fn reserve_placeholder(&mut self) -> usize {
        self.append(&[0; OPERAND_WIDTH])
    }

    /// Overwrite the 8 bytes at `offset`.
    ///
    /// Panics if `offset` was not handed out by this buffer.
    pub fn rewrite_int(&mut self, offset: usize, value: i64) {
        self.bytes[offset..offset + OPERAND_WIDTH].copy_from_slice(&value.to_le_bytes());
    }

    /// Overwrite a single byte.
    pub fn rewrite_byte(&mut self, offset: usize, value: u8) {
        self.bytes[offset] = value;
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl From<Vec<u8>> for ByteBuffer {
    fn from(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

/// Read a little-endian `i64` at `offset`.
pub fn read_int(bytes: &[u8], offset: usize) -> Option<i64> {
    let raw = bytes.get(offset..offset.checked_add(OPERAND_WIDTH)?)?;
    let mut buf = [0u8; OPERAND_WIDTH];
    buf.copy_from_slice(raw);
    Some(i64::from_le_bytes(buf))
}

/// Read a little-endian `f64` at `offset`.
pub fn read_float(bytes: &[u8], offset: usize) -> Option<f64> {
    read_int(bytes, offset).map(|bits| f64::from_bits(bits as u64))
}
