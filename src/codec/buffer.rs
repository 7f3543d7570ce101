//! Framed byte buffer used by every cache section. All integers are
//! little-endian, strings are length-prefixed UTF-8, and sections are
//! bracketed between magic markers and running CRC32 checkpoints.

use bytes::{BufMut, Bytes, BytesMut};
use flate2::Crc;

/// Append-only serialization buffer with CRC checkpoints.
///
/// A checkpoint covers every byte written since the previous [`put_crc`]
/// call (or the start of the buffer), so interleaving `put_magic` /
/// payload / `put_crc` produces independently verifiable frames.
///
/// [`put_crc`]: SerialWriter::put_crc
pub struct SerialWriter {
    buf: BytesMut,
    crc_anchor: usize,
}

impl SerialWriter {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            crc_anchor: 0,
        }
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn put_u16(&mut self, value: u16) {
        self.buf.put_u16_le(value);
    }

    pub fn put_u32(&mut self, value: u32) {
        self.buf.put_u32_le(value);
    }

    pub fn put_i32(&mut self, value: i32) {
        self.buf.put_i32_le(value);
    }

    pub fn put_u64(&mut self, value: u64) {
        self.buf.put_u64_le(value);
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    /// Length-prefixed UTF-8 string: `{len: u32, bytes}`.
    pub fn put_string(&mut self, value: &str) {
        self.put_u32(value.len() as u32);
        self.put_bytes(value.as_bytes());
    }

    pub fn put_magic(&mut self, magic: &[u8]) {
        self.put_bytes(magic);
    }

    /// Appends the CRC32 of everything written since the last checkpoint and
    /// opens a new one.
    pub fn put_crc(&mut self) {
        let mut crc = Crc::new();
        crc.update(&self.buf[self.crc_anchor..]);
        let sum = crc.sum();
        self.put_u32(sum);
        self.crc_anchor = self.buf.len();
    }

    /// Zero-fills up to the next multiple of `align`.
    pub fn pad_to(&mut self, align: usize) {
        let target = crate::utils::align_to(self.buf.len(), align);
        self.buf.resize(target, 0);
        if self.crc_anchor > self.buf.len() {
            self.crc_anchor = self.buf.len();
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

impl Default for SerialWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Cursor-style reader over a serialized frame. Any failed read latches the
/// error state and every subsequent read returns its zero value, so callers
/// can decode a whole section and check [`ok`] once at the end.
///
/// [`ok`]: SerialReader::ok
pub struct SerialReader<'a> {
    buf: &'a [u8],
    pos: usize,
    crc_anchor: usize,
    failed: bool,
}

impl<'a> SerialReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            crc_anchor: 0,
            failed: false,
        }
    }

    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        if self.failed || self.pos + len > self.buf.len() {
            self.failed = true;
            return None;
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Some(slice)
    }

    pub fn get_u8(&mut self) -> u8 {
        self.take(1).map(|b| b[0]).unwrap_or(0)
    }

    pub fn get_u16(&mut self) -> u16 {
        self.take(2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
            .unwrap_or(0)
    }

    pub fn get_u32(&mut self) -> u32 {
        self.take(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .unwrap_or(0)
    }

    pub fn get_i32(&mut self) -> i32 {
        self.get_u32() as i32
    }

    pub fn get_u64(&mut self) -> u64 {
        let lo = self.get_u32() as u64;
        let hi = self.get_u32() as u64;
        lo | (hi << 32)
    }

    pub fn get_bytes(&mut self, len: usize) -> &'a [u8] {
        self.take(len).unwrap_or(&[])
    }

    pub fn get_string(&mut self) -> String {
        let len = self.get_u32() as usize;
        let bytes = self.get_bytes(len);
        match std::str::from_utf8(bytes) {
            Ok(text) => text.to_owned(),
            Err(_) => {
                self.failed = true;
                String::new()
            }
        }
    }

    /// Consumes `magic.len()` bytes and verifies them. A mismatch latches the
    /// error state.
    pub fn check_magic(&mut self, magic: &[u8]) -> bool {
        match self.take(magic.len()) {
            Some(bytes) if bytes == magic => true,
            _ => {
                self.failed = true;
                false
            }
        }
    }

    /// Consumes a u32 checksum and verifies it against everything read since
    /// the previous checkpoint.
    pub fn check_crc(&mut self) -> bool {
        let frame_end = self.pos;
        let expected = self.get_u32();
        if self.failed {
            return false;
        }
        let mut crc = Crc::new();
        crc.update(&self.buf[self.crc_anchor..frame_end]);
        self.crc_anchor = self.pos;
        if crc.sum() == expected {
            true
        } else {
            self.failed = true;
            false
        }
    }

    pub fn skip(&mut self, len: usize) {
        let _ = self.take(len);
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn ok(&self) -> bool {
        !self.failed
    }
}
