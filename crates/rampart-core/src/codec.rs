//! Payload reader and writer helpers.
//!
//! The v8 payload encoding is big-endian throughout: fixed-width integers,
//! strings and byte arrays behind an i32 length prefix, and a length of -1
//! for the absent string. The reader never panics; truncated or hostile
//! input comes back as a `CodecError`.

use bytes::{Buf, BufMut};
use thiserror::Error;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("payload ended early: needed {needed} more bytes, had {remaining}")]
    UnexpectedEof { needed: usize, remaining: usize },

    #[error("negative length prefix {0}")]
    NegativeLength(i32),

    #[error("string is not valid UTF-8")]
    BadUtf8,
}

// ── Writer ────────────────────────────────────────────────────────────────────

/// Append-only payload builder.
#[derive(Debug, Default)]
pub struct PayloadWriter {
    buf: Vec<u8>,
}

impl PayloadWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn put_bool(&mut self, value: bool) {
        self.buf.put_u8(u8::from(value));
    }

    pub fn put_u16(&mut self, value: u16) {
        self.buf.put_u16(value);
    }

    pub fn put_i32(&mut self, value: i32) {
        self.buf.put_i32(value);
    }

    pub fn put_i64(&mut self, value: i64) {
        self.buf.put_i64(value);
    }

    /// Length-prefixed UTF-8 string; `None` encodes as length -1.
    pub fn put_string(&mut self, value: Option<&str>) {
        match value {
            Some(s) => {
                self.buf.put_i32(s.len() as i32);
                self.buf.put_slice(s.as_bytes());
            }
            None => self.buf.put_i32(-1),
        }
    }

    /// Length-prefixed byte array.
    pub fn put_byte_array(&mut self, value: &[u8]) {
        self.buf.put_i32(value.len() as i32);
        self.buf.put_slice(value);
    }

    /// Raw bytes, no prefix. For material whose length the protocol fixes,
    /// like keys and nonces.
    pub fn put_raw(&mut self, value: &[u8]) {
        self.buf.put_slice(value);
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

// ── Reader ────────────────────────────────────────────────────────────────────

/// Cursor over a received payload.
#[derive(Debug)]
pub struct PayloadReader<'a> {
    buf: &'a [u8],
}

impl<'a> PayloadReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn require(&self, needed: usize) -> Result<(), CodecError> {
        if self.buf.remaining() < needed {
            return Err(CodecError::UnexpectedEof {
                needed: needed - self.buf.remaining(),
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        self.require(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        self.require(2)?;
        Ok(self.buf.get_u16())
    }

    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        self.require(4)?;
        Ok(self.buf.get_i32())
    }

    pub fn read_i64(&mut self) -> Result<i64, CodecError> {
        self.require(8)?;
        Ok(self.buf.get_i64())
    }

    /// Length-prefixed UTF-8 string; length -1 reads as `None`.
    pub fn read_string(&mut self) -> Result<Option<String>, CodecError> {
        let len = self.read_i32()?;
        if len == -1 {
            return Ok(None);
        }
        let bytes = self.read_prefixed(len)?;
        let text = std::str::from_utf8(bytes).map_err(|_| CodecError::BadUtf8)?;
        Ok(Some(text.to_owned()))
    }

    /// Length-prefixed byte array.
    pub fn read_byte_array(&mut self) -> Result<Vec<u8>, CodecError> {
        let len = self.read_i32()?;
        Ok(self.read_prefixed(len)?.to_vec())
    }

    /// Exactly `N` raw bytes, for fixed-length material like keys and nonces.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        self.require(N)?;
        let (head, rest) = self.buf.split_at(N);
        self.buf = rest;
        Ok(head.try_into().expect("split_at yields exactly N bytes"))
    }

    /// Everything left in the payload.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = self.buf;
        self.buf = &[];
        rest
    }

    fn read_prefixed(&mut self, len: i32) -> Result<&'a [u8], CodecError> {
        if len < 0 {
            return Err(CodecError::NegativeLength(len));
        }
        let len = len as usize;
        self.require(len)?;
        let (head, rest) = self.buf.split_at(len);
        self.buf = rest;
        Ok(head)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
