//! v8 wire framing.
//!
//! Every message travels as a 7-byte header followed by its payload:
//!
//! ```text
//!   u16 BE   opcode
//!   u24 BE   payload length
//!   u16 BE   protocol version
//! ```
//!
//! The header always travels in the clear. The payload is plaintext until
//! the session holds a shared key, ciphertext from then on. Changing any
//! field here is a wire-compatibility break with the stock client.

// ── Constants ─────────────────────────────────────────────────────────────────

/// Size of the frame header in bytes.
pub const HEADER_LENGTH: usize = 7;

/// Largest payload the 24-bit length field can carry.
pub const MAX_PAYLOAD: usize = 0xFF_FFFF;

/// Protocol version stamped on every outbound frame.
pub const PROTOCOL_VERSION: u16 = 8;

// ── Header ────────────────────────────────────────────────────────────────────

/// The fixed-size frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub opcode: u16,
    pub length: u32,
    pub version: u16,
}

impl FrameHeader {
    pub fn encode(&self) -> [u8; HEADER_LENGTH] {
        let opcode = self.opcode.to_be_bytes();
        let length = self.length.to_be_bytes();
        let version = self.version.to_be_bytes();
        [
            opcode[0], opcode[1], length[1], length[2], length[3], version[0], version[1],
        ]
    }

    pub fn decode(bytes: &[u8; HEADER_LENGTH]) -> Self {
        Self {
            opcode: u16::from_be_bytes([bytes[0], bytes[1]]),
            length: u32::from_be_bytes([0, bytes[2], bytes[3], bytes[4]]),
            version: u16::from_be_bytes([bytes[5], bytes[6]]),
        }
    }
}

// ── Frame ─────────────────────────────────────────────────────────────────────

/// One complete message: opcode plus payload, ready for the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: u16,
    pub version: u16,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Build an outbound frame at the current protocol version.
    pub fn new(opcode: u16, payload: Vec<u8>) -> Result<Self, WireError> {
        if payload.len() > MAX_PAYLOAD {
            return Err(WireError::PayloadTooLarge(payload.len()));
        }
        Ok(Self {
            opcode,
            version: PROTOCOL_VERSION,
            payload,
        })
    }

    pub fn header(&self) -> FrameHeader {
        FrameHeader {
            opcode: self.opcode,
            length: self.payload.len() as u32,
            version: self.version,
        }
    }

    /// Serialize header and payload into one buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LENGTH + self.payload.len());
        bytes.extend_from_slice(&self.header().encode());
        bytes.extend_from_slice(&self.payload);
        bytes
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("payload length {0} exceeds maximum {}", MAX_PAYLOAD)]
    PayloadTooLarge(usize),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
