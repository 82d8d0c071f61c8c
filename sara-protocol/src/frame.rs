//! Binary envelope framing every request and reply.
//!
//! The envelope is big-endian. In CRC mode (the default on every
//! instrument server) it carries a trailing CRC-32 of the payload:
//!
//! ```text
//! +---------+------------+---------+-------------+-------------+---------+
//! | opcode  | message_id | option  | return_code | payload_len | crc32   |
//! | 4 bytes | 4 bytes    | 4 bytes | 4 bytes     | 4 bytes     | 4 bytes |
//! +---------+------------+---------+-------------+-------------+---------+
//! | payload (payload_len bytes, layout fixed by the opcode)              |
//! +----------------------------------------------------------------------+
//! ```
//!
//! Without CRC mode the last field is absent and the envelope is 20 bytes.

use crate::error::ProtocolError;
use crate::MAX_PAYLOAD_SIZE;
use bytes::{BufMut, BytesMut};

/// Envelope size with the CRC field (5 * 4 + 4 = 24).
pub const ENVELOPE_SIZE_CRC: usize = 24;

/// Envelope size without the CRC field (5 * 4 = 20).
pub const ENVELOPE_SIZE_PLAIN: usize = 20;

/// Returns the envelope size for a session's CRC mode.
pub const fn envelope_size(crc: bool) -> usize {
    if crc {
        ENVELOPE_SIZE_CRC
    } else {
        ENVELOPE_SIZE_PLAIN
    }
}

/// CRC-32 with the zlib polynomial, over raw payload bytes.
pub fn crc32(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

/// Outcome of checking a received payload against the envelope CRC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrcCheck {
    /// CRC present and matching.
    Verified,
    /// Nothing to check: CRC mode off or empty payload.
    Skipped,
    /// CRC present and wrong.
    Mismatch { expected: u32, actual: u32 },
}

impl CrcCheck {
    pub fn is_mismatch(&self) -> bool {
        matches!(self, CrcCheck::Mismatch { .. })
    }
}

/// Request/reply envelope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Envelope {
    /// Operation selector, numbered per device family.
    pub opcode: u32,
    /// Correlation tag echoed by the reply.
    pub message_id: i32,
    /// Opcode-specific single parameter.
    pub option: i32,
    /// 0 on success, opcode-specific otherwise.
    pub return_code: i32,
    /// Bytes of payload following the envelope.
    pub payload_length: u32,
    /// Payload CRC; `None` when the session runs without CRC mode.
    pub crc32: Option<u32>,
}

impl Envelope {
    /// Creates a request envelope with no payload.
    pub fn request(opcode: u32, message_id: i32, option: i32, crc: bool) -> Self {
        Self {
            opcode,
            message_id,
            option,
            return_code: 0,
            payload_length: 0,
            crc32: crc.then_some(0),
        }
    }

    /// Sets `payload_length` and, in CRC mode, the payload CRC (0 when empty).
    pub fn with_payload(mut self, payload: &[u8]) -> Self {
        self.payload_length = payload.len() as u32;
        if self.crc32.is_some() {
            self.crc32 = Some(if payload.is_empty() { 0 } else { crc32(payload) });
        }
        self
    }

    pub fn with_return_code(mut self, return_code: i32) -> Self {
        self.return_code = return_code;
        self
    }

    pub fn has_crc(&self) -> bool {
        self.crc32.is_some()
    }

    /// Size of this envelope on the wire.
    pub fn encoded_len(&self) -> usize {
        envelope_size(self.has_crc())
    }

    /// Whether a reply envelope echoes this request's opcode and message id.
    pub fn echoed_by(&self, reply: &Envelope) -> bool {
        self.opcode == reply.opcode && self.message_id == reply.message_id
    }

    /// Encodes the envelope into bytes.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.encoded_len());

        // Opcode (4 bytes)
        buf.put_u32(self.opcode);

        // Message id (4 bytes)
        buf.put_i32(self.message_id);

        // Option (4 bytes)
        buf.put_i32(self.option);

        // Return code (4 bytes)
        buf.put_i32(self.return_code);

        // Payload length (4 bytes)
        buf.put_u32(self.payload_length);

        // CRC-32 of payload (4 bytes, CRC mode only)
        if let Some(crc) = self.crc32 {
            buf.put_u32(crc);
        }

        buf
    }

    /// Decodes an envelope from exactly one envelope's worth of bytes.
    pub fn decode(bytes: &[u8], crc: bool) -> Result<Self, ProtocolError> {
        let expected = envelope_size(crc);
        if bytes.len() != expected {
            return Err(ProtocolError::MalformedFrame {
                expected,
                actual: bytes.len(),
            });
        }

        let word = |i: usize| [bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]];

        let payload_length = u32::from_be_bytes(word(16));
        if payload_length > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: payload_length,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        Ok(Self {
            opcode: u32::from_be_bytes(word(0)),
            message_id: i32::from_be_bytes(word(4)),
            option: i32::from_be_bytes(word(8)),
            return_code: i32::from_be_bytes(word(12)),
            payload_length,
            crc32: crc.then(|| u32::from_be_bytes(word(20))),
        })
    }

    /// Checks a received payload against this envelope's CRC.
    pub fn check_payload(&self, payload: &[u8]) -> CrcCheck {
        match self.crc32 {
            Some(expected) if !payload.is_empty() => {
                let actual = crc32(payload);
                if actual == expected {
                    CrcCheck::Verified
                } else {
                    CrcCheck::Mismatch { expected, actual }
                }
            }
            _ => CrcCheck::Skipped,
        }
    }
}
