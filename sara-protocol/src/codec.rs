//! Whole-frame encoding and a streaming decoder.
//!
//! Clients send the envelope and payload as two writes and read them back
//! with exact-length reads, so they work on [`Envelope`] directly. The
//! streaming [`Decoder`] serves the other side of the wire: instrument
//! simulators and tooling that receive arbitrary chunks.

use crate::error::ProtocolError;
use crate::frame::{envelope_size, CrcCheck, Envelope};
use bytes::{Buf, Bytes, BytesMut};

/// An envelope together with its payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub envelope: Envelope,
    pub payload: Bytes,
}

impl Frame {
    /// Creates a frame, filling in payload length and CRC.
    pub fn new(opcode: u32, message_id: i32, option: i32, payload: Bytes, crc: bool) -> Self {
        let envelope = Envelope::request(opcode, message_id, option, crc).with_payload(&payload);
        Self { envelope, payload }
    }

    /// Builds the reply a server would send for this frame.
    pub fn reply(&self, return_code: i32, option: i32, payload: Bytes) -> Self {
        let mut envelope = Envelope::request(
            self.envelope.opcode,
            self.envelope.message_id,
            option,
            self.envelope.has_crc(),
        )
        .with_payload(&payload);
        envelope.return_code = return_code;
        Self { envelope, payload }
    }

    /// Encodes envelope and payload into one buffer.
    pub fn encode(&self) -> BytesMut {
        let mut buf = self.envelope.encode();
        buf.extend_from_slice(&self.payload);
        buf
    }

    pub fn crc_check(&self) -> CrcCheck {
        self.envelope.check_payload(&self.payload)
    }
}

/// Decodes frames from a byte stream of one CRC mode.
pub struct Decoder {
    buffer: BytesMut,
    crc: bool,
}

impl Decoder {
    pub fn new(crc: bool) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            crc,
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next frame from the buffer.
    ///
    /// Returns `Ok(None)` until a whole envelope and its payload are buffered.
    /// CRC is not enforced here; see [`Frame::crc_check`].
    pub fn decode_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        let header_len = envelope_size(self.crc);
        if self.buffer.len() < header_len {
            return Ok(None);
        }

        // Peek at the envelope without consuming
        let envelope = Envelope::decode(&self.buffer[..header_len], self.crc)?;
        let total_len = header_len + envelope.payload_length as usize;
        if self.buffer.len() < total_len {
            return Ok(None);
        }

        self.buffer.advance(header_len);
        let payload = self.buffer.split_to(envelope.payload_length as usize).freeze();

        Ok(Some(Frame { envelope, payload }))
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
