//! LasGo text sub-protocol.
//!
//! A request is the command text followed by one NUL. A reply is a 7-byte
//! header of six decimal digits and a colon, then exactly that many bytes
//! of text:
//!
//! ```text
//! 000014:15.317 -28.002
//! ```

use crate::error::ProtocolError;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Longest command text accepted, excluding the NUL.
pub const MAX_COMMAND_LEN: usize = 256;

/// Size of the `NNNNNN:` reply header.
pub const TEXT_HEADER_LEN: usize = 7;

/// Encodes a command for the wire.
pub fn encode_command(command: &str) -> Result<Bytes, ProtocolError> {
    let len = command.len();
    if len > MAX_COMMAND_LEN {
        return Err(ProtocolError::CommandTooLong {
            len,
            max: MAX_COMMAND_LEN,
        });
    }
    let mut buf = BytesMut::with_capacity(len + 1);
    buf.put_slice(command.as_bytes());
    buf.put_u8(0);
    Ok(buf.freeze())
}

/// Parses the reply header and returns the payload length it announces.
pub fn parse_header(header: &[u8]) -> Result<usize, ProtocolError> {
    if header.len() != TEXT_HEADER_LEN {
        return Err(ProtocolError::MalformedFrame {
            expected: TEXT_HEADER_LEN,
            actual: header.len(),
        });
    }
    let digits = &header[..6];
    if header[6] != b':' || !digits.iter().all(u8::is_ascii_digit) {
        return Err(ProtocolError::InvalidText(format!(
            "bad reply header {:?}",
            String::from_utf8_lossy(header)
        )));
    }
    Ok(digits
        .iter()
        .fold(0usize, |acc, d| acc * 10 + (d - b'0') as usize))
}

/// Decodes reply text, cut at the first NUL.
pub fn decode_reply(payload: &[u8]) -> String {
    crate::record::fixed_str(payload)
}

/// Formats a two-coordinate command such as `MV` or `BM`.
pub fn format_move(command: &str, x: f64, y: f64) -> String {
    format!("{} {:?} {:?}", command, x, y)
}

fn parse_numbers(reply: &str) -> Result<Vec<f64>, ProtocolError> {
    reply
        .split_whitespace()
        .map(|token| {
            token
                .parse::<f64>()
                .map_err(|_| ProtocolError::InvalidText(format!("not a number: '{}'", token)))
        })
        .collect()
}

/// Parses a `GP` reply into `(x, y)`.
pub fn parse_position(reply: &str) -> Result<(f64, f64), ProtocolError> {
    match parse_numbers(reply)?.as_slice() {
        [x, y] => Ok((*x, *y)),
        other => Err(ProtocolError::InvalidText(format!(
            "position needs 2 values, got {}",
            other.len()
        ))),
    }
}

/// Parses a `QO` reply into the origin index and its name.
pub fn parse_device(reply: &str) -> Result<(i32, String), ProtocolError> {
    let mut tokens = reply.split_whitespace();
    let index = tokens
        .next()
        .and_then(|t| t.parse::<i32>().ok())
        .ok_or_else(|| ProtocolError::InvalidText(format!("bad device reply '{}'", reply)))?;
    let name = tokens.collect::<Vec<_>>().join(" ");
    Ok((index, name))
}

/// Reply to the `ST` command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextStatus {
    pub rc: i32,
    pub full_status: i32,
    pub x_status: i32,
    pub y_status: i32,
    pub x_rel: f64,
    pub y_rel: f64,
    pub x_abs: f64,
    pub y_abs: f64,
    pub x_feedback: f64,
    pub y_feedback: f64,
    pub x_error: f64,
    pub y_error: f64,
    pub x_velocity: f64,
    pub y_velocity: f64,
}

impl TextStatus {
    const FIELDS: usize = 14;

    pub fn parse(reply: &str) -> Result<Self, ProtocolError> {
        let n = parse_numbers(reply)?;
        if n.len() != Self::FIELDS {
            return Err(ProtocolError::InvalidText(format!(
                "status needs {} values, got {}",
                Self::FIELDS,
                n.len()
            )));
        }
        Ok(Self {
            rc: n[0] as i32,
            full_status: n[1] as i32,
            x_status: n[2] as i32,
            y_status: n[3] as i32,
            x_rel: n[4],
            y_rel: n[5],
            x_abs: n[6],
            y_abs: n[7],
            x_feedback: n[8],
            y_feedback: n[9],
            x_error: n[10],
            y_error: n[11],
            x_velocity: n[12],
            y_velocity: n[13],
        })
    }
}
