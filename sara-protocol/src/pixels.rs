//! 12-bit sensor sample unpacking.
//!
//! Image data arrives as two little-endian bytes per pixel holding a 12-bit
//! sample. Rows may be padded to `memory_pitch` bytes.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};

/// Full-scale value of a 12-bit sample.
pub const MAX_SAMPLE: u16 = 4095;

/// Sensor color layout of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorLayout {
    Mono,
    /// Bayer mosaic with the GB filter phase.
    BayerGb,
}

impl ColorLayout {
    pub fn from_is_color(is_color: u32) -> Self {
        if is_color != 0 {
            ColorLayout::BayerGb
        } else {
            ColorLayout::Mono
        }
    }
}

/// Unpacks `height` rows of `width` samples.
///
/// A `pitch` of 0 means rows are packed at `width * 2` bytes. Data shorter
/// than the last row's end is an error; nothing is padded.
pub fn unpack_12bit(
    data: &[u8],
    width: usize,
    height: usize,
    pitch: usize,
) -> Result<Vec<u16>, ProtocolError> {
    let row_bytes = width * 2;
    let pitch = if pitch == 0 { row_bytes } else { pitch };
    if pitch < row_bytes {
        return Err(ProtocolError::InvalidPitch { pitch, row_bytes });
    }

    let needed = if height == 0 { 0 } else { (height - 1) * pitch + row_bytes };
    if data.len() < needed {
        return Err(ProtocolError::SizeMismatch {
            record: "image data",
            expected: needed,
            actual: data.len(),
        });
    }

    let mut samples = Vec::with_capacity(width * height);
    for row in 0..height {
        let start = row * pitch;
        samples.extend(
            data[start..start + row_bytes]
                .chunks_exact(2)
                .map(|pair| pair[0] as u16 | (pair[1] as u16) << 8),
        );
    }
    Ok(samples)
}

/// Scales a 12-bit sample to 8 bits, rounding to nearest.
pub fn to_8bit(sample: u16) -> u8 {
    let scaled = (sample.min(MAX_SAMPLE) as f64 * 255.0 / MAX_SAMPLE as f64).round();
    scaled as u8
}
