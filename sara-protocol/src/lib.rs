//! # sara-protocol
//!
//! Wire protocol for the SARA instrument servers (camera, LasGo stage,
//! spectrometer, focus module).
//!
//! This crate provides:
//! - Big-endian request/reply envelopes with optional CRC-32 validation
//! - A schema-driven codec for fixed-layout payload records
//! - Opcodes and payload records for every instrument family
//! - The LasGo text sub-protocol
//! - The raw image file container and 12-bit pixel unpacking
//!
//! Nothing here performs I/O on sockets; see `sara-client`.

pub mod camera;
pub mod codec;
pub mod error;
pub mod focus;
pub mod frame;
pub mod lasgo;
pub mod pixels;
pub mod rawfile;
pub mod record;
pub mod spectrometer;
pub mod text;

pub use codec::{Decoder, Frame};
pub use error::ProtocolError;
pub use frame::{crc32, envelope_size, CrcCheck, Envelope, ENVELOPE_SIZE_CRC, ENVELOPE_SIZE_PLAIN};
pub use record::{decode_f64_array, decode_records, encode_records, Record};

/// Largest payload a reply may declare (64 MiB). Larger values only come
/// from a corrupted or desynchronized stream.
pub const MAX_PAYLOAD_SIZE: u32 = 64 * 1024 * 1024;

/// Default timeout for connects and single operations, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// First message id used by a fresh client.
pub const FIRST_MESSAGE_ID: i32 = 101;
