//! ZOOCAM camera server: opcodes, payload records and enumerations.
//!
//! All camera payloads are little-endian. Bulk image data is raw sensor
//! bytes; see [`crate::pixels`] for unpacking.

use crate::error::ProtocolError;
use crate::record::{wire_enum, wire_record};
use serde::{Deserialize, Serialize};

/// Camera server opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum CameraOp {
    QueryVersion = 1,
    GetCameraInfo = 2,
    GetExposureParms = 3,
    SetExposureParms = 4,
    Trigger = 5,
    GetTriggerMode = 6,
    SetTriggerMode = 7,
    Arm = 8,
    GetImageInfo = 9,
    GetImageData = 10,
    SaveFrame = 11,
    SaveAll = 12,
    RingGetInfo = 13,
    RingGetSize = 14,
    RingSetSize = 15,
    RingResetCount = 16,
    RingGetFrameCount = 17,
    BurstArm = 18,
    BurstAbort = 19,
    BurstStatus = 20,
    BurstWait = 21,
    LedSetState = 22,
}

impl CameraOp {
    pub fn code(self) -> u32 {
        self as u32
    }
}

/// Frame index meaning "most recent frame in the ring".
pub const NEWEST_FRAME: i32 = -1;

/// Width of the path field in [`FileSaveParms`].
pub const SAVE_PATH_LEN: usize = 260;

wire_record! {
    /// Reply to `GetCameraInfo`.
    pub struct CameraInfo(Little) {
        /// 0 unknown, 1 DCX, 2 Thorlabs scientific.
        pub camera_type: u32 => U32,
        pub name: String => Str(32),
        pub model: String => Str(32),
        pub manufacturer: String => Str(32),
        pub serial: String => Str(32),
        pub version: String => Str(32),
        pub date: String => Str(32),
        pub width: u32 => U32,
        pub height: u32 => U32,
        pub is_color: u32 => U32,
        pub x_pixel_um: f64 => F64,
        pub y_pixel_um: f64 => F64,
    }
}

wire_record! {
    /// Exposure and gain settings, sent and returned by the exposure opcodes.
    pub struct ExposureParms(Little) {
        /// Exposure time in ms.
        pub exposure: f64 => F64,
        pub fps: f64 => F64,
        pub gamma: f64 => F64,
        pub master_gain: f64 => F64,
        pub red_gain: f64 => F64,
        pub green_gain: f64 => F64,
        pub blue_gain: f64 => F64,
    }
}

wire_record! {
    /// Trigger configuration.
    pub struct TriggerInfo(Little) {
        pub mode: u32 => U32,
        pub ext_slope: u32 => U32,
        /// [`TriggerCapabilities`] bits.
        pub capabilities: u32 => U32,
        pub armed: u32 => U32,
        /// Frames per trigger in software and external modes.
        pub frames: u32 => U32,
        /// ms to wait for a previous trigger before switching mode.
        pub ms_wait: u32 => U32,
        pub n_burst: u32 => U32,
    }
}

impl TriggerInfo {
    pub fn capabilities(&self) -> TriggerCapabilities {
        TriggerCapabilities::from_bits(self.capabilities)
    }

    pub fn is_armed(&self) -> bool {
        self.armed != 0
    }
}

wire_record! {
    /// Metadata of one frame in the ring.
    pub struct ImageInfo(Little) {
        pub camera_type: u32 => U32,
        /// Ring index of the frame.
        pub frame: i32 => I32,
        /// Unix time of capture in seconds.
        pub image_time: u64 => U64,
        /// Camera clock time in seconds, arbitrary epoch.
        pub camera_time: f64 => F64,
        pub width: u32 => U32,
        pub height: u32 => U32,
        /// Bytes between rows.
        pub memory_pitch: u32 => U32,
        pub exposure: f64 => F64,
        pub gamma: f64 => F64,
        pub master_gain: f64 => F64,
        pub red_gain: f64 => F64,
        pub green_gain: f64 => F64,
        pub blue_gain: f64 => F64,
        pub color_correct_mode: u32 => U32,
        pub color_correct_strength: f64 => F64,
    }
}

wire_record! {
    /// Server-side save request.
    pub struct FileSaveParms(Little) {
        pub frame: i32 => I32,
        /// [`FileFormat`] code.
        pub format: u32 => U32,
        pub path: String => Str(SAVE_PATH_LEN),
    }
}

wire_record! {
    /// Ring buffer bookkeeping.
    pub struct RingInfo(Little) {
        /// Number of buffers in the ring.
        pub n_size: u32 => U32,
        /// Frames valid since the last reset.
        pub n_valid: u32 => U32,
        pub i_last: u32 => U32,
        pub i_show: u32 => U32,
    }
}

/// Which exposure fields a `SetExposureParms` request modifies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExposureFlags(u32);

impl ExposureFlags {
    pub const EXPOSURE: u32 = 0x01;
    pub const FPS: u32 = 0x02;
    pub const GAMMA: u32 = 0x04;
    pub const MASTER_GAIN: u32 = 0x08;
    pub const RED_GAIN: u32 = 0x10;
    pub const GREEN_GAIN: u32 = 0x20;
    pub const BLUE_GAIN: u32 = 0x40;

    const ALL: u32 = 0x7F;

    pub fn new() -> Self {
        Self(0)
    }

    pub fn all() -> Self {
        Self(Self::ALL)
    }

    pub fn with(mut self, flag: u32) -> Self {
        self.0 |= flag & Self::ALL;
        self
    }

    pub fn contains(&self, flag: u32) -> bool {
        self.0 & flag == flag
    }

    pub fn bits(&self) -> u32 {
        self.0
    }
}

/// Trigger capability bits reported in [`TriggerInfo::capabilities`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerCapabilities(u32);

impl TriggerCapabilities {
    pub const FREERUN: u32 = 1 << 0;
    pub const SOFTWARE: u32 = 1 << 1;
    pub const EXTERNAL: u32 = 1 << 2;
    pub const SINGLE_SHOT: u32 = 1 << 3;
    pub const BURST: u32 = 1 << 4;
    pub const ARM_DISARM: u32 = 1 << 5;
    pub const FORCE_EXT_TRIGGER: u32 = 1 << 6;
    pub const MULTIPLE_FRAMES_PER_TRIGGER: u32 = 1 << 7;
    pub const EXT_TRIG_SLOPE: u32 = 1 << 8;

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn with(mut self, flag: u32) -> Self {
        self.0 |= flag;
        self
    }

    pub fn has_freerun(&self) -> bool {
        self.0 & Self::FREERUN != 0
    }

    pub fn has_software(&self) -> bool {
        self.0 & Self::SOFTWARE != 0
    }

    pub fn has_external(&self) -> bool {
        self.0 & Self::EXTERNAL != 0
    }

    pub fn has_single_shot(&self) -> bool {
        self.0 & Self::SINGLE_SHOT != 0
    }

    pub fn has_burst(&self) -> bool {
        self.0 & Self::BURST != 0
    }

    pub fn has_arm_disarm(&self) -> bool {
        self.0 & Self::ARM_DISARM != 0
    }

    pub fn has_force_ext_trigger(&self) -> bool {
        self.0 & Self::FORCE_EXT_TRIGGER != 0
    }

    pub fn has_multiple_frames_per_trigger(&self) -> bool {
        self.0 & Self::MULTIPLE_FRAMES_PER_TRIGGER != 0
    }

    pub fn has_ext_trig_slope(&self) -> bool {
        self.0 & Self::EXT_TRIG_SLOPE != 0
    }
}

wire_enum! {
    /// Trigger modes.
    pub enum TriggerMode {
        Freerun = 0,
        Software = 1,
        External = 2,
        SingleShot = 3,
        Burst = 4,
    }
}

wire_enum! {
    /// External trigger polarity.
    pub enum ExtSlope {
        NoChange = 0,
        Positive = 1,
        Negative = 2,
        Unsupported = 3,
    }
}

wire_enum! {
    /// Options of the `Arm` opcode; also the arm status it returns.
    pub enum ArmAction {
        Query = 0,
        Arm = 1,
        Disarm = 2,
        Unknown = 3,
    }
}

wire_enum! {
    /// State of a burst capture.
    pub enum BurstStatus {
        Init = 0,
        ArmRequest = 1,
        Armed = 2,
        Running = 3,
        Complete = 4,
        Abort = 5,
        Fail = 6,
    }
}

wire_enum! {
    /// LED control options; the reply carries the resulting state.
    pub enum LedState {
        Off = 0,
        On = 1,
        Query = 2,
    }
}

wire_enum! {
    /// Image file formats for server-side saves.
    pub enum FileFormat {
        Default = 0,
        Bmp = 1,
        Raw = 2,
        Jpg = 3,
        Png = 4,
    }
}

impl std::str::FromStr for FileFormat {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "default" | "dflt" => Ok(FileFormat::Default),
            "bmp" => Ok(FileFormat::Bmp),
            "raw" => Ok(FileFormat::Raw),
            "jpg" | "jpeg" => Ok(FileFormat::Jpg),
            "png" => Ok(FileFormat::Png),
            other => Err(ProtocolError::InvalidText(format!(
                "unsupported file format '{}'",
                other
            ))),
        }
    }
}

/// Meaning of a non-zero `GetImageInfo`/`GetImageData` return code.
pub fn image_error_message(code: i32) -> &'static str {
    match code {
        1 => "no camera connected",
        2 => "frame invalid",
        _ => "image request failed",
    }
}
