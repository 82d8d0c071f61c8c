//! Focus module server: opcodes, records and grid types.

use crate::record::{wire_enum, wire_record};

/// Focus server opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum FocusOp {
    ServerEnd = 0,
    QueryVersion = 1,
    QuerySampleId = 2,
    SetSampleId = 3,
    QuerySampleText = 4,
    SetSampleText = 5,
    QueryPosn = 6,
    QueryFocus = 7,
    GotoPosn = 8,
    QuerySpecial = 9,
    SetSpecial = 10,
    GotoSpecial = 11,
    QueryGridType = 12,
    SelectGridType = 13,
    QuerySampleGrid = 14,
    SetSampleGrid = 15,
    GotoSampleGrid = 16,
    QueryZMotorStatus = 17,
    QueryZMotorEngage = 18,
    SetZMotorEngage = 19,
    QueryZMotorPosn = 20,
    SetZMotorPosn = 21,
    SetZMotorPosnWait = 22,
}

impl FocusOp {
    pub fn code(self) -> u32 {
        self as u32
    }
}

/// Coordinate value that leaves an axis where it is.
pub const UNCHANGED: f64 = -999.0;

/// z value that focuses from the wafer calibration.
pub const FROM_CALIBRATION: f64 = -998.0;

wire_record! {
    /// Focus motor height.
    pub struct Posn1d(Little) {
        pub z: f64 => F64,
    }
}

wire_record! {
    pub struct Posn3d(Little) {
        pub x: f64 => F64,
        pub y: f64 => F64,
        pub z: f64 => F64,
    }
}

impl Posn3d {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

wire_record! {
    /// One sample-grid point and whether its focus is calibrated.
    pub struct CalibPoint(Little) {
        pub x: f64 => F64,
        pub y: f64 => F64,
        pub z: f64 => F64,
        pub calibrated: u32 => U32,
    }
}

wire_enum! {
    /// Named reference positions.
    pub enum SpecialPoint {
        Blank = 0,
        Mirror = 1,
        Silicon = 2,
        Posn3 = 3,
        Posn4 = 4,
    }
}

wire_enum! {
    /// Sample grid patterns.
    pub enum GridType {
        Wafer9 = 0,
        Wafer25 = 1,
        Wafer57 = 2,
        Wafer121 = 3,
        Plate9 = 4,
        Plate25 = 5,
        Plate36 = 6,
        Plate49 = 7,
        Litho9 = 8,
    }
}

impl GridType {
    /// Number of points in the grid.
    pub fn points(self) -> usize {
        match self {
            GridType::Wafer9 | GridType::Plate9 | GridType::Litho9 => 9,
            GridType::Wafer25 | GridType::Plate25 => 25,
            GridType::Wafer57 => 57,
            GridType::Wafer121 => 121,
            GridType::Plate36 => 36,
            GridType::Plate49 => 49,
        }
    }
}

/// Z motor status bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MotorStatus(u32);

impl MotorStatus {
    pub const ACTIVE: u32 = 0x0001;
    pub const ENGAGED: u32 = 0x0002;
    pub const HOMING: u32 = 0x0004;
    pub const HOMED: u32 = 0x0008;
    pub const MOVING: u32 = 0x0010;
    pub const SWEEP: u32 = 0x0100;
    pub const INVALID: u32 = 0xF000;

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn is_active(&self) -> bool {
        self.0 & Self::ACTIVE != 0
    }

    pub fn is_engaged(&self) -> bool {
        self.0 & Self::ENGAGED != 0
    }

    pub fn is_homing(&self) -> bool {
        self.0 & Self::HOMING != 0
    }

    pub fn is_homed(&self) -> bool {
        self.0 & Self::HOMED != 0
    }

    pub fn is_moving(&self) -> bool {
        self.0 & Self::MOVING != 0
    }

    pub fn is_sweeping(&self) -> bool {
        self.0 & Self::SWEEP != 0
    }

    pub fn is_invalid(&self) -> bool {
        self.0 & Self::INVALID != 0
    }
}
