//! Spectrometer server: opcodes and payload records.

use crate::record::wire_record;

/// Spectrometer server opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum SpecOp {
    QueryVersion = 1,
    GetSpectrometerInfo = 2,
    GetWavelengths = 3,
    GetIntegrationParms = 4,
    SetIntegrationParms = 5,
    AcquireSpectrum = 6,
    GetSpectrumInfo = 7,
    GetSpectrumData = 8,
    AcquireCompleteSpectrum = 16,
    GetCompleteSpectrumData = 18,
}

impl SpecOp {
    pub fn code(self) -> u32 {
        self as u32
    }
}

/// Return code of a data fetch issued before any acquisition.
pub const NOT_ACQUIRED: i32 = -1;

wire_record! {
    /// Reply to `GetSpectrometerInfo`.
    pub struct SpectrometerInfo(Little) {
        pub exists: u32 => U32,
        pub model: String => Str(32),
        pub serial: String => Str(32),
        /// Points per spectrum.
        pub npoints: u32 => U32,
        pub lambda_min: f64 => F64,
        pub lambda_max: f64 => F64,
        /// Integration target in ms.
        pub ms_integrate: f64 => F64,
        pub num_average: u32 => U32,
        pub use_dark_pixel: u32 => U32,
        pub use_nl_correct: u32 => U32,
    }
}

wire_record! {
    /// Integration settings.
    pub struct IntegrationParms(Little) {
        pub ms_integrate: f64 => F64,
        pub num_average: u32 => U32,
        pub use_dark_pixel: u32 => U32,
        pub use_nl_correct: u32 => U32,
    }
}

wire_record! {
    /// Metadata of the last acquired spectrum.
    pub struct SpectrumInfo(Little) {
        pub npoints: u32 => U32,
        pub lambda_min: f64 => F64,
        pub lambda_max: f64 => F64,
        pub ms_integrate: f64 => F64,
        pub num_average: u32 => U32,
        pub use_dark_pixel: u32 => U32,
        pub use_nl_correct: u32 => U32,
        pub timestamp: i64 => I64,
    }
}

/// Meaning of a `SetIntegrationParms` return code.
pub fn set_integration_error(code: i32) -> &'static str {
    match code {
        -1 => "structure has the wrong size",
        _ => "bad integration values",
    }
}
