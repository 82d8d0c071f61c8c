//! Device sessions.
//!
//! Each session drives one instrument through a multi-call workflow and
//! tracks where it is, so that a step issued out of order fails locally
//! instead of confusing the server.

pub mod capture;
pub mod spectrum;
pub mod zone;

pub use capture::{CaptureSession, CaptureState, RawFrame};
pub use spectrum::{SpectrumAcquisition, SpectrumState};
pub use zone::{ZoneOutcome, ZoneRun, ZoneState};

use serde::{Deserialize, Serialize};

/// What to do after a zone run failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryAction {
    /// Run the zone again.
    Retry,
    /// Accept the failed run and go on.
    Continue,
    /// Stop the collection.
    Abort,
}

/// Operator intervention after a failed zone run.
///
/// Nothing retries on its own; a retry only happens when an
/// implementation returns [`RecoveryAction::Retry`].
pub trait Recovery {
    fn decide(&mut self, outcome: &ZoneOutcome) -> RecoveryAction;
}

/// Recovery that always answers the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedRecovery(pub RecoveryAction);

impl Recovery for FixedRecovery {
    fn decide(&mut self, outcome: &ZoneOutcome) -> RecoveryAction {
        tracing::warn!("Zone run failed ({}), answering {:?}", outcome, self.0);
        self.0
    }
}

/// Fails a step issued in the wrong state.
pub(crate) fn expect_state<T: PartialEq + std::fmt::Debug>(
    step: &str,
    current: T,
    allowed: &[T],
) -> Result<(), crate::error::ClientError> {
    if allowed.contains(&current) {
        return Ok(());
    }
    Err(crate::error::ClientError::InvalidState(format!(
        "{} not allowed in state {:?}",
        step, current
    )))
}
