//! LasGo zone run.
//!
//! ```text
//! Idle -> JobConfigured -> ZoneValidated -> ZoneExecuting -> Completed
//!                                                         -> Failed
//! ```
//!
//! A rejected validation also ends in `Failed`. The final state is only
//! known after [`ZoneRun::poll_status`].

use super::expect_state;
use crate::connection::Transport;
use crate::error::{ClientError, DeviceError};
use crate::lasgo::LasgoClient;
use sara_protocol::lasgo::{execute_error, execute_option, Job, JobReset, QueueStatus, Zone};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Zone run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneState {
    #[default]
    Idle,
    JobConfigured,
    ZoneValidated,
    ZoneExecuting,
    Completed,
    Failed,
}

/// Result of a finished zone run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ZoneOutcome {
    Completed,
    Failed { execute_rc: i32, status: QueueStatus },
}

impl ZoneOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, ZoneOutcome::Completed)
    }
}

impl fmt::Display for ZoneOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZoneOutcome::Completed => write!(f, "completed"),
            ZoneOutcome::Failed { execute_rc, status } => write!(
                f,
                "failed: rc {} ({}), queue {:#06x}, system {:#06x}",
                execute_rc,
                execute_error(*execute_rc),
                status.queue,
                status.system
            ),
        }
    }
}

/// Drives one job and zone execution on the stage.
pub struct ZoneRun<'a, S> {
    lasgo: &'a mut LasgoClient<S>,
    state: ZoneState,
    execute_rc: Option<i32>,
    status: Option<QueueStatus>,
}

impl<'a, S: Transport> ZoneRun<'a, S> {
    pub fn new(lasgo: &'a mut LasgoClient<S>) -> Self {
        Self {
            lasgo,
            state: ZoneState::Idle,
            execute_rc: None,
            status: None,
        }
    }

    pub fn state(&self) -> ZoneState {
        self.state
    }

    pub fn lasgo(&mut self) -> &mut LasgoClient<S> {
        &mut *self.lasgo
    }

    /// Reads the current job, lets `edit` change it, and pushes it back.
    pub async fn configure_job<F>(&mut self, edit: F) -> Result<Job, ClientError>
    where
        F: FnOnce(&mut Job),
    {
        expect_state(
            "configure job",
            self.state,
            &[
                ZoneState::Idle,
                ZoneState::JobConfigured,
                ZoneState::Completed,
                ZoneState::Failed,
            ],
        )?;
        let mut job = self.lasgo.job(JobReset::Current).await?;
        edit(&mut job);
        self.lasgo.set_job(&job).await?;
        tracing::debug!("Job set, max accel {} g", job.max_accel);

        self.execute_rc = None;
        self.status = None;
        self.state = ZoneState::JobConfigured;
        Ok(job)
    }

    /// Dry-runs `zone`. A rejection fails the run.
    pub async fn validate(&mut self, zone: &Zone) -> Result<(), ClientError> {
        expect_state(
            "validate",
            self.state,
            &[ZoneState::JobConfigured, ZoneState::ZoneValidated],
        )?;
        let rc = self.lasgo.validate_zone(execute_option(1, false), zone).await?;
        if rc != 0 {
            tracing::warn!("Stage rejects the requested zone (rc {})", rc);
            self.execute_rc = Some(rc);
            self.state = ZoneState::Failed;
            return Err(DeviceError::new("lasgo", "validate zone", rc, execute_error(rc)).into());
        }
        self.state = ZoneState::ZoneValidated;
        Ok(())
    }

    /// Runs `zones` synchronously under `timeout`. Returns the execute
    /// code; the run's outcome also depends on the status that follows.
    pub async fn execute(&mut self, zones: &[Zone], timeout: Duration) -> Result<i32, ClientError> {
        expect_state("execute", self.state, &[ZoneState::ZoneValidated])?;
        if zones.is_empty() {
            return Err(ClientError::InvalidArgument("no zones to execute".into()));
        }
        self.state = ZoneState::ZoneExecuting;
        let rc = self
            .lasgo
            .execute_zones(execute_option(zones.len(), false), zones, timeout)
            .await?;
        if rc == 0 {
            tracing::info!("Scan executed successfully");
        }
        self.execute_rc = Some(rc);
        Ok(rc)
    }

    /// Queries the queue status and settles the run.
    pub async fn poll_status(&mut self) -> Result<QueueStatus, ClientError> {
        expect_state(
            "poll status",
            self.state,
            &[ZoneState::ZoneExecuting, ZoneState::Completed, ZoneState::Failed],
        )?;
        let status = self.lasgo.status().await?;
        let execute_rc = self.execute_rc.unwrap_or(-1);
        self.state = if status.is_complete(execute_rc) {
            ZoneState::Completed
        } else {
            ZoneState::Failed
        };
        self.status = Some(status);
        Ok(status)
    }

    pub fn outcome(&self) -> Result<ZoneOutcome, ClientError> {
        match (self.state, self.status) {
            (ZoneState::Completed, Some(_)) => Ok(ZoneOutcome::Completed),
            (ZoneState::Failed, Some(status)) => Ok(ZoneOutcome::Failed {
                execute_rc: self.execute_rc.unwrap_or(-1),
                status,
            }),
            (state, _) => Err(ClientError::InvalidState(format!(
                "no outcome in state {:?} before a status poll",
                state
            ))),
        }
    }
}
