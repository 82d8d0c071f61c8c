//! Camera capture session.
//!
//! ```text
//! Idle -> TriggerConfigured -> Armed -> Triggered -> FrameReady
//! ```
//!
//! Reconfiguring the trigger is allowed from any state and starts the
//! cycle over.

use super::expect_state;
use crate::camera::{AppliedTrigger, CameraClient};
use crate::connection::Transport;
use crate::error::ClientError;
use bytes::Bytes;
use sara_protocol::camera::{ArmAction, CameraInfo, ExtSlope, ImageInfo, TriggerMode, NEWEST_FRAME};
use sara_protocol::pixels::{to_8bit, unpack_12bit, ColorLayout};
use sara_protocol::rawfile::RawFileHeader;
use sara_protocol::ProtocolError;
use serde::{Deserialize, Serialize};

/// Ring size used when the camera reports an empty ring.
const FALLBACK_RING_SIZE: i32 = 10;

/// Capture session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureState {
    #[default]
    Idle,
    TriggerConfigured,
    Armed,
    Triggered,
    FrameReady,
}

/// Bytes between the starts of two rows. A pitch of 0, or one shorter than
/// a row, means packed rows.
fn row_pitch(info: &ImageInfo) -> usize {
    (info.memory_pitch as usize).max(info.width as usize * 2)
}

/// One frame as read from the camera ring.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    pub info: ImageInfo,
    /// Two little-endian bytes per pixel, rows [`pitch`](Self::pitch)
    /// bytes apart.
    pub data: Bytes,
}

impl RawFrame {
    pub fn width(&self) -> usize {
        self.info.width as usize
    }

    pub fn height(&self) -> usize {
        self.info.height as usize
    }

    pub fn pitch(&self) -> usize {
        row_pitch(&self.info)
    }

    /// 12-bit samples in row-major order, row padding dropped.
    pub fn samples(&self) -> Result<Vec<u16>, ProtocolError> {
        unpack_12bit(&self.data, self.width(), self.height(), self.pitch())
    }

    /// Samples reshaped to `height` rows of `width`.
    pub fn rows(&self) -> Result<Vec<Vec<u16>>, ProtocolError> {
        let width = self.width();
        if width == 0 {
            return Ok(Vec::new());
        }
        Ok(self.samples()?.chunks(width).map(<[u16]>::to_vec).collect())
    }

    /// Samples scaled to 8 bits.
    pub fn to_8bit(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(self.samples()?.into_iter().map(to_8bit).collect())
    }

    pub fn layout(&self, camera: &CameraInfo) -> ColorLayout {
        ColorLayout::from_is_color(camera.is_color)
    }

    /// Header of the raw file container for this frame.
    pub fn raw_header(&self, camera: &CameraInfo) -> RawFileHeader {
        RawFileHeader::from_capture(&self.info, camera, self.data.len())
    }
}

/// Drives a camera through trigger, arm and readout.
pub struct CaptureSession<'a, S> {
    camera: &'a mut CameraClient<S>,
    state: CaptureState,
    requested: Option<TriggerMode>,
    applied: Option<AppliedTrigger>,
}

impl<'a, S: Transport> CaptureSession<'a, S> {
    pub fn new(camera: &'a mut CameraClient<S>) -> Self {
        Self {
            camera,
            state: CaptureState::Idle,
            requested: None,
            applied: None,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Trigger settings the camera returned for the last configuration.
    pub fn applied(&self) -> Option<&AppliedTrigger> {
        self.applied.as_ref()
    }

    pub fn camera(&mut self) -> &mut CameraClient<S> {
        &mut *self.camera
    }

    /// Reads the current trigger settings, sets `mode` and `frames` per
    /// trigger, and keeps what the camera returns.
    pub async fn configure_trigger(
        &mut self,
        mode: TriggerMode,
        frames: u32,
    ) -> Result<&AppliedTrigger, ClientError> {
        self.apply_trigger(mode, frames, None).await
    }

    /// External trigger on the rising edge with `frames` per trigger.
    pub async fn configure_external_trigger(
        &mut self,
        frames: u32,
    ) -> Result<&AppliedTrigger, ClientError> {
        self.apply_trigger(TriggerMode::External, frames, Some(ExtSlope::Positive))
            .await
    }

    async fn apply_trigger(
        &mut self,
        mode: TriggerMode,
        frames: u32,
        slope: Option<ExtSlope>,
    ) -> Result<&AppliedTrigger, ClientError> {
        let mut info = self.camera.trigger_info().await?;
        info.mode = mode.code();
        info.frames = frames;
        if let Some(slope) = slope {
            info.ext_slope = slope.code();
        }

        let applied = self.camera.set_trigger_mode(mode, Some(&info)).await?;
        tracing::debug!(
            "Trigger mode {} applied, {} frames per trigger, armed {}",
            applied.mode,
            applied.info.frames,
            applied.info.armed
        );
        self.requested = Some(mode);
        self.state = CaptureState::TriggerConfigured;
        let applied = self.applied.insert(applied);
        Ok(&*applied)
    }

    /// Arms the camera; returns the arm status.
    pub async fn arm(&mut self) -> Result<i32, ClientError> {
        expect_state("arm", self.state, &[CaptureState::TriggerConfigured])?;
        let status = self.camera.arm(ArmAction::Arm).await?;
        self.state = CaptureState::Armed;
        Ok(status)
    }

    /// Verifies the applied trigger, makes sure the ring can hold a frame,
    /// and resets the frame count to 0.
    pub async fn check_settings(&mut self) -> Result<(), ClientError> {
        expect_state("check settings", self.state, &[CaptureState::Armed])?;
        let (requested, applied) = match (self.requested, self.applied.as_ref()) {
            (Some(requested), Some(applied)) => (requested, applied),
            _ => return Err(ClientError::InvalidState("trigger not configured".into())),
        };

        if applied.mode != requested.code() as i32 {
            tracing::error!(
                "Could not set trigger mode {}: camera reports {}",
                requested.code(),
                applied.mode
            );
            return Err(ClientError::InvalidState(format!(
                "trigger mode {} requested, camera reports {}",
                requested.code(),
                applied.mode
            )));
        }
        if !applied.info.is_armed() {
            tracing::error!("Camera is not armed");
            return Err(ClientError::InvalidState("camera is not armed".into()));
        }

        let ring_size = self.camera.ring_size().await?;
        tracing::debug!("Ring size is {}", ring_size);
        if ring_size < 1 {
            tracing::warn!("Ring size too small, increasing it to {}", FALLBACK_RING_SIZE);
            self.camera.set_ring_size(FALLBACK_RING_SIZE).await?;
        }
        self.camera.reset_frame_count(0).await?;
        Ok(())
    }

    /// Fires a software trigger.
    pub async fn trigger(&mut self) -> Result<(), ClientError> {
        expect_state("trigger", self.state, &[CaptureState::Armed])?;
        self.camera.trigger().await?;
        self.state = CaptureState::Triggered;
        Ok(())
    }

    /// Reads one frame ([`NEWEST_FRAME`] for the newest).
    pub async fn read_frame(&mut self, frame: i32) -> Result<RawFrame, ClientError> {
        expect_state(
            "read frame",
            self.state,
            &[CaptureState::Triggered, CaptureState::FrameReady],
        )?;
        let raw = self.fetch(frame).await?;
        self.state = CaptureState::FrameReady;
        Ok(raw)
    }

    async fn fetch(&mut self, frame: i32) -> Result<RawFrame, ClientError> {
        let info = self.camera.image_info(frame).await?;
        let data = self.camera.image_data(frame).await?;
        let expected = row_pitch(&info) * info.height as usize;
        if data.len() != expected {
            return Err(ClientError::DataLoss {
                what: "image data",
                expected,
                actual: data.len(),
            });
        }
        Ok(RawFrame { info, data })
    }

    /// Fails with [`ClientError::NoImageCaptured`] unless the ring holds
    /// exactly `expected` frames.
    pub async fn verify_frame_count(&mut self, expected: i32) -> Result<(), ClientError> {
        let frames = self.camera.frame_count().await?;
        if frames != expected {
            tracing::error!("Camera did not reach frame count {}, ring holds {}", expected, frames);
            return Err(ClientError::NoImageCaptured { frames });
        }
        Ok(())
    }

    /// Runs a full software-triggered capture of one frame.
    pub async fn capture(&mut self, check: bool) -> Result<RawFrame, ClientError> {
        self.configure_trigger(TriggerMode::Software, 1).await?;
        self.arm().await?;
        if check {
            self.check_settings().await?;
        }
        self.trigger().await?;
        let frame = self.read_frame(NEWEST_FRAME).await?;
        if check {
            self.verify_frame_count(1).await?;
        }
        Ok(frame)
    }

    /// Reads every frame captured since the last reset, oldest first.
    /// Externally triggered bursts may be collected straight after the
    /// trigger is configured.
    pub async fn collect_ring(&mut self) -> Result<Vec<RawFrame>, ClientError> {
        expect_state(
            "collect ring",
            self.state,
            &[
                CaptureState::TriggerConfigured,
                CaptureState::Armed,
                CaptureState::Triggered,
                CaptureState::FrameReady,
            ],
        )?;
        let count = self.camera.frame_count().await?;
        if count <= 0 {
            tracing::warn!("Ring holds no frames");
            return Ok(Vec::new());
        }

        let mut frames = Vec::with_capacity(count as usize);
        for index in 0..count {
            frames.push(self.fetch(index).await?);
            tracing::debug!("Image received index {}", index);
        }
        self.state = CaptureState::FrameReady;
        Ok(frames)
    }
}
