//! ZOOCAM camera client.

use crate::address::{Endpoint, Role};
use crate::connection::{ConnectionConfig, Transport};
use crate::error::{ClientError, DeviceError};
use crate::rpc::{Reply, Request, RpcEngine};
use bytes::Bytes;
use sara_protocol::camera::{
    image_error_message, ArmAction, BurstStatus, CameraInfo, CameraOp, ExposureFlags,
    ExposureParms, FileFormat, FileSaveParms, ImageInfo, LedState, RingInfo, TriggerInfo,
    TriggerMode,
};
use std::time::Duration;
use tokio::net::TcpStream;

const DEVICE: &str = "camera";

/// Camera id the server describes when none is given.
pub const DEFAULT_CAMERA_ID: i32 = 1;

/// Trigger settings as the server applied them.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedTrigger {
    /// Mode the server reports as set.
    pub mode: i32,
    pub info: TriggerInfo,
}

/// Client for the ZOOCAM camera server.
pub struct CameraClient<S = TcpStream> {
    rpc: RpcEngine<S>,
}

impl CameraClient<TcpStream> {
    /// Connects to the camera server on a host alias.
    pub async fn connect(alias: &str, config: ConnectionConfig) -> Result<Self, ClientError> {
        let endpoint = Endpoint::for_role(Role::Camera, alias);
        Self::connect_to(&endpoint, config).await
    }

    pub async fn connect_to(
        endpoint: &Endpoint,
        config: ConnectionConfig,
    ) -> Result<Self, ClientError> {
        Ok(Self::new(RpcEngine::connect(DEVICE, endpoint, config).await?))
    }
}

impl<S: Transport> CameraClient<S> {
    pub fn new(rpc: RpcEngine<S>) -> Self {
        Self { rpc }
    }

    pub fn rpc(&self) -> &RpcEngine<S> {
        &self.rpc
    }

    pub async fn close(self) -> Result<(), ClientError> {
        self.rpc.close().await
    }

    async fn call(&mut self, op: CameraOp, option: i32) -> Result<Reply, ClientError> {
        self.rpc.call(Request::new(op.code()).with_option(option)).await
    }

    // =========================================================================
    // Camera information and exposure
    // =========================================================================

    /// Server version, carried in the return code.
    pub async fn version(&mut self) -> Result<i32, ClientError> {
        let reply = self.call(CameraOp::QueryVersion, 0).await?;
        tracing::debug!("Camera server version {}", reply.return_code());
        Ok(reply.return_code())
    }

    /// Describes camera `camera_id` (the rig has one camera,
    /// [`DEFAULT_CAMERA_ID`]).
    pub async fn camera_info(&mut self, camera_id: i32) -> Result<CameraInfo, ClientError> {
        let reply = self.call(CameraOp::GetCameraInfo, camera_id).await?;
        if reply.return_code() != 0 {
            let rc = reply.return_code();
            return Err(DeviceError::new(DEVICE, "camera info", rc, "camera not connected").into());
        }
        reply.record()
    }

    pub async fn exposure(&mut self) -> Result<ExposureParms, ClientError> {
        self.call(CameraOp::GetExposureParms, 0).await?.record()
    }

    /// Sets the exposure fields selected by `flags` and returns the
    /// settings the camera actually applied.
    pub async fn set_exposure(
        &mut self,
        flags: ExposureFlags,
        parms: &ExposureParms,
    ) -> Result<ExposureParms, ClientError> {
        let request = Request::new(CameraOp::SetExposureParms.code())
            .with_option(flags.bits() as i32)
            .with_record(parms)?;
        let reply = self.rpc.call(request).await?;
        if reply.return_code() != 0 {
            let rc = reply.return_code();
            return Err(DeviceError::new(DEVICE, "set exposure", rc, "exposure not applied").into());
        }
        reply.record()
    }

    // =========================================================================
    // Triggering
    // =========================================================================

    /// Fires a software trigger; returns the server's code.
    pub async fn trigger(&mut self) -> Result<i32, ClientError> {
        Ok(self.call(CameraOp::Trigger, 0).await?.return_code())
    }

    pub async fn trigger_info(&mut self) -> Result<TriggerInfo, ClientError> {
        self.call(CameraOp::GetTriggerMode, 0).await?.record()
    }

    /// Sets the trigger mode, and with `info` the full trigger settings.
    /// When `info` is given its mode wins over `mode`.
    pub async fn set_trigger_mode(
        &mut self,
        mode: TriggerMode,
        info: Option<&TriggerInfo>,
    ) -> Result<AppliedTrigger, ClientError> {
        let mut request =
            Request::new(CameraOp::SetTriggerMode.code()).with_option(mode.code() as i32);
        if let Some(info) = info {
            if info.mode != mode.code() {
                tracing::warn!(
                    "Trigger settings override requested mode {} with {}",
                    mode.code(),
                    info.mode
                );
            }
            request = request.with_option(info.mode as i32).with_record(info)?;
        }
        let requested = request.option;

        let reply = self.rpc.call(request).await?;
        if reply.return_code() != requested {
            tracing::error!(
                "Failed to set trigger mode {}: camera reports {}",
                requested,
                reply.return_code()
            );
        }
        Ok(AppliedTrigger {
            mode: reply.return_code(),
            info: reply.record()?,
        })
    }

    /// Arms, disarms or queries; returns the arm status.
    pub async fn arm(&mut self, action: ArmAction) -> Result<i32, ClientError> {
        let reply = self.call(CameraOp::Arm, action.code() as i32).await?;
        tracing::debug!("Arm status {}", reply.return_code());
        Ok(reply.return_code())
    }

    // =========================================================================
    // Images
    // =========================================================================

    /// Metadata of a ring frame
    /// ([`NEWEST_FRAME`](sara_protocol::camera::NEWEST_FRAME) for the newest).
    pub async fn image_info(&mut self, frame: i32) -> Result<ImageInfo, ClientError> {
        let reply = self.call(CameraOp::GetImageInfo, frame).await?;
        if reply.return_code() != 0 {
            let rc = reply.return_code();
            return Err(DeviceError::new(DEVICE, "image info", rc, image_error_message(rc)).into());
        }
        reply.record()
    }

    /// Raw sensor bytes of a ring frame.
    pub async fn image_data(&mut self, frame: i32) -> Result<Bytes, ClientError> {
        let reply = self.call(CameraOp::GetImageData, frame).await?;
        let rc = reply.return_code();
        if rc != 0 {
            if !reply.has_payload() {
                let message = image_error_message(rc);
                return Err(DeviceError::new(DEVICE, "image data", rc, message).into());
            }
            tracing::debug!("Image data rc {} but {} bytes followed", rc, reply.payload.len());
        }
        tracing::debug!("Image data received, {} bytes", reply.payload.len());
        Ok(reply.payload)
    }

    /// Has the server save one frame under `path`.
    pub async fn save_frame(
        &mut self,
        frame: i32,
        format: FileFormat,
        path: &str,
    ) -> Result<(), ClientError> {
        self.save(CameraOp::SaveFrame, frame, format, path).await
    }

    /// Has the server save every valid ring frame under the `path` template.
    pub async fn save_all(&mut self, format: FileFormat, path: &str) -> Result<(), ClientError> {
        self.save(CameraOp::SaveAll, 0, format, path).await
    }

    async fn save(
        &mut self,
        op: CameraOp,
        frame: i32,
        format: FileFormat,
        path: &str,
    ) -> Result<(), ClientError> {
        let parms = FileSaveParms {
            frame,
            format: format.code(),
            path: path.to_string(),
        };
        let option = if op == CameraOp::SaveFrame { frame } else { 0 };
        let request = Request::new(op.code()).with_option(option).with_record(&parms)?;
        let reply = self.rpc.call(request).await?;
        if reply.return_code() != 0 {
            let operation = if op == CameraOp::SaveFrame { "save frame" } else { "save all" };
            let rc = reply.return_code();
            return Err(DeviceError::new(DEVICE, operation, rc, "server could not save").into());
        }
        Ok(())
    }

    // =========================================================================
    // Ring buffer
    // =========================================================================

    pub async fn ring_info(&mut self) -> Result<RingInfo, ClientError> {
        self.call(CameraOp::RingGetInfo, 0).await?.record()
    }

    /// Number of buffers in the ring.
    pub async fn ring_size(&mut self) -> Result<i32, ClientError> {
        Ok(self.call(CameraOp::RingGetSize, 0).await?.return_code())
    }

    /// Resizes the ring; returns the size set.
    pub async fn set_ring_size(&mut self, size: i32) -> Result<i32, ClientError> {
        let rc = self.call(CameraOp::RingSetSize, size).await?.return_code();
        if rc < 0 {
            return Err(DeviceError::new(DEVICE, "set ring size", rc, "ring not resized").into());
        }
        tracing::debug!("Ring size set {}", rc);
        Ok(rc)
    }

    /// Resets the valid frame count so the next frame lands in buffer `count`.
    pub async fn reset_frame_count(&mut self, count: i32) -> Result<i32, ClientError> {
        Ok(self.call(CameraOp::RingResetCount, count).await?.return_code())
    }

    /// Frames captured since the last reset.
    pub async fn frame_count(&mut self) -> Result<i32, ClientError> {
        let rc = self.call(CameraOp::RingGetFrameCount, 0).await?.return_code();
        tracing::debug!("Number of frames in ring {}", rc);
        Ok(rc)
    }

    // =========================================================================
    // Burst capture
    // =========================================================================

    /// Arms a burst; returns immediately. 0 when armed.
    pub async fn burst_arm(&mut self) -> Result<i32, ClientError> {
        Ok(self.call(CameraOp::BurstArm, 0).await?.return_code())
    }

    pub async fn burst_abort(&mut self) -> Result<i32, ClientError> {
        Ok(self.call(CameraOp::BurstAbort, 0).await?.return_code())
    }

    pub async fn burst_status(&mut self) -> Result<BurstStatus, ClientError> {
        let rc = self.call(CameraOp::BurstStatus, 0).await?.return_code();
        u32::try_from(rc)
            .ok()
            .and_then(BurstStatus::from_code)
            .ok_or_else(|| ClientError::InvalidState(format!("unknown burst status {}", rc)))
    }

    /// Waits up to `timeout` for a burst to complete. Returns `false` on
    /// timeout.
    pub async fn burst_wait(&mut self, timeout: Duration) -> Result<bool, ClientError> {
        let ms = i32::try_from(timeout.as_millis()).map_err(|_| {
            ClientError::InvalidArgument(format!("burst wait of {:?} too long", timeout))
        })?;
        // The server holds the reply for up to `timeout`
        let deadline = timeout + self.rpc.connection().timeout();
        let request = Request::new(CameraOp::BurstWait.code()).with_option(ms);
        let rc = self.rpc.call_with_timeout(request, deadline).await?.return_code();
        Ok(rc == 0)
    }

    /// Switches the LED supply, or queries it with [`LedState::Query`].
    /// Returns whether the LED is on.
    pub async fn led(&mut self, state: LedState) -> Result<bool, ClientError> {
        Ok(self.call(CameraOp::LedSetState, state.code() as i32).await?.return_code() == 1)
    }
}
