//! Stripe collection runs.
//!
//! One run sets the camera up for an external trigger burst, has the stage
//! scan one laser stripe (the stage fires the camera triggers), and writes
//! every frame captured during the scan. A failed stripe is handed to a
//! [`Recovery`]; nothing is retried without its answer.

use crate::config::{Config, ScanPlan, StripeConfig};
use sara_client::session::{CaptureSession, RawFrame, ZoneOutcome, ZoneRun};
use sara_client::{
    CameraClient, ClientError, LasgoClient, Recovery, RecoveryAction, Transport, DEFAULT_CAMERA_ID,
};
use sara_protocol::camera::CameraInfo;
use sara_protocol::lasgo::{Laser, Position, PowerUnits, Zone};
use sara_protocol::rawfile::{raw_file_path, write_raw_image};
use sara_protocol::ProtocolError;
use std::path::{Path, PathBuf};
use tokio::sync::watch;

/// Collection error.
#[derive(Debug, thiserror::Error)]
pub enum CollectionError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: ProtocolError,
    },

    #[error("run {run} aborted by operator ({outcome})")]
    Aborted { run: u32, outcome: ZoneOutcome },

    #[error("cancelled before {step}")]
    Cancelled { step: &'static str },
}

/// What one run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// Run index as used in file names.
    pub index: u32,
    pub outcome: ZoneOutcome,
    /// Stripe attempts, retries included.
    pub attempts: u32,
    /// Frames the camera held after the scan.
    pub frames_collected: usize,
    pub files: Vec<PathBuf>,
}

/// Drives the camera and stage through a series of stripe runs.
pub struct Collection<'a, C, L> {
    camera: &'a mut CameraClient<C>,
    lasgo: &'a mut LasgoClient<L>,
    config: &'a Config,
    cancel: watch::Receiver<bool>,
}

impl<'a, C: Transport, L: Transport> Collection<'a, C, L> {
    /// `cancel` turning `true` stops the collection at the next step
    /// boundary.
    pub fn new(
        camera: &'a mut CameraClient<C>,
        lasgo: &'a mut LasgoClient<L>,
        config: &'a Config,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            camera,
            lasgo,
            config,
            cancel,
        }
    }

    /// Reads the camera description and sets the configured ring size.
    pub async fn prepare(&mut self) -> Result<CameraInfo, CollectionError> {
        let info = self.camera.camera_info(DEFAULT_CAMERA_ID).await?;
        tracing::info!(
            "Camera {} {} ({}x{})",
            info.model,
            info.serial,
            info.width,
            info.height
        );

        let ring = self.camera.ring_info().await?;
        tracing::debug!("Ring info {:?}", ring);
        let current = self.camera.ring_size().await?;
        tracing::info!("Current ring size {}", current);
        let size = self.camera.set_ring_size(self.config.camera.ring_size).await?;
        tracing::info!("Ring size set to {}", size);
        Ok(info)
    }

    /// Prepares the camera, then performs every configured run.
    pub async fn run_all<R: Recovery + ?Sized>(
        &mut self,
        recovery: &mut R,
    ) -> Result<Vec<RunReport>, CollectionError> {
        check_cancel(&self.cancel, "camera setup")?;
        let camera_info = self.prepare().await?;

        let mut reports = Vec::with_capacity(self.config.output.runs as usize);
        for run in 0..self.config.output.runs {
            let report = self.run_stripe(run, &camera_info, recovery).await?;
            tracing::info!(
                "Run {} {} after {} attempt(s), {} file(s) written",
                report.index,
                report.outcome,
                report.attempts,
                report.files.len()
            );
            reports.push(report);
        }
        Ok(reports)
    }

    /// Scans one stripe until it completes or `recovery` gives up on it,
    /// then writes the captured frames.
    pub async fn run_stripe<R: Recovery + ?Sized>(
        &mut self,
        run: u32,
        camera_info: &CameraInfo,
        recovery: &mut R,
    ) -> Result<RunReport, CollectionError> {
        let config = self.config;
        let mut capture = CaptureSession::new(&mut *self.camera);
        let mut attempts = 0;

        let outcome = loop {
            attempts += 1;

            check_cancel(&self.cancel, "arming the camera")?;
            capture.camera().burst_abort().await?;
            capture
                .configure_external_trigger(config.camera.frames_per_trigger)
                .await?;

            check_cancel(&self.cancel, "the stripe scan")?;
            let base = self.lasgo.zone().await?;
            let zone = stripe_zone(&config.stripe, run, &base);
            tracing::info!(
                "Run {} attempt {}: scanning x {} from y {} to {}",
                run,
                attempts,
                zone.xmin,
                zone.ymin,
                zone.ymax
            );

            let mut zone_run = ZoneRun::new(&mut *self.lasgo);
            let max_accel = config.stripe.max_accel;
            zone_run.configure_job(|job| job.max_accel = max_accel).await?;
            match zone_run.validate(&zone).await {
                Ok(()) => {
                    zone_run
                        .execute(std::slice::from_ref(&zone), config.network.zone_timeout())
                        .await?;
                }
                Err(e) if e.device_code().is_some() => {
                    tracing::warn!("Zone not executed: {}", e);
                }
                Err(e) => return Err(e.into()),
            }
            zone_run.poll_status().await?;
            let outcome = zone_run.outcome()?;
            if outcome.is_completed() {
                break outcome;
            }

            tracing::error!("Stage status not OK: {}", outcome);
            match recovery.decide(&outcome) {
                RecoveryAction::Retry => {
                    tracing::info!("Retrying run {}", run);
                    continue;
                }
                RecoveryAction::Continue => {
                    tracing::warn!("Continuing run {} without retry", run);
                    break outcome;
                }
                RecoveryAction::Abort => return Err(CollectionError::Aborted { run, outcome }),
            }
        };

        check_cancel(&self.cancel, "frame collection")?;
        let frames = capture.collect_ring().await?;

        let index = run + config.output.offset;
        let mut files = Vec::new();
        for i in config.output.frame_range(frames.len()) {
            let path = raw_file_path(
                &config.output.directory,
                config.stripe.dwell,
                config.stripe.power,
                index,
                i as u32,
            );
            write_frame(&path, &frames[i], camera_info)?;
            files.push(path);
        }

        Ok(RunReport {
            index,
            outcome,
            attempts,
            frames_collected: frames.len(),
            files,
        })
    }
}

fn check_cancel(cancel: &watch::Receiver<bool>, step: &'static str) -> Result<(), CollectionError> {
    if *cancel.borrow() {
        return Err(CollectionError::Cancelled { step });
    }
    Ok(())
}

/// The zone to scan in run `run`: `base` with the stripe's power, dwell
/// and extent, in watts on the CO2 laser.
pub fn stripe_zone(stripe: &StripeConfig, run: u32, base: &Zone) -> Zone {
    let mut zone = match stripe.scan_mode {
        ScanPlan::Stationary => {
            let mut zone = base.clone();
            zone.xmin = stripe.pos_min[0];
            zone.xmax = stripe.pos_max[0];
            zone.ymin = stripe.pos_min[1];
            zone.ymax = stripe.pos_max[1];
            zone.power = stripe.power;
            zone.dwell = stripe.dwell;
            zone
        }
        ScanPlan::Range => {
            let x = match stripe.x_range.len() {
                0 => stripe.pos_min[0],
                n => stripe.x_range[run as usize % n],
            };
            let [y_start, y_end] = stripe.y_range;
            base.stripe_at(
                Position::new(x, y_start),
                y_end - y_start,
                stripe.power,
                stripe.dwell,
                None,
            )
        }
    };
    zone.units = PowerUnits::Watts.code();
    zone.laser = Laser::Co2.code();
    zone
}

/// Writes one frame as a raw image file, creating its directory.
fn write_frame(path: &Path, frame: &RawFrame, camera: &CameraInfo) -> Result<(), CollectionError> {
    create_and_write(path, frame, camera).map_err(|source| CollectionError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!("Wrote {}", path.display());
    Ok(())
}

fn create_and_write(
    path: &Path,
    frame: &RawFrame,
    camera: &CameraInfo,
) -> Result<(), ProtocolError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    write_raw_image(path, &frame.raw_header(camera), &frame.data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecoveryMode;
    use bytes::Bytes;
    use sara_client::{Connection, ConnectionConfig, FixedRecovery, RpcEngine};
    use sara_protocol::camera::{CameraOp, ImageInfo, RingInfo, TriggerInfo};
    use sara_protocol::lasgo::{Job, LasgoOp};
    use sara_protocol::rawfile::read_raw_image;
    use sara_protocol::{Decoder, Envelope, Record};
    use std::collections::VecDeque;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio::task::JoinHandle;

    /// One scripted reply: expected opcode, return code, option, payload.
    struct Step {
        opcode: u32,
        rc: i32,
        option: i32,
        payload: Vec<u8>,
    }

    fn step(opcode: u32, rc: i32, payload: Vec<u8>) -> Step {
        Step {
            opcode,
            rc,
            option: 0,
            payload,
        }
    }

    /// Answers requests in order from `script`; returns the request
    /// envelopes seen.
    fn fake_server(mut stream: DuplexStream, script: Vec<Step>) -> JoinHandle<Vec<Envelope>> {
        let mut script: VecDeque<Step> = script.into();
        tokio::spawn(async move {
            let mut decoder = Decoder::new(true);
            let mut seen = Vec::new();
            let mut buf = vec![0u8; 4096];
            while !script.is_empty() {
                let frame = loop {
                    if let Some(frame) = decoder.decode_frame().unwrap() {
                        break frame;
                    }
                    let n = stream.read(&mut buf).await.unwrap();
                    if n == 0 {
                        return seen;
                    }
                    decoder.extend(&buf[..n]);
                };
                let step = script.pop_front().unwrap();
                assert_eq!(frame.envelope.opcode, step.opcode, "request {}", seen.len());
                seen.push(frame.envelope);
                let reply = frame.reply(step.rc, step.option, Bytes::from(step.payload));
                stream.write_all(&reply.encode()).await.unwrap();
            }
            seen
        })
    }

    fn camera(stream: DuplexStream) -> CameraClient<DuplexStream> {
        let conn = Connection::from_stream(stream, "camera", ConnectionConfig::default());
        CameraClient::new(RpcEngine::new(conn, "camera"))
    }

    fn lasgo(stream: DuplexStream) -> LasgoClient<DuplexStream> {
        let conn = Connection::from_stream(stream, "lasgo", ConnectionConfig::default());
        LasgoClient::new(RpcEngine::new(conn, "lasgo"))
    }

    fn trigger_info(mode: u32, frames: u32) -> Vec<u8> {
        TriggerInfo {
            mode,
            frames,
            ..TriggerInfo::default()
        }
        .encode()
        .unwrap()
        .to_vec()
    }

    fn image_info(frame: i32) -> Vec<u8> {
        ImageInfo {
            frame,
            width: 2,
            height: 2,
            ..ImageInfo::default()
        }
        .encode()
        .unwrap()
        .to_vec()
    }

    fn pixels() -> Vec<u8> {
        vec![0x01, 0x00, 0xff, 0x0f, 0x00, 0x08, 0x10, 0x00]
    }

    /// Camera side of one attempt: abort, read trigger, set trigger.
    fn arm_steps(frames: u32) -> Vec<Step> {
        vec![
            step(CameraOp::BurstAbort.code(), 0, Vec::new()),
            step(CameraOp::GetTriggerMode.code(), 0, trigger_info(1, 1)),
            step(CameraOp::SetTriggerMode.code(), 2, trigger_info(2, frames)),
        ]
    }

    /// Stage side of one attempt.
    fn stage_steps(execute_rc: i32, status_word: i32) -> Vec<Step> {
        vec![
            step(LasgoOp::GetZoneStruct.code(), 0, Zone::default().encode().unwrap().to_vec()),
            step(LasgoOp::GetJobStruct.code(), 0, Job::default().encode().unwrap().to_vec()),
            step(LasgoOp::SetJobStruct.code(), 0, Vec::new()),
            step(LasgoOp::ValidateZoneScan.code(), 0, Vec::new()),
            step(LasgoOp::ExecuteZoneScan.code(), execute_rc, Vec::new()),
            step(LasgoOp::QueryStatus.code(), status_word, Vec::new()),
        ]
    }

    fn collect_steps(count: i32) -> Vec<Step> {
        let mut steps = vec![step(CameraOp::RingGetFrameCount.code(), count, Vec::new())];
        for i in 0..count {
            steps.push(step(CameraOp::GetImageInfo.code(), 0, image_info(i)));
            steps.push(step(CameraOp::GetImageData.code(), 0, pixels()));
        }
        steps
    }

    fn test_config(dir: &Path) -> Config {
        let mut config = Config::default();
        config.camera.frames_per_trigger = 2;
        config.stripe.power = 60.0;
        config.stripe.dwell = 250.0;
        config.output.directory = dir.to_path_buf();
        config.output.offset = 3;
        config.recovery = RecoveryMode::Abort;
        config
    }

    #[test]
    fn test_stripe_zone_stationary() {
        let stripe = StripeConfig {
            power: 12.5,
            dwell: 500.0,
            pos_min: [1.0, -10.0],
            pos_max: [2.0, 10.0],
            ..StripeConfig::default()
        };
        let base = Zone {
            velocity: 3.0,
            units: PowerUnits::Raw.code(),
            laser: Laser::Ld.code(),
            ..Zone::default()
        };
        let zone = stripe_zone(&stripe, 4, &base);
        assert_eq!((zone.xmin, zone.xmax), (1.0, 2.0));
        assert_eq!((zone.ymin, zone.ymax), (-10.0, 10.0));
        assert_eq!(zone.power, 12.5);
        assert_eq!(zone.dwell, 500.0);
        assert_eq!(zone.velocity, 3.0);
        assert_eq!(zone.units, PowerUnits::Watts.code());
        assert_eq!(zone.laser, Laser::Co2.code());
    }

    #[test]
    fn test_stripe_zone_range_cycles_x() {
        let stripe = StripeConfig {
            scan_mode: ScanPlan::Range,
            x_range: vec![-1.0, 0.0, 1.0],
            y_range: [-5.0, 5.0],
            ..StripeConfig::default()
        };
        let base = Zone::default();
        let xs: Vec<f64> = (0..4).map(|run| stripe_zone(&stripe, run, &base).xmin).collect();
        assert_eq!(xs, vec![-1.0, 0.0, 1.0, -1.0]);

        let zone = stripe_zone(&stripe, 1, &base);
        assert_eq!(zone.xmax, 0.0);
        assert_eq!((zone.ymin, zone.ymax), (-5.0, 5.0));
    }

    #[tokio::test]
    async fn test_prepare_asks_for_default_camera() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let info = CameraInfo {
            model: "TestCam".to_string(),
            width: 1200,
            height: 1920,
            ..CameraInfo::default()
        };
        let ring = RingInfo {
            n_size: 10,
            ..RingInfo::default()
        };

        let (camera_end, camera_server) = duplex(64 * 1024);
        let (lasgo_end, _lasgo_server) = duplex(64 * 1024);
        let ring_size = config.camera.ring_size;
        let camera_task = fake_server(
            camera_server,
            vec![
                step(CameraOp::GetCameraInfo.code(), 0, info.encode().unwrap().to_vec()),
                step(CameraOp::RingGetInfo.code(), 0, ring.encode().unwrap().to_vec()),
                step(CameraOp::RingGetSize.code(), 10, Vec::new()),
                step(CameraOp::RingSetSize.code(), ring_size, Vec::new()),
            ],
        );

        let mut camera = camera(camera_end);
        let mut lasgo = lasgo(lasgo_end);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let got = {
            let mut collection = Collection::new(&mut camera, &mut lasgo, &config, cancel_rx);
            collection.prepare().await.unwrap()
        };
        assert_eq!(got.model, "TestCam");

        drop(camera);
        let seen = camera_task.await.unwrap();
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[0].opcode, CameraOp::GetCameraInfo.code());
        assert_eq!(seen[0].option, DEFAULT_CAMERA_ID);
        assert_eq!(seen[0].option, 1);
        assert_eq!(seen[3].option, ring_size);
    }

    #[tokio::test]
    async fn test_run_stripe_writes_frames() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());

        let (camera_end, camera_server) = duplex(64 * 1024);
        let (lasgo_end, lasgo_server) = duplex(64 * 1024);
        let mut camera_script = arm_steps(2);
        camera_script.extend(collect_steps(2));
        let camera_task = fake_server(camera_server, camera_script);
        let lasgo_task = fake_server(lasgo_server, stage_steps(0, 0x100));

        let mut camera = camera(camera_end);
        let mut lasgo = lasgo(lasgo_end);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let mut recovery = FixedRecovery(RecoveryAction::Abort);

        let report = {
            let mut collection = Collection::new(&mut camera, &mut lasgo, &config, cancel_rx);
            collection
                .run_stripe(0, &CameraInfo::default(), &mut recovery)
                .await
                .unwrap()
        };

        assert_eq!(report.index, 3);
        assert_eq!(report.outcome, ZoneOutcome::Completed);
        assert_eq!(report.attempts, 1);
        assert_eq!(report.frames_collected, 2);
        assert_eq!(report.files.len(), 2);
        assert_eq!(
            report.files[1],
            dir.path().join("00250us_060.00W").join("Run-0003_Frame-0001.raw")
        );

        let (header, data) = read_raw_image(&report.files[0]).unwrap();
        assert_eq!(header.width, 2);
        assert_eq!(data, pixels());

        drop(camera);
        drop(lasgo);
        assert_eq!(camera_task.await.unwrap().len(), 8);
        assert_eq!(lasgo_task.await.unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_failed_stripe_retried_then_continued() {
        struct Answers(Vec<RecoveryAction>, usize);
        impl Recovery for Answers {
            fn decide(&mut self, _outcome: &ZoneOutcome) -> RecoveryAction {
                self.1 += 1;
                self.0.remove(0)
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());

        let (camera_end, camera_server) = duplex(64 * 1024);
        let (lasgo_end, lasgo_server) = duplex(64 * 1024);
        let mut camera_script = arm_steps(2);
        camera_script.extend(arm_steps(2));
        camera_script.extend(collect_steps(0));
        let mut lasgo_script = stage_steps(3, 0x100);
        lasgo_script.extend(stage_steps(0, 0x5));
        let _camera_task = fake_server(camera_server, camera_script);
        let _lasgo_task = fake_server(lasgo_server, lasgo_script);

        let mut camera = camera(camera_end);
        let mut lasgo = lasgo(lasgo_end);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let mut recovery = Answers(vec![RecoveryAction::Retry, RecoveryAction::Continue], 0);

        let mut collection = Collection::new(&mut camera, &mut lasgo, &config, cancel_rx);
        let report = collection
            .run_stripe(0, &CameraInfo::default(), &mut recovery)
            .await
            .unwrap();

        assert_eq!(recovery.1, 2);
        assert_eq!(report.attempts, 2);
        assert!(!report.outcome.is_completed());
        assert!(report.files.is_empty());
    }

    #[tokio::test]
    async fn test_abort_stops_collection() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());

        let (camera_end, camera_server) = duplex(64 * 1024);
        let (lasgo_end, lasgo_server) = duplex(64 * 1024);
        let _camera_task = fake_server(camera_server, arm_steps(2));
        let _lasgo_task = fake_server(lasgo_server, stage_steps(2, 0x100));

        let mut camera = camera(camera_end);
        let mut lasgo = lasgo(lasgo_end);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let mut recovery = FixedRecovery(RecoveryAction::Abort);

        let mut collection = Collection::new(&mut camera, &mut lasgo, &config, cancel_rx);
        let err = collection
            .run_stripe(0, &CameraInfo::default(), &mut recovery)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CollectionError::Aborted {
                run: 0,
                outcome: ZoneOutcome::Failed { execute_rc: 2, .. }
            }
        ));
    }

    #[tokio::test]
    async fn test_rejected_zone_is_not_executed() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());

        let (camera_end, camera_server) = duplex(64 * 1024);
        let (lasgo_end, lasgo_server) = duplex(64 * 1024);
        let _camera_task = fake_server(camera_server, arm_steps(2));
        let lasgo_task = fake_server(
            lasgo_server,
            vec![
                step(LasgoOp::GetZoneStruct.code(), 0, Zone::default().encode().unwrap().to_vec()),
                step(LasgoOp::GetJobStruct.code(), 0, Job::default().encode().unwrap().to_vec()),
                step(LasgoOp::SetJobStruct.code(), 0, Vec::new()),
                step(LasgoOp::ValidateZoneScan.code(), -1, Vec::new()),
                step(LasgoOp::QueryStatus.code(), 0x100, Vec::new()),
            ],
        );

        let mut camera = camera(camera_end);
        let mut lasgo = lasgo(lasgo_end);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let mut recovery = FixedRecovery(RecoveryAction::Abort);

        let err = {
            let mut collection = Collection::new(&mut camera, &mut lasgo, &config, cancel_rx);
            collection
                .run_stripe(0, &CameraInfo::default(), &mut recovery)
                .await
                .unwrap_err()
        };
        assert!(matches!(
            err,
            CollectionError::Aborted {
                outcome: ZoneOutcome::Failed { execute_rc: -1, .. },
                ..
            }
        ));

        drop(lasgo);
        let seen = lasgo_task.await.unwrap();
        assert!(seen.iter().all(|e| e.opcode != LasgoOp::ExecuteZoneScan.code()));
    }

    #[tokio::test]
    async fn test_cancel_before_any_call() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());

        let (camera_end, _camera_server) = duplex(1024);
        let (lasgo_end, _lasgo_server) = duplex(1024);
        let mut camera = camera(camera_end);
        let mut lasgo = lasgo(lasgo_end);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        cancel_tx.send(true).unwrap();
        let mut recovery = FixedRecovery(RecoveryAction::Abort);

        let mut collection = Collection::new(&mut camera, &mut lasgo, &config, cancel_rx);
        let err = collection.run_all(&mut recovery).await.unwrap_err();
        assert!(matches!(err, CollectionError::Cancelled { step: "camera setup" }));
    }

    #[test]
    fn test_write_frame_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let frame = RawFrame {
            info: ImageInfo::default(),
            data: Bytes::new(),
        };
        let path = blocker.join("sub").join("frame.raw");
        let err = write_frame(&path, &frame, &CameraInfo::default()).unwrap_err();
        assert!(matches!(err, CollectionError::Write { .. }));
        assert!(err.to_string().contains("frame.raw"));
    }
}
