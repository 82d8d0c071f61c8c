//! Command execution.

use crate::{CameraCommand, Commands, FocusCommand, SpecCommand, StageCommand, StageTextCommand};
use colored::Colorize;
use sara_client::session::{CaptureSession, SpectrumAcquisition};
use sara_client::{
    CameraClient, ConnectionConfig, FocusClient, LasgoClient, LasgoTextClient, SpectrometerClient,
    DEFAULT_CAMERA_ID,
};
use sara_protocol::camera::{ExposureFlags, TriggerMode};
use sara_protocol::lasgo::{CoordSystem, JobReset, Position};
use sara_protocol::rawfile::write_raw_image;
use serde::Serialize;
use serde_json::json;

type CmdResult = Result<String, Box<dyn std::error::Error>>;

/// Executes a command and returns the formatted output.
pub async fn execute(address: &str, config: ConnectionConfig, cmd: Commands) -> CmdResult {
    match cmd {
        Commands::Camera { command } => camera(address, config, command).await,
        Commands::Stage { command } => stage(address, config, command).await,
        Commands::StageText { command } => stage_text(address, config, command).await,
        Commands::Spec { command } => spec(address, config, command).await,
        Commands::Focus { command } => focus(address, config, command).await,
    }
}

async fn camera(address: &str, config: ConnectionConfig, cmd: CameraCommand) -> CmdResult {
    let mut camera = CameraClient::connect(address, config).await?;

    let output = match cmd {
        CameraCommand::Version => {
            let version = camera.version().await?;
            format!("{} {}", "ZOOCAM server version".bold(), version)
        }

        CameraCommand::Info => format_json(&camera.camera_info(DEFAULT_CAMERA_ID).await?)?,

        CameraCommand::Exposure { set_ms } => {
            let mut parms = camera.exposure().await?;
            match set_ms {
                Some(ms) => {
                    parms.exposure = ms;
                    let flags = ExposureFlags::new().with(ExposureFlags::EXPOSURE);
                    let applied = camera.set_exposure(flags, &parms).await?;
                    format!(
                        "{} exposure {:.3} ms (requested {:.3} ms)",
                        "Set".green(),
                        applied.exposure,
                        ms
                    )
                }
                None => format_json(&parms)?,
            }
        }

        CameraCommand::TriggerMode { mode, frames } => {
            let mut info = camera.trigger_info().await?;
            match mode {
                Some(mode) => {
                    let mode = TriggerMode::from(mode);
                    info.mode = mode.code();
                    if let Some(frames) = frames {
                        info.frames = frames;
                    }
                    let applied = camera.set_trigger_mode(mode, Some(&info)).await?;
                    let status = if applied.mode == mode.code() as i32 {
                        "Set".green()
                    } else {
                        "Camera kept a different mode".yellow()
                    };
                    format!("{} mode {}\n{}", status, applied.mode, format_json(&applied.info)?)
                }
                None => format_json(&info)?,
            }
        }

        CameraCommand::Ring { size } => {
            if let Some(size) = size {
                let applied = camera.set_ring_size(size).await?;
                if applied < 0 {
                    let message = format!("camera refused ring size {} (rc {})", size, applied);
                    return Err(message.into());
                }
            }
            format_json(&camera.ring_info().await?)?
        }

        CameraCommand::Capture { out, no_check } => {
            let info = camera.camera_info(DEFAULT_CAMERA_ID).await?;
            let frame = CaptureSession::new(&mut camera).capture(!no_check).await?;
            let header = frame.raw_header(&info);
            write_raw_image(&out, &header, &frame.data)?;
            format!(
                "{} {}x{} frame {} to {}",
                "Wrote".green(),
                frame.width(),
                frame.height(),
                frame.info.frame,
                out.display().to_string().cyan()
            )
        }
    };

    camera.close().await?;
    Ok(output)
}

async fn stage(address: &str, config: ConnectionConfig, cmd: StageCommand) -> CmdResult {
    let mut lasgo = LasgoClient::connect(address, config).await?;

    let output = match cmd {
        StageCommand::Version => {
            let version = lasgo.version().await?;
            format!("{} {}", "LasGo server version".bold(), version)
        }

        StageCommand::Status => {
            let status = lasgo.status().await?;
            let summary = if status.is_complete(0) {
                "idle".green()
            } else {
                "busy".yellow()
            };
            format!(
                "queue {:#06x} system {:#06x} ({})",
                status.queue, status.system, summary
            )
        }

        StageCommand::Position { user } => {
            let system = if user { CoordSystem::User } else { CoordSystem::World };
            let pos = lasgo.position(system).await?;
            format!("x {:.4} mm, y {:.4} mm", pos.x, pos.y)
        }

        StageCommand::MoveTo { x, y } => {
            let distance = lasgo.move_to_checked(&Position::new(x, y)).await?;
            format!(
                "{} ({:.4}, {:.4}), {:.4} mm from target",
                "Reached".green(),
                x,
                y,
                distance
            )
        }

        StageCommand::Zone => format_json(&lasgo.zone().await?)?,

        StageCommand::Job { defaults } => {
            let reset = if defaults { JobReset::Defaults } else { JobReset::Current };
            format_json(&lasgo.job(reset).await?)?
        }
    };

    lasgo.close().await?;
    Ok(output)
}

async fn stage_text(address: &str, config: ConnectionConfig, cmd: StageTextCommand) -> CmdResult {
    let mut lasgo = LasgoTextClient::connect(address, config).await?;

    let output = match cmd {
        StageTextCommand::Version => {
            let version = lasgo.version().await?;
            format!("{} {}", "LasGo text server version".bold(), version)
        }

        StageTextCommand::Position => {
            let (x, y) = lasgo.position().await?;
            format!("x {:.4} mm, y {:.4} mm", x, y)
        }

        StageTextCommand::Status => format_json(&lasgo.status().await?)?,

        StageTextCommand::Send { command } => lasgo.send(&command.join(" ")).await?,

        // Runs in main.rs (interactive)
        StageTextCommand::Console => unreachable!(),
    };

    lasgo.close().await?;
    Ok(output)
}

async fn spec(address: &str, config: ConnectionConfig, cmd: SpecCommand) -> CmdResult {
    let mut spec = SpectrometerClient::connect(address, config).await?;

    let output = match cmd {
        SpecCommand::Info => format_json(&spec.info().await?)?,

        SpecCommand::Acquire { wavelengths } => {
            let mut acquisition = SpectrumAcquisition::new(&mut spec);
            acquisition.acquire().await?;
            let info = acquisition.info().await?;
            let data = acquisition.data().await?;
            let value = if wavelengths {
                let (_, lambda) = acquisition.wavelengths().await?;
                json!({ "info": info, "wavelengths": lambda, "data": data })
            } else {
                json!({ "info": info, "data": data })
            };
            format_json(&value)?
        }
    };

    spec.close().await?;
    Ok(output)
}

async fn focus(address: &str, config: ConnectionConfig, cmd: FocusCommand) -> CmdResult {
    let mut focus = FocusClient::connect(address, config).await?;

    let output = match cmd {
        FocusCommand::Version => {
            let version = focus.version().await?;
            format!("{} {}", "Focus server version".bold(), version)
        }

        FocusCommand::Position => {
            let posn = focus.position().await?;
            format!("x {:.4}, y {:.4}, z {:.4}", posn.x, posn.y, posn.z)
        }

        FocusCommand::Grid => {
            let grid = focus.grid_type().await?;
            let points = focus.sample_grid().await?;
            if points.is_empty() {
                format!("{:?} grid, {}", grid, "no calibration points".yellow())
            } else {
                format_json(&json!({ "grid": grid, "points": points }))?
            }
        }

        FocusCommand::Motor { engage } => {
            if let Some(engage) = engage {
                focus.set_motor_engaged(engage).await?;
            }
            let status = focus.motor_status().await?;
            let z = focus.motor_position().await?;
            format!(
                "motor {} {}, z {:.4} (status {:#06x})",
                if status.is_engaged() { "engaged".green() } else { "released".yellow() },
                if status.is_moving() { "moving" } else { "still" },
                z,
                status.bits()
            )
        }
    };

    focus.close().await?;
    Ok(output)
}

/// Formats a record for display.
fn format_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sara_protocol::lasgo::QueueStatus;

    #[test]
    fn test_format_json_record() {
        let pos = Position::new(1.5, -2.0);
        let text = format_json(&pos).unwrap();
        assert!(text.contains("\"x\": 1.5"));
        assert!(text.contains("\"y\": -2.0"));
    }

    #[test]
    fn test_format_json_status() {
        let status = QueueStatus::from_word(0x100);
        let json = format_json(&status).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["queue"], 0x100);
    }
}
