//! sara-cli - Command-line interface for the SARA instrument servers
//!
//! One-shot commands against the camera, LasGo stage, spectrometer and
//! focus servers, plus an interactive console for the stage text protocol.

mod commands;
mod console;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use sara_client::{ConnectionConfig, DEFAULT_ALIAS};
use sara_protocol::camera::TriggerMode;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sara-cli")]
#[command(about = "Command-line interface for the SARA instrument servers")]
#[command(version)]
struct Cli {
    /// Host alias (CHESS, LSA, Analysis, Local) or host name
    #[arg(short, long, global = true, env = "SARA_ADDRESS", default_value = DEFAULT_ALIAS)]
    address: String,

    /// Servers run without payload CRCs
    #[arg(long, global = true)]
    no_crc: bool,

    /// Operation timeout in seconds
    #[arg(short, long, global = true, default_value = "30")]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig::new()
            .with_timeout(Duration::from_secs(self.timeout))
            .with_crc(!self.no_crc)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// ZOOCAM camera server
    Camera {
        #[command(subcommand)]
        command: CameraCommand,
    },

    /// LasGo stage, struct protocol
    Stage {
        #[command(subcommand)]
        command: StageCommand,
    },

    /// LasGo stage, text protocol
    StageText {
        #[command(subcommand)]
        command: StageTextCommand,
    },

    /// Spectrometer server
    Spec {
        #[command(subcommand)]
        command: SpecCommand,
    },

    /// Focus module server
    Focus {
        #[command(subcommand)]
        command: FocusCommand,
    },
}

#[derive(Subcommand)]
enum CameraCommand {
    /// Server version
    Version,

    /// Camera model, sensor size and serial
    Info,

    /// Show exposure settings, or set the exposure time
    Exposure {
        /// New exposure time in ms
        #[arg(long)]
        set_ms: Option<f64>,
    },

    /// Show trigger settings, or change the mode
    TriggerMode {
        /// New trigger mode
        #[arg(value_enum)]
        mode: Option<TriggerArg>,

        /// Frames per trigger
        #[arg(short, long)]
        frames: Option<u32>,
    },

    /// Show ring buffer state, or resize the ring
    Ring {
        /// New number of buffers
        #[arg(long)]
        size: Option<i32>,
    },

    /// Capture one software-triggered frame
    Capture {
        /// Raw image file to write
        #[arg(short, long)]
        out: PathBuf,

        /// Skip the trigger and frame count checks
        #[arg(long)]
        no_check: bool,
    },
}

#[derive(Subcommand)]
enum StageCommand {
    /// Server version
    Version,

    /// Queue and system status words
    Status,

    /// Current position
    Position {
        /// Report user rather than world coordinates
        #[arg(long)]
        user: bool,
    },

    /// Move to a position and report the distance left
    MoveTo {
        /// Target x in mm
        #[arg(allow_negative_numbers = true)]
        x: f64,

        /// Target y in mm
        #[arg(allow_negative_numbers = true)]
        y: f64,
    },

    /// Zone structure of the active zone
    Zone,

    /// Job structure
    Job {
        /// Server defaults instead of the current job
        #[arg(long)]
        defaults: bool,
    },
}

#[derive(Subcommand)]
enum StageTextCommand {
    /// Server version
    Version,

    /// Current position
    Position,

    /// Status line
    Status,

    /// Send one raw command and print the reply
    Send {
        /// Command words, e.g. `MV 1.0 2.0`
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Interactive text console
    Console,
}

#[derive(Subcommand)]
enum SpecCommand {
    /// Spectrometer model and wavelength range
    Info,

    /// Acquire one spectrum
    Acquire {
        /// Also print the wavelength of every pixel
        #[arg(long)]
        wavelengths: bool,
    },
}

#[derive(Subcommand)]
enum FocusCommand {
    /// Server version
    Version,

    /// Current x, y, z position
    Position,

    /// Grid type and calibration points
    Grid,

    /// Motor status, or engage/release the motor
    Motor {
        /// Engage (true) or release (false) the motor
        #[arg(long)]
        engage: Option<bool>,
    },
}

/// Trigger modes accepted on the command line.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum TriggerArg {
    Freerun,
    Software,
    External,
    SingleShot,
    Burst,
}

impl From<TriggerArg> for TriggerMode {
    fn from(arg: TriggerArg) -> Self {
        match arg {
            TriggerArg::Freerun => TriggerMode::Freerun,
            TriggerArg::Software => TriggerMode::Software,
            TriggerArg::External => TriggerMode::External,
            TriggerArg::SingleShot => TriggerMode::SingleShot,
            TriggerArg::Burst => TriggerMode::Burst,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.connection_config();

    let result = match cli.command {
        Commands::StageText {
            command: StageTextCommand::Console,
        } => console::run(&cli.address, config).await.map(|_| String::new()),
        command => commands::execute(&cli.address, config, command).await,
    };

    match result {
        Ok(output) => {
            if !output.is_empty() {
                println!("{}", output);
            }
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }

    Ok(())
}
