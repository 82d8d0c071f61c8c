//! sara - Thermoreflectance stripe collection
//!
//! Scans laser stripes with the LasGo stage while the ZOOCAM camera
//! captures an externally triggered burst, and stores every frame as a raw
//! image file.

mod collection;
mod config;
mod prompt;

use clap::Parser;
use collection::{Collection, CollectionError};
use config::Config;
use prompt::PromptRecovery;
use sara_client::{CameraClient, FixedRecovery, LasgoClient, Recovery};
use std::path::PathBuf;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sara")]
#[command(about = "Laser stripe collection with external-trigger camera capture")]
#[command(version)]
struct Args {
    /// YAML configuration file
    #[arg(short, long, env = "SARA_CONFIG")]
    config: Option<PathBuf>,

    /// Host alias or host name, overriding the configuration
    #[arg(short, long)]
    address: Option<String>,

    /// Number of stripe runs, overriding the configuration
    #[arg(short = 'n', long)]
    runs: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    // Load configuration (file, then env overrides, then flags)
    let mut config = match &args.config {
        Some(path) => {
            let mut config = Config::from_file(path).map_err(|e| {
                tracing::error!("Failed to load config: {}", e);
                e
            })?;
            config.apply_env_overrides();
            tracing::info!("Loaded config from {}", path.display());
            config
        }
        None => {
            tracing::info!("Using default configuration");
            Config::load()?
        }
    };
    if let Some(address) = args.address {
        config.network.address = address;
    }
    if let Some(runs) = args.runs {
        config.output.runs = runs;
    }
    if let Err(e) = config.validate() {
        tracing::error!("{}", e);
        return Err(e.into());
    }

    tracing::info!("Starting collection");
    tracing::info!("  Address: {}", config.network.address);
    tracing::info!("  Runs: {} (offset {})", config.output.runs, config.output.offset);
    tracing::info!(
        "  Stripe: {} W, {} us, {:?}",
        config.stripe.power,
        config.stripe.dwell,
        config.stripe.scan_mode
    );
    tracing::info!("  Output directory: {}", config.output.directory.display());

    let conn_config = config.network.connection_config();
    let mut camera = CameraClient::connect(&config.network.address, conn_config.clone())
        .await
        .map_err(|e| {
            tracing::error!("Failed to open camera client: {}", e);
            e
        })?;
    let mut lasgo = match LasgoClient::connect(&config.network.address, conn_config).await {
        Ok(lasgo) => lasgo,
        Err(e) => {
            tracing::error!("Failed to open lasgo client: {}", e);
            let _ = camera.close().await;
            return Err(e.into());
        }
    };

    let mut recovery: Box<dyn Recovery> = match config.recovery.fixed() {
        Some(action) => Box::new(FixedRecovery(action)),
        None => Box::new(PromptRecovery::new()?),
    };

    // Ctrl-C stops the collection at the next step boundary
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received interrupt, stopping after the current step...");
        let _ = cancel_tx.send(true);
    });

    let result = {
        let mut collection = Collection::new(&mut camera, &mut lasgo, &config, cancel_rx);
        collection.run_all(recovery.as_mut()).await
    };

    // Close both clients whatever the outcome
    if let Err(e) = camera.close().await {
        tracing::warn!("Failed to close camera client: {}", e);
    }
    if let Err(e) = lasgo.close().await {
        tracing::warn!("Failed to close lasgo client: {}", e);
    }

    match result {
        Ok(reports) => {
            let files: usize = reports.iter().map(|r| r.files.len()).sum();
            tracing::info!("Collection finished: {} run(s), {} file(s)", reports.len(), files);
            Ok(())
        }
        Err(CollectionError::Cancelled { step }) => {
            tracing::warn!("Collection cancelled before {}", step);
            Ok(())
        }
        Err(e) => {
            tracing::error!("Collection failed: {}", e);
            Err(e.into())
        }
    }
}
