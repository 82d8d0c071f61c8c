//! Collection configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via SARA_CONFIG or --config)
//! 3. Environment variables

use sara_client::session::RecoveryAction;
use sara_client::{ConnectionConfig, DEFAULT_ALIAS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Collection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Instrument servers.
    pub network: NetworkConfig,
    /// Camera ring and trigger.
    pub camera: CameraConfig,
    /// Laser stripe.
    pub stripe: StripeConfig,
    /// Runs and frame files.
    pub output: OutputConfig,
    /// What to do when a stripe fails.
    pub recovery: RecoveryMode,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("SARA_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();

        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.network.apply_env_overrides();
        self.camera.apply_env_overrides();
        self.output.apply_env_overrides();
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.ring_size <= 0 {
            return Err(ConfigError::ValidationError(format!(
                "camera.ring_size must be positive, got {}",
                self.camera.ring_size
            )));
        }
        if self.camera.frames_per_trigger == 0 {
            return Err(ConfigError::ValidationError(
                "camera.frames_per_trigger must be positive".to_string(),
            ));
        }
        if self.output.runs == 0 {
            return Err(ConfigError::ValidationError(
                "output.runs must be positive".to_string(),
            ));
        }
        if self.stripe.dwell <= 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "stripe.dwell must be positive, got {}",
                self.stripe.dwell
            )));
        }
        if self.stripe.power < 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "stripe.power must not be negative, got {}",
                self.stripe.power
            )));
        }
        if self.stripe.scan_mode == ScanPlan::Range && self.stripe.x_range.is_empty() {
            return Err(ConfigError::ValidationError(
                "stripe.x_range needs at least one position in range mode".to_string(),
            ));
        }
        if let Some(max) = self.output.frame_max {
            if max < self.output.frame_min {
                return Err(ConfigError::ValidationError(format!(
                    "output.frame_max {} is below frame_min {}",
                    max, self.output.frame_min
                )));
            }
        }
        Ok(())
    }
}

/// Instrument server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Host alias (CHESS, LSA, Analysis, Local) or host name.
    pub address: String,
    /// Timeout of each call in seconds.
    pub timeout_secs: u64,
    /// Whether envelopes carry a payload CRC.
    pub crc: bool,
    /// Fail on a payload CRC mismatch instead of warning.
    pub strict_crc: bool,
    /// Timeout of a zone execution in seconds.
    pub zone_timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ALIAS.to_string(),
            timeout_secs: 30,
            crc: true,
            strict_crc: false,
            zone_timeout_secs: 100,
        }
    }
}

impl NetworkConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(address) = std::env::var("SARA_ADDRESS") {
            if !address.is_empty() {
                self.address = address;
            }
        }

        if let Ok(crc) = std::env::var("SARA_CRC") {
            self.crc = crc == "1" || crc.to_lowercase() == "true";
        }

        if let Ok(timeout) = std::env::var("SARA_TIMEOUT_SECS") {
            if let Ok(secs) = timeout.parse() {
                self.timeout_secs = secs;
            }
        }
    }

    /// Returns the call timeout as Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Returns the zone execution timeout as Duration.
    pub fn zone_timeout(&self) -> Duration {
        Duration::from_secs(self.zone_timeout_secs)
    }

    /// Connection settings for every instrument.
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig::new()
            .with_timeout(self.timeout())
            .with_crc(self.crc)
            .with_strict_crc(self.strict_crc)
    }
}

/// Camera configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Number of ring buffers.
    pub ring_size: i32,
    /// Frames captured per external trigger.
    pub frames_per_trigger: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            ring_size: 50,
            frames_per_trigger: 30,
        }
    }
}

impl CameraConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(size) = std::env::var("SARA_RING_SIZE") {
            if let Ok(n) = size.parse() {
                self.ring_size = n;
            }
        }
    }
}

/// How stripe positions are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanPlan {
    /// Every run scans from `pos_min` to `pos_max`.
    #[default]
    Stationary,
    /// Run `i` scans `y_range` at `x_range[i % len]`.
    Range,
}

/// Laser stripe configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StripeConfig {
    /// Anneal power in W. Zero scans with the laser off.
    pub power: f64,
    /// Dwell in us.
    pub dwell: f64,
    /// Scan start (x, y) in mm.
    pub pos_min: [f64; 2],
    /// Scan end (x, y) in mm.
    pub pos_max: [f64; 2],
    /// Scan y extent in range mode.
    pub y_range: [f64; 2],
    /// X positions cycled through in range mode.
    pub x_range: Vec<f64>,
    pub scan_mode: ScanPlan,
    /// Job maximum acceleration in g.
    pub max_accel: f64,
}

impl Default for StripeConfig {
    fn default() -> Self {
        Self {
            power: 0.0,
            dwell: 10000.0,
            pos_min: [0.0, -45.0],
            pos_max: [0.0, 45.0],
            y_range: [-45.0, -45.0],
            x_range: vec![0.0],
            scan_mode: ScanPlan::Stationary,
            max_accel: 5.0,
        }
    }
}

/// Output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory the frame tree is written under.
    pub directory: PathBuf,
    /// Number of stripe runs.
    pub runs: u32,
    /// Added to the run index in file names.
    pub offset: u32,
    /// First ring frame written.
    pub frame_min: u32,
    /// End of the written frames (exclusive); all frames when unset.
    pub frame_max: Option<u32>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            runs: 1,
            offset: 0,
            frame_min: 0,
            frame_max: None,
        }
    }
}

impl OutputConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("SARA_OUTPUT_DIR") {
            self.directory = PathBuf::from(dir);
        }
    }

    /// Ring indices to write out of `collected` frames.
    pub fn frame_range(&self, collected: usize) -> std::ops::Range<usize> {
        let end = match self.frame_max {
            Some(max) => (max as usize).min(collected),
            None => collected,
        };
        let start = (self.frame_min as usize).min(end);
        start..end
    }
}

/// Answer to a failed stripe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryMode {
    /// Ask the operator.
    #[default]
    Prompt,
    Retry,
    Continue,
    Abort,
}

impl RecoveryMode {
    /// The fixed answer, or `None` when the operator is asked.
    pub fn fixed(self) -> Option<RecoveryAction> {
        match self {
            RecoveryMode::Prompt => None,
            RecoveryMode::Retry => Some(RecoveryAction::Retry),
            RecoveryMode::Continue => Some(RecoveryAction::Continue),
            RecoveryMode::Abort => Some(RecoveryAction::Abort),
        }
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.network.address, "Analysis");
        assert_eq!(config.network.zone_timeout(), Duration::from_secs(100));
        assert_eq!(config.camera.ring_size, 50);
        assert_eq!(config.camera.frames_per_trigger, 30);
        assert_eq!(config.stripe.max_accel, 5.0);
        assert_eq!(config.recovery, RecoveryMode::Prompt);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_connection_config() {
        let network = NetworkConfig {
            timeout_secs: 5,
            crc: false,
            strict_crc: true,
            ..NetworkConfig::default()
        };
        let conn = network.connection_config();
        assert_eq!(conn.timeout, Duration::from_secs(5));
        assert!(!conn.crc);
        assert!(conn.strict_crc);
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.network.address, config.network.address);
        assert_eq!(parsed.stripe.pos_min, config.stripe.pos_min);
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let yaml = r#"
network:
  address: CHESS
stripe:
  power: 42.5
  scan_mode: range
  x_range: [1.0, 2.0]
recovery: continue
"#;
        file.write_all(yaml.as_bytes()).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.network.address, "CHESS");
        assert_eq!(config.network.timeout_secs, 30);
        assert_eq!(config.stripe.power, 42.5);
        assert_eq!(config.stripe.scan_mode, ScanPlan::Range);
        assert_eq!(config.stripe.x_range, vec![1.0, 2.0]);
        assert_eq!(config.recovery.fixed(), Some(RecoveryAction::Continue));
    }

    #[test]
    fn test_from_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.yaml");
        assert!(matches!(Config::from_file(&missing), Err(ConfigError::IoError(..))));

        let bad = dir.path().join("bad.yaml");
        std::fs::write(&bad, "camera: [not, a, map]").unwrap();
        let err = Config::from_file(&bad).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(..)));
        assert!(err.to_string().contains("bad.yaml"));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sara.yaml");
        let mut config = Config::default();
        config.output.runs = 7;
        config.output.frame_max = Some(12);
        config.save(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.output.runs, 7);
        assert_eq!(loaded.output.frame_max, Some(12));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.camera.ring_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));

        let mut config = Config::default();
        config.output.runs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.stripe.dwell = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.stripe.scan_mode = ScanPlan::Range;
        config.stripe.x_range.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.output.frame_min = 5;
        config.output.frame_max = Some(2);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_frame_range() {
        let mut output = OutputConfig::default();
        assert_eq!(output.frame_range(30), 0..30);

        output.frame_min = 5;
        output.frame_max = Some(10);
        assert_eq!(output.frame_range(30), 5..10);
        assert_eq!(output.frame_range(8), 5..8);
        assert_eq!(output.frame_range(3), 3..3);
    }
}
