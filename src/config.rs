//! Runtime configuration
//!
//! Loaded from a JSON file (path from `DASHCAM_CONFIG`, optional) with a
//! handful of environment overrides, then validated once before the
//! controller is built.

use crate::capture::traits::{DeviceConfig, DeviceKind};
use crate::recorder::state::QualityProfile;
use crate::utils::error::{DashcamError, DashcamResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound on how long a loop may go without checking its token
const MAX_POLL_INTERVAL_MS: u64 = 1000;

/// Full configuration for a dashcam instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DashcamConfig {
    /// Directory clips are written to
    pub clip_dir: PathBuf,

    /// Length of each clip
    pub clip_duration_secs: u64,

    /// How often a running loop checks for cancellation. Stop waits at
    /// most this long for a loop to close its clip.
    pub poll_interval_ms: u64,

    /// Delay after starting the sensor so exposure can settle
    pub warmup_ms: u64,

    /// Maximum bytes kept across stored clips
    pub storage_budget_bytes: u64,

    /// Consecutive device failures before a loop halts
    pub max_consecutive_failures: u32,

    /// Profile for recorded clips
    pub recording: QualityProfile,

    /// Profile for the live stream
    pub streaming: QualityProfile,

    /// Capture hardware settings
    pub device: DeviceConfig,

    /// Size-rotated log file written alongside stderr
    pub log_file: Option<PathBuf>,
}

impl Default for DashcamConfig {
    fn default() -> Self {
        Self {
            clip_dir: PathBuf::from("recordings"),
            clip_duration_secs: 3 * 60,
            poll_interval_ms: 500,
            warmup_ms: 2000,
            storage_budget_bytes: 1024 * 1024 * 1024,
            max_consecutive_failures: 3,
            recording: QualityProfile::recording_default(),
            streaming: QualityProfile::streaming_default(),
            device: DeviceConfig::default(),
            log_file: None,
        }
    }
}

impl DashcamConfig {
    /// Read a config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> DashcamResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DashcamConfig = serde_json::from_str(&content)?;
        tracing::debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Build config from the environment.
    ///
    /// `DASHCAM_CONFIG` names an optional JSON file; `DASHCAM_CLIP_DIR`,
    /// `DASHCAM_STORAGE_BUDGET`, `DASHCAM_DEVICE` and `DASHCAM_LOG_FILE`
    /// override single fields.
    pub fn from_env() -> DashcamResult<Self> {
        let mut config = match std::env::var("DASHCAM_CONFIG") {
            Ok(path) => Self::load(Path::new(&path))?,
            Err(_) => Self::default(),
        };

        if let Ok(dir) = std::env::var("DASHCAM_CLIP_DIR") {
            config.clip_dir = PathBuf::from(dir);
        }

        if let Ok(budget) = std::env::var("DASHCAM_STORAGE_BUDGET") {
            config.storage_budget_bytes = budget.parse().map_err(|_| {
                DashcamError::Config(format!("DASHCAM_STORAGE_BUDGET is not a number: {}", budget))
            })?;
        }

        if let Ok(device) = std::env::var("DASHCAM_DEVICE") {
            config.device.kind = match device.to_lowercase().as_str() {
                "simulated" => DeviceKind::Simulated,
                "ffmpeg" => DeviceKind::Ffmpeg,
                other => {
                    return Err(DashcamError::Config(format!("unknown device kind: {}", other)))
                }
            };
        }

        if let Ok(path) = std::env::var("DASHCAM_LOG_FILE") {
            config.log_file = Some(PathBuf::from(path));
        }

        Ok(config)
    }

    /// Reject values the recorder cannot run with
    pub fn validate(&self) -> DashcamResult<()> {
        if self.clip_duration_secs == 0 {
            return Err(DashcamError::Config("clip duration must be positive".to_string()));
        }
        if self.poll_interval_ms == 0 || self.poll_interval_ms > MAX_POLL_INTERVAL_MS {
            return Err(DashcamError::Config(format!(
                "poll interval must be between 1 and {} ms",
                MAX_POLL_INTERVAL_MS
            )));
        }
        if self.storage_budget_bytes == 0 {
            return Err(DashcamError::Config("storage budget must be positive".to_string()));
        }
        if self.max_consecutive_failures == 0 {
            return Err(DashcamError::Config(
                "failure threshold must be at least 1".to_string(),
            ));
        }
        self.recording.validate()?;
        self.streaming.validate()?;
        Ok(())
    }

    pub fn clip_duration(&self) -> Duration {
        Duration::from_secs(self.clip_duration_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }
}
