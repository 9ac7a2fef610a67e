//! Capture trait definitions
//!
//! Hardware-agnostic seam between the recorder and the capture/encode pipeline.

use crate::recorder::state::{LoopKind, QualityProfile};
use crate::utils::error::DeviceResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Which capture backend to construct
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// Synthetic output, no hardware required
    Simulated,
    /// V4L2 camera driven through ffmpeg
    Ffmpeg,
}

/// Device-level configuration applied once at initialization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceConfig {
    /// Backend to use
    pub kind: DeviceKind,

    /// Device node (e.g. /dev/video0)
    pub path: String,

    /// Mirror horizontally
    pub hflip: bool,

    /// Mirror vertically
    pub vflip: bool,

    /// Burn a wall-clock timestamp into recorded frames
    pub timestamp_overlay: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            kind: DeviceKind::Simulated,
            path: "/dev/video0".to_string(),
            hflip: false,
            vflip: false,
            timestamp_overlay: true,
        }
    }
}

/// Handle to a clip opened on a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipHandle {
    /// Device-assigned identifier
    pub id: u64,

    /// Output file
    pub path: PathBuf,

    /// When the clip was opened
    pub opened_at: DateTime<Utc>,
}

impl ClipHandle {
    pub fn new(id: u64, path: &Path) -> Self {
        Self {
            id,
            path: path.to_path_buf(),
            opened_at: Utc::now(),
        }
    }
}

/// Capture + encode primitive consumed by the recorder.
///
/// Implementations are shared between the recording and streaming loops, so
/// every method takes `&self` and must be safe to call concurrently.
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Prepare the hardware. Failure here is fatal for the controller.
    async fn initialize(&self, config: &DeviceConfig) -> DeviceResult<()>;

    /// Start the sensor
    async fn start(&self) -> DeviceResult<()>;

    /// Stop the sensor and release any open clips
    async fn stop(&self) -> DeviceResult<()>;

    /// Begin encoding into a new clip file
    async fn start_clip(&self, path: &Path) -> DeviceResult<ClipHandle>;

    /// Check that an open clip is still being written.
    ///
    /// Polled while a clip is open; an error means capture died mid-clip
    /// and the clip should be closed early.
    async fn check_clip(&self, handle: &ClipHandle) -> DeviceResult<()>;

    /// Finish a clip and return its final size in bytes
    async fn stop_clip(&self, handle: ClipHandle) -> DeviceResult<u64>;

    /// Apply a quality profile to one of the device's output streams.
    ///
    /// `LoopKind::Recording` configures the main stream used by clips,
    /// `LoopKind::Streaming` the low-resolution stream used by stills.
    async fn apply_controls(&self, target: LoopKind, profile: &QualityProfile) -> DeviceResult<()>;

    /// Grab a single encoded still frame
    async fn capture_still(&self) -> DeviceResult<Vec<u8>>;
}
