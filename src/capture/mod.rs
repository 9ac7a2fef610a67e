//! Capture device implementations
//!
//! This module provides the device seam used by the recorder plus the
//! concrete backends: a simulated device and an FFmpeg/V4L2 camera.

pub mod ffmpeg;
pub mod simulated;
pub mod traits;

#[cfg(test)]
pub mod mock;

pub use ffmpeg::FfmpegDevice;
pub use simulated::SimulatedDevice;
pub use traits::{CaptureDevice, ClipHandle, DeviceConfig, DeviceKind, Resolution};

use std::sync::Arc;

/// Construct the backend named in the config
pub fn device_for(kind: DeviceKind) -> Arc<dyn CaptureDevice> {
    match kind {
        DeviceKind::Simulated => Arc::new(SimulatedDevice::new()),
        DeviceKind::Ffmpeg => Arc::new(FfmpegDevice::new()),
    }
}
