//! Simulated capture device
//!
//! Stands in for camera hardware. Clip files grow to the size the applied
//! bitrate would produce over the clip's lifetime, and stills are small PNG
//! test patterns.

use crate::capture::traits::{CaptureDevice, ClipHandle, DeviceConfig};
use crate::recorder::state::{LoopKind, QualityProfile};
use crate::utils::error::{DeviceError, DeviceResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::Instant;

/// Stills are scaled down to at most this size
const MAX_STILL_WIDTH: u32 = 320;
const MAX_STILL_HEIGHT: u32 = 180;

struct OpenClip {
    file: File,
    started: Instant,
    bitrate: u32,
}

#[derive(Default)]
struct SimulatedState {
    initialized: bool,
    running: bool,
    recording: Option<QualityProfile>,
    streaming: Option<QualityProfile>,
    open: HashMap<u64, OpenClip>,
}

/// Capture device producing synthetic output
pub struct SimulatedDevice {
    state: Mutex<SimulatedState>,
    next_clip_id: AtomicU64,
    stills_taken: AtomicU64,
}

impl SimulatedDevice {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimulatedState::default()),
            next_clip_id: AtomicU64::new(1),
            stills_taken: AtomicU64::new(0),
        }
    }

    fn ensure_running(state: &SimulatedState) -> DeviceResult<()> {
        if state.running {
            Ok(())
        } else {
            Err(DeviceError::NotRunning)
        }
    }
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaptureDevice for SimulatedDevice {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn initialize(&self, config: &DeviceConfig) -> DeviceResult<()> {
        let mut state = self.state.lock();
        state.initialized = true;
        tracing::info!(
            "Simulated device initialized (hflip={}, vflip={})",
            config.hflip,
            config.vflip
        );
        Ok(())
    }

    async fn start(&self) -> DeviceResult<()> {
        let mut state = self.state.lock();
        if !state.initialized {
            return Err(DeviceError::Init("device not initialized".to_string()));
        }
        state.running = true;
        Ok(())
    }

    async fn stop(&self) -> DeviceResult<()> {
        let mut state = self.state.lock();
        state.running = false;
        if !state.open.is_empty() {
            tracing::warn!("Dropping {} open simulated clips on stop", state.open.len());
            state.open.clear();
        }
        Ok(())
    }

    async fn start_clip(&self, path: &Path) -> DeviceResult<ClipHandle> {
        let mut state = self.state.lock();
        Self::ensure_running(&state)?;

        let bitrate = state
            .recording
            .as_ref()
            .map(|p| p.bitrate)
            .unwrap_or_else(|| QualityProfile::recording_default().bitrate);
        let file = File::create(path)?;

        let id = self.next_clip_id.fetch_add(1, Ordering::Relaxed);
        state.open.insert(
            id,
            OpenClip {
                file,
                started: Instant::now(),
                bitrate,
            },
        );

        Ok(ClipHandle::new(id, path))
    }

    async fn check_clip(&self, handle: &ClipHandle) -> DeviceResult<()> {
        let state = self.state.lock();
        Self::ensure_running(&state)?;
        if state.open.contains_key(&handle.id) {
            Ok(())
        } else {
            Err(DeviceError::Clip(format!("clip {} is no longer open", handle.id)))
        }
    }

    async fn stop_clip(&self, handle: ClipHandle) -> DeviceResult<u64> {
        let clip = self
            .state
            .lock()
            .open
            .remove(&handle.id)
            .ok_or_else(|| DeviceError::Clip(format!("unknown clip handle {}", handle.id)))?;

        // Sparse file of the size the encoder would have produced
        let elapsed = clip.started.elapsed().as_secs_f64();
        let size = (elapsed * f64::from(clip.bitrate) / 8.0) as u64;
        clip.file.set_len(size)?;
        clip.file.sync_all()?;

        Ok(size)
    }

    async fn apply_controls(&self, target: LoopKind, profile: &QualityProfile) -> DeviceResult<()> {
        let mut state = self.state.lock();
        match target {
            LoopKind::Recording => state.recording = Some(profile.clone()),
            LoopKind::Streaming => state.streaming = Some(profile.clone()),
        }
        Ok(())
    }

    async fn capture_still(&self) -> DeviceResult<Vec<u8>> {
        let resolution = {
            let state = self.state.lock();
            Self::ensure_running(&state)?;
            state
                .streaming
                .as_ref()
                .map(|p| p.resolution)
                .unwrap_or_else(|| QualityProfile::streaming_default().resolution)
        };

        let width = resolution.width.min(MAX_STILL_WIDTH);
        let height = resolution.height.min(MAX_STILL_HEIGHT);
        let frame = self.stills_taken.fetch_add(1, Ordering::Relaxed);

        encode_test_pattern(width, height, frame)
    }
}

/// Diagonal gradient that shifts with the frame number
fn encode_test_pattern(width: u32, height: u32, frame: u64) -> DeviceResult<Vec<u8>> {
    let shift = (frame % 256) as u32;
    let mut data = Vec::with_capacity((width * height * 3) as usize);
    for y in 0..height {
        for x in 0..width {
            data.push(((x + shift) % 256) as u8);
            data.push(((y + shift) % 256) as u8);
            data.push(((x + y) % 256) as u8);
        }
    }

    let mut buf = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut buf, width, height);
        encoder.set_color(png::ColorType::Rgb);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder
            .write_header()
            .map_err(|e| DeviceError::Still(format!("PNG header error: {}", e)))?;
        writer
            .write_image_data(&data)
            .map_err(|e| DeviceError::Still(format!("PNG encode error: {}", e)))?;
    }
    Ok(buf)
}
