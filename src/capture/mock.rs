//! Scriptable capture device for tests

use crate::capture::traits::{CaptureDevice, ClipHandle, DeviceConfig};
use crate::recorder::state::{LoopKind, QualityProfile};
use crate::utils::error::{DeviceError, DeviceResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// A clip the mock opened, with the profile applied at the time
#[derive(Debug, Clone)]
pub struct OpenedClip {
    pub path: PathBuf,
    pub profile: QualityProfile,
}

/// Device that writes fixed-size clips and can be told to fail
pub struct MockDevice {
    /// Bytes written into each clip on close
    pub clip_bytes: u64,

    pub fail_init: AtomicBool,
    /// Every start_clip fails while set
    pub fail_clips: AtomicBool,
    /// The next N start_clip calls fail
    pub fail_next_clips: AtomicU32,
    /// Every stop_clip fails while set
    pub fail_close: AtomicBool,
    /// Every capture_still fails while set
    pub fail_stills: AtomicBool,
    /// Open clips report a dead pipeline while set
    pub fail_mid_clip: AtomicBool,
    /// How long stop_clip takes to finalize, in milliseconds
    pub close_delay_ms: AtomicU64,

    recording: Mutex<QualityProfile>,
    streaming: Mutex<QualityProfile>,
    open: Mutex<HashMap<u64, PathBuf>>,
    opened: Mutex<Vec<OpenedClip>>,
    next_id: AtomicU64,
    open_now: AtomicUsize,
    max_open: AtomicUsize,
    stills: AtomicU64,
    stopped: AtomicBool,
    closing: AtomicUsize,
    stopped_during_close: AtomicBool,
}

impl MockDevice {
    pub fn new(clip_bytes: u64) -> Self {
        Self {
            clip_bytes,
            fail_init: AtomicBool::new(false),
            fail_clips: AtomicBool::new(false),
            fail_next_clips: AtomicU32::new(0),
            fail_close: AtomicBool::new(false),
            fail_stills: AtomicBool::new(false),
            fail_mid_clip: AtomicBool::new(false),
            close_delay_ms: AtomicU64::new(0),
            recording: Mutex::new(QualityProfile::recording_default()),
            streaming: Mutex::new(QualityProfile::streaming_default()),
            open: Mutex::new(HashMap::new()),
            opened: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            open_now: AtomicUsize::new(0),
            max_open: AtomicUsize::new(0),
            stills: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
            closing: AtomicUsize::new(0),
            stopped_during_close: AtomicBool::new(false),
        }
    }

    /// Every clip opened so far, in order
    pub fn opened(&self) -> Vec<OpenedClip> {
        self.opened.lock().clone()
    }

    /// Highest number of clips ever open at once
    pub fn max_concurrent_clips(&self) -> usize {
        self.max_open.load(Ordering::SeqCst)
    }

    pub fn open_clips(&self) -> usize {
        self.open_now.load(Ordering::SeqCst)
    }

    /// Profile last applied to the streaming pipeline
    pub fn streaming_profile(&self) -> QualityProfile {
        self.streaming.lock().clone()
    }

    pub fn stills_taken(&self) -> u64 {
        self.stills.load(Ordering::SeqCst)
    }

    pub fn was_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// True if `stop` ran while a clip was still finalizing
    pub fn stopped_during_close(&self) -> bool {
        self.stopped_during_close.load(Ordering::SeqCst)
    }

    fn finish_clip(&self, handle: &ClipHandle) -> DeviceResult<u64> {
        let path = self
            .open
            .lock()
            .remove(&handle.id)
            .ok_or_else(|| DeviceError::Clip(format!("unknown clip handle {}", handle.id)))?;
        self.open_now.fetch_sub(1, Ordering::SeqCst);

        if self.fail_close.load(Ordering::SeqCst) {
            return Err(DeviceError::Clip("failed to flush clip".to_string()));
        }

        let file = std::fs::OpenOptions::new().write(true).open(&path)?;
        file.set_len(self.clip_bytes)?;
        Ok(self.clip_bytes)
    }
}

#[async_trait]
impl CaptureDevice for MockDevice {
    fn name(&self) -> &str {
        "mock"
    }

    async fn initialize(&self, _config: &DeviceConfig) -> DeviceResult<()> {
        if self.fail_init.load(Ordering::SeqCst) {
            return Err(DeviceError::Init("no camera attached".to_string()));
        }
        Ok(())
    }

    async fn start(&self) -> DeviceResult<()> {
        self.stopped.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> DeviceResult<()> {
        if self.closing.load(Ordering::SeqCst) > 0 {
            self.stopped_during_close.store(true, Ordering::SeqCst);
        }
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn start_clip(&self, path: &Path) -> DeviceResult<ClipHandle> {
        if self.fail_clips.load(Ordering::SeqCst) {
            return Err(DeviceError::Clip("encoder unavailable".to_string()));
        }
        let scheduled_failure = self
            .fail_next_clips
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if scheduled_failure {
            return Err(DeviceError::Clip("transient encoder failure".to_string()));
        }

        std::fs::File::create(path)?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.open.lock().insert(id, path.to_path_buf());
        self.opened.lock().push(OpenedClip {
            path: path.to_path_buf(),
            profile: self.recording.lock().clone(),
        });

        let now = self.open_now.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_open.fetch_max(now, Ordering::SeqCst);

        Ok(ClipHandle::new(id, path))
    }

    async fn check_clip(&self, handle: &ClipHandle) -> DeviceResult<()> {
        if !self.open.lock().contains_key(&handle.id) {
            return Err(DeviceError::Clip(format!("unknown clip handle {}", handle.id)));
        }
        if self.fail_mid_clip.load(Ordering::SeqCst) {
            return Err(DeviceError::Process("camera disconnected".to_string()));
        }
        Ok(())
    }

    async fn stop_clip(&self, handle: ClipHandle) -> DeviceResult<u64> {
        self.closing.fetch_add(1, Ordering::SeqCst);
        let delay = Duration::from_millis(self.close_delay_ms.load(Ordering::SeqCst));
        if !delay.is_zero() {
            // The clip stays open while it finalizes
            tokio::time::sleep(delay).await;
        }
        let result = self.finish_clip(&handle);
        self.closing.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn apply_controls(&self, target: LoopKind, profile: &QualityProfile) -> DeviceResult<()> {
        match target {
            LoopKind::Recording => *self.recording.lock() = profile.clone(),
            LoopKind::Streaming => *self.streaming.lock() = profile.clone(),
        }
        Ok(())
    }

    async fn capture_still(&self) -> DeviceResult<Vec<u8>> {
        if self.fail_stills.load(Ordering::SeqCst) {
            return Err(DeviceError::Still("sensor timeout".to_string()));
        }
        let n = self.stills.fetch_add(1, Ordering::SeqCst);
        Ok(n.to_le_bytes().to_vec())
    }
}
