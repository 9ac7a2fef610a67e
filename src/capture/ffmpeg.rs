//! V4L2 camera capture through FFmpeg
//!
//! Each clip is one FFmpeg child reading the camera node and encoding H.264.
//! The same child also refreshes a low-resolution JPEG next to the clips so
//! stills can be served while the camera node is held by the recorder.

use crate::capture::traits::{CaptureDevice, ClipHandle, DeviceConfig};
use crate::recorder::state::{LoopKind, QualityProfile};
use crate::utils::error::{DeviceError, DeviceResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};

/// How long FFmpeg gets to finalize a clip after `q`
const FINALIZE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a one-shot still capture may take
const STILL_TIMEOUT: Duration = Duration::from_secs(5);

/// Name of the rolling preview frame written beside the clips
const LIVE_FRAME_NAME: &str = ".live.jpg";

/// Build the FFmpeg arguments for recording one clip
pub fn clip_args(
    device: &DeviceConfig,
    recording: &QualityProfile,
    streaming: &QualityProfile,
    output: &Path,
    live_frame: &Path,
) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-y".into(),
        "-f".into(),
        "v4l2".into(),
        "-framerate".into(),
        recording.fps.to_string(),
        "-video_size".into(),
        recording.resolution.to_string(),
        "-i".into(),
        device.path.clone(),
    ];

    let mut filters = transform_filters(device);
    if device.timestamp_overlay {
        filters.push("drawtext=text='%{localtime}':x=10:y=30:fontsize=24:fontcolor=yellow".to_string());
    }
    if !filters.is_empty() {
        args.push("-vf".into());
        args.push(filters.join(","));
    }

    args.extend([
        "-c:v".into(),
        "libx264".into(),
        "-preset".into(),
        "veryfast".into(),
        "-b:v".into(),
        recording.bitrate.to_string(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-g".into(),
        (recording.fps * 2).to_string(),
        output.to_string_lossy().to_string(),
    ]);

    // Second output: preview frame for stills while recording
    let mut preview = transform_filters(device);
    preview.push(format!("fps={}", streaming.fps));
    preview.push(format!(
        "scale={}:{}",
        streaming.resolution.width, streaming.resolution.height
    ));
    args.extend([
        "-vf".into(),
        preview.join(","),
        "-update".into(),
        "1".into(),
        "-q:v".into(),
        "5".into(),
        live_frame.to_string_lossy().to_string(),
    ]);

    args
}

/// Build the FFmpeg arguments for grabbing a single JPEG to stdout
pub fn still_args(device: &DeviceConfig, streaming: &QualityProfile) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-f".into(),
        "v4l2".into(),
        "-video_size".into(),
        streaming.resolution.to_string(),
        "-i".into(),
        device.path.clone(),
    ];

    let filters = transform_filters(device);
    if !filters.is_empty() {
        args.push("-vf".into());
        args.push(filters.join(","));
    }

    args.extend([
        "-frames:v".into(),
        "1".into(),
        "-f".into(),
        "image2pipe".into(),
        "-vcodec".into(),
        "mjpeg".into(),
        "-".into(),
    ]);
    args
}

fn transform_filters(device: &DeviceConfig) -> Vec<String> {
    let mut filters = Vec::new();
    if device.hflip {
        filters.push("hflip".to_string());
    }
    if device.vflip {
        filters.push("vflip".to_string());
    }
    filters
}

/// Camera device backed by FFmpeg child processes
pub struct FfmpegDevice {
    config: Mutex<DeviceConfig>,
    running: AtomicBool,
    recording: Mutex<QualityProfile>,
    streaming: Mutex<QualityProfile>,
    clips: Mutex<HashMap<u64, Child>>,
    live_frame: Mutex<Option<PathBuf>>,
    next_clip_id: AtomicU64,
}

impl FfmpegDevice {
    pub fn new() -> Self {
        Self {
            config: Mutex::new(DeviceConfig::default()),
            running: AtomicBool::new(false),
            recording: Mutex::new(QualityProfile::recording_default()),
            streaming: Mutex::new(QualityProfile::streaming_default()),
            clips: Mutex::new(HashMap::new()),
            live_frame: Mutex::new(None),
            next_clip_id: AtomicU64::new(1),
        }
    }

    fn ensure_running(&self) -> DeviceResult<()> {
        if self.running.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DeviceError::NotRunning)
        }
    }

    /// Ask FFmpeg to finish the file, killing it if it does not comply
    async fn finalize(mut child: Child) -> DeviceResult<()> {
        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(b"q").await {
                tracing::debug!("FFmpeg stdin already closed: {}", e);
            }
        }

        match tokio::time::timeout(FINALIZE_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) if status.success() => Ok(()),
            Ok(Ok(status)) => Err(DeviceError::Process(format!("ffmpeg exited with {}", status))),
            Ok(Err(e)) => Err(DeviceError::Io(e)),
            Err(_) => {
                tracing::warn!("FFmpeg did not finalize within {:?}, killing", FINALIZE_TIMEOUT);
                child.kill().await?;
                Err(DeviceError::Process("ffmpeg finalize timed out".to_string()))
            }
        }
    }
}

impl Default for FfmpegDevice {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaptureDevice for FfmpegDevice {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn initialize(&self, config: &DeviceConfig) -> DeviceResult<()> {
        let version = Command::new("ffmpeg")
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if !matches!(version, Ok(status) if status.success()) {
            return Err(DeviceError::Init("FFmpeg not found on PATH".to_string()));
        }

        if !Path::new(&config.path).exists() {
            return Err(DeviceError::Init(format!("camera node {} not found", config.path)));
        }

        *self.config.lock() = config.clone();
        tracing::info!("FFmpeg camera initialized on {}", config.path);
        Ok(())
    }

    async fn start(&self) -> DeviceResult<()> {
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> DeviceResult<()> {
        self.running.store(false, Ordering::SeqCst);
        let children: Vec<Child> = self.clips.lock().drain().map(|(_, child)| child).collect();
        for child in children {
            if let Err(e) = Self::finalize(child).await {
                tracing::warn!("Failed to finalize clip on stop: {}", e);
            }
        }
        Ok(())
    }

    async fn start_clip(&self, path: &Path) -> DeviceResult<ClipHandle> {
        self.ensure_running()?;

        let live_frame = path
            .parent()
            .map(|dir| dir.join(LIVE_FRAME_NAME))
            .unwrap_or_else(|| PathBuf::from(LIVE_FRAME_NAME));
        let args = clip_args(
            &self.config.lock(),
            &self.recording.lock(),
            &self.streaming.lock(),
            path,
            &live_frame,
        );

        let child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DeviceError::Clip(format!("failed to start ffmpeg: {}", e)))?;

        let id = self.next_clip_id.fetch_add(1, Ordering::Relaxed);
        self.clips.lock().insert(id, child);
        *self.live_frame.lock() = Some(live_frame);

        tracing::debug!("FFmpeg clip {} recording to {:?}", id, path);
        Ok(ClipHandle::new(id, path))
    }

    async fn check_clip(&self, handle: &ClipHandle) -> DeviceResult<()> {
        let mut clips = self.clips.lock();
        let child = clips
            .get_mut(&handle.id)
            .ok_or_else(|| DeviceError::Clip(format!("unknown clip handle {}", handle.id)))?;

        match child.try_wait()? {
            None => Ok(()),
            Some(status) => Err(DeviceError::Process(format!(
                "ffmpeg exited mid-clip with {}",
                status
            ))),
        }
    }

    async fn stop_clip(&self, handle: ClipHandle) -> DeviceResult<u64> {
        let child = self
            .clips
            .lock()
            .remove(&handle.id)
            .ok_or_else(|| DeviceError::Clip(format!("unknown clip handle {}", handle.id)))?;

        if self.clips.lock().is_empty() {
            *self.live_frame.lock() = None;
        }

        let finalized = Self::finalize(child).await;
        let size = tokio::fs::metadata(&handle.path)
            .await
            .map(|m| m.len())
            .map_err(|e| DeviceError::Clip(format!("clip {:?} missing after close: {}", handle.path, e)))?;

        finalized?;
        Ok(size)
    }

    async fn apply_controls(&self, target: LoopKind, profile: &QualityProfile) -> DeviceResult<()> {
        match target {
            LoopKind::Recording => *self.recording.lock() = profile.clone(),
            LoopKind::Streaming => *self.streaming.lock() = profile.clone(),
        }
        Ok(())
    }

    async fn capture_still(&self) -> DeviceResult<Vec<u8>> {
        self.ensure_running()?;

        // While a clip holds the camera, serve its preview frame
        let live_frame = self.live_frame.lock().clone();
        if let Some(path) = live_frame {
            return tokio::fs::read(&path)
                .await
                .map_err(|e| DeviceError::Still(format!("preview frame unavailable: {}", e)));
        }

        let args = still_args(&self.config.lock(), &self.streaming.lock());
        let output = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(STILL_TIMEOUT, output)
            .await
            .map_err(|_| DeviceError::Still("still capture timed out".to_string()))??;

        if !output.status.success() || output.stdout.is_empty() {
            return Err(DeviceError::Still(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::traits::Resolution;

    fn joined(args: &[String]) -> String {
        args.join(" ")
    }

    #[test]
    fn test_clip_args_use_recording_profile() {
        let device = DeviceConfig {
            timestamp_overlay: false,
            ..Default::default()
        };
        let mut recording = QualityProfile::recording_default();
        recording.resolution = Resolution::new(1280, 720);
        recording.bitrate = 4_000_000;

        let args = clip_args(
            &device,
            &recording,
            &QualityProfile::streaming_default(),
            Path::new("/clips/dashcam_a.mp4"),
            Path::new("/clips/.live.jpg"),
        );
        let line = joined(&args);

        assert!(line.contains("-f v4l2 -framerate 30 -video_size 1280x720 -i /dev/video0"));
        assert!(line.contains("-b:v 4000000"));
        assert!(line.contains("-g 60 /clips/dashcam_a.mp4"));
        assert!(line.ends_with("-update 1 -q:v 5 /clips/.live.jpg"));
        assert!(line.contains("fps=15,scale=1280:720"));
        assert!(!line.contains("drawtext"));
    }

    #[test]
    fn test_transform_and_overlay_filters() {
        let device = DeviceConfig {
            hflip: true,
            vflip: true,
            timestamp_overlay: true,
            ..Default::default()
        };
        let args = clip_args(
            &device,
            &QualityProfile::recording_default(),
            &QualityProfile::streaming_default(),
            Path::new("out.mp4"),
            Path::new(".live.jpg"),
        );

        let vf_index = args.iter().position(|a| a == "-vf").unwrap();
        assert!(args[vf_index + 1].starts_with("hflip,vflip,drawtext="));
    }

    #[test]
    fn test_still_args_pipe_single_frame() {
        let device = DeviceConfig {
            path: "/dev/video2".to_string(),
            ..Default::default()
        };
        let args = still_args(&device, &QualityProfile::streaming_default());
        let line = joined(&args);

        assert!(line.contains("-i /dev/video2"));
        assert!(line.ends_with("-frames:v 1 -f image2pipe -vcodec mjpeg -"));
        assert!(!line.contains("-vf"));
    }
}
