//! Recording state management
//!
//! Defines the recording/streaming state machine, quality profiles and the
//! status snapshot handed to the control surface.

use crate::capture::traits::Resolution;
use crate::utils::error::{DashcamError, DashcamResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The two independent capture loops
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopKind {
    /// Clip recording to disk
    Recording,
    /// Live still-frame streaming
    Streaming,
}

impl std::fmt::Display for LoopKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopKind::Recording => f.write_str("recording"),
            LoopKind::Streaming => f.write_str("streaming"),
        }
    }
}

/// Current state of the capture system.
///
/// The four combinations of the two flags are all valid states; every
/// start/stop is defined from each of them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingState {
    /// Recording loop requested and running
    pub recording: bool,

    /// Streaming loop requested and running
    pub streaming: bool,
}

impl RecordingState {
    pub fn is_active(&self, kind: LoopKind) -> bool {
        match kind {
            LoopKind::Recording => self.recording,
            LoopKind::Streaming => self.streaming,
        }
    }

    pub fn set_active(&mut self, kind: LoopKind, active: bool) {
        match kind {
            LoopKind::Recording => self.recording = active,
            LoopKind::Streaming => self.streaming = active,
        }
    }
}

/// Encoding parameters for one output stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityProfile {
    /// Output frame size
    pub resolution: Resolution,

    /// Frames per second
    pub fps: u32,

    /// Target bitrate in bits per second
    pub bitrate: u32,

    /// File extension for produced files, without the dot
    pub extension: String,
}

impl QualityProfile {
    /// Default profile for recorded clips (1080p30, 10 Mbps H.264 in mp4)
    pub fn recording_default() -> Self {
        Self {
            resolution: Resolution::new(1920, 1080),
            fps: 30,
            bitrate: 10_000_000,
            extension: "mp4".to_string(),
        }
    }

    /// Default profile for the live stream (720p15, 5 Mbps MJPEG)
    pub fn streaming_default() -> Self {
        Self {
            resolution: Resolution::new(1280, 720),
            fps: 15,
            bitrate: 5_000_000,
            extension: "jpg".to_string(),
        }
    }

    /// Check every field is usable by a device
    pub fn validate(&self) -> DashcamResult<()> {
        if self.resolution.width == 0 || self.resolution.height == 0 {
            return Err(DashcamError::Config(format!(
                "resolution must be positive, got {}",
                self.resolution
            )));
        }
        if self.fps == 0 {
            return Err(DashcamError::Config("fps must be positive".to_string()));
        }
        if self.bitrate == 0 {
            return Err(DashcamError::Config("bitrate must be positive".to_string()));
        }
        if self.extension.is_empty() || !self.extension.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(DashcamError::Config(format!(
                "invalid file extension '{}'",
                self.extension
            )));
        }
        Ok(())
    }

    /// Produce a new profile with `update` merged in, validated as a whole
    pub fn merged(&self, update: &QualityUpdate) -> DashcamResult<Self> {
        let mut profile = self.clone();
        if let Some(resolution) = update.resolution {
            profile.resolution = resolution;
        }
        if let Some(fps) = update.fps {
            profile.fps = fps;
        }
        if let Some(bitrate) = update.bitrate {
            profile.bitrate = bitrate;
        }
        profile.validate()?;
        Ok(profile)
    }
}

/// Partial quality change requested through the control surface
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityUpdate {
    pub resolution: Option<Resolution>,
    pub fps: Option<u32>,
    pub bitrate: Option<u32>,
}

/// Why a loop halted on its own
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Degraded {
    /// Loop that gave up
    pub kind: LoopKind,

    /// Last error seen before halting
    pub message: String,

    /// When the loop halted
    pub at: DateTime<Utc>,
}

/// Point-in-time copy of the controller state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub recording: bool,
    pub streaming: bool,
    pub recording_profile: QualityProfile,
    pub streaming_profile: QualityProfile,
    pub storage_budget: u64,
    pub clip_duration_secs: u64,

    /// Name of the clip currently being written, if any
    pub open_clip: Option<String>,

    /// Name of the most recently finalized clip
    pub last_clip: Option<String>,

    /// True when any loop halted after repeated device failures
    pub degraded: bool,

    /// Details for each halted loop
    pub degradations: Vec<Degraded>,
}

/// Events emitted by the recorder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderEvent {
    /// A loop was started
    Started(LoopKind),
    /// A loop was asked to stop
    Stopped(LoopKind),
    /// A clip was finalized
    ClipClosed { name: String, size_bytes: u64 },
    /// A clip was removed by an eviction pass
    ClipEvicted { name: String, size_bytes: u64 },
    /// A loop halted after repeated failures
    Degraded(LoopKind),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_flags_are_independent() {
        let mut state = RecordingState::default();
        state.set_active(LoopKind::Streaming, true);
        assert!(state.is_active(LoopKind::Streaming));
        assert!(!state.is_active(LoopKind::Recording));

        state.set_active(LoopKind::Recording, true);
        state.set_active(LoopKind::Streaming, false);
        assert_eq!(
            state,
            RecordingState {
                recording: true,
                streaming: false
            }
        );
    }

    #[test]
    fn test_merge_partial_update() {
        let profile = QualityProfile::recording_default();
        let update = QualityUpdate {
            fps: Some(25),
            ..Default::default()
        };

        let merged = profile.merged(&update).unwrap();
        assert_eq!(merged.fps, 25);
        assert_eq!(merged.resolution, profile.resolution);
        assert_eq!(merged.bitrate, profile.bitrate);
        assert_eq!(merged.extension, "mp4");
    }

    #[test]
    fn test_merge_rejects_non_positive_values() {
        let profile = QualityProfile::streaming_default();

        let zero_width = QualityUpdate {
            resolution: Some(Resolution::new(0, 720)),
            ..Default::default()
        };
        assert!(matches!(profile.merged(&zero_width), Err(DashcamError::Config(_))));

        let zero_bitrate = QualityUpdate {
            bitrate: Some(0),
            ..Default::default()
        };
        assert!(matches!(profile.merged(&zero_bitrate), Err(DashcamError::Config(_))));
    }

    #[test]
    fn test_extension_validation() {
        let mut profile = QualityProfile::recording_default();
        profile.extension = "../mp4".to_string();
        assert!(profile.validate().is_err());

        profile.extension = "mkv".to_string();
        assert!(profile.validate().is_ok());
    }

    #[test]
    fn test_update_deserializes_from_camel_case() {
        let update: QualityUpdate =
            serde_json::from_str(r#"{"resolution":{"width":640,"height":480},"fps":10}"#).unwrap();
        assert_eq!(update.resolution, Some(Resolution::new(640, 480)));
        assert_eq!(update.fps, Some(10));
        assert_eq!(update.bitrate, None);
    }
}
