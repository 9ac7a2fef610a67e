//! Clip scheduler
//!
//! The recording loop: evict, open a clip, wait out the clip duration,
//! close it, repeat. A clip is always closed before the loop exits.

use super::state::{LoopKind, RecorderEvent};
use super::worker::{ClipWait, FailureCounter, LoopContext};
use crate::storage::clip::{ClipRecord, CLIP_PREFIX};
use crate::storage::guard::StorageGuard;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::path::{Path, PathBuf};

/// Generates clip file names from the capture time.
///
/// Names carry millisecond precision and never repeat: a clip starting in
/// the same millisecond as the previous one (or colliding with a file on
/// disk) is pushed forward one millisecond at a time, which keeps names in
/// capture order when sorted.
#[derive(Debug)]
pub struct ClipNamer {
    extension: String,
    last: Option<DateTime<Utc>>,
}

impl ClipNamer {
    pub fn new(extension: &str) -> Self {
        Self {
            extension: extension.to_string(),
            last: None,
        }
    }

    pub fn name_for(&self, at: DateTime<Utc>) -> String {
        format!("{}{}.{}", CLIP_PREFIX, at.format("%Y%m%d-%H%M%S-%3f"), self.extension)
    }

    /// Path for a clip captured at `now` inside `dir`
    pub fn next_path(&mut self, dir: &Path, now: DateTime<Utc>) -> PathBuf {
        let step = ChronoDuration::milliseconds(1);
        let mut at = match self.last {
            Some(last) if now < last + step => last + step,
            _ => now,
        };

        while dir.join(self.name_for(at)).exists() {
            at += step;
        }

        self.last = Some(at);
        dir.join(self.name_for(at))
    }
}

/// Run the recording loop until cancelled or halted
pub(crate) async fn run(ctx: LoopContext) {
    let _gate = ctx.acquire_gate().await;
    if ctx.token.is_cancelled() {
        return;
    }

    let shared = ctx.shared.clone();
    let library = &shared.library;
    let mut namer = ClipNamer::new(library.extension());
    let mut failures = FailureCounter::new(shared.timing.max_failures);

    tracing::info!("Recording loop {} started", ctx.generation);

    while !ctx.token.is_cancelled() {
        // Settings are read once per clip and stay fixed until it closes
        let (profile, budget) = {
            let state = shared.state.lock();
            (state.recording_profile.clone(), state.budget)
        };

        match StorageGuard::enforce(library, budget) {
            Ok(report) => {
                for clip in report.evicted {
                    ctx.emit(RecorderEvent::ClipEvicted {
                        name: clip.name,
                        size_bytes: clip.size_bytes,
                    });
                }
            }
            Err(e) => tracing::error!("Eviction pass failed: {}", e),
        }

        if let Err(e) = shared.device.apply_controls(LoopKind::Recording, &profile).await {
            tracing::error!("Failed to apply recording controls: {}", e);
            if failures.record() {
                ctx.halt(e.to_string());
                break;
            }
            if ctx.backoff().await {
                break;
            }
            continue;
        }

        let path = namer.next_path(library.dir(), Utc::now());
        let handle = match shared.device.start_clip(&path).await {
            Ok(handle) => handle,
            Err(e) => {
                let last = failures.record();
                tracing::error!(
                    "Failed to open clip {:?} ({} in a row): {}",
                    path,
                    failures.count(),
                    e
                );
                if last {
                    ctx.halt(e.to_string());
                    break;
                }
                if ctx.backoff().await {
                    break;
                }
                continue;
            }
        };

        let name = clip_name(&path);
        library.set_open(Some(name.clone()));
        tracing::debug!(
            "Recording clip {} at {} @ {}fps",
            name,
            profile.resolution,
            profile.fps
        );

        let outcome = ctx.wait_clip(shared.timing.clip_duration, &handle).await;
        let cancelled = matches!(outcome, ClipWait::Cancelled);
        let mut failure = match outcome {
            ClipWait::Failed(e) => {
                tracing::error!("Clip {} failed while recording, closing early: {}", name, e);
                Some(e.to_string())
            }
            ClipWait::Elapsed | ClipWait::Cancelled => None,
        };

        // Close unconditionally: a clip is never left half-written
        let closed = shared.device.stop_clip(handle).await;
        library.set_open(None);

        match closed {
            Ok(size_bytes) => {
                let mut record = ClipRecord::from_path(&path).unwrap_or_else(|_| ClipRecord {
                    name: name.clone(),
                    path: path.clone(),
                    created: Utc::now(),
                    size_bytes,
                    locked: false,
                });
                record.size_bytes = size_bytes;
                tracing::debug!("Clip {} completed: {} bytes", name, size_bytes);
                shared.state.lock().last_clip = Some(record);
                ctx.emit(RecorderEvent::ClipClosed { name, size_bytes });
            }
            Err(e) => {
                tracing::error!("Failed to close clip {}: {}", name, e);
                // A dead pipeline usually fails its close too; count it once
                failure.get_or_insert_with(|| e.to_string());
            }
        }

        match failure {
            None => failures.reset(),
            Some(message) => {
                if failures.record() {
                    ctx.halt(message);
                    break;
                }
                if !cancelled && ctx.backoff().await {
                    break;
                }
            }
        }

        if cancelled {
            break;
        }
    }

    tracing::info!("Recording loop {} stopped", ctx.generation);
}

fn clip_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap() + ChronoDuration::milliseconds(ms)
    }

    #[test]
    fn test_name_format() {
        let namer = ClipNamer::new("mp4");
        assert_eq!(namer.name_for(at(250)), "dashcam_20240301-083000-250.mp4");
    }

    #[test]
    fn test_same_instant_does_not_collide() {
        let dir = tempdir().unwrap();
        let mut namer = ClipNamer::new("mp4");

        let first = namer.next_path(dir.path(), at(0));
        let second = namer.next_path(dir.path(), at(0));
        let third = namer.next_path(dir.path(), at(0));

        assert_ne!(first, second);
        assert_ne!(second, third);
        assert!(first < second && second < third);
        assert!(second.ends_with("dashcam_20240301-083000-001.mp4"));
    }

    #[test]
    fn test_skips_existing_files() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("dashcam_20240301-083000-000.mp4"), b"").unwrap();
        std::fs::write(dir.path().join("dashcam_20240301-083000-001.mp4"), b"").unwrap();

        let mut namer = ClipNamer::new("mp4");
        let path = namer.next_path(dir.path(), at(0));
        assert!(path.ends_with("dashcam_20240301-083000-002.mp4"));
    }

    #[test]
    fn test_later_capture_uses_its_own_time() {
        let dir = tempdir().unwrap();
        let mut namer = ClipNamer::new("mkv");
        namer.next_path(dir.path(), at(0));

        let path = namer.next_path(dir.path(), at(180_000));
        assert!(path.ends_with("dashcam_20240301-083300-000.mkv"));
    }
}
