//! Live streaming loop
//!
//! Captures stills at the streaming profile's frame rate and publishes them
//! on a broadcast channel for whatever transport serves the live view.

use super::state::LoopKind;
use super::worker::{FailureCounter, LoopContext};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// One published frame
#[derive(Debug, Clone)]
pub struct StreamFrame {
    /// Identifies the streaming session the frame belongs to
    pub session: Uuid,

    /// Frame number within the session, starting at 0
    pub sequence: u64,

    pub captured_at: DateTime<Utc>,

    /// Encoded still (JPEG or PNG depending on the device)
    pub data: Arc<Vec<u8>>,
}

fn frame_interval(fps: u32) -> Duration {
    Duration::from_secs(1) / fps.max(1)
}

/// Run the streaming loop until cancelled or halted
pub(crate) async fn run(ctx: LoopContext) {
    let _gate = ctx.acquire_gate().await;
    if ctx.token.is_cancelled() {
        return;
    }

    let shared = ctx.shared.clone();
    let session = Uuid::new_v4();
    let mut failures = FailureCounter::new(shared.timing.max_failures);
    let mut applied = None;
    let mut sequence: u64 = 0;

    tracing::info!("Streaming session {} started", session);

    while !ctx.token.is_cancelled() {
        let profile = shared.state.lock().streaming_profile.clone();

        if applied.as_ref() != Some(&profile) {
            match shared.device.apply_controls(LoopKind::Streaming, &profile).await {
                Ok(()) => {
                    tracing::debug!(
                        "Streaming at {} @ {}fps",
                        profile.resolution,
                        profile.fps
                    );
                    applied = Some(profile.clone());
                }
                Err(e) => {
                    tracing::error!("Failed to apply streaming controls: {}", e);
                    if failures.record() {
                        ctx.halt(e.to_string());
                        break;
                    }
                    if ctx.backoff().await {
                        break;
                    }
                    continue;
                }
            }
        }

        match shared.device.capture_still().await {
            Ok(data) => {
                failures.reset();
                let frame = StreamFrame {
                    session,
                    sequence,
                    captured_at: Utc::now(),
                    data: Arc::new(data),
                };
                sequence += 1;
                // Frames are dropped when nobody is watching
                let _ = shared.frames.send(frame);
            }
            Err(e) => {
                tracing::warn!("Failed to capture stream frame: {}", e);
                if failures.record() {
                    ctx.halt(e.to_string());
                    break;
                }
            }
        }

        if ctx.wait(frame_interval(profile.fps)).await {
            break;
        }
    }

    tracing::info!("Streaming session {} stopped after {} frames", session, sequence);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_interval() {
        assert_eq!(frame_interval(10), Duration::from_millis(100));
        assert_eq!(frame_interval(0), Duration::from_secs(1));
    }
}
