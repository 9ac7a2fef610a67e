//! Plumbing shared by the recording and streaming loops
//!
//! A loop runs as a tokio task holding its kind's run gate for its whole
//! lifetime, so a new loop of the same kind cannot begin until the previous
//! one has closed its clip, even if a stop gave up waiting for it.

use super::controller::Shared;
use super::state::{Degraded, LoopKind, RecorderEvent};
use crate::capture::traits::ClipHandle;
use crate::utils::error::DeviceError;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Everything a running loop needs
pub(crate) struct LoopContext {
    pub shared: Arc<Shared>,
    pub kind: LoopKind,
    pub generation: u64,
    pub token: CancellationToken,
}

impl LoopContext {
    /// Wait for the previous loop of this kind to exit
    pub async fn acquire_gate(&self) -> OwnedMutexGuard<()> {
        self.shared.gate(self.kind).lock_owned().await
    }

    /// Sleep for `duration`, checking the token at least every poll
    /// interval. Returns true if cancellation was requested.
    pub async fn wait(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.token.is_cancelled() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let step = (deadline - now).min(self.shared.timing.poll_interval);
            tokio::select! {
                _ = self.token.cancelled() => return true,
                _ = tokio::time::sleep(step) => {}
            }
        }
    }

    /// Wait out an open clip, checking both the token and the clip's health
    /// every poll interval.
    pub async fn wait_clip(&self, duration: Duration, clip: &ClipHandle) -> ClipWait {
        let deadline = Instant::now() + duration;
        loop {
            if self.token.is_cancelled() {
                return ClipWait::Cancelled;
            }
            let now = Instant::now();
            if now >= deadline {
                return ClipWait::Elapsed;
            }
            let step = (deadline - now).min(self.shared.timing.poll_interval);
            tokio::select! {
                _ = self.token.cancelled() => return ClipWait::Cancelled,
                _ = tokio::time::sleep(step) => {}
            }
            if let Err(e) = self.shared.device.check_clip(clip).await {
                return ClipWait::Failed(e);
            }
        }
    }

    /// Pause after a failure before retrying
    pub async fn backoff(&self) -> bool {
        self.wait(self.shared.timing.poll_interval).await
    }

    pub fn emit(&self, event: RecorderEvent) {
        // No subscribers is fine
        let _ = self.shared.events.send(event);
    }

    /// Give up after repeated failures.
    ///
    /// Only resets the flag if this loop is still the current session; a
    /// stop (or a stop followed by a new start) already owns the state.
    pub fn halt(&self, message: String) {
        let halted = {
            let mut state = self.shared.state.lock();
            let current = state.loop_slot(self.kind).as_ref().map(|h| h.generation);
            if current == Some(self.generation) {
                state.flags.set_active(self.kind, false);
                *state.loop_slot(self.kind) = None;
                *state.degraded_slot(self.kind) = Some(Degraded {
                    kind: self.kind,
                    message: message.clone(),
                    at: Utc::now(),
                });
                true
            } else {
                false
            }
        };

        if halted {
            tracing::error!("{} loop halted after repeated failures: {}", self.kind, message);
            self.emit(RecorderEvent::Degraded(self.kind));
        }
    }
}

/// How a clip's recording window ended
#[derive(Debug)]
pub(crate) enum ClipWait {
    Elapsed,
    Cancelled,
    /// Capture died mid-clip
    Failed(DeviceError),
}

/// Counts consecutive device failures against a threshold
#[derive(Debug)]
pub(crate) struct FailureCounter {
    consecutive: u32,
    threshold: u32,
}

impl FailureCounter {
    pub fn new(threshold: u32) -> Self {
        Self {
            consecutive: 0,
            threshold,
        }
    }

    /// Count one failure; true once the threshold is reached
    pub fn record(&mut self) -> bool {
        self.consecutive += 1;
        self.consecutive >= self.threshold
    }

    pub fn reset(&mut self) {
        self.consecutive = 0;
    }

    pub fn count(&self) -> u32 {
        self.consecutive
    }
}
