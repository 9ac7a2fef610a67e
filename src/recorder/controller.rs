//! Recording controller
//!
//! Owns the capture device and the lifecycles of the recording and streaming
//! loops. All state transitions happen under one short critical section;
//! the loops do their capture I/O outside it.

use super::scheduler;
use super::state::{
    Degraded, LoopKind, QualityProfile, QualityUpdate, RecorderEvent, RecordingState,
    StatusSnapshot,
};
use super::streaming::{self, StreamFrame};
use super::worker::LoopContext;
use crate::capture::traits::CaptureDevice;
use crate::config::DashcamConfig;
use crate::storage::clip::ClipRecord;
use crate::storage::library::ClipLibrary;
use crate::utils::error::{DashcamError, DashcamResult};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A spawned loop
pub(crate) struct LoopHandle {
    pub generation: u64,
    pub token: CancellationToken,
    pub task: JoinHandle<()>,
}

/// Timing knobs read by the loops
#[derive(Debug, Clone, Copy)]
pub(crate) struct LoopTiming {
    pub clip_duration: Duration,
    pub poll_interval: Duration,
    pub max_failures: u32,
}

/// Mutable controller state, guarded by `Shared::state`
pub(crate) struct ControllerState {
    pub flags: RecordingState,
    pub recording_profile: QualityProfile,
    pub streaming_profile: QualityProfile,
    pub budget: u64,
    pub last_clip: Option<ClipRecord>,
    recording_loop: Option<LoopHandle>,
    streaming_loop: Option<LoopHandle>,
    recording_degraded: Option<Degraded>,
    streaming_degraded: Option<Degraded>,
    next_generation: u64,
}

impl ControllerState {
    pub fn loop_slot(&mut self, kind: LoopKind) -> &mut Option<LoopHandle> {
        match kind {
            LoopKind::Recording => &mut self.recording_loop,
            LoopKind::Streaming => &mut self.streaming_loop,
        }
    }

    pub fn degraded_slot(&mut self, kind: LoopKind) -> &mut Option<Degraded> {
        match kind {
            LoopKind::Recording => &mut self.recording_degraded,
            LoopKind::Streaming => &mut self.streaming_degraded,
        }
    }

    pub fn profile_mut(&mut self, kind: LoopKind) -> &mut QualityProfile {
        match kind {
            LoopKind::Recording => &mut self.recording_profile,
            LoopKind::Streaming => &mut self.streaming_profile,
        }
    }
}

/// State shared between the controller and its loops
pub(crate) struct Shared {
    pub state: Mutex<ControllerState>,
    pub device: Arc<dyn CaptureDevice>,
    pub library: ClipLibrary,
    pub events: broadcast::Sender<RecorderEvent>,
    pub frames: broadcast::Sender<StreamFrame>,
    pub timing: LoopTiming,
    recording_gate: Arc<tokio::sync::Mutex<()>>,
    streaming_gate: Arc<tokio::sync::Mutex<()>>,
}

impl Shared {
    /// Held by a live loop of `kind` for its whole run
    pub fn gate(&self, kind: LoopKind) -> Arc<tokio::sync::Mutex<()>> {
        match kind {
            LoopKind::Recording => self.recording_gate.clone(),
            LoopKind::Streaming => self.streaming_gate.clone(),
        }
    }
}

/// The control-plane entry point for recording and streaming
pub struct RecordingController {
    shared: Arc<Shared>,
    runtime: Handle,
    /// How long a stop waits for its loop; one poll interval
    stop_wait: Duration,
}

impl RecordingController {
    /// Initialize and start the device, then build the controller.
    ///
    /// Device initialization failure is fatal and returned here.
    pub async fn new(device: Arc<dyn CaptureDevice>, config: DashcamConfig) -> DashcamResult<Self> {
        config.validate()?;

        let library = ClipLibrary::new(&config.clip_dir, &config.recording.extension)?;

        tracing::info!("Initializing {} capture device", device.name());
        device.initialize(&config.device).await?;
        device.start().await?;

        if !config.warmup().is_zero() {
            // Let exposure and focus settle before the first clip
            tokio::time::sleep(config.warmup()).await;
        }

        let (events, _) = broadcast::channel(100);
        let (frames, _) = broadcast::channel(16);

        let state = ControllerState {
            flags: RecordingState::default(),
            recording_profile: config.recording.clone(),
            streaming_profile: config.streaming.clone(),
            budget: config.storage_budget_bytes,
            last_clip: None,
            recording_loop: None,
            streaming_loop: None,
            recording_degraded: None,
            streaming_degraded: None,
            next_generation: 0,
        };

        let shared = Shared {
            state: Mutex::new(state),
            device,
            library,
            events,
            frames,
            timing: LoopTiming {
                clip_duration: config.clip_duration(),
                poll_interval: config.poll_interval(),
                max_failures: config.max_consecutive_failures,
            },
            recording_gate: Arc::new(tokio::sync::Mutex::new(())),
            streaming_gate: Arc::new(tokio::sync::Mutex::new(())),
        };

        tracing::info!(
            "Recording controller ready: clips in {:?}, {}s per clip, budget {} bytes",
            config.clip_dir,
            config.clip_duration_secs,
            config.storage_budget_bytes
        );

        Ok(Self {
            shared: Arc::new(shared),
            runtime: Handle::current(),
            stop_wait: config.poll_interval(),
        })
    }

    /// Start clip recording. Returns false if already recording.
    pub fn start_recording(&self) -> bool {
        self.start_loop(LoopKind::Recording)
    }

    /// Stop clip recording. Returns false if not recording.
    pub async fn stop_recording(&self) -> bool {
        self.stop_loop(LoopKind::Recording).await
    }

    /// Start the live stream. Returns false if already streaming.
    pub fn start_streaming(&self) -> bool {
        self.start_loop(LoopKind::Streaming)
    }

    /// Stop the live stream. Returns false if not streaming.
    pub async fn stop_streaming(&self) -> bool {
        self.stop_loop(LoopKind::Streaming).await
    }

    fn start_loop(&self, kind: LoopKind) -> bool {
        let mut state = self.shared.state.lock();
        if state.flags.is_active(kind) {
            tracing::warn!("Attempted to start {} while already active", kind);
            return false;
        }

        // Flag flip and spawn happen under the same lock
        state.next_generation += 1;
        let generation = state.next_generation;
        let token = CancellationToken::new();
        let ctx = LoopContext {
            shared: self.shared.clone(),
            kind,
            generation,
            token: token.clone(),
        };
        let task = match kind {
            LoopKind::Recording => self.runtime.spawn(scheduler::run(ctx)),
            LoopKind::Streaming => self.runtime.spawn(streaming::run(ctx)),
        };

        state.flags.set_active(kind, true);
        *state.degraded_slot(kind) = None;
        *state.loop_slot(kind) = Some(LoopHandle {
            generation,
            token,
            task,
        });
        drop(state);

        let _ = self.shared.events.send(RecorderEvent::Started(kind));
        tracing::info!("{} started", kind);
        true
    }

    async fn stop_loop(&self, kind: LoopKind) -> bool {
        let handle = {
            let mut state = self.shared.state.lock();
            if !state.flags.is_active(kind) {
                tracing::warn!("Attempted to stop {} while not active", kind);
                return false;
            }
            state.flags.set_active(kind, false);
            let handle = state.loop_slot(kind).take();
            if let Some(handle) = handle.as_ref() {
                handle.token.cancel();
            }
            handle
        };

        if let Some(handle) = handle {
            match tokio::time::timeout(self.stop_wait, handle.task).await {
                Ok(Ok(())) => tracing::debug!("{} loop {} exited", kind, handle.generation),
                Ok(Err(e)) => tracing::error!("{} loop {} failed: {}", kind, handle.generation, e),
                Err(_) => tracing::warn!(
                    "{} loop {} still closing after {:?}; it will finish in the background",
                    kind,
                    handle.generation,
                    self.stop_wait
                ),
            }
        }

        let _ = self.shared.events.send(RecorderEvent::Stopped(kind));
        tracing::info!("{} stopped", kind);
        true
    }

    /// Change a quality profile. Applies from the next clip or stream frame.
    pub fn set_quality(&self, kind: LoopKind, update: &QualityUpdate) -> DashcamResult<QualityProfile> {
        let mut state = self.shared.state.lock();
        let profile = state.profile_mut(kind);
        let updated = profile.merged(update)?;
        *profile = updated.clone();
        drop(state);

        tracing::info!(
            "Updated {} quality: {} @ {}fps, {} bps",
            kind,
            updated.resolution,
            updated.fps,
            updated.bitrate
        );
        Ok(updated)
    }

    /// Change the byte budget used by the next eviction pass
    pub fn set_storage_budget(&self, bytes: u64) -> DashcamResult<u64> {
        if bytes == 0 {
            return Err(DashcamError::Config("storage budget must be positive".to_string()));
        }
        self.shared.state.lock().budget = bytes;
        tracing::info!("Storage budget updated to {} bytes", bytes);
        Ok(bytes)
    }

    /// Copy of the current state
    pub fn get_status(&self) -> StatusSnapshot {
        let open_clip = self.shared.library.open_clip();
        let state = self.shared.state.lock();
        let degradations: Vec<Degraded> = [&state.recording_degraded, &state.streaming_degraded]
            .into_iter()
            .flatten()
            .cloned()
            .collect();

        StatusSnapshot {
            recording: state.flags.recording,
            streaming: state.flags.streaming,
            recording_profile: state.recording_profile.clone(),
            streaming_profile: state.streaming_profile.clone(),
            storage_budget: state.budget,
            clip_duration_secs: self.shared.timing.clip_duration.as_secs(),
            open_clip,
            last_clip: state.last_clip.as_ref().map(|clip| clip.name.clone()),
            degraded: !degradations.is_empty(),
            degradations,
        }
    }

    /// Most recently closed clip
    pub fn last_clip(&self) -> Option<ClipRecord> {
        self.shared.state.lock().last_clip.clone()
    }

    pub fn list_clips(&self) -> DashcamResult<Vec<ClipRecord>> {
        self.shared.library.list()
    }

    pub fn delete_clip(&self, name: &str) -> DashcamResult<ClipRecord> {
        self.shared.library.delete(name)
    }

    pub fn lock_clip(&self, name: &str) -> DashcamResult<bool> {
        self.shared.library.lock(name)
    }

    pub fn unlock_clip(&self, name: &str) -> DashcamResult<bool> {
        self.shared.library.unlock(name)
    }

    /// Grab a single still from the device
    pub async fn capture_still(&self) -> DashcamResult<Vec<u8>> {
        Ok(self.shared.device.capture_still().await?)
    }

    /// Frames published by the streaming loop
    pub fn subscribe_stream(&self) -> broadcast::Receiver<StreamFrame> {
        self.shared.frames.subscribe()
    }

    /// Lifecycle events
    pub fn subscribe_events(&self) -> broadcast::Receiver<RecorderEvent> {
        self.shared.events.subscribe()
    }

    /// Stop both loops and release the device.
    ///
    /// Unlike a plain stop, this waits for each loop to finish closing its
    /// clip before the device is stopped.
    pub async fn shutdown(&self) -> DashcamResult<()> {
        self.stop_recording().await;
        self.stop_streaming().await;

        let _recording = self.shared.gate(LoopKind::Recording).lock_owned().await;
        let _streaming = self.shared.gate(LoopKind::Streaming).lock_owned().await;
        tracing::debug!("All loops exited");

        self.shared.device.stop().await?;
        tracing::info!("Capture device stopped");
        Ok(())
    }
}

impl Drop for RecordingController {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        for kind in [LoopKind::Recording, LoopKind::Streaming] {
            if let Some(handle) = state.loop_slot(kind).take() {
                handle.token.cancel();
            }
        }
    }
}
