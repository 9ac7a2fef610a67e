//! Recording system module
//!
//! This module implements the dashcam recorder:
//! - RecordingController owning loop lifecycles and the device
//! - Clip scheduler rotating fixed-duration clips
//! - Streaming loop publishing live frames

pub mod controller;
pub mod scheduler;
pub mod state;
pub mod streaming;
mod worker;

pub use controller::RecordingController;
pub use scheduler::ClipNamer;
pub use state::{LoopKind, QualityProfile, QualityUpdate, RecorderEvent, RecordingState, StatusSnapshot};
pub use streaming::StreamFrame;
