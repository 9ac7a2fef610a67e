//! Shared utilities

pub mod error;
pub mod log_file;

pub use error::{DashcamError, DashcamResult, DeviceError, DeviceResult, ErrorResponse};
