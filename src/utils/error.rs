//! Error types and handling
//!
//! Common error types used across the recorder, storage and control layers.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by a capture device
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Device initialization failed: {0}")]
    Init(String),

    #[error("Device is not running")]
    NotRunning,

    #[error("Clip error: {0}")]
    Clip(String),

    #[error("Still capture failed: {0}")]
    Still(String),

    #[error("Capture process error: {0}")]
    Process(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for device operations
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum DashcamError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Clip not found: {0}")]
    NotFound(String),

    #[error("Clip is locked: {0}")]
    ClipLocked(String),

    #[error("Clip is currently being recorded: {0}")]
    ClipOpen(String),

    #[error("Invalid clip name: {0}")]
    InvalidClipName(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Error response for the control surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<&DashcamError> for ErrorResponse {
    fn from(error: &DashcamError) -> Self {
        let code = match error {
            DashcamError::Config(_) => "CONFIG_ERROR",
            DashcamError::Device(_) => "DEVICE_ERROR",
            DashcamError::Storage(_) => "STORAGE_ERROR",
            DashcamError::NotFound(_) => "NOT_FOUND",
            DashcamError::ClipLocked(_) => "CLIP_LOCKED",
            DashcamError::ClipOpen(_) => "CLIP_OPEN",
            DashcamError::InvalidClipName(_) => "INVALID_CLIP_NAME",
            DashcamError::Io(_) => "IO_ERROR",
            DashcamError::Serialization(_) => "SERIALIZATION_ERROR",
        };

        ErrorResponse {
            code: code.to_string(),
            message: error.to_string(),
        }
    }
}

impl From<DashcamError> for ErrorResponse {
    fn from(error: DashcamError) -> Self {
        ErrorResponse::from(&error)
    }
}

/// Result type alias using DashcamError
pub type DashcamResult<T> = Result<T, DashcamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let response = ErrorResponse::from(DashcamError::Config("fps must be positive".into()));
        assert_eq!(response.code, "CONFIG_ERROR");
        assert!(response.message.contains("fps must be positive"));

        let response = ErrorResponse::from(DashcamError::Device(DeviceError::NotRunning));
        assert_eq!(response.code, "DEVICE_ERROR");
        assert_eq!(response.message, "Device error: Device is not running");
    }
}
