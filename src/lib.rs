//! Dashcam - continuous clip recording with bounded retention.
//!
//! This is the main library crate for the dashcam recorder.
//! It provides the recording controller, capture backends, clip storage
//! and the control command layer.

pub mod capture;
pub mod commands;
pub mod config;
pub mod recorder;
pub mod storage;
pub mod utils;

use std::path::Path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utils::error::DashcamResult;
use utils::log_file::{RotatingFile, DEFAULT_BACKUPS, DEFAULT_MAX_BYTES};

/// Initialize tracing/logging. Logs go to stderr so stdout stays free for
/// control responses. With `log_file` set, the same events are also written
/// to a size-rotated file.
pub fn init_logging(log_file: Option<&Path>) -> DashcamResult<()> {
    let file_layer = match log_file {
        Some(path) => {
            let file = RotatingFile::open(path, DEFAULT_MAX_BYTES, DEFAULT_BACKUPS)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(file),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dashcam=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(())
}
