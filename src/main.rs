//! Dashcam recorder binary.
//!
//! Reads one JSON control command per stdin line and writes one JSON
//! response per stdout line. Logs go to stderr and, when `DASHCAM_LOG_FILE`
//! is set, to a size-rotated file.

use anyhow::Context;
use dashcam::capture::device_for;
use dashcam::commands::{dispatch, CommandResponse, ControlCommand};
use dashcam::config::DashcamConfig;
use dashcam::recorder::{RecorderEvent, RecordingController};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = DashcamConfig::from_env().context("failed to load configuration")?;
    dashcam::init_logging(config.log_file.as_deref()).context("failed to open log file")?;
    tracing::info!("Starting dashcam v{}", env!("CARGO_PKG_VERSION"));

    let device = device_for(config.device.kind);
    let controller = RecordingController::new(device, config)
        .await
        .context("failed to start capture device")?;

    let mut events = controller.subscribe_events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(RecorderEvent::ClipClosed { name, size_bytes }) => {
                    tracing::info!("Clip saved: {} ({} bytes)", name, size_bytes)
                }
                Ok(RecorderEvent::ClipEvicted { name, size_bytes }) => {
                    tracing::info!("Clip evicted: {} ({} bytes)", name, size_bytes)
                }
                Ok(event) => tracing::debug!("Recorder event: {:?}", event),
                Err(RecvError::Lagged(n)) => tracing::warn!("Missed {} recorder events", n),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read control input")?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        };

        let Some(line) = line else {
            tracing::info!("Control input closed");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = match ControlCommand::parse(&line) {
            Ok(command) => dispatch(&controller, command).await,
            Err(e) => CommandResponse::from(e),
        };

        let mut out = serde_json::to_vec(&response)?;
        out.push(b'\n');
        stdout.write_all(&out).await?;
        stdout.flush().await?;
    }

    controller.shutdown().await.context("failed to stop capture device")?;
    tracing::info!("Dashcam stopped");
    Ok(())
}
