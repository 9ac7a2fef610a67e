//! Control commands
//!
//! One command per request, one `CommandResponse` per command. Every command
//! gets a defined response from every controller state.

use crate::capture::traits::Resolution;
use crate::recorder::controller::RecordingController;
use crate::recorder::state::{LoopKind, QualityUpdate};
use crate::utils::error::{DashcamError, DashcamResult, ErrorResponse};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;

/// A request from the control surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ControlCommand {
    StartRecording,
    StopRecording,
    StartStreaming,
    StopStreaming,
    GetStatus,
    SetQuality {
        kind: LoopKind,
        #[serde(default)]
        resolution: Option<Resolution>,
        #[serde(default)]
        fps: Option<u32>,
        #[serde(default)]
        bitrate: Option<u32>,
    },
    SetStorageBudget {
        bytes: u64,
    },
    ListClips,
    DeleteClip {
        name: String,
    },
    LockClip {
        name: String,
    },
    UnlockClip {
        name: String,
    },
    /// Grab one still; written to `path` when given
    CaptureStill {
        #[serde(default)]
        path: Option<PathBuf>,
    },
}

impl ControlCommand {
    /// Parse one JSON-encoded command
    pub fn parse(line: &str) -> DashcamResult<Self> {
        Ok(serde_json::from_str(line)?)
    }
}

/// Result of a control command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorResponse>,
}

impl CommandResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
            error: None,
        }
    }

    pub fn ok_with(message: impl Into<String>, data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::ok(message)
        }
    }

    /// A refused no-op such as a duplicate start
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
            error: None,
        }
    }

    pub fn failed(error: &DashcamError) -> Self {
        let error = ErrorResponse::from(error);
        Self {
            success: false,
            message: error.message.clone(),
            data: None,
            error: Some(error),
        }
    }
}

impl From<DashcamError> for CommandResponse {
    fn from(error: DashcamError) -> Self {
        CommandResponse::failed(&error)
    }
}

fn toggled(changed: bool, done: &str, refused: &str) -> CommandResponse {
    if changed {
        CommandResponse::ok(done)
    } else {
        CommandResponse::rejected(refused)
    }
}

/// Run one command against the controller
pub async fn dispatch(controller: &RecordingController, command: ControlCommand) -> CommandResponse {
    tracing::debug!("Control command: {:?}", command);
    match run(controller, command).await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!("Control command failed: {}", e);
            CommandResponse::from(e)
        }
    }
}

async fn run(controller: &RecordingController, command: ControlCommand) -> DashcamResult<CommandResponse> {
    let response = match command {
        ControlCommand::StartRecording => toggled(
            controller.start_recording(),
            "Recording started",
            "Already recording",
        ),
        ControlCommand::StopRecording => toggled(
            controller.stop_recording().await,
            "Recording stopped",
            "Not recording",
        ),
        ControlCommand::StartStreaming => toggled(
            controller.start_streaming(),
            "Streaming started",
            "Already streaming",
        ),
        ControlCommand::StopStreaming => toggled(
            controller.stop_streaming().await,
            "Streaming stopped",
            "Not streaming",
        ),
        ControlCommand::GetStatus => {
            let status = controller.get_status();
            CommandResponse::ok_with("Status", serde_json::to_value(status)?)
        }
        ControlCommand::SetQuality {
            kind,
            resolution,
            fps,
            bitrate,
        } => {
            let update = QualityUpdate {
                resolution,
                fps,
                bitrate,
            };
            let profile = controller.set_quality(kind, &update)?;
            CommandResponse::ok_with(
                format!("Updated {} quality", kind),
                serde_json::to_value(profile)?,
            )
        }
        ControlCommand::SetStorageBudget { bytes } => {
            let bytes = controller.set_storage_budget(bytes)?;
            CommandResponse::ok_with("Storage budget updated", json!({ "bytes": bytes }))
        }
        ControlCommand::ListClips => {
            let clips = controller.list_clips()?;
            CommandResponse::ok_with(
                format!("{} clips", clips.len()),
                serde_json::to_value(clips)?,
            )
        }
        ControlCommand::DeleteClip { name } => {
            let clip = controller.delete_clip(&name)?;
            CommandResponse::ok_with(format!("Deleted {}", name), serde_json::to_value(clip)?)
        }
        ControlCommand::LockClip { name } => {
            controller.lock_clip(&name)?;
            CommandResponse::ok(format!("Locked {}", name))
        }
        ControlCommand::UnlockClip { name } => {
            controller.unlock_clip(&name)?;
            CommandResponse::ok(format!("Unlocked {}", name))
        }
        ControlCommand::CaptureStill { path } => {
            let still = controller.capture_still().await?;
            if let Some(path) = path.as_ref() {
                tokio::fs::write(path, &still).await?;
            }
            CommandResponse::ok_with(
                "Still captured",
                json!({ "bytes": still.len(), "path": path }),
            )
        }
    };
    Ok(response)
}
