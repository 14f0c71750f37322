//! # Control Surface Commands
//!
//! Commands accepted by the rig executive's control server and the response
//! type returned for every one of them. Operator tooling (web panels, command
//! line utilities) talks this vocabulary; route/transport details stay thin
//! on both sides.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::plc::WorkCommand;

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// The six imaging task kinds the rig can execute.
#[derive(Debug, Serialize, Deserialize, Copy, Clone, Hash, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Panorama,
    Target,
    Designated,
    Thermal,
    Video,
    Initial,
}

/// Scan grid axes editable through the control surface.
#[derive(Debug, Serialize, Deserialize, Copy, Clone, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ScanAxis {
    Pan,
    Tilt,
    Zoom,
}

/// Manual drive commands for the AMR.
#[derive(Debug, Serialize, Deserialize, Copy, Clone, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum AmrMoveCmd {
    Stop,
    Forward,
    Backward,
    LeftTurn,
    RightTurn,
}

/// A command sent to the rig executive's control server.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type", content = "args", rename_all = "snake_case")]
pub enum CtlCmd {
    /// Start the given task kind. `requestor` defaults to `"manual"`; the
    /// controller handshake path starts tasks with requestor `"AGVC"`.
    StartTask {
        kind: TaskKind,
        requestor: Option<String>,
    },

    /// Request cooperative cancellation of the given task kind
    StopTask { kind: TaskKind },

    /// Report the run state of the given task kind
    GetTaskStatus { kind: TaskKind },

    /// Replace one axis of a scan grid (panorama/target only)
    SetScanGrid {
        kind: TaskKind,
        axis: ScanAxis,
        values: Vec<f64>,
    },

    /// Report the scan grid of the given task kind
    GetScanGrid { kind: TaskKind },

    /// Persist a designated/video target taught at the camera's current
    /// attitude and the AMR's current position. The device-frame pan is
    /// converted to a world-frame bearing at save time.
    SaveTarget {
        kind: TaskKind,
        duration_s: Option<u32>,
    },

    /// Open the PTZ camera stream
    OpenCamera,

    /// Close the PTZ camera stream
    CloseCamera,

    /// Report the aggregate rig status
    GetCameraStatus,

    /// Acquire one frame from the PTZ camera, base64 JPEG in the message
    GetLiveFrame,

    /// Issue an absolute PTZ move without waiting for convergence
    MoveCamera { pan_deg: f64, tilt_deg: f64, zoom: f64 },

    /// Drive the AMR manually
    MoveAmr { cmd: AmrMoveCmd },

    /// Start an obstacle capture job as if the obstacle signal had risen
    TriggerObstacleCapture,
}

/// Errors raised when parsing a control command.
#[derive(Debug, Error)]
pub enum CtlParseError {
    #[error("The command was not valid UTF-8")]
    NonUtf8Cmd,

    #[error("Could not parse the command: {0}")]
    JsonError(serde_json::Error),
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The response returned for every control command.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CtlResponse {
    /// True if the command was carried out
    pub status: bool,

    /// Operator-visible detail, or requested data for query commands
    pub message: String,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TaskKind {
    /// All kinds, in the order they are reported by status queries.
    pub fn all() -> [TaskKind; 6] {
        [
            TaskKind::Panorama,
            TaskKind::Target,
            TaskKind::Designated,
            TaskKind::Thermal,
            TaskKind::Video,
            TaskKind::Initial,
        ]
    }

    /// Name used in manifests, history rows and log lines.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Panorama => "panorama",
            TaskKind::Target => "target",
            TaskKind::Designated => "designated",
            TaskKind::Thermal => "thermal",
            TaskKind::Video => "video",
            TaskKind::Initial => "initial",
        }
    }

    /// The task kind requested by a controller work command, `None` for
    /// `WorkCommand::None`.
    pub fn from_work_command(cmd: WorkCommand) -> Option<TaskKind> {
        match cmd {
            WorkCommand::None => None,
            WorkCommand::Designated => Some(TaskKind::Designated),
            WorkCommand::Thermal => Some(TaskKind::Thermal),
            WorkCommand::Target => Some(TaskKind::Target),
            WorkCommand::Panorama => Some(TaskKind::Panorama),
            WorkCommand::Video => Some(TaskKind::Video),
            WorkCommand::Initial => Some(TaskKind::Initial),
        }
    }
}

impl CtlCmd {
    /// Parse a command from its JSON wire form.
    pub fn from_json(json_str: &str) -> Result<Self, CtlParseError> {
        serde_json::from_str(json_str).map_err(CtlParseError::JsonError)
    }

    /// Serialize the command to its JSON wire form.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl CtlResponse {
    pub fn ok<S: Into<String>>(message: S) -> Self {
        CtlResponse {
            status: true,
            message: message.into(),
        }
    }

    pub fn error<S: Into<String>>(message: S) -> Self {
        CtlResponse {
            status: false,
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_cmd_parse() {
        let cmd = CtlCmd::from_json(
            r#"{"type": "start_task", "args": {"kind": "panorama", "requestor": "AGVC"}}"#,
        )
        .unwrap();

        match cmd {
            CtlCmd::StartTask { kind, requestor } => {
                assert_eq!(kind, TaskKind::Panorama);
                assert_eq!(requestor.as_deref(), Some("AGVC"));
            }
            c => panic!("parsed wrong command: {:?}", c),
        }

        // Commands without arguments have no args object
        let cmd = CtlCmd::from_json(r#"{"type": "open_camera"}"#).unwrap();
        assert!(matches!(cmd, CtlCmd::OpenCamera));

        assert!(CtlCmd::from_json("definitely not json").is_err());
    }

    #[test]
    fn test_amr_move_cmd_wire_names() {
        let cmd =
            CtlCmd::from_json(r#"{"type": "move_amr", "args": {"cmd": "left-turn"}}"#).unwrap();
        assert!(matches!(
            cmd,
            CtlCmd::MoveAmr {
                cmd: AmrMoveCmd::LeftTurn
            }
        ));
    }

    #[test]
    fn test_cmd_json_roundtrip() {
        let cmd = CtlCmd::SetScanGrid {
            kind: TaskKind::Target,
            axis: ScanAxis::Pan,
            values: vec![-90.0, 0.0, 90.0],
        };

        let json = cmd.to_json().unwrap();
        let parsed = CtlCmd::from_json(&json).unwrap();

        match parsed {
            CtlCmd::SetScanGrid { kind, axis, values } => {
                assert_eq!(kind, TaskKind::Target);
                assert_eq!(axis, ScanAxis::Pan);
                assert_eq!(values, vec![-90.0, 0.0, 90.0]);
            }
            c => panic!("parsed wrong command: {:?}", c),
        }
    }
}
