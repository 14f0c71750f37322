//! # Device Controller (PLC) Interface
//!
//! Defines the register vocabulary shared with the AMR's supervisory
//! controller, the value/command/status types carried by those registers, the
//! wire messages spoken to the controller bridge, and the [`PlcLink`]
//! capability interface which everything above the wire programs against.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// REGISTER SYMBOLS
// ------------------------------------------------------------------------------------------------

/// Symbol names of the controller's shared registers.
///
/// These are the controller's own global variable list (GVL) symbols and must
/// match the PLC program exactly.
pub mod regs {
    /// AMR liveness heart bit, toggled 0/1 by the rig every poll tick
    pub const HEART_BIT: &str = "GVL.ExternalDevice1.bFromExternalDeviceHartBit";

    /// AMR position telemetry
    pub const POSITION_X: &str = "GVL.nCar_PositionX";
    pub const POSITION_Y: &str = "GVL.nCar_PositionY";
    pub const LIFT_HEIGHT: &str = "GVL.nCarLiftHeight";
    /// Heading in milli-degrees
    pub const POSITION_YAW: &str = "GVL.nCar_PositionYaw";
    pub const POSITION_TAG_ID: &str = "GVL.nCar_PositionTagID";

    /// Work handshake registers
    pub const WORK_STATUS: &str = "GVL.CameraWorkStatus";
    pub const TO_WORK_COMMAND: &str = "GVL.ToCameraWorkCommand";
    pub const FROM_WORK_COMMAND: &str = "GVL.FromCameraWorkCommand";

    /// Manual control status flags
    pub const MANUAL_DISABLE_STATUS: &str = "GVL.bWeb_ManualSemiControlDisableStatus";
    pub const AUTO_MANUAL_STATUS: &str = "GVL.bWeb_AutoManualStatus";
    pub const AUTO_MANUAL_SWITCH: &str = "GVL.bWeb_AutoManualSwitch";

    /// Manual control drive buttons
    pub const MANUAL_ENABLE: &str = "GVL.bWeb_ManualSemiControlEnable";
    pub const MANUAL_FORWARD_BUTTON: &str = "GVL.bWeb_ManualSemiControlForwardButton";
    pub const MANUAL_BACKWARD_BUTTON: &str = "GVL.bWeb_ManualSemiControlBackwardButton";
    pub const MANUAL_LEFT_BUTTON: &str = "GVL.bWeb_ManualSemiControlLeftButton";
    pub const MANUAL_RIGHT_BUTTON: &str = "GVL.bWeb_ManualSemiControlRightButton";

    /// Web manual control liveness bit, toggled by its own 0.5 s thread
    pub const WEB_CONTROL_HEART_BIT: &str = "GVL.bWeb_ManualSemiControlHartBit";

    /// Obstacle detection signal raised by the AMR's depth camera
    pub const OBSTACLE_SIGNAL: &str = "GVL.bWeb_RealSenseObstacleSignal";

    /// Dock position table written by the position map loader
    pub const POSITION_TABLE: &str = "GVL.PositionForAGVC";
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// A value held in a controller register.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PlcValue {
    Bool(bool),
    Int(i32),
}

/// Imaging work commands the controller can request through
/// [`regs::TO_WORK_COMMAND`].
///
/// The discriminants are the raw register codes and are part of the
/// controller interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkCommand {
    None = 0,
    Designated = 7,
    Thermal = 8,
    Target = 9,
    Panorama = 10,
    Video = 11,
    Initial = 12,
}

/// Work state reported back to the controller through
/// [`regs::WORK_STATUS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkStatus {
    Idle = 0,
    Running = 1,
    Failed = 2,
}

/// Requests sent to the controller bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PlcRequest {
    /// Read the named register
    Read { name: String },

    /// Write a value into the named register
    Write { name: String, value: PlcValue },
}

/// Responses returned by the controller bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PlcResponse {
    /// Value of the register named in a `Read` request
    Value(PlcValue),

    /// A `Write` request was actuated
    WriteOk,

    /// The bridge could not service the request
    Error(String),
}

/// Errors raised by a [`PlcLink`] implementation.
#[derive(Debug, Error)]
pub enum PlcError {
    #[error("Socket error: {0}")]
    SocketError(crate::net::MonitoredSocketError),

    #[error("The link to the device controller is not connected")]
    NotConnected,

    #[error("Could not send the request to the controller: {0}")]
    SendError(zmq::Error),

    #[error("Could not recieve a response from the controller: {0}")]
    RecvError(zmq::Error),

    #[error("Could not serialize the request: {0}")]
    SerializationError(serde_json::Error),

    #[error("Could not deserialize the controller's response: {0}")]
    DeserializeError(serde_json::Error),

    #[error("The controller's response was not valid UTF-8")]
    NonUtf8Response,

    #[error("The controller rejected the request: {0}")]
    Rejected(String),

    #[error("Unexpected response to a {0} request")]
    UnexpectedResponse(&'static str),

    #[error("Register {0} holds a {1} where a {2} was expected")]
    WrongType(String, &'static str, &'static str),
}

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Read/write-by-name access to the controller's register space.
///
/// The handshake controller and every other register user holds a `PlcLink`,
/// composing the capability rather than being a link themselves. Production
/// code uses the zmq bridge client; tests substitute an in-memory register
/// map.
pub trait PlcLink {
    fn read_variable(&mut self, name: &str) -> Result<PlcValue, PlcError>;

    fn write_variable(&mut self, name: &str, value: PlcValue) -> Result<(), PlcError>;

    /// Read a register which must hold an integer.
    fn read_int(&mut self, name: &str) -> Result<i32, PlcError> {
        match self.read_variable(name)? {
            PlcValue::Int(v) => Ok(v),
            v => Err(PlcError::WrongType(name.into(), v.type_name(), "Int")),
        }
    }

    /// Read a register which must hold a boolean.
    fn read_bool(&mut self, name: &str) -> Result<bool, PlcError> {
        match self.read_variable(name)? {
            PlcValue::Bool(v) => Ok(v),
            v => Err(PlcError::WrongType(name.into(), v.type_name(), "Bool")),
        }
    }

    fn write_int(&mut self, name: &str, value: i32) -> Result<(), PlcError> {
        self.write_variable(name, PlcValue::Int(value))
    }
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl PlcValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            PlcValue::Bool(_) => "Bool",
            PlcValue::Int(_) => "Int",
        }
    }
}

impl WorkCommand {
    /// Parse a raw register value, `None` if the code is not a known command.
    pub fn from_register(value: i32) -> Option<Self> {
        match value {
            0 => Some(WorkCommand::None),
            7 => Some(WorkCommand::Designated),
            8 => Some(WorkCommand::Thermal),
            9 => Some(WorkCommand::Target),
            10 => Some(WorkCommand::Panorama),
            11 => Some(WorkCommand::Video),
            12 => Some(WorkCommand::Initial),
            _ => None,
        }
    }

    /// The raw register code of this command.
    pub fn as_register(self) -> i32 {
        self as i32
    }
}

impl WorkStatus {
    pub fn from_register(value: i32) -> Option<Self> {
        match value {
            0 => Some(WorkStatus::Idle),
            1 => Some(WorkStatus::Running),
            2 => Some(WorkStatus::Failed),
            _ => None,
        }
    }

    pub fn as_register(self) -> i32 {
        self as i32
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_work_command_codes() {
        assert_eq!(WorkCommand::from_register(0), Some(WorkCommand::None));
        assert_eq!(WorkCommand::from_register(7), Some(WorkCommand::Designated));
        assert_eq!(WorkCommand::from_register(8), Some(WorkCommand::Thermal));
        assert_eq!(WorkCommand::from_register(9), Some(WorkCommand::Target));
        assert_eq!(WorkCommand::from_register(10), Some(WorkCommand::Panorama));
        assert_eq!(WorkCommand::from_register(11), Some(WorkCommand::Video));
        assert_eq!(WorkCommand::from_register(12), Some(WorkCommand::Initial));
        assert_eq!(WorkCommand::from_register(3), None);

        assert_eq!(WorkCommand::Panorama.as_register(), 10);
        assert_eq!(WorkCommand::None.as_register(), 0);
    }

    #[test]
    fn test_work_status_codes() {
        assert_eq!(WorkStatus::from_register(0), Some(WorkStatus::Idle));
        assert_eq!(WorkStatus::from_register(1), Some(WorkStatus::Running));
        assert_eq!(WorkStatus::from_register(2), Some(WorkStatus::Failed));
        assert_eq!(WorkStatus::from_register(5), None);
        assert_eq!(WorkStatus::Failed.as_register(), 2);
    }
}
