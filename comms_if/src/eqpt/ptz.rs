//! # PTZ Camera Equipment Communications Module
//!
//! Protocol spoken by the pan-tilt-zoom camera server. Extends the fixed
//! camera operations with absolute moves, axis status and clip recording.
//!
//! Axis values on the wire are in the device's normalized command space
//! (pan ∈ [-1, 1], tilt ∈ [-0.3, 0.9], zoom ∈ [0, 1]), not degrees; the
//! degree mapping lives with the convergence controller.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::{serde::ts_milliseconds, DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::cam::{CamFrame, CamStatus, ImageFormat};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A triple of normalized axis values, either commanded or observed.
#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq)]
pub struct PtzSample {
    pub pan: f64,
    pub tilt: f64,
    pub zoom: f64,
}

/// A recorded video clip
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClipData {
    /// UTC timestamp at which recording started
    #[serde(with = "ts_milliseconds")]
    pub timestamp: DateTime<Utc>,

    /// MP4 data of the clip
    pub data: Vec<u8>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Request to be sent by the PTZ client to the PTZ camera server
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum PtzRequest {
    /// Open the camera's stream
    Open,

    /// Close the camera's stream
    Close,

    /// Report the stream state
    Status,

    /// Acquire one frame in the given format
    Frame { format: ImageFormat },

    /// Issue an absolute move to the given axis values
    AbsMove(PtzSample),

    /// Report the current axis values
    PtzStatus,

    /// Record a clip of the given length at the current position
    Clip { seconds: u32 },
}

/// Response sent by the PTZ camera server to its client
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum PtzResponse {
    /// Whether an open/close/move request was accepted by the device
    Ack { accepted: bool },

    /// Stream state
    Status(CamStatus),

    /// A frame acquired in response to a `Frame` request
    Frame(CamFrame),

    /// Current axis values
    Ptz(PtzSample),

    /// A recorded clip
    Clip(ClipData),

    /// The server could not service the request, for example because the
    /// device returned an unreadable axis status
    Error(String),
}
