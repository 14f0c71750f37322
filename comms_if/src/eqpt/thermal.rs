//! # Thermal Camera Equipment Communications Module

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use super::cam::{CamFrame, CamStatus};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A spot temperature reading from the thermal camera
#[derive(Debug, Serialize, Deserialize, Copy, Clone)]
pub struct ThermalReading {
    /// Highest temperature in the current scene, degrees Celsius
    pub max_temperature_c: f64,

    /// Pixel coordinates of the hottest point
    pub max_point: (u32, u32),
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Request to be sent by the thermal client to the thermal camera server
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum ThermalRequest {
    /// Open the sensor
    Open,

    /// Close the sensor
    Close,

    /// Report the sensor state
    Status,

    /// Acquire one radiometric frame. With `colormap` the frame is rendered
    /// through the server's palette; with `mark_max` the hottest point is
    /// annotated on the image.
    Frame { colormap: bool, mark_max: bool },

    /// Read the current scene's maximum temperature
    Reading,
}

/// Response sent by the thermal camera server to its client
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum ThermalResponse {
    /// The open/close request was actuated
    Ack,

    /// Sensor state
    Status(CamStatus),

    /// A frame acquired in response to a `Frame` request
    Frame(CamFrame),

    /// A temperature reading
    Reading(ThermalReading),

    /// The server could not service the request
    Error(String),
}
