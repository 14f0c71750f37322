//! # Camera Equipment Communications Module
//!
//! Common frame types plus the protocol spoken by the fixed cameras (the
//! auxiliary stream camera and the AMR's four body cameras). The PTZ camera
//! speaks the extended protocol in [`crate::eqpt::ptz`].

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::{serde::ts_milliseconds, DateTime, Utc};
use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// An individual frame from a camera
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CamFrame {
    /// UTC timestamp at which the frame was acquired
    #[serde(with = "ts_milliseconds")]
    pub timestamp: DateTime<Utc>,

    /// The format of this frame
    pub format: ImageFormat,

    /// The formatted image data
    pub data: Vec<u8>,
}

/// Stream state reported by a camera server
#[derive(Debug, Serialize, Deserialize, Copy, Clone)]
pub struct CamStatus {
    /// True if the camera's stream is open and delivering frames
    pub running: bool,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Request to be sent by a camera client to a fixed camera server
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum CamRequest {
    /// Open the camera's stream
    Open,

    /// Close the camera's stream
    Close,

    /// Report the stream state
    Status,

    /// Acquire one frame in the given format
    Frame { format: ImageFormat },
}

/// Response sent by a fixed camera server to its client
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum CamResponse {
    /// The open/close request was actuated
    Ack,

    /// Stream state
    Status(CamStatus),

    /// A frame acquired in response to a `Frame` request
    Frame(CamFrame),

    /// The server could not service the request
    Error(String),
}

/// The AMR's four body cameras, used for obstacle captures
#[derive(Debug, Serialize, Deserialize, Copy, Clone, Hash, Eq, PartialEq)]
pub enum CamView {
    Front,
    Back,
    Left,
    Right,
}

/// Possible formats for camera images. A restricted set so both ends agree on
/// what can be sent back and forth.
#[derive(Debug, Serialize, Deserialize, Copy, Clone)]
pub enum ImageFormat {
    /// PNG image
    Png,

    /// JPEG image with a quality value between 1 and 100, where 100 is best.
    Jpeg(u8),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl CamView {
    /// All views in capture order
    pub fn all() -> [CamView; 4] {
        [CamView::Front, CamView::Back, CamView::Left, CamView::Right]
    }

    /// The file name an obstacle capture from this view is saved under
    pub fn file_name(self) -> &'static str {
        match self {
            CamView::Front => "front_camera.jpg",
            CamView::Back => "back_camera.jpg",
            CamView::Left => "left_camera.jpg",
            CamView::Right => "right_camera.jpg",
        }
    }
}

impl ImageFormat {
    /// The file extension conventionally used for this format
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg(_) => "jpg",
        }
    }
}
