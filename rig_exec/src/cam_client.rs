//! # Camera Clients
//!
//! This module provides networking abstractions to connect to the camera
//! servers: [`CamClient`] for the fixed cameras (the auxiliary stream camera
//! and the AMR's four body cameras) and [`PtzCamClient`] for the pan-tilt-zoom
//! camera, which additionally accepts absolute moves, axis status queries and
//! clip recordings.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    eqpt::{
        cam::{CamFrame, CamRequest, CamResponse, CamStatus, ImageFormat},
        ptz::{ClipData, PtzRequest, PtzResponse, PtzSample},
    },
    net::{zmq, MonitoredSocket, MonitoredSocketError, NetParams, SocketOptions},
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Receive timeout on camera request sockets. Frame acquisition is expected
/// to be well inside this.
const CAM_RECV_TIMEOUT_MS: i32 = 5000;

/// Extra wait allowed on top of a clip's length before the clip response is
/// considered lost.
const CLIP_RECV_MARGIN_MS: i32 = 10_000;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Client for a fixed camera server.
pub struct CamClient {
    socket: MonitoredSocket,
}

/// Client for the PTZ camera server.
pub struct PtzCamClient {
    socket: MonitoredSocket,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum CamClientError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("The client is not connected to the server")]
    NotConnected,

    #[error("Could not send the request to the server: {0}")]
    SendError(zmq::Error),

    #[error("Could not recieve a message from the server: {0}")]
    RecvError(zmq::Error),

    #[error("Could not serialize the request: {0}")]
    SerializationError(serde_json::Error),

    #[error("Could not deserialize the response from the server: {0}")]
    DeserializeError(serde_json::Error),

    #[error("The server's response was not valid UTF-8")]
    NonUtf8Response,

    #[error("The server reported an error: {0}")]
    ServerError(String),

    #[error("The device refused the request")]
    Refused,

    #[error("Unexpected response to a {0} request")]
    UnexpectedResponse(&'static str),

    #[error("Could not set the receive timeout: {0}")]
    TimeoutSetError(zmq::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl CamClient {
    /// Create a new fixed camera client for the server at `endpoint`.
    ///
    /// The endpoint is passed in rather than drawn from [`NetParams`] since
    /// five cameras share this client type.
    pub fn new(ctx: &zmq::Context, endpoint: &str) -> Result<Self, CamClientError> {
        let socket = MonitoredSocket::new(ctx, zmq::REQ, cam_socket_options(), endpoint)
            .map_err(CamClientError::SocketError)?;

        Ok(Self { socket })
    }

    pub fn open(&mut self) -> Result<(), CamClientError> {
        match self.request(&CamRequest::Open)? {
            CamResponse::Ack => Ok(()),
            CamResponse::Error(e) => Err(CamClientError::ServerError(e)),
            _ => Err(CamClientError::UnexpectedResponse("Open")),
        }
    }

    pub fn close(&mut self) -> Result<(), CamClientError> {
        match self.request(&CamRequest::Close)? {
            CamResponse::Ack => Ok(()),
            CamResponse::Error(e) => Err(CamClientError::ServerError(e)),
            _ => Err(CamClientError::UnexpectedResponse("Close")),
        }
    }

    pub fn status(&mut self) -> Result<CamStatus, CamClientError> {
        match self.request(&CamRequest::Status)? {
            CamResponse::Status(s) => Ok(s),
            CamResponse::Error(e) => Err(CamClientError::ServerError(e)),
            _ => Err(CamClientError::UnexpectedResponse("Status")),
        }
    }

    /// Acquire one frame from the camera.
    pub fn frame(&mut self, format: ImageFormat) -> Result<CamFrame, CamClientError> {
        match self.request(&CamRequest::Frame { format })? {
            CamResponse::Frame(f) => Ok(f),
            CamResponse::Error(e) => Err(CamClientError::ServerError(e)),
            _ => Err(CamClientError::UnexpectedResponse("Frame")),
        }
    }

    fn request(&mut self, request: &CamRequest) -> Result<CamResponse, CamClientError> {
        // If not connected return now
        if !self.socket.connected() {
            return Err(CamClientError::NotConnected);
        }

        let request_str =
            serde_json::to_string(request).map_err(CamClientError::SerializationError)?;

        self.socket
            .send(&request_str, 0)
            .map_err(CamClientError::SendError)?;

        let msg = self.socket.recv_msg(0).map_err(CamClientError::RecvError)?;

        let response_str = msg.as_str().ok_or(CamClientError::NonUtf8Response)?;

        serde_json::from_str(response_str).map_err(CamClientError::DeserializeError)
    }
}

impl PtzCamClient {
    /// Create a new PTZ camera client.
    pub fn new(ctx: &zmq::Context, params: &NetParams) -> Result<Self, CamClientError> {
        let socket = MonitoredSocket::new(
            ctx,
            zmq::REQ,
            cam_socket_options(),
            &params.ptz_cam_endpoint,
        )
        .map_err(CamClientError::SocketError)?;

        Ok(Self { socket })
    }

    pub fn open(&mut self) -> Result<(), CamClientError> {
        match self.request(&PtzRequest::Open)? {
            PtzResponse::Ack { accepted: true } => Ok(()),
            PtzResponse::Ack { accepted: false } => Err(CamClientError::Refused),
            PtzResponse::Error(e) => Err(CamClientError::ServerError(e)),
            _ => Err(CamClientError::UnexpectedResponse("Open")),
        }
    }

    pub fn close(&mut self) -> Result<(), CamClientError> {
        match self.request(&PtzRequest::Close)? {
            PtzResponse::Ack { .. } => Ok(()),
            PtzResponse::Error(e) => Err(CamClientError::ServerError(e)),
            _ => Err(CamClientError::UnexpectedResponse("Close")),
        }
    }

    pub fn status(&mut self) -> Result<CamStatus, CamClientError> {
        match self.request(&PtzRequest::Status)? {
            PtzResponse::Status(s) => Ok(s),
            PtzResponse::Error(e) => Err(CamClientError::ServerError(e)),
            _ => Err(CamClientError::UnexpectedResponse("Status")),
        }
    }

    /// Acquire one frame from the camera at its current attitude.
    pub fn frame(&mut self, format: ImageFormat) -> Result<CamFrame, CamClientError> {
        match self.request(&PtzRequest::Frame { format })? {
            PtzResponse::Frame(f) => Ok(f),
            PtzResponse::Error(e) => Err(CamClientError::ServerError(e)),
            _ => Err(CamClientError::UnexpectedResponse("Frame")),
        }
    }

    /// Issue an absolute move in normalized axis values.
    ///
    /// Returns whether the device accepted the move. The caller polls
    /// [`PtzCamClient::ptz_status`] for convergence.
    pub fn abs_move(&mut self, sample: PtzSample) -> Result<bool, CamClientError> {
        match self.request(&PtzRequest::AbsMove(sample))? {
            PtzResponse::Ack { accepted } => Ok(accepted),
            PtzResponse::Error(e) => Err(CamClientError::ServerError(e)),
            _ => Err(CamClientError::UnexpectedResponse("AbsMove")),
        }
    }

    /// Read the current axis values.
    pub fn ptz_status(&mut self) -> Result<PtzSample, CamClientError> {
        match self.request(&PtzRequest::PtzStatus)? {
            PtzResponse::Ptz(sample) => Ok(sample),
            PtzResponse::Error(e) => Err(CamClientError::ServerError(e)),
            _ => Err(CamClientError::UnexpectedResponse("PtzStatus")),
        }
    }

    /// Record a clip of the given length at the current attitude.
    ///
    /// The receive timeout is widened to cover the recording and restored
    /// afterwards.
    pub fn record_clip(&mut self, seconds: u32) -> Result<ClipData, CamClientError> {
        self.socket
            .set_rcvtimeo(seconds as i32 * 1000 + CLIP_RECV_MARGIN_MS)
            .map_err(CamClientError::TimeoutSetError)?;

        let result = match self.request(&PtzRequest::Clip { seconds }) {
            Ok(PtzResponse::Clip(clip)) => Ok(clip),
            Ok(PtzResponse::Error(e)) => Err(CamClientError::ServerError(e)),
            Ok(_) => Err(CamClientError::UnexpectedResponse("Clip")),
            Err(e) => Err(e),
        };

        self.socket
            .set_rcvtimeo(CAM_RECV_TIMEOUT_MS)
            .map_err(CamClientError::TimeoutSetError)?;

        result
    }

    fn request(&mut self, request: &PtzRequest) -> Result<PtzResponse, CamClientError> {
        // If not connected return now
        if !self.socket.connected() {
            return Err(CamClientError::NotConnected);
        }

        let request_str =
            serde_json::to_string(request).map_err(CamClientError::SerializationError)?;

        self.socket
            .send(&request_str, 0)
            .map_err(CamClientError::SendError)?;

        let msg = self.socket.recv_msg(0).map_err(CamClientError::RecvError)?;

        let response_str = msg.as_str().ok_or(CamClientError::NonUtf8Response)?;

        serde_json::from_str(response_str).map_err(CamClientError::DeserializeError)
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn cam_socket_options() -> SocketOptions {
    SocketOptions {
        connect_timeout: 1000,
        heartbeat_ivl: 500,
        heartbeat_ttl: 1000,
        heartbeat_timeout: 1000,
        linger: 1,
        recv_timeout: CAM_RECV_TIMEOUT_MS,
        send_timeout: 10,
        req_correlate: true,
        req_relaxed: true,
        ..Default::default()
    }
}
