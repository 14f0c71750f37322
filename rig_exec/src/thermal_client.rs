//! # Thermal Camera Client
//!
//! This module provides networking abstractions to connect to the thermal
//! camera server.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    eqpt::{
        cam::{CamFrame, CamStatus},
        thermal::{ThermalReading, ThermalRequest, ThermalResponse},
    },
    net::{zmq, MonitoredSocket, MonitoredSocketError, NetParams, SocketOptions},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct ThermalClient {
    socket: MonitoredSocket,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum ThermalClientError {
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

    #[error("Unexpected response to a {0} request")]
    UnexpectedResponse(&'static str),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ThermalClient {
    /// Create a new instance of the thermal camera client.
    pub fn new(ctx: &zmq::Context, params: &NetParams) -> Result<Self, ThermalClientError> {
        let socket_options = SocketOptions {
            connect_timeout: 1000,
            heartbeat_ivl: 500,
            heartbeat_ttl: 1000,
            heartbeat_timeout: 1000,
            linger: 1,
            recv_timeout: 5000,
            send_timeout: 10,
            req_correlate: true,
            req_relaxed: true,
            ..Default::default()
        };

        let socket = MonitoredSocket::new(
            ctx,
            zmq::REQ,
            socket_options,
            &params.thermal_endpoint,
        )
        .map_err(ThermalClientError::SocketError)?;

        Ok(Self { socket })
    }

    pub fn open(&mut self) -> Result<(), ThermalClientError> {
        match self.request(&ThermalRequest::Open)? {
            ThermalResponse::Ack => Ok(()),
            ThermalResponse::Error(e) => Err(ThermalClientError::ServerError(e)),
            _ => Err(ThermalClientError::UnexpectedResponse("Open")),
        }
    }

    pub fn close(&mut self) -> Result<(), ThermalClientError> {
        match self.request(&ThermalRequest::Close)? {
            ThermalResponse::Ack => Ok(()),
            ThermalResponse::Error(e) => Err(ThermalClientError::ServerError(e)),
            _ => Err(ThermalClientError::UnexpectedResponse("Close")),
        }
    }

    pub fn status(&mut self) -> Result<CamStatus, ThermalClientError> {
        match self.request(&ThermalRequest::Status)? {
            ThermalResponse::Status(s) => Ok(s),
            ThermalResponse::Error(e) => Err(ThermalClientError::ServerError(e)),
            _ => Err(ThermalClientError::UnexpectedResponse("Status")),
        }
    }

    /// Acquire one radiometric frame, optionally colormapped and with the
    /// hottest point marked.
    pub fn frame(
        &mut self,
        colormap: bool,
        mark_max: bool,
    ) -> Result<CamFrame, ThermalClientError> {
        match self.request(&ThermalRequest::Frame { colormap, mark_max })? {
            ThermalResponse::Frame(f) => Ok(f),
            ThermalResponse::Error(e) => Err(ThermalClientError::ServerError(e)),
            _ => Err(ThermalClientError::UnexpectedResponse("Frame")),
        }
    }

    /// Read the current scene's maximum temperature.
    pub fn reading(&mut self) -> Result<ThermalReading, ThermalClientError> {
        match self.request(&ThermalRequest::Reading)? {
            ThermalResponse::Reading(r) => Ok(r),
            ThermalResponse::Error(e) => Err(ThermalClientError::ServerError(e)),
            _ => Err(ThermalClientError::UnexpectedResponse("Reading")),
        }
    }

    fn request(&mut self, request: &ThermalRequest) -> Result<ThermalResponse, ThermalClientError> {
        // If not connected return now
        if !self.socket.connected() {
            return Err(ThermalClientError::NotConnected);
        }

        let request_str =
            serde_json::to_string(request).map_err(ThermalClientError::SerializationError)?;

        self.socket
            .send(&request_str, 0)
            .map_err(ThermalClientError::SendError)?;

        let msg = self
            .socket
            .recv_msg(0)
            .map_err(ThermalClientError::RecvError)?;

        let response_str = msg.as_str().ok_or(ThermalClientError::NonUtf8Response)?;

        serde_json::from_str(response_str).map_err(ThermalClientError::DeserializeError)
    }
}
