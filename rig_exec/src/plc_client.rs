//! # PLC Bridge Client
//!
//! This module provides networking abstractions to connect to the device
//! controller's register bridge, and the batched telemetry read the poll tick
//! performs over it.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Serialize;

use comms_if::{
    net::{zmq, MonitoredSocket, NetParams, SocketOptions},
    plc::{regs, PlcError, PlcLink, PlcRequest, PlcResponse, PlcValue},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct PlcClient {
    socket: MonitoredSocket,
}

/// One batch of AMR telemetry read from the controller's registers.
///
/// Captured once per poll tick and snapshotted by task starts; the snapshot
/// keys the task's storage path for its whole lifetime.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct AmrTelemetry {
    pub pos_x: i32,
    pub pos_y: i32,

    /// Lift height, used as the z coordinate
    pub pos_z: i32,

    /// Heading in degrees. The register holds milli-degrees.
    pub heading_deg: f64,

    /// Identifier of the location tag the AMR last docked at
    pub tag_id: i32,

    /// Manual control flags, reported through the status surface
    pub manual_disabled: bool,
    pub auto_mode: bool,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl PlcClient {
    /// Create a new instance of the PLC bridge client.
    pub fn new(ctx: &zmq::Context, params: &NetParams) -> Result<Self, PlcError> {
        // Create the socket options
        let socket_options = SocketOptions {
            connect_timeout: 1000,
            heartbeat_ivl: 500,
            heartbeat_ttl: 1000,
            heartbeat_timeout: 1000,
            linger: 1,
            recv_timeout: 1000,
            send_timeout: 10,
            req_correlate: true,
            req_relaxed: true,
            ..Default::default()
        };

        // Create the socket
        let socket = MonitoredSocket::new(ctx, zmq::REQ, socket_options, &params.plc_endpoint)
            .map_err(PlcError::SocketError)?;

        Ok(Self { socket })
    }

    /// Perform one request/response exchange with the bridge.
    fn request(&mut self, request: &PlcRequest) -> Result<PlcResponse, PlcError> {
        // If not connected return now
        if !self.socket.connected() {
            return Err(PlcError::NotConnected);
        }

        let request_str =
            serde_json::to_string(request).map_err(PlcError::SerializationError)?;

        self.socket
            .send(&request_str, 0)
            .map_err(PlcError::SendError)?;

        let msg = self.socket.recv_msg(0).map_err(PlcError::RecvError)?;

        let response_str = msg.as_str().ok_or(PlcError::NonUtf8Response)?;

        serde_json::from_str(response_str).map_err(PlcError::DeserializeError)
    }
}

impl PlcLink for PlcClient {
    fn read_variable(&mut self, name: &str) -> Result<PlcValue, PlcError> {
        match self.request(&PlcRequest::Read { name: name.into() })? {
            PlcResponse::Value(value) => Ok(value),
            PlcResponse::Error(e) => Err(PlcError::Rejected(e)),
            _ => Err(PlcError::UnexpectedResponse("Read")),
        }
    }

    fn write_variable(&mut self, name: &str, value: PlcValue) -> Result<(), PlcError> {
        match self.request(&PlcRequest::Write {
            name: name.into(),
            value,
        })? {
            PlcResponse::WriteOk => Ok(()),
            PlcResponse::Error(e) => Err(PlcError::Rejected(e)),
            _ => Err(PlcError::UnexpectedResponse("Write")),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Read one batch of AMR telemetry.
///
/// Either the whole batch succeeds or the error of the first failed read is
/// returned and the caller keeps its previous values.
pub fn read_telemetry(plc: &mut dyn PlcLink) -> Result<AmrTelemetry, PlcError> {
    let pos_x = plc.read_int(regs::POSITION_X)?;
    let pos_y = plc.read_int(regs::POSITION_Y)?;
    let pos_z = plc.read_int(regs::LIFT_HEIGHT)?;
    let yaw_milli_deg = plc.read_int(regs::POSITION_YAW)?;
    let tag_id = plc.read_int(regs::POSITION_TAG_ID)?;
    let manual_disabled = plc.read_bool(regs::MANUAL_DISABLE_STATUS)?;
    let auto_mode = plc.read_bool(regs::AUTO_MANUAL_STATUS)?;

    Ok(AmrTelemetry {
        pos_x,
        pos_y,
        pos_z,
        heading_deg: yaw_milli_deg as f64 / 1000.0,
        tag_id,
        manual_disabled,
        auto_mode,
    })
}
