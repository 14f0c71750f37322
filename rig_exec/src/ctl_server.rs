//! # Control Server Module
//!
//! This module abstracts over the networking side of the operator control
//! surface. The server accepts connections from the web backend, allowing
//! commands to be recieved and their responses returned over a REP socket.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::warn;

use comms_if::{
    ctl::{CtlCmd, CtlParseError, CtlResponse},
    net::{zmq, MonitoredSocket, MonitoredSocketError, NetParams, SocketOptions},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// An abstraction over the networking part of the control surface.
///
/// Commands arrive as JSON over REQ/REP; every received command must be
/// answered with exactly one response before the next can be read.
pub struct CtlServer {
    cmd_socket: MonitoredSocket,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Errors which can occur in the [`CtlServer`]
#[derive(thiserror::Error, Debug)]
pub enum CtlServerError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("Could not send the response to the client: {0}")]
    SendError(zmq::Error),

    #[error("Could not serialize the response: {0}")]
    SerializationError(serde_json::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl CtlServer {
    /// Create a new instance of the control server.
    ///
    /// This function will not wait for a connection from a client before
    /// returning. The receive timeout is short since the main loop polls
    /// this socket every cycle.
    pub fn new(ctx: &zmq::Context, params: &NetParams) -> Result<Self, CtlServerError> {
        let cmd_socket_options = SocketOptions {
            bind: true,
            block_on_first_connect: false,
            recv_timeout: 10,
            send_timeout: 10,
            ..Default::default()
        };

        let cmd_socket =
            MonitoredSocket::new(ctx, zmq::REP, cmd_socket_options, &params.ctl_endpoint)
                .map_err(CtlServerError::SocketError)?;

        Ok(Self { cmd_socket })
    }

    /// Retrieve one command from the client, if one is waiting.
    ///
    /// The caller MUST answer a `Some` with [`respond`](Self::respond)
    /// before calling this again, REP sockets enforce the alternation.
    ///
    /// `None` means no command is waiting. `Some(Err)` means a client sent
    /// something unparseable and still expects a response.
    pub fn receive(&mut self) -> Option<Result<CtlCmd, CtlParseError>> {
        let msg = match self.cmd_socket.recv_msg(0) {
            Ok(msg) => msg,
            Err(_) => return None,
        };

        let cmd_str = match msg.as_str() {
            Some(s) => s,
            None => {
                warn!("A control command was not valid UTF-8");
                return Some(Err(CtlParseError::NonUtf8Cmd));
            }
        };

        Some(CtlCmd::from_json(cmd_str))
    }

    /// Send the response to the command last received.
    pub fn respond(&mut self, response: &CtlResponse) -> Result<(), CtlServerError> {
        let resp_str = response
            .to_json()
            .map_err(CtlServerError::SerializationError)?;

        self.cmd_socket
            .send(&resp_str, 0)
            .map_err(CtlServerError::SendError)
    }
}
