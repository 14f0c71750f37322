//! # Artifact Store Client
//!
//! This module provides networking abstractions to connect to the remote
//! artifact store. Connections are acquired per sync call and dropped when
//! the call completes; there is no pooling and no connection is shared across
//! threads.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    eqpt::store::{ArtifactStore, StoreError, StoreRequest, StoreResponse},
    net::{zmq, MonitoredSocket, NetParams, SocketOptions},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct StoreClient {
    socket: MonitoredSocket,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl StoreClient {
    /// Connect to the store and authenticate.
    ///
    /// Fails without any partial state if the connection or the credentials
    /// are refused.
    pub fn connect(
        ctx: &zmq::Context,
        params: &NetParams,
        user: &str,
        password: &str,
    ) -> Result<Self, StoreError> {
        let socket_options = SocketOptions {
            connect_timeout: 2000,
            linger: 1,
            recv_timeout: 10_000,
            send_timeout: 1000,
            req_correlate: true,
            req_relaxed: true,
            ..Default::default()
        };

        let socket = MonitoredSocket::new(ctx, zmq::REQ, socket_options, &params.store_endpoint)
            .map_err(StoreError::SocketError)?;

        let mut client = Self { socket };

        match client.request(&StoreRequest::Auth {
            user: user.into(),
            password: password.into(),
        })? {
            StoreResponse::Ok => Ok(client),
            StoreResponse::Error(e) => Err(StoreError::AuthRefused(e)),
            _ => Err(StoreError::UnexpectedResponse("Auth")),
        }
    }

    fn request(&mut self, request: &StoreRequest) -> Result<StoreResponse, StoreError> {
        // If not connected return now
        if !self.socket.connected() {
            return Err(StoreError::NotConnected);
        }

        let request_str = serde_json::to_string(request).map_err(StoreError::SerializationError)?;

        self.socket
            .send(&request_str, 0)
            .map_err(StoreError::SendError)?;

        let msg = self.socket.recv_msg(0).map_err(StoreError::RecvError)?;

        let response_str = msg.as_str().ok_or(StoreError::NonUtf8Response)?;

        serde_json::from_str(response_str).map_err(StoreError::DeserializeError)
    }
}

impl ArtifactStore for StoreClient {
    fn list_dir(&mut self, path: &str) -> Result<Vec<String>, StoreError> {
        match self.request(&StoreRequest::List { path: path.into() })? {
            StoreResponse::Entries(entries) => Ok(entries),
            StoreResponse::Error(e) => Err(StoreError::Rejected(e)),
            _ => Err(StoreError::UnexpectedResponse("List")),
        }
    }

    fn make_dir(&mut self, path: &str) -> Result<(), StoreError> {
        match self.request(&StoreRequest::MakeDir { path: path.into() })? {
            StoreResponse::Ok => Ok(()),
            StoreResponse::Error(e) => Err(StoreError::Rejected(e)),
            _ => Err(StoreError::UnexpectedResponse("MakeDir")),
        }
    }

    fn put_file(&mut self, path: &str, data: &[u8]) -> Result<(), StoreError> {
        match self.request(&StoreRequest::Put {
            path: path.into(),
            data: data.to_vec(),
        })? {
            StoreResponse::Ok => Ok(()),
            StoreResponse::Error(e) => Err(StoreError::Rejected(e)),
            _ => Err(StoreError::UnexpectedResponse("Put")),
        }
    }
}
