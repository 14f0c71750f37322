//! # Artifact Store Communications Module
//!
//! Protocol spoken by the remote artifact store, which keeps the delivered
//! task media. The verb set is deliberately small: authenticate, list a
//! directory, create a directory, put a file. Remote paths are `/`-joined
//! segment strings relative to the store's root.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Request to be sent by the store client to the store server
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum StoreRequest {
    /// Authenticate this connection. Must be the first request after
    /// connecting; every other request is refused until it succeeds.
    Auth { user: String, password: String },

    /// List the entry names directly under the given remote directory
    List { path: String },

    /// Create the given remote directory
    MakeDir { path: String },

    /// Store a file at the given remote path
    Put { path: String, data: Vec<u8> },
}

/// Response sent by the store server to its client
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum StoreResponse {
    /// The request was actuated
    Ok,

    /// Entry names for a `List` request
    Entries(Vec<String>),

    /// The server refused or could not service the request
    Error(String),
}

/// Errors raised by an [`ArtifactStore`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Socket error: {0}")]
    SocketError(crate::net::MonitoredSocketError),

    #[error("The store connection could not be established")]
    NotConnected,

    #[error("The store refused the credentials: {0}")]
    AuthRefused(String),

    #[error("Could not send the request to the store: {0}")]
    SendError(zmq::Error),

    #[error("Could not recieve a response from the store: {0}")]
    RecvError(zmq::Error),

    #[error("Could not serialize the request: {0}")]
    SerializationError(serde_json::Error),

    #[error("Could not deserialize the store's response: {0}")]
    DeserializeError(serde_json::Error),

    #[error("The store's response was not valid UTF-8")]
    NonUtf8Response,

    #[error("The store rejected the request: {0}")]
    Rejected(String),

    #[error("Unexpected response to a {0} request")]
    UnexpectedResponse(&'static str),
}

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Capability interface over the store's verb set.
///
/// The sync manager drives this trait rather than a concrete client, so that
/// its upload and recovery logic can be exercised against an in-memory store.
pub trait ArtifactStore {
    /// List the entry names directly under `path` ("" is the store root)
    fn list_dir(&mut self, path: &str) -> Result<Vec<String>, StoreError>;

    /// Create the directory at `path`; parents must already exist
    fn make_dir(&mut self, path: &str) -> Result<(), StoreError>;

    /// Store a file at `path`
    fn put_file(&mut self, path: &str, data: &[u8]) -> Result<(), StoreError>;
}
