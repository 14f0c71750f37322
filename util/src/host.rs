//! Host environment utilities

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::path::PathBuf;
use thiserror::Error;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Name of the environment variable which points at the root of the software
/// directory structure.
pub const SW_ROOT_ENV_VAR: &str = "SENTRY_SW_ROOT";

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors associated with the host environment.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("The software root environment variable (SENTRY_SW_ROOT) is not set")]
    SwRootNotSet,
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Get the path to the root of the sentry_sw directory structure.
///
/// The root holds the `params` and `sessions` directories as well as the
/// local artifact staging directories, and is given by the `SENTRY_SW_ROOT`
/// environment variable.
pub fn get_sentry_sw_root() -> Result<PathBuf, HostError> {
    match std::env::var(SW_ROOT_ENV_VAR) {
        Ok(v) => Ok(PathBuf::from(v)),
        Err(_) => Err(HostError::SwRootNotSet),
    }
}
