//! Generic parameters functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{read_to_string, write};
use thiserror::Error;
use toml;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// An error that occurs during loading of a parameter file.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("The software root environment variable (SENTRY_SW_ROOT) is not set")]
    SwRootNotSet,

    #[error("Cannot load the parmeter file: {0}")]
    FileLoadError(std::io::Error),

    #[error("Cannot read the parameter file: {0}")]
    DeserialiseError(toml::de::Error),
}

/// An error that occurs while writing a parameter file back to disk.
#[derive(Debug, Error)]
pub enum SaveError {
    #[error("The software root environment variable (SENTRY_SW_ROOT) is not set")]
    SwRootNotSet,

    #[error("Cannot write the parameter file: {0}")]
    FileWriteError(std::io::Error),

    #[error("Cannot serialise the parameters: {0}")]
    SerialiseError(toml::ser::Error),
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Load a parameter file
///
/// The file path is relative to the "sentry_sw/params" directory
pub fn load<P>(param_file_path: &str) -> Result<P, LoadError>
where
    P: DeserializeOwned,
{
    // Get the params dir
    let mut path = crate::host::get_sentry_sw_root().map_err(|_| LoadError::SwRootNotSet)?;
    path.push("params");
    path.push(param_file_path);

    // Load the file into a string
    let params_str = match read_to_string(path) {
        Ok(s) => s,
        Err(e) => return Err(LoadError::FileLoadError(e)),
    };

    // Parse the string into the parameter struct
    match toml::from_str(params_str.as_str()) {
        Ok(p) => Ok(p),
        Err(e) => Err(LoadError::DeserialiseError(e)),
    }
}

/// Write a parameter struct back to its file.
///
/// Used by operations which persist operator edits (for example scan grid
/// changes), so that the new values survive a restart. Comments in the
/// original file are not preserved.
pub fn save<P>(param_file_path: &str, params: &P) -> Result<(), SaveError>
where
    P: Serialize,
{
    let mut path = crate::host::get_sentry_sw_root().map_err(|_| SaveError::SwRootNotSet)?;
    path.push("params");
    path.push(param_file_path);

    let params_str = match toml::to_string_pretty(params) {
        Ok(s) => s,
        Err(e) => return Err(SaveError::SerialiseError(e)),
    };

    match write(path, params_str) {
        Ok(_) => Ok(()),
        Err(e) => Err(SaveError::FileWriteError(e)),
    }
}
