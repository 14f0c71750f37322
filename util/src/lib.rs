//! Utility library for the Sentry imaging rig software

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod host;
pub mod logger;
pub mod maths;
pub mod params;
pub mod session;
pub mod time;

// ---------------------------------------------------------------------------
// REEXPORTS
// ---------------------------------------------------------------------------

pub use comms_if;
