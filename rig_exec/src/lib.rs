//! # Rig library.
//!
//! This library allows other crates and binaries in the workspace to access
//! items defined inside the rig executive crate.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Camera clients - talk to the PTZ camera server and the fixed camera servers
pub mod cam_client;

/// Control server - accepts operator commands over the network
pub mod ctl_server;

/// Shared executable context threaded through the main loop
pub mod ctx;

/// Controller handshake - heartbeat, telemetry and the work register protocol
pub mod handshake;

/// Task history store - provenance rows and taught bearing targets
pub mod history;

/// Obstacle capture - body camera snapshots on the obstacle signal's edge
pub mod obstacle;

/// Executable parameters and the scan grid schema
pub mod params;

/// PLC bridge client - register reads and writes against the AMR's controller
pub mod plc_client;

/// PTZ convergence controller
pub mod ptz_ctrl;

/// Artifact store client
pub mod store_client;

/// Artifact sync manager - resumable uploads and the stranded-folder sweep
pub mod sync_mgr;

/// Task execution engine - slots, trigger, workers and manifests
pub mod task_exec;

/// Thermal imager client
pub mod thermal_client;
