//! # Communications interface crate.
//!
//! Provides all common communications interfaces for the imaging rig
//! software: the network layer, the device controller (PLC) register
//! vocabulary, equipment server protocols and the control surface commands.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Control surface command and response definitions
pub mod ctl;

/// Command and response definitions for equipment (cameras, thermal, store)
pub mod eqpt;

/// Network module
pub mod net;

/// Device controller (PLC) register space and link interface
pub mod plc;
