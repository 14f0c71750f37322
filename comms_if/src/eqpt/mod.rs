//! # Equipment Interface
//!
//! This module defines the interface structures which are exchanged with the
//! rig's equipment servers: the PTZ camera, the fixed cameras on the AMR
//! body, the thermal camera and the remote artifact store.

// -----------------------------------------------------------------------------------------------
// MODULES
// -----------------------------------------------------------------------------------------------

pub mod cam;
pub mod ptz;
pub mod store;
pub mod thermal;
