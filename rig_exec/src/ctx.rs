//! # Shared Executable Context
//!
//! Everything the poll tick and the control command processor work over:
//! parameters, equipment clients, the task registry and the caches refreshed
//! each cycle. Built once in `main` and threaded through by mutable borrow;
//! task workers and background jobs get clones of the cloneable pieces
//! rather than a borrow of the context.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    path::PathBuf,
    sync::{atomic::AtomicBool, Arc},
};

use comms_if::net::{zmq, NetParams};
use util::session::Session;

use crate::{
    cam_client::{CamClient, PtzCamClient},
    history::HistoryStore,
    obstacle::ObstacleCapture,
    params::{RigExecParams, ScanGrid},
    plc_client::{AmrTelemetry, PlcClient},
    ptz_ctrl::PtzCtrl,
    task_exec::TaskRegistry,
    thermal_client::ThermalClient,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct RigContext {
    pub params: RigExecParams,
    pub net_params: NetParams,

    pub zmq_ctx: zmq::Context,
    pub session: Session,

    pub plc: PlcClient,
    pub ptz_cam: PtzCamClient,
    pub aux_cam: CamClient,
    pub thermal: ThermalClient,

    pub history: HistoryStore,

    /// Kept so the tick can reopen the store if its connection goes bad
    pub history_path: PathBuf,

    pub registry: Arc<TaskRegistry>,
    pub ptz_ctrl: PtzCtrl,

    pub panorama_grid: ScanGrid,
    pub target_grid: ScanGrid,

    /// Last telemetry batch successfully read, `None` until the first one
    pub telemetry: Option<AmrTelemetry>,

    pub obstacle: ObstacleCapture,

    /// In-flight guard for the AMR stop retry thread
    pub stop_retry_guard: Arc<AtomicBool>,
}
