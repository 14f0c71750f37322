//! Main rig-side executable entry point.
//!
//! # Architecture
//!
//! The general execution methodology consists of:
//!
//!     - Initialise all modules and equipment clients
//!     - Main loop (2 Hz):
//!         - Control command processing and handling
//!         - Controller handshake:
//!             - Heartbeat
//!             - Telemetry acquisition
//!             - Obstacle signal edge detection
//!             - Work register exchange
//!
//! Task capture, artifact delivery and obstacle jobs run on their own
//! threads; the main loop only observes their run flags.

// ---------------------------------------------------------------------------
// USE MODULES FROM LIBRARY
// ---------------------------------------------------------------------------

use comms_if::net::NetParams;
use rig_lib::{
    cam_client::{CamClient, PtzCamClient},
    ctl_server::CtlServer,
    ctx::RigContext,
    handshake::HandshakeCtrl,
    history::HistoryStore,
    obstacle::ObstacleCapture,
    params::{RigExecParams, ScanGrid},
    plc_client::PlcClient,
    ptz_ctrl::PtzCtrl,
    task_exec::TaskRegistry,
    thermal_client::ThermalClient,
};

mod tc_processor;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Report};
use log::{info, warn};
use std::sync::{atomic::AtomicBool, Arc};
use std::thread;
use std::time::{Duration, Instant};

// Internal
use comms_if::{
    net::zmq,
    plc::{regs, PlcLink, PlcValue},
};
use util::{
    host,
    logger::{logger_init, LevelFilter},
    session::Session,
};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Target period of one cycle.
const CYCLE_PERIOD_S: f64 = 0.50;

/// Period of the web manual control heartbeat thread.
const WEB_HEARTBEAT_PERIOD: Duration = Duration::from_millis(500);

/// Number of consecutive failed ticks before the loss of the controller is
/// reported as an error rather than a warning.
const MAX_CONSEC_TICK_ERRORS: u64 = 10;

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {
    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new("rig_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(LevelFilter::Trace, &session).wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("Sentry Imaging Rig Executable\n");
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let net_params: NetParams =
        util::params::load("net.toml").wrap_err("Could not load net params")?;

    let params: RigExecParams =
        util::params::load("rig_exec.toml").wrap_err("Could not load rig exec params")?;
    params
        .validate()
        .wrap_err("Rig exec params are not usable")?;

    let panorama_grid: ScanGrid = util::params::load(&params.panorama_grid_file)
        .wrap_err("Could not load the panorama grid")?;
    panorama_grid
        .validate()
        .wrap_err("The panorama grid is not usable")?;

    let target_grid: ScanGrid = util::params::load(&params.target_grid_file)
        .wrap_err("Could not load the target grid")?;
    target_grid
        .validate()
        .wrap_err("The target grid is not usable")?;

    info!("Exec parameters loaded");

    // ---- INITIALISE NETWORK ----

    info!("Initialising network");

    let zmq_ctx = zmq::Context::new();

    let plc = PlcClient::new(&zmq_ctx, &net_params)
        .wrap_err("Failed to initialise the PLC bridge client")?;
    info!("PlcClient initialised");

    let ptz_cam = PtzCamClient::new(&zmq_ctx, &net_params)
        .wrap_err("Failed to initialise the PTZ camera client")?;
    info!("PtzCamClient initialised");

    let aux_cam = CamClient::new(&zmq_ctx, &net_params.aux_cam_endpoint)
        .wrap_err("Failed to initialise the auxiliary camera client")?;
    info!("Auxiliary CamClient initialised");

    let thermal = ThermalClient::new(&zmq_ctx, &net_params)
        .wrap_err("Failed to initialise the thermal imager client")?;
    info!("ThermalClient initialised");

    let mut ctl_server =
        CtlServer::new(&zmq_ctx, &net_params).wrap_err("Failed to initialise the CtlServer")?;
    info!("CtlServer initialised");

    info!("Network initialisation complete");

    // ---- INITIALISE MODULES ----

    let root = host::get_sentry_sw_root().wrap_err("No software root is set")?;

    let history_path = root.join(&params.history_db_file);
    let history =
        HistoryStore::open(&history_path).wrap_err("Failed to open the history database")?;
    info!("History database open at {:?}", history_path);

    let ptz_ctrl = PtzCtrl::new(params.ptz_move_timeout_s);
    let registry = Arc::new(TaskRegistry::new());

    let mut ctx = RigContext {
        params,
        net_params,
        zmq_ctx,
        session,
        plc,
        ptz_cam,
        aux_cam,
        thermal,
        history,
        history_path,
        registry,
        ptz_ctrl,
        panorama_grid,
        target_grid,
        telemetry: None,
        obstacle: ObstacleCapture::new(),
        stop_retry_guard: Arc::new(AtomicBool::new(false)),
    };

    // ---- WEB CONTROL HEARTBEAT ----

    spawn_web_heartbeat(&ctx.zmq_ctx, &ctx.net_params);

    // ---- MAIN LOOP ----

    info!("Begining main loop\n");

    let mut handshake = HandshakeCtrl::new();
    let mut num_consec_tick_errors: u64 = 0;

    loop {
        // Get cycle start time
        let cycle_start_instant = Instant::now();

        // ---- CONTROL COMMAND PROCESSING ----

        // Get commands until none remain
        loop {
            match ctl_server.receive() {
                Some(Ok(cmd)) => {
                    let response = tc_processor::exec(&mut ctx, &cmd);

                    if let Err(e) = ctl_server.respond(&response) {
                        warn!("Could not respond to a control command: {}", e);
                    }
                }
                Some(Err(e)) => {
                    warn!("Could not parse a recieved control command: {}", e);

                    let response =
                        comms_if::ctl::CtlResponse::error(format!("Unparseable command: {}", e));

                    if let Err(e) = ctl_server.respond(&response) {
                        warn!("Could not respond to a control command: {}", e);
                    }
                }
                None => break,
            }
        }

        // ---- CONTROLLER HANDSHAKE ----

        match handshake.tick(&mut ctx) {
            Ok(()) => {
                if num_consec_tick_errors >= MAX_CONSEC_TICK_ERRORS {
                    info!("Contact with the controller restored");
                }
                num_consec_tick_errors = 0;
            }
            Err(e) => {
                num_consec_tick_errors += 1;

                if num_consec_tick_errors == MAX_CONSEC_TICK_ERRORS {
                    log::error!(
                        "No contact with the controller for {} cycles: {}",
                        num_consec_tick_errors,
                        e
                    );
                } else {
                    warn!("Handshake tick failed: {}", e);
                }
            }
        }

        // ---- CYCLE MANAGEMENT ----

        let cycle_dur = Instant::now() - cycle_start_instant;

        // Get sleep duration
        match Duration::from_secs_f64(CYCLE_PERIOD_S).checked_sub(cycle_dur) {
            Some(d) => thread::sleep(d),
            None => {
                warn!(
                    "Cycle overran by {:.06} s",
                    cycle_dur.as_secs_f64() - CYCLE_PERIOD_S
                );
            }
        }
    }
}

/// Spawn the web manual control heartbeat thread.
///
/// The controller only honours the manual drive buttons while this bit is
/// moving, so the thread runs for the life of the process on its own PLC
/// link and just keeps toggling through failures.
fn spawn_web_heartbeat(zmq_ctx: &zmq::Context, net_params: &NetParams) {
    let zmq_ctx = zmq_ctx.clone();
    let net_params = net_params.clone();

    thread::spawn(move || {
        let mut plc = match PlcClient::new(&zmq_ctx, &net_params) {
            Ok(plc) => plc,
            Err(e) => {
                warn!("The web heartbeat thread has no PLC link: {}", e);
                return;
            }
        };

        let mut phase = false;

        loop {
            if let Err(e) = plc.write_variable(regs::WEB_CONTROL_HEART_BIT, PlcValue::Bool(phase)) {
                warn!("Could not write the web control heartbeat: {}", e);
            }

            phase = !phase;

            thread::sleep(WEB_HEARTBEAT_PERIOD);
        }
    });
}
