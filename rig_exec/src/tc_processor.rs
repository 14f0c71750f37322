//! # Control Command Processor
//!
//! Executes commands arriving over the control server against the shared
//! context, producing exactly one response per command. Task starts go
//! through the same trigger the controller handshake uses, so both surfaces
//! enforce the same acceptance rules.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{error, info, warn};
use std::{
    sync::atomic::Ordering,
    thread,
    time::Duration,
};

use comms_if::{
    ctl::{AmrMoveCmd, CtlCmd, CtlResponse, ScanAxis, TaskKind},
    eqpt::cam::ImageFormat,
    net::NetParams,
    plc::{regs, PlcLink, PlcValue},
};
use rig_lib::{
    ctx::RigContext,
    history::TargetSpec,
    plc_client::PlcClient,
    ptz_ctrl::{values_from_angles, PtzAngles},
    task_exec::{
        trigger::{TaskTrigger, Trigger},
        PositionSnapshot,
    },
};
use util::maths::wrap_deg_360;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Pause between attempts of the AMR stop retry thread
const STOP_RETRY_PERIOD: Duration = Duration::from_millis(500);

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Execute one control command against the context.
pub(crate) fn exec(ctx: &mut RigContext, cmd: &CtlCmd) -> CtlResponse {
    match cmd {
        CtlCmd::StartTask { kind, requestor } => {
            start_task(ctx, *kind, requestor.as_deref().unwrap_or("manual"))
        }
        CtlCmd::StopTask { kind } => stop_task(ctx, *kind),
        CtlCmd::GetTaskStatus { kind } => task_status(ctx, *kind),
        CtlCmd::SetScanGrid { kind, axis, values } => {
            set_scan_grid(ctx, *kind, *axis, values.clone())
        }
        CtlCmd::GetScanGrid { kind } => get_scan_grid(ctx, *kind),
        CtlCmd::SaveTarget { kind, duration_s } => save_target(ctx, *kind, *duration_s),
        CtlCmd::OpenCamera => open_camera(ctx),
        CtlCmd::CloseCamera => close_camera(ctx),
        CtlCmd::GetCameraStatus => camera_status(ctx),
        CtlCmd::GetLiveFrame => live_frame(ctx),
        CtlCmd::MoveCamera {
            pan_deg,
            tilt_deg,
            zoom,
        } => move_camera(ctx, *pan_deg, *tilt_deg, *zoom),
        CtlCmd::MoveAmr { cmd } => move_amr(ctx, *cmd),
        CtlCmd::TriggerObstacleCapture => trigger_obstacle(ctx),
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn start_task(ctx: &mut RigContext, kind: TaskKind, requestor: &str) -> CtlResponse {
    let RigContext {
        plc: _,
        registry,
        ptz_cam,
        ptz_ctrl,
        panorama_grid,
        target_grid,
        history,
        params,
        net_params,
        zmq_ctx,
        session,
        telemetry,
        ..
    } = ctx;

    let mut trigger = Trigger {
        registry,
        ptz_cam,
        ptz_ctrl,
        panorama_grid,
        target_grid,
        history,
        telemetry: *telemetry,
        params,
        net_params,
        zmq_ctx,
        session,
    };

    match trigger.start_task(kind, requestor) {
        Ok(msg) => CtlResponse::ok(msg),
        Err(e) => CtlResponse::error(e.to_string()),
    }
}

fn stop_task(ctx: &RigContext, kind: TaskKind) -> CtlResponse {
    if !ctx.registry.slot(kind).is_running() {
        return CtlResponse::error(format!("The {} task is not running!", kind.as_str()));
    }

    if ctx.registry.stop_and_join(kind) {
        CtlResponse::ok(format!("{} task stopped", kind.as_str()))
    } else {
        // The stop flag is set, the worker will still exit on its own
        CtlResponse::error(format!(
            "The {} task did not stop within the join timeout",
            kind.as_str()
        ))
    }
}

fn task_status(ctx: &RigContext, kind: TaskKind) -> CtlResponse {
    let slot = ctx.registry.slot(kind);

    let status = serde_json::json!({
        "kind": kind.as_str(),
        "running": slot.is_running(),
        "queued_setpoints": slot.queue_len(),
        "start_time": slot
            .start_time()
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string()),
    });

    CtlResponse::ok(status.to_string())
}

fn set_scan_grid(
    ctx: &mut RigContext,
    kind: TaskKind,
    axis: ScanAxis,
    values: Vec<f64>,
) -> CtlResponse {
    // A task draining a grid must never see it change under it
    if ctx.registry.any_running() {
        return CtlResponse::error("Grids cannot be edited while a task is running");
    }

    let (grid, grid_file) = match kind {
        TaskKind::Panorama => (&mut ctx.panorama_grid, &ctx.params.panorama_grid_file),
        TaskKind::Target => (&mut ctx.target_grid, &ctx.params.target_grid_file),
        _ => {
            return CtlResponse::error(format!(
                "The {} task has no scan grid",
                kind.as_str()
            ))
        }
    };

    if let Err(e) = grid.set_axis(axis, values) {
        return CtlResponse::error(e.to_string());
    }

    // Persist so a restart keeps the edit
    if let Err(e) = util::params::save(grid_file, grid) {
        warn!("Could not persist the {} grid: {}", kind.as_str(), e);
        return CtlResponse::error(format!("Grid updated but not persisted: {}", e));
    }

    info!("The {} grid's {:?} axis was updated", kind.as_str(), axis);

    CtlResponse::ok("Grid updated")
}

fn get_scan_grid(ctx: &RigContext, kind: TaskKind) -> CtlResponse {
    let grid = match kind {
        TaskKind::Panorama => &ctx.panorama_grid,
        TaskKind::Target => &ctx.target_grid,
        _ => {
            return CtlResponse::error(format!(
                "The {} task has no scan grid",
                kind.as_str()
            ))
        }
    };

    let json = serde_json::json!({
        "pan_deg": grid.pan_deg,
        "tilt_deg": grid.tilt_deg,
        "zoom": grid.zoom,
    });

    CtlResponse::ok(json.to_string())
}

/// Persist the camera's current attitude as a bearing target at the AMR's
/// current position.
///
/// The device-frame pan is converted to a world-frame bearing, so the target
/// resolves correctly whatever heading the AMR docks at later.
fn save_target(ctx: &mut RigContext, kind: TaskKind, duration_s: Option<u32>) -> CtlResponse {
    if !matches!(kind, TaskKind::Designated | TaskKind::Video) {
        return CtlResponse::error(format!(
            "Targets can only be saved for the designated and video tasks, not {}",
            kind.as_str()
        ));
    }

    let telemetry = match ctx.telemetry {
        Some(t) => t,
        None => return CtlResponse::error("No AMR telemetry has been recieved yet"),
    };

    let angles = match ctx.ptz_ctrl.current() {
        Some(a) => a,
        None => return CtlResponse::error("The camera's attitude is not known yet"),
    };

    let snapshot = PositionSnapshot::from_telemetry(&telemetry);

    let bearing_deg = wrap_deg_360(
        snapshot.heading_deg as f64 + ctx.params.camera_offset_deg - angles.pan_deg,
    );

    let target = TargetSpec {
        kind,
        bearing_deg,
        tilt_deg: angles.tilt_deg,
        zoom: angles.zoom,
        pos_x: snapshot.pos_x,
        pos_y: snapshot.pos_y,
        pos_z: snapshot.pos_z,
        heading_deg: snapshot.heading_deg,
        tag_id: snapshot.tag_id,
        duration_s,
    };

    match ctx.history.insert_target(&target) {
        Ok(()) => CtlResponse::ok(format!(
            "Target saved at bearing {:.1}° for tag {}",
            bearing_deg, snapshot.tag_id
        )),
        Err(e) => CtlResponse::error(e.to_string()),
    }
}

fn open_camera(ctx: &mut RigContext) -> CtlResponse {
    if let Err(e) = ctx.ptz_cam.open() {
        return CtlResponse::error(format!("Could not open the camera stream: {}", e));
    }

    // The auxiliary stream is best effort, the rig works without it
    if let Err(e) = ctx.aux_cam.open() {
        warn!("Could not open the auxiliary stream: {}", e);
    }

    CtlResponse::ok("Camera stream opened")
}

fn close_camera(ctx: &mut RigContext) -> CtlResponse {
    // Every task kind captures through the stream, none may lose it mid-run
    if ctx.registry.any_running() {
        return CtlResponse::error("The camera cannot be closed while a task is running");
    }

    if let Err(e) = ctx.ptz_cam.close() {
        return CtlResponse::error(format!("Could not close the camera stream: {}", e));
    }

    if let Err(e) = ctx.aux_cam.close() {
        warn!("Could not close the auxiliary stream: {}", e);
    }

    CtlResponse::ok("Camera stream closed")
}

fn camera_status(ctx: &mut RigContext) -> CtlResponse {
    let stream_running = ctx.ptz_cam.status().map(|s| s.running).ok();
    let aux_running = ctx.aux_cam.status().map(|s| s.running).ok();
    let thermal_reading = ctx.thermal.reading().ok();

    let tasks: serde_json::Map<String, serde_json::Value> = TaskKind::all()
        .iter()
        .map(|kind| {
            (
                kind.as_str().to_owned(),
                ctx.registry.slot(*kind).is_running().into(),
            )
        })
        .collect();

    let status = serde_json::json!({
        "stream_running": stream_running,
        "aux_stream_running": aux_running,
        "ptz": ctx.ptz_ctrl.current(),
        "telemetry": ctx.telemetry,
        "max_temperature_c": thermal_reading.map(|r| r.max_temperature_c),
        "tasks": tasks,
    });

    CtlResponse::ok(status.to_string())
}

fn live_frame(ctx: &mut RigContext) -> CtlResponse {
    match ctx.ptz_cam.frame(ImageFormat::Jpeg(80)) {
        Ok(frame) => CtlResponse::ok(base64::encode(&frame.data)),
        Err(e) => CtlResponse::error(format!("Could not acquire a frame: {}", e)),
    }
}

fn move_camera(ctx: &mut RigContext, pan_deg: f64, tilt_deg: f64, zoom: f64) -> CtlResponse {
    let angles = PtzAngles {
        pan_deg,
        tilt_deg,
        zoom,
    };

    // Validate before anything touches the wire
    let values = match values_from_angles(&angles) {
        Ok(values) => values,
        Err(e) => return CtlResponse::error(e.to_string()),
    };

    // Fire and forget, the convergence wait is only for task captures
    match ctx.ptz_cam.abs_move(values) {
        Ok(true) => CtlResponse::ok("Move accepted"),
        Ok(false) => CtlResponse::error("The device refused the move"),
        Err(e) => CtlResponse::error(format!("Could not command the move: {}", e)),
    }
}

fn move_amr(ctx: &mut RigContext, cmd: AmrMoveCmd) -> CtlResponse {
    match write_drive_buttons(&mut ctx.plc, cmd) {
        Ok(()) => CtlResponse::ok(format!("AMR {:?} commanded", cmd)),
        Err(e) => {
            // A failed stop must not stay failed, keep trying on a side
            // thread until the controller takes it
            if cmd == AmrMoveCmd::Stop {
                error!("Could not stop the AMR, starting the stop retry thread: {}", e);
                spawn_stop_retry(ctx);
                CtlResponse::error(
                    "Could not stop the AMR, retrying in the background".to_owned(),
                )
            } else {
                CtlResponse::error(format!("Could not command the AMR: {}", e))
            }
        }
    }
}

fn trigger_obstacle(ctx: &RigContext) -> CtlResponse {
    if ctx
        .obstacle
        .trigger(&ctx.zmq_ctx, &ctx.net_params, &ctx.params, &ctx.session)
    {
        CtlResponse::ok("Obstacle capture started")
    } else {
        CtlResponse::error("An obstacle capture is already in flight")
    }
}

/// Write the manual drive buttons for one command: the commanded button up,
/// every other button down, stop lowering all four.
fn write_drive_buttons(
    plc: &mut dyn PlcLink,
    cmd: AmrMoveCmd,
) -> Result<(), comms_if::plc::PlcError> {
    let buttons = [
        (regs::MANUAL_FORWARD_BUTTON, AmrMoveCmd::Forward),
        (regs::MANUAL_BACKWARD_BUTTON, AmrMoveCmd::Backward),
        (regs::MANUAL_LEFT_BUTTON, AmrMoveCmd::LeftTurn),
        (regs::MANUAL_RIGHT_BUTTON, AmrMoveCmd::RightTurn),
    ];

    if cmd != AmrMoveCmd::Stop {
        plc.write_variable(regs::MANUAL_ENABLE, PlcValue::Bool(true))?;
    }

    for (reg, button_cmd) in buttons {
        plc.write_variable(reg, PlcValue::Bool(cmd == button_cmd))?;
    }

    Ok(())
}

/// Keep commanding a stop on a dedicated thread until the controller takes
/// it. At most one retry thread ever runs; a second failed stop while one is
/// in flight just leaves it to finish.
fn spawn_stop_retry(ctx: &RigContext) {
    if ctx
        .stop_retry_guard
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return;
    }

    let guard = ctx.stop_retry_guard.clone();
    let zmq_ctx = ctx.zmq_ctx.clone();
    let net_params: NetParams = ctx.net_params.clone();

    thread::spawn(move || {
        loop {
            // A fresh client each attempt, the failed one may be wedged
            let stopped = PlcClient::new(&zmq_ctx, &net_params)
                .and_then(|mut plc| write_drive_buttons(&mut plc, AmrMoveCmd::Stop));

            match stopped {
                Ok(()) => {
                    info!("The retried AMR stop was taken by the controller");
                    break;
                }
                Err(e) => warn!("AMR stop retry failed: {}", e),
            }

            thread::sleep(STOP_RETRY_PERIOD);
        }

        guard.store(false, Ordering::Release);
    });
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use comms_if::plc::{PlcError, PlcValue};
    use std::collections::HashMap;

    struct MapPlc {
        bools: HashMap<String, bool>,
    }

    impl PlcLink for MapPlc {
        fn read_variable(&mut self, name: &str) -> Result<PlcValue, PlcError> {
            Ok(PlcValue::Bool(
                self.bools.get(name).copied().unwrap_or(false),
            ))
        }

        fn write_variable(&mut self, name: &str, value: PlcValue) -> Result<(), PlcError> {
            if let PlcValue::Bool(v) = value {
                self.bools.insert(name.to_owned(), v);
            }
            Ok(())
        }
    }

    #[test]
    fn test_drive_buttons_exclusive() {
        let mut plc = MapPlc {
            bools: HashMap::new(),
        };

        write_drive_buttons(&mut plc, AmrMoveCmd::Forward).unwrap();

        assert_eq!(plc.bools.get(regs::MANUAL_ENABLE), Some(&true));
        assert_eq!(plc.bools.get(regs::MANUAL_FORWARD_BUTTON), Some(&true));
        assert_eq!(plc.bools.get(regs::MANUAL_BACKWARD_BUTTON), Some(&false));
        assert_eq!(plc.bools.get(regs::MANUAL_LEFT_BUTTON), Some(&false));
        assert_eq!(plc.bools.get(regs::MANUAL_RIGHT_BUTTON), Some(&false));

        // Switching direction lowers the previous button
        write_drive_buttons(&mut plc, AmrMoveCmd::LeftTurn).unwrap();
        assert_eq!(plc.bools.get(regs::MANUAL_FORWARD_BUTTON), Some(&false));
        assert_eq!(plc.bools.get(regs::MANUAL_LEFT_BUTTON), Some(&true));
    }

    #[test]
    fn test_stop_lowers_all_buttons() {
        let mut plc = MapPlc {
            bools: HashMap::new(),
        };

        write_drive_buttons(&mut plc, AmrMoveCmd::Forward).unwrap();
        write_drive_buttons(&mut plc, AmrMoveCmd::Stop).unwrap();

        for reg in [
            regs::MANUAL_FORWARD_BUTTON,
            regs::MANUAL_BACKWARD_BUTTON,
            regs::MANUAL_LEFT_BUTTON,
            regs::MANUAL_RIGHT_BUTTON,
        ] {
            assert_eq!(plc.bools.get(reg), Some(&false));
        }
    }
}
