//! # Task Worker
//!
//! One worker thread per accepted task. The worker owns its own equipment
//! clients and history connection, drains the slot's setpoint queue with the
//! kind's capture flow, then hands the finished folder to the sync manager
//! and records its provenance.
//!
//! The slot's run flag is lowered on every exit path, panics included, so a
//! wedged capture can never leave the kind refusing starts forever.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::{DateTime, Local};
use log::{error, info, warn};
use serde::Serialize;
use std::{
    fs,
    path::Path,
    sync::Arc,
    thread,
};

use comms_if::{
    eqpt::cam::ImageFormat,
    net::{zmq, NetParams},
};
use util::{host, maths::wrap_deg_360, session::Session};

use crate::{
    cam_client::PtzCamClient,
    history::{HistoryRow, HistoryStore},
    params::RigExecParams,
    ptz_ctrl::PtzCtrl,
    store_client::StoreClient,
    sync_mgr,
    task_exec::{
        drain_queue,
        manifest::{self, CompletionFields, ManifestHeader},
        DrainOutcome, PositionSnapshot, Setpoint, TaskKind, TaskRegistry, TaskSlot,
        SETPOINT_PACING,
    },
    thermal_client::ThermalClient,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Clip length used when a video target was taught without a duration
const DEFAULT_CLIP_SECONDS: u32 = 10;

/// JPEG quality for captured stills
const CAPTURE_JPEG_QUALITY: u8 = 90;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Everything a worker thread needs, moved into the thread at spawn.
pub struct WorkerCtx {
    pub kind: TaskKind,
    pub registry: Arc<TaskRegistry>,
    pub ptz_ctrl: PtzCtrl,
    pub zmq_ctx: zmq::Context,
    pub net_params: NetParams,
    pub params: RigExecParams,
    pub snapshot: PositionSnapshot,
    pub requestor: String,
    pub session: Session,
    pub task_stamp: String,
    pub start_time: DateTime<Local>,
}

/// Summary written into the session archive when a task ends.
#[derive(Serialize)]
struct TaskReport {
    kind: &'static str,
    requestor: String,
    position: PositionSnapshot,
    captured: usize,
    remaining: usize,
    delivered: bool,
    time_cost_s: u64,
}

/// Lowers the slot's run flag when dropped, panic or not.
struct RunGuard<'a> {
    slot: &'a TaskSlot,
}

impl<'a> Drop for RunGuard<'a> {
    fn drop(&mut self) {
        self.slot.set_running(false);
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Spawn the worker thread for an accepted task.
///
/// The caller has already raised the slot's run flag; this thread owns
/// lowering it.
pub fn spawn(ctx: WorkerCtx) -> thread::JoinHandle<()> {
    thread::spawn(move || run(ctx))
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn run(ctx: WorkerCtx) {
    let slot = ctx.registry.slot(ctx.kind);
    let _guard = RunGuard { slot };

    let mut ptz_cam = match PtzCamClient::new(&ctx.zmq_ctx, &ctx.net_params) {
        Ok(cam) => cam,
        Err(e) => {
            error!("The {} worker could not reach the camera: {}", ctx.kind.as_str(), e);
            slot.clear();
            return;
        }
    };

    // The initial sweep exercises the mechanism only, nothing is captured or
    // stored
    if ctx.kind == TaskKind::Initial {
        let outcome = drain_queue(slot, SETPOINT_PACING, |sp| {
            if let Err(e) = ctx.ptz_ctrl.move_to_absolute(&mut ptz_cam, &sp.angles) {
                warn!("Initial sweep move failed: {}", e);
            }
        });

        info!(
            "Initial sweep finished, {} of {} setpoint(s) visited",
            outcome.visited,
            outcome.visited + outcome.remaining
        );
        return;
    }

    let root = match host::get_sentry_sw_root() {
        Ok(root) => root,
        Err(e) => {
            error!("The {} worker has no software root: {}", ctx.kind.as_str(), e);
            slot.clear();
            return;
        }
    };

    let base_dir = root.join(&ctx.params.task_data_dir);
    let pos_key = ctx.snapshot.key();
    let task_dir = base_dir.join(&pos_key).join(&ctx.task_stamp);

    if let Err(e) = fs::create_dir_all(&task_dir) {
        error!(
            "Could not create the task folder \"{}\": {}",
            task_dir.display(),
            e
        );
        slot.clear();
        return;
    }

    // Remote path mirrors the local layout under the store's namespace
    let store_url = format!("{}/{}/{}", ctx.params.task_data_dir, pos_key, ctx.task_stamp);

    let header = ManifestHeader {
        amr_pos_theta: ctx.snapshot.heading_deg,
        camera_offset: ctx.params.camera_offset_deg,
        task_type: ctx.kind.as_str().to_owned(),
        task_cnt: expected_captures(&ctx, slot),
        requestor: ctx.requestor.clone(),
        amr_pos_x: ctx.snapshot.pos_x,
        amr_pos_y: ctx.snapshot.pos_y,
        amr_pos_z: ctx.snapshot.pos_z,
        amr_tag_id: ctx.snapshot.tag_id,
        store_url: store_url.clone(),
        task_time: ctx.start_time.format("%Y-%m-%d %H:%M:%S").to_string(),
    };

    if let Err(e) = manifest::write_header(&task_dir, &header) {
        error!("Could not write the manifest: {}", e);
        slot.clear();
        return;
    }

    let (captured, outcome) = match ctx.kind {
        TaskKind::Thermal => capture_thermal(&ctx, &task_dir),
        TaskKind::Video => capture_video(&ctx, slot, &mut ptz_cam, &task_dir),
        _ => capture_stills(&ctx, slot, &mut ptz_cam, &task_dir),
    };

    let time_cost_s = (Local::now() - ctx.start_time).num_seconds().max(0) as u64;

    if let Err(e) = manifest::append_completion(
        &task_dir,
        &CompletionFields {
            task_left: outcome.remaining,
            stitch_state: "none".into(),
            time_cost_s,
        },
    ) {
        error!("Could not complete the manifest: {}", e);
    }

    let delivered = deliver(&ctx, &root, &base_dir, &task_dir, &store_url, &header);

    ctx.session.save(
        format!("{}_task_{}.json", ctx.kind.as_str(), ctx.task_stamp),
        TaskReport {
            kind: ctx.kind.as_str(),
            requestor: ctx.requestor.clone(),
            position: ctx.snapshot,
            captured,
            remaining: outcome.remaining,
            delivered,
            time_cost_s,
        },
    );

    info!(
        "The {} task finished, {} capture(s), {} setpoint(s) left, delivered: {}",
        ctx.kind.as_str(),
        captured,
        outcome.remaining,
        delivered
    );
}

/// Captures the manifest promises before the drain starts.
fn expected_captures(ctx: &WorkerCtx, slot: &TaskSlot) -> usize {
    match ctx.kind {
        // Raw and colormapped frame of the same scene
        TaskKind::Thermal => 2,
        _ => slot.queue_len(),
    }
}

/// Still-image flow: converge on each setpoint, grab a frame, save it.
fn capture_stills(
    ctx: &WorkerCtx,
    slot: &TaskSlot,
    ptz_cam: &mut PtzCamClient,
    task_dir: &Path,
) -> (usize, DrainOutcome) {
    let mut captured = 0;

    let outcome = drain_queue(slot, SETPOINT_PACING, |sp| {
        if let Err(e) = ctx.ptz_ctrl.move_to_absolute(ptz_cam, &sp.angles) {
            warn!("Skipping a setpoint, the move failed: {}", e);
            return;
        }

        let frame = match ptz_cam.frame(ImageFormat::Jpeg(CAPTURE_JPEG_QUALITY)) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Skipping a setpoint, the capture failed: {}", e);
                return;
            }
        };

        let file = task_dir.join(still_file_name(ctx, sp));

        match fs::write(&file, &frame.data) {
            Ok(()) => captured += 1,
            Err(e) => warn!("Could not write \"{}\": {}", file.display(), e),
        }
    });

    (captured, outcome)
}

/// Video flow: converge on each setpoint, record a clip of the taught
/// duration. The output index advances per attempted setpoint, so a skipped
/// clip leaves a hole rather than shifting later names.
fn capture_video(
    ctx: &WorkerCtx,
    slot: &TaskSlot,
    ptz_cam: &mut PtzCamClient,
    task_dir: &Path,
) -> (usize, DrainOutcome) {
    let mut captured = 0;
    let mut index = 0;

    let outcome = drain_queue(slot, SETPOINT_PACING, |sp| {
        let file = task_dir.join(format!("output_{}.mp4", index));
        index += 1;

        if let Err(e) = ctx.ptz_ctrl.move_to_absolute(ptz_cam, &sp.angles) {
            warn!("Skipping a clip, the move failed: {}", e);
            return;
        }

        let seconds = sp.duration_s.unwrap_or(DEFAULT_CLIP_SECONDS);

        let clip = match ptz_cam.record_clip(seconds) {
            Ok(clip) => clip,
            Err(e) => {
                warn!("Skipping a clip, recording failed: {}", e);
                return;
            }
        };

        match fs::write(&file, &clip.data) {
            Ok(()) => captured += 1,
            Err(e) => warn!("Could not write \"{}\": {}", file.display(), e),
        }
    });

    (captured, outcome)
}

/// Thermal flow: one raw and one colormapped capture of the current scene,
/// no mechanism motion.
fn capture_thermal(ctx: &WorkerCtx, task_dir: &Path) -> (usize, DrainOutcome) {
    let mut thermal = match ThermalClient::new(&ctx.zmq_ctx, &ctx.net_params) {
        Ok(client) => client,
        Err(e) => {
            error!("Could not reach the thermal imager: {}", e);
            return (0, DrainOutcome { visited: 0, remaining: 0 });
        }
    };

    let mut captured = 0;

    for (file_name, colormap) in [("ir.jpg", false), ("ir-colormap.jpg", true)] {
        let frame = match thermal.frame(colormap, true) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Thermal capture failed: {}", e);
                continue;
            }
        };

        let file = task_dir.join(file_name);

        match fs::write(&file, &frame.data) {
            Ok(()) => captured += 1,
            Err(e) => warn!("Could not write \"{}\": {}", file.display(), e),
        }
    }

    (captured, DrainOutcome { visited: captured, remaining: 0 })
}

/// Name a still by its setpoint, either device-frame pan/tilt/zoom or the
/// world-frame bearing the pan resolves to.
fn still_file_name(ctx: &WorkerCtx, sp: &Setpoint) -> String {
    let stamp = Local::now().format("%Y%m%d%H%M%S");

    if ctx.params.world_frame_naming {
        let bearing_deg = wrap_deg_360(
            ctx.snapshot.heading_deg as f64 + ctx.params.camera_offset_deg - sp.angles.pan_deg,
        );

        format!(
            "img_{}_{}_{}_{:.0}.jpg",
            stamp, ctx.snapshot.pos_x, ctx.snapshot.pos_y, bearing_deg
        )
    } else {
        format!(
            "img_{}_{}_{}_{}.jpg",
            stamp, sp.angles.pan_deg, sp.angles.tilt_deg, sp.angles.zoom
        )
    }
}

/// Upload the folder, remove it locally, record its provenance, then sweep
/// for anything stranded by earlier runs.
///
/// An upload failure leaves the folder on disk with no provenance row; the
/// next successful delivery's sweep picks it up.
fn deliver(
    ctx: &WorkerCtx,
    root: &Path,
    base_dir: &Path,
    task_dir: &Path,
    store_url: &str,
    header: &ManifestHeader,
) -> bool {
    let history = match HistoryStore::open(root.join(&ctx.params.history_db_file)) {
        Ok(history) => history,
        Err(e) => {
            error!("The worker could not open the history database: {}", e);
            return false;
        }
    };

    let connect = || {
        StoreClient::connect(
            &ctx.zmq_ctx,
            &ctx.net_params,
            &ctx.params.store_user,
            &ctx.params.store_password,
        )
    };

    let mut store = match connect() {
        Ok(store) => store,
        Err(e) => {
            warn!("Could not reach the artifact store, folder kept locally: {}", e);
            return false;
        }
    };

    let pos_key = ctx.snapshot.key();

    if let Err(e) = sync_mgr::upload_dir(
        &mut store,
        &[&ctx.params.task_data_dir, &pos_key, &ctx.task_stamp],
        task_dir,
    ) {
        warn!("Upload failed, folder kept locally: {}", e);
        return false;
    }

    if let Err(e) = sync_mgr::remove_local(task_dir, true) {
        warn!("Could not remove the delivered folder: {}", e);
    }

    let row = HistoryRow {
        task_type: header.task_type.clone(),
        pos_x: header.amr_pos_x,
        pos_y: header.amr_pos_y,
        pos_z: header.amr_pos_z,
        heading_deg: header.amr_pos_theta as f64,
        tag_id: header.amr_tag_id,
        store_url: store_url.to_owned(),
        task_time: header.task_time.clone(),
        stitch_state: "none".into(),
        requestor: header.requestor.clone(),
    };

    if let Err(e) = history.insert_history(&row) {
        error!("Could not record the delivered task: {}", e);
        return false;
    }

    // While the store is known reachable, re-attempt anything stranded by
    // earlier failed deliveries
    let swept = sync_mgr::recover_stranded(connect, base_dir, &ctx.params.task_data_dir, &history);

    if swept.recovered > 0 || swept.failed > 0 {
        info!(
            "Recovery sweep: {} folder(s) recovered, {} still stranded",
            swept.recovered, swept.failed
        );
    }

    true
}
