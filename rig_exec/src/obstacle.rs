//! # Obstacle Capture
//!
//! When the controller's obstacle signal rises, all four body cameras are
//! captured into a timestamped folder and the folder is pushed to the
//! artifact store. The capture runs on its own short-lived thread so the
//! poll tick never blocks on it, and an atomic guard keeps at most one job
//! in flight however fast the signal chatters.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::Local;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::{
    fs,
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
};

use comms_if::{
    eqpt::cam::{CamView, ImageFormat},
    net::{zmq, NetParams},
};
use util::{host, session::Session};

use crate::{cam_client::CamClient, params::RigExecParams, store_client::StoreClient, sync_mgr};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Rising-edge detector over the obstacle signal.
///
/// Fires only on a `false` to `true` transition. The first ever observation
/// seeds the state without firing, so a restart while the signal is already
/// high does not spawn a spurious capture.
#[derive(Debug, Default)]
pub struct EdgeDetector {
    prev: Option<bool>,
}

/// Handle on the obstacle capture job.
///
/// Clones share the in-flight guard, so the signal edge and the manual
/// trigger command cannot start overlapping jobs.
#[derive(Clone)]
pub struct ObstacleCapture {
    running: Arc<AtomicBool>,
}

/// Summary written into the session archive when a capture job ends.
#[derive(Serialize)]
struct ObstacleReport {
    stamp: String,
    captured: usize,
    delivered_folders: usize,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl EdgeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one observation, returning whether a rising edge fired.
    pub fn update(&mut self, current: bool) -> bool {
        let fired = self.prev == Some(false) && current;
        self.prev = Some(current);
        fired
    }
}

impl ObstacleCapture {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start a capture job unless one is already in flight.
    ///
    /// Returns whether a job was started. The job runs on its own thread and
    /// this returns immediately either way.
    pub fn trigger(
        &self,
        zmq_ctx: &zmq::Context,
        net_params: &NetParams,
        params: &RigExecParams,
        session: &Session,
    ) -> bool {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("An obstacle capture is already in flight, signal ignored");
            return false;
        }

        let running = self.running.clone();
        let zmq_ctx = zmq_ctx.clone();
        let net_params = net_params.clone();
        let params = params.clone();
        let session = session.clone();

        thread::spawn(move || {
            capture_job(&zmq_ctx, &net_params, &params, &session);
            running.store(false, Ordering::Release);
        });

        true
    }
}

impl Default for ObstacleCapture {
    fn default() -> Self {
        Self::new()
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn capture_job(
    zmq_ctx: &zmq::Context,
    net_params: &NetParams,
    params: &RigExecParams,
    session: &Session,
) {
    let root = match host::get_sentry_sw_root() {
        Ok(root) => root,
        Err(e) => {
            error!("The obstacle capture has no software root: {}", e);
            return;
        }
    };

    let base_dir = root.join(&params.obstacle_data_dir);
    let stamp = Local::now().format("%Y%m%d%H%M%S").to_string();
    let capture_dir = base_dir.join(&stamp);

    if let Err(e) = fs::create_dir_all(&capture_dir) {
        error!(
            "Could not create the obstacle folder \"{}\": {}",
            capture_dir.display(),
            e
        );
        return;
    }

    let captured = capture_views(zmq_ctx, net_params, &capture_dir);

    info!(
        "Obstacle capture \"{}\": {} of 4 view(s) saved",
        stamp, captured
    );

    let delivered_folders = deliver_all(zmq_ctx, net_params, params, &base_dir);

    session.save(
        format!("obstacle_{}.json", stamp),
        ObstacleReport {
            stamp,
            captured,
            delivered_folders,
        },
    );
}

/// Grab one frame from each body camera; a dead camera loses its view, never
/// the job.
fn capture_views(zmq_ctx: &zmq::Context, net_params: &NetParams, capture_dir: &Path) -> usize {
    let mut captured = 0;

    for view in CamView::all() {
        let mut cam = match CamClient::new(zmq_ctx, net_params.amr_cam_endpoint(view)) {
            Ok(cam) => cam,
            Err(e) => {
                warn!("Could not reach the {:?} body camera: {}", view, e);
                continue;
            }
        };

        let frame = match cam.frame(ImageFormat::Jpeg(90)) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("The {:?} body camera gave no frame: {}", view, e);
                continue;
            }
        };

        let file = capture_dir.join(view.file_name());

        match fs::write(&file, &frame.data) {
            Ok(()) => captured += 1,
            Err(e) => warn!("Could not write \"{}\": {}", file.display(), e),
        }
    }

    captured
}

/// Push every obstacle folder on disk, oldest first, removing each delivered
/// one. The first failed upload ends the pass; later folders wait for the
/// next capture.
fn deliver_all(
    zmq_ctx: &zmq::Context,
    net_params: &NetParams,
    params: &RigExecParams,
    base_dir: &Path,
) -> usize {
    let mut stamps: Vec<_> = match fs::read_dir(base_dir) {
        Ok(entries) => entries
            .flatten()
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|e| e.file_name().into_string().ok())
            .collect(),
        Err(e) => {
            warn!("Could not list \"{}\": {}", base_dir.display(), e);
            return 0;
        }
    };
    stamps.sort();

    let mut delivered = 0;

    for stamp in stamps {
        let mut store = match StoreClient::connect(
            zmq_ctx,
            net_params,
            &params.store_user,
            &params.store_password,
        ) {
            Ok(store) => store,
            Err(e) => {
                warn!("Could not reach the artifact store: {}", e);
                break;
            }
        };

        let folder = base_dir.join(&stamp);

        if let Err(e) =
            sync_mgr::upload_dir(&mut store, &[&params.obstacle_data_dir, &stamp], &folder)
        {
            warn!("Obstacle upload of \"{}\" failed: {}", stamp, e);
            break;
        }

        if let Err(e) = sync_mgr::remove_local(&folder, false) {
            warn!("Could not remove the delivered obstacle folder: {}", e);
        }

        delivered += 1;
    }

    delivered
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_edge_fires_on_rise_only() {
        let mut edge = EdgeDetector::new();

        // First observation seeds, never fires
        assert!(!edge.update(false));

        assert!(edge.update(true));

        // Sustained high does not refire
        assert!(!edge.update(true));

        assert!(!edge.update(false));
        assert!(edge.update(true));
    }

    #[test]
    fn test_edge_does_not_fire_when_starting_high() {
        let mut edge = EdgeDetector::new();

        assert!(!edge.update(true));
        assert!(!edge.update(true));

        // It fires again only after a genuine fall and rise
        assert!(!edge.update(false));
        assert!(edge.update(true));
    }

    #[test]
    fn test_guard_refuses_overlap() {
        let capture = ObstacleCapture::new();

        // Simulate a job in flight
        capture.running.store(true, Ordering::Release);

        assert!(capture
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err());
    }
}
