//! # Task Trigger
//!
//! Accepts or refuses task starts, resolves each kind's setpoint queue and
//! spawns the worker thread. The handshake controller and the control server
//! both start tasks through the [`TaskTrigger`] trait, so the acceptance
//! rules live in exactly one place.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::Local;
use log::{info, warn};
use thiserror::Error;

use comms_if::net::{zmq, NetParams};
use util::{maths::wrap_deg_360, session::Session};

use crate::{
    cam_client::{CamClientError, PtzCamClient},
    history::{HistoryError, HistoryStore},
    params::{RigExecParams, ScanGrid},
    ptz_ctrl::{PtzAngles, PtzCtrl, PAN_LIMITS_DEG},
    task_exec::{worker, PositionSnapshot, Setpoint, TaskKind, TaskRegistry},
};

use std::sync::Arc;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Interface the handshake controller and the control server start tasks
/// through.
pub trait TaskTrigger {
    /// Start the given task kind, recording who asked for it.
    ///
    /// On success the task's worker thread is already running and the
    /// returned string describes the accepted task.
    fn start_task(&mut self, kind: TaskKind, requestor: &str) -> Result<String, TriggerError>;

    /// Whether the given kind's worker is currently running.
    fn task_running(&self, kind: TaskKind) -> bool;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The live trigger, borrowing the poller's shared state for the duration of
/// one start attempt.
pub struct Trigger<'a> {
    pub registry: &'a Arc<TaskRegistry>,
    pub ptz_cam: &'a mut PtzCamClient,
    pub ptz_ctrl: &'a PtzCtrl,
    pub panorama_grid: &'a ScanGrid,
    pub target_grid: &'a ScanGrid,
    pub history: &'a HistoryStore,
    pub telemetry: Option<crate::plc_client::AmrTelemetry>,
    pub params: &'a RigExecParams,
    pub net_params: &'a NetParams,
    pub zmq_ctx: &'a zmq::Context,
    pub session: &'a Session,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("The {0:?} task is already running")]
    AlreadyRunning(TaskKind),

    #[error("The camera stream is not open")]
    CameraClosed,

    #[error("Could not reach the camera: {0}")]
    CameraUnreachable(CamClientError),

    #[error("No AMR telemetry has been recieved yet")]
    NoTelemetry,

    #[error("No targets are taught for tag {tag_id}")]
    NoTargets { tag_id: i32 },

    #[error("Could not load the targets: {0}")]
    History(#[from] HistoryError),
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Resolve a world-frame bearing into a device-frame pan setpoint.
///
/// The device's pan zero sits at the AMR heading plus the mounting offset,
/// so the pan is that zero minus the bearing, wrapped back into the pan
/// envelope by a single ±360° correction. `None` means the bearing is
/// unreachable from this heading (it falls in the mechanism's blind arc) and
/// the target is skipped.
pub fn device_pan_from_bearing(
    bearing_deg: f64,
    heading_deg: i32,
    offset_deg: f64,
) -> Option<f64> {
    let camera_zero = wrap_deg_180(wrap_deg_180(heading_deg as f64) + offset_deg);

    let mut pan = camera_zero - bearing_deg;

    if pan > PAN_LIMITS_DEG.1 {
        pan -= 360.0;
    } else if pan < PAN_LIMITS_DEG.0 {
        pan += 360.0;
    }

    if pan < PAN_LIMITS_DEG.0 || pan > PAN_LIMITS_DEG.1 {
        None
    } else {
        Some(pan)
    }
}

/// Expand a scan grid into its setpoint queue.
///
/// Tilt is the outer axis, then pan, then zoom, so the mechanism finishes
/// each tilt row before stepping to the next.
pub fn setpoints_from_grid(grid: &ScanGrid) -> Vec<Setpoint> {
    let mut setpoints = Vec::with_capacity(grid.num_setpoints());

    for &tilt_deg in &grid.tilt_deg {
        for &pan_deg in &grid.pan_deg {
            for &zoom in &grid.zoom {
                setpoints.push(Setpoint {
                    angles: PtzAngles {
                        pan_deg,
                        tilt_deg,
                        zoom,
                    },
                    duration_s: None,
                });
            }
        }
    }

    setpoints
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<'a> TaskTrigger for Trigger<'a> {
    fn start_task(&mut self, kind: TaskKind, requestor: &str) -> Result<String, TriggerError> {
        let slot = self.registry.slot(kind);

        if slot.is_running() {
            return Err(TriggerError::AlreadyRunning(kind));
        }

        // Every kind needs the camera stream up, the thermal task included
        // since its captures are framed against the same mechanism
        match self.ptz_cam.status() {
            Ok(status) if status.running => (),
            Ok(_) => return Err(TriggerError::CameraClosed),
            Err(e) => return Err(TriggerError::CameraUnreachable(e)),
        }

        let telemetry = self.telemetry.ok_or(TriggerError::NoTelemetry)?;
        let snapshot = PositionSnapshot::from_telemetry(&telemetry);

        let setpoints = self.resolve_setpoints(kind, &snapshot)?;

        let start_time = Local::now();
        let task_stamp = start_time.format("%Y%m%d%H%M%S").to_string();

        slot.clear_stop();
        slot.refill(setpoints);
        slot.set_start_time(Some(start_time));

        // The run flag goes up only once the worker is certain to spawn, so
        // a refused start can never leave the slot marked running
        slot.set_running(true);

        worker::spawn(worker::WorkerCtx {
            kind,
            registry: self.registry.clone(),
            ptz_ctrl: self.ptz_ctrl.clone(),
            zmq_ctx: self.zmq_ctx.clone(),
            net_params: self.net_params.clone(),
            params: self.params.clone(),
            snapshot,
            requestor: requestor.to_owned(),
            session: self.session.clone(),
            task_stamp,
            start_time,
        });

        info!(
            "Accepted a {} task for \"{}\" at {}",
            kind.as_str(),
            requestor,
            snapshot.key()
        );

        Ok(format!("{} task started", kind.as_str()))
    }

    fn task_running(&self, kind: TaskKind) -> bool {
        self.registry.slot(kind).is_running()
    }
}

impl<'a> Trigger<'a> {
    /// Build the setpoint queue for the given kind at the given position.
    fn resolve_setpoints(
        &self,
        kind: TaskKind,
        snapshot: &PositionSnapshot,
    ) -> Result<Vec<Setpoint>, TriggerError> {
        match kind {
            TaskKind::Panorama => Ok(setpoints_from_grid(self.panorama_grid)),
            TaskKind::Target => Ok(setpoints_from_grid(self.target_grid)),

            // Single capture at the current attitude, no queue
            TaskKind::Thermal => Ok(Vec::new()),

            // Sweep the mechanism across its full envelope
            TaskKind::Initial => Ok(vec![
                Setpoint {
                    angles: PtzAngles {
                        pan_deg: -170.0,
                        tilt_deg: 90.0,
                        zoom: 0.0,
                    },
                    duration_s: None,
                },
                Setpoint {
                    angles: PtzAngles {
                        pan_deg: 170.0,
                        tilt_deg: -30.0,
                        zoom: 0.0,
                    },
                    duration_s: None,
                },
            ]),

            TaskKind::Designated | TaskKind::Video => {
                let targets = self.history.targets_for(snapshot.tag_id, kind)?;

                if targets.is_empty() {
                    return Err(TriggerError::NoTargets {
                        tag_id: snapshot.tag_id,
                    });
                }

                let mut setpoints = Vec::with_capacity(targets.len());

                for target in &targets {
                    let pan_deg = match device_pan_from_bearing(
                        target.bearing_deg,
                        snapshot.heading_deg,
                        self.params.camera_offset_deg,
                    ) {
                        Some(pan) => pan,
                        None => {
                            warn!(
                                "Skipping the target at bearing {:.1}°, unreachable from \
                                 heading {}°",
                                target.bearing_deg, snapshot.heading_deg
                            );
                            continue;
                        }
                    };

                    setpoints.push(Setpoint {
                        angles: PtzAngles {
                            pan_deg,
                            tilt_deg: target.tilt_deg,
                            zoom: target.zoom,
                        },
                        duration_s: target.duration_s,
                    });
                }

                Ok(setpoints)
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Wrap an angle into `(-180, 180]` degrees.
fn wrap_deg_180(angle_deg: f64) -> f64 {
    let wrapped = wrap_deg_360(angle_deg);

    if wrapped > 180.0 {
        wrapped - 360.0
    } else {
        wrapped
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_wrap_deg_180() {
        assert_eq!(wrap_deg_180(0.0), 0.0);
        assert_eq!(wrap_deg_180(180.0), 180.0);
        assert_eq!(wrap_deg_180(181.0), -179.0);
        assert_eq!(wrap_deg_180(-190.0), 170.0);
        assert_eq!(wrap_deg_180(350.0), -10.0);
    }

    #[test]
    fn test_bearing_resolution_direct() {
        // Facing the target's bearing exactly puts the pan at zero
        assert_eq!(device_pan_from_bearing(90.0, 90, 0.0), Some(0.0));

        // A bearing left of the heading is a positive pan
        assert_eq!(device_pan_from_bearing(45.0, 90, 0.0), Some(45.0));
    }

    #[test]
    fn test_bearing_resolution_wraps_once() {
        // 0 - 200 = -200, one +360 correction lands at 160
        assert_eq!(device_pan_from_bearing(200.0, 0, 0.0), Some(160.0));

        // -175 would correct to 185 which is still out, target skipped
        assert_eq!(device_pan_from_bearing(175.0, 0, 0.0), None);
    }

    #[test]
    fn test_bearing_resolution_offset() {
        // The mounting offset shifts the pan zero with the heading
        assert_eq!(device_pan_from_bearing(100.0, 90, 10.0), Some(0.0));
    }

    #[test]
    fn test_grid_expansion_order() {
        let grid = ScanGrid {
            pan_deg: vec![-10.0, 10.0],
            tilt_deg: vec![0.0, 30.0],
            zoom: vec![0.0],
        };

        let setpoints = setpoints_from_grid(&grid);

        assert_eq!(setpoints.len(), 4);

        // Tilt is the outer axis
        assert_eq!(
            setpoints
                .iter()
                .map(|sp| (sp.angles.tilt_deg, sp.angles.pan_deg))
                .collect::<Vec<_>>(),
            vec![(0.0, -10.0), (0.0, 10.0), (30.0, -10.0), (30.0, 10.0)]
        );

        assert!(setpoints.iter().all(|sp| sp.duration_s.is_none()));
    }
}
