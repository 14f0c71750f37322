//! # PTZ Convergence Controller
//!
//! Converts between degree space and the device's normalized command space,
//! issues absolute moves and polls the device until the observed axis values
//! match the commanded ones within tolerance.
//!
//! Degree space is what the rest of the software speaks: pan ∈ [-170, 170],
//! tilt ∈ [-30, 90], zoom ∈ [0, 1]. The device accepts pan/170 and tilt/100,
//! zoom unscaled. The inverse mapping floors the pan and tilt and rounds the
//! zoom to one decimal, matching what the device's status endpoint reports.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::warn;
use serde::Serialize;
use std::{
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use comms_if::eqpt::ptz::PtzSample;

use crate::cam_client::{CamClientError, PtzCamClient};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Mechanical envelope of the mechanism, degrees (zoom normalized)
pub const PAN_LIMITS_DEG: (f64, f64) = (-170.0, 170.0);
pub const TILT_LIMITS_DEG: (f64, f64) = (-30.0, 90.0);
pub const ZOOM_LIMITS: (f64, f64) = (0.0, 1.0);

/// Scale factors between degrees and normalized command values
const PAN_SCALE: f64 = 170.0;
const TILT_SCALE: f64 = 100.0;

/// A move has converged when every axis is within this of its command
const CONVERGENCE_TOLERANCE: f64 = 0.005;

/// Period between status polls while waiting for convergence
const STATUS_POLL_PERIOD: Duration = Duration::from_millis(200);

/// Wait after any issued move before returning, so the next command never
/// lands while the mechanism is still moving
const SETTLE_DURATION: Duration = Duration::from_secs(1);

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A PTZ attitude in degree space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PtzAngles {
    pub pan_deg: f64,
    pub tilt_deg: f64,
    pub zoom: f64,
}

/// The convergence controller.
///
/// Holds the shared cache of the mechanism's last known attitude, read by the
/// status surface and refreshed by the poll tick and by every converged move.
/// Clones share the cache, so each task worker carries its own controller
/// against its own camera client.
#[derive(Clone)]
pub struct PtzCtrl {
    move_timeout: Duration,

    current: Arc<Mutex<Option<PtzAngles>>>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum PtzCtrlError {
    #[error("The {axis} target {value} is outside [{min}, {max}]")]
    OutOfRange {
        axis: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("The device refused the move")]
    Rejected,

    #[error("The move did not converge within {0:.1} s")]
    Timeout(f64),

    #[error("Could not read the device's axis status: {0}")]
    StatusLost(CamClientError),

    #[error("Camera client error: {0}")]
    ClientError(CamClientError),
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Map a degree-space attitude into the device's command space.
///
/// Fails if any axis is outside the mechanism's envelope; no command can be
/// built from an out-of-range attitude.
pub fn values_from_angles(angles: &PtzAngles) -> Result<PtzSample, PtzCtrlError> {
    check_range("pan", angles.pan_deg, PAN_LIMITS_DEG)?;
    check_range("tilt", angles.tilt_deg, TILT_LIMITS_DEG)?;
    check_range("zoom", angles.zoom, ZOOM_LIMITS)?;

    Ok(PtzSample {
        pan: angles.pan_deg / PAN_SCALE,
        tilt: angles.tilt_deg / TILT_SCALE,
        zoom: angles.zoom,
    })
}

/// Map observed device values back into degree space.
///
/// Pan and tilt floor to whole degrees; zoom rounds to one decimal place, the
/// precision the device actually reports.
pub fn angles_from_values(sample: &PtzSample) -> PtzAngles {
    PtzAngles {
        pan_deg: (sample.pan * PAN_SCALE).floor(),
        tilt_deg: (sample.tilt * TILT_SCALE).floor(),
        zoom: (sample.zoom * 10.0).round() / 10.0,
    }
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl PtzCtrl {
    pub fn new(move_timeout_s: f64) -> Self {
        Self {
            move_timeout: Duration::from_secs_f64(move_timeout_s),
            current: Arc::new(Mutex::new(None)),
        }
    }

    /// The mechanism's last known attitude, `None` if unknown.
    pub fn current(&self) -> Option<PtzAngles> {
        self.current.lock().ok().and_then(|guard| *guard)
    }

    /// Replace the cached attitude, for example from a tick status refresh.
    pub fn set_current(&self, angles: Option<PtzAngles>) {
        if let Ok(mut guard) = self.current.lock() {
            *guard = angles;
        }
    }

    /// Drive the mechanism to the given attitude and wait for convergence.
    ///
    /// Validates the target before issuing anything; an out-of-range target
    /// fails immediately with no command sent. Once a command has been
    /// issued every exit path sleeps the settle period first, so a caller
    /// can command again straight away.
    ///
    /// On timeout the cached attitude is invalidated, since the mechanism's
    /// real position is then unknown. A failed status read aborts at once
    /// without waiting out the timeout and leaves the cache as it was.
    pub fn move_to_absolute(
        &self,
        cam: &mut PtzCamClient,
        target: &PtzAngles,
    ) -> Result<(), PtzCtrlError> {
        // Range failure issues no command and does not settle
        let target_values = values_from_angles(target)?;

        let result = self.converge(cam, &target_values);

        // A command went out, let the mechanism settle before the caller can
        // issue another
        thread::sleep(SETTLE_DURATION);

        result
    }

    fn converge(
        &self,
        cam: &mut PtzCamClient,
        target_values: &PtzSample,
    ) -> Result<(), PtzCtrlError> {
        match cam.abs_move(*target_values) {
            Ok(true) => (),
            Ok(false) => return Err(PtzCtrlError::Rejected),
            Err(e) => return Err(PtzCtrlError::ClientError(e)),
        }

        let deadline = Instant::now() + self.move_timeout;

        loop {
            let observed = match cam.ptz_status() {
                Ok(sample) => sample,
                // An unreadable status means we cannot know where the
                // mechanism is heading, abort now rather than waiting out
                // the timeout
                Err(e) => return Err(PtzCtrlError::StatusLost(e)),
            };

            if converged(target_values, &observed) {
                self.set_current(Some(angles_from_values(&observed)));
                return Ok(());
            }

            if Instant::now() >= deadline {
                warn!(
                    "PTZ move to ({:.3}, {:.3}, {:.3}) timed out at ({:.3}, {:.3}, {:.3})",
                    target_values.pan,
                    target_values.tilt,
                    target_values.zoom,
                    observed.pan,
                    observed.tilt,
                    observed.zoom
                );

                // Position now unknown
                self.set_current(None);
                return Err(PtzCtrlError::Timeout(self.move_timeout.as_secs_f64()));
            }

            thread::sleep(STATUS_POLL_PERIOD);
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn check_range(
    axis: &'static str,
    value: f64,
    limits: (f64, f64),
) -> Result<(), PtzCtrlError> {
    if value < limits.0 || value > limits.1 {
        return Err(PtzCtrlError::OutOfRange {
            axis,
            value,
            min: limits.0,
            max: limits.1,
        });
    }

    Ok(())
}

fn converged(commanded: &PtzSample, observed: &PtzSample) -> bool {
    (commanded.pan - observed.pan).abs() <= CONVERGENCE_TOLERANCE
        && (commanded.tilt - observed.tilt).abs() <= CONVERGENCE_TOLERANCE
        && (commanded.zoom - observed.zoom).abs() <= CONVERGENCE_TOLERANCE
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_value_mapping() {
        let values = values_from_angles(&PtzAngles {
            pan_deg: 170.0,
            tilt_deg: 90.0,
            zoom: 1.0,
        })
        .unwrap();

        assert_eq!(values.pan, 1.0);
        assert_eq!(values.tilt, 0.9);
        assert_eq!(values.zoom, 1.0);

        let values = values_from_angles(&PtzAngles {
            pan_deg: -170.0,
            tilt_deg: -30.0,
            zoom: 0.0,
        })
        .unwrap();

        assert_eq!(values.pan, -1.0);
        assert_eq!(values.tilt, -0.3);
        assert_eq!(values.zoom, 0.0);
    }

    #[test]
    fn test_out_of_range_rejected() {
        let bad = [
            PtzAngles {
                pan_deg: 200.0,
                tilt_deg: 0.0,
                zoom: 0.0,
            },
            PtzAngles {
                pan_deg: 0.0,
                tilt_deg: -40.0,
                zoom: 0.0,
            },
            PtzAngles {
                pan_deg: 0.0,
                tilt_deg: 0.0,
                zoom: 1.5,
            },
        ];

        for angles in &bad {
            assert!(matches!(
                values_from_angles(angles),
                Err(PtzCtrlError::OutOfRange { .. })
            ));
        }
    }

    #[test]
    fn test_inverse_mapping() {
        let angles = angles_from_values(&PtzSample {
            pan: 1.0,
            tilt: 0.9,
            zoom: 1.0,
        });

        assert_eq!(angles.pan_deg, 170.0);
        assert_eq!(angles.tilt_deg, 90.0);
        assert_eq!(angles.zoom, 1.0);
    }

    #[test]
    fn test_roundtrip_within_floor_tolerance() {
        // Pan and tilt floor to whole degrees, so a roundtrip may lose up to
        // one degree downwards but never more
        for pan in -170..=170 {
            let angles = PtzAngles {
                pan_deg: pan as f64,
                tilt_deg: 0.0,
                zoom: 0.0,
            };
            let recovered = angles_from_values(&values_from_angles(&angles).unwrap());

            assert!(recovered.pan_deg <= angles.pan_deg);
            assert!(angles.pan_deg - recovered.pan_deg <= 1.0);
        }

        for tilt in -30..=90 {
            let angles = PtzAngles {
                pan_deg: 0.0,
                tilt_deg: tilt as f64,
                zoom: 0.0,
            };
            let recovered = angles_from_values(&values_from_angles(&angles).unwrap());

            assert!(recovered.tilt_deg <= angles.tilt_deg);
            assert!(angles.tilt_deg - recovered.tilt_deg <= 1.0);
        }

        // Zoom is identity forwards and one-decimal rounding backwards
        for z in 0..=10 {
            let angles = PtzAngles {
                pan_deg: 0.0,
                tilt_deg: 0.0,
                zoom: z as f64 / 10.0,
            };
            let recovered = angles_from_values(&values_from_angles(&angles).unwrap());

            assert!((recovered.zoom - angles.zoom).abs() < 1e-9);
        }
    }

    #[test]
    fn test_convergence_tolerance() {
        let commanded = PtzSample {
            pan: 0.5,
            tilt: 0.2,
            zoom: 0.3,
        };

        let mut observed = commanded;
        observed.pan += 0.004;
        assert!(converged(&commanded, &observed));

        observed.pan = commanded.pan - 0.006;
        assert!(!converged(&commanded, &observed));

        // All axes must be inside tolerance at the same time
        observed = commanded;
        observed.zoom += 0.01;
        assert!(!converged(&commanded, &observed));
    }
}
