//! # Rig Executable Parameters
//!
//! This module provides parameters for the rig executable, plus the scan grid
//! schema shared by the panorama and target tasks.
//!
//! Grids were historically expressed as stringly-typed list literals in an
//! ini file; here they are typed TOML with range validation at load and at
//! every mutation, so a bad grid is refused before it reaches the mechanism.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ptz_ctrl::{PAN_LIMITS_DEG, TILT_LIMITS_DEG, ZOOM_LIMITS};
use comms_if::ctl::ScanAxis;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Clone)]
pub struct RigExecParams {
    /// Angular offset between the AMR's heading and the PTZ pan zero, in
    /// degrees. Added to the heading when converting between device-frame
    /// pans and world-frame bearings.
    pub camera_offset_deg: f64,

    /// If true captured images are named by world-frame bearing rather than
    /// by device-frame setpoint
    pub world_frame_naming: bool,

    /// Directory under the software root where task folders are written, and
    /// the matching namespace on the remote store
    pub task_data_dir: String,

    /// Directory under the software root where obstacle captures are
    /// written, and the matching namespace on the remote store
    pub obstacle_data_dir: String,

    /// SQLite database file under the software root holding task history and
    /// designated targets
    pub history_db_file: String,

    /// Credentials presented to the artifact store
    pub store_user: String,
    pub store_password: String,

    /// Timeout on a single PTZ convergence, seconds
    pub ptz_move_timeout_s: f64,

    /// Parameter file holding the panorama scan grid
    pub panorama_grid_file: String,

    /// Parameter file holding the target scan grid
    pub target_grid_file: String,
}

/// Setpoint grid for the panorama and target tasks.
///
/// The task visits the cross product of the three axis lists, tilt
/// outermost, then pan, zoom fastest.
#[derive(Serialize, Deserialize, Clone)]
pub struct ScanGrid {
    /// Pan setpoints in degrees
    pub pan_deg: Vec<f64>,

    /// Tilt setpoints in degrees
    pub tilt_deg: Vec<f64>,

    /// Zoom setpoints, normalized
    pub zoom: Vec<f64>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ParamsError {
    #[error("The PTZ move timeout must be positive, got {0}")]
    NonPositiveTimeout(f64),

    #[error("The {0} grid axis is empty")]
    EmptyGridAxis(&'static str),

    #[error("Grid {axis} value {value} is outside [{min}, {max}]")]
    GridValueOutOfRange {
        axis: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl RigExecParams {
    /// Check the loaded parameters for values the software cannot run with.
    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.ptz_move_timeout_s <= 0.0 {
            return Err(ParamsError::NonPositiveTimeout(self.ptz_move_timeout_s));
        }

        Ok(())
    }
}

impl ScanGrid {
    /// Check every grid value against the mechanism's envelope.
    pub fn validate(&self) -> Result<(), ParamsError> {
        check_axis("pan", &self.pan_deg, PAN_LIMITS_DEG)?;
        check_axis("tilt", &self.tilt_deg, TILT_LIMITS_DEG)?;
        check_axis("zoom", &self.zoom, ZOOM_LIMITS)?;

        Ok(())
    }

    /// Get the values of one axis.
    pub fn axis(&self, axis: ScanAxis) -> &[f64] {
        match axis {
            ScanAxis::Pan => &self.pan_deg,
            ScanAxis::Tilt => &self.tilt_deg,
            ScanAxis::Zoom => &self.zoom,
        }
    }

    /// Replace one axis of the grid, refusing values outside the mechanism's
    /// envelope. The grid is unchanged if the new values are refused.
    pub fn set_axis(&mut self, axis: ScanAxis, values: Vec<f64>) -> Result<(), ParamsError> {
        let (name, limits) = match axis {
            ScanAxis::Pan => ("pan", PAN_LIMITS_DEG),
            ScanAxis::Tilt => ("tilt", TILT_LIMITS_DEG),
            ScanAxis::Zoom => ("zoom", ZOOM_LIMITS),
        };

        check_axis(name, &values, limits)?;

        match axis {
            ScanAxis::Pan => self.pan_deg = values,
            ScanAxis::Tilt => self.tilt_deg = values,
            ScanAxis::Zoom => self.zoom = values,
        }

        Ok(())
    }

    /// Number of setpoints the grid expands to.
    pub fn num_setpoints(&self) -> usize {
        self.pan_deg.len() * self.tilt_deg.len() * self.zoom.len()
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn check_axis(
    name: &'static str,
    values: &[f64],
    limits: (f64, f64),
) -> Result<(), ParamsError> {
    if values.is_empty() {
        return Err(ParamsError::EmptyGridAxis(name));
    }

    for &value in values {
        if value < limits.0 || value > limits.1 {
            return Err(ParamsError::GridValueOutOfRange {
                axis: name,
                value,
                min: limits.0,
                max: limits.1,
            });
        }
    }

    Ok(())
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn grid() -> ScanGrid {
        ScanGrid {
            pan_deg: vec![-120.0, -60.0, 0.0, 60.0, 120.0],
            tilt_deg: vec![0.0, 30.0],
            zoom: vec![0.0],
        }
    }

    #[test]
    fn test_grid_validation() {
        assert!(grid().validate().is_ok());
        assert_eq!(grid().num_setpoints(), 10);

        let mut g = grid();
        g.pan_deg.push(200.0);
        assert!(g.validate().is_err());

        let mut g = grid();
        g.tilt_deg.clear();
        assert!(g.validate().is_err());
    }

    #[test]
    fn test_grid_set_axis_refuses_bad_values() {
        let mut g = grid();

        assert!(g.set_axis(ScanAxis::Tilt, vec![-45.0]).is_err());

        // Refused values leave the grid unchanged
        assert_eq!(g.tilt_deg, vec![0.0, 30.0]);

        assert!(g.set_axis(ScanAxis::Tilt, vec![-20.0, 45.0]).is_ok());
        assert_eq!(g.tilt_deg, vec![-20.0, 45.0]);
    }
}
