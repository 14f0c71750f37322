//! # Task Folder Manifest
//!
//! Every task folder carries an `info.txt` manifest: one `key:value` line per
//! field, header fields written at task start and completion fields appended
//! at task end. The recovery sweep parses the manifest back to reconstruct
//! the provenance row of a folder whose bookkeeping was lost to a crash.
//!
//! The format is line-prefix keyed. A value containing a colon parses
//! correctly (the split is on the first colon only), but the format has no
//! escaping and no ordering guarantees beyond write order.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    fs::{read_to_string, OpenOptions},
    io::Write,
    path::Path,
};
use thiserror::Error;

use crate::history::HistoryRow;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// File name of the manifest inside a task folder
pub const MANIFEST_FILE: &str = "info.txt";

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Fields written at task start.
#[derive(Debug, Clone)]
pub struct ManifestHeader {
    pub amr_pos_theta: i32,
    pub camera_offset: f64,
    pub task_type: String,
    pub task_cnt: usize,
    pub requestor: String,
    pub amr_pos_x: i32,
    pub amr_pos_y: i32,
    pub amr_pos_z: i32,
    pub amr_tag_id: i32,
    pub store_url: String,
    pub task_time: String,
}

/// Fields appended at task end.
#[derive(Debug, Clone)]
pub struct CompletionFields {
    /// Setpoints still queued when the drain exited
    pub task_left: usize,

    /// Stitching placeholder, always "none" until a stitcher exists
    pub stitch_state: String,

    /// Wall time the task took, whole seconds
    pub time_cost_s: u64,
}

/// A manifest read back by the recovery sweep.
///
/// Every field is defaulted, so a truncated manifest (a crash between header
/// and completion writes) still yields a usable row.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedManifest {
    pub task_type: String,
    pub amr_pos_x: i32,
    pub amr_pos_y: i32,
    pub amr_pos_z: i32,
    pub amr_pos_theta: f64,
    pub amr_tag_id: i32,
    pub store_url: String,
    pub task_time: String,
    pub stitch_state: String,
    pub requestor: String,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Could not write the manifest: {0}")]
    WriteError(std::io::Error),

    #[error("Could not read the manifest: {0}")]
    ReadError(std::io::Error),
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Write the header fields into the task folder's manifest.
pub fn write_header(task_dir: &Path, header: &ManifestHeader) -> Result<(), ManifestError> {
    let mut lines = String::new();

    lines.push_str(&format!("amr_pos_theta:{}\n", header.amr_pos_theta));
    lines.push_str(&format!("camera_offset:{}\n", header.camera_offset));
    lines.push_str(&format!("task_type:{}\n", header.task_type));
    lines.push_str(&format!("task_cnt:{}\n", header.task_cnt));
    lines.push_str(&format!("requestor:{}\n", header.requestor));
    lines.push_str(&format!("amr_pos_x:{}\n", header.amr_pos_x));
    lines.push_str(&format!("amr_pos_y:{}\n", header.amr_pos_y));
    lines.push_str(&format!("amr_pos_z:{}\n", header.amr_pos_z));
    lines.push_str(&format!("amr_tag_id:{}\n", header.amr_tag_id));
    lines.push_str(&format!("store_url:{}\n", header.store_url));
    lines.push_str(&format!("task_time:{}\n", header.task_time));

    append(task_dir, &lines)
}

/// Append the completion fields to the task folder's manifest.
pub fn append_completion(task_dir: &Path, fields: &CompletionFields) -> Result<(), ManifestError> {
    let mut lines = String::new();

    lines.push_str(&format!("task_left:{}\n", fields.task_left));
    lines.push_str(&format!("stitch_state:{}\n", fields.stitch_state));
    lines.push_str(&format!("time_cost:{}\n", fields.time_cost_s));

    append(task_dir, &lines)
}

/// Parse the manifest in the given task folder.
///
/// Unknown lines are skipped; missing fields take their defaults. Keys are
/// matched against the whole text before the first colon, so a key which is
/// a prefix of another key cannot shadow it.
pub fn parse(task_dir: &Path) -> Result<ParsedManifest, ManifestError> {
    let text =
        read_to_string(task_dir.join(MANIFEST_FILE)).map_err(ManifestError::ReadError)?;

    let mut manifest = ParsedManifest::default();

    for line in text.lines() {
        let (key, value) = match line.split_once(':') {
            Some(kv) => kv,
            None => continue,
        };

        match key {
            "task_type" => manifest.task_type = value.into(),
            "amr_pos_x" => manifest.amr_pos_x = value.parse().unwrap_or(0),
            "amr_pos_y" => manifest.amr_pos_y = value.parse().unwrap_or(0),
            "amr_pos_z" => manifest.amr_pos_z = value.parse().unwrap_or(0),
            "amr_pos_theta" => manifest.amr_pos_theta = value.parse().unwrap_or(0.0),
            "amr_tag_id" => manifest.amr_tag_id = value.parse().unwrap_or(0),
            "store_url" => manifest.store_url = value.into(),
            "task_time" => manifest.task_time = value.into(),
            "stitch_state" => manifest.stitch_state = value.into(),
            "requestor" => manifest.requestor = value.into(),
            _ => (),
        }
    }

    Ok(manifest)
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for ParsedManifest {
    fn default() -> Self {
        Self {
            task_type: String::new(),
            amr_pos_x: 0,
            amr_pos_y: 0,
            amr_pos_z: 0,
            amr_pos_theta: 0.0,
            amr_tag_id: 0,
            store_url: String::new(),
            task_time: "0000-00-00 00:00:00".into(),
            stitch_state: "none".into(),
            requestor: "manual".into(),
        }
    }
}

impl ParsedManifest {
    /// Build the provenance row this manifest describes.
    pub fn to_history_row(&self) -> HistoryRow {
        HistoryRow {
            task_type: self.task_type.clone(),
            pos_x: self.amr_pos_x,
            pos_y: self.amr_pos_y,
            pos_z: self.amr_pos_z,
            heading_deg: self.amr_pos_theta,
            tag_id: self.amr_tag_id,
            store_url: self.store_url.clone(),
            task_time: self.task_time.clone(),
            stitch_state: self.stitch_state.clone(),
            requestor: self.requestor.clone(),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn append(task_dir: &Path, lines: &str) -> Result<(), ManifestError> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(task_dir.join(MANIFEST_FILE))
        .map_err(ManifestError::WriteError)?;

    file.write_all(lines.as_bytes())
        .map_err(ManifestError::WriteError)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;

    fn temp_task_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "rig_manifest_{}_{}",
            name,
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn header() -> ManifestHeader {
        ManifestHeader {
            amr_pos_theta: 90,
            camera_offset: 0.0,
            task_type: "panorama".into(),
            task_cnt: 24,
            requestor: "AGVC".into(),
            amr_pos_x: 100,
            amr_pos_y: 200,
            amr_pos_z: 0,
            amr_tag_id: 3,
            store_url: "save_imgs/(100,200,90,3)/20260101120000".into(),
            task_time: "2026-01-01 12:00:00".into(),
        }
    }

    #[test]
    fn test_write_and_parse_roundtrip() {
        let dir = temp_task_dir("roundtrip");

        write_header(&dir, &header()).unwrap();
        append_completion(
            &dir,
            &CompletionFields {
                task_left: 0,
                stitch_state: "none".into(),
                time_cost_s: 42,
            },
        )
        .unwrap();

        let parsed = parse(&dir).unwrap();

        assert_eq!(parsed.task_type, "panorama");
        assert_eq!(parsed.amr_pos_x, 100);
        assert_eq!(parsed.amr_pos_y, 200);
        assert_eq!(parsed.amr_pos_theta, 90.0);
        assert_eq!(parsed.amr_tag_id, 3);
        assert_eq!(parsed.store_url, "save_imgs/(100,200,90,3)/20260101120000");
        assert_eq!(parsed.task_time, "2026-01-01 12:00:00");
        assert_eq!(parsed.stitch_state, "none");
        assert_eq!(parsed.requestor, "AGVC");

        let row = parsed.to_history_row();
        assert_eq!(row.task_type, "panorama");
        assert_eq!(row.heading_deg, 90.0);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_parse_value_with_colon() {
        let dir = temp_task_dir("colon");

        write_header(&dir, &header()).unwrap();

        // task_time holds colons, the split is on the first colon only
        let parsed = parse(&dir).unwrap();
        assert_eq!(parsed.task_time, "2026-01-01 12:00:00");

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_parse_truncated_manifest_defaults() {
        let dir = temp_task_dir("truncated");

        // Header only, as after a crash before the completion write
        write_header(&dir, &header()).unwrap();

        let parsed = parse(&dir).unwrap();
        assert_eq!(parsed.stitch_state, "none");
        assert_eq!(parsed.task_type, "panorama");

        fs::remove_dir_all(&dir).unwrap();
    }
}
