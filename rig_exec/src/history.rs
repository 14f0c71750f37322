//! # Task History Store
//!
//! Embedded SQLite database holding two tables: `task_history`, the
//! provenance record of delivered task folders, and `designated_task`, the
//! persisted world-frame bearing targets used by the designated and video
//! tasks.
//!
//! A store is opened per thread; task workers open their own connection
//! rather than sharing the poller's.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use rusqlite::{params, Connection};
use std::path::Path;

use comms_if::ctl::TaskKind;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct HistoryStore {
    conn: Connection,
}

/// One provenance row, inserted after a task folder is confirmed delivered.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRow {
    pub task_type: String,
    pub pos_x: i32,
    pub pos_y: i32,
    pub pos_z: i32,
    pub heading_deg: f64,
    pub tag_id: i32,
    pub store_url: String,
    pub task_time: String,
    pub stitch_state: String,
    pub requestor: String,
}

/// One taught bearing target, the full `designated_task` row.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetSpec {
    /// Which task kind uses this target (designated or video)
    pub kind: TaskKind,

    /// World-frame bearing of the target in degrees, [0, 360)
    pub bearing_deg: f64,

    /// Tilt of the target in device degrees
    pub tilt_deg: f64,

    /// Zoom of the target, [0, 1]
    pub zoom: f64,

    /// AMR position the target was taught at
    pub pos_x: i32,
    pub pos_y: i32,
    pub pos_z: i32,

    /// AMR heading when the target was taught, whole degrees
    pub heading_deg: i32,

    /// Location tag the target belongs to
    pub tag_id: i32,

    /// Clip length for video targets, seconds
    pub duration_s: Option<u32>,
}

/// One bearing target resolved for the designated or video task.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetRow {
    /// World-frame bearing in degrees, [0, 360)
    pub bearing_deg: f64,

    /// Tilt in device degrees
    pub tilt_deg: f64,

    /// Normalized zoom
    pub zoom: f64,

    /// Clip length for video targets, seconds
    pub duration_s: Option<u32>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum HistoryError {
    #[error("Could not open the history database: {0}")]
    OpenError(rusqlite::Error),

    #[error("Could not create the history schema: {0}")]
    SchemaError(rusqlite::Error),

    #[error("Could not insert the row: {0}")]
    InsertError(rusqlite::Error),

    #[error("Could not query the history database: {0}")]
    QueryError(rusqlite::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl HistoryStore {
    /// Open (creating if needed) the history database at the given path.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self, HistoryError> {
        let conn = Connection::open(db_path).map_err(HistoryError::OpenError)?;

        Self::with_connection(conn)
    }

    /// Open a store backed by memory only, used by tests.
    pub fn open_in_memory() -> Result<Self, HistoryError> {
        let conn = Connection::open_in_memory().map_err(HistoryError::OpenError)?;

        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, HistoryError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS task_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_type TEXT NOT NULL,
                amr_pos_x INTEGER NOT NULL,
                amr_pos_y INTEGER NOT NULL,
                amr_pos_z INTEGER NOT NULL,
                amr_pos_theta REAL NOT NULL,
                amr_tag_id INTEGER NOT NULL,
                store_url TEXT NOT NULL,
                task_time TEXT NOT NULL,
                stitch_state TEXT NOT NULL,
                requestor TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS designated_task (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_type TEXT NOT NULL,
                bearing REAL NOT NULL,
                tilt REAL NOT NULL,
                zoom REAL NOT NULL,
                pos_x INTEGER NOT NULL,
                pos_y INTEGER NOT NULL,
                pos_z INTEGER NOT NULL,
                heading INTEGER NOT NULL,
                tag_id INTEGER NOT NULL,
                duration INTEGER
            );",
        )
        .map_err(HistoryError::SchemaError)?;

        Ok(Self { conn })
    }

    /// Insert one provenance row.
    pub fn insert_history(&self, row: &HistoryRow) -> Result<(), HistoryError> {
        self.conn
            .execute(
                "INSERT INTO task_history (
                    task_type, amr_pos_x, amr_pos_y, amr_pos_z, amr_pos_theta,
                    amr_tag_id, store_url, task_time, stitch_state, requestor
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    row.task_type,
                    row.pos_x,
                    row.pos_y,
                    row.pos_z,
                    row.heading_deg,
                    row.tag_id,
                    row.store_url,
                    row.task_time,
                    row.stitch_state,
                    row.requestor,
                ],
            )
            .map_err(HistoryError::InsertError)?;

        Ok(())
    }

    /// Liveness check against the underlying database.
    ///
    /// The main loop calls this each cycle and reopens the store if the
    /// connection has gone bad.
    pub fn ping(&self) -> Result<(), HistoryError> {
        self.conn
            .query_row("SELECT 1", [], |_| Ok(()))
            .map_err(HistoryError::QueryError)
    }

    /// True if a provenance row for the given remote path already exists.
    ///
    /// Used by the recovery sweep so a re-run never records the same folder
    /// twice.
    pub fn history_exists(&self, store_url: &str) -> Result<bool, HistoryError> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM task_history WHERE store_url = ?1",
                params![store_url],
                |row| row.get(0),
            )
            .map_err(HistoryError::QueryError)?;

        Ok(count > 0)
    }

    /// Persist one taught bearing target.
    pub fn insert_target(&self, target: &TargetSpec) -> Result<(), HistoryError> {
        self.conn
            .execute(
                "INSERT INTO designated_task (
                    task_type, bearing, tilt, zoom, pos_x, pos_y, pos_z,
                    heading, tag_id, duration
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    target.kind.as_str(),
                    target.bearing_deg,
                    target.tilt_deg,
                    target.zoom,
                    target.pos_x,
                    target.pos_y,
                    target.pos_z,
                    target.heading_deg,
                    target.tag_id,
                    target.duration_s,
                ],
            )
            .map_err(HistoryError::InsertError)?;

        Ok(())
    }

    /// All bearing targets taught at the given location tag for the given
    /// task kind, in teach order.
    pub fn targets_for(&self, tag_id: i32, kind: TaskKind) -> Result<Vec<TargetRow>, HistoryError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT bearing, tilt, zoom, duration FROM designated_task
                 WHERE tag_id = ?1 AND task_type = ?2
                 ORDER BY id",
            )
            .map_err(HistoryError::QueryError)?;

        let rows = stmt
            .query_map(params![tag_id, kind.as_str()], |row| {
                Ok(TargetRow {
                    bearing_deg: row.get(0)?,
                    tilt_deg: row.get(1)?,
                    zoom: row.get(2)?,
                    duration_s: row.get(3)?,
                })
            })
            .map_err(HistoryError::QueryError)?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(HistoryError::QueryError)
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn target(kind: TaskKind, tag_id: i32, bearing_deg: f64) -> TargetSpec {
        TargetSpec {
            kind,
            bearing_deg,
            tilt_deg: 10.0,
            zoom: 0.0,
            pos_x: 100,
            pos_y: 200,
            pos_z: 0,
            heading_deg: 90,
            tag_id,
            duration_s: match kind {
                TaskKind::Video => Some(10),
                _ => None,
            },
        }
    }

    #[test]
    fn test_history_insert_and_exists() {
        let store = HistoryStore::open_in_memory().unwrap();

        let row = HistoryRow {
            task_type: "panorama".into(),
            pos_x: 100,
            pos_y: 200,
            pos_z: 0,
            heading_deg: 90.0,
            tag_id: 3,
            store_url: "save_imgs/(100,200,90,3)/20260101120000".into(),
            task_time: "20260101120000".into(),
            stitch_state: "none".into(),
            requestor: "AGVC".into(),
        };

        assert!(!store.history_exists(&row.store_url).unwrap());
        store.insert_history(&row).unwrap();
        assert!(store.history_exists(&row.store_url).unwrap());
    }

    #[test]
    fn test_targets_filtered_by_tag_and_kind() {
        let store = HistoryStore::open_in_memory().unwrap();

        store.insert_target(&target(TaskKind::Designated, 3, 200.0)).unwrap();
        store.insert_target(&target(TaskKind::Designated, 3, 45.0)).unwrap();
        store.insert_target(&target(TaskKind::Designated, 5, 90.0)).unwrap();
        store.insert_target(&target(TaskKind::Video, 3, 10.0)).unwrap();

        let rows = store.targets_for(3, TaskKind::Designated).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].bearing_deg, 200.0);
        assert_eq!(rows[1].bearing_deg, 45.0);
        assert!(rows[0].duration_s.is_none());

        let rows = store.targets_for(3, TaskKind::Video).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].duration_s, Some(10));

        assert!(store.targets_for(9, TaskKind::Designated).unwrap().is_empty());
    }
}
