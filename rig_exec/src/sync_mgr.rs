//! # Artifact Sync Manager
//!
//! Moves completed task folders to the remote artifact store and keeps the
//! local disk as a durable queue: a folder is only deleted locally once every
//! file in it is confirmed on the store, and a recovery sweep re-attempts any
//! stranded folders left behind by earlier failures.
//!
//! Uploads are resumable by name. Before sending, the pending set is computed
//! as the local file names minus the remote directory listing, so a re-run
//! after a partial upload only sends what is missing. Name-only comparison is
//! deliberate: local files are never rewritten after a task completes, so a
//! name match implies a content match.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    fs,
    path::Path,
};

use log::{debug, info, warn};
use thiserror::Error;

use comms_if::eqpt::store::{ArtifactStore, StoreError};

use crate::history::HistoryStore;
use crate::task_exec::manifest;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// What an [`upload_dir`] call actually transferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadReport {
    /// Files sent in this call
    pub uploaded: usize,

    /// Files already present on the store and skipped
    pub skipped: usize,
}

/// What a [`recover_stranded`] sweep achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepOutcome {
    /// Folders fully uploaded, recorded, and removed
    pub recovered: usize,

    /// Folders left in place for the next sweep
    pub failed: usize,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Store operation failed: {0}")]
    Store(#[from] StoreError),

    #[error("Could not read the local task folder: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not remove {0} local entries after upload")]
    CleanupIncomplete(usize),
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Upload every regular file in `local_dir` into the remote directory named
/// by `segments`, creating each level of the remote path that does not exist
/// yet.
///
/// Fails fast on the first transfer error, leaving the remote directory with
/// a prefix of the pending set. A later call resumes from the listing. An
/// empty pending set is a success.
pub fn upload_dir<S: ArtifactStore + ?Sized>(
    store: &mut S,
    segments: &[&str],
    local_dir: &Path,
) -> Result<UploadReport, SyncError> {
    // Walk down the remote path, creating each missing level. Listing the
    // parent first keeps MakeDir off the wire for levels that already exist.
    let mut remote_path = String::new();
    for segment in segments {
        let entries = store.list_dir(&remote_path)?;

        if !remote_path.is_empty() {
            remote_path.push('/');
        }
        remote_path.push_str(segment);

        if !entries.iter().any(|e| e == segment) {
            store.make_dir(&remote_path)?;
        }
    }

    // Pending set: local names not yet present remotely, in sorted order so
    // re-runs send in a stable order.
    let remote_entries = store.list_dir(&remote_path)?;

    let mut local_files: Vec<String> = fs::read_dir(local_dir)?
        .filter_map(|entry| {
            let entry = entry.ok()?;
            if entry.file_type().ok()?.is_file() {
                entry.file_name().into_string().ok()
            } else {
                None
            }
        })
        .collect();
    local_files.sort();

    let mut report = UploadReport {
        uploaded: 0,
        skipped: 0,
    };

    for name in &local_files {
        if remote_entries.iter().any(|e| e == name) {
            report.skipped += 1;
            continue;
        }

        let data = fs::read(local_dir.join(name))?;
        store.put_file(&format!("{}/{}", remote_path, name), &data)?;
        report.uploaded += 1;
    }

    debug!(
        "Uploaded {} file(s) to \"{}\" ({} already present)",
        report.uploaded, remote_path, report.skipped
    );

    Ok(report)
}

/// Remove a fully delivered task folder: its files first, then the folder
/// itself, then the position folder above it if that is now empty.
///
/// Removal is best effort, every entry is attempted even after a failure, and
/// the number of entries which could not be removed is reported at the end.
pub fn remove_local(task_dir: &Path, remove_parent_if_empty: bool) -> Result<(), SyncError> {
    let mut failures = 0;

    for entry in fs::read_dir(task_dir)? {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => {
                failures += 1;
                continue;
            }
        };

        if fs::remove_file(entry.path()).is_err() {
            warn!("Could not remove \"{}\"", entry.path().display());
            failures += 1;
        }
    }

    if failures == 0 && fs::remove_dir(task_dir).is_err() {
        warn!("Could not remove \"{}\"", task_dir.display());
        failures += 1;
    }

    if failures == 0 && remove_parent_if_empty {
        if let Some(parent) = task_dir.parent() {
            // Only an empty position folder may go, remove_dir refuses
            // non-empty directories.
            if fs::read_dir(parent)
                .map(|mut it| it.next().is_none())
                .unwrap_or(false)
            {
                let _ = fs::remove_dir(parent);
            }
        }
    }

    if failures > 0 {
        Err(SyncError::CleanupIncomplete(failures))
    } else {
        Ok(())
    }
}

/// Sweep `base_dir` for task folders stranded by earlier failures, and for
/// each one: upload it, reconstruct its provenance row from the manifest,
/// record the row unless one already exists, and remove the folder.
///
/// A folder whose upload fails is skipped and left for the next sweep. A
/// provenance insert failure aborts the sweep, since while the store is
/// healthy but the database is not, deleting local folders would lose the
/// only remaining record of them.
pub fn recover_stranded<S, F>(
    mut connect: F,
    base_dir: &Path,
    namespace: &str,
    history: &HistoryStore,
) -> SweepOutcome
where
    S: ArtifactStore,
    F: FnMut() -> Result<S, StoreError>,
{
    let mut outcome = SweepOutcome::default();

    let pos_dirs = match fs::read_dir(base_dir) {
        Ok(it) => it,
        // Nothing stranded if the base directory was never created
        Err(_) => return outcome,
    };

    for pos_entry in pos_dirs.flatten() {
        if !pos_entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        let pos_name = pos_entry.file_name().to_string_lossy().into_owned();

        let task_dirs = match fs::read_dir(pos_entry.path()) {
            Ok(it) => it,
            Err(_) => continue,
        };

        for task_entry in task_dirs.flatten() {
            if !task_entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let task_name = task_entry.file_name().to_string_lossy().into_owned();
            let task_dir = task_entry.path();

            // Fresh connection per folder, a half-dead session from a failed
            // upload must not poison the rest of the sweep.
            let mut store = match connect() {
                Ok(s) => s,
                Err(e) => {
                    warn!("Recovery sweep could not reach the store: {}", e);
                    outcome.failed += 1;
                    continue;
                }
            };

            match upload_dir(&mut store, &[namespace, &pos_name, &task_name], &task_dir) {
                Ok(_) => (),
                Err(e) => {
                    warn!(
                        "Recovery upload of \"{}\" failed: {}",
                        task_dir.display(),
                        e
                    );
                    outcome.failed += 1;
                    continue;
                }
            }

            let row = match manifest::parse(&task_dir) {
                Ok(parsed) => parsed.to_history_row(),
                Err(e) => {
                    warn!(
                        "Could not parse the manifest in \"{}\": {}",
                        task_dir.display(),
                        e
                    );
                    outcome.failed += 1;
                    continue;
                }
            };

            // Insert before delete: a crash between the two leaves a folder
            // that the next sweep's duplicate check skips over recording.
            match history.history_exists(&row.store_url) {
                Ok(true) => (),
                Ok(false) => {
                    if let Err(e) = history.insert_history(&row) {
                        warn!("Could not record a recovered task: {}", e);
                        return outcome;
                    }
                }
                Err(e) => {
                    warn!("Could not query the task history: {}", e);
                    return outcome;
                }
            }

            if let Err(e) = remove_local(&task_dir, true) {
                warn!(
                    "Could not remove the recovered folder \"{}\": {}",
                    task_dir.display(),
                    e
                );
                outcome.failed += 1;
                continue;
            }

            info!("Recovered the stranded task folder \"{}\"", task_dir.display());
            outcome.recovered += 1;
        }
    }

    outcome
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::BTreeMap;
    use std::fs;
    use std::path::PathBuf;

    /// In-memory store: a map from directory path to entry names, with an
    /// optional file name that fails on put.
    struct MemStore {
        dirs: BTreeMap<String, Vec<String>>,
        fail_on: Option<String>,
        puts: Vec<String>,
    }

    impl MemStore {
        fn new() -> Self {
            let mut dirs = BTreeMap::new();
            dirs.insert(String::new(), Vec::new());
            Self {
                dirs,
                fail_on: None,
                puts: Vec::new(),
            }
        }
    }

    impl ArtifactStore for MemStore {
        fn list_dir(&mut self, path: &str) -> Result<Vec<String>, StoreError> {
            self.dirs
                .get(path)
                .cloned()
                .ok_or_else(|| StoreError::Rejected(format!("no such dir: {}", path)))
        }

        fn make_dir(&mut self, path: &str) -> Result<(), StoreError> {
            let (parent, name) = match path.rsplit_once('/') {
                Some((p, n)) => (p.to_owned(), n.to_owned()),
                None => (String::new(), path.to_owned()),
            };
            self.dirs
                .get_mut(&parent)
                .ok_or_else(|| StoreError::Rejected(format!("no parent for: {}", path)))?
                .push(name);
            self.dirs.insert(path.to_owned(), Vec::new());
            Ok(())
        }

        fn put_file(&mut self, path: &str, _data: &[u8]) -> Result<(), StoreError> {
            let (parent, name) = path.rsplit_once('/').unwrap();
            if self.fail_on.as_deref() == Some(name) {
                return Err(StoreError::Rejected("simulated failure".into()));
            }
            self.dirs
                .get_mut(parent)
                .ok_or_else(|| StoreError::Rejected(format!("no parent for: {}", path)))?
                .push(name.to_owned());
            self.puts.push(path.to_owned());
            Ok(())
        }
    }

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("rig_sync_{}_{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_upload_creates_levels_and_is_idempotent() {
        let dir = temp_dir("idempotent");
        fs::write(dir.join("a.jpg"), b"a").unwrap();
        fs::write(dir.join("b.jpg"), b"b").unwrap();
        fs::write(dir.join("info.txt"), b"task_type:panorama\n").unwrap();

        let mut store = MemStore::new();

        let report = upload_dir(&mut store, &["save_imgs", "(0,0,0,1)", "20260101"], &dir).unwrap();
        assert_eq!(report.uploaded, 3);
        assert_eq!(report.skipped, 0);
        assert!(store.dirs.contains_key("save_imgs/(0,0,0,1)/20260101"));

        // Second run sends nothing
        let report = upload_dir(&mut store, &["save_imgs", "(0,0,0,1)", "20260101"], &dir).unwrap();
        assert_eq!(report.uploaded, 0);
        assert_eq!(report.skipped, 3);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_upload_fail_fast_then_resume() {
        let dir = temp_dir("resume");
        fs::write(dir.join("a.jpg"), b"a").unwrap();
        fs::write(dir.join("b.jpg"), b"b").unwrap();
        fs::write(dir.join("c.jpg"), b"c").unwrap();

        let mut store = MemStore::new();
        store.fail_on = Some("b.jpg".into());

        assert!(upload_dir(&mut store, &["obstacle_imgs", "x", "y"], &dir).is_err());
        // Sorted order, so a.jpg landed before the failure on b.jpg
        assert_eq!(store.puts, vec!["obstacle_imgs/x/y/a.jpg"]);

        store.fail_on = None;
        let report = upload_dir(&mut store, &["obstacle_imgs", "x", "y"], &dir).unwrap();
        assert_eq!(report.uploaded, 2);
        assert_eq!(report.skipped, 1);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_upload_empty_dir_succeeds() {
        let dir = temp_dir("empty");
        let mut store = MemStore::new();

        let report = upload_dir(&mut store, &["save_imgs", "p", "t"], &dir).unwrap();
        assert_eq!(report.uploaded, 0);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_remove_local_takes_empty_parent() {
        let base = temp_dir("remove");
        let pos = base.join("(0,0,0,1)");
        let task = pos.join("20260101120000");
        fs::create_dir_all(&task).unwrap();
        fs::write(task.join("a.jpg"), b"a").unwrap();

        remove_local(&task, true).unwrap();

        assert!(!task.exists());
        assert!(!pos.exists());

        fs::remove_dir_all(&base).unwrap();
    }

    #[test]
    fn test_remove_local_keeps_nonempty_parent() {
        let base = temp_dir("keep_parent");
        let pos = base.join("(0,0,0,1)");
        let task_a = pos.join("a");
        let task_b = pos.join("b");
        fs::create_dir_all(&task_a).unwrap();
        fs::create_dir_all(&task_b).unwrap();

        remove_local(&task_a, true).unwrap();

        assert!(!task_a.exists());
        assert!(pos.exists());

        fs::remove_dir_all(&base).unwrap();
    }

    #[test]
    fn test_recover_stranded_records_and_removes() {
        let base = temp_dir("sweep");
        let task = base.join("(1,2,3,4)").join("20260101120000");
        fs::create_dir_all(&task).unwrap();
        fs::write(task.join("img.jpg"), b"img").unwrap();
        fs::write(
            task.join("info.txt"),
            "task_type:panorama\nstore_url:save_imgs/(1,2,3,4)/20260101120000\n",
        )
        .unwrap();

        let history = HistoryStore::open_in_memory().unwrap();

        let outcome = recover_stranded(
            || Ok(MemStore::new()),
            &base,
            "save_imgs",
            &history,
        );

        assert_eq!(outcome.recovered, 1);
        assert_eq!(outcome.failed, 0);
        assert!(!task.exists());
        assert!(history
            .history_exists("save_imgs/(1,2,3,4)/20260101120000")
            .unwrap());

        fs::remove_dir_all(&base).unwrap();
    }

    #[test]
    fn test_recover_stranded_skips_failed_upload() {
        let base = temp_dir("sweep_fail");
        let task = base.join("(1,2,3,4)").join("20260101120000");
        fs::create_dir_all(&task).unwrap();
        fs::write(task.join("img.jpg"), b"img").unwrap();
        fs::write(task.join("info.txt"), "task_type:panorama\n").unwrap();

        let history = HistoryStore::open_in_memory().unwrap();

        let outcome = recover_stranded(
            || {
                let mut store = MemStore::new();
                store.fail_on = Some("img.jpg".into());
                Ok(store)
            },
            &base,
            "save_imgs",
            &history,
        );

        assert_eq!(outcome.recovered, 0);
        assert_eq!(outcome.failed, 1);
        // Folder retained for the next sweep
        assert!(task.exists());

        fs::remove_dir_all(&base).unwrap();
    }
}
