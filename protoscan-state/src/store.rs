use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use protoscan_types::{ProtocolKind, ScanInput, ScanSnapshot};

use crate::StateError;

pub const DEFAULT_STATE_DIR: &str = "./logs/scans";
pub const INDEX_FILE: &str = "incomplete_scans.json";

/// The persisted projection of a scan context plus its original inputs.
/// Field names are the on-disk contract; resumed runs are rebuilt from this.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanState {
    pub scan_id: String,
    pub protocol: ProtocolKind,
    pub host_range: String,
    pub port_range: String,
    pub threads: usize,
    pub timeout: u64,
    pub user: String,
    pub password: String,
    pub private_key: String,
    pub start_time: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub total_targets: usize,
    pub scanned_count: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub completed_targets: Vec<String>,
    pub failed_targets: Vec<String>,
    pub pending_targets: Vec<String>,
    pub csv_file_path: String,
    pub state_path: String,
}

impl ScanState {
    pub fn is_complete(&self) -> bool {
        self.pending_targets.is_empty()
    }

    pub fn progress_percent(&self) -> f64 {
        if self.total_targets == 0 {
            0.0
        } else {
            self.scanned_count as f64 / self.total_targets as f64 * 100.0
        }
    }

    /// Rebuild the original inputs for a resumed run.
    pub fn to_input(&self) -> ScanInput {
        ScanInput {
            host: self.host_range.clone(),
            port: self.port_range.clone(),
            user: self.user.clone(),
            password: self.password.clone(),
            private_key_path: self.private_key.clone(),
        }
    }

    pub fn to_snapshot(&self) -> ScanSnapshot {
        ScanSnapshot {
            scan_id: self.scan_id.clone(),
            protocol: self.protocol,
            host_range: self.host_range.clone(),
            port_range: self.port_range.clone(),
            threads: self.threads,
            timeout_ms: self.timeout,
            start_time: self.start_time,
            update_time: self.last_update,
            total_targets: self.total_targets,
            scanned_count: self.scanned_count,
            success_count: self.success_count,
            failure_count: self.failure_count,
            completed_targets: self.completed_targets.clone(),
            failed_targets: self.failed_targets.clone(),
            pending_targets: self.pending_targets.clone(),
        }
    }
}

/// Persistence layer for scan states under a single storage directory.
pub struct ResumeManager {
    storage_dir: PathBuf,
}

impl ResumeManager {
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        let storage_dir: PathBuf = storage_dir.into();
        let storage_dir = if storage_dir.as_os_str().is_empty() {
            PathBuf::from(DEFAULT_STATE_DIR)
        } else {
            storage_dir
        };
        Self { storage_dir }
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    fn state_path(&self, scan_id: &str) -> PathBuf {
        self.storage_dir.join(format!("{scan_id}.state"))
    }

    fn index_path(&self) -> PathBuf {
        self.storage_dir.join(INDEX_FILE)
    }

    /// Persist a snapshot and refresh the incomplete-scans index. Target
    /// lists are sorted so identical states serialize to identical bytes.
    pub fn save_scan_state(
        &self,
        snapshot: &ScanSnapshot,
        input: &ScanInput,
        csv_file_path: &str,
    ) -> Result<ScanState, StateError> {
        fs::create_dir_all(&self.storage_dir)?;

        let state_path = self.state_path(&snapshot.scan_id);
        let mut completed = snapshot.completed_targets.clone();
        completed.sort();
        let mut failed = snapshot.failed_targets.clone();
        failed.sort();
        let mut pending = snapshot.pending_targets.clone();
        pending.sort();

        let state = ScanState {
            scan_id: snapshot.scan_id.clone(),
            protocol: snapshot.protocol,
            host_range: snapshot.host_range.clone(),
            port_range: snapshot.port_range.clone(),
            threads: snapshot.threads,
            timeout: snapshot.timeout_ms,
            user: input.user.clone(),
            password: input.password.clone(),
            private_key: input.private_key_path.clone(),
            start_time: snapshot.start_time,
            last_update: Utc::now(),
            total_targets: snapshot.total_targets,
            scanned_count: snapshot.scanned_count,
            success_count: snapshot.success_count,
            failure_count: snapshot.failure_count,
            completed_targets: completed,
            failed_targets: failed,
            pending_targets: pending,
            csv_file_path: csv_file_path.to_string(),
            state_path: state_path.to_string_lossy().into_owned(),
        };

        write_json_atomic(&state_path, &state)?;
        self.update_index(&state)?;

        info!(
            scan_id = %state.scan_id,
            scanned = state.scanned_count,
            total = state.total_targets,
            pending = state.pending_targets.len(),
            "saved scan state"
        );
        Ok(state)
    }

    pub fn load_scan_state(&self, scan_id: &str) -> Result<ScanState, StateError> {
        let path = self.state_path(scan_id);
        let data = fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StateError::NotFound(scan_id.to_string())
            } else {
                StateError::Io(e)
            }
        })?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// All scans still in the index, newest first. Entries whose state file
    /// fails to load are skipped with a warning.
    pub fn list_incomplete_scans(&self) -> Result<Vec<ScanState>, StateError> {
        let index = self.read_index()?;
        let mut scans = Vec::with_capacity(index.len());
        for scan_id in index.keys() {
            match self.load_scan_state(scan_id) {
                Ok(state) => scans.push(state),
                Err(e) => warn!("failed to load scan state for {scan_id}: {e}"),
            }
        }
        scans.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(scans)
    }

    pub fn remove_incomplete_scan(&self, scan_id: &str) -> Result<(), StateError> {
        let mut index = self.read_index()?;
        if index.remove(scan_id).is_none() {
            return Ok(());
        }
        self.write_index(&index)
    }

    /// Remove `.state` files (and their index entries) whose last update is
    /// older than `max_age`. Returns the number of files removed.
    pub fn cleanup_old_states(&self, max_age: Duration) -> Result<usize, StateError> {
        if !self.storage_dir.exists() {
            return Ok(0);
        }
        let cutoff = std::time::SystemTime::now() - max_age;
        let mut removed = 0;

        for entry in fs::read_dir(&self.storage_dir)? {
            let entry = entry?;
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(scan_id) = name.strip_suffix(".state") else {
                continue;
            };
            let modified = entry.metadata()?.modified()?;
            if modified >= cutoff {
                continue;
            }
            if let Err(e) = fs::remove_file(&path) {
                warn!("failed to remove old state file {name}: {e}");
                continue;
            }
            self.remove_incomplete_scan(scan_id)?;
            removed += 1;
        }

        debug!("cleaned up {removed} old scan state files");
        Ok(removed)
    }

    fn read_index(&self) -> Result<BTreeMap<String, String>, StateError> {
        match fs::read(self.index_path()) {
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(StateError::Io(e)),
        }
    }

    fn write_index(&self, index: &BTreeMap<String, String>) -> Result<(), StateError> {
        let path = self.index_path();
        if index.is_empty() {
            // An empty index file is deleted, not left behind.
            match fs::remove_file(&path) {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
                Err(e) => return Err(StateError::Io(e)),
            }
        }
        write_json_atomic(&path, index)
    }

    fn update_index(&self, state: &ScanState) -> Result<(), StateError> {
        if state.is_complete() {
            return self.remove_incomplete_scan(&state.scan_id);
        }
        let mut index = self.read_index()?;
        index.insert(state.scan_id.clone(), format!("{}.state", state.scan_id));
        self.write_index(&index)
    }
}

/// Write pretty JSON to `<path>.tmp`, then rename over `<path>`. The temp
/// file is removed when the rename fails.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StateError> {
    let data = serde_json::to_vec_pretty(value)?;
    let tmp_path = path.with_extension(match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{ext}.tmp"),
        None => "tmp".to_string(),
    });

    fs::write(&tmp_path, &data)?;
    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(StateError::Io(e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    static DIR_SEQ: AtomicU64 = AtomicU64::new(0);

    fn temp_manager() -> (ResumeManager, PathBuf) {
        let dir = std::env::temp_dir().join(format!(
            "protoscan_state_test_{}_{}",
            std::process::id(),
            DIR_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        let _ = fs::remove_dir_all(&dir);
        (ResumeManager::new(&dir), dir)
    }

    fn snapshot(scan_id: &str, pending: &[&str]) -> ScanSnapshot {
        ScanSnapshot {
            scan_id: scan_id.to_string(),
            protocol: ProtocolKind::Ssh,
            host_range: "10.0.0.1-10".to_string(),
            port_range: "22".to_string(),
            threads: 10,
            timeout_ms: 1000,
            start_time: Utc::now(),
            update_time: Utc::now(),
            total_targets: pending.len() + 3,
            scanned_count: 3,
            success_count: 1,
            failure_count: 2,
            completed_targets: vec!["10.0.0.1:22".to_string()],
            failed_targets: vec!["10.0.0.3:22".to_string(), "10.0.0.2:22".to_string()],
            pending_targets: pending.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn save_then_load_roundtrips() {
        let (manager, dir) = temp_manager();
        let input = ScanInput {
            host: "10.0.0.1-10".to_string(),
            port: "22".to_string(),
            ..Default::default()
        };

        let saved = manager
            .save_scan_state(&snapshot("scan_100", &["10.0.0.5:22", "10.0.0.4:22"]), &input, "")
            .unwrap();
        let loaded = manager.load_scan_state("scan_100").unwrap();
        assert_eq!(saved, loaded);

        // Lists come back sorted regardless of snapshot order.
        assert_eq!(loaded.failed_targets, vec!["10.0.0.2:22", "10.0.0.3:22"]);
        assert_eq!(loaded.pending_targets, vec!["10.0.0.4:22", "10.0.0.5:22"]);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_state_is_not_found() {
        let (manager, dir) = temp_manager();
        assert!(matches!(
            manager.load_scan_state("scan_does_not_exist"),
            Err(StateError::NotFound(_))
        ));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn no_tmp_residue_after_save() {
        let (manager, dir) = temp_manager();
        manager
            .save_scan_state(&snapshot("scan_101", &["a:1"]), &ScanInput::default(), "")
            .unwrap();

        let leftovers: Vec<_> = fs::read_dir(&dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "tmp"))
            .collect();
        assert!(leftovers.is_empty());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn atomic_write_is_byte_idempotent() {
        let (_, dir) = temp_manager();
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("scan_x.state");

        let state = ResumeManager::new(&dir)
            .save_scan_state(&snapshot("scan_x", &["a:1"]), &ScanInput::default(), "")
            .unwrap();
        write_json_atomic(&path, &state).unwrap();
        let first = fs::read(&path).unwrap();
        write_json_atomic(&path, &state).unwrap();
        let second = fs::read(&path).unwrap();
        assert_eq!(first, second);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn incomplete_scan_enters_index_complete_scan_leaves() {
        let (manager, dir) = temp_manager();
        let input = ScanInput::default();

        manager
            .save_scan_state(&snapshot("scan_102", &["a:1"]), &input, "")
            .unwrap();
        let listed = manager.list_incomplete_scans().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].scan_id, "scan_102");

        // Re-save with nothing pending: entry leaves the index, and the
        // now-empty index file is deleted.
        manager
            .save_scan_state(&snapshot("scan_102", &[]), &input, "")
            .unwrap();
        assert!(manager.list_incomplete_scans().unwrap().is_empty());
        assert!(!dir.join(INDEX_FILE).exists());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn list_sorts_newest_first() {
        let (manager, dir) = temp_manager();
        let input = ScanInput::default();

        let mut older = snapshot("scan_old", &["a:1"]);
        older.start_time = Utc::now() - chrono::Duration::hours(2);
        let newer = snapshot("scan_new", &["b:1"]);

        manager.save_scan_state(&older, &input, "").unwrap();
        manager.save_scan_state(&newer, &input, "").unwrap();

        let listed = manager.list_incomplete_scans().unwrap();
        assert_eq!(listed[0].scan_id, "scan_new");
        assert_eq!(listed[1].scan_id, "scan_old");

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn cleanup_removes_only_old_states() {
        let (manager, dir) = temp_manager();
        let input = ScanInput::default();
        manager
            .save_scan_state(&snapshot("scan_103", &["a:1"]), &input, "")
            .unwrap();

        // Fresh file, nothing to clean.
        assert_eq!(manager.cleanup_old_states(Duration::from_secs(3600)).unwrap(), 0);
        // Zero max-age makes everything stale.
        assert_eq!(manager.cleanup_old_states(Duration::ZERO).unwrap(), 1);
        assert!(manager.list_incomplete_scans().unwrap().is_empty());
        assert!(matches!(
            manager.load_scan_state("scan_103"),
            Err(StateError::NotFound(_))
        ));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn state_helpers() {
        let (manager, dir) = temp_manager();
        let input = ScanInput {
            host: "10.0.0.1-10".to_string(),
            port: "22".to_string(),
            user: "probe".to_string(),
            ..Default::default()
        };
        let state = manager
            .save_scan_state(&snapshot("scan_104", &["a:1"]), &input, "/tmp/out.csv")
            .unwrap();

        assert!(!state.is_complete());
        assert!((state.progress_percent() - 75.0).abs() < 0.001);
        let rebuilt = state.to_input();
        assert_eq!(rebuilt.host, "10.0.0.1-10");
        assert_eq!(rebuilt.user, "probe");
        assert_eq!(state.to_snapshot().pending_targets, vec!["a:1"]);
        assert_eq!(state.csv_file_path, "/tmp/out.csv");

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn empty_dir_defaults() {
        let manager = ResumeManager::new("");
        assert_eq!(manager.storage_dir(), Path::new(DEFAULT_STATE_DIR));
    }
}
