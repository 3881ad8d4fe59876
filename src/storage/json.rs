//! File-backed store.
//!
//! State lives in a `.campaign-recovery` directory next to the caller's
//! working data:
//!
//! ```text
//! <base>/.campaign-recovery/snapshots.json   campaign id -> snapshot
//! <base>/.campaign-recovery/errors.json      ledger rows
//! ```
//!
//! Every write replaces the whole file atomically (temp file, `sync_all`,
//! rename), so a crash mid-write leaves the previous contents intact.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{check_version, ErrorLedger, SnapshotStore, StorageError, StorageResult};
use crate::ledger::{sort_newest_first, CampaignError, ErrorId, NewCampaignError};
use crate::snapshot::{CampaignProgressSnapshot, SnapshotPatch};

/// Name of the state directory created under the base directory.
pub const STATE_DIR_NAME: &str = ".campaign-recovery";

const SNAPSHOTS_FILE_NAME: &str = "snapshots.json";
const ERRORS_FILE_NAME: &str = "errors.json";

/// Store that keeps snapshots and ledger rows in two JSON files.
#[derive(Debug)]
pub struct JsonFileStore {
    state_dir: PathBuf,
    snapshots_path: PathBuf,
    errors_path: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Opens the store under `base_dir`, creating the state directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new(base_dir: impl Into<PathBuf>) -> StorageResult<Self> {
        let state_dir = base_dir.into().join(STATE_DIR_NAME);
        fs::create_dir_all(&state_dir)?;

        Ok(Self {
            snapshots_path: state_dir.join(SNAPSHOTS_FILE_NAME),
            errors_path: state_dir.join(ERRORS_FILE_NAME),
            state_dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn snapshots_path(&self) -> &Path {
        &self.snapshots_path
    }

    pub fn errors_path(&self) -> &Path {
        &self.errors_path
    }

    fn read_snapshots(&self) -> StorageResult<BTreeMap<String, CampaignProgressSnapshot>> {
        read_json_or_default(&self.snapshots_path)
    }

    fn read_errors(&self) -> StorageResult<Vec<CampaignError>> {
        read_json_or_default(&self.errors_path)
    }
}

/// Reads a JSON file, treating a missing file as the default value.
fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> StorageResult<T> {
    match fs::read_to_string(path) {
        Ok(content) if content.trim().is_empty() => Ok(T::default()),
        Ok(content) => Ok(serde_json::from_str(&content)?),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(StorageError::Io(e)),
    }
}

/// Writes `value` to `path` via a temp file in the same directory.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> StorageResult<()> {
    let json = serde_json::to_string_pretty(value)?;

    // Same directory so the rename cannot cross filesystems
    let temp_path = path.with_extension("json.tmp");

    let mut file = fs::File::create(&temp_path)?;
    file.write_all(json.as_bytes())?;
    file.sync_all()?;

    fs::rename(&temp_path, path)?;
    Ok(())
}

impl SnapshotStore for JsonFileStore {
    fn save(
        &self,
        campaign_id: &str,
        patch: &SnapshotPatch,
        now: DateTime<Utc>,
    ) -> StorageResult<CampaignProgressSnapshot> {
        let _guard = self.write_lock.lock().map_err(|_| StorageError::LockPoisoned)?;

        let mut snapshots = self.read_snapshots()?;
        let snapshot = snapshots
            .entry(campaign_id.to_string())
            .or_insert_with(|| CampaignProgressSnapshot::new(campaign_id, now));
        check_version(snapshot)?;
        snapshot.apply(patch, now);
        let saved = snapshot.clone();

        write_json_atomic(&self.snapshots_path, &snapshots)?;
        Ok(saved)
    }

    fn load(&self, campaign_id: &str) -> StorageResult<Option<CampaignProgressSnapshot>> {
        let mut snapshots = self.read_snapshots()?;
        match snapshots.remove(campaign_id) {
            Some(snapshot) => {
                check_version(&snapshot)?;
                Ok(Some(snapshot))
            }
            None => Ok(None),
        }
    }
}

impl ErrorLedger for JsonFileStore {
    fn record(&self, error: NewCampaignError) -> StorageResult<ErrorId> {
        let _guard = self.write_lock.lock().map_err(|_| StorageError::LockPoisoned)?;

        let mut errors = self.read_errors()?;
        let id = ErrorId::new();
        errors.push(error.into_record(id));
        write_json_atomic(&self.errors_path, &errors)?;
        Ok(id)
    }

    fn list_all(&self, campaign_id: &str) -> StorageResult<Vec<CampaignError>> {
        let mut matching: Vec<CampaignError> = self
            .read_errors()?
            .into_iter()
            .filter(|e| e.campaign_id == campaign_id)
            .collect();
        sort_newest_first(&mut matching);
        Ok(matching)
    }

    fn resolve(&self, id: &ErrorId, now: DateTime<Utc>) -> StorageResult<bool> {
        let _guard = self.write_lock.lock().map_err(|_| StorageError::LockPoisoned)?;

        let mut errors = self.read_errors()?;
        let error = errors
            .iter_mut()
            .find(|e| e.id == *id)
            .ok_or(StorageError::ErrorNotFound(*id))?;
        if !error.resolve(now) {
            return Ok(false);
        }
        write_json_atomic(&self.errors_path, &errors)?;
        Ok(true)
    }

    fn resolve_all(&self, campaign_id: &str, now: DateTime<Utc>) -> StorageResult<usize> {
        let _guard = self.write_lock.lock().map_err(|_| StorageError::LockPoisoned)?;

        let mut errors = self.read_errors()?;
        let mut closed = 0;
        for error in errors.iter_mut().filter(|e| e.campaign_id == campaign_id) {
            if error.resolve(now) {
                closed += 1;
            }
        }
        if closed > 0 {
            write_json_atomic(&self.errors_path, &errors)?;
        }
        Ok(closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::snapshot::PlatformProgress;
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn failure(kind: ErrorKind, at: DateTime<Utc>) -> NewCampaignError {
        NewCampaignError {
            campaign_id: "C1".to_string(),
            error_kind: kind,
            error_message: "connection reset".to_string(),
            error_details: Some(serde_json::json!({"status": 503})),
            step_name: "publish:a".to_string(),
            retry_count: 1,
            max_retries: 5,
            can_auto_resume: true,
            created_at: at,
        }
    }

    #[test]
    fn test_new_creates_state_dir() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(temp_dir.path()).unwrap();
        assert!(temp_dir.path().join(STATE_DIR_NAME).is_dir());
        assert_eq!(store.state_dir(), temp_dir.path().join(STATE_DIR_NAME));
    }

    #[test]
    fn test_load_without_files() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(temp_dir.path()).unwrap();
        assert!(store.load("C1").unwrap().is_none());
        assert!(store.list_all("C1").unwrap().is_empty());
    }

    #[test]
    fn test_snapshot_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = JsonFileStore::new(temp_dir.path()).unwrap();
            store
                .save(
                    "C1",
                    &SnapshotPatch::new()
                        .with_current_step("publish:a")
                        .with_completed_step("generate_content")
                        .with_platform("a", PlatformProgress::failed("timeout", 1))
                        .with_generated_content("body"),
                    t0(),
                )
                .unwrap();
        }

        let reopened = JsonFileStore::new(temp_dir.path()).unwrap();
        let loaded = reopened.load("C1").unwrap().unwrap();
        assert_eq!(loaded.current_step, "publish:a");
        assert_eq!(loaded.generated_content.as_deref(), Some("body"));
        assert_eq!(loaded.completed_steps, vec!["generate_content"]);
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(temp_dir.path()).unwrap();
        store.save("C1", &SnapshotPatch::new(), t0()).unwrap();

        assert!(store.snapshots_path().exists());
        assert!(!store.snapshots_path().with_extension("json.tmp").exists());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(temp_dir.path()).unwrap();
        fs::write(store.snapshots_path(), "{ not json").unwrap();

        let err = store.load("C1").unwrap_err();
        assert!(matches!(err, StorageError::Json(_)));
    }

    #[test]
    fn test_newer_snapshot_version_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(temp_dir.path()).unwrap();
        store.save("C1", &SnapshotPatch::new(), t0()).unwrap();

        let content = fs::read_to_string(store.snapshots_path()).unwrap();
        let mut value: serde_json::Value = serde_json::from_str(&content).unwrap();
        value["C1"]["version"] = serde_json::json!(99);
        fs::write(store.snapshots_path(), value.to_string()).unwrap();

        let err = store.load("C1").unwrap_err();
        assert!(matches!(
            err,
            StorageError::VersionMismatch { expected: 1, found: 99 }
        ));
    }

    #[test]
    fn test_ledger_roundtrip_and_resolve() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(temp_dir.path()).unwrap();
        let first = store.record(failure(ErrorKind::Network, t0())).unwrap();
        let second = store
            .record(failure(ErrorKind::RateLimit, t0() + Duration::minutes(3)))
            .unwrap();

        let open = store.list_open("C1").unwrap();
        assert_eq!(open.iter().map(|e| e.id).collect::<Vec<_>>(), vec![second, first]);
        assert_eq!(open[1].error_details, Some(serde_json::json!({"status": 503})));

        assert!(store.resolve(&first, t0()).unwrap());
        assert!(!store.resolve(&first, t0()).unwrap());

        let reopened = JsonFileStore::new(temp_dir.path()).unwrap();
        let open = reopened.list_open("C1").unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, second);
    }

    #[test]
    fn test_resolve_all_and_unknown_id() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(temp_dir.path()).unwrap();
        store.record(failure(ErrorKind::Network, t0())).unwrap();
        store.record(failure(ErrorKind::Network, t0())).unwrap();

        assert_eq!(store.resolve_all("C1", t0()).unwrap(), 2);
        assert!(store.list_open("C1").unwrap().is_empty());
        assert!(matches!(
            store.resolve(&ErrorId::new(), t0()),
            Err(StorageError::ErrorNotFound(_))
        ));
    }
}
