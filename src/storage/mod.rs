//! Persistence for progress snapshots and the error ledger.
//!
//! Two narrow traits describe what the recovery engine needs from a store:
//! [`SnapshotStore`] (upsert/load of one snapshot per campaign) and
//! [`ErrorLedger`] (append-only failure log with resolution). Three backends
//! implement both:
//!
//! - [`MemoryStore`]: process-local maps, for tests and short-lived runs.
//! - [`JsonFileStore`]: two JSON files written atomically under a state directory.
//! - [`SqliteStore`]: the `campaign_errors` and `campaign_progress_snapshots` tables.
//!
//! The traits are synchronous and object-safe so a single store can sit
//! behind an `Arc` shared by many campaign workers.

pub mod json;
pub mod memory;
pub mod sqlite;

pub use json::JsonFileStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::fmt;
use std::io;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ledger::{CampaignError, ErrorId, NewCampaignError};
use crate::snapshot::{CampaignProgressSnapshot, SnapshotPatch};

/// Errors that can occur during store operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// SQLite error.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// No ledger row has this id.
    #[error("error {0} not found")]
    ErrorNotFound(ErrorId),

    /// A lock guarding the store was poisoned by a panicking writer.
    #[error("store lock poisoned")]
    LockPoisoned,

    /// Stored data could not be interpreted.
    #[error("invalid stored data: {0}")]
    InvalidData(String),

    /// Stored snapshot was written by a newer format version.
    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// Result type for store operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Durable per-campaign progress.
pub trait SnapshotStore: Send + Sync {
    /// Merges `patch` into the campaign's snapshot, creating it on first save,
    /// and returns the stored result.
    ///
    /// Saving the same patch twice at the same `now` stores the same row.
    fn save(
        &self,
        campaign_id: &str,
        patch: &SnapshotPatch,
        now: DateTime<Utc>,
    ) -> StorageResult<CampaignProgressSnapshot>;

    /// Returns `Ok(None)` when the campaign has never been saved.
    fn load(&self, campaign_id: &str) -> StorageResult<Option<CampaignProgressSnapshot>>;
}

/// Append-only log of classified failures.
pub trait ErrorLedger: Send + Sync {
    /// Appends a row and returns its assigned id.
    fn record(&self, error: NewCampaignError) -> StorageResult<ErrorId>;

    /// Unresolved errors for a campaign, newest first.
    fn list_open(&self, campaign_id: &str) -> StorageResult<Vec<CampaignError>> {
        Ok(self
            .list_all(campaign_id)?
            .into_iter()
            .filter(CampaignError::is_open)
            .collect())
    }

    /// Every error for a campaign, newest first.
    fn list_all(&self, campaign_id: &str) -> StorageResult<Vec<CampaignError>>;

    /// Marks an error resolved.
    ///
    /// Returns `true` when this call resolved it and `false` when it was
    /// already resolved. Unknown ids fail with [`StorageError::ErrorNotFound`].
    fn resolve(&self, id: &ErrorId, now: DateTime<Utc>) -> StorageResult<bool>;

    /// Resolves every open error of a campaign; returns how many were closed.
    fn resolve_all(&self, campaign_id: &str, now: DateTime<Utc>) -> StorageResult<usize> {
        let mut closed = 0;
        for error in self.list_open(campaign_id)? {
            if self.resolve(&error.id, now)? {
                closed += 1;
            }
        }
        Ok(closed)
    }
}

/// Rejects snapshots written by a newer format.
pub(crate) fn check_version(snapshot: &CampaignProgressSnapshot) -> StorageResult<()> {
    if snapshot.version > CampaignProgressSnapshot::CURRENT_VERSION {
        return Err(StorageError::VersionMismatch {
            expected: CampaignProgressSnapshot::CURRENT_VERSION,
            found: snapshot.version,
        });
    }
    Ok(())
}

/// Which backend to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Json,
    Sqlite,
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageBackend::Memory => write!(f, "memory"),
            StorageBackend::Json => write!(f, "json"),
            StorageBackend::Sqlite => write!(f, "sqlite"),
        }
    }
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "json" => Ok(StorageBackend::Json),
            "sqlite" => Ok(StorageBackend::Sqlite),
            other => Err(format!("unknown storage backend: {}", other)),
        }
    }
}
