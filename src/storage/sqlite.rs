//! SQLite-backed store.
//!
//! Two tables mirror the persisted records:
//!
//! - `campaign_errors`: one row per failure, indexed by `(campaign_id, created_at)`.
//! - `campaign_progress_snapshots`: one row per campaign, `campaign_id` is the
//!   upsert target.
//!
//! Structured columns (`completed_steps`, `platform_progress`, `error_details`)
//! hold JSON text. Timestamps are RFC 3339 with fixed nanosecond precision so
//! text order matches time order.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{check_version, ErrorLedger, SnapshotStore, StorageError, StorageResult};
use crate::error::ErrorKind;
use crate::ledger::{CampaignError, ErrorId, NewCampaignError};
use crate::snapshot::{CampaignProgressSnapshot, PlatformProgress, SnapshotPatch};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS campaign_errors (
    id TEXT PRIMARY KEY,
    campaign_id TEXT NOT NULL,
    error_kind TEXT NOT NULL,
    error_message TEXT NOT NULL,
    error_details TEXT,
    step_name TEXT NOT NULL,
    retry_count INTEGER NOT NULL,
    max_retries INTEGER NOT NULL,
    can_auto_resume INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    resolved_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_campaign_errors_campaign
    ON campaign_errors(campaign_id, created_at);

CREATE TABLE IF NOT EXISTS campaign_progress_snapshots (
    campaign_id TEXT PRIMARY KEY,
    version INTEGER NOT NULL,
    current_step TEXT NOT NULL,
    completed_steps TEXT NOT NULL,
    platform_progress TEXT NOT NULL,
    content_generated INTEGER NOT NULL,
    generated_content TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
";

const ERROR_COLUMNS: &str = "id, campaign_id, error_kind, error_message, error_details, \
     step_name, retry_count, max_retries, can_auto_resume, created_at, resolved_at";

/// Store over a single SQLite connection.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) the database file and ensures the schema exists.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::from_connection(Connection::open(path)?)
    }

    /// A private database that disappears with the store.
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StorageResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    fn query_errors(
        &self,
        filter: &str,
        campaign_id: &str,
    ) -> StorageResult<Vec<CampaignError>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM campaign_errors WHERE campaign_id = ?1 {} \
             ORDER BY created_at DESC, rowid DESC",
            ERROR_COLUMNS, filter
        );
        let mut stmt = conn.prepare(&sql)?;
        let raw = stmt
            .query_map(params![campaign_id], RawError::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter().map(RawError::into_error).collect()
    }
}

fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_time(value: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::InvalidData(format!("bad timestamp {:?}: {}", value, e)))
}

/// Column values as stored, before parsing.
struct RawError {
    id: String,
    campaign_id: String,
    error_kind: String,
    error_message: String,
    error_details: Option<String>,
    step_name: String,
    retry_count: u32,
    max_retries: u32,
    can_auto_resume: bool,
    created_at: String,
    resolved_at: Option<String>,
}

impl RawError {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            campaign_id: row.get(1)?,
            error_kind: row.get(2)?,
            error_message: row.get(3)?,
            error_details: row.get(4)?,
            step_name: row.get(5)?,
            retry_count: row.get(6)?,
            max_retries: row.get(7)?,
            can_auto_resume: row.get(8)?,
            created_at: row.get(9)?,
            resolved_at: row.get(10)?,
        })
    }

    fn into_error(self) -> StorageResult<CampaignError> {
        let id: ErrorId = self
            .id
            .parse()
            .map_err(|e| StorageError::InvalidData(format!("bad error id {:?}: {}", self.id, e)))?;
        let error_kind: ErrorKind = self
            .error_kind
            .parse()
            .map_err(|e| StorageError::InvalidData(format!("{}", e)))?;
        let error_details = self
            .error_details
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        let resolved_at = self.resolved_at.as_deref().map(parse_time).transpose()?;

        Ok(CampaignError {
            id,
            campaign_id: self.campaign_id,
            error_kind,
            error_message: self.error_message,
            error_details,
            step_name: self.step_name,
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            can_auto_resume: self.can_auto_resume,
            created_at: parse_time(&self.created_at)?,
            resolved_at,
        })
    }
}

struct RawSnapshot {
    campaign_id: String,
    version: u32,
    current_step: String,
    completed_steps: String,
    platform_progress: String,
    content_generated: bool,
    generated_content: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RawSnapshot {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            campaign_id: row.get(0)?,
            version: row.get(1)?,
            current_step: row.get(2)?,
            completed_steps: row.get(3)?,
            platform_progress: row.get(4)?,
            content_generated: row.get(5)?,
            generated_content: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn into_snapshot(self) -> StorageResult<CampaignProgressSnapshot> {
        let completed_steps: Vec<String> = serde_json::from_str(&self.completed_steps)?;
        let platform_progress: BTreeMap<String, PlatformProgress> =
            serde_json::from_str(&self.platform_progress)?;
        let snapshot = CampaignProgressSnapshot {
            version: self.version,
            campaign_id: self.campaign_id,
            current_step: self.current_step,
            completed_steps,
            platform_progress,
            content_generated: self.content_generated,
            generated_content: self.generated_content,
            created_at: parse_time(&self.created_at)?,
            updated_at: parse_time(&self.updated_at)?,
        };
        check_version(&snapshot)?;
        Ok(snapshot)
    }
}

fn select_snapshot(
    conn: &Connection,
    campaign_id: &str,
) -> StorageResult<Option<CampaignProgressSnapshot>> {
    let raw = conn
        .query_row(
            "SELECT campaign_id, version, current_step, completed_steps, platform_progress, \
             content_generated, generated_content, created_at, updated_at \
             FROM campaign_progress_snapshots WHERE campaign_id = ?1",
            params![campaign_id],
            RawSnapshot::from_row,
        )
        .optional()?;
    raw.map(RawSnapshot::into_snapshot).transpose()
}

impl SnapshotStore for SqliteStore {
    fn save(
        &self,
        campaign_id: &str,
        patch: &SnapshotPatch,
        now: DateTime<Utc>,
    ) -> StorageResult<CampaignProgressSnapshot> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let mut snapshot = select_snapshot(&tx, campaign_id)?
            .unwrap_or_else(|| CampaignProgressSnapshot::new(campaign_id, now));
        snapshot.apply(patch, now);

        tx.execute(
            "INSERT INTO campaign_progress_snapshots (
                campaign_id, version, current_step, completed_steps, platform_progress,
                content_generated, generated_content, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(campaign_id) DO UPDATE SET
                version = excluded.version,
                current_step = excluded.current_step,
                completed_steps = excluded.completed_steps,
                platform_progress = excluded.platform_progress,
                content_generated = excluded.content_generated,
                generated_content = excluded.generated_content,
                updated_at = excluded.updated_at",
            params![
                snapshot.campaign_id,
                snapshot.version,
                snapshot.current_step,
                serde_json::to_string(&snapshot.completed_steps)?,
                serde_json::to_string(&snapshot.platform_progress)?,
                snapshot.content_generated,
                snapshot.generated_content,
                format_time(&snapshot.created_at),
                format_time(&snapshot.updated_at),
            ],
        )?;
        tx.commit()?;

        Ok(snapshot)
    }

    fn load(&self, campaign_id: &str) -> StorageResult<Option<CampaignProgressSnapshot>> {
        let conn = self.lock()?;
        select_snapshot(&conn, campaign_id)
    }
}

impl ErrorLedger for SqliteStore {
    fn record(&self, error: NewCampaignError) -> StorageResult<ErrorId> {
        let id = ErrorId::new();
        let details = error
            .error_details
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO campaign_errors (
                id, campaign_id, error_kind, error_message, error_details,
                step_name, retry_count, max_retries, can_auto_resume, created_at, resolved_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, NULL)",
            params![
                id.to_string(),
                error.campaign_id,
                error.error_kind.as_str(),
                error.error_message,
                details,
                error.step_name,
                error.retry_count,
                error.max_retries,
                error.can_auto_resume,
                format_time(&error.created_at),
            ],
        )?;
        Ok(id)
    }

    fn list_open(&self, campaign_id: &str) -> StorageResult<Vec<CampaignError>> {
        self.query_errors("AND resolved_at IS NULL", campaign_id)
    }

    fn list_all(&self, campaign_id: &str) -> StorageResult<Vec<CampaignError>> {
        self.query_errors("", campaign_id)
    }

    fn resolve(&self, id: &ErrorId, now: DateTime<Utc>) -> StorageResult<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE campaign_errors SET resolved_at = ?1 WHERE id = ?2 AND resolved_at IS NULL",
            params![format_time(&now), id.to_string()],
        )?;
        if changed > 0 {
            return Ok(true);
        }

        let exists = conn
            .query_row(
                "SELECT 1 FROM campaign_errors WHERE id = ?1",
                params![id.to_string()],
                |_| Ok(()),
            )
            .optional()?;
        match exists {
            Some(()) => Ok(false),
            None => Err(StorageError::ErrorNotFound(*id)),
        }
    }

    fn resolve_all(&self, campaign_id: &str, now: DateTime<Utc>) -> StorageResult<usize> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE campaign_errors SET resolved_at = ?1 \
             WHERE campaign_id = ?2 AND resolved_at IS NULL",
            params![format_time(&now), campaign_id],
        )?;
        Ok(changed)
    }
}
