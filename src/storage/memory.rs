//! In-process store.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use super::{ErrorLedger, SnapshotStore, StorageError, StorageResult};
use crate::ledger::{sort_newest_first, CampaignError, ErrorId, NewCampaignError};
use crate::snapshot::{CampaignProgressSnapshot, SnapshotPatch};

/// Snapshots and ledger rows held in memory. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshots: RwLock<HashMap<String, CampaignProgressSnapshot>>,
    errors: RwLock<Vec<CampaignError>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemoryStore {
    fn save(
        &self,
        campaign_id: &str,
        patch: &SnapshotPatch,
        now: DateTime<Utc>,
    ) -> StorageResult<CampaignProgressSnapshot> {
        let mut snapshots = self
            .snapshots
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        let snapshot = snapshots
            .entry(campaign_id.to_string())
            .or_insert_with(|| CampaignProgressSnapshot::new(campaign_id, now));
        snapshot.apply(patch, now);
        Ok(snapshot.clone())
    }

    fn load(&self, campaign_id: &str) -> StorageResult<Option<CampaignProgressSnapshot>> {
        let snapshots = self
            .snapshots
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(snapshots.get(campaign_id).cloned())
    }
}

impl ErrorLedger for MemoryStore {
    fn record(&self, error: NewCampaignError) -> StorageResult<ErrorId> {
        let id = ErrorId::new();
        let mut errors = self.errors.write().map_err(|_| StorageError::LockPoisoned)?;
        errors.push(error.into_record(id));
        Ok(id)
    }

    fn list_all(&self, campaign_id: &str) -> StorageResult<Vec<CampaignError>> {
        let errors = self.errors.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut matching: Vec<CampaignError> = errors
            .iter()
            .filter(|e| e.campaign_id == campaign_id)
            .cloned()
            .collect();
        sort_newest_first(&mut matching);
        Ok(matching)
    }

    fn resolve(&self, id: &ErrorId, now: DateTime<Utc>) -> StorageResult<bool> {
        let mut errors = self.errors.write().map_err(|_| StorageError::LockPoisoned)?;
        let error = errors
            .iter_mut()
            .find(|e| e.id == *id)
            .ok_or(StorageError::ErrorNotFound(*id))?;
        Ok(error.resolve(now))
    }
}
