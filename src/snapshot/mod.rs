//! Campaign progress snapshots.
//!
//! A snapshot is the durable record of how far a campaign got: which steps are
//! done, where each destination platform stands, and the generated content
//! that must not be paid for twice. Stores never overwrite a snapshot
//! wholesale; they apply a [`SnapshotPatch`] with the merge rules in
//! [`CampaignProgressSnapshot::apply`].

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Publishing state of one destination platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformStatus {
    /// Not attempted yet
    #[default]
    Pending,
    /// A publish call is underway
    InProgress,
    /// Published; the URL is recorded
    Completed,
    /// The last publish call failed
    Failed,
}

impl fmt::Display for PlatformStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformStatus::Pending => write!(f, "pending"),
            PlatformStatus::InProgress => write!(f, "in_progress"),
            PlatformStatus::Completed => write!(f, "completed"),
            PlatformStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Progress entry for one platform in the campaign's fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlatformProgress {
    pub status: PlatformStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub attempts: u32,
}

impl PlatformProgress {
    pub fn pending() -> Self {
        Self::default()
    }

    pub fn in_progress(attempts: u32) -> Self {
        Self {
            status: PlatformStatus::InProgress,
            attempts,
            ..Self::default()
        }
    }

    pub fn completed(url: impl Into<String>, attempts: u32) -> Self {
        Self {
            status: PlatformStatus::Completed,
            published_url: Some(url.into()),
            error_message: None,
            attempts,
        }
    }

    pub fn failed(message: impl Into<String>, attempts: u32) -> Self {
        Self {
            status: PlatformStatus::Failed,
            published_url: None,
            error_message: Some(message.into()),
            attempts,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == PlatformStatus::Completed
    }
}

/// A change to the cached generated content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action", content = "text")]
pub enum ContentChange {
    /// Content was generated; cache it and mark it authoritative.
    Generated(String),
    /// Explicitly drop the cached content so it can be regenerated.
    Discarded,
}

/// A partial snapshot to merge into the stored one.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SnapshotPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    /// Steps to append to `completed_steps`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub completed_steps: Vec<String>,
    /// Platform entries to upsert.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub platform_progress: BTreeMap<String, PlatformProgress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<ContentChange>,
}

impl SnapshotPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_current_step(mut self, step: impl Into<String>) -> Self {
        self.current_step = Some(step.into());
        self
    }

    pub fn with_completed_step(mut self, step: impl Into<String>) -> Self {
        let step = step.into();
        if !self.completed_steps.contains(&step) {
            self.completed_steps.push(step);
        }
        self
    }

    pub fn with_platform(mut self, platform: impl Into<String>, progress: PlatformProgress) -> Self {
        self.platform_progress.insert(platform.into(), progress);
        self
    }

    /// Caches generated content and sets `content_generated`.
    pub fn with_generated_content(mut self, text: impl Into<String>) -> Self {
        self.content = Some(ContentChange::Generated(text.into()));
        self
    }

    /// Clears `content_generated` and the cached text for an intentional regeneration.
    pub fn discard_generated_content(mut self) -> Self {
        self.content = Some(ContentChange::Discarded);
        self
    }

    /// True when the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        self.current_step.is_none()
            && self.completed_steps.is_empty()
            && self.platform_progress.is_empty()
            && self.content.is_none()
    }
}

/// What [`CampaignProgressSnapshot::apply`] did with the content part of a patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PatchEffects {
    /// A different text was offered while cached content was authoritative.
    pub content_rejected: bool,
    /// Cached content was dropped on request.
    pub content_discarded: bool,
}

/// Durable per-campaign progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignProgressSnapshot {
    /// Snapshot format version
    pub version: u32,
    pub campaign_id: String,
    pub current_step: String,
    /// Finished steps in completion order, without duplicates.
    pub completed_steps: Vec<String>,
    pub platform_progress: BTreeMap<String, PlatformProgress>,
    /// Once true, `generated_content` is authoritative.
    pub content_generated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_content: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CampaignProgressSnapshot {
    /// Current snapshot format version
    pub const CURRENT_VERSION: u32 = 1;

    /// An empty snapshot for a campaign that has not stepped yet.
    pub fn new(campaign_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            campaign_id: campaign_id.into(),
            current_step: String::new(),
            completed_steps: Vec::new(),
            platform_progress: BTreeMap::new(),
            content_generated: false,
            generated_content: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Merges a patch into this snapshot and refreshes `updated_at`.
    ///
    /// Applying the same patch twice at the same instant leaves the snapshot
    /// unchanged after the first application.
    pub fn apply(&mut self, patch: &SnapshotPatch, now: DateTime<Utc>) -> PatchEffects {
        let mut effects = PatchEffects::default();

        if let Some(step) = &patch.current_step {
            self.current_step = step.clone();
        }

        for step in &patch.completed_steps {
            if !self.completed_steps.contains(step) {
                self.completed_steps.push(step.clone());
            }
        }

        for (platform, progress) in &patch.platform_progress {
            self.platform_progress
                .insert(platform.clone(), progress.clone());
        }

        match &patch.content {
            Some(ContentChange::Generated(text)) => {
                if !self.content_generated {
                    self.content_generated = true;
                    self.generated_content = Some(text.clone());
                } else if self.generated_content.as_deref() != Some(text.as_str()) {
                    tracing::warn!(
                        campaign_id = %self.campaign_id,
                        "ignoring new content for a campaign whose content is already cached"
                    );
                    effects.content_rejected = true;
                }
            }
            Some(ContentChange::Discarded) => {
                if self.content_generated {
                    tracing::info!(
                        campaign_id = %self.campaign_id,
                        "discarding cached content for regeneration"
                    );
                    effects.content_discarded = true;
                }
                self.content_generated = false;
                self.generated_content = None;
            }
            None => {}
        }

        self.updated_at = now;
        effects
    }

    /// Platforms whose status is not `completed`, in id order.
    pub fn pending_platforms(&self) -> Vec<&str> {
        self.platform_progress
            .iter()
            .filter(|(_, p)| !p.is_completed())
            .map(|(id, _)| id.as_str())
            .collect()
    }

    pub fn platform(&self, platform: &str) -> Option<&PlatformProgress> {
        self.platform_progress.get(platform)
    }

    pub fn is_step_completed(&self, step: &str) -> bool {
        self.completed_steps.iter().any(|s| s == step)
    }

    /// Published URLs by platform.
    pub fn published_urls(&self) -> BTreeMap<&str, &str> {
        self.platform_progress
            .iter()
            .filter_map(|(id, p)| p.published_url.as_deref().map(|url| (id.as_str(), url)))
            .collect()
    }
}
