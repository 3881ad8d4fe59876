//! Reference campaign driver.
//!
//! [`CampaignRunner`] executes one pass over a campaign: generate the content
//! unless it is cached, then publish to every platform that is not completed
//! yet, in plan order. The first failure ends the pass with the
//! orchestrator's decision. The runner never sleeps; scheduling the next
//! pass is the caller's job.
//!
//! The runner keeps each campaign's snapshot in memory between passes and
//! only reads the store on the first pass for a campaign. The in-memory copy
//! stays authoritative for the life of the runner; every change is also
//! saved through the orchestrator, which tolerates store failures, so only a
//! restart depends on the store.

pub mod collaborators;

pub use collaborators::{
    CollaboratorError, CollaboratorResult, ContentGenerator, ContentRequest, PlatformAdapter,
};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ErrorKind;
use crate::recovery::{RecoveryDecision, RecoveryOrchestrator, RecoveryOutcome, StepFailure};
use crate::snapshot::{CampaignProgressSnapshot, PlatformProgress, SnapshotPatch};

/// Step name for content generation.
pub const GENERATE_STEP: &str = "generate_content";

/// Step name recorded once every platform is published.
pub const COMPLETED_STEP: &str = "completed";

/// Step name for publishing to one platform.
pub fn publish_step(platform_id: &str) -> String {
    format!("publish:{}", platform_id)
}

/// What a campaign should do and where it should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignPlan {
    pub campaign_id: String,
    pub title: String,
    pub content: ContentRequest,
    /// Destination platform ids, in publishing order.
    pub platforms: Vec<String>,
}

impl CampaignPlan {
    pub fn new(
        campaign_id: impl Into<String>,
        title: impl Into<String>,
        topic: impl Into<String>,
    ) -> Self {
        let campaign_id = campaign_id.into();
        Self {
            content: ContentRequest::new(campaign_id.clone(), topic),
            campaign_id,
            title: title.into(),
            platforms: Vec::new(),
        }
    }

    pub fn with_platform(mut self, platform_id: impl Into<String>) -> Self {
        let platform_id = platform_id.into();
        if !self.platforms.contains(&platform_id) {
            self.platforms.push(platform_id);
        }
        self
    }
}

/// Result of one pass.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Every platform is published.
    Completed(CampaignProgressSnapshot),
    /// A step failed and should be retried after `after`.
    RetryAfter {
        step: String,
        after: Duration,
        outcome: RecoveryOutcome,
    },
    /// A step failed and automatic handling stopped.
    Paused {
        step: String,
        reason: ErrorKind,
        outcome: RecoveryOutcome,
    },
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed(_))
    }

    fn from_failure(step: String, outcome: RecoveryOutcome) -> Self {
        match outcome.decision {
            RecoveryDecision::Retry { after } => RunOutcome::RetryAfter {
                step,
                after,
                outcome,
            },
            RecoveryDecision::Pause { reason } => RunOutcome::Paused {
                step,
                reason,
                outcome,
            },
        }
    }
}

/// Drives a campaign through generation and publishing.
pub struct CampaignRunner {
    orchestrator: RecoveryOrchestrator,
    generator: Arc<dyn ContentGenerator>,
    adapters: HashMap<String, Arc<dyn PlatformAdapter>>,
    /// Per-campaign progress as of the end of the last pass.
    states: HashMap<String, CampaignProgressSnapshot>,
}

impl CampaignRunner {
    pub fn new(orchestrator: RecoveryOrchestrator, generator: Arc<dyn ContentGenerator>) -> Self {
        Self {
            orchestrator,
            generator,
            adapters: HashMap::new(),
            states: HashMap::new(),
        }
    }

    /// Registers an adapter under its `platform_id`, replacing any previous one.
    pub fn with_adapter(mut self, adapter: Arc<dyn PlatformAdapter>) -> Self {
        self.adapters
            .insert(adapter.platform_id().to_string(), adapter);
        self
    }

    pub fn orchestrator(&self) -> &RecoveryOrchestrator {
        &self.orchestrator
    }

    pub fn orchestrator_mut(&mut self) -> &mut RecoveryOrchestrator {
        &mut self.orchestrator
    }

    /// Progress held in memory for a campaign, if it has run in this runner.
    pub fn progress(&self, campaign_id: &str) -> Option<&CampaignProgressSnapshot> {
        self.states.get(campaign_id)
    }

    /// Drops the in-memory progress of a campaign; its next pass reads the
    /// store again.
    pub fn forget(&mut self, campaign_id: &str) -> Option<CampaignProgressSnapshot> {
        self.states.remove(campaign_id)
    }

    /// Runs one pass over the campaign.
    pub async fn run(&mut self, plan: &CampaignPlan) -> RunOutcome {
        let mut state = match self.states.remove(&plan.campaign_id) {
            Some(state) => state,
            None => self.load_state(plan),
        };
        self.add_plan_defaults(plan, &mut state);

        let outcome = self.run_pass(plan, &mut state).await;
        self.states.insert(plan.campaign_id.clone(), state);
        outcome
    }

    async fn run_pass(
        &mut self,
        plan: &CampaignPlan,
        state: &mut CampaignProgressSnapshot,
    ) -> RunOutcome {
        let campaign_id = plan.campaign_id.as_str();

        let body = match self.ensure_content(plan, state).await {
            Ok(body) => body,
            Err(outcome) => return outcome,
        };

        for platform_id in &plan.platforms {
            if state.platform(platform_id).is_some_and(PlatformProgress::is_completed) {
                tracing::debug!(campaign_id, platform = %platform_id, "already published, skipping");
                continue;
            }
            if let Err(outcome) = self.publish(plan, state, platform_id, &body).await {
                return outcome;
            }
        }

        let patch = SnapshotPatch::new().with_current_step(COMPLETED_STEP);
        self.apply(state, &patch);
        tracing::info!(campaign_id, platforms = plan.platforms.len(), "campaign completed");
        RunOutcome::Completed(state.clone())
    }

    /// Loads the stored snapshot, or starts fresh when there is none or the
    /// store cannot be read.
    fn load_state(&self, plan: &CampaignPlan) -> CampaignProgressSnapshot {
        let now = self.orchestrator.now();
        match self.orchestrator.load_progress(&plan.campaign_id) {
            Ok(Some(snapshot)) => {
                tracing::info!(
                    campaign_id = %plan.campaign_id,
                    step = %snapshot.current_step,
                    completed = snapshot.completed_steps.len(),
                    "resuming campaign from snapshot"
                );
                snapshot
            }
            Ok(None) => CampaignProgressSnapshot::new(&plan.campaign_id, now),
            Err(e) => {
                tracing::warn!(
                    campaign_id = %plan.campaign_id,
                    error = %e,
                    "failed to load snapshot, starting from scratch"
                );
                CampaignProgressSnapshot::new(&plan.campaign_id, now)
            }
        }
    }

    /// Sets the first step on a fresh snapshot and adds plan platforms it
    /// does not know yet as pending.
    fn add_plan_defaults(&self, plan: &CampaignPlan, state: &mut CampaignProgressSnapshot) {
        let mut patch = SnapshotPatch::new();
        if state.current_step.is_empty() {
            patch = patch.with_current_step(GENERATE_STEP);
        }
        for platform_id in &plan.platforms {
            if state.platform(platform_id).is_none() {
                patch = patch.with_platform(platform_id.clone(), PlatformProgress::pending());
            }
        }
        if !patch.is_empty() {
            self.apply(state, &patch);
        }
    }

    async fn ensure_content(
        &mut self,
        plan: &CampaignPlan,
        state: &mut CampaignProgressSnapshot,
    ) -> Result<String, RunOutcome> {
        if state.content_generated {
            if let Some(text) = &state.generated_content {
                tracing::debug!(campaign_id = %plan.campaign_id, "using cached content");
                return Ok(text.clone());
            }
        }

        match self.generator.generate(&plan.content).await {
            Ok(text) => {
                let patch = SnapshotPatch::new()
                    .with_generated_content(text.clone())
                    .with_completed_step(GENERATE_STEP);
                state.apply(&patch, self.orchestrator.now());
                self.orchestrator
                    .complete_step(&plan.campaign_id, GENERATE_STEP, patch);
                Ok(text)
            }
            Err(e) => {
                let progress = SnapshotPatch::new().with_current_step(GENERATE_STEP);
                state.apply(&progress, self.orchestrator.now());
                let failure = StepFailure::new(&plan.campaign_id, GENERATE_STEP, e.as_ref())
                    .with_progress(progress);
                let outcome = self.orchestrator.handle_failure(failure);
                Err(RunOutcome::from_failure(GENERATE_STEP.to_string(), outcome))
            }
        }
    }

    async fn publish(
        &mut self,
        plan: &CampaignPlan,
        state: &mut CampaignProgressSnapshot,
        platform_id: &str,
        body: &str,
    ) -> Result<(), RunOutcome> {
        let step = publish_step(platform_id);
        let attempts = state.platform(platform_id).map_or(0, |p| p.attempts) + 1;

        let started = SnapshotPatch::new()
            .with_current_step(step.clone())
            .with_platform(platform_id, PlatformProgress::in_progress(attempts));
        self.apply(state, &started);

        let result = match self.adapters.get(platform_id) {
            Some(adapter) => adapter.publish(&plan.title, body).await,
            None => Err(format!("no adapter registered for platform {}", platform_id).into()),
        };

        match result {
            Ok(url) => {
                tracing::info!(
                    campaign_id = %plan.campaign_id,
                    platform = platform_id,
                    url = %url,
                    "published"
                );
                let patch = SnapshotPatch::new()
                    .with_platform(platform_id, PlatformProgress::completed(url, attempts))
                    .with_completed_step(step.clone());
                state.apply(&patch, self.orchestrator.now());
                self.orchestrator.complete_step(&plan.campaign_id, &step, patch);
                Ok(())
            }
            Err(e) => {
                let failure = StepFailure::new(&plan.campaign_id, step.clone(), e.as_ref());
                let progress = SnapshotPatch::new()
                    .with_platform(platform_id, PlatformProgress::failed(failure.message.clone(), attempts));
                state.apply(&progress, self.orchestrator.now());
                let outcome = self.orchestrator.handle_failure(failure.with_progress(progress));
                Err(RunOutcome::from_failure(step, outcome))
            }
        }
    }

    /// Applies a patch to the in-memory state and saves it best-effort.
    fn apply(&self, state: &mut CampaignProgressSnapshot, patch: &SnapshotPatch) {
        state.apply(patch, self.orchestrator.now());
        self.orchestrator.save_progress(&state.campaign_id, patch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_step_name() {
        assert_eq!(publish_step("telegraph"), "publish:telegraph");
    }

    #[test]
    fn test_plan_platforms_are_unique_and_ordered() {
        let plan = CampaignPlan::new("C1", "Title", "topic")
            .with_platform("b")
            .with_platform("a")
            .with_platform("b");
        assert_eq!(plan.platforms, vec!["b", "a"]);
        assert_eq!(plan.content.campaign_id, "C1");
        assert_eq!(plan.content.topic, "topic");
    }
}
