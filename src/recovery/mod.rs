//! Recovery orchestration.
//!
//! [`RecoveryOrchestrator`] ties the classifier, the retry policy table, the
//! backoff calculator and the two stores together. A step driver hands it
//! each failure and receives a [`RecoveryDecision`]; on success it calls
//! [`RecoveryOrchestrator::record_success`] so the attempt streak starts over.
//!
//! Per `(campaign, step)` the attempt counter moves
//! `Clean(0) -> Retrying(1..=max_retries) -> Clean(0) | Paused`.
//! The orchestrator never sleeps and never fails because a store did; store
//! failures are logged and reported as [`PersistenceHealth::Degraded`].

pub mod attempts;
pub mod resume;

pub use attempts::{AttemptCounters, AttemptKey};
pub use resume::{ResumeEligibility, ResumeRules, DEFAULT_RATE_LIMIT_DELAY, DEFAULT_RESUME_WINDOW};

use std::error::Error;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::clock::{Clock, SystemClock};
use crate::config::RecoveryConfig;
use crate::error::{describe_error, ErrorClassifier, ErrorKind};
use crate::ledger::{CampaignError, ErrorId, ErrorSummary, NewCampaignError};
use crate::policy::{BackoffCalculator, RetryPolicyTable};
use crate::snapshot::{CampaignProgressSnapshot, SnapshotPatch};
use crate::storage::{ErrorLedger, SnapshotStore, StorageResult};

/// A failed step as reported by the driver.
#[derive(Debug, Clone, PartialEq)]
pub struct StepFailure {
    pub campaign_id: String,
    pub step_name: String,
    /// Printable rendering of the failure.
    pub message: String,
    /// Diagnostic payload stored with the ledger row, never interpreted.
    pub details: Option<serde_json::Value>,
    /// Progress to persist before the decision is made.
    pub progress: Option<SnapshotPatch>,
}

impl StepFailure {
    /// Builds a failure from any error value, rendering its source chain.
    pub fn new(
        campaign_id: impl Into<String>,
        step_name: impl Into<String>,
        err: &(dyn Error + 'static),
    ) -> Self {
        Self::from_message(campaign_id, step_name, describe_error(err))
    }

    pub fn from_message(
        campaign_id: impl Into<String>,
        step_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            campaign_id: campaign_id.into(),
            step_name: step_name.into(),
            message: message.into(),
            details: None,
            progress: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_progress(mut self, patch: SnapshotPatch) -> Self {
        self.progress = Some(patch);
        self
    }
}

/// What the driver should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryDecision {
    /// Run the step again once `after` has elapsed.
    Retry { after: Duration },
    /// Stop automatic handling; `reason` explains why to an operator.
    Pause { reason: ErrorKind },
}

impl RecoveryDecision {
    pub fn is_retry(&self) -> bool {
        matches!(self, RecoveryDecision::Retry { .. })
    }

    pub fn is_pause(&self) -> bool {
        matches!(self, RecoveryDecision::Pause { .. })
    }

    /// The retry delay, if this is a retry.
    pub fn delay(&self) -> Option<Duration> {
        match self {
            RecoveryDecision::Retry { after } => Some(*after),
            RecoveryDecision::Pause { .. } => None,
        }
    }
}

/// Outcome of one best-effort write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceHealth {
    /// Nothing needed writing.
    Skipped,
    Written,
    /// The write failed; the message is the store's error.
    Degraded(String),
}

impl PersistenceHealth {
    pub fn is_degraded(&self) -> bool {
        matches!(self, PersistenceHealth::Degraded(_))
    }
}

/// Everything [`RecoveryOrchestrator::handle_failure`] decided and did.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryOutcome {
    pub decision: RecoveryDecision,
    pub kind: ErrorKind,
    /// 1-based attempt number for this `(campaign, step, kind)` streak.
    pub attempt: u32,
    pub max_retries: u32,
    /// Ledger row id, absent when the ledger write failed.
    pub error_id: Option<ErrorId>,
    pub snapshot_write: PersistenceHealth,
    pub ledger_write: PersistenceHealth,
}

impl RecoveryOutcome {
    /// True if any write this failure triggered was lost.
    pub fn persistence_degraded(&self) -> bool {
        self.snapshot_write.is_degraded() || self.ledger_write.is_degraded()
    }
}

/// The recovery decision engine for campaigns owned by one worker.
pub struct RecoveryOrchestrator {
    snapshots: Arc<dyn SnapshotStore>,
    ledger: Arc<dyn ErrorLedger>,
    classifier: ErrorClassifier,
    policies: RetryPolicyTable,
    backoff: BackoffCalculator,
    clock: Arc<dyn Clock>,
    resume_rules: ResumeRules,
    attempts: AttemptCounters,
    persistence_failures: AtomicU64,
}

impl std::fmt::Debug for RecoveryOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryOrchestrator")
            .field("classifier", &self.classifier)
            .field("policies", &self.policies)
            .field("backoff", &self.backoff)
            .field("clock", &self.clock)
            .field("resume_rules", &self.resume_rules)
            .field("attempts", &self.attempts)
            .field("persistence_failures", &self.persistence_failures())
            .finish_non_exhaustive()
    }
}

impl RecoveryOrchestrator {
    /// Creates an orchestrator with default policies and the system clock.
    pub fn new(snapshots: Arc<dyn SnapshotStore>, ledger: Arc<dyn ErrorLedger>) -> Self {
        Self {
            snapshots,
            ledger,
            classifier: ErrorClassifier::new(),
            policies: RetryPolicyTable::new(),
            backoff: BackoffCalculator::new(),
            clock: Arc::new(SystemClock),
            resume_rules: ResumeRules::default(),
            attempts: AttemptCounters::new(),
            persistence_failures: AtomicU64::new(0),
        }
    }

    /// Creates an orchestrator with policies, backoff, classifier and resume
    /// rules taken from configuration.
    pub fn from_config(
        config: &RecoveryConfig,
        snapshots: Arc<dyn SnapshotStore>,
        ledger: Arc<dyn ErrorLedger>,
    ) -> Self {
        Self::new(snapshots, ledger)
            .with_policies(config.policy_table())
            .with_backoff(config.backoff())
            .with_classifier(config.classifier())
            .with_resume_rules(config.resume_rules())
    }

    pub fn with_policies(mut self, policies: RetryPolicyTable) -> Self {
        self.policies = policies;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffCalculator) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_resume_rules(mut self, rules: ResumeRules) -> Self {
        self.resume_rules = rules;
        self
    }

    pub fn policies(&self) -> &RetryPolicyTable {
        &self.policies
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    pub fn backoff(&self) -> &BackoffCalculator {
        &self.backoff
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Classifies a failure, records it and decides between retry and pause.
    ///
    /// Progress attached to the failure is persisted before the decision so a
    /// crash right after still keeps it. Store failures never change the
    /// decision.
    pub fn handle_failure(&mut self, failure: StepFailure) -> RecoveryOutcome {
        let now = self.clock.now();
        let classified = self.classifier.classify_message(&failure.message);
        let kind = classified.kind;

        let attempt = self.attempts.increment(AttemptKey::new(
            failure.campaign_id.clone(),
            failure.step_name.clone(),
            kind,
        ));

        let snapshot_write = match &failure.progress {
            Some(patch) => self.persist_snapshot(&failure.campaign_id, patch, now),
            None => PersistenceHealth::Skipped,
        };

        let policy = self.policies.get(kind);

        let record = NewCampaignError {
            campaign_id: failure.campaign_id.clone(),
            error_kind: kind,
            error_message: classified.message,
            error_details: failure.details,
            step_name: failure.step_name.clone(),
            retry_count: attempt,
            max_retries: policy.max_retries,
            can_auto_resume: policy.auto_resumable,
            created_at: now,
        };
        let (error_id, ledger_write) = match self.ledger.record(record) {
            Ok(id) => (Some(id), PersistenceHealth::Written),
            Err(e) => {
                self.note_persistence_failure();
                tracing::warn!(
                    campaign_id = %failure.campaign_id,
                    step = %failure.step_name,
                    kind = %kind,
                    error = %e,
                    "failed to record campaign error"
                );
                (None, PersistenceHealth::Degraded(e.to_string()))
            }
        };

        let decision = if policy.should_retry(attempt) {
            let after = self.backoff.delay(&policy, attempt);
            tracing::info!(
                campaign_id = %failure.campaign_id,
                step = %failure.step_name,
                kind = %kind,
                attempt,
                max_retries = policy.max_retries,
                delay_ms = after.as_millis() as u64,
                "step failed, scheduling retry"
            );
            RecoveryDecision::Retry { after }
        } else {
            tracing::warn!(
                campaign_id = %failure.campaign_id,
                step = %failure.step_name,
                kind = %kind,
                attempt,
                max_retries = policy.max_retries,
                reason = kind.operator_message(),
                "step failed, pausing campaign"
            );
            RecoveryDecision::Pause { reason: kind }
        };

        RecoveryOutcome {
            decision,
            kind,
            attempt,
            max_retries: policy.max_retries,
            error_id,
            snapshot_write,
            ledger_write,
        }
    }

    /// Resets every attempt counter of a `(campaign, step)` pair after the step
    /// succeeded. Returns how many counters were cleared.
    pub fn record_success(&mut self, campaign_id: &str, step_name: &str) -> usize {
        let cleared = self.attempts.reset_step(campaign_id, step_name);
        if cleared > 0 {
            tracing::debug!(campaign_id, step = step_name, cleared, "attempt counters reset");
        }
        cleared
    }

    /// Marks a step finished: resets its counters and saves `patch` with the
    /// step appended to `completed_steps`.
    pub fn complete_step(
        &mut self,
        campaign_id: &str,
        step_name: &str,
        patch: SnapshotPatch,
    ) -> PersistenceHealth {
        self.record_success(campaign_id, step_name);
        let patch = patch.with_completed_step(step_name);
        self.save_progress(campaign_id, &patch)
    }

    /// Saves progress without failing; see [`PersistenceHealth`].
    pub fn save_progress(&self, campaign_id: &str, patch: &SnapshotPatch) -> PersistenceHealth {
        self.persist_snapshot(campaign_id, patch, self.clock.now())
    }

    pub fn load_progress(&self, campaign_id: &str) -> StorageResult<Option<CampaignProgressSnapshot>> {
        self.snapshots.load(campaign_id)
    }

    /// Whether a campaign may resume without a human; read-only.
    pub fn can_auto_resume(&self, campaign_id: &str) -> StorageResult<ResumeEligibility> {
        let open = self.ledger.list_open(campaign_id)?;
        Ok(resume::evaluate(&open, self.clock.now(), &self.resume_rules))
    }

    /// Unresolved errors, newest first.
    pub fn open_errors(&self, campaign_id: &str) -> StorageResult<Vec<CampaignError>> {
        self.ledger.list_open(campaign_id)
    }

    /// Every recorded error, newest first.
    pub fn error_history(&self, campaign_id: &str) -> StorageResult<Vec<CampaignError>> {
        self.ledger.list_all(campaign_id)
    }

    pub fn error_summary(&self, campaign_id: &str) -> StorageResult<ErrorSummary> {
        let errors = self.ledger.list_all(campaign_id)?;
        Ok(ErrorSummary::from_errors(&errors, self.clock.now()))
    }

    pub fn resolve_error(&self, id: &ErrorId) -> StorageResult<bool> {
        self.ledger.resolve(id, self.clock.now())
    }

    /// Resolves every open error of a campaign and clears its attempt
    /// counters, so a resumed campaign starts fresh streaks.
    pub fn resolve_campaign_errors(&mut self, campaign_id: &str) -> StorageResult<usize> {
        let resolved = self.ledger.resolve_all(campaign_id, self.clock.now())?;
        self.attempts.reset_campaign(campaign_id);
        tracing::info!(campaign_id, resolved, "campaign errors resolved");
        Ok(resolved)
    }

    /// Current attempt count for a streak, 0 when clean.
    pub fn attempts(&self, campaign_id: &str, step_name: &str, kind: ErrorKind) -> u32 {
        self.attempts
            .get(&AttemptKey::new(campaign_id, step_name, kind))
    }

    /// Number of store writes that failed since construction.
    pub fn persistence_failures(&self) -> u64 {
        self.persistence_failures.load(Ordering::Relaxed)
    }

    fn persist_snapshot(
        &self,
        campaign_id: &str,
        patch: &SnapshotPatch,
        now: DateTime<Utc>,
    ) -> PersistenceHealth {
        match self.snapshots.save(campaign_id, patch, now) {
            Ok(_) => PersistenceHealth::Written,
            Err(e) => {
                self.note_persistence_failure();
                tracing::warn!(campaign_id, error = %e, "failed to save progress snapshot");
                PersistenceHealth::Degraded(e.to_string())
            }
        }
    }

    fn note_persistence_failure(&self) {
        self.persistence_failures.fetch_add(1, Ordering::Relaxed);
    }
}
