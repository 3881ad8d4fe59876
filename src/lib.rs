//! Campaign recovery engine.
//!
//! Classifies failures from multi-platform publishing campaigns, decides
//! whether to retry (and after how long) or pause, and keeps durable progress
//! snapshots so an interrupted campaign resumes without redoing finished work
//! or regenerating content it already paid for.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use campaign_recovery::recovery::{RecoveryOrchestrator, StepFailure};
//! use campaign_recovery::storage::MemoryStore;
//!
//! let store = Arc::new(MemoryStore::new());
//! let mut orchestrator = RecoveryOrchestrator::new(store.clone(), store);
//!
//! let outcome = orchestrator.handle_failure(StepFailure::from_message(
//!     "campaign-1",
//!     "publish:telegraph",
//!     "connection reset by peer",
//! ));
//! println!("{:?}", outcome.decision);
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod policy;
pub mod recovery;
pub mod runner;
pub mod snapshot;
pub mod storage;

pub use error::ErrorKind;
pub use recovery::{RecoveryDecision, RecoveryOrchestrator, StepFailure};
