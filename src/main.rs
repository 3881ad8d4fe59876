use clap::{ArgAction, ArgGroup, Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use campaign_recovery::config::{policies_to_toml, RecoveryConfig};
use campaign_recovery::error::ErrorKind;
use campaign_recovery::ledger::ErrorId;
use campaign_recovery::logging::{init_logging, LoggingConfig};
use campaign_recovery::policy::RetryPolicy;
use campaign_recovery::recovery::{RecoveryOrchestrator, ResumeEligibility};
use campaign_recovery::storage::{
    ErrorLedger, JsonFileStore, MemoryStore, SnapshotStore, SqliteStore, StorageBackend,
    StorageError,
};

/// Database file used by the sqlite backend when no path is given.
const DEFAULT_SQLITE_PATH: &str = ".campaign-recovery/recovery.db";

/// Storage backend selectable on the command line
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliStore {
    /// Process memory (nothing persists)
    Memory,
    /// JSON files under <path>/.campaign-recovery
    Json,
    /// SQLite database file at <path>
    Sqlite,
}

impl From<CliStore> for StorageBackend {
    fn from(store: CliStore) -> Self {
        match store {
            CliStore::Memory => StorageBackend::Memory,
            CliStore::Json => StorageBackend::Json,
            CliStore::Sqlite => StorageBackend::Sqlite,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "campaign-recovery")]
#[command(version)]
#[command(about = "Inspect and resolve campaign failures, check auto-resume eligibility")]
struct Cli {
    /// Configuration file (TOML); environment overrides still apply
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Storage backend (overrides the configuration)
    #[arg(long, global = true, value_enum)]
    store: Option<CliStore>,

    /// Base directory (json) or database file (sqlite)
    #[arg(long, global = true)]
    path: Option<PathBuf>,

    /// Suppress all logging except errors
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Increase verbosity (-v, -vv)
    #[arg(long, short, global = true, action = ArgAction::Count, conflicts_with = "quiet")]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show a campaign's progress snapshot and open errors
    Status {
        /// Campaign identifier
        campaign: String,
    },
    /// List a campaign's errors
    Errors {
        /// Campaign identifier
        campaign: String,

        /// Include resolved errors
        #[arg(long)]
        all: bool,

        /// Print aggregate counts instead of rows
        #[arg(long)]
        summary: bool,
    },
    /// Mark errors resolved
    #[command(group(ArgGroup::new("target").required(true).args(["error_id", "campaign"])))]
    Resolve {
        /// Error identifier
        error_id: Option<ErrorId>,

        /// Resolve every open error of this campaign
        #[arg(long)]
        campaign: Option<String>,
    },
    /// Check whether a campaign may resume without a human
    CanResume {
        /// Campaign identifier
        campaign: String,
    },
    /// Classify a failure message and show the resulting decision
    Classify {
        /// Failure message
        message: String,

        /// Attempt number to evaluate
        #[arg(long, default_value = "1")]
        attempt: u32,
    },
    /// Print the effective retry policy table
    Policy {
        /// Print as a TOML `[policies.*]` document
        #[arg(long)]
        toml: bool,
    },
}

/// Exit codes
mod exit_codes {
    use std::process::ExitCode;

    pub fn success() -> ExitCode {
        ExitCode::SUCCESS
    }

    /// Configuration, storage or output failure
    pub fn failed() -> ExitCode {
        ExitCode::from(1)
    }

    /// The requested campaign or error does not exist
    pub fn not_found() -> ExitCode {
        ExitCode::from(3)
    }

    /// The campaign needs a human before it can resume
    pub fn paused() -> ExitCode {
        ExitCode::from(75)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(LoggingConfig::from_flags(cli.verbose, cli.quiet).with_target(false));

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {}", e);
            exit_codes::failed()
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => RecoveryConfig::load(path)?,
        None => RecoveryConfig::from_env()?,
    };
    if let Some(store) = cli.store {
        config.storage.backend = store.into();
    }
    if let Some(path) = &cli.path {
        config.storage.path = Some(path.clone());
    }

    let (snapshots, ledger) = open_store(&config)?;
    tracing::debug!(backend = %config.storage.backend, "store opened");
    let mut orchestrator = RecoveryOrchestrator::from_config(&config, snapshots, ledger);

    match cli.command {
        Commands::Status { campaign } => run_status(&orchestrator, &campaign),
        Commands::Errors {
            campaign,
            all,
            summary,
        } => run_errors(&orchestrator, &campaign, all, summary),
        Commands::Resolve { error_id, campaign } => {
            run_resolve(&mut orchestrator, error_id, campaign)
        }
        Commands::CanResume { campaign } => run_can_resume(&orchestrator, &campaign),
        Commands::Classify { message, attempt } => run_classify(&orchestrator, &message, attempt),
        Commands::Policy { toml } => run_policy(&orchestrator, toml),
    }
}

type Stores = (Arc<dyn SnapshotStore>, Arc<dyn ErrorLedger>);

fn open_store(config: &RecoveryConfig) -> Result<Stores, StorageError> {
    match config.storage.backend {
        StorageBackend::Memory => {
            let store = Arc::new(MemoryStore::new());
            let snapshots: Arc<dyn SnapshotStore> = store.clone();
            let ledger: Arc<dyn ErrorLedger> = store;
            Ok((snapshots, ledger))
        }
        StorageBackend::Json => {
            let base = config
                .storage
                .path
                .clone()
                .unwrap_or_else(|| PathBuf::from("."));
            let store = Arc::new(JsonFileStore::new(base)?);
            let snapshots: Arc<dyn SnapshotStore> = store.clone();
            let ledger: Arc<dyn ErrorLedger> = store;
            Ok((snapshots, ledger))
        }
        StorageBackend::Sqlite => {
            let file = config
                .storage
                .path
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SQLITE_PATH));
            let store = Arc::new(SqliteStore::open(file)?);
            let snapshots: Arc<dyn SnapshotStore> = store.clone();
            let ledger: Arc<dyn ErrorLedger> = store;
            Ok((snapshots, ledger))
        }
    }
}

fn print_json(value: &Value) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run_status(
    orchestrator: &RecoveryOrchestrator,
    campaign: &str,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let Some(snapshot) = orchestrator.load_progress(campaign)? else {
        eprintln!("no progress recorded for campaign {}", campaign);
        return Ok(exit_codes::not_found());
    };
    let open_errors = orchestrator.open_errors(campaign)?;

    print_json(&json!({
        "campaign_id": campaign,
        "pending_platforms": snapshot.pending_platforms(),
        "snapshot": snapshot,
        "open_errors": open_errors,
    }))?;
    Ok(exit_codes::success())
}

fn run_errors(
    orchestrator: &RecoveryOrchestrator,
    campaign: &str,
    all: bool,
    summary: bool,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    if summary {
        print_json(&serde_json::to_value(orchestrator.error_summary(campaign)?)?)?;
        return Ok(exit_codes::success());
    }

    let errors = if all {
        orchestrator.error_history(campaign)?
    } else {
        orchestrator.open_errors(campaign)?
    };
    print_json(&serde_json::to_value(errors)?)?;
    Ok(exit_codes::success())
}

fn run_resolve(
    orchestrator: &mut RecoveryOrchestrator,
    error_id: Option<ErrorId>,
    campaign: Option<String>,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    if let Some(campaign) = campaign {
        let resolved = orchestrator.resolve_campaign_errors(&campaign)?;
        print_json(&json!({ "campaign_id": campaign, "resolved": resolved }))?;
        return Ok(exit_codes::success());
    }

    let Some(id) = error_id else {
        return Ok(exit_codes::failed());
    };
    match orchestrator.resolve_error(&id) {
        Ok(resolved) => {
            print_json(&json!({ "error_id": id, "resolved": resolved }))?;
            Ok(exit_codes::success())
        }
        Err(StorageError::ErrorNotFound(id)) => {
            eprintln!("error {} not found", id);
            Ok(exit_codes::not_found())
        }
        Err(e) => Err(e.into()),
    }
}

fn eligibility_json(campaign: &str, eligibility: &ResumeEligibility) -> Value {
    json!({
        "campaign_id": campaign,
        "can_resume": eligibility.can_resume,
        "reason": eligibility.reason,
        "suggested_delay_secs": eligibility.suggested_delay.map(|d| d.as_secs()),
        "blocking_kinds": eligibility.blocking_kinds,
    })
}

fn run_can_resume(
    orchestrator: &RecoveryOrchestrator,
    campaign: &str,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let eligibility = orchestrator.can_auto_resume(campaign)?;
    print_json(&eligibility_json(campaign, &eligibility))?;

    if eligibility.can_resume {
        Ok(exit_codes::success())
    } else {
        Ok(exit_codes::paused())
    }
}

fn policy_json(kind: ErrorKind, policy: &RetryPolicy) -> Value {
    json!({
        "kind": kind,
        "max_retries": policy.max_retries,
        "retryable": policy.retryable,
        "auto_resumable": policy.auto_resumable,
        "base_delay_secs": policy.base_delay.as_secs(),
    })
}

fn run_classify(
    orchestrator: &RecoveryOrchestrator,
    message: &str,
    attempt: u32,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let classified = orchestrator.classifier().classify_message(message);
    let policy = orchestrator.policies().get(classified.kind);
    let attempt = attempt.max(1);

    let (decision, delay_secs) = if policy.should_retry(attempt) {
        let delay = orchestrator.backoff().delay(&policy, attempt);
        ("retry", Some(delay.as_secs_f64()))
    } else {
        ("pause", None)
    };

    print_json(&json!({
        "kind": classified.kind,
        "matched": classified.matched,
        "operator_message": classified.kind.operator_message(),
        "policy": policy_json(classified.kind, &policy),
        "attempt": attempt,
        "decision": decision,
        "delay_secs": delay_secs,
    }))?;
    Ok(exit_codes::success())
}

fn run_policy(
    orchestrator: &RecoveryOrchestrator,
    as_toml: bool,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    if as_toml {
        print!("{}", policies_to_toml(orchestrator.policies())?);
        return Ok(exit_codes::success());
    }

    let backoff = orchestrator.backoff();
    let policies: Vec<Value> = ErrorKind::ALL
        .iter()
        .map(|kind| policy_json(*kind, &orchestrator.policies().get(*kind)))
        .collect();

    print_json(&json!({
        "policies": policies,
        "backoff": {
            "max_delay_secs": backoff.max_delay.as_secs(),
            "jitter_ratio": backoff.jitter_ratio,
        },
    }))?;
    Ok(exit_codes::success())
}
