//! Recovery engine configuration.
//!
//! Every section is optional; an empty configuration reproduces the built-in
//! policy table, backoff ceiling and resume rules exactly.
//!
//! ```toml
//! [policies.network]
//! max_retries = 8
//!
//! [backoff]
//! max_delay_secs = 300
//!
//! [resume]
//! window_secs = 1800
//!
//! [classifier]
//! adapter_names = ["hashnode", "devto"]
//!
//! [storage]
//! backend = "sqlite"
//! path = "state/recovery.db"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ::config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{ErrorClassifier, ErrorKind};
use crate::policy::backoff::{DEFAULT_JITTER_RATIO, DEFAULT_MAX_DELAY};
use crate::policy::{BackoffCalculator, RetryPolicy, RetryPolicyTable};
use crate::recovery::{ResumeRules, DEFAULT_RATE_LIMIT_DELAY, DEFAULT_RESUME_WINDOW};
use crate::storage::StorageBackend;

/// Prefix for environment overrides, e.g. `CAMPAIGN_RECOVERY__BACKOFF__MAX_DELAY_SECS`.
pub const ENV_PREFIX: &str = "CAMPAIGN_RECOVERY";

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// The configuration file path is invalid.
    #[error("invalid configuration path: {0}")]
    InvalidPath(String),

    /// The configuration could not be parsed.
    #[error("failed to parse configuration: {0}")]
    Config(#[from] ::config::ConfigError),
}

/// Per-kind override; unset fields keep the built-in value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyOverride {
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub retryable: Option<bool>,
    #[serde(default)]
    pub auto_resumable: Option<bool>,
    #[serde(default)]
    pub base_delay_secs: Option<u64>,
}

impl PolicyOverride {
    fn apply(&self, mut policy: RetryPolicy) -> RetryPolicy {
        if let Some(max_retries) = self.max_retries {
            policy.max_retries = max_retries;
        }
        if let Some(retryable) = self.retryable {
            policy.retryable = retryable;
        }
        if let Some(auto_resumable) = self.auto_resumable {
            policy.auto_resumable = auto_resumable;
        }
        if let Some(secs) = self.base_delay_secs {
            policy.base_delay = Duration::from_secs(secs);
        }
        policy
    }
}

/// `[backoff]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_delay_secs: default_max_delay_secs(),
            jitter_ratio: default_jitter_ratio(),
        }
    }
}

fn default_max_delay_secs() -> u64 {
    DEFAULT_MAX_DELAY.as_secs()
}

fn default_jitter_ratio() -> f64 {
    DEFAULT_JITTER_RATIO
}

/// `[resume]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeConfig {
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_rate_limit_delay_secs")]
    pub rate_limit_delay_secs: u64,
}

impl Default for ResumeConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            rate_limit_delay_secs: default_rate_limit_delay_secs(),
        }
    }
}

fn default_window_secs() -> u64 {
    DEFAULT_RESUME_WINDOW.as_secs()
}

fn default_rate_limit_delay_secs() -> u64 {
    DEFAULT_RATE_LIMIT_DELAY.as_secs()
}

/// `[classifier]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Extra adapter identifiers that mark a failure as `publishing`.
    #[serde(default)]
    pub adapter_names: Vec<String>,
}

/// `[storage]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Base directory for `json`, database file for `sqlite`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecoveryConfig {
    #[serde(default)]
    pub policies: BTreeMap<ErrorKind, PolicyOverride>,
    #[serde(default)]
    pub backoff: BackoffConfig,
    #[serde(default)]
    pub resume: ResumeConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl RecoveryConfig {
    /// Load configuration from a TOML file, with environment overrides.
    ///
    /// # Environment Variable Overrides
    ///
    /// `CAMPAIGN_RECOVERY__<SECTION>__<KEY>`, e.g.
    /// `CAMPAIGN_RECOVERY__POLICIES__NETWORK__MAX_RETRIES=8`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The configuration file does not exist
    /// - The configuration file cannot be parsed
    /// - The path is invalid
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use campaign_recovery::config::RecoveryConfig;
    ///
    /// let config = RecoveryConfig::load("config/campaign-recovery.toml")?;
    /// # Ok::<(), campaign_recovery::config::ConfigError>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        let path_str = path
            .to_str()
            .ok_or_else(|| ConfigError::InvalidPath(format!("{:?}", path)))?;

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path_str.to_string()));
        }

        let config = Config::builder()
            .add_source(File::new(path_str, FileFormat::Toml))
            .add_source(environment())
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Defaults plus environment overrides; no file.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Config::builder().add_source(environment()).build()?;
        Ok(config.try_deserialize()?)
    }

    /// Parses TOML text without consulting the environment.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// The built-in table with `[policies.*]` overrides applied.
    pub fn policy_table(&self) -> RetryPolicyTable {
        let mut table = RetryPolicyTable::new();
        for (kind, overrides) in &self.policies {
            table.set(*kind, overrides.apply(table.get(*kind)));
        }
        table
    }

    pub fn backoff(&self) -> BackoffCalculator {
        BackoffCalculator::new()
            .with_max_delay(Duration::from_secs(self.backoff.max_delay_secs))
            .with_jitter_ratio(self.backoff.jitter_ratio)
    }

    pub fn classifier(&self) -> ErrorClassifier {
        ErrorClassifier::new().with_adapter_names(self.classifier.adapter_names.iter().cloned())
    }

    pub fn resume_rules(&self) -> ResumeRules {
        ResumeRules {
            window: Duration::from_secs(self.resume.window_secs),
            rate_limit_delay: Duration::from_secs(self.resume.rate_limit_delay_secs),
        }
    }
}

/// Renders a policy table as a `[policies.*]` TOML document that
/// [`RecoveryConfig::from_toml_str`] reads back to the same table.
pub fn policies_to_toml(table: &RetryPolicyTable) -> Result<String, toml::ser::Error> {
    #[derive(Serialize)]
    struct PoliciesDocument {
        policies: BTreeMap<String, PolicyOverride>,
    }

    let policies = table
        .iter()
        .map(|(kind, policy)| {
            let entry = PolicyOverride {
                max_retries: Some(policy.max_retries),
                retryable: Some(policy.retryable),
                auto_resumable: Some(policy.auto_resumable),
                base_delay_secs: Some(policy.base_delay.as_secs()),
            };
            (kind.as_str().to_string(), entry)
        })
        .collect();
    toml::to_string_pretty(&PoliciesDocument { policies })
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("classifier.adapter_names")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_config_matches_builtin_defaults() {
        let config = RecoveryConfig::from_toml_str("").unwrap();
        assert_eq!(config, RecoveryConfig::default());
        assert_eq!(config.policy_table(), RetryPolicyTable::new());
        assert_eq!(config.resume_rules(), ResumeRules::default());

        let backoff = config.backoff();
        assert_eq!(backoff.max_delay, DEFAULT_MAX_DELAY);
        assert_eq!(backoff.jitter_ratio, DEFAULT_JITTER_RATIO);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
    }

    #[test]
    fn test_policy_override_keeps_unset_fields() {
        let config = RecoveryConfig::from_toml_str(
            r#"
            [policies.network]
            max_retries = 8

            [policies.unknown]
            retryable = false
            base_delay_secs = 7
            "#,
        )
        .unwrap();

        let table = config.policy_table();
        let network = table.get(ErrorKind::Network);
        assert_eq!(network.max_retries, 8);
        assert!(network.auto_resumable);
        assert_eq!(network.base_delay, Duration::from_secs(5));

        let unknown = table.get(ErrorKind::Unknown);
        assert!(!unknown.retryable);
        assert_eq!(unknown.max_retries, 2);
        assert_eq!(unknown.base_delay, Duration::from_secs(7));

        assert_eq!(table.get(ErrorKind::RateLimit), RetryPolicy::default_for(ErrorKind::RateLimit));
    }

    #[test]
    fn test_sections_parse() {
        let config = RecoveryConfig::from_toml_str(
            r#"
            [backoff]
            max_delay_secs = 120
            jitter_ratio = 0.25

            [resume]
            window_secs = 600

            [classifier]
            adapter_names = ["Hashnode"]

            [storage]
            backend = "sqlite"
            path = "state/recovery.db"
            "#,
        )
        .unwrap();

        assert_eq!(config.backoff().max_delay, Duration::from_secs(120));
        assert_eq!(config.backoff().jitter_ratio, 0.25);
        assert_eq!(config.resume_rules().window, Duration::from_secs(600));
        assert_eq!(config.resume_rules().rate_limit_delay, Duration::from_secs(300));
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert_eq!(config.storage.path, Some(PathBuf::from("state/recovery.db")));
        assert_eq!(
            config.classifier().classify("hashnode returned garbage"),
            ErrorKind::Publishing
        );
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let result = RecoveryConfig::from_toml_str(
            r#"
            [policies.solar_flare]
            max_retries = 1
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Config(_))));
    }

    #[test]
    fn test_load_file_not_found() {
        let result = RecoveryConfig::load("nonexistent/path/config.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(file, "[policies.authentication]\nmax_retries = 0").unwrap();

        let config = RecoveryConfig::load(file.path()).unwrap();
        assert_eq!(config.policy_table().get(ErrorKind::Authentication).max_retries, 0);
    }

    #[test]
    fn test_load_shipped_sample_config() {
        let config = RecoveryConfig::load("config/campaign-recovery.toml").unwrap();
        assert_eq!(config.policy_table(), RetryPolicyTable::new());
        assert_eq!(config.storage.backend, StorageBackend::Json);
    }

    #[test]
    fn test_policies_toml_reads_back() {
        let table = RecoveryConfig::from_toml_str("[policies.publishing]\nmax_retries = 4")
            .unwrap()
            .policy_table();

        let rendered = policies_to_toml(&table).unwrap();
        assert!(rendered.contains("[policies.publishing]"));

        let parsed: RecoveryConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.policy_table(), table);
    }

    #[test]
    fn test_error_display() {
        let err = ConfigError::FileNotFound("recovery.toml".to_string());
        assert_eq!(err.to_string(), "configuration file not found: recovery.toml");

        let err = ConfigError::InvalidPath("bad/path".to_string());
        assert_eq!(err.to_string(), "invalid configuration path: bad/path");
    }
}
