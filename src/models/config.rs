//! Application configuration structures.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::Severity;

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Identity of the tracked source
    #[serde(default)]
    pub source: SourceConfig,

    /// File locations
    #[serde(default)]
    pub paths: PathsConfig,

    /// HTTP fetcher settings
    #[serde(default)]
    pub fetcher: FetcherConfig,

    /// Per-item retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Worker pool settings
    #[serde(default)]
    pub pool: PoolConfig,

    /// Failure circuit breaker
    #[serde(default)]
    pub breaker: BreakerConfig,

    /// Tracked fields and sub-lists
    #[serde(default)]
    pub diff: DiffConfig,

    /// Optional classifier annotation step
    #[serde(default)]
    pub classifier: Option<ClassifierConfig>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.source.name.trim().is_empty() {
            return Err(AppError::validation("source.name is empty"));
        }
        if !self.fetcher.url_template.contains("{id}") {
            return Err(AppError::validation(
                "fetcher.url_template must contain an {id} placeholder",
            ));
        }
        if self.fetcher.user_agent.trim().is_empty() {
            return Err(AppError::validation("fetcher.user_agent is empty"));
        }
        if self.fetcher.timeout_secs == 0 {
            return Err(AppError::validation("fetcher.timeout_secs must be > 0"));
        }
        if self.pool.workers == 0 {
            return Err(AppError::validation("pool.workers must be > 0"));
        }
        if self.pool.progress_every == 0 {
            return Err(AppError::validation("pool.progress_every must be > 0"));
        }
        if self.retry.max_attempts == 0 {
            return Err(AppError::validation("retry.max_attempts must be > 0"));
        }
        if self.breaker.max_failure_percent > 100 {
            return Err(AppError::validation(
                "breaker.max_failure_percent must be within 0-100",
            ));
        }
        self.diff.validate()
    }
}

/// Which upstream source this configuration tracks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "defaults::source_name")]
    pub name: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            name: defaults::source_name(),
        }
    }
}

/// File locations. Relative names are resolved against `data_dir`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory owning all state, snapshot and report files
    #[serde(default = "defaults::data_dir")]
    pub data_dir: PathBuf,

    /// Snapshot files are `{snapshot_prefix}_{YYYY_MM_DD}.json`
    #[serde(default = "defaults::snapshot_prefix")]
    pub snapshot_prefix: String,

    /// Report files are `{report_prefix}_{YYYY_MM_DD}.json`
    #[serde(default = "defaults::report_prefix")]
    pub report_prefix: String,

    /// Append-only outcome log
    #[serde(default = "defaults::log_file")]
    pub log_file: String,

    /// Processed-id set
    #[serde(default = "defaults::processed_file")]
    pub processed_file: String,

    /// Work queue of ids to fetch
    #[serde(default = "defaults::ids_file")]
    pub ids_file: String,

    /// Backup area used by the supervisor
    #[serde(default = "defaults::backup_dir")]
    pub backup_dir: String,

    /// Extra files restored verbatim on rollback
    #[serde(default)]
    pub critical_files: Vec<String>,
}

impl PathsConfig {
    /// Resolve a file name relative to the data directory.
    pub fn resolve(&self, name: &str) -> PathBuf {
        self.data_dir.join(name)
    }

    pub fn log_path(&self) -> PathBuf {
        self.resolve(&self.log_file)
    }

    pub fn processed_path(&self) -> PathBuf {
        self.resolve(&self.processed_file)
    }

    pub fn ids_path(&self) -> PathBuf {
        self.resolve(&self.ids_file)
    }

    pub fn backup_path(&self) -> PathBuf {
        self.resolve(&self.backup_dir)
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: defaults::data_dir(),
            snapshot_prefix: defaults::snapshot_prefix(),
            report_prefix: defaults::report_prefix(),
            log_file: defaults::log_file(),
            processed_file: defaults::processed_file(),
            ids_file: defaults::ids_file(),
            backup_dir: defaults::backup_dir(),
            critical_files: Vec::new(),
        }
    }
}

/// HTTP fetcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetcherConfig {
    /// Record URL; `{id}` is replaced by the record id
    #[serde(default = "defaults::url_template")]
    pub url_template: String,

    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Additional request headers
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Responses shorter than this are treated as block pages.
    ///
    /// The default only rejects empty bodies, which suits compact JSON
    /// records; HTML upstreams usually want several hundred bytes.
    #[serde(default = "defaults::min_body_bytes")]
    pub min_body_bytes: usize,

    /// Case-insensitive phrases that mark a block page
    #[serde(default = "defaults::block_markers")]
    pub block_markers: Vec<String>,

    /// Rotating proxy, if any
    #[serde(default)]
    pub proxy: Option<ProxyConfig>,
}

impl FetcherConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            url_template: defaults::url_template(),
            user_agent: defaults::user_agent(),
            headers: BTreeMap::new(),
            timeout_secs: defaults::timeout(),
            min_body_bytes: defaults::min_body_bytes(),
            block_markers: defaults::block_markers(),
            proxy: None,
        }
    }
}

/// Rotating proxy credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Proxy endpoint, e.g. `http://proxy.example:33335`
    pub url: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Appended to the username per attempt; `{token}` is the rotation token
    #[serde(default = "defaults::session_suffix")]
    pub session_suffix: String,
}

/// Per-item retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts allowed for transient errors before giving up
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Fixed wait after a transient error
    #[serde(default = "defaults::transient_backoff")]
    pub transient_backoff_ms: u64,

    /// Blocked responses tolerated before giving up
    #[serde(default = "defaults::max_block_retries")]
    pub max_block_retries: u32,

    /// Cooldown seed; the n-th block waits `seed * n`
    #[serde(default = "defaults::block_cooldown")]
    pub block_cooldown_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::max_attempts(),
            transient_backoff_ms: defaults::transient_backoff(),
            max_block_retries: defaults::max_block_retries(),
            block_cooldown_ms: defaults::block_cooldown(),
        }
    }
}

/// Worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of concurrent workers
    #[serde(default = "defaults::workers")]
    pub workers: usize,

    /// Log progress every N completions
    #[serde(default = "defaults::progress_every")]
    pub progress_every: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: defaults::workers(),
            progress_every: defaults::progress_every(),
        }
    }
}

/// Failure circuit breaker thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    #[serde(default = "defaults::breaker_enabled")]
    pub enabled: bool,

    /// Maximum allowed share of permanent failures (0-100)
    #[serde(default = "defaults::max_failure_percent")]
    pub max_failure_percent: u8,

    /// Below this many attempted ids the check is skipped
    #[serde(default = "defaults::min_attempts")]
    pub min_attempts: usize,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            enabled: defaults::breaker_enabled(),
            max_failure_percent: defaults::max_failure_percent(),
            min_attempts: defaults::min_attempts(),
        }
    }
}

/// Declared fields and sub-lists the differ compares.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffConfig {
    #[serde(default = "defaults::tracked_fields")]
    pub tracked_fields: Vec<TrackedField>,

    #[serde(default = "defaults::lists")]
    pub lists: Vec<ListSpec>,

    /// Report ids that disappeared between snapshots
    #[serde(default)]
    pub report_removed: bool,
}

impl DiffConfig {
    fn validate(&self) -> Result<()> {
        for field in &self.tracked_fields {
            if field.path.trim().is_empty() {
                return Err(AppError::validation(format!(
                    "tracked field '{}' has an empty path",
                    field.name
                )));
            }
        }
        for list in &self.lists {
            if list.kind != ListKind::Keyed && list.key.is_empty() {
                return Err(AppError::validation(format!(
                    "list '{}' needs identity key fields",
                    list.name
                )));
            }
        }
        Ok(())
    }
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            tracked_fields: defaults::tracked_fields(),
            lists: defaults::lists(),
            report_removed: false,
        }
    }
}

/// A scalar compared by direct inequality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedField {
    /// Name used in the report
    pub name: String,

    /// Dotted path into the record's fields
    pub path: String,

    #[serde(default)]
    pub severity: Severity,
}

/// How a sub-list evolves upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListKind {
    /// Newest-first event history
    History,
    /// Items accumulate under categories (e.g. completed requirement stages)
    Staged,
    /// Unordered set identified by key (e.g. meetings)
    Keyed,
}

/// A declared sub-list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListSpec {
    pub name: String,
    pub kind: ListKind,

    /// Identity key fields of the list's items
    #[serde(default)]
    pub key: Vec<String>,

    /// Category field for staged lists
    #[serde(default)]
    pub category: Option<String>,
}

/// Optional classifier annotation step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Endpoint receiving `{"text": ..}` and answering with a classification
    pub endpoint: String,

    /// Dotted path of the field whose text is classified
    pub text_field: String,
}

mod defaults {
    use std::path::PathBuf;

    use super::{ListKind, ListSpec, TrackedField};
    use crate::models::Severity;

    pub fn source_name() -> String {
        "permits".into()
    }

    // Path defaults
    pub fn data_dir() -> PathBuf {
        PathBuf::from("data")
    }
    pub fn snapshot_prefix() -> String {
        "permits_data".into()
    }
    pub fn report_prefix() -> String {
        "permit_daily_report".into()
    }
    pub fn log_file() -> String {
        "daily_update_temp.jsonl".into()
    }
    pub fn processed_file() -> String {
        "processed_ids.json".into()
    }
    pub fn ids_file() -> String {
        "ids.json".into()
    }
    pub fn backup_dir() -> String {
        ".backup".into()
    }

    // Fetcher defaults
    pub fn url_template() -> String {
        "http://127.0.0.1:8080/records/{id}".into()
    }
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; planwatch/0.1)".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn min_body_bytes() -> usize {
        1
    }
    pub fn block_markers() -> Vec<String> {
        vec![
            "captcha".into(),
            "recaptcha".into(),
            "are you a robot".into(),
            "access denied".into(),
        ]
    }
    pub fn session_suffix() -> String {
        "-session-{token}".into()
    }

    // Retry defaults
    pub fn max_attempts() -> u32 {
        3
    }
    pub fn transient_backoff() -> u64 {
        2_000
    }
    pub fn max_block_retries() -> u32 {
        3
    }
    pub fn block_cooldown() -> u64 {
        30_000
    }

    // Pool defaults
    pub fn workers() -> usize {
        5
    }
    pub fn progress_every() -> usize {
        10
    }

    // Breaker defaults
    pub fn breaker_enabled() -> bool {
        true
    }
    pub fn max_failure_percent() -> u8 {
        50
    }
    pub fn min_attempts() -> usize {
        20
    }

    // Diff defaults
    pub fn tracked_fields() -> Vec<TrackedField> {
        vec![TrackedField {
            name: "status".into(),
            path: "status".into(),
            severity: Severity::High,
        }]
    }
    pub fn lists() -> Vec<ListSpec> {
        vec![
            ListSpec {
                name: "history".into(),
                kind: ListKind::History,
                key: vec!["event_description".into(), "event_date".into()],
                category: None,
            },
            ListSpec {
                name: "requirements_level".into(),
                kind: ListKind::Staged,
                key: vec!["Phaze".into(), "Requirement".into(), "Date".into()],
                category: Some("Phaze".into()),
            },
            ListSpec {
                name: "meeting_history".into(),
                kind: ListKind::Keyed,
                key: vec!["meeting_id".into()],
                category: None,
            },
        ]
    }
}
