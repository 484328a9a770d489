// /////////////////////////////////////////////////////////////////////////////
// File Copier
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Service Settings
//!
//! The sealed configuration schema. Every recognized key is declared here
//! with an explicit default; unknown keys are rejected at parse time
//! (`deny_unknown_fields`), so a typo in the TOML fails startup instead of
//! silently running with a default.
//!
//! Loading order:
//!
//! 1. parse the TOML file,
//! 2. apply `FC_`-prefixed environment overrides for the common scalar knobs
//!    (empty or whitespace-only values are ignored),
//! 3. apply CLI overrides,
//! 4. validate.
//!
//! ## Example
//!
//! ```toml
//! [directories]
//! source = "/data/scanner/output"
//! quarantine = "/data/quarantine"
//!
//! [directories.targets.primary]
//! path = "/mnt/archive/slides"
//!
//! [directories.targets.review]
//! path = "/mnt/review/slides"
//!
//! [monitoring]
//! file_filters = ["*.svs"]
//! exclude_extensions = [".tmp", ".part", ".lock"]
//! minimum_file_age_secs = 10
//! stability_check_interval_secs = 5
//! max_stability_checks = 3
//!
//! [verification]
//! method = "Hash"
//!
//! [logging]
//! level = "info"
//! audit_directory = "/var/log/filecopier/audit"
//! ```

use filecopier_domain::value_objects::retry_strategy::{RetryStrategy, POLICY_FILE_SYSTEM};
use filecopier_domain::value_objects::verification::VerificationMethod;
use filecopier_domain::{ChunkSize, CopierError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "FC_";

/// Root of the configuration schema.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
pub struct Settings {
    pub directories: DirectoriesSettings,
    pub monitoring: MonitoringSettings,
    pub copying: CopyingSettings,
    pub verification: VerificationSettings,
    pub retry: RetrySettings,
    pub error_handler: ErrorHandlerSettings,
    pub processing: ProcessingSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DirectoriesSettings {
    /// Watched source directory
    pub source: PathBuf,
    /// Replication targets, keyed by destination name
    pub targets: BTreeMap<String, TargetSettings>,
    /// Where quarantined sources are moved
    pub quarantine: PathBuf,
}

impl Default for DirectoriesSettings {
    fn default() -> Self {
        Self {
            source: PathBuf::new(),
            targets: BTreeMap::new(),
            quarantine: PathBuf::from("quarantine"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetSettings {
    pub path: PathBuf,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct MonitoringSettings {
    pub include_subdirectories: bool,
    /// Include globs; empty accepts every file
    pub file_filters: Vec<String>,
    /// Literal, case-insensitive extension excludes
    pub exclude_extensions: Vec<String>,
    /// File-name prefixes marking partial files
    pub exclude_prefixes: Vec<String>,
    pub minimum_file_age_secs: u64,
    pub stability_check_interval_secs: u64,
    pub max_stability_checks: u32,
    /// Full-directory rescan cadence; 0 disables the rescan
    pub rescan_interval_secs: u64,
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self {
            include_subdirectories: false,
            file_filters: Vec::new(),
            exclude_extensions: vec![".tmp".into(), ".part".into(), ".lock".into()],
            exclude_prefixes: vec!["~".into()],
            minimum_file_age_secs: 10,
            stability_check_interval_secs: 5,
            max_stability_checks: 3,
            rescan_interval_secs: 60,
        }
    }
}

/// `retry_delay_seconds` accepts either a scalar or a list, matching the
/// legacy configuration format.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum DelaySeconds {
    Scalar(u64),
    List(Vec<u64>),
}

impl DelaySeconds {
    /// First configured delay, if any
    pub fn first(&self) -> Option<u64> {
        match self {
            DelaySeconds::Scalar(value) => Some(*value),
            DelaySeconds::List(values) => values.first().copied(),
        }
    }
}

impl Default for DelaySeconds {
    fn default() -> Self {
        DelaySeconds::Scalar(1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CopyingSettings {
    pub chunk_size_bytes: usize,
    pub preserve_timestamps: bool,
    pub max_concurrent_copies: usize,
    /// Legacy knob: seeds the `FileSystem` strategy's base delay when no
    /// explicit strategy is configured
    pub retry_delay_seconds: DelaySeconds,
    /// Item-level retry budget
    pub max_retries: u32,
}

impl Default for CopyingSettings {
    fn default() -> Self {
        Self {
            chunk_size_bytes: ChunkSize::DEFAULT_SIZE,
            preserve_timestamps: true,
            max_concurrent_copies: 4,
            retry_delay_seconds: DelaySeconds::default(),
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct VerificationSettings {
    pub method: VerificationMethod,
    /// Informational; SHA-256 is the only implemented algorithm
    pub hash_algorithm: String,
    pub large_file_threshold_mb: u64,
    pub enable_large_file_hashing: bool,
    pub timestamp_tolerance_secs: u64,
    pub hash_retry_attempts: u32,
    pub hash_retry_delay_ms: u64,
    pub fallback_to_size_timestamp: bool,
}

impl Default for VerificationSettings {
    fn default() -> Self {
        Self {
            method: VerificationMethod::Hash,
            hash_algorithm: "SHA-256".into(),
            large_file_threshold_mb: 1024,
            enable_large_file_hashing: false,
            timestamp_tolerance_secs: 2,
            hash_retry_attempts: 3,
            hash_retry_delay_ms: 500,
            fallback_to_size_timestamp: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
pub struct RetrySettings {
    /// Named strategies; `FileSystem`, `Network`, and `Verification` fall
    /// back to built-in defaults when absent
    pub strategies: BTreeMap<String, RetryStrategySettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RetryStrategySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub use_jitter: bool,
    pub retriable_patterns: Vec<String>,
}

impl Default for RetryStrategySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            use_jitter: true,
            retriable_patterns: Vec::new(),
        }
    }
}

impl RetryStrategySettings {
    fn to_strategy(&self, name: &str) -> RetryStrategy {
        RetryStrategy::new(
            name,
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            self.backoff_multiplier,
            self.use_jitter,
            self.retriable_patterns.clone(),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ErrorHandlerSettings {
    pub escalation_threshold: u32,
    pub history_retention_days: i64,
}

impl Default for ErrorHandlerSettings {
    fn default() -> Self {
        Self {
            escalation_threshold: 5,
            history_retention_days: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ProcessingSettings {
    pub operation_timeout_minutes: u64,
    pub retry_delay_minutes: u64,
    pub shutdown_timeout_secs: u64,
    pub high_queue_threshold: usize,
    pub max_completed_items: usize,
    pub completed_item_retention_hours: u64,
    pub processing_interval_secs: u64,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            operation_timeout_minutes: 30,
            retry_delay_minutes: 5,
            shutdown_timeout_secs: 30,
            high_queue_threshold: 100,
            max_completed_items: 1000,
            completed_item_retention_hours: 24,
            processing_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LoggingSettings {
    pub level: String,
    pub file_path: Option<PathBuf>,
    pub audit_directory: PathBuf,
    /// Average copy speed floor in MB/s that triggers a performance alert;
    /// 0 disables the alert
    pub performance_alert_min_mbps: f64,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            file_path: None,
            audit_directory: PathBuf::from("audit"),
            performance_alert_min_mbps: 1.0,
        }
    }
}

fn default_true() -> bool {
    true
}

impl Settings {
    /// Parses a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self, CopierError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| CopierError::invalid_config(format!("cannot read config file {}: {}", path.display(), e)))?;
        toml::from_str(&contents)
            .map_err(|e| CopierError::invalid_config(format!("cannot parse config file {}: {}", path.display(), e)))
    }

    /// Applies `FC_`-prefixed environment overrides from the process
    /// environment.
    pub fn apply_env_overrides(&mut self) {
        let vars: Vec<(String, String)> = std::env::vars().collect();
        self.apply_overrides_from(&vars);
    }

    /// Applies overrides from an explicit variable list. Empty or
    /// whitespace-only values are ignored.
    pub fn apply_overrides_from(&mut self, vars: &[(String, String)]) {
        for (key, value) in vars {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match name {
                "SOURCE_DIR" => self.directories.source = PathBuf::from(value),
                "QUARANTINE_DIR" => self.directories.quarantine = PathBuf::from(value),
                "LOG_LEVEL" => self.logging.level = value.to_string(),
                "MAX_CONCURRENT_COPIES" => {
                    if let Ok(parsed) = value.parse() {
                        self.copying.max_concurrent_copies = parsed;
                    }
                }
                "STABILITY_CHECK_INTERVAL_SECS" => {
                    if let Ok(parsed) = value.parse() {
                        self.monitoring.stability_check_interval_secs = parsed;
                    }
                }
                other => {
                    // FC_TARGET_<NAME> overrides a named target's path
                    if let Some(target_name) = other.strip_prefix("TARGET_") {
                        let needle = target_name.to_lowercase();
                        if let Some((_, target)) = self
                            .directories
                            .targets
                            .iter_mut()
                            .find(|(name, _)| name.to_lowercase() == needle)
                        {
                            target.path = PathBuf::from(value);
                        } else {
                            debug!(target = target_name, "env override names an unknown target");
                        }
                    }
                }
            }
        }
    }

    /// Validates the settings for service startup.
    pub fn validate(&self) -> Result<(), CopierError> {
        if self.directories.source.as_os_str().is_empty() {
            return Err(CopierError::invalid_config("directories.source is not set"));
        }
        if !self.directories.source.is_dir() {
            return Err(CopierError::invalid_config(format!(
                "source directory does not exist: {}",
                self.directories.source.display()
            )));
        }
        if self.enabled_targets().is_empty() {
            return Err(CopierError::invalid_config("no enabled targets configured"));
        }
        ChunkSize::new(self.copying.chunk_size_bytes)?;
        if self.copying.max_concurrent_copies == 0 {
            return Err(CopierError::invalid_config("copying.max_concurrent_copies must be at least 1"));
        }
        if self.monitoring.max_stability_checks == 0 {
            return Err(CopierError::invalid_config(
                "monitoring.max_stability_checks must be at least 1",
            ));
        }
        if self.monitoring.stability_check_interval_secs == 0 {
            return Err(CopierError::invalid_config(
                "monitoring.stability_check_interval_secs must be at least 1",
            ));
        }
        Ok(())
    }

    /// Enabled targets as a name → path map.
    pub fn enabled_targets(&self) -> BTreeMap<String, PathBuf> {
        self.directories
            .targets
            .iter()
            .filter(|(_, t)| t.enabled)
            .map(|(name, t)| (name.clone(), t.path.clone()))
            .collect()
    }

    /// Retry strategies: built-in defaults for the three well-known policy
    /// names, overridden or extended by configured entries. When no explicit
    /// `FileSystem` strategy exists, the legacy `copying.retry_delay_seconds`
    /// seeds its base delay.
    pub fn retry_strategies(&self) -> Vec<RetryStrategy> {
        let mut by_name: BTreeMap<String, RetryStrategy> = BTreeMap::new();

        let mut file_system = RetryStrategy::file_system();
        if let Some(delay_secs) = self.copying.retry_delay_seconds.first() {
            file_system = RetryStrategy::new(
                POLICY_FILE_SYSTEM,
                file_system.max_attempts(),
                Duration::from_secs(delay_secs.max(1)),
                file_system.max_delay(),
                file_system.backoff_multiplier(),
                file_system.use_jitter(),
                file_system.retriable_patterns().to_vec(),
            );
        }
        by_name.insert(file_system.name().to_string(), file_system);
        let network = RetryStrategy::network();
        by_name.insert(network.name().to_string(), network);
        let verification = RetryStrategy::verification();
        by_name.insert(verification.name().to_string(), verification);

        for (name, settings) in &self.retry.strategies {
            by_name.insert(name.clone(), settings.to_strategy(name));
        }
        by_name.into_values().collect()
    }

    pub fn chunk_size(&self) -> Result<ChunkSize, CopierError> {
        ChunkSize::new(self.copying.chunk_size_bytes)
    }

    pub fn stability_check_interval(&self) -> Duration {
        Duration::from_secs(self.monitoring.stability_check_interval_secs)
    }

    pub fn minimum_file_age(&self) -> Duration {
        Duration::from_secs(self.monitoring.minimum_file_age_secs)
    }

    pub fn rescan_interval(&self) -> Option<Duration> {
        (self.monitoring.rescan_interval_secs > 0).then(|| Duration::from_secs(self.monitoring.rescan_interval_secs))
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.processing.operation_timeout_minutes * 60)
    }

    pub fn item_retry_delay(&self) -> Duration {
        Duration::from_secs(self.processing.retry_delay_minutes * 60)
    }

    pub fn processing_interval(&self) -> Duration {
        Duration::from_secs(self.processing.processing_interval_secs.max(1))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.processing.shutdown_timeout_secs)
    }

    pub fn completed_item_retention(&self) -> Duration {
        Duration::from_secs(self.processing.completed_item_retention_hours * 3600)
    }

    pub fn large_file_threshold_bytes(&self) -> u64 {
        self.verification.large_file_threshold_mb * 1024 * 1024
    }
}
