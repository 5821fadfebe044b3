//! Configuration schema types
//!
//! This module defines the structure of `deid-export.toml`.

use crate::config::SecretString;
use serde::{Deserialize, Serialize};

/// Root configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeidConfig {
    /// Application-level settings
    #[serde(default)]
    pub application: ApplicationConfig,

    /// Remote datastore connection
    pub datastore: DatastoreConfig,

    /// Export behaviour
    #[serde(default)]
    pub export: ExportConfig,

    /// External de-identification program
    #[serde(default)]
    pub codec: CodecConfig,

    /// Subject mapping table settings
    #[serde(default)]
    pub mapping: MappingConfig,

    /// Remote de-identification jobs
    #[serde(default)]
    pub jobs: JobsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl DeidConfig {
    /// Validates the configuration
    ///
    /// # Errors
    ///
    /// Returns a human-readable message for the first invalid value
    pub fn validate(&self) -> Result<(), String> {
        self.application.validate()?;
        self.datastore.validate()?;
        self.export.validate()?;
        self.codec.validate()?;
        self.mapping.validate()?;
        self.jobs.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl ApplicationConfig {
    fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            ));
        }
        Ok(())
    }
}

/// Retry policy for datastore calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per call, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Pause between attempts in milliseconds
    #[serde(default)]
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: 0,
        }
    }
}

/// Remote datastore configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatastoreConfig {
    /// Base URL of the datastore REST API
    pub base_url: String,

    /// API key; may be supplied with `--api-key` instead
    #[serde(default)]
    pub api_key: Option<SecretString>,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Verify TLS certificates
    #[serde(default = "default_true")]
    pub tls_verify: bool,

    /// Retry configuration
    #[serde(default)]
    pub retry: RetryConfig,
}

impl DatastoreConfig {
    fn validate(&self) -> Result<(), String> {
        if self.base_url.is_empty() {
            return Err("datastore.base_url cannot be empty".to_string());
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err("datastore.base_url must start with http:// or https://".to_string());
        }
        if self.timeout_seconds == 0 {
            return Err("datastore.timeout_seconds must be > 0".to_string());
        }
        if self.retry.max_attempts == 0 {
            return Err("datastore.retry.max_attempts must be > 0".to_string());
        }
        Ok(())
    }
}

/// Export behaviour
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Replace destination files whose provenance differs
    #[serde(default)]
    pub overwrite: bool,

    /// Concurrent file units; 0 means available cores minus one
    #[serde(default)]
    pub max_workers: usize,

    /// Parent directory for scratch files (system temp dir when unset)
    #[serde(default)]
    pub scratch_dir: Option<String>,

    /// Default report path when `--csv-output` is not given
    #[serde(default)]
    pub csv_output: Option<String>,
}

impl ExportConfig {
    fn validate(&self) -> Result<(), String> {
        if self.max_workers > 256 {
            return Err("export.max_workers must be <= 256".to_string());
        }
        Ok(())
    }

    /// Worker count with the 0 = cores-1 rule applied
    pub fn effective_workers(&self) -> usize {
        if self.max_workers > 0 {
            return self.max_workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get().saturating_sub(1))
            .unwrap_or(1)
            .max(1)
    }
}

/// External de-identification program
///
/// `args` may reference `{profile}`, `{input}`, `{output_dir}` and `{output}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodecConfig {
    /// Executable to run
    #[serde(default = "default_codec_program")]
    pub program: String,

    /// Arguments with placeholders
    #[serde(default = "default_codec_args")]
    pub args: Vec<String>,

    /// Kill the program after this many seconds
    #[serde(default = "default_codec_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            program: default_codec_program(),
            args: default_codec_args(),
            timeout_seconds: default_codec_timeout_seconds(),
        }
    }
}

impl CodecConfig {
    fn validate(&self) -> Result<(), String> {
        if self.program.trim().is_empty() {
            return Err("codec.program cannot be empty".to_string());
        }
        if !self.args.iter().any(|a| a.contains("{input}")) {
            return Err("codec.args must reference {input}".to_string());
        }
        if self.timeout_seconds == 0 {
            return Err("codec.timeout_seconds must be > 0".to_string());
        }
        Ok(())
    }
}

/// Subject mapping table settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingConfig {
    /// Column holding the subject identifier
    #[serde(default = "default_subject_column")]
    pub subject_column: String,

    /// Columns that must be present besides the subject column
    #[serde(default)]
    pub required_columns: Vec<String>,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            subject_column: default_subject_column(),
            required_columns: Vec::new(),
        }
    }
}

impl MappingConfig {
    fn validate(&self) -> Result<(), String> {
        if self.subject_column.trim().is_empty() {
            return Err("mapping.subject_column cannot be empty".to_string());
        }
        Ok(())
    }
}

/// Remote de-identification job settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Seconds without activity before a running job counts as hanging
    #[serde(default = "default_hanging_after_seconds")]
    pub hanging_after_seconds: u64,

    /// Seconds between status polls
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            hanging_after_seconds: default_hanging_after_seconds(),
            poll_interval_seconds: default_poll_interval_seconds(),
        }
    }
}

impl JobsConfig {
    fn validate(&self) -> Result<(), String> {
        if self.hanging_after_seconds == 0 {
            return Err("jobs.hanging_after_seconds must be > 0".to_string());
        }
        if self.poll_interval_seconds == 0 {
            return Err("jobs.poll_interval_seconds must be > 0".to_string());
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Enable local JSON file logging
    #[serde(default)]
    pub local_enabled: bool,

    /// Local log directory
    #[serde(default = "default_local_path")]
    pub local_path: String,

    /// Log rotation strategy (daily, hourly, never)
    #[serde(default = "default_local_rotation")]
    pub local_rotation: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            local_enabled: false,
            local_path: default_local_path(),
            local_rotation: default_local_rotation(),
        }
    }
}

impl LoggingConfig {
    fn validate(&self) -> Result<(), String> {
        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&self.local_rotation.as_str()) {
            return Err(format!(
                "Invalid logging.local_rotation '{}'. Must be one of: {}",
                self.local_rotation,
                valid_rotations.join(", ")
            ));
        }
        if self.local_enabled && self.local_path.trim().is_empty() {
            return Err("logging.local_path cannot be empty when local_enabled".to_string());
        }
        Ok(())
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> usize {
    3
}

fn default_timeout_seconds() -> u64 {
    60
}

fn default_codec_program() -> String {
    "deid-file".to_string()
}

fn default_codec_args() -> Vec<String> {
    vec![
        "--profile".to_string(),
        "{profile}".to_string(),
        "--output-dir".to_string(),
        "{output_dir}".to_string(),
        "{input}".to_string(),
    ]
}

fn default_codec_timeout_seconds() -> u64 {
    600
}

fn default_subject_column() -> String {
    crate::profile::DEFAULT_SUBJECT_COLUMN.to_string()
}

fn default_hanging_after_seconds() -> u64 {
    120
}

fn default_poll_interval_seconds() -> u64 {
    10
}

fn default_local_path() -> String {
    "./logs".to_string()
}

fn default_local_rotation() -> String {
    "daily".to_string()
}
