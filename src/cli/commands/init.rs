//! Init command implementation
//!
//! This module implements the `init` command for generating a sample
//! configuration file.

use clap::Args;
use std::fs;
use std::path::Path;

/// Arguments for the init command
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Path where to create the configuration file
    #[arg(short, long, default_value = "deid-export.toml")]
    pub output: String,

    /// Include comments explaining every setting
    #[arg(long)]
    pub with_examples: bool,

    /// Overwrite existing file
    #[arg(long)]
    pub force: bool,
}

impl InitArgs {
    /// Execute the init command
    pub async fn execute(&self) -> anyhow::Result<i32> {
        tracing::info!(output = %self.output, "Initializing configuration file");

        println!("📝 Initializing deid-export configuration");
        println!();

        if Path::new(&self.output).exists() && !self.force {
            println!("❌ Configuration file already exists: {}", self.output);
            println!("   Use --force to overwrite");
            return Ok(2);
        }

        let config_content = if self.with_examples {
            Self::generate_config_with_examples()
        } else {
            Self::generate_minimal_config()
        };

        match fs::write(&self.output, config_content) {
            Ok(_) => {
                println!("✅ Configuration file created: {}", self.output);
                println!();
                println!("Next steps:");
                println!("  1. Set datastore.base_url in {}", self.output);
                println!("  2. Export DEID_API_KEY or pass --api-key");
                println!("  3. Point codec.program at your de-identification program");
                println!("  4. Run export: deid-export export <origin> <project> <profile>");
                println!();
                Ok(0)
            }
            Err(e) => {
                println!("❌ Failed to write configuration file");
                println!("   Error: {e}");
                Ok(5)
            }
        }
    }

    /// Generate minimal configuration
    fn generate_minimal_config() -> String {
        r#"# deid-export configuration

[application]
log_level = "info"

[datastore]
base_url = "https://data.example.org/api"
# api_key = "${DEID_API_KEY}"
timeout_seconds = 60
tls_verify = true

[datastore.retry]
max_attempts = 3
delay_ms = 500

[export]
overwrite = false
max_workers = 0

[codec]
program = "deid-file"
args = ["--profile", "{profile}", "--output-dir", "{output_dir}", "{input}"]
timeout_seconds = 600

[mapping]
subject_column = "subject.code"
required_columns = []

[jobs]
hanging_after_seconds = 120
poll_interval_seconds = 10

[logging]
local_enabled = false
local_path = "./logs"
local_rotation = "daily"
"#
        .to_string()
    }

    /// Generate configuration with comments
    fn generate_config_with_examples() -> String {
        r#"# deid-export configuration
#
# Values of the form ${VAR} are read from the environment (or a .env file).
# Any DEID_<SECTION>_<KEY> variable overrides the matching setting.

# ============================================================================
# Application Settings
# ============================================================================
[application]
# Log level (trace, debug, info, warn, error)
log_level = "info"

# ============================================================================
# Datastore
# ============================================================================
[datastore]
# Base URL of the datastore REST API
base_url = "https://data.example.org/api"

# API key; --api-key and DEID_API_KEY take precedence
# api_key = "${DEID_API_KEY}"

# Request timeout in seconds
timeout_seconds = 60

# Verify TLS certificates
tls_verify = true

[datastore.retry]
# Attempts per call, including the first; only transient failures are retried
max_attempts = 3

# Pause between attempts in milliseconds
delay_ms = 500

# ============================================================================
# Export
# ============================================================================
[export]
# Replace destination files that were produced from a different origin file
overwrite = false

# Concurrent file exports; 0 uses the number of cores minus one
max_workers = 0

# Parent directory for scratch files (defaults to the system temp directory)
# scratch_dir = "/scratch/deid"

# Report path used when --csv-output is not given
# csv_output = "export_report.csv"

# ============================================================================
# De-identification program
# ============================================================================
[codec]
# Executable invoked once per file
program = "deid-file"

# Placeholders: {profile}, {input}, {output_dir}, {output}
args = ["--profile", "{profile}", "--output-dir", "{output_dir}", "{input}"]

# Kill the program after this many seconds
timeout_seconds = 600

# ============================================================================
# Subject mapping tables (--subject-csv)
# ============================================================================
[mapping]
# Column holding the subject code
subject_column = "subject.code"

# Columns that must be present besides the subject column
required_columns = []

# ============================================================================
# Remote jobs (--remote-utility)
# ============================================================================
[jobs]
# Seconds without progress before a running job is reported as hanging
hanging_after_seconds = 120

# Seconds between status polls
poll_interval_seconds = 10

# ============================================================================
# Logging
# ============================================================================
[logging]
# Write JSON logs to local files in addition to the console
local_enabled = false

# Directory for log files
local_path = "./logs"

# Rotation: daily, hourly or never
local_rotation = "daily"
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeidConfig;

    fn parse_generated(contents: &str) -> DeidConfig {
        toml::from_str(contents).unwrap()
    }

    #[test]
    fn test_generated_configs_parse_and_validate() {
        for contents in [
            InitArgs::generate_minimal_config(),
            InitArgs::generate_config_with_examples(),
        ] {
            let config = parse_generated(&contents);
            assert!(config.validate().is_ok());
            assert_eq!(config.export.max_workers, 0);
            assert_eq!(config.datastore.retry.max_attempts, 3);
        }
    }

    #[tokio::test]
    async fn test_init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("deid-export.toml");
        fs::write(&output, "existing").unwrap();

        let mut args = InitArgs {
            output: output.to_string_lossy().to_string(),
            with_examples: false,
            force: false,
        };
        assert_eq!(args.execute().await.unwrap(), 2);
        assert_eq!(fs::read_to_string(&output).unwrap(), "existing");

        args.force = true;
        assert_eq!(args.execute().await.unwrap(), 0);
        assert!(fs::read_to_string(&output).unwrap().contains("[datastore]"));
    }
}
