//! Cancel job command implementation

use super::exit_code_for;
use crate::adapters::http::ApiClient;
use crate::adapters::jobs::{ApiJobRunner, JobRunner};
use crate::config::{load_config, secret_string};
use crate::domain::{DeidError, JobId};
use clap::Args;

/// Arguments for the cancel-job command
#[derive(Args, Debug)]
pub struct CancelJobArgs {
    /// Identifier of the remote de-identification job
    pub job_id: String,

    /// Datastore API key, overriding the configuration
    #[arg(long, env = "DEID_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,
}

impl CancelJobArgs {
    /// Execute the cancel-job command
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        let config = match load_config(config_path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load configuration: {e}");
                return Ok(2);
            }
        };
        if let Err(e) = config.validate() {
            eprintln!("Configuration validation failed: {e}");
            return Ok(2);
        }

        let job_id = match JobId::new(self.job_id.clone()) {
            Ok(id) => id,
            Err(e) => {
                eprintln!("Invalid job id: {e}");
                return Ok(2);
            }
        };

        let api = match ApiClient::new(&config.datastore, self.api_key.clone().map(secret_string)) {
            Ok(api) => api,
            Err(e) => {
                eprintln!("Failed to initialize datastore client: {e}");
                return Ok(exit_code_for(&e));
            }
        };

        match ApiJobRunner::new(api).cancel(&job_id).await {
            Ok(state) => {
                tracing::info!(job_id = %job_id, state = %state, "Job cancellation requested");
                println!("✅ Job {job_id} is {state}");
                Ok(0)
            }
            Err(e) => {
                let e = DeidError::from(e);
                tracing::error!(job_id = %job_id, error = %e, "Failed to cancel job");
                println!("❌ Failed to cancel job {job_id}");
                println!("   Error: {e}");
                Ok(exit_code_for(&e))
            }
        }
    }
}
