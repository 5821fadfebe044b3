//! Export command implementation
//!
//! This module implements the `export` command, which de-identifies a
//! project, subject or session and re-parents it into a destination project.

use super::exit_code_for;
use crate::adapters::codec::CommandCodec;
use crate::adapters::datastore::{ApiDatastore, Datastore};
use crate::adapters::http::ApiClient;
use crate::adapters::jobs::ApiJobRunner;
use crate::config::{load_config, secret_string, DeidConfig, SecretString};
use crate::core::export::{
    ContainerExportWalker, ExportContext, ProfileRef, RemoteExecution, RemoteJobSpec,
    ReportWriter,
};
use crate::domain::{Container, ContainerKind, DatastoreError, DeidError};
use crate::log_error_with_context;
use crate::profile::{MappingTable, MappingValidator, PerSubjectProfileFactory, Profile};
use clap::Args;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Arguments for the export command
#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Resolver path of the container to export (group/project[/subject[/session]])
    pub origin_path: String,

    /// Resolver path of the destination project (group/project)
    pub project_path: String,

    /// De-identification profile (YAML or JSON)
    pub profile: PathBuf,

    /// Path of the CSV status report
    #[arg(long, value_name = "PATH")]
    pub csv_output: Option<PathBuf>,

    /// Datastore API key, overriding the configuration
    #[arg(long, env = "DEID_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Replace destination files that were not produced by this origin
    #[arg(long)]
    pub overwrite: bool,

    /// Subject mapping CSV for per-subject profiles
    #[arg(long, value_name = "PATH")]
    pub subject_csv: Option<PathBuf>,

    /// Override the number of concurrent file exports
    #[arg(long)]
    pub max_workers: Option<usize>,

    /// Run de-identification as remote jobs with this utility
    #[arg(long, value_name = "UTILITY")]
    pub remote_utility: Option<String>,
}

impl ExportArgs {
    /// Execute the export command
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        tracing::info!("Starting export command");
        let start = Instant::now();

        // Load configuration
        let mut config = match load_config(config_path) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load configuration");
                eprintln!("Failed to load configuration: {e}");
                return Ok(2);
            }
        };

        // Apply CLI overrides
        if self.overwrite {
            tracing::info!("Enabling overwrite from CLI");
            config.export.overwrite = true;
        }
        if let Some(workers) = self.max_workers {
            tracing::info!(max_workers = workers, "Overriding worker count from CLI");
            config.export.max_workers = workers;
        }

        if let Err(e) = config.validate() {
            tracing::error!(error = %e, "Configuration validation failed");
            eprintln!("Configuration validation failed: {e}");
            return Ok(2);
        }

        // Profile and mapping are validated before anything touches the destination
        let profile = match Profile::from_file(&self.profile).and_then(|p| {
            p.validate_field_rules()?;
            Ok(p)
        }) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(error = %e, profile = %self.profile.display(), "Invalid profile");
                eprintln!("Invalid profile {}: {e}", self.profile.display());
                return Ok(exit_code_for(&e));
            }
        };

        let factory = match &self.subject_csv {
            Some(csv) => match self.subject_profiles(&config, &profile, csv) {
                Ok(factory) => Some(factory),
                Err(e) => {
                    tracing::error!(error = %e, csv = %csv.display(), "Subject mapping validation failed");
                    eprintln!("Subject mapping {} is invalid: {e}", csv.display());
                    return Ok(exit_code_for(&e));
                }
            },
            None => None,
        };
        if factory.is_some() && self.remote_utility.is_some() {
            eprintln!("--subject-csv cannot be combined with --remote-utility");
            return Ok(2);
        }

        let api_key: Option<SecretString> = self.api_key.clone().map(secret_string);
        let store = match ApiDatastore::new(&config.datastore, api_key.clone()) {
            Ok(s) => Arc::new(s),
            Err(e) => {
                eprintln!("Failed to initialize datastore client: {e}");
                return Ok(exit_code_for(&e));
            }
        };

        // Resolve origin and destination
        let (origin, dest_project) = match self.resolve(store.as_ref()).await {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::error!(error = %e, "Failed to resolve containers");
                eprintln!("{e}");
                return Ok(match &e {
                    DeidError::RemoteCallFailure(DatastoreError::NotFound(_)) => 2,
                    other => exit_code_for(other),
                });
            }
        };

        let codec = Arc::new(CommandCodec::new(&config.codec));
        let mut ctx = ExportContext::from_config(store.clone(), codec, &config);
        if let Some(utility) = &self.remote_utility {
            match self
                .remote_execution(&config, api_key, store.as_ref(), &dest_project, utility)
                .await
            {
                Ok(remote) => ctx = ctx.with_remote(remote),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to prepare remote jobs");
                    eprintln!("Failed to prepare remote jobs: {e}");
                    return Ok(exit_code_for(&e));
                }
            }
        }

        let report_path = self
            .csv_output
            .clone()
            .or_else(|| config.export.csv_output.clone().map(PathBuf::from))
            .unwrap_or_else(|| default_report_path(&origin));
        let report = ReportWriter::new(report_path.clone());

        println!("🚀 Exporting {} {} to {}", origin.kind, origin.id, self.project_path);
        println!();

        let profile_ref = ProfileRef::new(&profile, &self.profile);
        let mut walker = ContainerExportWalker::new(&ctx, profile_ref).with_report(report);
        if let Some(factory) = &factory {
            walker = walker.with_subject_profiles(factory);
        }

        let outcome = walker.export(&origin.id, &dest_project).await;
        let mut summary = walker.into_summary().with_duration(start.elapsed());
        let exit_on_error = match outcome {
            Ok(errors) => {
                tracing::info!(errors, "Export walk finished");
                None
            }
            Err(e) => {
                log_error_with_context!(e, "Export failed");
                summary.add_error(e.to_string());
                Some(exit_code_for(&e))
            }
        };
        summary.log_summary();

        // Display summary
        println!("📊 Export Summary:");
        println!("  Total Files: {}", summary.total_files);
        println!("  Exported: {}", summary.exported);
        println!("  Failed: {}", summary.failed);
        println!("  Incomplete: {}", summary.incomplete);
        for (state, count) in &summary.states {
            println!("    {state}: {count}");
        }
        println!("  Duration: {:.2}s", summary.duration.as_secs_f64());
        println!("  Success Rate: {:.2}%", summary.success_rate());
        println!("  Report: {}", report_path.display());
        println!();

        if !summary.errors.is_empty() {
            println!("⚠️  Errors encountered:");
            for error in &summary.errors {
                println!("  - {error}");
            }
            println!();
        }

        let exit_code = if let Some(code) = exit_on_error {
            println!("❌ Export stopped");
            code
        } else if summary.is_successful() {
            println!("✅ Export completed successfully!");
            0
        } else {
            println!("⚠️  Export completed with failures");
            1
        };
        Ok(exit_code)
    }

    fn subject_profiles(
        &self,
        config: &DeidConfig,
        profile: &Profile,
        csv: &Path,
    ) -> crate::domain::Result<PerSubjectProfileFactory> {
        let table = MappingTable::from_path(csv)?;
        let mapping = MappingValidator::new(config.mapping.subject_column.clone())
            .with_required_columns(config.mapping.required_columns.iter().cloned())
            .validate(profile, table)?;
        let mut factory = PerSubjectProfileFactory::new(profile.clone(), mapping);
        if let Some(root) = &config.export.scratch_dir {
            factory = factory.with_scratch_root(root);
        }
        Ok(factory)
    }

    async fn resolve(&self, store: &dyn Datastore) -> crate::domain::Result<(Container, Container)> {
        let origin = store.lookup(&self.origin_path).await?;
        let dest = store.lookup(&self.project_path).await?;
        if dest.kind != ContainerKind::Project {
            return Err(DeidError::Validation(format!(
                "{} {} is not a project!",
                dest.kind, dest.id
            )));
        }
        Ok((origin, dest))
    }

    /// Uploads the profile next to the destination project so jobs can read it
    async fn remote_execution(
        &self,
        config: &DeidConfig,
        api_key: Option<SecretString>,
        store: &dyn Datastore,
        dest_project: &Container,
        utility: &str,
    ) -> crate::domain::Result<RemoteExecution> {
        let profile_name = self
            .profile
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| {
                DeidError::Validation(format!("no file name in {}", self.profile.display()))
            })?;
        store.upload_file(&dest_project.to_ref(), &self.profile).await?;

        let runner = ApiJobRunner::new(ApiClient::new(&config.datastore, api_key)?);
        let job = RemoteJobSpec {
            utility: utility.to_string(),
            profile_parent: dest_project.to_ref(),
            profile_name,
        };
        Ok(RemoteExecution::new(Arc::new(runner), job, &config.jobs))
    }
}

/// `<kind>_<id>_export.csv` in the working directory
pub fn default_report_path(origin: &Container) -> PathBuf {
    PathBuf::from(format!("{}_{}_export.csv", origin.kind, origin.id))
}
