//! CLI interface and argument parsing
//!
//! This module provides the command-line interface using clap.

pub mod commands;

use clap::{Parser, Subcommand};

/// Deid Export - de-identifying export of research imaging data
#[derive(Parser, Debug)]
#[command(name = "deid-export")]
#[command(version, about, long_about = None)]
#[command(author = "Deid Export Contributors")]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "deid-export.toml", env = "DEID_CONFIG")]
    pub config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "DEID_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Export a project, subject or session into another project
    Export(commands::export::ExportArgs),

    /// Validate a subject mapping CSV against a profile
    ValidateMapping(commands::validate::ValidateMappingArgs),

    /// Write one profile per subject of a mapping CSV
    RenderProfiles(commands::render::RenderProfilesArgs),

    /// Cancel a remote de-identification job
    CancelJob(commands::cancel::CancelJobArgs),

    /// Initialize a new configuration file
    Init(commands::init::InitArgs),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_export() {
        let cli = Cli::parse_from([
            "deid-export",
            "export",
            "lab/origin",
            "lab/dest",
            "profile.yml",
        ]);
        assert_eq!(cli.config, "deid-export.toml");
        match cli.command {
            Commands::Export(args) => {
                assert_eq!(args.origin_path, "lab/origin");
                assert_eq!(args.project_path, "lab/dest");
                assert!(!args.overwrite);
                assert!(args.subject_csv.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_parse_export_options() {
        let cli = Cli::parse_from([
            "deid-export",
            "export",
            "lab/origin/001",
            "lab/dest",
            "profile.yml",
            "--csv-output",
            "report.csv",
            "--overwrite",
            "--subject-csv",
            "subjects.csv",
        ]);
        match cli.command {
            Commands::Export(args) => {
                assert!(args.overwrite);
                assert_eq!(args.csv_output.as_deref(), Some(std::path::Path::new("report.csv")));
                assert_eq!(
                    args.subject_csv.as_deref(),
                    Some(std::path::Path::new("subjects.csv"))
                );
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_parse_with_config() {
        let cli = Cli::parse_from(["deid-export", "--config", "custom.toml", "init"]);
        assert_eq!(cli.config, "custom.toml");
    }

    #[test]
    fn test_cli_parse_with_log_level() {
        let cli = Cli::parse_from(["deid-export", "--log-level", "debug", "init"]);
        assert_eq!(cli.log_level, Some("debug".to_string()));
    }

    #[test]
    fn test_cli_parse_validate_mapping() {
        let cli = Cli::parse_from(["deid-export", "validate-mapping", "profile.yml", "subjects.csv"]);
        assert!(matches!(cli.command, Commands::ValidateMapping(_)));
    }

    #[test]
    fn test_cli_parse_render_profiles() {
        let cli = Cli::parse_from([
            "deid-export",
            "render-profiles",
            "profile.yml",
            "subjects.csv",
            "--output-dir",
            "out",
        ]);
        assert!(matches!(cli.command, Commands::RenderProfiles(_)));
    }

    #[test]
    fn test_cli_parse_cancel_job() {
        let cli = Cli::parse_from(["deid-export", "cancel-job", "job-1"]);
        assert!(matches!(cli.command, Commands::CancelJob(_)));
    }
}
