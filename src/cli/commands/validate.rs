//! Validate mapping command implementation
//!
//! This module implements the `validate-mapping` command, which checks a
//! subject mapping CSV against a de-identification profile without touching
//! any datastore.

use super::exit_code_for;
use crate::profile::{MappingTable, MappingValidator, Profile, DEFAULT_SUBJECT_COLUMN};
use clap::Args;
use std::path::PathBuf;

/// Arguments for the validate-mapping command
#[derive(Args, Debug)]
pub struct ValidateMappingArgs {
    /// De-identification profile (YAML or JSON)
    pub profile: PathBuf,

    /// Subject mapping CSV
    pub csv: PathBuf,

    /// Column holding the subject identifier
    #[arg(long, default_value = DEFAULT_SUBJECT_COLUMN)]
    pub subject_column: String,

    /// Additional required columns (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub required: Vec<String>,
}

impl ValidateMappingArgs {
    /// Execute the validate-mapping command
    pub async fn execute(&self) -> anyhow::Result<i32> {
        tracing::info!(profile = %self.profile.display(), csv = %self.csv.display(), "Validating subject mapping");

        println!("🔍 Validating {} against {}", self.csv.display(), self.profile.display());
        println!();

        let profile = match Profile::from_file(&self.profile) {
            Ok(p) => {
                println!("✅ Profile loaded successfully");
                p
            }
            Err(e) => {
                println!("❌ Failed to load profile");
                println!("   Error: {e}");
                return Ok(exit_code_for(&e));
            }
        };

        let table = match MappingTable::from_path(&self.csv) {
            Ok(t) => t,
            Err(e) => {
                println!("❌ Failed to read mapping table");
                println!("   Error: {e}");
                return Ok(exit_code_for(&e));
            }
        };

        let validator = MappingValidator::new(self.subject_column.clone())
            .with_required_columns(self.required.iter().cloned());
        match validator.validate(&profile, table) {
            Ok(mapping) => {
                println!("✅ Mapping is valid");
                println!();
                println!("Mapping Summary:");
                println!("  Subject Column: {}", mapping.subject_column());
                println!("  Subjects: {}", mapping.len());
                if !mapping.unmatched_columns().is_empty() {
                    println!("  ⚠️  Columns not found in profile:");
                    for column in mapping.unmatched_columns() {
                        println!("    - {column}");
                    }
                }
                println!();
                Ok(0)
            }
            Err(e) => {
                println!("❌ Mapping validation failed");
                println!("   Error: {e}");
                println!();
                Ok(exit_code_for(&e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &std::path::Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    const PROFILE: &str = "dicom:\n  fields:\n    - name: PatientID\n      replace-with: REDACTED\n";

    #[tokio::test]
    async fn test_valid_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let args = ValidateMappingArgs {
            profile: write(dir.path(), "profile.yml", PROFILE),
            csv: write(
                dir.path(),
                "subjects.csv",
                "subject.code,dicom.fields.PatientID.replace-with\n001,SUBJ-A\n002,SUBJ-B\n",
            ),
            subject_column: DEFAULT_SUBJECT_COLUMN.to_string(),
            required: Vec::new(),
        };
        assert_eq!(args.execute().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_subjects_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let args = ValidateMappingArgs {
            profile: write(dir.path(), "profile.yml", PROFILE),
            csv: write(
                dir.path(),
                "subjects.csv",
                "subject.code,dicom.fields.PatientID.replace-with\n001,A\n001,B\n",
            ),
            subject_column: DEFAULT_SUBJECT_COLUMN.to_string(),
            required: Vec::new(),
        };
        assert_eq!(args.execute().await.unwrap(), 2);
    }
}
