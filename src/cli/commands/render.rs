//! Render profiles command implementation
//!
//! Writes one de-identification profile per subject of a mapping table so the
//! substituted values can be reviewed before an export.

use super::exit_code_for;
use crate::profile::{
    MappingTable, MappingValidator, PerSubjectProfileFactory, Profile, DEFAULT_SUBJECT_COLUMN,
};
use clap::Args;
use std::path::PathBuf;

/// Arguments for the render-profiles command
#[derive(Args, Debug)]
pub struct RenderProfilesArgs {
    /// Base de-identification profile (YAML or JSON)
    pub profile: PathBuf,

    /// Subject mapping CSV
    pub csv: PathBuf,

    /// Directory the subject profiles are written to
    #[arg(short, long)]
    pub output_dir: PathBuf,

    /// Column holding the subject identifier
    #[arg(long, default_value = DEFAULT_SUBJECT_COLUMN)]
    pub subject_column: String,
}

impl RenderProfilesArgs {
    /// Execute the render-profiles command
    pub async fn execute(&self) -> anyhow::Result<i32> {
        tracing::info!(output_dir = %self.output_dir.display(), "Rendering subject profiles");

        let result = Profile::from_file(&self.profile).and_then(|profile| {
            let table = MappingTable::from_path(&self.csv)?;
            let mapping = MappingValidator::new(self.subject_column.clone()).validate(&profile, table)?;
            PerSubjectProfileFactory::new(profile, mapping).render_all(&self.output_dir)
        });

        match result {
            Ok(written) => {
                println!("✅ Rendered {} subject profiles", written.len());
                for (subject, path) in &written {
                    println!("  {subject} → {}", path.display());
                }
                Ok(0)
            }
            Err(e) => {
                println!("❌ Failed to render subject profiles");
                println!("   Error: {e}");
                Ok(exit_code_for(&e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::subject::profile_file_name;

    #[tokio::test]
    async fn test_render_writes_one_profile_per_subject() {
        let dir = tempfile::tempdir().unwrap();
        let profile = dir.path().join("profile.yml");
        std::fs::write(
            &profile,
            "dicom:\n  fields:\n    - name: PatientID\n      replace-with: REDACTED\n",
        )
        .unwrap();
        let csv = dir.path().join("subjects.csv");
        std::fs::write(
            &csv,
            "subject.code,dicom.fields.PatientID.replace-with\n001,SUBJ-A\n002,SUBJ-B\n",
        )
        .unwrap();
        let out = dir.path().join("rendered");

        let args = RenderProfilesArgs {
            profile,
            csv,
            output_dir: out.clone(),
            subject_column: DEFAULT_SUBJECT_COLUMN.to_string(),
        };
        assert_eq!(args.execute().await.unwrap(), 0);

        let rendered = Profile::from_file(out.join(profile_file_name("002"))).unwrap();
        let yaml = rendered.to_yaml_string().unwrap();
        assert!(yaml.contains("SUBJ-B"));
        assert!(out.join(profile_file_name("001")).exists());
    }

    #[tokio::test]
    async fn test_render_missing_subject_column() {
        let dir = tempfile::tempdir().unwrap();
        let profile = dir.path().join("profile.yml");
        std::fs::write(&profile, "dicom:\n  fields: []\n").unwrap();
        let csv = dir.path().join("subjects.csv");
        std::fs::write(&csv, "code\n001\n").unwrap();

        let args = RenderProfilesArgs {
            profile,
            csv,
            output_dir: dir.path().join("rendered"),
            subject_column: DEFAULT_SUBJECT_COLUMN.to_string(),
        };
        assert_eq!(args.execute().await.unwrap(), 2);
    }
}
