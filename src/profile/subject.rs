//! Per-subject profiles
//!
//! Builds the profile for one subject by substituting that subject's mapping
//! row into the base profile, and materializes it on disk for the codec.

use super::mapping::ValidatedMapping;
use super::model::Profile;
use super::template;
use crate::domain::Result;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Produces one-off profiles for individual subjects
#[derive(Debug, Clone)]
pub struct PerSubjectProfileFactory {
    base: Profile,
    mapping: ValidatedMapping,
    scratch_root: Option<PathBuf>,
}

impl PerSubjectProfileFactory {
    pub fn new(base: Profile, mapping: ValidatedMapping) -> Self {
        Self {
            base,
            mapping,
            scratch_root: None,
        }
    }

    /// Directory under which materialized profiles are written
    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }

    pub fn base(&self) -> &Profile {
        &self.base
    }

    pub fn mapping(&self) -> &ValidatedMapping {
        &self.mapping
    }

    /// Builds the profile for `subject_id`
    ///
    /// # Errors
    ///
    /// Returns [`crate::domain::DeidError::SubjectNotFound`] when the mapping
    /// has no row for the subject.
    pub fn build(&self, subject_id: &str) -> Result<Profile> {
        let substitutions = self.mapping.substitutions_for(subject_id)?;
        tracing::debug!(
            subject = %subject_id,
            substitutions = substitutions.len(),
            "Building subject profile"
        );
        Ok(template::apply(&self.base, &substitutions))
    }

    /// Builds the profile for `subject_id` and writes it to a fresh scratch
    /// directory
    ///
    /// The directory is removed when the returned handle is dropped.
    pub fn materialize(&self, subject_id: &str) -> Result<SubjectProfile> {
        let profile = self.build(subject_id)?;

        let mut builder = tempfile::Builder::new();
        builder.prefix("deid-profile-");
        let dir = match &self.scratch_root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };

        let path = dir.path().join(profile_file_name(subject_id));
        profile.write_yaml(&path)?;
        tracing::debug!(subject = %subject_id, path = %path.display(), "Materialized subject profile");

        Ok(SubjectProfile {
            subject_id: subject_id.to_string(),
            profile,
            path,
            _dir: dir,
        })
    }

    /// Writes the profile of every subject in the mapping into `output_dir`
    ///
    /// Returns subject identifier → written path.
    pub fn render_all(&self, output_dir: &Path) -> Result<BTreeMap<String, PathBuf>> {
        std::fs::create_dir_all(output_dir)?;
        let mut written = BTreeMap::new();
        for subject_id in self.mapping.subject_ids() {
            let profile = self.build(subject_id)?;
            let path = output_dir.join(profile_file_name(subject_id));
            profile.write_yaml(&path)?;
            written.insert(subject_id.to_string(), path);
        }
        tracing::info!(count = written.len(), output_dir = %output_dir.display(), "Rendered subject profiles");
        Ok(written)
    }
}

/// A subject profile written to scratch storage
#[derive(Debug)]
pub struct SubjectProfile {
    subject_id: String,
    profile: Profile,
    path: PathBuf,
    _dir: TempDir,
}

impl SubjectProfile {
    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    /// Location of the YAML file; valid while `self` lives
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// `deid_<subject>.yml`, with path-hostile characters replaced
pub fn profile_file_name(subject_id: &str) -> String {
    let safe: String = subject_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("deid_{safe}.yml")
}
