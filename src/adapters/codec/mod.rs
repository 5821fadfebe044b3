//! De-identification codec
//!
//! The codec is opaque to the exporter: given a profile and a local file it
//! produces a de-identified file in an output directory, or fails. How the
//! output is named is decided by the caller's [`DestinationPolicy`].

pub mod command;

pub use command::CommandCodec;

use crate::domain::{DeidError, Result};
use crate::profile::Profile;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Decides the destination file name for an origin file name
pub trait DestinationPolicy: Send + Sync {
    fn destination_name(&self, origin_name: &str) -> String;
}

/// Keeps the origin name, dropping characters outside `[A-Za-z0-9._-]`
#[derive(Debug, Clone, Copy, Default)]
pub struct PreserveFileName;

impl DestinationPolicy for PreserveFileName {
    fn destination_name(&self, origin_name: &str) -> String {
        let safe: String = origin_name
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
            .collect();
        if safe.trim_matches('.').is_empty() {
            "file".to_string()
        } else {
            safe
        }
    }
}

/// One codec invocation
pub struct DeidRequest<'a> {
    pub profile: &'a Profile,
    /// The same profile persisted as YAML, for codecs that run out of process
    pub profile_path: &'a Path,
    /// Name of the file in the origin container
    pub origin_name: &'a str,
    pub input: &'a Path,
    /// Empty directory owned by the caller
    pub output_dir: &'a Path,
    pub destination: &'a dyn DestinationPolicy,
}

impl DeidRequest<'_> {
    /// Name the output is expected to carry
    pub fn destination_name(&self) -> String {
        self.destination.destination_name(self.origin_name)
    }
}

/// Applies a de-identification profile to a single file
#[async_trait]
pub trait DeidCodec: Send + Sync {
    /// De-identifies `request.input` into `request.output_dir`
    ///
    /// # Errors
    ///
    /// Returns [`DeidError::CodecFailure`] if the codec fails or produces no
    /// output.
    async fn deidentify(&self, request: &DeidRequest<'_>) -> Result<PathBuf>;
}

/// Locates the codec's output in `output_dir`
///
/// Prefers `output_dir/<expected>`; otherwise accepts a single file.
///
/// # Errors
///
/// Returns [`DeidError::CodecFailure`] when there is no output or more than one
/// candidate.
pub fn resolve_output(output_dir: &Path, expected: &str) -> Result<PathBuf> {
    let preferred = output_dir.join(expected);
    if preferred.is_file() {
        return Ok(preferred);
    }

    let mut produced = Vec::new();
    let entries = std::fs::read_dir(output_dir).map_err(|e| {
        DeidError::CodecFailure(format!(
            "cannot read output directory {}: {e}",
            output_dir.display()
        ))
    })?;
    for entry in entries {
        let path = entry?.path();
        if path.is_file() {
            produced.push(path);
        }
    }

    match produced.len() {
        1 => Ok(produced.remove(0)),
        0 => Err(DeidError::CodecFailure(format!(
            "no de-identified output was produced for {expected}"
        ))),
        n => Err(DeidError::CodecFailure(format!(
            "{n} output files were produced for {expected}"
        ))),
    }
}
