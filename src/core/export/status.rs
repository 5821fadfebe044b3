//! File export states and the CSV status report

use crate::domain::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

/// Lifecycle state of a single file export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportState {
    Initialized,
    Processed,
    UploadAttempted,
    MetadataUpdated,
    Exported,
    ExistsAtDestination,
    /// Waiting on a remote de-identification job
    Pending,
    Cancelled,
    Hanging,
    Error,
}

impl ExportState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportState::Initialized => "initialized",
            ExportState::Processed => "processed",
            ExportState::UploadAttempted => "upload_attempted",
            ExportState::MetadataUpdated => "metadata_updated",
            ExportState::Exported => "exported",
            ExportState::ExistsAtDestination => "exists_at_destination",
            ExportState::Pending => "pending",
            ExportState::Cancelled => "cancelled",
            ExportState::Hanging => "hanging",
            ExportState::Error => "error",
        }
    }

    /// No further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExportState::Exported | ExportState::Cancelled | ExportState::Error
        )
    }
}

impl fmt::Display for ExportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the status report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportStatusRecord {
    pub origin_filename: String,
    pub origin_parent: String,
    pub origin_parent_type: String,
    pub export_filename: String,
    pub export_file_id: Option<String>,
    pub export_parent: String,
    pub state: ExportState,
    /// Tab-joined error messages
    pub errors: String,
}

impl ExportStatusRecord {
    pub fn is_error(&self) -> bool {
        self.state == ExportState::Error
    }
}

/// Appends status rows to a CSV file shared by a whole export run
///
/// The header is written only when the file does not exist yet, so rows from
/// every container level accumulate in one report.
#[derive(Debug, Clone)]
pub struct ReportWriter {
    path: PathBuf,
}

impl ReportWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `records`; an empty slice leaves the file untouched
    ///
    /// # Errors
    ///
    /// Returns an I/O or CSV error if the report cannot be written.
    pub fn append(&self, records: &[ExportStatusRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let is_new = !self.path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(is_new)
            .from_writer(file);
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;

        tracing::debug!(
            path = %self.path.display(),
            rows = records.len(),
            "Appended status rows"
        );
        Ok(())
    }
}
