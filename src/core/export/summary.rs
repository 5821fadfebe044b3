//! Export summary and reporting
//!
//! This module defines the structure used to track and report the outcome of
//! an export run.

use super::status::{ExportState, ExportStatusRecord};
use std::collections::BTreeMap;
use std::time::Duration;

/// Summary of an export operation
#[derive(Debug, Clone, Default)]
pub struct ExportSummary {
    /// Total number of files considered
    pub total_files: usize,

    /// Files that ended `exported`
    pub exported: usize,

    /// Files that ended `error`
    pub failed: usize,

    /// Files that ended neither `exported` nor `error` (hanging, cancelled,
    /// still pending)
    pub incomplete: usize,

    /// Final state counts
    pub states: BTreeMap<ExportState, usize>,

    /// Duration of the export
    pub duration: Duration,

    /// Errors that stopped a container level before its files were exported
    pub errors: Vec<String>,
}

impl ExportSummary {
    /// Create a new empty export summary
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the duration
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Count one status row
    pub fn record(&mut self, record: &ExportStatusRecord) {
        self.total_files += 1;
        match record.state {
            ExportState::Exported => self.exported += 1,
            ExportState::Error => self.failed += 1,
            _ => self.incomplete += 1,
        }
        *self.states.entry(record.state).or_insert(0) += 1;
    }

    /// Add a container-level error
    pub fn add_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    /// Every file exported and no container-level error
    pub fn is_successful(&self) -> bool {
        self.failed == 0 && self.incomplete == 0 && self.errors.is_empty()
    }

    /// Get success rate as a percentage
    pub fn success_rate(&self) -> f64 {
        if self.total_files == 0 {
            return 100.0;
        }
        (self.exported as f64 / self.total_files as f64) * 100.0
    }

    /// Log the summary
    pub fn log_summary(&self) {
        tracing::info!(
            total_files = self.total_files,
            exported = self.exported,
            failed = self.failed,
            incomplete = self.incomplete,
            duration_secs = self.duration.as_secs(),
            success_rate = format!("{:.2}%", self.success_rate()),
            "Export completed"
        );

        for (state, count) in &self.states {
            tracing::debug!(state = %state, count, "Final file states");
        }

        if !self.errors.is_empty() {
            tracing::warn!(error_count = self.errors.len(), "Export completed with errors");
            for error in &self.errors {
                tracing::warn!(message = %error, "Export error");
            }
        }
    }
}
