//! Client-side view of a remote de-identification job

use crate::adapters::jobs::{JobRunner, JobSnapshot, JobStatus};
use crate::core::retry::RetryPolicy;
use crate::domain::{DatastoreError, JobId};
use chrono::{DateTime, Utc};
use std::fmt;

/// Job state as tracked by the exporter
///
/// Extends [`JobStatus`] with `Hanging`, derived from the last activity
/// timestamp rather than reported by the job API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Complete,
    Failed,
    Cancelled,
    Hanging,
    Unknown,
}

impl JobState {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            JobState::Complete | JobState::Failed | JobState::Cancelled
        )
    }
}

impl From<JobStatus> for JobState {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Pending => JobState::Pending,
            JobStatus::Running => JobState::Running,
            JobStatus::Complete => JobState::Complete,
            JobStatus::Failed => JobState::Failed,
            JobStatus::Cancelled => JobState::Cancelled,
            JobStatus::Unknown => JobState::Unknown,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Complete => "complete",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
            JobState::Hanging => "hanging",
            JobState::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct DeidJob {
    id: JobId,
    state: JobState,
}

impl DeidJob {
    pub fn new(id: JobId) -> Self {
        Self {
            id,
            state: JobState::Pending,
        }
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Folds a poll result into the tracked state
    ///
    /// Finished states are sticky.
    pub fn observe(
        &mut self,
        snapshot: &JobSnapshot,
        now: DateTime<Utc>,
        hanging_after: chrono::Duration,
    ) -> JobState {
        if self.state.is_finished() {
            return self.state;
        }
        self.state = if snapshot.is_hanging(now, hanging_after) {
            JobState::Hanging
        } else {
            snapshot.status.into()
        };
        self.state
    }

    pub fn is_cancellable(&self) -> bool {
        matches!(
            self.state,
            JobState::Pending | JobState::Running | JobState::Hanging | JobState::Unknown
        )
    }

    /// Cancels the job if it may still run
    ///
    /// A job that finished in the meantime keeps the state the API reports.
    ///
    /// # Errors
    ///
    /// Returns the datastore error once the retry budget is spent.
    pub async fn cancel(
        &mut self,
        runner: &dyn JobRunner,
        retry: &RetryPolicy,
    ) -> Result<JobState, DatastoreError> {
        if !self.is_cancellable() {
            tracing::debug!(job_id = %self.id, state = %self.state, "Job not cancellable");
            return Ok(self.state);
        }
        let id = self.id.clone();
        let status = retry.run("cancel_job", || runner.cancel(&id)).await?;
        self.state = status.into();
        Ok(self.state)
    }
}
