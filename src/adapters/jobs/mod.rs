//! Remote de-identification jobs
//!
//! Instead of de-identifying locally, a file can be handed to a utility that
//! runs next to the datastore and writes its output straight into the
//! destination container. [`JobRunner`] is the contract the export pipeline
//! consumes; [`ApiJobRunner`] speaks to the datastore's job API.

use crate::adapters::datastore::DatastoreResult;
use crate::adapters::http::ApiClient;
use crate::domain::{ContainerRef, DatastoreError, JobId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::str::FromStr;

/// State reported by the job API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Complete,
    Failed,
    Cancelled,
    Unknown,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Unknown => "unknown",
        }
    }

    /// Whether the job can no longer change state
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            JobStatus::Complete | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = std::convert::Infallible;

    /// Unrecognised states map to [`JobStatus::Unknown`]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "pending" => JobStatus::Pending,
            "running" => JobStatus::Running,
            "complete" => JobStatus::Complete,
            "failed" => JobStatus::Failed,
            "cancelled" => JobStatus::Cancelled,
            _ => JobStatus::Unknown,
        })
    }
}

/// One poll of a job
#[derive(Debug, Clone, PartialEq)]
pub struct JobSnapshot {
    pub id: JobId,
    pub status: JobStatus,
    /// Last time the job reported progress
    pub last_activity: Option<DateTime<Utc>>,
}

impl JobSnapshot {
    /// A running job with no activity for longer than `threshold`
    pub fn is_hanging(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> bool {
        self.status == JobStatus::Running
            && self
                .last_activity
                .map_or(false, |last| now.signed_duration_since(last) > threshold)
    }
}

/// What a remote job needs to produce one de-identified file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    /// Resolver path of the utility to run
    pub utility: String,
    pub input_parent: ContainerRef,
    pub input_name: String,
    /// Profile file already stored in the datastore
    pub profile_parent: ContainerRef,
    pub profile_name: String,
    pub destination: ContainerRef,
    pub output_filename: String,
}

/// Submits, polls and cancels remote de-identification jobs
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn submit(&self, request: &JobRequest) -> DatastoreResult<JobId>;

    async fn status(&self, id: &JobId) -> DatastoreResult<JobSnapshot>;

    /// Requests cancellation and returns the job's resulting state
    ///
    /// A job that had already finished keeps its state; that is not an error.
    async fn cancel(&self, id: &JobId) -> DatastoreResult<JobStatus>;
}

const DONE_JOB_PREFIX: &str = "Cannot mutate a job that is ";

/// State named in an "already finished" rejection, if the message is one
fn finished_state_from_message(message: &str) -> Option<JobStatus> {
    let start = message.find(DONE_JOB_PREFIX)? + DONE_JOB_PREFIX.len();
    let state = message[start..]
        .split(|c: char| !c.is_ascii_alphabetic())
        .next()?;
    JobStatus::from_str(state).ok()
}

#[derive(Debug, Deserialize)]
struct WireJob {
    #[serde(rename = "_id")]
    id: String,
    state: String,
    #[serde(default)]
    last_activity: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct WireCreated {
    #[serde(rename = "_id")]
    id: String,
}

fn job_id(raw: String) -> DatastoreResult<JobId> {
    JobId::new(raw).map_err(DatastoreError::InvalidResponse)
}

/// [`JobRunner`] backed by the datastore's `jobs` endpoints
#[derive(Debug, Clone)]
pub struct ApiJobRunner {
    api: ApiClient,
}

impl ApiJobRunner {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[async_trait]
impl JobRunner for ApiJobRunner {
    async fn submit(&self, request: &JobRequest) -> DatastoreResult<JobId> {
        let url = self.api.endpoint(&["jobs"])?;
        let body = json!({
            "utility": request.utility,
            "inputs": {
                "input_file": {
                    "type": request.input_parent.kind,
                    "id": request.input_parent.id,
                    "name": request.input_name,
                },
                "deid_profile": {
                    "type": request.profile_parent.kind,
                    "id": request.profile_parent.id,
                    "name": request.profile_name,
                },
            },
            "destination": {
                "type": request.destination.kind,
                "id": request.destination.id,
            },
            "config": { "output_filename": request.output_filename },
        });
        let created: WireCreated = self
            .api
            .send_json(self.api.request(Method::POST, url).json(&body))
            .await?;
        let id = job_id(created.id)?;
        tracing::info!(job_id = %id, file = %request.input_name, "Submitted de-identification job");
        Ok(id)
    }

    async fn status(&self, id: &JobId) -> DatastoreResult<JobSnapshot> {
        let url = self.api.endpoint(&["jobs", id.as_str()])?;
        let wire: WireJob = self
            .api
            .send_json(self.api.request(Method::GET, url))
            .await?;
        let status = JobStatus::from_str(&wire.state).unwrap_or(JobStatus::Unknown);
        Ok(JobSnapshot {
            id: job_id(wire.id)?,
            status,
            last_activity: wire.last_activity,
        })
    }

    async fn cancel(&self, id: &JobId) -> DatastoreResult<JobStatus> {
        let url = self.api.endpoint(&["jobs", id.as_str()])?;
        let result = self
            .api
            .send(
                self.api
                    .request(Method::PUT, url)
                    .json(&json!({ "state": "cancelled" })),
            )
            .await;
        match result {
            Ok(_) => Ok(JobStatus::Cancelled),
            Err(DatastoreError::ClientError { message, status }) => {
                match finished_state_from_message(&message) {
                    Some(state) => {
                        tracing::info!(job_id = %id, state = %state, "Job already finished");
                        Ok(state)
                    }
                    None => Err(DatastoreError::ClientError { status, message }),
                }
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_status_parsing() {
        assert_eq!(JobStatus::from_str("Complete").unwrap(), JobStatus::Complete);
        assert_eq!(JobStatus::from_str("queued").unwrap(), JobStatus::Unknown);
        assert!(JobStatus::Cancelled.is_finished());
        assert!(!JobStatus::Running.is_finished());
    }

    #[test]
    fn test_finished_state_from_message() {
        assert_eq!(
            finished_state_from_message("Cannot mutate a job that is complete."),
            Some(JobStatus::Complete)
        );
        assert_eq!(finished_state_from_message("permission denied"), None);
    }

    #[test]
    fn test_hanging_uses_last_activity() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut snapshot = JobSnapshot {
            id: JobId::new("job-1").unwrap(),
            status: JobStatus::Running,
            last_activity: Some(now - chrono::Duration::seconds(300)),
        };
        let threshold = chrono::Duration::seconds(120);
        assert!(snapshot.is_hanging(now, threshold));

        snapshot.last_activity = Some(now - chrono::Duration::seconds(30));
        assert!(!snapshot.is_hanging(now, threshold));

        snapshot.last_activity = None;
        assert!(!snapshot.is_hanging(now, threshold));

        snapshot.status = JobStatus::Pending;
        snapshot.last_activity = Some(now - chrono::Duration::seconds(300));
        assert!(!snapshot.is_hanging(now, threshold));
    }
}
