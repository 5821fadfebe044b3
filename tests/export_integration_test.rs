//! End-to-end export tests against the in-memory datastore

use async_trait::async_trait;
use deid_export::adapters::codec::{DeidCodec, DeidRequest};
use deid_export::adapters::datastore::{Datastore, InMemoryDatastore};
use deid_export::adapters::jobs::{JobRequest, JobRunner, JobSnapshot, JobStatus};
use deid_export::core::export::{
    ContainerExportWalker, ExportContext, ExportState, ProfileRef, RemoteExecution, RemoteJobSpec,
    ReportWriter,
};
use deid_export::domain::{Container, ContainerKind, DatastoreError, JobId, Result};
use deid_export::metadata::{dotted, ORIGIN_ID_KEY};
use deid_export::profile::{MappingTable, MappingValidator, PerSubjectProfileFactory, Profile};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Copies the input, optionally forcing every output to one name
#[derive(Default)]
struct CopyCodec {
    rename_to: Option<String>,
    seen_profiles: Mutex<Vec<String>>,
}

#[async_trait]
impl DeidCodec for CopyCodec {
    async fn deidentify(&self, request: &DeidRequest<'_>) -> Result<PathBuf> {
        let yaml = request.profile.to_yaml_string()?;
        self.seen_profiles.lock().unwrap().push(yaml);
        let name = self
            .rename_to
            .clone()
            .unwrap_or_else(|| request.destination_name());
        let output = request.output_dir.join(name);
        tokio::fs::copy(request.input, &output).await?;
        Ok(output)
    }
}

struct Fixture {
    store: Arc<InMemoryDatastore>,
    origin: Container,
    dest: Container,
    subject: Container,
    session: Container,
    acquisition: Container,
}

fn fields(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

fn dicom_fields() -> Map<String, Value> {
    fields(json!({
        "type": "dicom",
        "modality": "MR",
        "info": {
            "header": {"dicom": {"PatientName": "Doe^Jane"}},
            "SeriesDescription": "T1w"
        }
    }))
}

fn fixture() -> Fixture {
    let store = Arc::new(InMemoryDatastore::new());
    let origin = store.add_project("lab", "origin");
    let dest = store.add_project("lab", "dest");
    let subject = store.insert_container(
        &origin,
        ContainerKind::Subject,
        "001",
        fields(json!({"code": "001", "sex": "F"})),
    );
    let session = store.insert_container(&subject, ContainerKind::Session, "baseline", Map::new());
    let acquisition =
        store.insert_container(&session, ContainerKind::Acquisition, "T1", Map::new());
    store.insert_file(&acquisition, "a.dcm", dicom_fields(), b"first".to_vec());
    store.insert_file(&acquisition, "b.dcm", dicom_fields(), b"second".to_vec());
    Fixture {
        store,
        origin,
        dest,
        subject,
        session,
        acquisition,
    }
}

fn profile() -> Profile {
    Profile::from_value(json!({
        "dicom": {"fields": [{"name": "PatientID", "replace-with": "REDACTED"}]},
        "export": {
            "subject": {"whitelist": ["sex"]},
            "file": {"whitelist": ["modality", "info"]}
        }
    }))
    .unwrap()
}

fn context(fx: &Fixture, codec: CopyCodec) -> ExportContext {
    ExportContext::new(fx.store.clone(), Arc::new(codec)).with_max_workers(2)
}

/// Destination containers of `kind` under the destination project
fn in_dest(fx: &Fixture, kind: ContainerKind) -> Vec<Container> {
    fx.store
        .containers_of_kind(kind)
        .into_iter()
        .filter(|c| c.parents.project.as_ref() == Some(&fx.dest.id))
        .collect()
}

#[tokio::test]
async fn test_session_export_reparents_files() {
    let fx = fixture();
    let ctx = context(&fx, CopyCodec::default());
    let profile = profile();
    let path = Path::new("profile.yml");

    let mut walker = ContainerExportWalker::new(&ctx, ProfileRef::new(&profile, path));
    let errors = walker.export(&fx.session.id, &fx.dest).await.unwrap();

    assert_eq!(errors, 0);
    assert_eq!(walker.summary().exported, 2);
    assert_eq!(fx.store.creates(), 3);
    assert_eq!(fx.store.uploads(), 2);

    let subjects = in_dest(&fx, ContainerKind::Subject);
    assert_eq!(subjects.len(), 1);
    assert_eq!(subjects[0].code(), Some("001"));
    assert_eq!(subjects[0].fields["sex"], json!("F"));

    let acquisitions = in_dest(&fx, ContainerKind::Acquisition);
    assert_eq!(acquisitions.len(), 1);
    assert_eq!(acquisitions[0].label, "T1");

    let dest_acq = acquisitions[0].to_ref();
    assert_eq!(
        fx.store.file_content(&dest_acq, "a.dcm"),
        Some(b"first".to_vec())
    );
    let file = fx.store.get_file(&dest_acq, "a.dcm").await.unwrap().unwrap();
    assert_eq!(file.fields["modality"], json!("MR"));
    assert_eq!(
        dotted::get(&file.fields, "info.SeriesDescription"),
        Some(&json!("T1w"))
    );
    assert!(dotted::get(&file.fields, "info.header").is_none());
    assert!(dotted::get(&file.fields, ORIGIN_ID_KEY).is_some());
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let fx = fixture();
    let ctx = context(&fx, CopyCodec::default());
    let profile = profile();
    let path = Path::new("profile.yml");

    let mut first = ContainerExportWalker::new(&ctx, ProfileRef::new(&profile, path));
    assert_eq!(first.export(&fx.subject.id, &fx.dest).await.unwrap(), 0);
    let creates = fx.store.creates();
    let uploads = fx.store.uploads();

    let mut second = ContainerExportWalker::new(&ctx, ProfileRef::new(&profile, path));
    assert_eq!(second.export(&fx.subject.id, &fx.dest).await.unwrap(), 0);

    assert_eq!(fx.store.creates(), creates);
    assert_eq!(fx.store.uploads(), uploads);
    assert_eq!(second.summary().exported, 2);
    assert_eq!(second.summary().states.get(&ExportState::Exported), Some(&2));
    assert_eq!(in_dest(&fx, ContainerKind::Session).len(), 1);
}

#[tokio::test]
async fn test_same_batch_name_collision() {
    let fx = fixture();
    let codec = CopyCodec {
        rename_to: Some("scan.dcm".to_string()),
        ..Default::default()
    };
    let ctx = context(&fx, codec);
    let profile = profile();
    let path = Path::new("profile.yml");
    let dir = tempfile::tempdir().unwrap();
    let report_path = dir.path().join("report.csv");

    let mut walker = ContainerExportWalker::new(&ctx, ProfileRef::new(&profile, path))
        .with_report(ReportWriter::new(&report_path));
    let errors = walker.export(&fx.session.id, &fx.dest).await.unwrap();

    assert_eq!(errors, 1);
    assert_eq!(fx.store.uploads(), 1);

    let mut reader = csv::Reader::from_path(&report_path).unwrap();
    let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
    assert_eq!(rows.len(), 2);
    let headers = reader.headers().unwrap().clone();
    let state = headers.iter().position(|h| h == "state").unwrap();
    let errors_col = headers.iter().position(|h| h == "errors").unwrap();

    assert_eq!(&rows[0][state], "exported");
    assert_eq!(&rows[1][state], "error");
    assert!(rows[1][errors_col].contains("name collision"));
    assert!(rows[1][errors_col].contains("scan.dcm"));
}

#[tokio::test]
async fn test_existing_file_respects_overwrite() {
    let fx = fixture();
    let profile = profile();
    let path = Path::new("profile.yml");

    let ctx = context(&fx, CopyCodec::default());
    let mut walker = ContainerExportWalker::new(&ctx, ProfileRef::new(&profile, path));
    walker.export(&fx.session.id, &fx.dest).await.unwrap();

    // A file with the same name but no provenance
    let dest_acq = in_dest(&fx, ContainerKind::Acquisition).remove(0);
    fx.store
        .insert_file(&dest_acq, "a.dcm", Map::new(), b"foreign".to_vec());

    let mut blocked = ContainerExportWalker::new(&ctx, ProfileRef::new(&profile, path));
    assert_eq!(blocked.export(&fx.session.id, &fx.dest).await.unwrap(), 1);
    assert_eq!(
        fx.store.file_content(&dest_acq.to_ref(), "a.dcm"),
        Some(b"foreign".to_vec())
    );

    let overwriting = context(&fx, CopyCodec::default()).with_overwrite(true);
    let mut walker = ContainerExportWalker::new(&overwriting, ProfileRef::new(&profile, path));
    assert_eq!(walker.export(&fx.session.id, &fx.dest).await.unwrap(), 0);
    assert_eq!(fx.store.deletes(), 1);
    assert_eq!(
        fx.store.file_content(&dest_acq.to_ref(), "a.dcm"),
        Some(b"first".to_vec())
    );
}

#[tokio::test]
async fn test_project_export_recurses_into_subjects() {
    let fx = fixture();
    let other = fx.store.insert_container(
        &fx.origin,
        ContainerKind::Subject,
        "002",
        fields(json!({"code": "002"})),
    );
    let session = fx
        .store
        .insert_container(&other, ContainerKind::Session, "followup", Map::new());
    fx.store
        .insert_file(&session, "c.dcm", dicom_fields(), b"third".to_vec());
    // Not selected by the profile
    fx.store.insert_file(
        &fx.acquisition,
        "notes.txt",
        fields(json!({"type": "text"})),
        b"notes".to_vec(),
    );

    let ctx = context(&fx, CopyCodec::default());
    let profile = profile();
    let path = Path::new("profile.yml");
    let mut walker = ContainerExportWalker::new(&ctx, ProfileRef::new(&profile, path));

    assert_eq!(walker.export(&fx.origin.id, &fx.dest).await.unwrap(), 0);
    assert_eq!(walker.summary().total_files, 3);
    assert_eq!(in_dest(&fx, ContainerKind::Subject).len(), 2);
    assert_eq!(in_dest(&fx, ContainerKind::Session).len(), 2);
}

#[tokio::test]
async fn test_failed_subject_does_not_stop_its_siblings() {
    let fx = fixture();
    let other = fx.store.insert_container(
        &fx.origin,
        ContainerKind::Subject,
        "002",
        fields(json!({"code": "002"})),
    );
    let session = fx
        .store
        .insert_container(&other, ContainerKind::Session, "followup", Map::new());
    fx.store
        .insert_file(&session, "c.dcm", dicom_fields(), b"third".to_vec());
    fx.store.fail_next(
        "add_container",
        DatastoreError::AuthenticationFailed("denied".to_string()),
        1,
    );

    let ctx = context(&fx, CopyCodec::default());
    let profile = profile();
    let path = Path::new("profile.yml");
    let dir = tempfile::tempdir().unwrap();
    let report_path = dir.path().join("report.csv");
    let mut walker = ContainerExportWalker::new(&ctx, ProfileRef::new(&profile, path))
        .with_report(ReportWriter::new(&report_path));

    let errors = walker.export(&fx.origin.id, &fx.dest).await.unwrap();
    assert_eq!(errors, 2);

    let summary = walker.summary();
    assert_eq!(summary.total_files, 3);
    assert_eq!(summary.exported, 1);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.errors.len(), 1);
    assert!(summary.errors[0].contains("denied"));
    assert!(!summary.is_successful());

    let subjects = in_dest(&fx, ContainerKind::Subject);
    assert_eq!(subjects.len(), 1);
    assert_eq!(subjects[0].code(), Some("002"));

    let mut reader = csv::Reader::from_path(&report_path).unwrap();
    let headers = reader.headers().unwrap().clone();
    let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
    let name = headers.iter().position(|h| h == "origin_filename").unwrap();
    let state = headers.iter().position(|h| h == "state").unwrap();
    let parent = headers.iter().position(|h| h == "export_parent").unwrap();
    assert_eq!(rows.len(), 3);
    for row in rows.iter().filter(|r| &r[name] != "c.dcm") {
        assert_eq!(&row[state], "error");
        assert_eq!(&row[parent], fx.dest.id.as_str());
    }
    assert!(rows.iter().any(|r| &r[name] == "c.dcm" && &r[state] == "exported"));
}

#[tokio::test]
async fn test_acquisition_origin_rejected() {
    let fx = fixture();
    let ctx = context(&fx, CopyCodec::default());
    let profile = profile();
    let path = Path::new("profile.yml");
    let mut walker = ContainerExportWalker::new(&ctx, ProfileRef::new(&profile, path));

    let err = walker
        .export(&fx.acquisition.id, &fx.dest)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Cannot export container type acquisition"));
    assert_eq!(fx.store.creates(), 0);
}

fn subject_factory(csv: &str, scratch: &Path) -> PerSubjectProfileFactory {
    let table = MappingTable::from_reader(csv.as_bytes()).unwrap();
    let mapping = MappingValidator::new("subject.code")
        .validate(&profile(), table)
        .unwrap();
    PerSubjectProfileFactory::new(profile(), mapping).with_scratch_root(scratch)
}

#[tokio::test]
async fn test_subject_profile_is_applied() {
    let fx = fixture();
    let scratch = tempfile::tempdir().unwrap();
    let factory = subject_factory(
        "subject.code,dicom.fields.PatientID.replace-with\n001,SUBJ-A\n",
        scratch.path(),
    );
    let codec = Arc::new(CopyCodec::default());
    let ctx = ExportContext::new(fx.store.clone(), codec.clone());
    let profile = profile();
    let path = Path::new("profile.yml");

    let mut walker = ContainerExportWalker::new(&ctx, ProfileRef::new(&profile, path))
        .with_subject_profiles(&factory);
    assert_eq!(walker.export(&fx.subject.id, &fx.dest).await.unwrap(), 0);

    let seen = codec.seen_profiles.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|yaml| yaml.contains("SUBJ-A")));
}

#[tokio::test]
async fn test_subject_missing_from_mapping() {
    let fx = fixture();
    let scratch = tempfile::tempdir().unwrap();
    let factory = subject_factory(
        "subject.code,dicom.fields.PatientID.replace-with\n999,SUBJ-Z\n",
        scratch.path(),
    );
    let ctx = context(&fx, CopyCodec::default());
    let profile = profile();
    let path = Path::new("profile.yml");

    let mut walker = ContainerExportWalker::new(&ctx, ProfileRef::new(&profile, path))
        .with_subject_profiles(&factory);
    let errors = walker.export(&fx.subject.id, &fx.dest).await.unwrap();

    assert_eq!(errors, 2);
    assert_eq!(walker.summary().failed, 2);
    assert_eq!(fx.store.creates(), 0);
    assert_eq!(fx.store.uploads(), 0);
}

/// Job runner that writes the output itself once a job is polled
struct FakeRunner {
    store: Arc<InMemoryDatastore>,
    outcome: JobStatus,
    last_activity: chrono::DateTime<chrono::Utc>,
    submitted: AtomicUsize,
    jobs: Mutex<HashMap<String, JobRequest>>,
    cancelled: Mutex<Vec<String>>,
}

impl FakeRunner {
    fn new(store: Arc<InMemoryDatastore>, outcome: JobStatus) -> Self {
        Self {
            store,
            outcome,
            last_activity: chrono::Utc::now(),
            submitted: AtomicUsize::new(0),
            jobs: Mutex::new(HashMap::new()),
            cancelled: Mutex::new(Vec::new()),
        }
    }

    /// Jobs keep running but report no progress after `ago`
    fn silent_since(mut self, ago: chrono::Duration) -> Self {
        self.last_activity = chrono::Utc::now() - ago;
        self
    }

    fn submitted(&self) -> usize {
        self.submitted.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobRunner for FakeRunner {
    async fn submit(&self, request: &JobRequest) -> std::result::Result<JobId, DatastoreError> {
        let count = self.submitted.fetch_add(1, Ordering::SeqCst) + 1;
        let mut jobs = self.jobs.lock().unwrap();
        let id = format!("job-{count}");
        jobs.insert(id.clone(), request.clone());
        Ok(JobId::new(id).unwrap())
    }

    async fn status(&self, id: &JobId) -> std::result::Result<JobSnapshot, DatastoreError> {
        let request = self.jobs.lock().unwrap().remove(id.as_str());
        if let (Some(request), JobStatus::Complete) = (request, self.outcome) {
            let dir = tempfile::tempdir().unwrap();
            let output = dir.path().join(&request.output_filename);
            std::fs::write(&output, b"remote").unwrap();
            self.store
                .upload_file(&request.destination, &output)
                .await?;
        }
        Ok(JobSnapshot {
            id: id.clone(),
            status: self.outcome,
            last_activity: Some(self.last_activity),
        })
    }

    async fn cancel(&self, id: &JobId) -> std::result::Result<JobStatus, DatastoreError> {
        self.cancelled.lock().unwrap().push(id.to_string());
        Ok(JobStatus::Cancelled)
    }
}

fn remote(fx: &Fixture, runner: Arc<FakeRunner>) -> RemoteExecution {
    RemoteExecution {
        runner,
        job: RemoteJobSpec {
            utility: "utilities/deid".to_string(),
            profile_parent: fx.dest.to_ref(),
            profile_name: "profile.yml".to_string(),
        },
        poll_interval: Duration::ZERO,
        hanging_after: chrono::Duration::seconds(300),
    }
}

#[tokio::test]
async fn test_remote_jobs_complete_and_reconcile() {
    let fx = fixture();
    let runner = Arc::new(FakeRunner::new(fx.store.clone(), JobStatus::Complete));
    let ctx = context(&fx, CopyCodec::default()).with_remote(remote(&fx, runner.clone()));
    let profile = profile();
    let path = Path::new("profile.yml");

    let mut walker = ContainerExportWalker::new(&ctx, ProfileRef::new(&profile, path));
    assert_eq!(walker.export(&fx.session.id, &fx.dest).await.unwrap(), 0);
    assert_eq!(walker.summary().exported, 2);

    let dest_acq = in_dest(&fx, ContainerKind::Acquisition).remove(0).to_ref();
    let file = fx.store.get_file(&dest_acq, "b.dcm").await.unwrap().unwrap();
    assert!(dotted::get(&file.fields, ORIGIN_ID_KEY).is_some());
    assert!(runner.cancelled.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_remote_job_failure_is_reported() {
    let fx = fixture();
    let runner = Arc::new(FakeRunner::new(fx.store.clone(), JobStatus::Failed));
    let ctx = context(&fx, CopyCodec::default()).with_remote(remote(&fx, runner));
    let profile = profile();
    let path = Path::new("profile.yml");
    let dir = tempfile::tempdir().unwrap();
    let report_path = dir.path().join("report.csv");

    let mut walker = ContainerExportWalker::new(&ctx, ProfileRef::new(&profile, path))
        .with_report(ReportWriter::new(&report_path));
    assert_eq!(walker.export(&fx.session.id, &fx.dest).await.unwrap(), 2);

    let report = std::fs::read_to_string(&report_path).unwrap();
    assert!(report.contains("De-id job failed"));
    assert_eq!(fx.store.uploads(), 0);
}

#[tokio::test]
async fn test_second_remote_run_submits_nothing() {
    let fx = fixture();
    let runner = Arc::new(FakeRunner::new(fx.store.clone(), JobStatus::Complete));
    let ctx = context(&fx, CopyCodec::default()).with_remote(remote(&fx, runner.clone()));
    let profile = profile();
    let path = Path::new("profile.yml");

    let mut first = ContainerExportWalker::new(&ctx, ProfileRef::new(&profile, path));
    assert_eq!(first.export(&fx.session.id, &fx.dest).await.unwrap(), 0);
    assert_eq!(runner.submitted(), 2);
    assert_eq!(fx.store.uploads(), 2);

    let mut second = ContainerExportWalker::new(&ctx, ProfileRef::new(&profile, path));
    assert_eq!(second.export(&fx.session.id, &fx.dest).await.unwrap(), 0);
    assert_eq!(runner.submitted(), 2);
    assert_eq!(fx.store.uploads(), 2);
    assert_eq!(second.summary().exported, 2);
    assert!(second.summary().is_successful());
}

#[tokio::test]
async fn test_remote_foreign_file_blocks_job() {
    let fx = fixture();
    let runner = Arc::new(FakeRunner::new(fx.store.clone(), JobStatus::Complete));
    let ctx = context(&fx, CopyCodec::default());
    let profile = profile();
    let path = Path::new("profile.yml");

    // Creates the destination hierarchy locally
    let mut walker = ContainerExportWalker::new(&ctx, ProfileRef::new(&profile, path));
    walker.export(&fx.session.id, &fx.dest).await.unwrap();
    let dest_acq = in_dest(&fx, ContainerKind::Acquisition).remove(0);
    fx.store
        .insert_file(&dest_acq, "a.dcm", Map::new(), b"foreign".to_vec());

    let remote_ctx = context(&fx, CopyCodec::default()).with_remote(remote(&fx, runner.clone()));
    let mut walker = ContainerExportWalker::new(&remote_ctx, ProfileRef::new(&profile, path));
    assert_eq!(walker.export(&fx.session.id, &fx.dest).await.unwrap(), 1);

    assert_eq!(runner.submitted(), 0);
    assert_eq!(walker.summary().exported, 1);
    assert_eq!(
        fx.store.file_content(&dest_acq.to_ref(), "a.dcm"),
        Some(b"foreign".to_vec())
    );
}

#[tokio::test]
async fn test_hanging_jobs_fail_the_run() {
    let fx = fixture();
    let runner = Arc::new(
        FakeRunner::new(fx.store.clone(), JobStatus::Running)
            .silent_since(chrono::Duration::hours(1)),
    );
    let ctx = context(&fx, CopyCodec::default()).with_remote(RemoteExecution {
        hanging_after: chrono::Duration::seconds(60),
        ..remote(&fx, runner.clone())
    });
    let profile = profile();
    let path = Path::new("profile.yml");

    let mut walker = ContainerExportWalker::new(&ctx, ProfileRef::new(&profile, path));
    assert_eq!(walker.export(&fx.session.id, &fx.dest).await.unwrap(), 0);

    let summary = walker.summary();
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.exported, 0);
    assert_eq!(summary.incomplete, 2);
    assert_eq!(summary.states.get(&ExportState::Hanging), Some(&2));
    assert!(!summary.is_successful());
    assert_eq!(fx.store.uploads(), 0);
}
