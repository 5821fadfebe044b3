//! Per-file export state machine
//!
//! ```text
//! initialized -> processed -> upload_attempted -> metadata_updated -> exported
//!                          \-> exists_at_destination ----------------/
//! initialized -> pending (remote job) -> exported | cancelled | hanging
//!             \-> exists_at_destination (remote, already exported)
//! any state   -> error
//! ```
//!
//! Every transition is driven by the orchestrator; a unit never advances on
//! its own. Failures are recorded on the unit and never propagate, so one
//! file cannot abort its siblings.

use super::context::{ExportContext, ProfileRef};
use super::job::{DeidJob, JobState};
use super::status::{ExportState, ExportStatusRecord};
use crate::adapters::codec::DeidRequest;
use crate::adapters::jobs::{JobRequest, JobRunner};
use crate::domain::{ContainerRef, FileEntry};
use crate::log_unit_transition;
use crate::metadata::{dotted, MetadataView, ORIGIN_ID_KEY};
use crate::profile::ExportSpec;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::path::PathBuf;
use tempfile::TempDir;

/// Provenance stamp carried by a stored file
fn stamp_of(entry: &FileEntry) -> Option<&str> {
    dotted::get(&entry.fields, ORIGIN_ID_KEY).and_then(Value::as_str)
}

/// Remote job parameters shared by a batch
#[derive(Debug, Clone)]
pub struct RemoteJobSpec {
    pub utility: String,
    pub profile_parent: ContainerRef,
    pub profile_name: String,
}

/// Export of one origin file into one destination container
#[derive(Debug)]
pub struct FileExportUnit {
    origin: FileEntry,
    dest_parent: ContainerRef,
    filename: String,
    scratch: Option<TempDir>,
    deid_path: Option<PathBuf>,
    metadata: Option<MetadataView>,
    dest: Option<FileEntry>,
    job: Option<DeidJob>,
    state: ExportState,
    errors: Vec<String>,
}

impl FileExportUnit {
    pub fn new(origin: FileEntry, dest_parent: ContainerRef) -> Self {
        Self {
            origin,
            dest_parent,
            filename: String::new(),
            scratch: None,
            deid_path: None,
            metadata: None,
            dest: None,
            job: None,
            state: ExportState::Initialized,
            errors: Vec::new(),
        }
    }

    /// Unit that failed before it could start, e.g. for a subject missing
    /// from the mapping table
    pub fn failed(origin: FileEntry, dest_parent: ContainerRef, message: impl Into<String>) -> Self {
        let mut unit = Self::new(origin, dest_parent);
        unit.fail(message);
        unit
    }

    pub fn state(&self) -> ExportState {
        self.state
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn origin(&self) -> &FileEntry {
        &self.origin
    }

    pub fn dest_parent(&self) -> &ContainerRef {
        &self.dest_parent
    }

    /// Destination file name; empty until de-identified or submitted
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn dest(&self) -> Option<&FileEntry> {
        self.dest.as_ref()
    }

    pub fn job(&self) -> Option<&DeidJob> {
        self.job.as_ref()
    }

    /// Stamp the destination file must carry once exported
    pub fn local_stamp(&self) -> Option<&str> {
        self.metadata.as_ref().and_then(MetadataView::origin_id)
    }

    /// `(destination parent, file name)` once the unit has local output
    pub fn destination_key(&self) -> Option<(ContainerRef, String)> {
        (self.state == ExportState::Processed)
            .then(|| (self.dest_parent.clone(), self.filename.clone()))
    }

    fn transition(&mut self, to: ExportState) {
        if self.state == to {
            return;
        }
        log_unit_transition!(self.origin.id, self.origin.name, self.state, to);
        self.state = to;
    }

    fn fail(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(
            origin_id = %self.origin.id,
            file = %self.origin.name,
            error = %message,
            "File export failed"
        );
        self.errors.push(message);
        self.transition(ExportState::Error);
    }

    /// Drops local scratch output
    fn purge(&mut self) {
        self.deid_path = None;
        self.scratch = None;
    }

    /// `initialized -> processed`
    ///
    /// Downloads the origin file into unit-local scratch and runs the codec.
    pub async fn deidentify(
        &mut self,
        ctx: &ExportContext,
        profile: ProfileRef<'_>,
        export: &ExportSpec,
    ) {
        if self.state != ExportState::Initialized {
            tracing::warn!(file = %self.origin.name, state = %self.state, "Cannot de-identify in this state");
            return;
        }

        let parent = self.origin.parent.clone();
        let name = self.origin.name.clone();
        match ctx
            .retry
            .run("get_file", || ctx.store.get_file(&parent, &name))
            .await
        {
            Ok(Some(entry)) => self.origin = entry,
            Ok(None) => {
                self.fail(format!("{name} does not exist in {} {}", parent.kind, parent.id));
                return;
            }
            Err(e) => {
                self.fail(format!("could not look up {name} in {parent}: {e}"));
                return;
            }
        }

        let scratch = match ctx.scratch_dir("deid-file-") {
            Ok(dir) => dir,
            Err(e) => {
                self.fail(format!("could not create scratch directory for {name}: {e}"));
                return;
            }
        };
        let input_dir = scratch.path().join("input");
        let output_dir = scratch.path().join("output");
        if let Err(e) = std::fs::create_dir_all(&input_dir)
            .and_then(|_| std::fs::create_dir_all(&output_dir))
        {
            self.fail(format!("could not prepare scratch directory for {name}: {e}"));
            return;
        }

        let input = input_dir.join(ctx.destination.destination_name(&name));
        tracing::debug!(file = %name, local = %input.display(), "Downloading origin file");
        if let Err(e) = ctx
            .retry
            .run("download_file", || ctx.store.download_file(&parent, &name, &input))
            .await
        {
            self.fail(format!("could not download {name}: {e}"));
            return;
        }

        let request = DeidRequest {
            profile: profile.profile,
            profile_path: profile.path,
            origin_name: &name,
            input: &input,
            output_dir: &output_dir,
            destination: ctx.destination.as_ref(),
        };
        let output = match ctx.codec.deidentify(&request).await {
            Ok(path) => path,
            Err(e) => {
                self.fail(format!("an error was raised when de-identifying {name}: {e}"));
                return;
            }
        };
        if !output.is_file() {
            self.fail(format!("{name} de-identification failed."));
            return;
        }

        self.filename = output
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        self.deid_path = Some(output);
        self.scratch = Some(scratch);
        self.metadata = Some(ctx.filter.filter(&self.origin, export));
        self.transition(ExportState::Processed);
    }

    /// Marks the unit as losing a same-batch name claim
    pub fn collide(&mut self, claimed_by: &str) {
        let message = format!(
            "name collision: {} on {} is already claimed by {} in this batch",
            self.filename, self.dest_parent, claimed_by
        );
        self.fail(message);
        self.purge();
    }

    /// `processed -> upload_attempted | exists_at_destination`
    pub async fn upload(&mut self, ctx: &ExportContext) {
        if self.state != ExportState::Processed {
            tracing::warn!(file = %self.filename, state = %self.state, "Cannot upload, state is not processed");
            return;
        }
        let local = match self.deid_path.clone().filter(|p| p.is_file()) {
            Some(path) => path,
            None => {
                self.fail(format!(
                    "{} cannot be uploaded to {} - local path does not exist",
                    self.filename, self.dest_parent.id
                ));
                return;
            }
        };

        if !self.clear_destination(ctx).await {
            return;
        }

        let parent = self.dest_parent.clone();
        let filename = self.filename.clone();
        if let Err(e) = ctx
            .retry
            .run("upload_file", || ctx.store.upload_file(&parent, &local))
            .await
        {
            self.fail(format!("could not upload {filename} to {parent}: {e}"));
            return;
        }
        self.transition(ExportState::UploadAttempted);
    }

    /// Makes room for the destination file
    ///
    /// Returns `false` once the unit has settled instead: the name already
    /// holds this origin's export (`exists_at_destination`), or it holds
    /// another file and `overwrite` is off (`error`). With `overwrite` the
    /// other file is deleted.
    async fn clear_destination(&mut self, ctx: &ExportContext) -> bool {
        let parent = self.dest_parent.clone();
        let filename = self.filename.clone();
        let existing = match ctx
            .retry
            .run("get_file", || ctx.store.get_file(&parent, &filename))
            .await
        {
            Ok(existing) => existing,
            Err(e) => {
                self.fail(format!("could not check {filename} on {parent}: {e}"));
                return false;
            }
        };
        let Some(existing) = existing else {
            return true;
        };

        if self.local_stamp().is_some() && stamp_of(&existing) == self.local_stamp() {
            tracing::info!(file = %filename, parent = %parent, "File already exported");
            self.dest = Some(existing);
            self.transition(ExportState::ExistsAtDestination);
            return false;
        }
        if !ctx.overwrite {
            self.fail(format!(
                "{filename} cannot be uploaded to {}. File exists and overwrite is set to False",
                parent.id
            ));
            return false;
        }
        tracing::debug!(file = %filename, parent = %parent, "Deleting existing destination file");
        if let Err(e) = ctx
            .retry
            .run("delete_file", || ctx.store.delete_file(&parent, &filename))
            .await
        {
            self.fail(format!("could not replace {filename} on {parent}: {e}"));
            return false;
        }
        true
    }

    /// `upload_attempted | exists_at_destination -> metadata_updated -> exported`
    ///
    /// The info block and the remaining fields are written by separate
    /// calls; both are attempted even if one fails.
    pub async fn reconcile(&mut self, ctx: &ExportContext) {
        if !matches!(
            self.state,
            ExportState::UploadAttempted | ExportState::ExistsAtDestination
        ) {
            tracing::warn!(file = %self.filename, state = %self.state, "Nothing to reconcile");
            return;
        }
        let Some(metadata) = self.metadata.clone() else {
            self.fail(format!("no metadata prepared for {}", self.filename));
            return;
        };

        let parent = self.dest_parent.clone();
        let filename = self.filename.clone();
        match ctx
            .retry
            .run("get_file", || ctx.store.get_file(&parent, &filename))
            .await
        {
            Ok(Some(dest)) => self.dest = Some(dest),
            Ok(None) => {
                self.fail(format!(
                    "could not update metadata for {filename}: {} - file was not found!",
                    self.origin.id
                ));
                return;
            }
            Err(e) => {
                self.fail(format!("could not look up {filename} on {parent}: {e}"));
                return;
            }
        }

        let (info, rest) = metadata.split_info();
        let mut failures = Vec::new();
        if let Some(info) = info {
            if let Err(e) = ctx
                .retry
                .run("update_file_info", || {
                    ctx.store.update_file_info(&parent, &filename, info.clone())
                })
                .await
            {
                failures.push(format!("could not update info for {filename}: {e}"));
            }
        }
        if !rest.is_empty() {
            if let Err(e) = ctx
                .retry
                .run("update_file", || {
                    ctx.store.update_file(&parent, &filename, rest.clone())
                })
                .await
            {
                failures.push(format!("could not update metadata for {filename}: {e}"));
            }
        }
        if !failures.is_empty() {
            for failure in failures {
                self.fail(failure);
            }
            return;
        }
        self.transition(ExportState::MetadataUpdated);

        self.confirm(ctx).await;
    }

    /// `metadata_updated -> exported` once the stored stamp matches
    async fn confirm(&mut self, ctx: &ExportContext) {
        let parent = self.dest_parent.clone();
        let filename = self.filename.clone();
        let refreshed = match ctx
            .retry
            .run("get_file", || ctx.store.get_file(&parent, &filename))
            .await
        {
            Ok(Some(dest)) => dest,
            Ok(None) => {
                self.fail(format!("{filename} disappeared from {parent} after upload"));
                return;
            }
            Err(e) => {
                self.fail(format!("could not look up {filename} on {parent}: {e}"));
                return;
            }
        };

        let matches = self.local_stamp().is_some() && stamp_of(&refreshed) == self.local_stamp();
        self.dest = Some(refreshed);
        if matches {
            self.transition(ExportState::Exported);
            self.purge();
        } else {
            self.fail(format!(
                "provenance stamp on {filename} does not match its origin after metadata update"
            ));
        }
    }

    /// `initialized -> pending`: hands the file to a remote job
    ///
    /// The destination is checked first, so a file exported by an earlier
    /// run goes to `exists_at_destination` and no job is submitted.
    pub async fn submit_job(
        &mut self,
        ctx: &ExportContext,
        runner: &dyn JobRunner,
        spec: &RemoteJobSpec,
        export: &ExportSpec,
    ) {
        if let Some(job) = &self.job {
            tracing::warn!(
                file = %self.filename,
                job_id = %job.id(),
                "Job already exists. A new one will not be queued"
            );
            return;
        }
        if self.state != ExportState::Initialized {
            return;
        }

        self.filename = ctx.destination.destination_name(&self.origin.name);
        self.metadata = Some(ctx.filter.filter(&self.origin, export));
        if !self.clear_destination(ctx).await {
            return;
        }

        let request = JobRequest {
            utility: spec.utility.clone(),
            input_parent: self.origin.parent.clone(),
            input_name: self.origin.name.clone(),
            profile_parent: spec.profile_parent.clone(),
            profile_name: spec.profile_name.clone(),
            destination: self.dest_parent.clone(),
            output_filename: self.filename.clone(),
        };

        match ctx.retry.run("submit_job", || runner.submit(&request)).await {
            Ok(id) => {
                self.job = Some(DeidJob::new(id));
                self.transition(ExportState::Pending);
            }
            Err(e) => self.fail(format!(
                "an error was raised while attempting to submit a job for {}: {e}",
                self.filename
            )),
        }
    }

    /// Polls the remote job and advances the unit
    pub async fn refresh_job(
        &mut self,
        ctx: &ExportContext,
        runner: &dyn JobRunner,
        now: DateTime<Utc>,
        hanging_after: chrono::Duration,
    ) {
        if !matches!(self.state, ExportState::Pending | ExportState::Hanging) {
            return;
        }
        let Some(id) = self.job.as_ref().map(|job| job.id().clone()) else {
            return;
        };

        let snapshot = match ctx.retry.run("job_status", || runner.status(&id)).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.fail(format!("could not poll job {id}: {e}"));
                return;
            }
        };
        let observed = match self.job.as_mut() {
            Some(job) => job.observe(&snapshot, now, hanging_after),
            None => return,
        };

        match observed {
            JobState::Complete => {
                self.transition(ExportState::UploadAttempted);
                self.reconcile(ctx).await;
            }
            JobState::Failed => self.fail(format!(
                "De-id job failed. Please refer to the logs for job {id} for {} {} for additional details",
                self.dest_parent.kind, self.dest_parent.id
            )),
            JobState::Cancelled => self.transition(ExportState::Cancelled),
            JobState::Hanging => self.transition(ExportState::Hanging),
            JobState::Pending | JobState::Running | JobState::Unknown => {
                self.transition(ExportState::Pending)
            }
        }
    }

    /// Cancels the unit's remote job, if any
    pub async fn cancel_job(&mut self, ctx: &ExportContext, runner: &dyn JobRunner) {
        let Some(job) = self.job.as_mut() else {
            tracing::debug!(file = %self.origin.name, "Cannot cancel a job that does not exist");
            return;
        };
        let outcome = job.cancel(runner, &ctx.retry).await;
        match outcome {
            Ok(JobState::Cancelled) => self.transition(ExportState::Cancelled),
            Ok(state) => {
                tracing::info!(file = %self.filename, state = %state, "Job had already finished");
            }
            Err(e) => self.fail(format!("could not cancel job for {}: {e}", self.filename)),
        }
    }

    /// Flattened view for the status report
    pub fn status(&self) -> ExportStatusRecord {
        ExportStatusRecord {
            origin_filename: self.origin.name.clone(),
            origin_parent: self.origin.parent.id.to_string(),
            origin_parent_type: self.origin.parent.kind.to_string(),
            export_filename: self.filename.clone(),
            export_file_id: self.dest.as_ref().map(|d| d.id.to_string()),
            export_parent: self.dest_parent.id.to_string(),
            state: self.state,
            errors: self.errors.join("\t"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::codec::DeidCodec;
    use crate::adapters::datastore::{Datastore, InMemoryDatastore};
    use crate::domain::{ContainerKind, DatastoreError, DeidError};
    use crate::profile::Profile;
    use async_trait::async_trait;
    use serde_json::{json, Map};
    use std::path::Path;
    use std::sync::Arc;

    #[derive(Clone, Copy)]
    enum Output {
        Copy,
        Fail,
        Nothing,
    }

    struct StubCodec(Output);

    #[async_trait]
    impl DeidCodec for StubCodec {
        async fn deidentify(&self, request: &DeidRequest<'_>) -> crate::domain::Result<PathBuf> {
            let output = request.output_dir.join(request.destination_name());
            match self.0 {
                Output::Copy => {
                    tokio::fs::copy(request.input, &output).await?;
                    Ok(output)
                }
                Output::Fail => Err(DeidError::CodecFailure("codec crashed".to_string())),
                Output::Nothing => Ok(output),
            }
        }
    }

    struct Setup {
        store: Arc<InMemoryDatastore>,
        origin: FileEntry,
        dest: ContainerRef,
        profile: Profile,
    }

    fn setup() -> Setup {
        let store = Arc::new(InMemoryDatastore::new());
        let origin_project = store.add_project("lab", "origin");
        let dest_project = store.add_project("lab", "dest");
        let acquisition =
            store.insert_container(&origin_project, ContainerKind::Acquisition, "T1", Map::new());
        let dest = store.insert_container(&dest_project, ContainerKind::Acquisition, "T1", Map::new());
        let fields = json!({
            "type": "dicom",
            "modality": "MR",
            "info": {"SeriesDescription": "T1w"}
        });
        let origin = store.insert_file(
            &acquisition,
            "a.dcm",
            fields.as_object().cloned().unwrap(),
            b"pixels".to_vec(),
        );
        let profile = Profile::from_value(json!({
            "dicom": {"fields": [{"name": "PatientID", "remove": true}]},
            "export": {"file": {"whitelist": ["modality", "info"]}}
        }))
        .unwrap();
        Setup {
            store,
            origin,
            dest: dest.to_ref(),
            profile,
        }
    }

    fn context(setup: &Setup, output: Output) -> ExportContext {
        ExportContext::new(setup.store.clone(), Arc::new(StubCodec(output)))
    }

    async fn run(unit: &mut FileExportUnit, ctx: &ExportContext, profile: &Profile) {
        let export = profile.export_spec();
        unit.deidentify(ctx, ProfileRef::new(profile, Path::new("profile.yml")), &export)
            .await;
        unit.upload(ctx).await;
        unit.reconcile(ctx).await;
    }

    #[tokio::test]
    async fn test_unit_exports_and_purges_scratch() {
        let setup = setup();
        let ctx = context(&setup, Output::Copy);
        let mut unit = FileExportUnit::new(setup.origin.clone(), setup.dest.clone());

        run(&mut unit, &ctx, &setup.profile).await;

        assert_eq!(unit.state(), ExportState::Exported);
        assert!(unit.errors().is_empty());
        assert!(unit.deid_path.is_none());
        assert!(unit.scratch.is_none());
        let dest = unit.dest().unwrap();
        assert_eq!(stamp_of(dest), unit.local_stamp());
        assert_eq!(dest.fields["modality"], json!("MR"));
    }

    #[tokio::test]
    async fn test_missing_origin_file() {
        let setup = setup();
        let ctx = context(&setup, Output::Copy);
        let mut origin = setup.origin.clone();
        origin.name = "gone.dcm".to_string();
        let mut unit = FileExportUnit::new(origin, setup.dest.clone());

        run(&mut unit, &ctx, &setup.profile).await;

        assert_eq!(unit.state(), ExportState::Error);
        assert_eq!(unit.errors().len(), 1);
        assert!(unit.errors()[0].contains("gone.dcm does not exist"));
        assert_eq!(setup.store.uploads(), 0);
    }

    #[tokio::test]
    async fn test_codec_error() {
        let setup = setup();
        let ctx = context(&setup, Output::Fail);
        let mut unit = FileExportUnit::new(setup.origin.clone(), setup.dest.clone());

        run(&mut unit, &ctx, &setup.profile).await;

        assert_eq!(unit.state(), ExportState::Error);
        assert!(unit.errors()[0].contains("an error was raised when de-identifying a.dcm"));
        assert!(unit.errors()[0].contains("codec crashed"));
        assert_eq!(unit.filename(), "");
        assert_eq!(setup.store.uploads(), 0);
    }

    #[tokio::test]
    async fn test_codec_without_output() {
        let setup = setup();
        let ctx = context(&setup, Output::Nothing);
        let mut unit = FileExportUnit::new(setup.origin.clone(), setup.dest.clone());

        run(&mut unit, &ctx, &setup.profile).await;

        assert_eq!(unit.state(), ExportState::Error);
        assert_eq!(unit.errors(), ["a.dcm de-identification failed.".to_string()]);
    }

    #[tokio::test]
    async fn test_upload_gives_up_after_retries() {
        let setup = setup();
        let ctx = context(&setup, Output::Copy);
        setup.store.fail_next(
            "upload_file",
            DatastoreError::ServerError {
                status: 503,
                message: "maintenance".to_string(),
            },
            5,
        );
        let mut unit = FileExportUnit::new(setup.origin.clone(), setup.dest.clone());

        run(&mut unit, &ctx, &setup.profile).await;

        assert_eq!(unit.state(), ExportState::Error);
        assert_eq!(unit.errors().len(), 1);
        assert!(unit.errors()[0].contains("could not upload a.dcm"));
        assert!(unit.errors()[0].contains("503"));
        assert_eq!(setup.store.uploads(), 0);
    }

    #[tokio::test]
    async fn test_transient_upload_failure_is_retried() {
        let setup = setup();
        let ctx = context(&setup, Output::Copy);
        setup
            .store
            .fail_next("upload_file", DatastoreError::Timeout("slow".to_string()), 1);
        let mut unit = FileExportUnit::new(setup.origin.clone(), setup.dest.clone());

        run(&mut unit, &ctx, &setup.profile).await;

        assert_eq!(unit.state(), ExportState::Exported);
        assert_eq!(setup.store.uploads(), 1);
    }

    #[tokio::test]
    async fn test_info_failure_still_updates_fields() {
        let setup = setup();
        let ctx = context(&setup, Output::Copy);
        setup.store.fail_next(
            "update_file_info",
            DatastoreError::AuthenticationFailed("denied".to_string()),
            1,
        );
        let mut unit = FileExportUnit::new(setup.origin.clone(), setup.dest.clone());

        run(&mut unit, &ctx, &setup.profile).await;

        assert_eq!(unit.state(), ExportState::Error);
        assert_eq!(unit.errors().len(), 1);
        assert!(unit.errors()[0].contains("could not update info for a.dcm"));

        let stored = setup
            .store
            .get_file(&setup.dest, "a.dcm")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.fields["modality"], json!("MR"));
        assert!(stamp_of(&stored).is_none());
    }

    #[tokio::test]
    async fn test_confirm_rejects_stamp_mismatch() {
        let setup = setup();
        let ctx = context(&setup, Output::Copy);
        let export = setup.profile.export_spec();
        let mut unit = FileExportUnit::new(setup.origin.clone(), setup.dest.clone());
        unit.deidentify(&ctx, ProfileRef::new(&setup.profile, Path::new("profile.yml")), &export)
            .await;
        unit.upload(&ctx).await;
        assert_eq!(unit.state(), ExportState::UploadAttempted);

        // Uploaded but never stamped
        unit.transition(ExportState::MetadataUpdated);
        unit.confirm(&ctx).await;

        assert_eq!(unit.state(), ExportState::Error);
        assert!(unit.errors()[0].contains("provenance stamp on a.dcm does not match"));
    }

    #[tokio::test]
    async fn test_steps_out_of_order_are_ignored() {
        let setup = setup();
        let ctx = context(&setup, Output::Copy);
        let mut unit = FileExportUnit::new(setup.origin.clone(), setup.dest.clone());

        unit.upload(&ctx).await;
        unit.reconcile(&ctx).await;

        assert_eq!(unit.state(), ExportState::Initialized);
        assert!(unit.errors().is_empty());
        assert_eq!(setup.store.uploads(), 0);
    }
}
