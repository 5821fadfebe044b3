//! Session export orchestration
//!
//! Resolves the destination containers of a session, enumerates the files to
//! export and drives their units to a final state.

use super::context::{ExportContext, ProfileRef, RemoteExecution};
use super::hierarchy;
use super::status::{ExportState, ExportStatusRecord};
use super::unit::FileExportUnit;
use crate::domain::{Container, ContainerId, ContainerKind, DeidError, Result};
use crate::profile::ExportSpec;
use futures::stream::{self, StreamExt};
use std::collections::hash_map::Entry;
use std::collections::HashMap;

/// Exports the files of one session (and, on request, of its subject or
/// project) with one profile
pub struct SessionExportOrchestrator<'a> {
    ctx: &'a ExportContext,
    profile: ProfileRef<'a>,
    export: ExportSpec,
}

impl<'a> SessionExportOrchestrator<'a> {
    pub fn new(ctx: &'a ExportContext, profile: ProfileRef<'a>) -> Self {
        Self {
            ctx,
            export: profile.export_spec(),
            profile,
        }
    }

    pub fn export_spec(&self) -> &ExportSpec {
        &self.export
    }

    pub async fn get_container(&self, id: &ContainerId) -> Result<Container> {
        let ctx = self.ctx;
        Ok(ctx
            .retry
            .run("get_container", || ctx.store.get_container(id))
            .await?)
    }

    pub async fn children(&self, parent: &Container, kind: ContainerKind) -> Result<Vec<Container>> {
        let ctx = self.ctx;
        let parent_ref = parent.to_ref();
        Ok(ctx
            .retry
            .run("children", || ctx.store.children(&parent_ref, kind))
            .await?)
    }

    /// The origin subject owning `session`
    pub async fn origin_subject(&self, session: &Container) -> Result<Container> {
        let id = session.parents.subject.as_ref().ok_or_else(|| {
            DeidError::Validation(format!("session {} has no parent subject", session.id))
        })?;
        self.get_container(id).await
    }

    pub async fn destination_subject(
        &self,
        origin_subject: &Container,
        dest_project: &Container,
    ) -> Result<Container> {
        hierarchy::find_or_create_subject(self.ctx, origin_subject, dest_project, &self.export)
            .await
    }

    /// Exports the files on `origin_session` and on each of its acquisitions
    /// into `dest_subject`
    ///
    /// # Errors
    ///
    /// Only container-level failures are returned; file failures end up in
    /// the returned records.
    pub async fn export_session(
        &self,
        origin_session: &Container,
        dest_subject: &Container,
    ) -> Result<Vec<ExportStatusRecord>> {
        tracing::info!(session_id = %origin_session.id, label = %origin_session.label, "Exporting session");
        let dest_session =
            hierarchy::find_or_create_session(self.ctx, origin_session, dest_subject, &self.export)
                .await?;

        let mut units = self.units_for(origin_session, &dest_session).await?;
        for acquisition in self.children(origin_session, ContainerKind::Acquisition).await? {
            let dest_acquisition = hierarchy::find_or_create_acquisition(
                self.ctx,
                &acquisition,
                &dest_session,
                &self.export,
            )
            .await?;
            units.extend(self.units_for(&acquisition, &dest_acquisition).await?);
        }

        let records = self.execute(units).await;
        if !records.is_empty() && records.iter().all(ExportStatusRecord::is_error) {
            tracing::error!(
                session_id = %origin_session.id,
                profile = %self.profile.path.display(),
                "Failed to export every file of the session, check the profile"
            );
        }
        Ok(records)
    }

    /// Exports the files attached directly to `origin` into `dest`
    pub async fn export_container_files(
        &self,
        origin: &Container,
        dest: &Container,
    ) -> Result<Vec<ExportStatusRecord>> {
        let units = self.units_for(origin, dest).await?;
        Ok(self.execute(units).await)
    }

    /// Units for the files on `origin` selected by the profile
    pub async fn units_for(&self, origin: &Container, dest: &Container) -> Result<Vec<FileExportUnit>> {
        let ctx = self.ctx;
        let origin_ref = origin.to_ref();
        let files = ctx
            .retry
            .run("list_files", || ctx.store.list_files(&origin_ref))
            .await?;

        let total = files.len();
        let units: Vec<FileExportUnit> = files
            .into_iter()
            .filter(|file| self.profile.profile.selects_file(file))
            .map(|file| FileExportUnit::new(file, dest.to_ref()))
            .collect();
        tracing::debug!(
            origin = %origin_ref,
            dest_id = %dest.id,
            files = total,
            selected = units.len(),
            "Initialized file exports"
        );
        Ok(units)
    }

    /// Runs `units` locally or through remote jobs and returns their status
    pub async fn execute(&self, units: Vec<FileExportUnit>) -> Vec<ExportStatusRecord> {
        if units.is_empty() {
            return Vec::new();
        }
        let units = match &self.ctx.remote {
            Some(remote) => self.run_remote(units, remote).await,
            None => self.run_batch(units).await,
        };
        units.iter().map(FileExportUnit::status).collect()
    }

    /// Local three-phase batch
    ///
    /// 1. de-identify on the worker pool, preserving enumeration order
    /// 2. claim destination names in enumeration order; later claimants of a
    ///    taken name fail with a collision
    /// 3. upload and reconcile on the worker pool
    pub async fn run_batch(&self, units: Vec<FileExportUnit>) -> Vec<FileExportUnit> {
        let ctx = self.ctx;
        let profile = self.profile;
        let export = &self.export;
        let workers = ctx.max_workers.max(1);

        let mut processed: Vec<FileExportUnit> = stream::iter(units.into_iter().map(move |mut unit| async move {
            unit.deidentify(ctx, profile, export).await;
            unit
        }))
        .buffered(workers)
        .collect()
        .await;

        let mut claims: HashMap<_, String> = HashMap::new();
        for unit in processed.iter_mut() {
            let Some(key) = unit.destination_key() else {
                continue;
            };
            match claims.entry(key) {
                Entry::Occupied(claimed) => unit.collide(claimed.get()),
                Entry::Vacant(slot) => {
                    slot.insert(unit.origin().name.clone());
                }
            }
        }

        stream::iter(processed.into_iter().map(move |mut unit| async move {
            if unit.state() == ExportState::Processed {
                unit.upload(ctx).await;
            }
            if matches!(
                unit.state(),
                ExportState::UploadAttempted | ExportState::ExistsAtDestination
            ) {
                unit.reconcile(ctx).await;
            }
            unit
        }))
        .buffered(workers)
        .collect()
        .await
    }

    /// Submits one job per unit and polls until none is pending
    ///
    /// Units whose file is already at the destination skip the job and are
    /// reconciled directly.
    pub async fn run_remote(
        &self,
        mut units: Vec<FileExportUnit>,
        remote: &RemoteExecution,
    ) -> Vec<FileExportUnit> {
        let ctx = self.ctx;
        let runner = remote.runner.as_ref();
        for unit in units.iter_mut() {
            unit.submit_job(ctx, runner, &remote.job, &self.export).await;
        }

        let mut claims: HashMap<_, String> = HashMap::new();
        for unit in units.iter_mut().filter(|u| {
            matches!(
                u.state(),
                ExportState::Pending | ExportState::ExistsAtDestination
            )
        }) {
            let key = (unit.dest_parent().clone(), unit.filename().to_string());
            if let Some(claimed) = claims.get(&key) {
                let claimed = claimed.clone();
                unit.cancel_job(ctx, runner).await;
                unit.collide(&claimed);
            } else {
                claims.insert(key, unit.origin().name.clone());
            }
        }

        for unit in units
            .iter_mut()
            .filter(|u| u.state() == ExportState::ExistsAtDestination)
        {
            unit.reconcile(ctx).await;
        }

        while units.iter().any(|u| u.state() == ExportState::Pending) {
            tokio::time::sleep(remote.poll_interval).await;
            let now = chrono::Utc::now();
            for unit in units.iter_mut() {
                unit.refresh_job(ctx, runner, now, remote.hanging_after).await;
            }
        }

        let hanging = units
            .iter()
            .filter(|u| u.state() == ExportState::Hanging)
            .count();
        if hanging > 0 {
            tracing::warn!(hanging, "Some de-identification jobs stopped reporting progress");
        }
        units
    }
}
