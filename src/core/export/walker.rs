//! Hierarchical export of a project, subject or session
//!
//! ```text
//! project  -> project files, then every subject
//! subject  -> subject files, then every session
//! session  -> session files and acquisition files
//! ```
//!
//! Each level returns the number of files that ended in `error`, summed over
//! its own files and its children. Status rows are appended to the report as
//! each batch finishes.
//!
//! A subject or session that fails at container level (lookup, find-or-create)
//! is recorded in the summary, its files get error rows, and the walk moves on
//! to the next sibling. Only a report that cannot be written stops the walk.

use super::context::{ExportContext, ProfileRef};
use super::session::SessionExportOrchestrator;
use super::status::{ExportStatusRecord, ReportWriter};
use super::summary::ExportSummary;
use super::unit::FileExportUnit;
use crate::domain::{Container, ContainerId, ContainerKind, ContainerRef, DeidError, Result};
use crate::profile::{PerSubjectProfileFactory, SubjectProfile};

enum SubjectProfileChoice {
    Base,
    Mapped(SubjectProfile),
    Missing(DeidError),
}

/// Walks an origin container and exports everything below it
pub struct ContainerExportWalker<'a> {
    ctx: &'a ExportContext,
    profile: ProfileRef<'a>,
    subjects: Option<&'a PerSubjectProfileFactory>,
    report: Option<ReportWriter>,
    summary: ExportSummary,
}

impl<'a> ContainerExportWalker<'a> {
    pub fn new(ctx: &'a ExportContext, profile: ProfileRef<'a>) -> Self {
        Self {
            ctx,
            profile,
            subjects: None,
            report: None,
            summary: ExportSummary::new(),
        }
    }

    /// Substitute each subject's mapping row into the profile
    pub fn with_subject_profiles(mut self, factory: &'a PerSubjectProfileFactory) -> Self {
        self.subjects = Some(factory);
        self
    }

    pub fn with_report(mut self, report: ReportWriter) -> Self {
        self.report = Some(report);
        self
    }

    pub fn summary(&self) -> &ExportSummary {
        &self.summary
    }

    pub fn into_summary(self) -> ExportSummary {
        self.summary
    }

    /// Exports the container `origin_id` into `dest_project`
    ///
    /// Returns the number of files that failed.
    ///
    /// # Errors
    ///
    /// Returns [`DeidError::Validation`] when the origin is not a project,
    /// subject or session, and any container-level failure (lookup,
    /// find-or-create) encountered on the way.
    pub async fn export(&mut self, origin_id: &ContainerId, dest_project: &Container) -> Result<usize> {
        let origin = SessionExportOrchestrator::new(self.ctx, self.profile)
            .get_container(origin_id)
            .await?;
        match origin.kind {
            ContainerKind::Project => self.export_project(&origin, dest_project).await,
            ContainerKind::Subject => self.export_subject(&origin, dest_project).await,
            ContainerKind::Session => self.export_session(&origin, dest_project).await,
            other => Err(DeidError::Validation(format!(
                "Cannot export container type {other}. Must be session, subject, or project"
            ))),
        }
    }

    async fn export_project(&mut self, project: &Container, dest_project: &Container) -> Result<usize> {
        let orchestrator = SessionExportOrchestrator::new(self.ctx, self.profile);
        let records = orchestrator.export_container_files(project, dest_project).await?;
        let mut errors = self.record(records)?;

        for subject in orchestrator.children(project, ContainerKind::Subject).await? {
            errors += match self.export_subject(&subject, dest_project).await {
                Ok(subject_errors) => subject_errors,
                Err(err @ DeidError::Io(_)) => return Err(err),
                Err(err) => {
                    self.abandon(&orchestrator, &subject, dest_project, err)
                        .await?
                }
            };
        }

        log_level_complete(project, errors);
        Ok(errors)
    }

    async fn export_subject(&mut self, subject: &Container, dest_project: &Container) -> Result<usize> {
        let errors = match self.profile_for(subject)? {
            SubjectProfileChoice::Base => {
                let profile = self.profile;
                self.export_subject_with(profile, subject, dest_project).await?
            }
            SubjectProfileChoice::Mapped(subject_profile) => {
                let profile = ProfileRef::new(subject_profile.profile(), subject_profile.path());
                self.export_subject_with(profile, subject, dest_project).await?
            }
            SubjectProfileChoice::Missing(err) => {
                let orchestrator = SessionExportOrchestrator::new(self.ctx, self.profile);
                let records = self
                    .failed_subject_records(&orchestrator, subject, dest_project, &err)
                    .await?;
                self.record(records)?
            }
        };

        log_level_complete(subject, errors);
        Ok(errors)
    }

    /// Once the destination subject exists, a failing session or file
    /// listing is recorded and the remaining sessions are still exported
    async fn export_subject_with(
        &mut self,
        profile: ProfileRef<'_>,
        subject: &Container,
        dest_project: &Container,
    ) -> Result<usize> {
        let orchestrator = SessionExportOrchestrator::new(self.ctx, profile);
        let dest_subject = orchestrator.destination_subject(subject, dest_project).await?;

        let mut errors = match orchestrator.export_container_files(subject, &dest_subject).await {
            Ok(records) => self.record(records)?,
            Err(err @ DeidError::Io(_)) => return Err(err),
            Err(err) => {
                self.container_failed(subject, &err);
                0
            }
        };

        let sessions = match orchestrator.children(subject, ContainerKind::Session).await {
            Ok(sessions) => sessions,
            Err(err) => {
                self.container_failed(subject, &err);
                return Ok(errors);
            }
        };
        for session in sessions {
            let session_errors = match orchestrator.export_session(&session, &dest_subject).await {
                Ok(records) => self.record(records)?,
                Err(err @ DeidError::Io(_)) => return Err(err),
                Err(err) => {
                    self.abandon(&orchestrator, &session, &dest_subject, err)
                        .await?
                }
            };
            log_level_complete(&session, session_errors);
            errors += session_errors;
        }
        Ok(errors)
    }

    async fn export_session(&mut self, session: &Container, dest_project: &Container) -> Result<usize> {
        let base = SessionExportOrchestrator::new(self.ctx, self.profile);
        let subject = base.origin_subject(session).await?;

        let records = match self.profile_for(&subject)? {
            SubjectProfileChoice::Base => {
                let dest_subject = base.destination_subject(&subject, dest_project).await?;
                base.export_session(session, &dest_subject).await?
            }
            SubjectProfileChoice::Mapped(subject_profile) => {
                let profile = ProfileRef::new(subject_profile.profile(), subject_profile.path());
                let orchestrator = SessionExportOrchestrator::new(self.ctx, profile);
                let dest_subject = orchestrator.destination_subject(&subject, dest_project).await?;
                orchestrator.export_session(session, &dest_subject).await?
            }
            SubjectProfileChoice::Missing(err) => {
                self.failed_session_records(&base, session, dest_project, &err)
                    .await?
            }
        };

        let errors = self.record(records)?;
        log_level_complete(session, errors);
        Ok(errors)
    }

    fn profile_for(&self, subject: &Container) -> Result<SubjectProfileChoice> {
        let Some(factory) = self.subjects else {
            return Ok(SubjectProfileChoice::Base);
        };
        let key = subject.code().unwrap_or(subject.label.as_str());
        match factory.materialize(key) {
            Ok(profile) => Ok(SubjectProfileChoice::Mapped(profile)),
            Err(err @ DeidError::SubjectNotFound(_)) => {
                tracing::error!(
                    subject_id = %subject.id,
                    subject = %key,
                    "Subject missing from mapping table, its files will not be exported"
                );
                Ok(SubjectProfileChoice::Missing(err))
            }
            Err(err) => Err(err),
        }
    }

    /// Error rows for the files directly on `origin`; nothing is written to
    /// the destination
    async fn failed_records(
        &self,
        orchestrator: &SessionExportOrchestrator<'_>,
        origin: &Container,
        dest: &Container,
        err: &DeidError,
    ) -> Result<Vec<ExportStatusRecord>> {
        let dest_ref: ContainerRef = dest.to_ref();
        Ok(orchestrator
            .units_for(origin, dest)
            .await?
            .into_iter()
            .map(|unit| {
                FileExportUnit::failed(unit.origin().clone(), dest_ref.clone(), err.to_string())
                    .status()
            })
            .collect())
    }

    async fn failed_subject_records(
        &self,
        orchestrator: &SessionExportOrchestrator<'_>,
        subject: &Container,
        dest: &Container,
        err: &DeidError,
    ) -> Result<Vec<ExportStatusRecord>> {
        let mut records = self.failed_records(orchestrator, subject, dest, err).await?;
        for session in orchestrator.children(subject, ContainerKind::Session).await? {
            records.extend(
                self.failed_session_records(orchestrator, &session, dest, err)
                    .await?,
            );
        }
        Ok(records)
    }

    async fn failed_session_records(
        &self,
        orchestrator: &SessionExportOrchestrator<'_>,
        session: &Container,
        dest: &Container,
        err: &DeidError,
    ) -> Result<Vec<ExportStatusRecord>> {
        let mut records = self.failed_records(orchestrator, session, dest, err).await?;
        for acquisition in orchestrator.children(session, ContainerKind::Acquisition).await? {
            records.extend(
                self.failed_records(orchestrator, &acquisition, dest, err)
                    .await?,
            );
        }
        Ok(records)
    }

    /// Records a subject or session that could not be exported, with an
    /// error row for each of its files; returns the number of rows
    async fn abandon(
        &mut self,
        orchestrator: &SessionExportOrchestrator<'_>,
        origin: &Container,
        dest: &Container,
        err: DeidError,
    ) -> Result<usize> {
        self.container_failed(origin, &err);
        let records = match origin.kind {
            ContainerKind::Subject => {
                self.failed_subject_records(orchestrator, origin, dest, &err)
                    .await
            }
            _ => {
                self.failed_session_records(orchestrator, origin, dest, &err)
                    .await
            }
        };
        match records {
            Ok(records) => self.record(records),
            Err(e) => {
                tracing::warn!(
                    container_id = %origin.id,
                    error = %e,
                    "Could not list the files of a failed container"
                );
                Ok(0)
            }
        }
    }

    fn container_failed(&mut self, container: &Container, err: &DeidError) {
        tracing::error!(
            kind = %container.kind,
            container_id = %container.id,
            label = %container.label,
            error = %err,
            "Container export failed, continuing with the next one"
        );
        self.summary.add_error(format!(
            "{} {} ({}): {err}",
            container.kind, container.label, container.id
        ));
    }

    /// Appends rows to the report and the summary; returns their error count
    fn record(&mut self, records: Vec<ExportStatusRecord>) -> Result<usize> {
        if let Some(report) = &self.report {
            report.append(&records)?;
        }
        for record in &records {
            self.summary.record(record);
        }
        Ok(records.iter().filter(|r| r.is_error()).count())
    }
}

fn log_level_complete(container: &Container, errors: usize) {
    tracing::info!(
        kind = %container.kind,
        container_id = %container.id,
        errors,
        "Export for {} {} is complete with {} file export errors",
        container.kind,
        container.id,
        errors
    );
}
