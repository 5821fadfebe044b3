//! Collaborators shared by every unit of an export run

use super::unit::RemoteJobSpec;
use crate::adapters::codec::{DeidCodec, DestinationPolicy, PreserveFileName};
use crate::adapters::datastore::Datastore;
use crate::adapters::jobs::JobRunner;
use crate::config::{DeidConfig, JobsConfig};
use crate::core::retry::RetryPolicy;
use crate::domain::Result;
use crate::metadata::ContainerMetadataFilter;
use crate::profile::{ExportSpec, Profile};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// A profile together with its on-disk YAML/JSON form
#[derive(Debug, Clone, Copy)]
pub struct ProfileRef<'a> {
    pub profile: &'a Profile,
    pub path: &'a Path,
}

impl<'a> ProfileRef<'a> {
    pub fn new(profile: &'a Profile, path: &'a Path) -> Self {
        Self { profile, path }
    }

    pub fn export_spec(&self) -> ExportSpec {
        self.profile.export_spec()
    }
}

/// Hands files to remote de-identification jobs instead of the local codec
#[derive(Clone)]
pub struct RemoteExecution {
    pub runner: Arc<dyn JobRunner>,
    pub job: RemoteJobSpec,
    pub poll_interval: Duration,
    /// Running jobs silent for longer than this are reported as hanging
    pub hanging_after: chrono::Duration,
}

impl RemoteExecution {
    pub fn new(runner: Arc<dyn JobRunner>, job: RemoteJobSpec, config: &JobsConfig) -> Self {
        Self {
            runner,
            job,
            poll_interval: Duration::from_secs(config.poll_interval_seconds),
            hanging_after: chrono::Duration::seconds(
                i64::try_from(config.hanging_after_seconds).unwrap_or(i64::MAX),
            ),
        }
    }
}

/// Shared, read-only state of an export run
pub struct ExportContext {
    pub store: Arc<dyn Datastore>,
    pub codec: Arc<dyn DeidCodec>,
    pub destination: Arc<dyn DestinationPolicy>,
    pub filter: ContainerMetadataFilter,
    pub retry: RetryPolicy,
    /// Replace destination files whose provenance differs
    pub overwrite: bool,
    pub max_workers: usize,
    pub scratch_root: Option<PathBuf>,
    /// When set, files are de-identified by remote jobs
    pub remote: Option<RemoteExecution>,
}

impl ExportContext {
    /// Context with default policies: names preserved, default metadata
    /// allow-lists, three immediate attempts per remote call, one worker
    pub fn new(store: Arc<dyn Datastore>, codec: Arc<dyn DeidCodec>) -> Self {
        Self {
            store,
            codec,
            destination: Arc::new(PreserveFileName),
            filter: ContainerMetadataFilter::default(),
            retry: RetryPolicy::default(),
            overwrite: false,
            max_workers: 1,
            scratch_root: None,
            remote: None,
        }
    }

    /// Context configured from `deid-export.toml`
    pub fn from_config(
        store: Arc<dyn Datastore>,
        codec: Arc<dyn DeidCodec>,
        config: &DeidConfig,
    ) -> Self {
        let mut context = Self::new(store, codec)
            .with_retry(RetryPolicy::from_config(&config.datastore.retry))
            .with_overwrite(config.export.overwrite)
            .with_max_workers(config.export.effective_workers());
        context.scratch_root = config.export.scratch_dir.as_ref().map(PathBuf::from);
        context
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_filter(mut self, filter: ContainerMetadataFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_destination(mut self, destination: Arc<dyn DestinationPolicy>) -> Self {
        self.destination = destination;
        self
    }

    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }

    pub fn with_remote(mut self, remote: RemoteExecution) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Fresh scratch directory, removed when the handle drops
    pub fn scratch_dir(&self, prefix: &str) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(prefix);
        let dir = match &self.scratch_root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };
        Ok(dir)
    }
}
