//! Datastore abstraction
//!
//! The exporter only consumes the operations below. Implementations convert
//! transport errors into [`DatastoreError`] before returning.

use super::query::Query;
use crate::domain::{Container, ContainerId, ContainerKind, ContainerRef, DatastoreError, FileEntry};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::Path;

/// Result type for datastore calls
pub type DatastoreResult<T> = std::result::Result<T, DatastoreError>;

/// Remote container/object store
///
/// Every call is independent and may be repeated by a
/// [`crate::core::retry::RetryPolicy`].
#[async_trait]
pub trait Datastore: Send + Sync {
    /// Fetch a container by id
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::NotFound`] if no container has this id.
    async fn get_container(&self, id: &ContainerId) -> DatastoreResult<Container>;

    /// Resolve a `group/project[/subject[/session]]` path
    async fn lookup(&self, path: &str) -> DatastoreResult<Container>;

    /// Direct children of `parent` of the given kind
    async fn children(
        &self,
        parent: &ContainerRef,
        kind: ContainerKind,
    ) -> DatastoreResult<Vec<Container>>;

    /// First child of `parent` matching every term of `query`
    async fn find_first(
        &self,
        parent: &ContainerRef,
        kind: ContainerKind,
        query: &Query,
    ) -> DatastoreResult<Option<Container>>;

    /// Create a subject, session or acquisition under `parent`
    ///
    /// `body` carries `label`/`code` plus the filtered metadata.
    async fn add_container(
        &self,
        parent: &ContainerRef,
        kind: ContainerKind,
        body: Map<String, Value>,
    ) -> DatastoreResult<ContainerId>;

    /// Merge `fields` into an existing container
    async fn update_container(
        &self,
        target: &ContainerRef,
        fields: Map<String, Value>,
    ) -> DatastoreResult<()>;

    async fn list_files(&self, parent: &ContainerRef) -> DatastoreResult<Vec<FileEntry>>;

    /// File named `name` attached to `parent`, if any
    async fn get_file(&self, parent: &ContainerRef, name: &str)
        -> DatastoreResult<Option<FileEntry>>;

    /// Download a file's content to `dest`
    async fn download_file(
        &self,
        parent: &ContainerRef,
        name: &str,
        dest: &Path,
    ) -> DatastoreResult<()>;

    /// Upload `source`; the file name on the destination is the local file name
    async fn upload_file(&self, parent: &ContainerRef, source: &Path) -> DatastoreResult<()>;

    async fn delete_file(&self, parent: &ContainerRef, name: &str) -> DatastoreResult<()>;

    /// Merge `info` into the file's `info` block
    async fn update_file_info(
        &self,
        parent: &ContainerRef,
        name: &str,
        info: Map<String, Value>,
    ) -> DatastoreResult<()>;

    /// Set top-level file fields (`modality`, `classification`, ...)
    async fn update_file(
        &self,
        parent: &ContainerRef,
        name: &str,
        fields: Map<String, Value>,
    ) -> DatastoreResult<()>;
}
