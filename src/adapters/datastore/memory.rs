//! In-process datastore
//!
//! Holds a container hierarchy and file contents in memory. Used for local
//! runs against seeded data and throughout the test suite; it counts every
//! create, upload and delete so idempotence can be asserted.

use super::query::Query;
use super::traits::{Datastore, DatastoreResult};
use crate::domain::{
    Container, ContainerId, ContainerKind, ContainerParents, ContainerRef, DatastoreError,
    FileEntry,
};
use crate::metadata::dotted;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone)]
struct StoredFile {
    entry: FileEntry,
    content: Vec<u8>,
}

#[derive(Debug, Default)]
struct State {
    containers: HashMap<ContainerId, Container>,
    /// Insertion order, so `children` is deterministic
    order: Vec<ContainerId>,
    files: HashMap<ContainerRef, Vec<StoredFile>>,
    failures: HashMap<String, (DatastoreError, usize)>,
    creates: usize,
    uploads: usize,
    deletes: usize,
}

/// [`Datastore`] backed by a mutex-guarded map
///
/// # Examples
///
/// ```
/// use deid_export::adapters::datastore::{Datastore, InMemoryDatastore};
/// use deid_export::domain::ContainerKind;
/// use serde_json::Map;
///
/// # tokio_test_block(async {
/// let store = InMemoryDatastore::new();
/// let project = store.add_project("lab", "origin");
/// store.insert_container(&project, ContainerKind::Subject, "001", Map::new());
///
/// let subjects = store.children(&project.to_ref(), ContainerKind::Subject).await.unwrap();
/// assert_eq!(subjects.len(), 1);
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Runtime::new().unwrap().block_on(f)
/// # }
/// ```
#[derive(Debug, Default)]
pub struct InMemoryDatastore {
    state: Mutex<State>,
}

impl InMemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Seeds a project resolvable as `group/label`
    pub fn add_project(&self, group: &str, label: &str) -> Container {
        let mut fields = Map::new();
        fields.insert("group".to_string(), Value::String(group.to_string()));
        let project = Container {
            id: new_id(),
            kind: ContainerKind::Project,
            label: label.to_string(),
            parents: ContainerParents::default(),
            fields,
        };
        let mut state = self.state();
        state.order.push(project.id.clone());
        state.containers.insert(project.id.clone(), project.clone());
        project
    }

    /// Seeds a container below `parent` without counting it as a create
    pub fn insert_container(
        &self,
        parent: &Container,
        kind: ContainerKind,
        label: &str,
        fields: Map<String, Value>,
    ) -> Container {
        let container = Container {
            id: new_id(),
            kind,
            label: label.to_string(),
            parents: ContainerParents::below(parent),
            fields,
        };
        let mut state = self.state();
        state.order.push(container.id.clone());
        state
            .containers
            .insert(container.id.clone(), container.clone());
        container
    }

    /// Seeds a file on `parent`
    pub fn insert_file(
        &self,
        parent: &Container,
        name: &str,
        fields: Map<String, Value>,
        content: Vec<u8>,
    ) -> FileEntry {
        let entry = FileEntry {
            id: new_id(),
            name: name.to_string(),
            parent: parent.to_ref(),
            parents: parent.parents.clone(),
            fields,
        };
        let mut state = self.state();
        let files = state.files.entry(parent.to_ref()).or_default();
        files.retain(|f| f.entry.name != name);
        files.push(StoredFile {
            entry: entry.clone(),
            content,
        });
        entry
    }

    /// Makes the next `times` calls of `operation` fail with `error`
    ///
    /// `operation` is the trait method name, e.g. `"upload_file"`.
    pub fn fail_next(&self, operation: &str, error: DatastoreError, times: usize) {
        self.state()
            .failures
            .insert(operation.to_string(), (error, times));
    }

    /// Containers created through [`Datastore::add_container`]
    pub fn creates(&self) -> usize {
        self.state().creates
    }

    pub fn uploads(&self) -> usize {
        self.state().uploads
    }

    pub fn deletes(&self) -> usize {
        self.state().deletes
    }

    /// Content of a stored file
    pub fn file_content(&self, parent: &ContainerRef, name: &str) -> Option<Vec<u8>> {
        self.state()
            .files
            .get(parent)
            .and_then(|files| files.iter().find(|f| f.entry.name == name))
            .map(|f| f.content.clone())
    }

    /// Every container of `kind`, in insertion order
    pub fn containers_of_kind(&self, kind: ContainerKind) -> Vec<Container> {
        let state = self.state();
        state
            .order
            .iter()
            .filter_map(|id| state.containers.get(id))
            .filter(|c| c.kind == kind)
            .cloned()
            .collect()
    }

    fn check_failure(&self, operation: &str) -> DatastoreResult<()> {
        let mut state = self.state();
        if let Some((error, remaining)) = state.failures.get_mut(operation) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(error.clone());
            }
        }
        Ok(())
    }
}

fn new_id() -> ContainerId {
    ContainerId::generate()
}

fn parent_id(container: &Container) -> Option<&ContainerId> {
    match container.kind {
        ContainerKind::Project | ContainerKind::File => None,
        ContainerKind::Subject => container.parents.project.as_ref(),
        ContainerKind::Session => container.parents.subject.as_ref(),
        ContainerKind::Acquisition => container.parents.session.as_ref(),
    }
}

fn field_as_string(container: &Container, field: &str) -> Option<String> {
    if field == "label" {
        return Some(container.label.clone());
    }
    match dotted::get(&container.fields, field)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn matches(container: &Container, query: &Query) -> bool {
    query
        .terms()
        .iter()
        .all(|term| field_as_string(container, &term.field).as_deref() == Some(term.value.as_str()))
}

fn not_found(what: impl std::fmt::Display) -> DatastoreError {
    DatastoreError::NotFound(what.to_string())
}

impl State {
    fn children_of(&self, parent: &ContainerRef, kind: ContainerKind) -> Vec<Container> {
        self.order
            .iter()
            .filter_map(|id| self.containers.get(id))
            .filter(|c| c.kind == kind && parent_id(c) == Some(&parent.id))
            .cloned()
            .collect()
    }

    fn file_mut(&mut self, parent: &ContainerRef, name: &str) -> DatastoreResult<&mut StoredFile> {
        self.files
            .get_mut(parent)
            .and_then(|files| files.iter_mut().find(|f| f.entry.name == name))
            .ok_or_else(|| not_found(format!("file {name} on {parent}")))
    }
}

#[async_trait]
impl Datastore for InMemoryDatastore {
    async fn get_container(&self, id: &ContainerId) -> DatastoreResult<Container> {
        self.check_failure("get_container")?;
        self.state()
            .containers
            .get(id)
            .cloned()
            .ok_or_else(|| not_found(format!("container {id}")))
    }

    async fn lookup(&self, path: &str) -> DatastoreResult<Container> {
        self.check_failure("lookup")?;
        let state = self.state();
        let mut segments = path.trim_matches('/').split('/');
        let group = segments.next().unwrap_or_default();
        let project_label = segments
            .next()
            .ok_or_else(|| not_found(format!("path {path}")))?;

        let mut current = state
            .order
            .iter()
            .filter_map(|id| state.containers.get(id))
            .find(|c| {
                c.kind == ContainerKind::Project
                    && c.label == project_label
                    && c.fields.get("group").and_then(Value::as_str) == Some(group)
            })
            .cloned()
            .ok_or_else(|| not_found(format!("path {path}")))?;

        for (segment, kind) in segments.zip([
            ContainerKind::Subject,
            ContainerKind::Session,
            ContainerKind::Acquisition,
        ]) {
            current = state
                .children_of(&current.to_ref(), kind)
                .into_iter()
                .find(|c| c.label == segment || c.code() == Some(segment))
                .ok_or_else(|| not_found(format!("path {path}")))?;
        }
        Ok(current)
    }

    async fn children(
        &self,
        parent: &ContainerRef,
        kind: ContainerKind,
    ) -> DatastoreResult<Vec<Container>> {
        self.check_failure("children")?;
        Ok(self.state().children_of(parent, kind))
    }

    async fn find_first(
        &self,
        parent: &ContainerRef,
        kind: ContainerKind,
        query: &Query,
    ) -> DatastoreResult<Option<Container>> {
        self.check_failure("find_first")?;
        Ok(self
            .state()
            .children_of(parent, kind)
            .into_iter()
            .find(|c| matches(c, query)))
    }

    async fn add_container(
        &self,
        parent: &ContainerRef,
        kind: ContainerKind,
        mut body: Map<String, Value>,
    ) -> DatastoreResult<ContainerId> {
        self.check_failure("add_container")?;
        let mut state = self.state();
        let parent_container = state
            .containers
            .get(&parent.id)
            .cloned()
            .ok_or_else(|| not_found(format!("container {parent}")))?;

        let label = match body.remove("label") {
            Some(Value::String(label)) => label,
            _ => String::new(),
        };
        let container = Container {
            id: new_id(),
            kind,
            label,
            parents: ContainerParents::below(&parent_container),
            fields: body,
        };
        let id = container.id.clone();
        state.order.push(id.clone());
        state.containers.insert(id.clone(), container);
        state.creates += 1;
        Ok(id)
    }

    async fn update_container(
        &self,
        target: &ContainerRef,
        mut fields: Map<String, Value>,
    ) -> DatastoreResult<()> {
        self.check_failure("update_container")?;
        let mut state = self.state();
        let container = state
            .containers
            .get_mut(&target.id)
            .ok_or_else(|| not_found(format!("container {target}")))?;
        if let Some(Value::String(label)) = fields.remove("label") {
            container.label = label;
        }
        dotted::merge(&mut container.fields, fields);
        Ok(())
    }

    async fn list_files(&self, parent: &ContainerRef) -> DatastoreResult<Vec<FileEntry>> {
        self.check_failure("list_files")?;
        Ok(self
            .state()
            .files
            .get(parent)
            .map(|files| files.iter().map(|f| f.entry.clone()).collect())
            .unwrap_or_default())
    }

    async fn get_file(
        &self,
        parent: &ContainerRef,
        name: &str,
    ) -> DatastoreResult<Option<FileEntry>> {
        self.check_failure("get_file")?;
        Ok(self
            .state()
            .files
            .get(parent)
            .and_then(|files| files.iter().find(|f| f.entry.name == name))
            .map(|f| f.entry.clone()))
    }

    async fn download_file(
        &self,
        parent: &ContainerRef,
        name: &str,
        dest: &Path,
    ) -> DatastoreResult<()> {
        self.check_failure("download_file")?;
        let content = self
            .file_content(parent, name)
            .ok_or_else(|| not_found(format!("file {name} on {parent}")))?;
        tokio::fs::write(dest, content)
            .await
            .map_err(|e| DatastoreError::ConnectionFailed(format!("write {}: {e}", dest.display())))
    }

    async fn upload_file(&self, parent: &ContainerRef, source: &Path) -> DatastoreResult<()> {
        self.check_failure("upload_file")?;
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| {
                DatastoreError::ClientError {
                    status: 400,
                    message: format!("no file name in {}", source.display()),
                }
            })?;
        let content = tokio::fs::read(source).await.map_err(|e| {
            DatastoreError::ConnectionFailed(format!("read {}: {e}", source.display()))
        })?;

        let mut state = self.state();
        let parents = state
            .containers
            .get(&parent.id)
            .map(|c| c.parents.clone())
            .ok_or_else(|| not_found(format!("container {parent}")))?;
        let entry = FileEntry {
            id: new_id(),
            name: name.clone(),
            parent: parent.clone(),
            parents,
            fields: Map::new(),
        };
        let files = state.files.entry(parent.clone()).or_default();
        files.retain(|f| f.entry.name != name);
        files.push(StoredFile { entry, content });
        state.uploads += 1;
        Ok(())
    }

    async fn delete_file(&self, parent: &ContainerRef, name: &str) -> DatastoreResult<()> {
        self.check_failure("delete_file")?;
        let mut state = self.state();
        let files = state
            .files
            .get_mut(parent)
            .ok_or_else(|| not_found(format!("file {name} on {parent}")))?;
        let before = files.len();
        files.retain(|f| f.entry.name != name);
        if files.len() == before {
            return Err(not_found(format!("file {name} on {parent}")));
        }
        state.deletes += 1;
        Ok(())
    }

    async fn update_file_info(
        &self,
        parent: &ContainerRef,
        name: &str,
        info: Map<String, Value>,
    ) -> DatastoreResult<()> {
        self.check_failure("update_file_info")?;
        let mut state = self.state();
        let file = state.file_mut(parent, name)?;
        let mut update = Map::new();
        update.insert("info".to_string(), Value::Object(info));
        dotted::merge(&mut file.entry.fields, update);
        Ok(())
    }

    async fn update_file(
        &self,
        parent: &ContainerRef,
        name: &str,
        fields: Map<String, Value>,
    ) -> DatastoreResult<()> {
        self.check_failure("update_file")?;
        let mut state = self.state();
        let file = state.file_mut(parent, name)?;
        dotted::merge(&mut file.entry.fields, fields);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_lookup_by_path() {
        let store = InMemoryDatastore::new();
        let project = store.add_project("lab", "origin");
        let subject = store.insert_container(
            &project,
            ContainerKind::Subject,
            "001",
            fields(json!({"code": "001"})),
        );
        let session =
            store.insert_container(&subject, ContainerKind::Session, "baseline", Map::new());

        assert_eq!(store.lookup("lab/origin").await.unwrap().id, project.id);
        assert_eq!(store.lookup("lab/origin/001/baseline").await.unwrap().id, session.id);
        assert!(store.lookup("lab/missing").await.unwrap_err().to_string().contains("Not found"));
    }

    #[tokio::test]
    async fn test_find_first_matches_nested_fields() {
        let store = InMemoryDatastore::new();
        let project = store.add_project("lab", "dest");
        let subject = store.insert_container(&project, ContainerKind::Subject, "s", Map::new());
        store.insert_container(
            &subject,
            ContainerKind::Session,
            "1",
            fields(json!({"info": {"export": {"origin_id": "abc"}}})),
        );

        let hit = Query::new().eq("label", "1").eq_quoted("info.export.origin_id", "abc");
        let miss = Query::new().eq("label", "1").eq_quoted("info.export.origin_id", "xyz");
        let parent = subject.to_ref();

        assert!(store
            .find_first(&parent, ContainerKind::Session, &hit)
            .await
            .unwrap()
            .is_some());
        assert!(store
            .find_first(&parent, ContainerKind::Session, &miss)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_add_container_counts_creates() {
        let store = InMemoryDatastore::new();
        let project = store.add_project("lab", "dest");
        let id = store
            .add_container(
                &project.to_ref(),
                ContainerKind::Subject,
                fields(json!({"label": "A", "code": "A"})),
            )
            .await
            .unwrap();

        let created = store.get_container(&id).await.unwrap();
        assert_eq!(created.label, "A");
        assert_eq!(created.code(), Some("A"));
        assert_eq!(created.parents.project, Some(project.id));
        assert_eq!(store.creates(), 1);
    }

    #[tokio::test]
    async fn test_upload_update_and_delete_file() {
        let store = InMemoryDatastore::new();
        let project = store.add_project("lab", "dest");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.dcm");
        std::fs::write(&path, b"pixels").unwrap();

        let parent = project.to_ref();
        store.upload_file(&parent, &path).await.unwrap();
        store
            .update_file_info(&parent, "scan.dcm", fields(json!({"export": {"origin_id": "x"}})))
            .await
            .unwrap();
        store
            .update_file(&parent, "scan.dcm", fields(json!({"modality": "MR"})))
            .await
            .unwrap();

        let file = store.get_file(&parent, "scan.dcm").await.unwrap().unwrap();
        assert_eq!(file.fields["modality"], json!("MR"));
        assert_eq!(file.fields["info"]["export"]["origin_id"], json!("x"));
        assert_eq!(store.file_content(&parent, "scan.dcm").unwrap(), b"pixels");

        store.delete_file(&parent, "scan.dcm").await.unwrap();
        assert!(store.get_file(&parent, "scan.dcm").await.unwrap().is_none());
        assert_eq!((store.uploads(), store.deletes()), (1, 1));
    }

    #[tokio::test]
    async fn test_injected_failures_run_out() {
        let store = InMemoryDatastore::new();
        let project = store.add_project("lab", "dest");
        store.fail_next("list_files", DatastoreError::Timeout("slow".to_string()), 1);

        assert!(store.list_files(&project.to_ref()).await.is_err());
        assert!(store.list_files(&project.to_ref()).await.is_ok());
    }
}
