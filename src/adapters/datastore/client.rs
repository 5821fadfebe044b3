//! REST implementation of [`Datastore`]

use super::query::Query;
use super::traits::{Datastore, DatastoreResult};
use crate::adapters::http::ApiClient;
use crate::domain::{
    Container, ContainerId, ContainerKind, ContainerParents, ContainerRef, DatastoreError,
    FileEntry,
};
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::path::Path;

#[derive(Debug, Deserialize)]
struct WireContainer {
    #[serde(rename = "_id")]
    id: String,
    #[serde(default)]
    container_type: Option<ContainerKind>,
    #[serde(default)]
    label: String,
    #[serde(default)]
    parents: ContainerParents,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl WireContainer {
    fn into_container(self, kind: Option<ContainerKind>) -> DatastoreResult<Container> {
        let kind = kind.or(self.container_type).ok_or_else(|| {
            DatastoreError::InvalidResponse(format!("container {} has no type", self.id))
        })?;
        Ok(Container {
            id: wire_id(self.id)?,
            kind,
            label: self.label,
            parents: self.parents,
            fields: self.fields,
        })
    }
}

#[derive(Debug, Deserialize)]
struct WireFile {
    #[serde(alias = "_id")]
    file_id: String,
    name: String,
    #[serde(default)]
    parents: ContainerParents,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl WireFile {
    fn into_entry(self, parent: &ContainerRef) -> DatastoreResult<FileEntry> {
        Ok(FileEntry {
            id: wire_id(self.file_id)?,
            name: self.name,
            parent: parent.clone(),
            parents: self.parents,
            fields: self.fields,
        })
    }
}

#[derive(Debug, Deserialize)]
struct Created {
    #[serde(rename = "_id")]
    id: String,
}

fn wire_id(raw: String) -> DatastoreResult<ContainerId> {
    ContainerId::new(raw).map_err(DatastoreError::InvalidResponse)
}

/// Datastore reached over its REST API
///
/// # Example
///
/// ```no_run
/// use deid_export::adapters::datastore::{ApiDatastore, Datastore};
/// use deid_export::config::load_config;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = load_config("deid-export.toml")?;
/// let store = ApiDatastore::new(&config.datastore, None)?;
/// let project = store.lookup("lab/study").await?;
/// println!("{}", project.id);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ApiDatastore {
    api: ApiClient,
}

impl ApiDatastore {
    /// # Errors
    ///
    /// Returns a configuration error if the HTTP client cannot be built.
    pub fn new(
        config: &crate::config::DatastoreConfig,
        api_key: Option<crate::config::SecretString>,
    ) -> crate::domain::Result<Self> {
        Ok(Self {
            api: ApiClient::new(config, api_key)?,
        })
    }

    pub fn from_client(api: ApiClient) -> Self {
        Self { api }
    }

    fn file_url(&self, parent: &ContainerRef, name: &str, suffix: Option<&str>) -> DatastoreResult<url::Url> {
        let mut segments = vec![parent.kind.collection(), parent.id.as_str(), "files", name];
        if let Some(suffix) = suffix {
            segments.push(suffix);
        }
        self.api.endpoint(&segments)
    }
}

#[async_trait]
impl Datastore for ApiDatastore {
    async fn get_container(&self, id: &ContainerId) -> DatastoreResult<Container> {
        let url = self.api.endpoint(&["containers", id.as_str()])?;
        let wire: WireContainer = self
            .api
            .send_json(self.api.request(Method::GET, url))
            .await?;
        wire.into_container(None)
    }

    async fn lookup(&self, path: &str) -> DatastoreResult<Container> {
        let url = self.api.endpoint(&["lookup"])?;
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        tracing::debug!(path = %path, "Resolving container path");
        let wire: WireContainer = self
            .api
            .send_json(
                self.api
                    .request(Method::POST, url)
                    .json(&json!({ "path": segments })),
            )
            .await?;
        wire.into_container(None)
    }

    async fn children(
        &self,
        parent: &ContainerRef,
        kind: ContainerKind,
    ) -> DatastoreResult<Vec<Container>> {
        let url = self
            .api
            .endpoint(&[parent.kind.collection(), parent.id.as_str(), kind.collection()])?;
        let wire: Vec<WireContainer> = self
            .api
            .send_json(self.api.request(Method::GET, url))
            .await?;
        wire.into_iter()
            .map(|w| w.into_container(Some(kind)))
            .collect()
    }

    async fn find_first(
        &self,
        parent: &ContainerRef,
        kind: ContainerKind,
        query: &Query,
    ) -> DatastoreResult<Option<Container>> {
        let url = self
            .api
            .endpoint(&[parent.kind.collection(), parent.id.as_str(), kind.collection()])?;
        let filter = query.to_string();
        tracing::debug!(parent = %parent, kind = %kind, filter = %filter, "Finding container");
        let wire: Vec<WireContainer> = self
            .api
            .send_json(
                self.api
                    .request(Method::GET, url)
                    .query(&[("filter", filter.as_str()), ("limit", "1")]),
            )
            .await?;
        wire.into_iter()
            .next()
            .map(|w| w.into_container(Some(kind)))
            .transpose()
    }

    async fn add_container(
        &self,
        parent: &ContainerRef,
        kind: ContainerKind,
        body: Map<String, Value>,
    ) -> DatastoreResult<ContainerId> {
        let url = self
            .api
            .endpoint(&[parent.kind.collection(), parent.id.as_str(), kind.collection()])?;
        let created: Created = self
            .api
            .send_json(self.api.request(Method::POST, url).json(&body))
            .await?;
        wire_id(created.id)
    }

    async fn update_container(
        &self,
        target: &ContainerRef,
        fields: Map<String, Value>,
    ) -> DatastoreResult<()> {
        let url = self
            .api
            .endpoint(&[target.kind.collection(), target.id.as_str()])?;
        self.api
            .send(self.api.request(Method::PUT, url).json(&fields))
            .await?;
        Ok(())
    }

    async fn list_files(&self, parent: &ContainerRef) -> DatastoreResult<Vec<FileEntry>> {
        let url = self
            .api
            .endpoint(&[parent.kind.collection(), parent.id.as_str(), "files"])?;
        let wire: Vec<WireFile> = self
            .api
            .send_json(self.api.request(Method::GET, url))
            .await?;
        wire.into_iter().map(|w| w.into_entry(parent)).collect()
    }

    async fn get_file(
        &self,
        parent: &ContainerRef,
        name: &str,
    ) -> DatastoreResult<Option<FileEntry>> {
        let url = self.file_url(parent, name, Some("info"))?;
        match self
            .api
            .send_json::<WireFile>(self.api.request(Method::GET, url))
            .await
        {
            Ok(wire) => wire.into_entry(parent).map(Some),
            Err(DatastoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn download_file(
        &self,
        parent: &ContainerRef,
        name: &str,
        dest: &Path,
    ) -> DatastoreResult<()> {
        let url = self.file_url(parent, name, None)?;
        let response = self.api.send(self.api.request(Method::GET, url)).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(crate::adapters::http::map_transport_error)?;
        tokio::fs::write(dest, &bytes).await.map_err(|e| {
            DatastoreError::ConnectionFailed(format!("Failed to write {}: {e}", dest.display()))
        })
    }

    async fn upload_file(&self, parent: &ContainerRef, source: &Path) -> DatastoreResult<()> {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| DatastoreError::ClientError {
                status: 400,
                message: format!("no file name in {}", source.display()),
            })?;
        let content = tokio::fs::read(source).await.map_err(|e| {
            DatastoreError::ConnectionFailed(format!("Failed to read {}: {e}", source.display()))
        })?;

        let part = reqwest::multipart::Part::bytes(content).file_name(name.clone());
        let form = reqwest::multipart::Form::new().part("file", part);
        let url = self
            .api
            .endpoint(&[parent.kind.collection(), parent.id.as_str(), "files"])?;

        tracing::debug!(parent = %parent, file = %name, "Uploading file");
        self.api
            .send(self.api.request(Method::POST, url).multipart(form))
            .await?;
        Ok(())
    }

    async fn delete_file(&self, parent: &ContainerRef, name: &str) -> DatastoreResult<()> {
        let url = self.file_url(parent, name, None)?;
        self.api.send(self.api.request(Method::DELETE, url)).await?;
        Ok(())
    }

    async fn update_file_info(
        &self,
        parent: &ContainerRef,
        name: &str,
        info: Map<String, Value>,
    ) -> DatastoreResult<()> {
        let url = self.file_url(parent, name, Some("info"))?;
        self.api
            .send(
                self.api
                    .request(Method::POST, url)
                    .json(&json!({ "set": info })),
            )
            .await?;
        Ok(())
    }

    async fn update_file(
        &self,
        parent: &ContainerRef,
        name: &str,
        fields: Map<String, Value>,
    ) -> DatastoreResult<()> {
        let url = self.file_url(parent, name, None)?;
        self.api
            .send(self.api.request(Method::PUT, url).json(&fields))
            .await?;
        Ok(())
    }
}
