//! Container hierarchy model
//!
//! The datastore organizes data as project → subject → session → acquisition,
//! with files attachable at every level. These types are snapshots of remote
//! state; the pipeline never mutates them in place.

use super::ids::ContainerId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Kind of a node in the container hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerKind {
    Project,
    Subject,
    Session,
    Acquisition,
    File,
}

impl ContainerKind {
    /// Lowercase name used by the datastore API and export configuration
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerKind::Project => "project",
            ContainerKind::Subject => "subject",
            ContainerKind::Session => "session",
            ContainerKind::Acquisition => "acquisition",
            ContainerKind::File => "file",
        }
    }

    /// Plural collection name used in REST routes
    pub fn collection(&self) -> &'static str {
        match self {
            ContainerKind::Project => "projects",
            ContainerKind::Subject => "subjects",
            ContainerKind::Session => "sessions",
            ContainerKind::Acquisition => "acquisitions",
            ContainerKind::File => "files",
        }
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContainerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "project" => Ok(ContainerKind::Project),
            "subject" => Ok(ContainerKind::Subject),
            "session" => Ok(ContainerKind::Session),
            "acquisition" => Ok(ContainerKind::Acquisition),
            "file" => Ok(ContainerKind::File),
            other => Err(format!("Unknown container kind: {other}")),
        }
    }
}

/// Typed pointer to a container
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerRef {
    pub id: ContainerId,
    pub kind: ContainerKind,
}

impl ContainerRef {
    pub fn new(id: ContainerId, kind: ContainerKind) -> Self {
        Self { id, kind }
    }
}

impl fmt::Display for ContainerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// Ancestor ids of a container or file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerParents {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<ContainerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<ContainerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<ContainerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acquisition: Option<ContainerId>,
}

impl ContainerParents {
    /// Parents of a child created directly under `parent`
    pub fn below(parent: &Container) -> Self {
        let mut parents = parent.parents.clone();
        match parent.kind {
            ContainerKind::Project => parents.project = Some(parent.id.clone()),
            ContainerKind::Subject => parents.subject = Some(parent.id.clone()),
            ContainerKind::Session => parents.session = Some(parent.id.clone()),
            ContainerKind::Acquisition => parents.acquisition = Some(parent.id.clone()),
            ContainerKind::File => {}
        }
        parents
    }
}

/// Snapshot of a project, subject, session or acquisition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub id: ContainerId,
    pub kind: ContainerKind,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub parents: ContainerParents,
    /// Every other field the datastore returned (`info`, `code`, `timestamp`, ...)
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl Container {
    pub fn to_ref(&self) -> ContainerRef {
        ContainerRef::new(self.id.clone(), self.kind)
    }

    /// Subject code, if the container carries one
    pub fn code(&self) -> Option<&str> {
        self.fields.get("code").and_then(Value::as_str)
    }
}

/// Snapshot of a file attached to a container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub id: ContainerId,
    pub name: String,
    pub parent: ContainerRef,
    #[serde(default)]
    pub parents: ContainerParents,
    /// `type`, `modality`, `classification`, `info` and friends
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl FileEntry {
    /// File type as reported by the datastore (e.g. `dicom`)
    pub fn file_type(&self) -> Option<&str> {
        self.fields.get("type").and_then(Value::as_str)
    }

    /// The `info` block, if any
    pub fn info(&self) -> Option<&Map<String, Value>> {
        self.fields.get("info").and_then(Value::as_object)
    }
}

/// Anything whose metadata can cross the export boundary
///
/// Implemented by [`Container`] and [`FileEntry`] so the metadata filter can
/// treat both uniformly.
pub trait MetadataSource {
    fn origin_id(&self) -> &ContainerId;
    fn kind(&self) -> ContainerKind;
    /// Id of the project owning this record, used to salt provenance stamps
    fn project_id(&self) -> Option<&ContainerId>;
    fn fields(&self) -> &Map<String, Value>;
}

impl MetadataSource for Container {
    fn origin_id(&self) -> &ContainerId {
        &self.id
    }

    fn kind(&self) -> ContainerKind {
        self.kind
    }

    fn project_id(&self) -> Option<&ContainerId> {
        match self.kind {
            ContainerKind::Project => Some(&self.id),
            _ => self.parents.project.as_ref(),
        }
    }

    fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }
}

impl MetadataSource for FileEntry {
    fn origin_id(&self) -> &ContainerId {
        &self.id
    }

    fn kind(&self) -> ContainerKind {
        ContainerKind::File
    }

    fn project_id(&self) -> Option<&ContainerId> {
        match self.parent.kind {
            ContainerKind::Project => Some(&self.parent.id),
            _ => self.parents.project.as_ref(),
        }
    }

    fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }
}
