//! Metadata allow-lists
//!
//! Two lists decide what crosses the export boundary: the profile's
//! per-kind `whitelist` (what the user asks for) and the [`MetadataPolicy`]
//! (what may ever be copied for that kind). A blacklist overrides both.

use crate::domain::ContainerKind;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Which top-level fields may be exported per container kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataPolicy {
    allowed: HashMap<ContainerKind, Vec<String>>,
    blacklist: Vec<String>,
}

impl MetadataPolicy {
    /// Empty policy; nothing but the provenance stamp is exported
    pub fn empty() -> Self {
        Self {
            allowed: HashMap::new(),
            blacklist: Vec::new(),
        }
    }

    pub fn allow<I, S>(mut self, kind: ContainerKind, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed
            .insert(kind, fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn deny<S: Into<String>>(mut self, path: S) -> Self {
        self.blacklist.push(path.into());
        self
    }

    pub fn allowed(&self, kind: ContainerKind) -> &[String] {
        self.allowed.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn blacklist(&self) -> &[String] {
        &self.blacklist
    }

    /// Keeps the paths that equal, or descend from, an allowed field
    pub fn restrict(&self, kind: ContainerKind, paths: Vec<String>) -> Vec<String> {
        let allowed = self.allowed(kind);
        paths
            .into_iter()
            .filter(|path| {
                allowed.iter().any(|field| {
                    path == field
                        || path
                            .strip_prefix(field.as_str())
                            .is_some_and(|rest| rest.starts_with('.'))
                })
            })
            .collect()
    }
}

impl Default for MetadataPolicy {
    fn default() -> Self {
        Self::empty()
            .allow(
                ContainerKind::Subject,
                [
                    "firstname",
                    "lastname",
                    "sex",
                    "cohort",
                    "ethnicity",
                    "race",
                    "species",
                    "strain",
                    "info",
                ],
            )
            .allow(
                ContainerKind::Session,
                ["age", "operator", "timestamp", "timezone", "uid", "weight", "info"],
            )
            .allow(
                ContainerKind::Acquisition,
                ["timestamp", "timezone", "uid", "info"],
            )
            .allow(
                ContainerKind::File,
                ["classification", "info", "modality", "type"],
            )
            .deny("info.header")
    }
}

/// Expands a per-kind export config into dotted paths
///
/// `whitelist` may be a flat list of dotted paths, or a mapping with `info`
/// (implicitly prefixed `info.`) and `metadata` lists. Anything else yields
/// no paths.
pub fn whitelist_paths(kind_config: &Map<String, Value>) -> Vec<String> {
    let strings = |value: Option<&Value>| -> Vec<String> {
        value
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    };

    match kind_config.get("whitelist") {
        Some(Value::Object(split)) => {
            let mut paths: Vec<String> = strings(split.get("info"))
                .into_iter()
                .map(|key| format!("info.{key}"))
                .collect();
            paths.extend(strings(split.get("metadata")));
            paths
        }
        list @ Some(Value::Array(_)) => strings(list),
        _ => Vec::new(),
    }
}
