//! Container metadata filter
//!
//! Produces the subset of a container's or file's metadata that may be
//! written to the destination, always stamped with its provenance.

use super::dotted;
use super::provenance::{origin_stamp, ORIGIN_ID_KEY};
use super::whitelist::{whitelist_paths, MetadataPolicy};
use crate::domain::MetadataSource;
use crate::profile::ExportSpec;
use serde_json::{Map, Value};

/// Filtered metadata ready to be sent to the destination
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataView(Map<String, Value>);

impl MetadataView {
    /// The provenance stamp
    pub fn origin_id(&self) -> Option<&str> {
        dotted::get(&self.0, ORIGIN_ID_KEY).and_then(Value::as_str)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    /// Splits into the `info` block and the remaining top-level fields
    pub fn split_info(&self) -> (Option<Map<String, Value>>, Map<String, Value>) {
        let mut rest = self.0.clone();
        let info = match rest.remove("info") {
            Some(Value::Object(info)) => Some(info),
            _ => None,
        };
        (info, rest)
    }
}

/// Applies a [`MetadataPolicy`] and a profile's export whitelist
///
/// # Examples
///
/// ```
/// use deid_export::metadata::ContainerMetadataFilter;
/// use deid_export::profile::ExportSpec;
/// use deid_export::domain::{Container, ContainerId, ContainerKind, ContainerParents};
/// use serde_json::{json, Map};
///
/// let session = Container {
///     id: ContainerId::new("ses-1").unwrap(),
///     kind: ContainerKind::Session,
///     label: "baseline".to_string(),
///     parents: ContainerParents::default(),
///     fields: json!({"age": 40, "operator": "Dr X"}).as_object().cloned().unwrap(),
/// };
/// let spec = ExportSpec::new(
///     json!({"session": {"whitelist": ["age"]}}).as_object().cloned().unwrap(),
/// );
///
/// let view = ContainerMetadataFilter::default().filter(&session, &spec);
/// assert_eq!(view.as_map()["age"], json!(40));
/// assert!(view.as_map().get("operator").is_none());
/// assert!(view.origin_id().is_some());
/// ```
#[derive(Debug, Clone, Default)]
pub struct ContainerMetadataFilter {
    policy: MetadataPolicy,
}

impl ContainerMetadataFilter {
    pub fn new(policy: MetadataPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &MetadataPolicy {
        &self.policy
    }

    /// Filters `source` according to `export`
    ///
    /// Blacklisted paths never survive, whether they were whitelisted
    /// themselves or as part of a whitelisted ancestor.
    pub fn filter(&self, source: &dyn MetadataSource, export: &ExportSpec) -> MetadataView {
        let kind = source.kind();
        let blacklist = self.policy.blacklist();

        let mut output = Map::new();
        if let Some(config) = export.kind_config(kind) {
            let requested = whitelist_paths(config);
            let permitted = self.policy.restrict(kind, requested);
            for path in permitted {
                if blacklist.iter().any(|b| *b == path) {
                    continue;
                }
                if let Some(value) = dotted::get(source.fields(), &path) {
                    dotted::set(&mut output, &path, value.clone());
                }
            }
            for path in blacklist {
                dotted::remove(&mut output, path);
            }
        }

        let stamp = origin_stamp(
            source.origin_id().as_str(),
            source.project_id().map(|p| p.as_str()),
        );
        dotted::set(&mut output, ORIGIN_ID_KEY, Value::String(stamp));

        MetadataView(output)
    }

    /// Provenance stamp `source` would carry after export
    pub fn stamp(&self, source: &dyn MetadataSource) -> String {
        origin_stamp(
            source.origin_id().as_str(),
            source.project_id().map(|p| p.as_str()),
        )
    }
}
