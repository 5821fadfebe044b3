//! The `export` block of a profile
//!
//! ```yaml
//! export:
//!   file_types: [dicom]
//!   subject:
//!     code: SUBJ-001
//!     whitelist:
//!       info: [cohort_tag]
//!       metadata: [sex]
//!   session:
//!     whitelist: [age, info.study]
//! ```

use crate::domain::ContainerKind;
use serde_json::{Map, Value};

/// View over a profile's `export` block
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportSpec {
    block: Map<String, Value>,
}

impl ExportSpec {
    pub fn new(block: Map<String, Value>) -> Self {
        Self { block }
    }

    /// Per-kind configuration (`export.subject`, `export.file`, ...)
    ///
    /// Returns `None` when absent or not a mapping.
    pub fn kind_config(&self, kind: ContainerKind) -> Option<&Map<String, Value>> {
        self.block.get(kind.as_str()).and_then(Value::as_object)
    }

    /// Explicit `export.file_types`, if configured
    pub fn file_types(&self) -> Option<Vec<String>> {
        let types = self.block.get("file_types")?.as_array()?;
        Some(
            types
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
        )
    }

    /// Destination subject code override (`export.subject.code`)
    pub fn subject_code(&self) -> Option<String> {
        self.scalar(ContainerKind::Subject, "code")
    }

    /// Destination subject label override (`export.subject.label`)
    pub fn subject_label(&self) -> Option<String> {
        self.scalar(ContainerKind::Subject, "label")
    }

    /// Destination session label override (`export.session.label`)
    pub fn session_label(&self) -> Option<String> {
        self.scalar(ContainerKind::Session, "label")
    }

    fn scalar(&self, kind: ContainerKind, key: &str) -> Option<String> {
        match self.kind_config(kind)?.get(key)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(value: Value) -> ExportSpec {
        ExportSpec::new(value.as_object().cloned().unwrap())
    }

    #[test]
    fn test_subject_overrides() {
        let spec = spec(json!({"subject": {"code": 1001, "label": "Anon"}}));
        assert_eq!(spec.subject_code(), Some("1001".to_string()));
        assert_eq!(spec.subject_label(), Some("Anon".to_string()));
        assert_eq!(spec.session_label(), None);
    }

    #[test]
    fn test_empty_override_ignored() {
        let spec = spec(json!({"subject": {"code": ""}}));
        assert_eq!(spec.subject_code(), None);
    }

    #[test]
    fn test_file_types() {
        assert_eq!(spec(json!({})).file_types(), None);
        assert_eq!(
            spec(json!({"file_types": ["dicom", "nifti"]})).file_types(),
            Some(vec!["dicom".to_string(), "nifti".to_string()])
        );
    }

    #[test]
    fn test_kind_config_requires_mapping() {
        let spec = spec(json!({"session": ["age"], "file": {"whitelist": ["modality"]}}));
        assert!(spec.kind_config(ContainerKind::Session).is_none());
        assert!(spec.kind_config(ContainerKind::File).is_some());
    }
}
