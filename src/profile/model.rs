//! De-identification profile document
//!
//! A profile is a nested, order-preserving document with one sub-profile per
//! file type (`dicom`, `jpg`, ...) and an optional `export` block controlling
//! metadata transfer and destination naming.

use super::export::ExportSpec;
use super::path::FIELDS_KEY;
use crate::domain::{DeidError, FileEntry, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

/// Actions a field rule may carry; exactly one per rule
pub const FIELD_ACTIONS: [&str; 5] = ["replace-with", "remove", "increment-date", "hash", "hashuid"];

/// File name patterns used when a sub-profile has no `file-filter`
const DEFAULT_FILE_FILTERS: &[(&str, &[&str])] = &[
    ("dicom", &["*.dcm", "*.DCM", "*.dicom", "*.dcm.zip", "*.dicom.zip"]),
    ("jpg", &["*.jpg", "*.jpeg", "*.JPG", "*.JPEG"]),
    ("png", &["*.png", "*.PNG"]),
    ("tiff", &["*.tif", "*.tiff", "*.TIF", "*.TIFF"]),
];

const FILE_FILTER_KEY: &str = "file-filter";

/// Parsed de-identification profile
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Profile(Map<String, Value>);

impl Profile {
    /// Wraps a JSON value, which must be a mapping
    ///
    /// # Errors
    ///
    /// Returns [`DeidError::InvalidProfile`] for any non-mapping document.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            _ => Err(DeidError::InvalidProfile(
                "profile root must be a mapping".to_string(),
            )),
        }
    }

    /// Parses a YAML document
    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        let value: Value = serde_yaml::from_str(contents)?;
        Self::from_value(value)
    }

    /// Parses a JSON document
    pub fn from_json_str(contents: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(contents)?;
        Self::from_value(value)
    }

    /// Loads a profile, choosing the format by file extension
    ///
    /// `.json` is parsed as JSON; `.yml` and `.yaml` as YAML.
    ///
    /// # Errors
    ///
    /// Returns [`DeidError::Io`] if the file does not exist or cannot be read,
    /// and [`DeidError::InvalidProfile`] for unsupported extensions.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use deid_export::profile::Profile;
    ///
    /// let profile = Profile::from_file("deid-profile.yaml").unwrap();
    /// profile.validate_field_rules().unwrap();
    /// ```
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DeidError::Io(format!(
                "Profile file not found: {}",
                path.display()
            )));
        }

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        let contents = fs::read_to_string(path)?;

        match extension.as_str() {
            "json" => Self::from_json_str(&contents),
            "yml" | "yaml" => Self::from_yaml_str(&contents),
            other => Err(DeidError::InvalidProfile(format!(
                "unsupported profile extension '{other}' for {}",
                path.display()
            ))),
        }
    }

    /// Serializes the profile as YAML
    pub fn to_yaml_string(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.0)?)
    }

    /// Writes the profile as YAML to `path`
    pub fn write_yaml(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, self.to_yaml_string()?)?;
        Ok(())
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub(crate) fn as_map_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    fn root(&self) -> &Map<String, Value> {
        &self.0
    }

    /// The `export` block
    pub fn export_spec(&self) -> ExportSpec {
        let block = self
            .root()
            .get("export")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        ExportSpec::new(block)
    }

    /// Checks that every field rule has a name and exactly one action
    ///
    /// # Errors
    ///
    /// Returns [`DeidError::InvalidFieldRule`] naming the sub-profile and rule
    /// position of the first offending rule.
    pub fn validate_field_rules(&self) -> Result<()> {
        for (section, body) in self.root() {
            let Some(rules) = body.get(FIELDS_KEY) else {
                continue;
            };
            let rules = rules.as_array().ok_or_else(|| {
                DeidError::InvalidFieldRule(format!("{section}.{FIELDS_KEY} must be a list"))
            })?;

            for (index, rule) in rules.iter().enumerate() {
                let rule = rule.as_object().ok_or_else(|| {
                    DeidError::InvalidFieldRule(format!(
                        "{section}.{FIELDS_KEY}[{index}] must be a mapping"
                    ))
                })?;

                let name = rule.get("name").and_then(Value::as_str).ok_or_else(|| {
                    DeidError::InvalidFieldRule(format!(
                        "{section}.{FIELDS_KEY}[{index}] has no name"
                    ))
                })?;

                let actions: Vec<&str> = FIELD_ACTIONS
                    .iter()
                    .copied()
                    .filter(|a| rule.contains_key(*a))
                    .collect();
                if actions.len() != 1 {
                    return Err(DeidError::InvalidFieldRule(format!(
                        "{section}.{FIELDS_KEY}[{index}] ({name}) must have exactly one action of {}, found {}",
                        FIELD_ACTIONS.join(", "),
                        if actions.is_empty() {
                            "none".to_string()
                        } else {
                            actions.join(", ")
                        }
                    )));
                }
            }
        }
        Ok(())
    }

    /// Whether some file sub-profile applies to `file`
    ///
    /// The `dicom` sub-profile applies to files typed `dicom`. Every
    /// sub-profile also applies to file names matching its `file-filter`
    /// patterns, or the built-in patterns for its type when no filter is set.
    /// An empty `file-filter` matches no names.
    pub fn matches_file(&self, file: &FileEntry) -> bool {
        self.file_sections().any(|(section, body)| {
            if section == "dicom" && file.file_type() == Some("dicom") {
                return true;
            }
            file_filters(section, body)
                .iter()
                .any(|pattern| match glob::Pattern::new(pattern) {
                    Ok(p) => p.matches(&file.name),
                    Err(e) => {
                        tracing::warn!(
                            section = %section,
                            pattern = %pattern,
                            error = %e,
                            "Ignoring invalid file-filter pattern"
                        );
                        false
                    }
                })
        })
    }

    /// Whether `file` should be exported with this profile
    ///
    /// An explicit `export.file_types` list selects by file type; otherwise
    /// selection falls back to [`Profile::matches_file`].
    pub fn selects_file(&self, file: &FileEntry) -> bool {
        match self.export_spec().file_types() {
            Some(types) => file
                .file_type()
                .map(|t| types.iter().any(|allowed| allowed == t))
                .unwrap_or(false),
            None => self.matches_file(file),
        }
    }

    fn file_sections(&self) -> impl Iterator<Item = (&str, &Map<String, Value>)> {
        self.root().iter().filter_map(|(key, value)| {
            let body = value.as_object()?;
            let known = DEFAULT_FILE_FILTERS.iter().any(|(k, _)| k == key);
            (known || body.contains_key(FILE_FILTER_KEY)).then_some((key.as_str(), body))
        })
    }
}

impl From<Profile> for Value {
    fn from(profile: Profile) -> Self {
        profile.into_value()
    }
}

fn file_filters(section: &str, body: &Map<String, Value>) -> Vec<String> {
    match body.get(FILE_FILTER_KEY) {
        Some(Value::Array(patterns)) => patterns
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(pattern)) => vec![pattern.clone()],
        _ => DEFAULT_FILE_FILTERS
            .iter()
            .find(|(k, _)| *k == section)
            .map(|(_, patterns)| patterns.iter().map(|p| p.to_string()).collect())
            .unwrap_or_default(),
    }
}
