//! Dotted profile paths
//!
//! A mapping column such as `dicom.fields.PatientID.replace-with` addresses a
//! value inside a nested profile. Plain segments walk mappings; a `fields`
//! segment switches to the rule list, where the remainder names a field rule
//! and one of its actions. Field names may themselves contain dots, so the
//! remainder is split at its last dot.

use crate::domain::{DeidError, Result};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Key holding the ordered list of field rules inside a sub-profile
pub const FIELDS_KEY: &str = "fields";

/// One step of a [`ProfilePath`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Mapping key
    Key(String),
    /// `fields.<field>.<action>`; always the last segment
    FieldAction { field: String, action: String },
}

/// Parsed dotted path into a profile
///
/// # Examples
///
/// ```
/// use deid_export::profile::path::{ProfilePath, Segment};
///
/// let path: ProfilePath = "dicom.fields.PatientID.replace-with".parse().unwrap();
/// assert_eq!(
///     path.segments(),
///     &[
///         Segment::Key("dicom".to_string()),
///         Segment::FieldAction {
///             field: "PatientID".to_string(),
///             action: "replace-with".to_string(),
///         },
///     ]
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfilePath {
    raw: String,
    segments: Vec<Segment>,
}

impl ProfilePath {
    /// Parses a dotted path
    ///
    /// # Errors
    ///
    /// Returns [`DeidError::PathNotFound`] for empty segments, or when a
    /// `fields` segment is not followed by both a field name and an action.
    pub fn parse(raw: &str) -> Result<Self> {
        let parts: Vec<&str> = raw.split('.').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(DeidError::PathNotFound(raw.to_string()));
        }

        let mut segments = Vec::with_capacity(parts.len());
        for (i, part) in parts.iter().enumerate() {
            if *part == FIELDS_KEY && i + 1 < parts.len() {
                let remainder = parts[i + 1..].join(".");
                let (field, action) = remainder
                    .rsplit_once('.')
                    .ok_or_else(|| DeidError::PathNotFound(raw.to_string()))?;
                segments.push(Segment::FieldAction {
                    field: field.to_string(),
                    action: action.to_string(),
                });
                break;
            }
            segments.push(Segment::Key((*part).to_string()));
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    fn not_found(&self) -> DeidError {
        DeidError::PathNotFound(self.raw.clone())
    }
}

impl fmt::Display for ProfilePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for ProfilePath {
    type Err = DeidError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Mutable location a path resolved to
///
/// The leaf itself is not checked: callers decide what a missing key or an
/// unmatched field rule means for them.
#[derive(Debug)]
pub enum Location<'a> {
    /// A key inside a mapping
    Key {
        map: &'a mut Map<String, Value>,
        key: String,
    },
    /// An action on every rule named `field` in a rule list
    FieldList {
        rules: &'a mut Vec<Value>,
        field: String,
        action: String,
    },
}

/// Resolves `path` to a mutable location inside `profile`
///
/// # Errors
///
/// Returns [`DeidError::PathNotFound`] if any traversed segment is absent or
/// is not a mapping, or if the targeted `fields` value is not a list.
pub fn resolve<'a>(
    profile: &'a mut Map<String, Value>,
    path: &ProfilePath,
) -> Result<Location<'a>> {
    let (last, parents) = path
        .segments
        .split_last()
        .ok_or_else(|| path.not_found())?;

    let mut current = profile;
    for segment in parents {
        let Segment::Key(key) = segment else {
            return Err(path.not_found());
        };
        current = current
            .get_mut(key)
            .and_then(Value::as_object_mut)
            .ok_or_else(|| path.not_found())?;
    }

    match last {
        Segment::Key(key) => Ok(Location::Key {
            map: current,
            key: key.clone(),
        }),
        Segment::FieldAction { field, action } => {
            let rules = current
                .get_mut(FIELDS_KEY)
                .and_then(Value::as_array_mut)
                .ok_or_else(|| path.not_found())?;
            Ok(Location::FieldList {
                rules,
                field: field.clone(),
                action: action.clone(),
            })
        }
    }
}

/// Whether `path` addresses an existing value in `profile`
///
/// For field actions this requires at least one rule with the given name
/// that already carries the action.
pub fn exists(profile: &Map<String, Value>, path: &ProfilePath) -> bool {
    let Some((last, parents)) = path.segments.split_last() else {
        return false;
    };

    let mut current = profile;
    for segment in parents {
        let next = match segment {
            Segment::Key(key) => current.get(key).and_then(Value::as_object),
            Segment::FieldAction { .. } => None,
        };
        match next {
            Some(map) => current = map,
            None => return false,
        }
    }

    match last {
        Segment::Key(key) => current.contains_key(key),
        Segment::FieldAction { field, action } => current
            .get(FIELDS_KEY)
            .and_then(Value::as_array)
            .map(|rules| {
                rules.iter().any(|rule| {
                    rule.get("name").and_then(Value::as_str) == Some(field.as_str())
                        && rule.get(action.as_str()).is_some()
                })
            })
            .unwrap_or(false),
    }
}
