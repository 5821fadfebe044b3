//! Profile substitution
//!
//! Applies dotted-path substitutions (typically one mapping-table row) to a
//! copy of a profile. Substituted strings are coerced to the type of the value
//! they replace so the written profile keeps its original shape.

use super::model::Profile;
use super::path::{self, Location, ProfilePath};
use serde_json::{Map, Number, Value};

/// Returns a copy of `profile` with `substitutions` applied
///
/// Each key is a dotted profile path. For field-rule paths every rule with a
/// matching name is updated, provided it already carries the action. Paths
/// that do not resolve are logged at info level and skipped; the input
/// profile is never mutated.
///
/// # Examples
///
/// ```
/// use deid_export::profile::{template, Profile};
/// use serde_json::{json, Map};
///
/// let profile = Profile::from_value(json!({
///     "dicom": {"fields": [{"name": "PatientID", "replace-with": "X"}]}
/// })).unwrap();
///
/// let mut row = Map::new();
/// row.insert("dicom.fields.PatientID.replace-with".into(), json!("SUBJ-9"));
///
/// let updated = template::apply(&profile, &row);
/// assert_eq!(
///     updated.as_map()["dicom"]["fields"][0]["replace-with"],
///     json!("SUBJ-9")
/// );
/// ```
pub fn apply(profile: &Profile, substitutions: &Map<String, Value>) -> Profile {
    let mut updated = profile.clone();

    for (raw_path, value) in substitutions {
        let path = match ProfilePath::parse(raw_path) {
            Ok(p) => p,
            Err(_) => {
                tracing::info!(path = %raw_path, "Substitution did not match anything in profile");
                continue;
            }
        };

        match path::resolve(updated.as_map_mut(), &path) {
            Ok(Location::Key { map, key }) => match map.get_mut(&key) {
                Some(target) => *target = coerce_like(target, value),
                None => {
                    tracing::info!(path = %raw_path, "Substitution did not match anything in profile")
                }
            },
            Ok(Location::FieldList {
                rules,
                field,
                action,
            }) => {
                let mut matched = 0usize;
                for rule in rules.iter_mut() {
                    if rule.get("name").and_then(Value::as_str) != Some(field.as_str()) {
                        continue;
                    }
                    if let Some(target) = rule.get_mut(action.as_str()) {
                        *target = coerce_like(target, value);
                        matched += 1;
                    }
                }
                if matched == 0 {
                    tracing::info!(path = %raw_path, "Substitution did not match anything in profile");
                }
            }
            Err(_) => {
                tracing::info!(path = %raw_path, "Substitution did not match anything in profile")
            }
        }
    }

    updated
}

/// Coerces `value` to the JSON type of `original`
///
/// Only string inputs are coerced; other values replace the original as-is.
/// A string that cannot be parsed as the original type is kept as a string.
pub fn coerce_like(original: &Value, value: &Value) -> Value {
    let Value::String(raw) = value else {
        return value.clone();
    };

    let coerced = match original {
        Value::Bool(_) => match raw.trim().to_lowercase().as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        Value::Number(n) if n.is_i64() || n.is_u64() => raw
            .trim()
            .parse::<i64>()
            .ok()
            .map(Value::from)
            .or_else(|| parse_float(raw)),
        Value::Number(_) => parse_float(raw),
        _ => return Value::String(raw.clone()),
    };

    coerced.unwrap_or_else(|| {
        tracing::warn!(
            value = %raw,
            expected = json_type_name(original),
            "Could not coerce substitution, keeping it as a string"
        );
        Value::String(raw.clone())
    })
}

fn parse_float(raw: &str) -> Option<Value> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "mapping",
    }
}
