//! Dotted-key access into nested JSON mappings

use serde_json::{Map, Value};

/// Value at `path` (`info.export.origin_id`), if every step is a mapping
pub fn get<'a>(map: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let first = parts.next()?;
    let mut current = map.get(first)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Sets `path`, creating intermediate mappings and replacing non-mapping
/// intermediates
pub fn set(map: &mut Map<String, Value>, path: &str, value: Value) {
    let mut parts: Vec<&str> = path.split('.').collect();
    let Some(leaf) = parts.pop() else {
        return;
    };

    let mut current = map;
    for part in parts {
        let entry = current
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        current = match entry {
            Value::Object(inner) => inner,
            _ => return,
        };
    }
    current.insert(leaf.to_string(), value);
}

/// Removes `path`; returns the removed value
pub fn remove(map: &mut Map<String, Value>, path: &str) -> Option<Value> {
    let mut parts: Vec<&str> = path.split('.').collect();
    let leaf = parts.pop()?;

    let mut current = map;
    for part in parts {
        current = current.get_mut(part)?.as_object_mut()?;
    }
    current.remove(leaf)
}

/// Recursively merges `source` into `target`; mappings merge, everything
/// else replaces
pub fn merge(target: &mut Map<String, Value>, source: Map<String, Value>) {
    for (key, value) in source {
        match value {
            Value::Object(incoming) => match target.get_mut(&key) {
                Some(Value::Object(existing)) => merge(existing, incoming),
                _ => {
                    target.insert(key, Value::Object(incoming));
                }
            },
            value => {
                target.insert(key, value);
            }
        }
    }
}
