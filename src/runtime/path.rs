//! Dotted-path access into JSON values
//!
//! `user.address.city` style traversal used by the template engine, transform
//! mappings, condition fields, and the loop node's array path.

use serde_json::{Map, Value};

/// Resolve a dotted path against a value. Any missing intermediate yields
/// `Value::Null`. An empty path returns the value itself.
pub fn resolve_path(value: &Value, path: &str) -> Value {
    if path.is_empty() {
        return value.clone();
    }
    let mut current = value;
    for part in path.split('.') {
        match current {
            Value::Object(map) => match map.get(part) {
                Some(next) => current = next,
                None => return Value::Null,
            },
            _ => return Value::Null,
        }
    }
    current.clone()
}

/// Set a dotted path on an object, creating intermediate objects on demand.
///
/// Intentionally destructive: a non-object intermediate (string, number,
/// array) is replaced with a fresh object so the remaining segments can be
/// created underneath it.
pub fn set_path(target: &mut Map<String, Value>, path: &str, value: Value) {
    let parts: Vec<&str> = path.split('.').collect();
    let mut current = target;
    for (i, part) in parts.iter().enumerate() {
        if i == parts.len() - 1 {
            current.insert((*part).to_string(), value);
            return;
        }
        let entry = current
            .entry((*part).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        current = entry.as_object_mut().expect("intermediate is an object");
    }
}
