//! Compact navigation of nested JSON objects.

use serde_json::Value;

/// Descend through nested objects along `path`. Any step that is not an
/// object or lacks the key yields `None`.
pub fn nested<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut current = value;
    for key in path {
        current = current.as_object()?.get(*key)?;
    }
    Some(current)
}

pub fn nested_str<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    nested(value, path).and_then(Value::as_str)
}

pub fn nested_i64(value: &Value, path: &[&str]) -> Option<i64> {
    nested(value, path).and_then(Value::as_i64)
}
