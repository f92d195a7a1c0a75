//! # JSON and YAML Helpers
//!
//! Cell options and notebook headers are exchanged with other Jupyter tools,
//! so their text must match what those tools write:
//! - inline JSON uses `", "` and `": "` separators and escapes non-ASCII
//!   characters as `\uXXXX`
//! - YAML headers and `.ipynb` files list object keys in sorted order

use crate::types::{Metadata, NbTextError, Result};
use serde::Serialize;
use serde_json::Value;
use serde_json::ser::{Formatter, PrettyFormatter, Serializer};
use std::io;

// =============================================================================
// INLINE JSON
// =============================================================================

/// Formatter producing single-line JSON with spaced separators.
struct InlineFormatter;

impl Formatter for InlineFormatter {
    fn begin_array_value<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        fragment: &str,
    ) -> io::Result<()> {
        if fragment.is_ascii() {
            return writer.write_all(fragment.as_bytes());
        }
        let mut units = [0u16; 2];
        for c in fragment.chars() {
            if c.is_ascii() {
                writer.write_all(&[c as u8])?;
            } else {
                for unit in c.encode_utf16(&mut units) {
                    write!(writer, "\\u{:04x}", unit)?;
                }
            }
        }
        Ok(())
    }
}

/// Serialize a value on a single line, with spaced separators and ASCII
/// escapes.
#[must_use]
pub fn dumps(value: &Value) -> String {
    let mut buffer = Vec::new();
    let mut serializer = Serializer::with_formatter(&mut buffer, InlineFormatter);
    if value.serialize(&mut serializer).is_err() {
        return value.to_string();
    }
    String::from_utf8(buffer).unwrap_or_else(|_| value.to_string())
}

/// Serialize a value on a single line with keys sorted.
#[must_use]
pub fn dumps_sorted(value: &Value) -> String {
    dumps(&sort_keys(value))
}

// =============================================================================
// SORTED OUTPUT
// =============================================================================

/// A copy of `value` where every object lists its keys in sorted order.
#[must_use]
pub fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let sorted: Metadata = keys
                .into_iter()
                .filter_map(|key| map.get(key).map(|v| (key.clone(), sort_keys(v))))
                .collect();
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

/// Serialize a value with sorted keys and the given indentation, the way
/// notebook files are written.
pub fn to_pretty_sorted(value: &Value, indent: usize) -> Result<String> {
    let indent = " ".repeat(indent);
    let mut buffer = Vec::new();
    let formatter = PrettyFormatter::with_indent(indent.as_bytes());
    let mut serializer = Serializer::with_formatter(&mut buffer, formatter);
    sort_keys(value)
        .serialize(&mut serializer)
        .map_err(|e| NbTextError::SerializationError(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| NbTextError::SerializationError(e.to_string()))
}

// =============================================================================
// YAML
// =============================================================================

/// Serialize metadata as block YAML with sorted keys.
pub fn to_yaml(metadata: &Metadata) -> Result<String> {
    let sorted = sort_keys(&Value::Object(metadata.clone()));
    serde_yaml::to_string(&sorted).map_err(|e| NbTextError::SerializationError(e.to_string()))
}

/// Parse YAML text into a JSON value. An empty document is `null`.
pub fn from_yaml(text: &str) -> Result<Value> {
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_yaml::from_str(text).map_err(|e| NbTextError::InvalidHeader(e.to_string()))
}

// =============================================================================
// UPDATES
// =============================================================================

/// Merge `update` into `target`, recursing into nested objects.
///
/// A `null` value in `update` removes the key from `target`. When
/// `overwrite` is false, existing leaf values are kept.
pub fn recursive_update(target: &mut Metadata, update: &Metadata, overwrite: bool) {
    for (key, value) in update {
        match value {
            Value::Null => {
                target.shift_remove(key);
            }
            Value::Object(nested) => {
                match target.get_mut(key) {
                    Some(Value::Object(existing)) => recursive_update(existing, nested, overwrite),
                    Some(_) if !overwrite => {}
                    _ => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
            _ => {
                if overwrite || !target.contains_key(key) {
                    target.insert(key.clone(), value.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dumps_uses_spaced_separators() {
        let value = json!({"tags": ["a", "b"], "n": 1});
        assert_eq!(dumps(&value), r#"{"tags": ["a", "b"], "n": 1}"#);
    }

    #[test]
    fn dumps_escapes_non_ascii() {
        assert_eq!(dumps(&json!("\u{e9}")), r#""\u00e9""#);
        assert_eq!(dumps(&json!("\u{1f600}")), r#""\ud83d\ude00""#);
    }

    #[test]
    fn sort_keys_is_recursive() {
        let value = json!({"b": {"d": 1, "c": 2}, "a": 0});
        assert_eq!(dumps(&sort_keys(&value)), r#"{"a": 0, "b": {"c": 2, "d": 1}}"#);
    }

    #[test]
    fn yaml_keys_are_sorted() {
        let mut metadata = Metadata::new();
        metadata.insert("kernelspec".into(), json!({"name": "python3", "display_name": "Python 3"}));
        let text = to_yaml(&metadata).unwrap_or_default();
        assert_eq!(
            text,
            "kernelspec:\n  display_name: Python 3\n  name: python3\n"
        );
    }

    #[test]
    fn empty_yaml_is_null() {
        assert_eq!(from_yaml("\n").ok(), Some(Value::Null));
    }

    #[test]
    fn recursive_update_removes_null_keys() {
        let mut target = json!({"a": {"b": 1, "c": 2}, "d": 3});
        let update = json!({"a": {"b": null, "e": 5}, "d": 4});
        if let (Some(t), Some(u)) = (target.as_object_mut(), update.as_object()) {
            recursive_update(t, u, true);
        }
        assert_eq!(target, json!({"a": {"c": 2, "e": 5}, "d": 4}));
    }

    #[test]
    fn recursive_update_without_overwrite_keeps_values() {
        let mut target = json!({"a": 1});
        let update = json!({"a": 2, "b": 3});
        if let (Some(t), Some(u)) = (target.as_object_mut(), update.as_object()) {
            recursive_update(t, u, false);
        }
        assert_eq!(target, json!({"a": 1, "b": 3}));
    }
}
