//! # Cell Metadata Options
//!
//! Cell metadata is written on the cell marker line, either as
//! `key=value` pairs (`tags=["parameters"] active="py"`) or as a JSON object.
//! Values are JSON; Python literals (`True`, `None`, `'single quotes'`) are
//! accepted when reading.

use crate::json::dumps;
use crate::languages::is_jupyter_language_ignore_case;
use crate::primitives::JUPYTEXT_CELL_METADATA;
use crate::types::Metadata;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static IS_IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z_.]+[a-zA-Z0-9_.]*$").expect("valid identifier regex"));

static IS_VALID_METADATA_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_.-]+$").expect("valid metadata key regex"));

/// Key under which unparseable cell options are kept verbatim.
pub const INCORRECTLY_ENCODED_METADATA: &str = "incorrectly_encoded_metadata";

// =============================================================================
// ACTIVE CELLS
// =============================================================================

/// Is the cell active in a file with extension `ext`?
///
/// Frozen cells are only active in `.ipynb` files. An `active-py-R` tag or an
/// `active="py,R"` option restricts the cell to the listed extensions.
#[must_use]
pub fn is_active(ext: &str, metadata: &Metadata, default: bool) -> bool {
    let frozen = metadata
        .get("run_control")
        .and_then(|r| r.get("frozen"))
        .and_then(Value::as_bool);
    if frozen == Some(true) {
        return ext == ".ipynb";
    }
    let ext = ext.replace('.', "");
    let tags = metadata.get("tags").and_then(Value::as_array);
    for tag in tags.into_iter().flatten().filter_map(Value::as_str) {
        if tag.starts_with("active-") {
            return tag.split('-').any(|part| part == ext);
        }
    }
    match metadata.get("active") {
        None => default,
        Some(Value::String(active)) => active.split(['.', ',']).any(|part| part == ext),
        Some(_) => false,
    }
}

// =============================================================================
// PARSING
// =============================================================================

/// Can `text` be a bare option name?
#[must_use]
pub fn is_identifier(text: &str) -> bool {
    IS_IDENTIFIER.is_match(text)
}

/// Can `text` be the key of a `key=value` option?
#[must_use]
pub fn is_valid_metadata_key(text: &str) -> bool {
    IS_VALID_METADATA_KEY.is_match(text)
}

/// Do the options start with a JSON object rather than `key=value` pairs?
#[must_use]
pub fn is_json_metadata(text: &str) -> bool {
    match (text.find('{'), text.find('=')) {
        (None, _) => false,
        (Some(_), None) => true,
        (Some(curly), Some(equal)) => curly < equal,
    }
}

/// Metadata that keeps the unparseable option text.
#[must_use]
pub fn incorrectly_encoded_metadata(text: &str) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert(
        INCORRECTLY_ENCODED_METADATA.to_string(),
        Value::String(text.to_string()),
    );
    metadata
}

/// Parse a JSON value, or a Python literal that is JSON-like.
#[must_use]
pub fn relax_json_loads(text: &str) -> Option<Value> {
    let text = text.trim();
    if let Ok(value) = serde_json::from_str(text) {
        return Some(value);
    }
    python_literal_to_json(text).and_then(|json| serde_json::from_str(&json).ok())
}

/// Rewrite a Python literal (strings, numbers, lists, tuples, dicts,
/// `True`/`False`/`None`) as JSON text.
fn python_literal_to_json(text: &str) -> Option<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut json = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' => {
                let mut content = String::new();
                i += 1;
                loop {
                    let next = *chars.get(i)?;
                    if next == c {
                        break;
                    }
                    if next == '\\' {
                        let escaped = *chars.get(i + 1)?;
                        if escaped == '\'' {
                            content.push('\'');
                        } else {
                            content.push('\\');
                            content.push(escaped);
                        }
                        i += 2;
                        continue;
                    }
                    if next == '"' {
                        content.push('\\');
                    }
                    content.push(next);
                    i += 1;
                }
                json.push('"');
                json.push_str(&content);
                json.push('"');
            }
            '(' => json.push('['),
            ')' => json.push(']'),
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while chars
                    .get(i + 1)
                    .is_some_and(|n| n.is_ascii_alphanumeric() || *n == '_')
                {
                    i += 1;
                }
                let word: String = chars[start..=i].iter().collect();
                match word.as_str() {
                    "True" => json.push_str("true"),
                    "False" => json.push_str("false"),
                    "None" => json.push_str("null"),
                    // exponents in numbers such as 1e-3
                    "e" | "E" if start > 0 && chars[start - 1].is_ascii_digit() => {
                        json.push_str(&word);
                    }
                    _ => return None,
                }
            }
            _ => json.push(c),
        }
        i += 1;
    }
    Some(json)
}

/// Parse options of the form `key1=value1 key2 key3=value3`. A bare key
/// has a `null` value.
#[must_use]
pub fn parse_key_equal_value(text: &str) -> Metadata {
    let text = text.trim();
    if text.is_empty() {
        return Metadata::new();
    }

    let last_word_start = text.rfind(' ').map_or(0, |pos| pos + 1);
    let last_word = &text[last_word_start..];
    if !text.starts_with("--") && is_identifier(last_word) {
        let mut metadata = if last_word_start > 1 {
            parse_key_equal_value(&text[..last_word_start - 1])
        } else {
            Metadata::new()
        };
        metadata.insert(last_word.to_string(), Value::Null);
        return metadata;
    }

    let mut end = text.len();
    loop {
        let Some(equal_sign) = text[..end].rfind('=') else {
            return incorrectly_encoded_metadata(text);
        };
        end = equal_sign;

        let before = text[..equal_sign].trim_end();
        let key_start = before.rfind(' ').map_or(0, |pos| pos + 1);
        let key = text[key_start..equal_sign].trim();
        if !is_valid_metadata_key(key) {
            continue;
        }
        let Some(value) = relax_json_loads(&text[equal_sign + 1..]) else {
            continue;
        };

        let mut metadata = if key_start > 1 {
            parse_key_equal_value(&text[..key_start - 1])
        } else {
            Metadata::new()
        };
        metadata.insert(key.to_string(), value);
        return metadata;
    }
}

/// Parse the text that follows a cell marker into a language (or a title,
/// with `allow_title`) and the cell metadata.
#[must_use]
pub fn text_to_metadata(text: &str, allow_title: bool) -> (String, Metadata) {
    let text = text.trim();
    let first_curly = text.find('{');
    let first_equal = text.find('=');

    let key_value_line = match (first_curly, first_equal) {
        (None, _) => true,
        (Some(curly), Some(equal)) => equal < curly,
        (Some(_), None) => false,
    };

    if !key_value_line {
        let curly = first_curly.unwrap_or(0);
        let metadata = match relax_json_loads(&text[curly..]) {
            Some(Value::Object(map)) => map,
            _ => incorrectly_encoded_metadata(&text[curly..]),
        };
        return (text[..curly].trim().to_string(), metadata);
    }

    if !allow_title {
        if is_jupyter_language_ignore_case(text) {
            return (text.to_string(), Metadata::new());
        }
        let Some((language, options)) = text.split_once(' ') else {
            return (String::new(), parse_key_equal_value(text));
        };
        if is_jupyter_language_ignore_case(language) {
            return (language.to_string(), parse_key_equal_value(options));
        }
        return (String::new(), parse_key_equal_value(text));
    }

    let mut words: Vec<&str> = match first_equal {
        Some(equal) => {
            let mut words: Vec<&str> = text[..equal].split(' ').collect();
            while words.last().is_some_and(|w| w.is_empty()) {
                words.pop();
            }
            // the last word is the key of the first option
            words.pop();
            words
        }
        None => text.split(' ').collect(),
    };
    while words
        .last()
        .is_some_and(|w| w.trim().is_empty() || w.starts_with('.'))
    {
        words.pop();
    }

    let title = words.join(" ");
    let metadata = parse_key_equal_value(&text[title.len()..]);
    (title, metadata)
}

// =============================================================================
// WRITING
// =============================================================================

/// Write the cell options as `language_or_title key=value ...`, or as
/// `language_or_title {json}` with `plain_json`.
///
/// Without a language or title, a `title` entry of the metadata is written
/// first, unless it would be read back as options.
#[must_use]
pub fn metadata_to_text(language_or_title: Option<&str>, metadata: &Metadata, plain_json: bool) -> String {
    let mut metadata: Metadata = metadata
        .iter()
        .filter(|(key, _)| !JUPYTEXT_CELL_METADATA.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    let mut text: Vec<String> = Vec::new();
    match language_or_title {
        Some(prefix) if !prefix.is_empty() => text.push(prefix.to_string()),
        Some(_) => {}
        None => {
            let plain_title = metadata
                .get("title")
                .and_then(Value::as_str)
                .filter(|title| !title.contains('{') && !title.contains('='))
                .map(str::to_string);
            if let Some(title) = plain_title {
                metadata.shift_remove("title");
                text.push(title);
            }
        }
    }

    if plain_json {
        if !metadata.is_empty() {
            text.push(dumps(&Value::Object(metadata)));
        }
    } else {
        for (key, value) in &metadata {
            match value {
                Value::String(raw) if key == INCORRECTLY_ENCODED_METADATA => {
                    text.push(raw.clone());
                }
                Value::Null => text.push(key.clone()),
                _ => text.push(format!("{}={}", key, dumps(value))),
            }
        }
    }
    text.join(" ")
}

/// Turn the percent-specific entries of the metadata (`cell_depth`, `title`,
/// `cell_type`, `region_name`) into the text of a `%%` marker, followed by
/// the remaining options.
pub fn metadata_to_double_percent_options(metadata: &mut Metadata, plain_json: bool) -> String {
    let mut text: Vec<String> = Vec::new();
    if let Some(title) = metadata.shift_remove("title") {
        text.push(value_as_text(&title));
    }
    if let Some(depth) = metadata.shift_remove("cell_depth") {
        let depth = depth.as_u64().unwrap_or(0) as usize;
        text.insert(0, "%".repeat(depth));
    }
    let region_name = metadata.shift_remove("region_name");
    if let Some(cell_type) = metadata.shift_remove("cell_type") {
        let name = region_name.unwrap_or(cell_type);
        text.push(format!("[{}]", value_as_text(&name)));
    }
    metadata_to_text(Some(&text.join(" ")), metadata, plain_json)
}

fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn md(value: Value) -> Metadata {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn active_cells() {
        assert!(is_active(".py", &Metadata::new(), true));
        assert!(!is_active(".py", &Metadata::new(), false));
        assert!(is_active(".py", &md(json!({"active": "py,R"})), true));
        assert!(!is_active(".ipynb", &md(json!({"active": "py"})), true));
        assert!(is_active(".R", &md(json!({"tags": ["active-py-R"]})), true));
        assert!(!is_active(".ipynb", &md(json!({"tags": ["active-py"]})), true));
        let frozen = md(json!({"run_control": {"frozen": true}}));
        assert!(is_active(".ipynb", &frozen, true));
        assert!(!is_active(".py", &frozen, true));
    }

    #[test]
    fn relaxed_json() {
        assert_eq!(relax_json_loads("[1, 2]"), Some(json!([1, 2])));
        assert_eq!(relax_json_loads("True"), Some(json!(true)));
        assert_eq!(relax_json_loads("'single'"), Some(json!("single")));
        assert_eq!(relax_json_loads("{'a': None, 'b': (1, 2)}"), Some(json!({"a": null, "b": [1, 2]})));
        assert_eq!(relax_json_loads("1e-3"), Some(json!(0.001)));
        assert_eq!(relax_json_loads("value"), None);
        assert_eq!(relax_json_loads("'unterminated"), None);
    }

    #[test]
    fn key_equal_value() {
        assert_eq!(
            parse_key_equal_value(r#"key="value" tags=["a", "b"]"#),
            md(json!({"key": "value", "tags": ["a", "b"]}))
        );
        assert_eq!(parse_key_equal_value(".class"), md(json!({".class": null})));
        assert_eq!(
            parse_key_equal_value(r#".class tags=["parameters"]"#),
            md(json!({".class": null, "tags": ["parameters"]}))
        );
        assert_eq!(parse_key_equal_value(""), Metadata::new());
    }

    #[test]
    fn values_with_spaces_and_equal_signs() {
        assert_eq!(
            parse_key_equal_value(r#"magic_args="-w 400 -h 240" language="R""#),
            md(json!({"magic_args": "-w 400 -h 240", "language": "R"}))
        );
        assert_eq!(
            parse_key_equal_value(r#"formula="a=b""#),
            md(json!({"formula": "a=b"}))
        );
    }

    #[test]
    fn unparseable_options_are_kept() {
        assert_eq!(
            parse_key_equal_value("not valid=metadata"),
            md(json!({"incorrectly_encoded_metadata": "not valid=metadata"}))
        );
    }

    #[test]
    fn language_and_options() {
        assert_eq!(text_to_metadata("python", false), ("python".to_string(), Metadata::new()));
        assert_eq!(
            text_to_metadata("R key=1", false),
            ("R".to_string(), md(json!({"key": 1})))
        );
        assert_eq!(
            text_to_metadata(r#"{"key": 1}"#, false),
            (String::new(), md(json!({"key": 1})))
        );
    }

    #[test]
    fn title_and_options() {
        assert_eq!(
            text_to_metadata("Display a data frame", true),
            ("Display a data frame".to_string(), Metadata::new())
        );
        assert_eq!(
            text_to_metadata(r#"Pandas plot {"tags": ["parameters"]}"#, true),
            ("Pandas plot".to_string(), md(json!({"tags": ["parameters"]})))
        );
        assert_eq!(
            text_to_metadata(r#"title .class key="value""#, true),
            ("title".to_string(), md(json!({".class": null, "key": "value"})))
        );
    }

    #[test]
    fn write_key_value_options() {
        let metadata = md(json!({"key": "value", ".class": null, "lines_to_next_cell": 2}));
        assert_eq!(metadata_to_text(Some("R"), &metadata, false), r#"R key="value" .class"#);
        assert_eq!(metadata_to_text(Some(""), &metadata, true), r#"{"key": "value", ".class": null}"#);
    }

    #[test]
    fn write_title_first() {
        let metadata = md(json!({"title": "Plot", "tags": ["x"]}));
        assert_eq!(metadata_to_text(None, &metadata, false), r#"Plot tags=["x"]"#);
    }

    #[test]
    fn double_percent_options() {
        let mut metadata = md(json!({"title": "Section", "cell_depth": 1, "cell_type": "markdown", "key": "value"}));
        assert_eq!(
            metadata_to_double_percent_options(&mut metadata, false),
            r#"% Section [markdown] key="value""#
        );
        let mut metadata = md(json!({"cell_type": "markdown", "region_name": "md"}));
        assert_eq!(metadata_to_double_percent_options(&mut metadata, false), "[md]");
    }

    #[test]
    fn json_metadata_detection() {
        assert!(is_json_metadata(r#"{"a": 1}"#));
        assert!(!is_json_metadata("a=1"));
        assert!(!is_json_metadata(r#"a={"b": 1}"#));
    }
}
