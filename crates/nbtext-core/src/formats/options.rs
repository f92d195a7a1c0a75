//! # Format Options
//!
//! A `JupytextFormat` names a text file relative to its notebook
//! (`prefix/suffix.ext`), the format used for that file (`percent`,
//! `light`, ...) and the options that tune the format.

use crate::types::{Metadata, NbTextError, Result};
use serde_json::Value;

/// Options that hold a boolean.
pub const BINARY_FORMAT_OPTIONS: [&str; 5] = [
    "comment_magics",
    "hide_notebook_metadata",
    "root_level_metadata_as_raw_cell",
    "split_at_heading",
    "cell_metadata_json",
];

/// Every format option, in the order they are recorded in the notebook
/// metadata.
pub const VALID_FORMAT_OPTIONS: [&str; 10] = [
    "comment_magics",
    "hide_notebook_metadata",
    "root_level_metadata_as_raw_cell",
    "split_at_heading",
    "cell_metadata_json",
    "notebook_metadata_filter",
    "root_level_metadata_filter",
    "cell_metadata_filter",
    "cell_markers",
    "custom_cell_magics",
];

/// Options recognized in other tools' metadata that have no effect on the
/// formats implemented here. They are accepted and ignored.
const IGNORED_FORMAT_OPTIONS: [&str; 3] = ["rst2md", "use_runtools", "doxygen_equation_markers"];

// =============================================================================
// FORMAT OPTIONS
// =============================================================================

/// The options of a text format. `None` means "not set", so that options
/// can be layered: command line, then notebook metadata, then configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FormatOptions {
    pub comment_magics: Option<bool>,
    pub hide_notebook_metadata: Option<bool>,
    pub root_level_metadata_as_raw_cell: Option<bool>,
    pub split_at_heading: Option<bool>,
    pub cell_metadata_json: Option<bool>,
    pub notebook_metadata_filter: Option<String>,
    pub root_level_metadata_filter: Option<String>,
    pub cell_metadata_filter: Option<String>,
    pub cell_markers: Option<String>,
    pub custom_cell_magics: Option<String>,
}

impl FormatOptions {
    fn bool_slot(&mut self, key: &str) -> Option<&mut Option<bool>> {
        match key {
            "comment_magics" => Some(&mut self.comment_magics),
            "hide_notebook_metadata" => Some(&mut self.hide_notebook_metadata),
            "root_level_metadata_as_raw_cell" => Some(&mut self.root_level_metadata_as_raw_cell),
            "split_at_heading" => Some(&mut self.split_at_heading),
            "cell_metadata_json" => Some(&mut self.cell_metadata_json),
            _ => None,
        }
    }

    fn string_slot(&mut self, key: &str) -> Option<&mut Option<String>> {
        match key {
            "notebook_metadata_filter" => Some(&mut self.notebook_metadata_filter),
            "root_level_metadata_filter" => Some(&mut self.root_level_metadata_filter),
            "cell_metadata_filter" => Some(&mut self.cell_metadata_filter),
            "cell_markers" => Some(&mut self.cell_markers),
            "custom_cell_magics" => Some(&mut self.custom_cell_magics),
            _ => None,
        }
    }

    /// Is `key` a format option?
    #[must_use]
    pub fn is_valid_option(key: &str) -> bool {
        VALID_FORMAT_OPTIONS.contains(&key) || IGNORED_FORMAT_OPTIONS.contains(&key)
    }

    /// Set an option from a JSON value. Boolean options only accept booleans.
    pub fn set(&mut self, key: &str, value: &Value) -> Result<()> {
        if let Some(slot) = self.bool_slot(key) {
            let Some(flag) = value.as_bool() else {
                return Err(NbTextError::InvalidFormat(format!(
                    "Format option '{}' should be a bool, not '{}'",
                    key, value
                )));
            };
            *slot = Some(flag);
            return Ok(());
        }
        if let Some(slot) = self.string_slot(key) {
            *slot = Some(match value {
                Value::String(text) => text.clone(),
                Value::Bool(true) => "all".to_string(),
                Value::Bool(false) => "-all".to_string(),
                other => other.to_string(),
            });
            return Ok(());
        }
        if IGNORED_FORMAT_OPTIONS.contains(&key) {
            return Ok(());
        }
        Err(NbTextError::InvalidFormat(format!(
            "Unknown format option '{}' - should be one of '{}'",
            key,
            VALID_FORMAT_OPTIONS.join("', '")
        )))
    }

    /// Set an option from command line text. Boolean options accept
    /// `true/false`, `yes/no`, `on/off` and `1/0`.
    pub fn set_from_str(&mut self, key: &str, value: &str) -> Result<()> {
        if self.bool_slot(key).is_some() {
            let flag = str2bool(value).ok_or_else(|| {
                NbTextError::InvalidFormat(format!(
                    "Format option '{}' expects a boolean, not '{}'",
                    key, value
                ))
            })?;
            return self.set(key, &Value::Bool(flag));
        }
        self.set(key, &Value::String(value.to_string()))
    }

    /// The value of an option, if set.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        let flag = match key {
            "comment_magics" => self.comment_magics,
            "hide_notebook_metadata" => self.hide_notebook_metadata,
            "root_level_metadata_as_raw_cell" => self.root_level_metadata_as_raw_cell,
            "split_at_heading" => self.split_at_heading,
            "cell_metadata_json" => self.cell_metadata_json,
            _ => None,
        };
        if let Some(flag) = flag {
            return Some(Value::Bool(flag));
        }
        let text = match key {
            "notebook_metadata_filter" => self.notebook_metadata_filter.as_ref(),
            "root_level_metadata_filter" => self.root_level_metadata_filter.as_ref(),
            "cell_metadata_filter" => self.cell_metadata_filter.as_ref(),
            "cell_markers" => self.cell_markers.as_ref(),
            "custom_cell_magics" => self.custom_cell_magics.as_ref(),
            _ => None,
        };
        text.map(|t| Value::String(t.clone()))
    }

    /// Is `key` set?
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Set `key` unless it is already set.
    pub fn set_default(&mut self, key: &str, value: &Value) -> Result<()> {
        if self.contains(key) {
            return Ok(());
        }
        self.set(key, value)
    }

    /// The options that are set, in canonical order.
    #[must_use]
    pub fn entries(&self) -> Vec<(&'static str, Value)> {
        VALID_FORMAT_OPTIONS
            .iter()
            .filter_map(|key| self.get(key).map(|value| (*key, value)))
            .collect()
    }

    /// Fill the options that are not set with those of `defaults`.
    pub fn merge_defaults(&mut self, defaults: &Self) {
        for (key, value) in defaults.entries() {
            if !self.contains(key) {
                // `entries` only lists valid values
                let _ = self.set(key, &value);
            }
        }
    }

    /// Options found in the `jupytext` section of the notebook metadata.
    pub fn from_metadata(jupytext: &Metadata) -> Result<Self> {
        let mut options = Self::default();
        for key in VALID_FORMAT_OPTIONS {
            if let Some(value) = jupytext.get(key) {
                options.set(key, value)?;
            }
        }
        Ok(options)
    }

    /// Is no option set?
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Parse a command line boolean.
#[must_use]
pub fn str2bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "yes" | "true" | "t" | "y" | "1" | "on" => Some(true),
        "no" | "false" | "f" | "n" | "0" | "off" => Some(false),
        _ => None,
    }
}

// =============================================================================
// JUPYTEXT FORMAT
// =============================================================================

/// The long form of a format: where the file is, relative to the notebook,
/// and how it is written.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JupytextFormat {
    /// Extension with its leading dot, e.g. `.py`, or `.auto`.
    pub extension: String,
    pub format_name: Option<String>,
    pub suffix: Option<String>,
    pub prefix: Option<String>,
    /// Version of the format found in the file header.
    pub format_version: Option<String>,
    /// Converter version found in the file header.
    pub jupytext_version: Option<String>,
    pub options: FormatOptions,
}

impl JupytextFormat {
    /// A format for an extension, with no name.
    #[must_use]
    pub fn with_extension(extension: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
            ..Self::default()
        }
    }

    /// Set the format name.
    #[must_use]
    pub fn named(mut self, format_name: impl Into<String>) -> Self {
        self.format_name = Some(format_name.into());
        self
    }

    /// The format name, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.format_name.as_deref()
    }

    /// Build a format from its dictionary representation, as found in
    /// configuration files.
    pub fn from_value(value: &Value) -> Result<Self> {
        let Some(map) = value.as_object() else {
            return Err(NbTextError::InvalidFormat(
                "Jupytext format should be a dictionary".to_string(),
            ));
        };
        let mut fmt = Self::default();
        for (key, value) in map {
            let text = || value.as_str().map(str::to_string);
            match key.as_str() {
                "extension" => fmt.extension = text().unwrap_or_default(),
                "format_name" => fmt.format_name = text(),
                "suffix" => fmt.suffix = text(),
                "prefix" => fmt.prefix = text(),
                "format_version" => fmt.format_version = text(),
                "jupytext_version" => fmt.jupytext_version = text(),
                other => fmt.options.set(other, value)?,
            }
        }
        if !fmt.extension.is_empty() && !fmt.extension.starts_with('.') {
            fmt.extension = format!(".{}", fmt.extension);
        }
        Ok(fmt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn boolean_options_must_be_booleans() {
        let mut options = FormatOptions::default();
        assert!(options.set("comment_magics", &json!(false)).is_ok());
        assert_eq!(options.comment_magics, Some(false));
        assert!(options.set("comment_magics", &json!("false")).is_err());
        assert!(options.set("not_an_option", &json!(true)).is_err());
        assert!(options.set("rst2md", &json!(true)).is_ok());
    }

    #[test]
    fn command_line_booleans() {
        let mut options = FormatOptions::default();
        assert!(options.set_from_str("split_at_heading", "yes").is_ok());
        assert_eq!(options.split_at_heading, Some(true));
        assert!(options.set_from_str("split_at_heading", "maybe").is_err());
        assert!(options.set_from_str("cell_markers", "{{{,}}}").is_ok());
        assert_eq!(options.cell_markers.as_deref(), Some("{{{,}}}"));
    }

    #[test]
    fn entries_follow_canonical_order() {
        let mut options = FormatOptions::default();
        options.cell_markers = Some("region,endregion".into());
        options.comment_magics = Some(true);
        let keys: Vec<&str> = options.entries().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["comment_magics", "cell_markers"]);
    }

    #[test]
    fn merge_keeps_existing_options() {
        let mut options = FormatOptions {
            comment_magics: Some(false),
            ..FormatOptions::default()
        };
        let defaults = FormatOptions {
            comment_magics: Some(true),
            split_at_heading: Some(true),
            ..FormatOptions::default()
        };
        options.merge_defaults(&defaults);
        assert_eq!(options.comment_magics, Some(false));
        assert_eq!(options.split_at_heading, Some(true));
    }

    #[test]
    fn format_from_dictionary() {
        let fmt = JupytextFormat::from_value(&json!({"extension": "py", "format_name": "percent", "comment_magics": false}));
        let fmt = fmt.ok().unwrap_or_default();
        assert_eq!(fmt.extension, ".py");
        assert_eq!(fmt.name(), Some("percent"));
        assert_eq!(fmt.options.comment_magics, Some(false));
    }
}
