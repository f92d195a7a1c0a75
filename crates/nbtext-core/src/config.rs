//! # Configuration
//!
//! Settings shared by every notebook of a project, read from the first
//! configuration file found in the notebook directory or above it:
//!
//! - `jupytext.toml`, `jupytext`, `jupytext.yml`, `jupytext.yaml`,
//!   `jupytext.json`, or the same names with a leading dot
//! - the `[tool.jupytext]` table of a `pyproject.toml`
//!
//! When no project file is found, the user configuration directories
//! (`XDG_CONFIG_HOME`, `~/.config`, `XDG_CONFIG_DIRS`) are searched. The
//! upward search stops at the directories listed in
//! `NBTEXT_CEILING_DIRECTORIES`.
//!
//! ```toml
//! formats = "ipynb,py:percent"
//! notebook_metadata_filter = "-all"
//! ```

use crate::formats::{
    FormatOptions, JupytextFormat, NOTEBOOK_EXTENSIONS, is_markdown_extension, long_form_multiple_formats,
    long_form_one_format, short_form_multiple_formats,
};
use crate::paired_paths::{base_path, split_extension};
use crate::types::{Metadata, NbTextError, Notebook, Result, section};
use serde::Deserialize;
use serde::de::IgnoredAny;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Configuration file names, by order of precedence.
pub const JUPYTEXT_CONFIG_FILES: [&str; 10] = [
    "jupytext",
    "jupytext.toml",
    "jupytext.yml",
    "jupytext.yaml",
    "jupytext.json",
    ".jupytext",
    ".jupytext.toml",
    ".jupytext.yml",
    ".jupytext.yaml",
    ".jupytext.json",
];

/// Project file with a `[tool.jupytext]` table.
pub const PYPROJECT_FILE: &str = "pyproject.toml";

/// Directories where the upward search for a configuration file stops.
pub const CEILING_DIRECTORIES_VAR: &str = "NBTEXT_CEILING_DIRECTORIES";

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Configuration as found in a file, before validation.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    formats: Option<Value>,
    default_jupytext_formats: Option<String>,
    preferred_jupytext_formats_save: Option<String>,
    preferred_jupytext_formats_read: Option<String>,
    notebook_metadata_filter: Option<String>,
    default_notebook_metadata_filter: Option<String>,
    root_level_metadata_filter: Option<String>,
    cell_metadata_filter: Option<String>,
    default_cell_metadata_filter: Option<String>,
    hide_notebook_metadata: Option<bool>,
    root_level_metadata_as_raw_cell: Option<bool>,
    comment_magics: Option<bool>,
    split_at_heading: Option<bool>,
    cell_markers: Option<String>,
    default_cell_markers: Option<String>,
    custom_cell_magics: Option<String>,
    notebook_extensions: Option<Value>,
    // accepted for compatibility, no effect here
    #[serde(default, rename = "sphinx_convert_rst2md")]
    _sphinx_convert_rst2md: Option<IgnoredAny>,
    #[serde(default, rename = "doxygen_equation_markers")]
    _doxygen_equation_markers: Option<IgnoredAny>,
    #[serde(default, rename = "outdated_text_notebook_margin")]
    _outdated_text_notebook_margin: Option<IgnoredAny>,
    #[serde(default, rename = "cm_config_log_level")]
    _cm_config_log_level: Option<IgnoredAny>,
}

/// Project-wide conversion settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JupytextConfiguration {
    /// Formats every notebook is paired to, e.g. `ipynb,py:percent`.
    pub formats: Option<String>,
    /// Preferred format per extension when writing, e.g. `py:percent`.
    pub preferred_jupytext_formats_save: Option<String>,
    /// Preferred format per extension when reading.
    pub preferred_jupytext_formats_read: Option<String>,
    pub notebook_metadata_filter: Option<String>,
    pub root_level_metadata_filter: Option<String>,
    pub cell_metadata_filter: Option<String>,
    pub hide_notebook_metadata: Option<bool>,
    pub root_level_metadata_as_raw_cell: bool,
    pub comment_magics: Option<bool>,
    pub split_at_heading: bool,
    pub cell_markers: Option<String>,
    pub custom_cell_magics: Option<String>,
    pub notebook_extensions: Vec<String>,
    /// Record the format and converter versions in text headers.
    pub insert_version_number: bool,
}

impl Default for JupytextConfiguration {
    fn default() -> Self {
        Self {
            formats: None,
            preferred_jupytext_formats_save: None,
            preferred_jupytext_formats_read: None,
            notebook_metadata_filter: None,
            root_level_metadata_filter: None,
            cell_metadata_filter: None,
            hide_notebook_metadata: None,
            root_level_metadata_as_raw_cell: true,
            comment_magics: None,
            split_at_heading: false,
            cell_markers: None,
            custom_cell_magics: None,
            notebook_extensions: NOTEBOOK_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            insert_version_number: true,
        }
    }
}

fn deprecated(old: &str, new: &str) {
    warn!("The option '{}' is deprecated. Please use '{}' instead.", old, new);
}

fn non_empty(option: Option<&String>) -> Option<&str> {
    option.map(String::as_str).filter(|s| !s.is_empty())
}

impl JupytextConfiguration {
    /// Validate the options read from a configuration file.
    pub fn from_value(config_file: &str, value: Value) -> Result<Self> {
        let file: ConfigFile = serde_json::from_value(value).map_err(|e| {
            NbTextError::ConfigError(format!(
                "The configuration file {} is incorrect: {}",
                config_file, e
            ))
        })?;

        let mut config = Self::default();

        if let Some(formats) = file.formats {
            config.formats = Some(formats_setting(&formats)?).filter(|f| !f.is_empty());
        } else if let Some(formats) = file.default_jupytext_formats {
            deprecated("default_jupytext_formats", "formats");
            let formats = long_form_multiple_formats(&Value::String(formats), None, true)?;
            config.formats = Some(short_form_multiple_formats(&formats)).filter(|f| !f.is_empty());
        }

        config.preferred_jupytext_formats_save = file.preferred_jupytext_formats_save;
        config.preferred_jupytext_formats_read = file.preferred_jupytext_formats_read;

        config.notebook_metadata_filter = file.notebook_metadata_filter.or_else(|| {
            file.default_notebook_metadata_filter.inspect(|_| {
                deprecated("default_notebook_metadata_filter", "notebook_metadata_filter");
            })
        });
        config.cell_metadata_filter = file.cell_metadata_filter.or_else(|| {
            file.default_cell_metadata_filter.inspect(|_| {
                deprecated("default_cell_metadata_filter", "cell_metadata_filter");
            })
        });
        config.cell_markers = file.cell_markers.or_else(|| {
            file.default_cell_markers
                .inspect(|_| deprecated("default_cell_markers", "cell_markers"))
        });
        config.root_level_metadata_filter = file.root_level_metadata_filter;
        config.hide_notebook_metadata = file.hide_notebook_metadata;
        config.root_level_metadata_as_raw_cell = file.root_level_metadata_as_raw_cell.unwrap_or(true);
        config.comment_magics = file.comment_magics;
        config.split_at_heading = file.split_at_heading.unwrap_or(false);
        config.custom_cell_magics = file.custom_cell_magics;

        match file.notebook_extensions {
            None => {}
            Some(Value::String(extensions)) => {
                config.notebook_extensions = extensions.split(',').map(str::to_string).collect();
            }
            Some(Value::Array(extensions)) => {
                config.notebook_extensions = extensions
                    .iter()
                    .map(|e| e.as_str().map(str::to_string))
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| {
                        NbTextError::ConfigError(format!(
                            "The configuration file {} is incorrect: notebook_extensions should \
                             be a list of strings",
                            config_file
                        ))
                    })?;
            }
            Some(other) => {
                return Err(NbTextError::ConfigError(format!(
                    "The configuration file {} is incorrect: notebook_extensions should be a \
                     list or a string, not {}",
                    config_file, other
                )));
            }
        }

        Ok(config)
    }

    /// Fill the format options that are not set yet. Cell markers only
    /// apply when writing.
    pub fn set_default_format_options(&self, options: &mut FormatOptions, read: bool) {
        if options.notebook_metadata_filter.is_none() {
            options.notebook_metadata_filter = non_empty(self.notebook_metadata_filter.as_ref()).map(str::to_string);
        }
        if options.root_level_metadata_filter.is_none() {
            options.root_level_metadata_filter =
                non_empty(self.root_level_metadata_filter.as_ref()).map(str::to_string);
        }
        if options.cell_metadata_filter.is_none() {
            options.cell_metadata_filter = non_empty(self.cell_metadata_filter.as_ref()).map(str::to_string);
        }
        if options.hide_notebook_metadata.is_none() {
            options.hide_notebook_metadata = self.hide_notebook_metadata;
        }
        if options.root_level_metadata_as_raw_cell.is_none() && !self.root_level_metadata_as_raw_cell {
            options.root_level_metadata_as_raw_cell = Some(false);
        }
        if options.comment_magics.is_none() {
            options.comment_magics = self.comment_magics;
        }
        if options.split_at_heading.is_none() && self.split_at_heading {
            options.split_at_heading = Some(true);
        }
        if !read && options.cell_markers.is_none() {
            options.cell_markers = non_empty(self.cell_markers.as_ref()).map(str::to_string);
        }
        if options.custom_cell_magics.is_none() {
            options.custom_cell_magics = non_empty(self.custom_cell_magics.as_ref()).map(str::to_string);
        }
    }

    /// The configured formats, when one of them matches `path`.
    pub fn default_formats(&self, path: &str) -> Result<Option<String>> {
        let Some(formats) = self.formats.as_deref() else {
            return Ok(None);
        };
        for fmt in long_form_multiple_formats(&Value::String(formats.to_string()), None, true)? {
            match base_path(path, &fmt, None) {
                Ok(_) => return Ok(Some(formats.to_string())),
                Err(NbTextError::InconsistentPath(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }
}

/// `formats` in a configuration file: a string, a list of formats, or a
/// table from prefix to formats.
fn formats_setting(formats: &Value) -> Result<String> {
    let formats = match formats {
        Value::Object(by_prefix) => {
            let mut list = Vec::new();
            for (prefix, fmt) in by_prefix {
                let fmt = fmt.as_str().ok_or_else(|| {
                    NbTextError::ConfigError(format!("The format for prefix '{}' should be a string", prefix))
                })?;
                if prefix.is_empty() {
                    list.push(Value::String(fmt.to_string()));
                } else {
                    let prefix = prefix.strip_suffix('/').unwrap_or(prefix);
                    list.push(Value::String(format!("{prefix}///{fmt}")));
                }
            }
            Value::Array(list)
        }
        other => other.clone(),
    };
    let formats = long_form_multiple_formats(&formats, None, true)?;
    Ok(short_form_multiple_formats(&formats))
}

// =============================================================================
// PREFERRED FORMATS
// =============================================================================

/// Complete a format without a name with the first matching preferred
/// format. `auto` preferences match every script extension.
pub fn preferred_format(incomplete: &JupytextFormat, preferred_formats: Option<&str>) -> Result<JupytextFormat> {
    if incomplete.format_name.is_some() {
        return Ok(incomplete.clone());
    }
    let preferred = preferred_formats.map_or(Value::Null, |f| Value::String(f.to_string()));
    for fmt in long_form_multiple_formats(&preferred, None, true)? {
        let same_extension = incomplete.extension == fmt.extension
            || (fmt.extension == ".auto"
                && !is_markdown_extension(&incomplete.extension)
                && incomplete.extension != ".ipynb");
        let same_suffix = fmt.suffix.is_none() || fmt.suffix == incomplete.suffix;
        let same_prefix = fmt.prefix.is_none() || fmt.prefix == incomplete.prefix;
        if same_extension && same_suffix && same_prefix {
            let mut complete = incomplete.clone();
            complete.format_name = fmt.format_name;
            complete.options.merge_defaults(&fmt.options);
            return Ok(complete);
        }
    }
    Ok(incomplete.clone())
}

/// The formats a notebook is paired to: `jupytext.formats`, then the
/// configured formats when they cover `path`, then (with
/// `fallback_on_current_fmt`) the format of `path` itself.
pub fn notebook_formats(
    notebook: &Notebook,
    config: Option<&JupytextConfiguration>,
    path: &str,
    fallback_on_current_fmt: bool,
) -> Result<Option<Vec<JupytextFormat>>> {
    let metadata = &notebook.metadata;
    let jupytext = section(metadata, "jupytext");
    let text_repr = jupytext.and_then(|j| section(j, "text_representation"));
    let ext = split_extension(path).1;

    let mut formats = Vec::new();
    let declared = jupytext
        .and_then(|j| j.get("formats"))
        .or_else(|| metadata.get("jupytext_formats"))
        .filter(|f| !matches!(f, Value::Null) && f.as_str() != Some(""));
    if let Some(declared) = declared {
        formats = long_form_multiple_formats(declared, Some(metadata), false)?;
    } else if let Some(config) = config {
        let current_ext = text_repr
            .and_then(|t| t.get("extension"))
            .and_then(Value::as_str)
            .unwrap_or(ext.as_str());
        let current_name = text_repr.and_then(|t| t.get("format_name")).and_then(Value::as_str);
        let default_formats = config
            .default_formats(path)?
            .map_or(Value::Null, Value::String);
        let default_formats = long_form_multiple_formats(&default_formats, Some(metadata), false)?;
        let covered = default_formats.iter().any(|fmt| {
            fmt.extension == current_ext
                && match (fmt.name(), current_name) {
                    (Some(a), Some(b)) => a == b,
                    _ => true,
                }
        });
        if covered {
            formats = default_formats;
        }
    }

    if formats.is_empty() {
        if !fallback_on_current_fmt {
            return Ok(None);
        }
        let mut fmt = JupytextFormat::with_extension(ext.clone());
        if text_repr.and_then(|t| t.get("extension")).and_then(Value::as_str) == Some(ext.as_str()) {
            fmt.format_name = text_repr
                .and_then(|t| t.get("format_name"))
                .and_then(Value::as_str)
                .filter(|n| !n.is_empty())
                .map(str::to_string);
        }
        formats = vec![fmt];
    }

    if let Some(config) = config {
        formats = formats
            .iter()
            .map(|f| preferred_format(f, config.preferred_jupytext_formats_save.as_deref()))
            .collect::<Result<Vec<_>>>()?;
    }
    Ok(Some(formats))
}

// =============================================================================
// CONFIGURATION FILES
// =============================================================================

fn has_jupytext_table(pyproject: &Path) -> Result<bool> {
    let text = std::fs::read_to_string(pyproject)
        .map_err(|e| NbTextError::IoError(format!("Cannot read {}: {}", pyproject.display(), e)))?;
    let doc: Value = toml::from_str(&text).map_err(|e| {
        NbTextError::ConfigError(format!("{} is not valid TOML: {}", pyproject.display(), e))
    })?;
    Ok(doc.get("tool").and_then(|t| t.get("jupytext")).is_some())
}

fn ceiling_directories() -> Vec<PathBuf> {
    std::env::var(CEILING_DIRECTORIES_VAR)
        .map(|dirs| {
            dirs.split(':')
                .filter(|d| !d.is_empty())
                .map(PathBuf::from)
                .collect()
        })
        .unwrap_or_default()
}

fn same_path(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Directories searched for a user-level configuration file.
fn global_configuration_directories() -> Vec<PathBuf> {
    let mut config_dirs: Vec<PathBuf> = Vec::new();
    if let Ok(dirs) = std::env::var("XDG_CONFIG_HOME") {
        config_dirs.extend(dirs.split(':').filter(|d| !d.is_empty()).map(PathBuf::from));
    } else if let Ok(profile) = std::env::var("USERPROFILE") {
        config_dirs.push(PathBuf::from(profile));
    } else if let Ok(home) = std::env::var("HOME") {
        config_dirs.push(Path::new(&home).join(".config"));
        config_dirs.push(PathBuf::from(home));
    }

    if let Ok(dirs) = std::env::var("XDG_CONFIG_DIRS") {
        config_dirs.extend(dirs.split(':').filter(|d| !d.is_empty()).map(PathBuf::from));
    } else if let Ok(profile) = std::env::var("ALLUSERSPROFILE") {
        config_dirs.push(PathBuf::from(profile));
    } else {
        config_dirs.push(PathBuf::from("/usr/local/share/"));
        config_dirs.push(PathBuf::from("/usr/share/"));
    }

    config_dirs
        .into_iter()
        .flat_map(|dir| [dir.join("jupytext"), dir])
        .collect()
}

/// The user-level configuration file, if any.
pub fn find_global_jupytext_configuration_file() -> Result<Option<PathBuf>> {
    for dir in global_configuration_directories() {
        if let Some(file) = find_jupytext_configuration_file(&dir, false)? {
            return Ok(Some(file));
        }
    }
    Ok(None)
}

/// The configuration file of `path`: in `path` itself, or (with
/// `search_parent_dirs`) in its parent directories, or at user level.
pub fn find_jupytext_configuration_file(path: &Path, search_parent_dirs: bool) -> Result<Option<PathBuf>> {
    if path.is_dir() {
        for name in JUPYTEXT_CONFIG_FILES {
            let candidate = path.join(name);
            if candidate.is_file() {
                return Ok(Some(candidate));
            }
        }
        let pyproject = path.join(PYPROJECT_FILE);
        if pyproject.is_file() && has_jupytext_table(&pyproject)? {
            return Ok(Some(pyproject));
        }
    }

    if !search_parent_dirs {
        return Ok(None);
    }
    if path.is_dir() && ceiling_directories().iter().any(|c| same_path(path, c)) {
        return Ok(None);
    }

    // relative paths continue with the current directory, then its parents
    let parent = if path == Path::new(".") || path.as_os_str().is_empty() {
        std::env::current_dir()
            .ok()
            .and_then(|cwd| cwd.parent().map(Path::to_path_buf))
    } else {
        match path.parent() {
            Some(parent) if parent.as_os_str().is_empty() => Some(PathBuf::from(".")),
            parent => parent.map(Path::to_path_buf),
        }
    };
    match parent {
        Some(parent) => find_jupytext_configuration_file(&parent, true),
        None => find_global_jupytext_configuration_file(),
    }
}

/// Parse a configuration file into a JSON value.
pub fn parse_jupytext_configuration_file(config_file: &Path, text: &str) -> Result<Value> {
    let name = config_file.to_string_lossy();
    let incorrect = |e: String| {
        NbTextError::ConfigError(format!("The configuration file {} is incorrect: {}", name, e))
    };

    if name.ends_with(".toml") || name.ends_with("jupytext") {
        let doc: Value = toml::from_str(text).map_err(|e| incorrect(e.to_string()))?;
        if name.ends_with(PYPROJECT_FILE) {
            return doc
                .get("tool")
                .and_then(|t| t.get("jupytext"))
                .cloned()
                .ok_or_else(|| incorrect("no [tool.jupytext] table".to_string()));
        }
        return Ok(doc);
    }
    if name.ends_with(".yml") || name.ends_with(".yaml") {
        return serde_yaml::from_str::<Value>(text)
            .map(|v| if v.is_null() { Value::Object(Metadata::new()) } else { v })
            .map_err(|e| incorrect(e.to_string()));
    }
    if name.ends_with(".json") {
        return serde_json::from_str(text).map_err(|e| incorrect(e.to_string()));
    }
    Err(incorrect("unsupported configuration file type".to_string()))
}

/// Read and validate a configuration file.
pub fn load_jupytext_configuration_file(config_file: &Path) -> Result<JupytextConfiguration> {
    let text = std::fs::read_to_string(config_file)
        .map_err(|e| NbTextError::IoError(format!("Cannot read {}: {}", config_file.display(), e)))?;
    let value = parse_jupytext_configuration_file(config_file, &text)?;
    debug!(config_file = %config_file.display(), "loaded configuration");
    JupytextConfiguration::from_value(&config_file.to_string_lossy(), value)
}

/// The configuration that applies to a notebook file, if any.
pub fn load_jupytext_config(nb_file: &Path) -> Result<Option<JupytextConfiguration>> {
    let Some(config_file) = find_jupytext_configuration_file(nb_file, true)? else {
        return Ok(None);
    };
    if nb_file.is_file() && same_path(&config_file, nb_file) {
        return Ok(None);
    }
    load_jupytext_configuration_file(&config_file).map(Some)
}

/// The format of a path, completed with the preferred formats for reading.
pub fn preferred_read_format(path: &str, config: Option<&JupytextConfiguration>) -> Result<JupytextFormat> {
    let ext = split_extension(path).1;
    let fmt = long_form_one_format(ext.strip_prefix('.').unwrap_or(&ext), None, true)?;
    match config {
        Some(config) => preferred_format(&fmt, config.preferred_jupytext_formats_read.as_deref()),
        None => Ok(fmt),
    }
}
