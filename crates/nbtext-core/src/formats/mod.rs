//! # Formats
//!
//! The table of text formats, and the helpers that go from a format string
//! (`py:percent`, `notebooks///ipynb`, `nb.md`) to a `JupytextFormat` and
//! back.
//!
//! ## Format Strings
//!
//! A format string is `[prefix/][suffix]ext[:format_name]`. `auto` stands
//! for the script extension of the notebook language, and a bare format name
//! such as `percent` means `auto:percent`.

pub mod ipynb;
pub mod options;

pub use options::{FormatOptions, JupytextFormat, VALID_FORMAT_OPTIONS, str2bool};

use crate::header::header_to_metadata_and_cell;
use crate::languages::{
    SCRIPT_EXTENSIONS, is_script_extension, non_hash_comments, same_language, script_for_extension,
};
use crate::magics::is_magic;
use crate::metadata_filter::{MetadataFilter, metadata_filter_as_string};
use crate::stringparser::StringParser;
use crate::types::{Metadata, NbTextError, Notebook, Result, section, section_mut, split_lines};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Value, json};
use tracing::debug;

// =============================================================================
// FORMAT TABLE
// =============================================================================

/// The reader and exporter family of a format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatKind {
    Markdown,
    Light,
    Nomarker,
    Percent,
    Hydrogen,
}

/// One text format for one extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatDescription {
    pub format_name: &'static str,
    pub extension: &'static str,
    pub header_prefix: &'static str,
    pub header_suffix: &'static str,
    pub current_version: &'static str,
    pub min_readable_version: Option<&'static str>,
    pub kind: FormatKind,
}

impl FormatDescription {
    /// Is this a Markdown document?
    #[must_use]
    pub fn is_markdown(&self) -> bool {
        self.kind == FormatKind::Markdown
    }
}

/// Every format, in the order used to pick the default format of an
/// extension: light comes first for scripts.
pub static JUPYTEXT_FORMATS: Lazy<Vec<FormatDescription>> = Lazy::new(|| {
    let mut formats = vec![
        FormatDescription {
            format_name: "markdown",
            extension: ".md",
            header_prefix: "",
            header_suffix: "",
            current_version: "1.3",
            min_readable_version: Some("1.0"),
            kind: FormatKind::Markdown,
        },
        FormatDescription {
            format_name: "markdown",
            extension: ".markdown",
            header_prefix: "",
            header_suffix: "",
            current_version: "1.2",
            min_readable_version: Some("1.0"),
            kind: FormatKind::Markdown,
        },
    ];
    let script_formats = [
        ("light", "1.5", "1.1", FormatKind::Light),
        ("nomarker", "1.0", "1.0", FormatKind::Nomarker),
        ("percent", "1.3", "1.1", FormatKind::Percent),
        ("hydrogen", "1.3", "1.1", FormatKind::Hydrogen),
    ];
    for (format_name, current_version, min_version, kind) in script_formats {
        for script in &SCRIPT_EXTENSIONS {
            formats.push(FormatDescription {
                format_name,
                extension: script.extension,
                header_prefix: script.comment,
                header_suffix: script.comment_suffix,
                current_version,
                min_readable_version: Some(min_version),
                kind,
            });
        }
    }
    formats
});

/// `.ipynb` and every extension of the text formats.
pub static NOTEBOOK_EXTENSIONS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    let mut extensions = vec![".ipynb"];
    for fmt in JUPYTEXT_FORMATS.iter() {
        if !extensions.contains(&fmt.extension) {
            extensions.push(fmt.extension);
        }
    }
    extensions
});

/// The names of the text formats.
pub const VALID_FORMAT_NAMES: [&str; 5] = ["markdown", "light", "nomarker", "percent", "hydrogen"];

/// Is `ext` a Markdown extension?
#[must_use]
pub fn is_markdown_extension(ext: &str) -> bool {
    ext == ".md" || ext == ".markdown"
}

/// Is `ext` the extension of a notebook, text or ipynb?
#[must_use]
pub fn is_notebook_extension(ext: &str) -> bool {
    NOTEBOOK_EXTENSIONS.contains(&ext)
}

fn last_extension(ext: &str) -> String {
    format!(".{}", ext.rsplit('.').next().unwrap_or(ext))
}

/// The format implementation for an extension (the first one when no name
/// is given). Pre-extensions like `.nb.py` are ignored.
pub fn get_format_implementation(
    ext: &str,
    format_name: Option<&str>,
) -> Result<&'static FormatDescription> {
    let ext = last_extension(ext);
    let format_name = format_name.filter(|name| !name.is_empty());
    let mut formats_for_extension = Vec::new();
    for fmt in JUPYTEXT_FORMATS.iter() {
        if fmt.extension == ext {
            if format_name.is_none_or(|name| name == fmt.format_name) {
                return Ok(fmt);
            }
            formats_for_extension.push(fmt.format_name);
        }
    }
    if !formats_for_extension.is_empty() {
        return Err(NbTextError::InvalidFormat(format!(
            "Format '{}' is not associated to extension '{}'. Please choose one of: {}.",
            format_name.unwrap_or_default(),
            ext,
            formats_for_extension.join(", ")
        )));
    }
    Err(NbTextError::InvalidFormat(format!(
        "No format associated to extension '{}'",
        ext
    )))
}

// =============================================================================
// FORMAT DETECTION
// =============================================================================

/// The notebook metadata found in the header of a text document.
pub fn read_metadata(text: &str, ext: &str) -> Result<Metadata> {
    let ext = last_extension(ext);
    let lines = split_lines(text);
    let (comment, comment_suffix) = if is_markdown_extension(&ext) {
        ("", "")
    } else {
        script_for_extension(&ext).map_or(("#", ""), |s| (s.comment, s.comment_suffix))
    };
    let header = header_to_metadata_and_cell(&lines, comment, comment_suffix, &ext, true)?;
    Ok(header.metadata)
}

/// The format name recorded in the document header, if any.
pub fn read_format_from_metadata(text: &str, ext: &str) -> Result<Option<String>> {
    let mut metadata = read_metadata(text, ext)?;
    rearrange_jupytext_metadata(&mut metadata)?;
    format_name_for_ext(&metadata, ext, None, false)
}

struct ScriptMarkers {
    double_percent: Regex,
    double_percent_and_space: Regex,
    nbconvert: Regex,
    vim_folding: Regex,
    vscode_folding: Regex,
}

impl ScriptMarkers {
    fn new(comment: &str) -> Result<Self> {
        let comment = regex::escape(comment);
        let build = |pattern: String| {
            Regex::new(&pattern).map_err(|e| NbTextError::InvalidFormat(e.to_string()))
        };
        Ok(Self {
            double_percent: build(format!(r"^{comment}( %%|%%)$"))?,
            double_percent_and_space: build(format!(r"^{comment}( %%|%%)\s"))?,
            nbconvert: build(format!(r"^{comment}( <codecell>| In\[[0-9 ]*\]:?)"))?,
            vim_folding: build(format!(r"^{comment}\s*\{{\{{\{{"))?,
            vscode_folding: build(format!(r"^{comment}\s*region"))?,
        })
    }
}

/// Guess the format and format options of a document, given its extension
/// and content.
pub fn guess_format(text: &str, ext: &str) -> Result<(String, FormatOptions)> {
    let metadata = read_metadata(text, ext)?;
    if section(&metadata, "jupytext").is_some_and(|j| j.contains_key("text_representation")) {
        let name = format_name_for_ext(&metadata, ext, None, true)?;
        return Ok((name.unwrap_or_default(), FormatOptions::default()));
    }

    if let Some(script) = script_for_extension(ext) {
        let markers = ScriptMarkers::new(script.comment)?;
        let language = script.language;
        let mut parser = StringParser::new(Some(if ext == ".r" || ext == ".R" { "R" } else { "python" }));

        let mut double_percent_count = 0usize;
        let mut magic_command_count = 0usize;
        let mut vim_folding_markers_count = 0usize;
        let mut vscode_folding_markers_count = 0usize;

        for line in split_lines(text) {
            parser.read_line(&line);
            if parser.is_quoted() {
                continue;
            }
            // escaped magics (`#%%time`, no space) are not cell markers
            if markers.double_percent.is_match(&line)
                || markers.double_percent_and_space.is_match(&line)
                || markers.nbconvert.is_match(&line)
            {
                double_percent_count += 1;
            }
            if !line.starts_with(script.comment) && is_magic(&line, language, true, true) {
                magic_command_count += 1;
            }
            if markers.vim_folding.is_match(&line) {
                vim_folding_markers_count += 1;
            }
            if markers.vscode_folding.is_match(&line) {
                vscode_folding_markers_count += 1;
            }
        }

        debug!(
            ext,
            double_percent_count, magic_command_count, "guessing script format"
        );

        if double_percent_count >= 1 {
            let name = if magic_command_count > 0 { "hydrogen" } else { "percent" };
            return Ok((name.to_string(), FormatOptions::default()));
        }
        if vim_folding_markers_count > 0 {
            let options = FormatOptions {
                cell_markers: Some("{{{,}}}".to_string()),
                ..FormatOptions::default()
            };
            return Ok(("light".to_string(), options));
        }
        if vscode_folding_markers_count > 0 {
            let options = FormatOptions {
                cell_markers: Some("region,endregion".to_string()),
                ..FormatOptions::default()
            };
            return Ok(("light".to_string(), options));
        }
    }

    let fmt = get_format_implementation(ext, None)?;
    Ok((fmt.format_name.to_string(), FormatOptions::default()))
}

/// Guess the format of a document from its content only: `ipynb`, or
/// `ext:format_name`.
pub fn divine_format(text: &str) -> Result<String> {
    if serde_json::from_str::<Value>(text).is_ok_and(|value| value.is_object()) {
        return Ok("ipynb".to_string());
    }

    let lines = split_lines(text);
    let mut comments = vec!["", "#"];
    comments.extend(non_hash_comments());
    for comment in comments {
        let metadata = match header_to_metadata_and_cell(&lines, comment, "", "", true) {
            Ok(header) => header.metadata,
            Err(e) => {
                debug!(comment, "no header with this comment: {}", e);
                continue;
            }
        };
        let ext = section(&metadata, "jupytext")
            .and_then(|j| section(j, "text_representation"))
            .and_then(|t| t.get("extension"))
            .and_then(Value::as_str);
        if let Some(ext) = ext.filter(|ext| !ext.is_empty()) {
            let (format_name, _) = guess_format(text, ext)?;
            return Ok(format!("{}:{}", ext.strip_prefix('.').unwrap_or(ext), format_name));
        }
    }

    if lines.iter().any(|line| line == "```") {
        return Ok("md".to_string());
    }

    let (format_name, _) = guess_format(text, ".py")?;
    Ok(format!("py:{}", format_name))
}

fn version_numbers(version: &str) -> Vec<u64> {
    version
        .split('.')
        .map(|part| part.parse().unwrap_or(0))
        .collect()
}

/// Refuse to combine a text document with the outputs of a notebook when
/// the document was written in a version of the format that this converter
/// cannot read.
pub fn check_file_version(
    notebook: &Notebook,
    source_path: &str,
    outputs_path: &str,
    insert_version_number: bool,
) -> Result<()> {
    if !insert_version_number {
        return Ok(());
    }
    let text_representation =
        section(&notebook.metadata, "jupytext").and_then(|j| section(j, "text_representation"));
    let ext = if source_path == "-" {
        text_representation
            .and_then(|t| t.get("extension"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    } else {
        crate::paired_paths::split_extension(source_path).1
    };
    if ext.ends_with(".ipynb") {
        return Err(NbTextError::InvalidFormat(format!(
            "source_path={} should be a text file",
            source_path
        )));
    }

    let mut version = text_representation
        .and_then(|t| t.get("format_version"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let format_name = format_name_for_ext(&notebook.metadata, &ext, None, true)?;
    let fmt = get_format_implementation(&ext, format_name.as_deref())?;
    let current = fmt.current_version;

    if !notebook.metadata.is_empty() && version.is_none() {
        version = Some(current.to_string());
    }
    let version = version.unwrap_or_default();
    if version == current {
        return Ok(());
    }

    let min_version = fmt.min_readable_version.unwrap_or(current);
    let numbers = version_numbers(&version);
    if version_numbers(min_version) <= numbers && numbers <= version_numbers(current) {
        return Ok(());
    }

    let jupytext_version_in_file = text_representation
        .and_then(|t| t.get("jupytext_version"))
        .and_then(Value::as_str)
        .unwrap_or("N/A");
    Err(NbTextError::InvalidFormat(format!(
        "The file {source} was generated with version {in_file} of the converter but you have {ours} \
         installed. Please upgrade to version {in_file}, or remove either {source} or {outputs}. \
         This error occurs because {source} is in the {name} format in version {version}, while \
         version {ours} can only read the {name} format in versions {min_version} to {current}.",
        source = crate::paired_paths::file_name(source_path),
        outputs = crate::paired_paths::file_name(outputs_path),
        in_file = jupytext_version_in_file,
        ours = crate::primitives::NBTEXT_VERSION,
        name = fmt.format_name,
    )))
}

// =============================================================================
// NOTEBOOK METADATA
// =============================================================================

/// The format name for `ext`: from `jupytext.text_representation`, then
/// from `jupytext.formats` (or `default_formats`), then, with
/// `explicit_default`, the default format of the extension.
pub fn format_name_for_ext(
    metadata: &Metadata,
    ext: &str,
    default_formats: Option<&str>,
    explicit_default: bool,
) -> Result<Option<String>> {
    let jupytext = section(metadata, "jupytext");
    if let Some(text_repr) = jupytext.and_then(|j| section(j, "text_representation")) {
        let repr_ext = text_repr.get("extension").and_then(Value::as_str).unwrap_or_default();
        let repr_name = text_repr.get("format_name").and_then(Value::as_str);
        if let Some(name) = repr_name.filter(|n| !n.is_empty()) {
            if repr_ext.ends_with(ext) {
                return Ok(Some(name.to_string()));
            }
        }
    }

    let formats = jupytext
        .and_then(|j| j.get("formats"))
        .filter(|f| !is_empty_formats(f))
        .cloned()
        .or_else(|| default_formats.map(|f| Value::String(f.to_string())))
        .unwrap_or(Value::Null);
    for fmt in long_form_multiple_formats(&formats, None, true)? {
        if fmt.extension == ext && (!explicit_default || fmt.format_name.is_some()) {
            return Ok(fmt.format_name);
        }
    }

    if !explicit_default || is_markdown_extension(ext) {
        return Ok(None);
    }
    Ok(Some(get_format_implementation(ext, None)?.format_name.to_string()))
}

fn is_empty_formats(formats: &Value) -> bool {
    match formats {
        Value::Null => true,
        Value::String(text) => text.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// Do the two formats target the same file?
#[must_use]
pub fn identical_format_path(fmt1: &JupytextFormat, fmt2: &JupytextFormat) -> bool {
    fmt1.extension == fmt2.extension && fmt1.prefix == fmt2.prefix && fmt1.suffix == fmt2.suffix
}

/// Record the format name of `new_format` in `jupytext.formats`, when the
/// notebook is paired.
pub fn update_jupytext_formats_metadata(
    metadata: &mut Metadata,
    new_format: &JupytextFormat,
) -> Result<()> {
    let formats = section(metadata, "jupytext")
        .and_then(|j| j.get("formats"))
        .cloned()
        .unwrap_or(Value::Null);
    let mut formats = long_form_multiple_formats(&formats, None, true)?;
    if formats.is_empty() {
        return Ok(());
    }
    if let Some(fmt) = formats.iter_mut().find(|fmt| identical_format_path(fmt, new_format)) {
        fmt.format_name.clone_from(&new_format.format_name);
    }
    section_mut(metadata, "jupytext").insert(
        "formats".to_string(),
        Value::String(short_form_multiple_formats(&formats)),
    );
    Ok(())
}

/// Move legacy metadata entries (`jupytext_formats`, `main_language`,
/// `nbrmd_*`, `metadata_filter`) to their current place in the `jupytext`
/// section, and normalize `jupytext.formats`.
pub fn rearrange_jupytext_metadata(metadata: &mut Metadata) -> Result<()> {
    for key in ["nbrmd_formats", "nbrmd_format_version"] {
        if let Some(value) = metadata.shift_remove(key) {
            metadata.insert(key.replace("nbrmd", "jupytext"), value);
        }
    }

    let had_jupytext = metadata.contains_key("jupytext");
    let mut jupytext = section(metadata, "jupytext").cloned().unwrap_or_default();

    if let Some(formats) = metadata.shift_remove("jupytext_formats") {
        jupytext.insert("formats".to_string(), formats);
    }
    if let Some(version) = metadata.shift_remove("jupytext_format_version") {
        jupytext.insert(
            "text_representation".to_string(),
            json!({ "format_version": version }),
        );
    }
    for entry in ["main_language", "encoding", "executable"] {
        if let Some(value) = metadata.shift_remove(entry) {
            jupytext.insert(entry.to_string(), value);
        }
    }

    if let Some(Value::Object(filters)) = jupytext.shift_remove("metadata_filter") {
        if let Some(notebook) = filters.get("notebook") {
            jupytext.insert("notebook_metadata_filter".to_string(), notebook.clone());
        }
        if let Some(cells) = filters.get("cells") {
            jupytext.insert("cell_metadata_filter".to_string(), cells.clone());
        }
    }
    for filter_level in ["notebook_metadata_filter", "cell_metadata_filter"] {
        if let Some(filter) = jupytext.get(filter_level) {
            let filter = metadata_filter_as_string(&MetadataFilter::from_value(filter)?);
            jupytext.insert(filter_level.to_string(), Value::String(filter));
        }
    }

    let old_version = section(&jupytext, "text_representation")
        .and_then(|t| t.get("jupytext_version"))
        .and_then(Value::as_str)
        .is_some_and(|v| v.starts_with("0."));
    if old_version {
        if let Some(Value::String(formats)) = jupytext.get("formats") {
            let fixed: Vec<String> = formats
                .split(',')
                .map(|fmt| match fmt.rfind('.') {
                    Some(i) if i > 0 => format!(".{}", fmt),
                    _ => fmt.to_string(),
                })
                .collect();
            jupytext.insert("formats".to_string(), Value::String(fixed.join(",")));
        }
    }

    if !had_jupytext && jupytext.is_empty() {
        return Ok(());
    }
    let formats = jupytext.get("formats").filter(|f| !is_empty_formats(f)).cloned();
    metadata.insert("jupytext".to_string(), Value::Object(jupytext));

    // `auto` resolves against the whole notebook metadata
    if let Some(formats) = formats {
        let formats = long_form_multiple_formats(&formats, Some(metadata), true)?;
        section_mut(metadata, "jupytext").insert(
            "formats".to_string(),
            Value::String(short_form_multiple_formats(&formats)),
        );
    }
    Ok(())
}

// =============================================================================
// LONG AND SHORT FORMS
// =============================================================================

/// Parse one format string, e.g. `notebooks//sfx.py:percent`.
///
/// With `metadata`, `auto` is replaced by the script extension of the
/// notebook language. When that language is unknown, `auto` is kept unless
/// `auto_ext_requires_language_info` is set.
pub fn long_form_one_format(
    text: &str,
    metadata: Option<&Metadata>,
    auto_ext_requires_language_info: bool,
) -> Result<JupytextFormat> {
    if text.is_empty() {
        return Err(NbTextError::InvalidFormat("Empty format".to_string()));
    }
    let text = match text.to_lowercase().as_str() {
        "notebook" => "ipynb",
        "markdown" => "md",
        "script" => "auto",
        "c++" => "cpp",
        _ => text,
    };

    let mut fmt = JupytextFormat::default();
    let mut rest = text;
    if let Some(i) = rest.rfind('/').filter(|i| *i > 0) {
        fmt.prefix = Some(rest[..i].to_string());
        rest = &rest[i + 1..];
    }

    let mut ext = if let Some((ext, name)) = rest.rsplit_once(':') {
        let name = if name == "bare" { "nomarker" } else { name };
        fmt.format_name = Some(name.to_string());
        ext.to_string()
    } else if rest.is_empty()
        || rest.contains('.')
        || is_notebook_extension(&format!(".{}", rest))
        || rest == "auto"
    {
        rest.to_string()
    } else if VALID_FORMAT_NAMES.contains(&rest) {
        fmt.format_name = Some(rest.to_string());
        "auto".to_string()
    } else {
        return Err(NbTextError::InvalidFormat(format!(
            "'{}' is not a notebook extension (one of {}), nor a notebook format (one of {})",
            rest,
            NOTEBOOK_EXTENSIONS.join(", "),
            VALID_FORMAT_NAMES.join(", ")
        )));
    };

    if let Some(i) = ext.rfind('.').filter(|i| *i > 0) {
        fmt.suffix = Some(ext[..i].to_string());
        ext = ext[i..].to_string();
    }
    if !ext.starts_with('.') {
        ext = format!(".{}", ext);
    }

    if ext == ".auto" {
        if let Some(metadata) = metadata {
            match auto_ext_from_metadata(metadata) {
                Some(auto_ext) => ext = auto_ext,
                None if auto_ext_requires_language_info => {
                    return Err(NbTextError::InvalidFormat(
                        "No language information in this notebook. Please replace 'auto' with \
                         an actual script extension."
                            .to_string(),
                    ));
                }
                None => {}
            }
        }
    }

    fmt.extension = ext;
    validate_one_format(&fmt)?;
    Ok(fmt)
}

/// Parse a list of formats, either a comma separated string or a list of
/// format strings or dictionaries. Unresolved `auto` formats are dropped
/// when `auto_ext_requires_language_info` is not set.
pub fn long_form_multiple_formats(
    formats: &Value,
    metadata: Option<&Metadata>,
    auto_ext_requires_language_info: bool,
) -> Result<Vec<JupytextFormat>> {
    let mut long_forms = Vec::new();
    match formats {
        Value::Null => {}
        Value::String(text) => {
            for fmt in text.split(',').filter(|f| !f.is_empty()) {
                long_forms.push(long_form_one_format(fmt, metadata, auto_ext_requires_language_info)?);
            }
        }
        Value::Array(items) => {
            for item in items {
                let fmt = match item {
                    Value::String(text) if text.is_empty() => continue,
                    Value::String(text) => {
                        long_form_one_format(text, metadata, auto_ext_requires_language_info)?
                    }
                    other => {
                        let fmt = JupytextFormat::from_value(other)?;
                        validate_one_format(&fmt)?;
                        fmt
                    }
                };
                long_forms.push(fmt);
            }
        }
        other => {
            return Err(NbTextError::InvalidFormat(format!(
                "Formats should be a string or a list, not '{}'",
                other
            )));
        }
    }
    if !auto_ext_requires_language_info {
        long_forms.retain(|fmt| fmt.extension != ".auto");
    }
    Ok(long_forms)
}

/// Parse a comma separated list of formats.
pub fn parse_formats(text: &str) -> Result<Vec<JupytextFormat>> {
    long_form_multiple_formats(&Value::String(text.to_string()), None, true)
}

/// The format string of a format, e.g. `notebooks//py:percent`.
#[must_use]
pub fn short_form_one_format(fmt: &JupytextFormat) -> String {
    let mut text = match &fmt.suffix {
        Some(suffix) => format!("{}{}", suffix, fmt.extension),
        None => fmt.extension.strip_prefix('.').unwrap_or(&fmt.extension).to_string(),
    };
    if let Some(prefix) = &fmt.prefix {
        text = format!("{}/{}", prefix, text);
    }
    if let Some(name) = fmt.name().filter(|n| !n.is_empty()) {
        if !is_markdown_extension(&fmt.extension) {
            text = format!("{}:{}", text, name);
        }
    }
    text
}

/// Comma separated format strings.
#[must_use]
pub fn short_form_multiple_formats(formats: &[JupytextFormat]) -> String {
    formats
        .iter()
        .map(short_form_one_format)
        .collect::<Vec<_>>()
        .join(",")
}

/// Check the format name and the extension of a format.
pub fn validate_one_format(fmt: &JupytextFormat) -> Result<()> {
    if let Some(name) = fmt.name() {
        if !VALID_FORMAT_NAMES.contains(&name) {
            return Err(NbTextError::InvalidFormat(format!(
                "{} is not a valid format name. Please choose one of {}",
                name,
                VALID_FORMAT_NAMES.join(", ")
            )));
        }
    }
    if fmt.extension.is_empty() {
        return Err(NbTextError::InvalidFormat("Missing format extension".to_string()));
    }
    if !is_notebook_extension(&fmt.extension) && fmt.extension != ".auto" {
        return Err(NbTextError::InvalidFormat(format!(
            "Extension '{}' is not a notebook extension. Please use one of '{}', '.auto'.",
            fmt.extension,
            NOTEBOOK_EXTENSIONS.join("', '")
        )));
    }
    Ok(())
}

/// The script extension of the notebook language: `language_info`, then
/// the kernel language, then `jupytext.main_language`.
#[must_use]
pub fn auto_ext_from_metadata(metadata: &Metadata) -> Option<String> {
    let mut auto_ext = section(metadata, "language_info")
        .and_then(|l| l.get("file_extension"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let kernel_language = section(metadata, "kernelspec")
        .and_then(|k| k.get("language"))
        .and_then(Value::as_str);

    if auto_ext.as_deref() == Some(".py") && kernel_language == Some("sage") {
        auto_ext = Some(".sage".to_string());
    }

    if auto_ext.is_none() {
        let language = kernel_language.filter(|l| !l.is_empty()).or_else(|| {
            section(metadata, "jupytext")
                .and_then(|j| j.get("main_language"))
                .and_then(Value::as_str)
        });
        if let Some(language) = language.filter(|l| !l.is_empty()) {
            auto_ext = SCRIPT_EXTENSIONS
                .iter()
                .find(|s| same_language(language, s.language))
                .map(|s| s.extension.to_string());
        }
    }

    match auto_ext.as_deref() {
        Some(".r") => Some(".R".to_string()),
        Some(".fs") => Some(".fsx".to_string()),
        Some(".resource") => Some(".robot".to_string()),
        _ => auto_ext,
    }
}

/// Replace `.auto` with the script extension of the notebook language.
pub fn check_auto_ext(fmt: &JupytextFormat, metadata: &Metadata, option: &str) -> Result<JupytextFormat> {
    if fmt.extension != ".auto" {
        return Ok(fmt.clone());
    }
    match auto_ext_from_metadata(metadata) {
        Some(auto_ext) => {
            let mut fmt = fmt.clone();
            fmt.extension = auto_ext;
            Ok(fmt)
        }
        None => Err(NbTextError::InvalidFormat(format!(
            "The notebook does not have a 'language_info' metadata. Please replace 'auto' with \
             the actual language extension in the {} option (currently {}).",
            option,
            short_form_one_format(fmt)
        ))),
    }
}

/// Is `ext` handled by a text format rather than by the ipynb reader?
#[must_use]
pub fn is_text_extension(ext: &str) -> bool {
    is_markdown_extension(ext) || is_script_extension(ext)
}
