//! # Cell Exporters
//!
//! A `CellExporter` writes one notebook cell as lines of text in a given
//! format. The notebook writer then joins the cells, last to first, so that
//! each cell knows what follows it when blank lines and end-of-cell markers
//! are decided.

mod markdown;
mod script;

use crate::cell_metadata::is_active;
use crate::formats::{FormatKind, JupytextFormat};
use crate::languages::{cell_language, comment_lines, script_for_extension};
use crate::magics::{comment_magic, escape_code_start};
use crate::metadata_filter::{MetadataFilter, filter_metadata};
use crate::primitives::IGNORE_CELL_METADATA;
use crate::types::{Cell, CellType, Metadata, Result, split_lines};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::warn;

static GONB_COMMAND: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^((//\s*)*)(%%\s*$|%%\s+-.*$)").expect("valid gonb regex"));

/// The lines of a cell. A trailing newline gives a trailing empty line.
#[must_use]
pub fn cell_source(cell: &Cell) -> Vec<String> {
    if cell.source.is_empty() {
        return vec![String::new()];
    }
    let mut lines = split_lines(&cell.source);
    if cell.source.ends_with('\n') {
        lines.push(String::new());
    }
    lines
}

/// The first `n` characters of `text`.
fn head(text: &str, n: usize) -> &str {
    text.char_indices().nth(n).map_or(text, |(pos, _)| &text[..pos])
}

/// The last `n` characters of `text`.
fn tail(text: &str, n: usize) -> &str {
    let count = text.chars().count();
    if count <= n {
        return text;
    }
    text.char_indices().nth(count - n).map_or(text, |(pos, _)| &text[pos..])
}

fn is_triple_quote(text: &str) -> bool {
    text == "\"\"\"" || text == "'''"
}

/// Writes one cell in a text format.
#[derive(Debug, Clone)]
pub struct CellExporter {
    kind: FormatKind,
    fmt: JupytextFormat,
    ext: String,
    cell_type: CellType,
    source: Vec<String>,
    unfiltered_metadata: Metadata,
    metadata: Metadata,
    language: String,
    default_language: String,
    comment: String,
    comment_suffix: String,
    comment_magics: bool,
    cell_metadata_json: bool,
    /// Markers around Markdown cells, e.g. `"""` in Python scripts.
    markdown_cell_markers: Option<String>,
    /// Light scripts with user defined cell markers, e.g. `{{{` and `}}}`.
    cell_marker_start: Option<String>,
    cell_marker_end: Option<String>,
    lines_to_next_cell: Option<usize>,
    lines_to_end_of_cell_marker: Option<usize>,
}

impl CellExporter {
    /// Prepare `cell` for export. Cell metadata that cannot be written is
    /// collected in `unsupported_keys`.
    pub fn new(
        cell: &Cell,
        default_language: &str,
        fmt: &JupytextFormat,
        kind: FormatKind,
        unsupported_keys: Option<&mut BTreeSet<String>>,
    ) -> Self {
        let ext = fmt.extension.clone();
        let mut source = cell_source(cell);
        let user_filter = fmt
            .options
            .cell_metadata_filter
            .as_deref()
            .map(MetadataFilter::parse)
            .unwrap_or_default();
        let mut metadata = filter_metadata(
            &cell.metadata,
            &user_filter,
            &MetadataFilter::parse(IGNORE_CELL_METADATA),
            unsupported_keys,
        );

        let mut language = None;
        if kind != FormatKind::Hydrogen {
            let custom_cell_magics: Vec<String> = fmt
                .options
                .custom_cell_magics
                .as_deref()
                .unwrap_or_default()
                .split(',')
                .filter(|magic| !magic.is_empty())
                .map(str::to_string)
                .collect();
            if let Some((cell_lang, magic_args)) =
                cell_language(&mut source, Some(default_language), &custom_cell_magics)
            {
                if !magic_args.is_empty() {
                    metadata.insert("magic_args".to_string(), Value::String(magic_args));
                }
                metadata.insert("language".to_string(), Value::String(cell_lang.clone()));
                language = Some(cell_lang);
            }
        }
        let language = language
            .or_else(|| cell.metadata.get("language").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| default_language.to_string());

        let (comment, comment_suffix) = match (kind, script_for_extension(&ext)) {
            (FormatKind::Markdown, _) => (String::new(), String::new()),
            (_, Some(script)) => (script.comment.to_string(), script.comment_suffix.to_string()),
            (_, None) => ("#".to_string(), String::new()),
        };

        let default_comment_magics = !matches!(kind, FormatKind::Markdown | FormatKind::Hydrogen);
        let as_count = |key: &str| {
            cell.metadata
                .get(key)
                .and_then(Value::as_u64)
                .map(|n| n as usize)
        };

        if cell.cell_type == CellType::Raw && !metadata.contains_key("active") && !has_active_tag(&metadata) {
            metadata.insert("active".to_string(), Value::String(String::new()));
        }

        let mut markdown_cell_markers = fmt.options.cell_markers.clone();
        let mut cell_marker_start = None;
        let mut cell_marker_end = None;
        if matches!(kind, FormatKind::Light | FormatKind::Nomarker) {
            if let Some(markers) = fmt.options.cell_markers.as_deref() {
                match markers.split_once(',') {
                    None => {
                        warn!("Ignored cell markers '{}' as they do not match the 'start,end' pattern", markers);
                        markdown_cell_markers = None;
                    }
                    Some((start, end)) if markers != "+,-" => {
                        cell_marker_start = Some(start.to_string());
                        cell_marker_end = Some(end.to_string());
                    }
                    Some(_) => {}
                }
            }
            if let Some(endofcell) = cell.metadata.get("endofcell") {
                metadata.insert("endofcell".to_string(), endofcell.clone());
            }
        }

        Self {
            kind,
            fmt: fmt.clone(),
            ext,
            cell_type: cell.cell_type,
            source,
            unfiltered_metadata: cell.metadata.clone(),
            metadata,
            language,
            default_language: default_language.to_string(),
            comment,
            comment_suffix,
            comment_magics: fmt.options.comment_magics.unwrap_or(default_comment_magics),
            cell_metadata_json: fmt.options.cell_metadata_json.unwrap_or(false),
            markdown_cell_markers,
            cell_marker_start,
            cell_marker_end,
            lines_to_next_cell: as_count("lines_to_next_cell"),
            lines_to_end_of_cell_marker: as_count("lines_to_end_of_cell_marker"),
        }
    }

    /// Blank lines to write after the cell, when recorded in the metadata.
    #[must_use]
    pub fn lines_to_next_cell(&self) -> Option<usize> {
        self.lines_to_next_cell
    }

    /// Is the cell written as code?
    #[must_use]
    pub fn is_code(&self) -> bool {
        if matches!(self.kind, FormatKind::Light | FormatKind::Nomarker)
            && ((self.cell_type == CellType::Markdown && !self.metadata.is_empty()) || self.use_triple_quotes())
        {
            return true;
        }
        self.cell_type == CellType::Code
            || (self.cell_type == CellType::Raw && self.metadata.contains_key("active"))
            || has_active_tag(&self.metadata)
    }

    /// Should this Markdown cell be written as a triple-quoted string?
    fn use_triple_quotes(&self) -> bool {
        let Some(cell_marker) = self.unfiltered_metadata.get("cell_marker").and_then(Value::as_str) else {
            return false;
        };
        if is_triple_quote(cell_marker) {
            return true;
        }
        let Some((left, right)) = cell_marker.split_once(',') else {
            return false;
        };
        head(left, 3) == tail(right, 3) && is_triple_quote(head(left, 3))
    }

    /// The text representation of the cell.
    pub fn cell_to_text(&mut self) -> Result<Vec<String>> {
        match self.kind {
            FormatKind::Markdown => self.markdown_cell_to_text(),
            FormatKind::Percent | FormatKind::Hydrogen => Ok(self.percent_cell_to_text()),
            FormatKind::Light | FormatKind::Nomarker => self.light_cell_to_text(),
        }
    }

    /// Go notebooks have `%%` commands that would be read as cell markers.
    fn escape_go_commands(&mut self) {
        if self.default_language == "go" && self.language == "go" {
            for line in &mut self.source {
                *line = GONB_COMMAND.replace(line, "${1}//gonb:${3}").into_owned();
            }
        }
    }

    /// Comment a Markdown cell, or wrap it in triple quotes.
    fn markdown_to_text(&self, source: Vec<String>) -> Vec<String> {
        let cell_markers = self
            .unfiltered_metadata
            .get("cell_marker")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| self.markdown_cell_markers.clone())
            .filter(|markers| !markers.is_empty());

        if let Some(markers) = cell_markers {
            let (mut left, right) = match markers.split_once(',') {
                Some((left, right)) => (left.to_string(), right.to_string()),
                None => {
                    let unprefixed = markers.strip_prefix(['r', 'R']).unwrap_or(&markers);
                    (format!("{markers}\n"), format!("\n{unprefixed}"))
                }
            };
            let closing = tail(&right, 3);
            let raw_prefix = left.starts_with(['r', 'R']);
            let opening_matches = head(&left, 3) == closing || (raw_prefix && head(&left[1..], 3) == closing);
            if opening_matches && is_triple_quote(closing) && !source.is_empty() {
                // backslashes need a raw string
                if !raw_prefix && source.join("\n").contains('\\') && self.fmt.name() == Some("percent") {
                    left = format!("r{left}");
                }
                let mut source = source;
                let last = source.len() - 1;
                source[0] = format!("{left}{}", source[0]);
                source[last].push_str(&right);
                return source;
            }
        }

        let mut source = source;
        if !self.comment.is_empty()
            && is_active(&self.ext, &self.metadata, true)
            && !matches!(self.kind, FormatKind::Percent | FormatKind::Hydrogen)
        {
            comment_magic(
                &mut source,
                &self.language,
                self.comment_magics,
                self.cell_type == CellType::Code,
            );
        }
        comment_lines(&source, &self.comment, &self.comment_suffix)
    }

    /// Markdown text in a script, with the cell start patterns escaped.
    fn commented_markdown(&self) -> Vec<String> {
        let mut source = self.source.clone();
        if self.comment.is_empty() {
            escape_code_start(&mut source, &self.ext, None);
        }
        self.markdown_to_text(source)
    }

    /// Drop the end-of-cell marker when the next cell starts with an
    /// explicit marker, and adjust the blank lines accordingly.
    pub fn remove_eoc_marker(&mut self, text: Vec<String>, next_text: &[String]) -> Vec<String> {
        match self.kind {
            FormatKind::Light | FormatKind::Nomarker => self.light_remove_eoc_marker(text, next_text),
            _ => text,
        }
    }
}

fn has_active_tag(metadata: &Metadata) -> bool {
    metadata
        .get("tags")
        .and_then(Value::as_array)
        .is_some_and(|tags| {
            tags.iter()
                .filter_map(Value::as_str)
                .any(|tag| tag.starts_with("active-"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn source_keeps_trailing_newline() {
        assert_eq!(cell_source(&Cell::code("")), vec![""]);
        assert_eq!(cell_source(&Cell::code("a\n")), vec!["a", ""]);
        assert_eq!(cell_source(&Cell::code("a\nb")), vec!["a", "b"]);
    }

    #[test]
    fn string_ends() {
        assert_eq!(head("'''text", 3), "'''");
        assert_eq!(tail("text\"\"\"", 3), "\"\"\"");
        assert_eq!(tail("ab", 3), "ab");
        assert_eq!(head("é", 3), "é");
    }

    #[test]
    fn raw_cells_are_inactive_by_default() {
        let fmt = JupytextFormat::with_extension(".py").named("percent");
        let exporter = CellExporter::new(&Cell::raw("text"), "python", &fmt, FormatKind::Percent, None);
        assert_eq!(exporter.metadata.get("active"), Some(&json!("")));
        assert!(exporter.is_code());
    }

    #[test]
    fn cell_magics_set_the_language() {
        let fmt = JupytextFormat::with_extension(".py").named("percent");
        let cell = Cell::code("%%bash -e\nls");
        let exporter = CellExporter::new(&cell, "python", &fmt, FormatKind::Percent, None);
        assert_eq!(exporter.language, "bash");
        assert_eq!(exporter.metadata.get("magic_args"), Some(&json!("-e")));
        assert_eq!(exporter.source, vec!["ls"]);

        let exporter = CellExporter::new(&cell, "python", &fmt, FormatKind::Hydrogen, None);
        assert_eq!(exporter.language, "python");
    }

    #[test]
    fn technical_metadata_is_filtered() {
        let fmt = JupytextFormat::with_extension(".py").named("percent");
        let mut metadata = Metadata::new();
        metadata.insert("collapsed".into(), json!(true));
        metadata.insert("tags".into(), json!(["a"]));
        let cell = Cell::code("x").with_metadata(metadata);
        let exporter = CellExporter::new(&cell, "python", &fmt, FormatKind::Percent, None);
        assert!(!exporter.metadata.contains_key("collapsed"));
        assert!(exporter.metadata.contains_key("tags"));
    }
}
