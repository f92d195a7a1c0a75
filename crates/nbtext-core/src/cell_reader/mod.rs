//! # Cell Readers
//!
//! A `CellReader` reads one cell at the top of a list of lines, and tells
//! where the next cell starts. The conversion loop calls it until the
//! document is exhausted.
//!
//! ## Reader Families
//!
//! - Markdown: fenced code blocks and `<!-- #region -->` comments
//! - Light (and nomarker): `# +` markers or blank-line separated paragraphs
//! - Percent (and hydrogen): `# %%` markers
//!
//! Every family shares the bookkeeping done here: blank lines between cells,
//! inactive cells, uncommenting and magic handling.

mod markdown;
mod script;

use crate::cell_metadata::is_active;
use crate::formats::{FormatKind, JupytextFormat, is_markdown_extension};
use crate::languages::script_for_extension;
use crate::magics::{need_explicit_marker, uncomment_magic, unescape_code_start};
use crate::pep8::pep8_lines_between_cells;
use crate::types::{Cell, CellType, Metadata, NbTextError, Result, split_lines};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Value, json};

static BLANK_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*$").expect("valid blank line regex"));
static PY_INDENTED: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s").expect("valid indent regex"));
static GONB_MAGIC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^((//\s*)*)(//\s*gonb:%%)").expect("valid gonb regex"));

fn is_blank(line: &str) -> bool {
    BLANK_LINE.is_match(line)
}

/// `lines[start..end]`, empty when the range is out of bounds.
fn slice(lines: &[String], start: usize, end: usize) -> Vec<String> {
    lines.get(start..end.min(lines.len())).unwrap_or_default().to_vec()
}

/// Remove the comment prefix (and the following space) and the comment
/// suffix of every line, when present.
#[must_use]
pub fn uncomment(lines: &[String], prefix: &str, suffix: &str) -> Vec<String> {
    let prefix_and_space = format!("{prefix} ");
    let space_and_suffix = format!(" {suffix}");
    lines
        .iter()
        .map(|line| {
            let mut line = line.as_str();
            if !prefix.is_empty() {
                line = line
                    .strip_prefix(&prefix_and_space)
                    .or_else(|| line.strip_prefix(prefix))
                    .unwrap_or(line);
            }
            if !suffix.is_empty() {
                line = line
                    .strip_suffix(&space_and_suffix)
                    .or_else(|| line.strip_suffix(suffix))
                    .unwrap_or(line);
            }
            line.to_string()
        })
        .collect()
}

/// Is the paragraph made of comments only (a Markdown cell in a light
/// script)? Commented magics are code.
fn paragraph_is_fully_commented(lines: &[String], comment: &str, main_language: &str) -> bool {
    for (i, line) in lines.iter().enumerate() {
        if let Some(rest) = line.strip_prefix(comment) {
            if rest.trim_start().starts_with(comment) {
                continue;
            }
            if crate::magics::is_magic(line, main_language, true, true) {
                return false;
            }
            continue;
        }
        return i > 0 && is_blank(line);
    }
    true
}

/// Is the next non blank line indented?
fn next_code_is_indented(lines: &[String]) -> bool {
    lines
        .iter()
        .find(|line| !is_blank(line))
        .is_some_and(|line| PY_INDENTED.is_match(line))
}

/// Number of blank lines between the end of a cell and the next cell.
fn count_lines_to_next_cell(
    cell_end_marker: usize,
    next_cell_start: usize,
    total: usize,
    explicit_eoc: bool,
) -> usize {
    if cell_end_marker >= total {
        return 1;
    }
    let mut lines_to_next_cell = next_cell_start.saturating_sub(cell_end_marker);
    if explicit_eoc {
        lines_to_next_cell = lines_to_next_cell.saturating_sub(1);
    }
    if next_cell_start >= total {
        lines_to_next_cell += 1;
    }
    lines_to_next_cell
}

/// Are the two last lines blank, and not the third last one?
fn last_two_lines_blank(source: &[String]) -> bool {
    let n = source.len();
    n >= 3 && !is_blank(&source[n - 3]) && is_blank(&source[n - 2]) && is_blank(&source[n - 1])
}

// =============================================================================
// READER
// =============================================================================

/// The patterns of one reader family.
#[derive(Debug, Clone)]
enum Patterns {
    Markdown(markdown::MarkdownPatterns),
    Script(script::ScriptPatterns),
}

/// Reads the cells of a text document in a given format.
#[derive(Debug, Clone)]
pub struct CellReader {
    kind: FormatKind,
    ext: String,
    default_language: String,
    comment: String,
    comment_suffix: String,
    comment_magics: bool,
    format_version: Option<String>,
    split_at_heading: bool,
    cell_metadata_json: bool,
    patterns: Patterns,
}

/// One cell read from text.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadCell {
    pub cell: Cell,
    /// Index of the first line of the next cell.
    pub next_position: usize,
    /// Were the cell options written as JSON?
    pub cell_metadata_json: bool,
}

/// What the reader learns about the cell being read.
#[derive(Debug, Clone, Default)]
struct CellState {
    metadata: Option<Metadata>,
    org_content: Vec<String>,
    content: Vec<String>,
    explicit_soc: bool,
    explicit_eoc: bool,
    cell_type: Option<CellType>,
    language: Option<String>,
    lines_to_next_cell: usize,
    cell_metadata_json: bool,
    comment: String,
    end_code_re: Option<Regex>,
    in_region: bool,
    end_region_re: Option<Regex>,
    ignore_end_marker: bool,
    explicit_end_marker_required: bool,
}

impl CellState {
    fn metadata_mut(&mut self) -> &mut Metadata {
        self.metadata.get_or_insert_with(Metadata::new)
    }
}

impl CellReader {
    /// A reader for the format `fmt` of family `kind`. `default_language`
    /// defaults to the language of the extension.
    pub fn new(fmt: &JupytextFormat, kind: FormatKind, default_language: Option<&str>) -> Result<Self> {
        let ext = if fmt.extension.is_empty() { ".py".to_string() } else { fmt.extension.clone() };
        let default_language = default_language.filter(|l| !l.is_empty());
        let format_version = fmt.format_version.clone();

        let (comment, comment_suffix, language, patterns) = if kind == FormatKind::Markdown {
            let language = default_language
                .map(str::to_string)
                .or_else(|| script_for_extension(&ext).map(|s| s.language.to_string()))
                .unwrap_or_else(|| "python".to_string());
            let patterns = markdown::MarkdownPatterns::new(format_version.as_deref())?;
            (String::new(), String::new(), language, Patterns::Markdown(patterns))
        } else {
            let script = script_for_extension(&ext).ok_or_else(|| {
                NbTextError::InvalidFormat(format!("'{}' is not a script extension", ext))
            })?;
            let language = default_language.unwrap_or(script.language).to_string();
            let patterns = match kind {
                FormatKind::Percent | FormatKind::Hydrogen => {
                    script::ScriptPatterns::percent(script.comment)?
                }
                FormatKind::Light => {
                    script::ScriptPatterns::light(script.comment, fmt.options.cell_markers.as_deref())?
                }
                _ => script::ScriptPatterns::light(script.comment, None)?,
            };
            (
                script.comment.to_string(),
                script.comment_suffix.to_string(),
                language,
                Patterns::Script(patterns),
            )
        };

        let default_comment_magics = !matches!(kind, FormatKind::Markdown | FormatKind::Hydrogen);
        Ok(Self {
            kind,
            ext,
            default_language: language,
            comment,
            comment_suffix,
            comment_magics: fmt.options.comment_magics.unwrap_or(default_comment_magics),
            format_version,
            split_at_heading: fmt.options.split_at_heading.unwrap_or(false),
            cell_metadata_json: fmt.options.cell_metadata_json.unwrap_or(false),
            patterns,
        })
    }

    fn is_percent(&self) -> bool {
        matches!(self.kind, FormatKind::Percent | FormatKind::Hydrogen)
    }

    fn new_state(&self) -> CellState {
        let end_code_re = match &self.patterns {
            Patterns::Markdown(_) => Some(markdown::default_end_code_re()),
            Patterns::Script(patterns) => patterns.custom_end_re(),
        };
        CellState {
            comment: self.comment.clone(),
            end_code_re,
            explicit_soc: self.is_percent(),
            ignore_end_marker: true,
            cell_metadata_json: self.cell_metadata_json,
            ..CellState::default()
        }
    }

    /// Read the cell that starts on the first line.
    pub fn read(&self, lines: &[String]) -> Result<ReadCell> {
        let mut state = self.new_state();
        let first_line = lines.first().map(String::as_str).unwrap_or_default();

        match &self.patterns {
            Patterns::Markdown(patterns) => self.markdown_option_line(&mut state, patterns, first_line)?,
            Patterns::Script(patterns) if self.is_percent() => {
                self.percent_option_line(&mut state, patterns, first_line);
            }
            Patterns::Script(patterns) => self.light_option_line(&mut state, patterns, first_line),
        }

        if let Some(metadata) = state.metadata.as_mut() {
            if let Some(language) = metadata.shift_remove("language") {
                state.language = Some(match language {
                    Value::String(language) => language,
                    other => other.to_string(),
                });
            }
        }

        let next_position = match &self.patterns {
            Patterns::Script(patterns) if self.is_percent() => {
                self.percent_find_cell_content(&mut state, patterns, lines)
            }
            _ => self.find_cell_content(&mut state, lines)?,
        };

        let expected_blank_lines = if self.ext == ".py" {
            let previous = if state.org_content.is_empty() {
                vec![String::new()]
            } else {
                state.org_content.clone()
            };
            let following = lines.get(next_position..).unwrap_or_default();
            pep8_lines_between_cells(&previous, following, &self.ext)
        } else {
            1
        };

        let mut metadata = state.metadata.take().unwrap_or_default();
        if state.lines_to_next_cell != expected_blank_lines {
            metadata.insert("lines_to_next_cell".to_string(), json!(state.lines_to_next_cell));
        }
        if let Some(language) = state.language.take() {
            metadata.insert("language".to_string(), Value::String(language));
        }

        let cell = Cell::new(state.cell_type.unwrap_or(CellType::Raw), state.content.join("\n"))
            .with_metadata(metadata);
        Ok(ReadCell {
            cell,
            next_position,
            cell_metadata_json: state.cell_metadata_json,
        })
    }

    /// Find the end of the cell, extract its content, and count the blank
    /// lines to the next cell. Returns the position of the next cell.
    fn find_cell_content(&self, state: &mut CellState, lines: &[String]) -> Result<usize> {
        let (mut cell_end_marker, mut next_cell_start, explicit_eoc) = match &self.patterns {
            Patterns::Markdown(patterns) => self.markdown_find_cell_end(state, patterns, lines)?,
            Patterns::Script(patterns) => self.light_find_cell_end(state, patterns, lines)?,
        };
        state.explicit_eoc = explicit_eoc;

        let cell_start = if state.metadata.is_none() {
            state.metadata = Some(Metadata::new());
            0
        } else {
            1
        };

        let mut source = slice(lines, cell_start, cell_end_marker);
        state.org_content = source.clone();

        // exactly two blank lines before an explicit end of cell (PEP8)
        if self.ext == ".py" && state.explicit_eoc {
            let lines_to_end_of_cell_marker = if last_two_lines_blank(&source) {
                source.truncate(source.len() - 2);
                2
            } else {
                0
            };
            let following = lines.get(cell_end_marker..).unwrap_or_default();
            let pep8_lines = pep8_lines_between_cells(&source, following, &self.ext);
            if lines_to_end_of_cell_marker != if pep8_lines == 1 { 0 } else { 2 } {
                state.metadata_mut().insert(
                    "lines_to_end_of_cell_marker".to_string(),
                    json!(lines_to_end_of_cell_marker),
                );
            }
        }

        state.explicit_soc = cell_start > 0;
        state.content = self.extract_content(state, source);

        if state.cell_type == Some(CellType::Code) {
            let metadata = state.metadata_mut();
            if !is_active(".ipynb", metadata, true) {
                if metadata.get("active") == Some(&json!("")) {
                    metadata.shift_remove("active");
                }
                state.cell_type = Some(CellType::Raw);
            } else if is_markdown_extension(&self.ext) && state.language.is_none() {
                // code blocks without a language are Markdown since version 1.2
                if matches!(self.format_version.as_deref(), Some("1.0" | "1.1")) {
                    state.cell_type = Some(CellType::Raw);
                } else {
                    state.cell_type = Some(CellType::Markdown);
                    state.explicit_eoc = false;
                    cell_end_marker += 1;
                    state.content = slice(lines, 0, cell_end_marker);
                }
            }
        }

        let total = lines.len();
        if next_cell_start + 1 < total
            && is_blank(&lines[next_cell_start])
            && !is_blank(&lines[next_cell_start + 1])
        {
            next_cell_start += 1;
        } else if state.explicit_eoc
            && next_cell_start + 2 < total
            && is_blank(&lines[next_cell_start])
            && is_blank(&lines[next_cell_start + 1])
            && !is_blank(&lines[next_cell_start + 2])
        {
            next_cell_start += 2;
        }

        state.lines_to_next_cell =
            count_lines_to_next_cell(cell_end_marker, next_cell_start, total, state.explicit_eoc);
        Ok(next_cell_start)
    }

    /// The cell content: uncommented Markdown, code with magics restored.
    fn extract_content(&self, state: &mut CellState, lines: Vec<String>) -> Vec<String> {
        let is_code = state.cell_type == Some(CellType::Code);

        // code cells made of a single string are Markdown
        if self.ext == ".py" {
            let metadata = state.metadata_mut();
            if !is_active(".py", metadata, is_code) {
                if let Some(content) = triple_quoted_markdown(&lines, metadata) {
                    return content;
                }
            }
        }

        let has_active = state.metadata.as_ref().is_some_and(|m| m.contains_key("active"));
        let other_language = !has_active
            && state
                .language
                .as_deref()
                .is_some_and(|l| !l.is_empty() && l != self.default_language);
        if !is_active(&self.ext, state.metadata_mut(), true) || other_language {
            let comment = if self.ext == ".r" || self.ext == ".R" { "#" } else { state.comment.as_str() };
            return uncomment(&lines, comment, "");
        }

        match self.patterns {
            Patterns::Markdown(_) => {
                let mut lines = lines;
                if is_code && self.comment_magics {
                    let language = state.language.clone().unwrap_or_default();
                    uncomment_magic(&mut lines, &language, true, true);
                }
                lines
            }
            Patterns::Script(_) => self.uncomment_script_code_and_magics(state, lines),
        }
    }

    fn uncomment_script_code_and_magics(&self, state: &mut CellState, lines: Vec<String>) -> Vec<String> {
        let mut lines = lines;
        let is_code = state.cell_type == Some(CellType::Code);
        let language = state.language.clone().unwrap_or_else(|| self.default_language.clone());

        if self.comment_magics {
            if is_active(&self.ext, state.metadata_mut(), true) {
                uncomment_magic(&mut lines, &language, true, state.explicit_soc);
                if is_code && !state.explicit_soc && need_explicit_marker(&lines, &language, true) {
                    state
                        .metadata_mut()
                        .insert("comment_questions".to_string(), Value::Bool(false));
                }
            } else {
                lines = uncomment(&lines, "#", "");
            }
        }

        if self.default_language == "go" && state.language.is_none() {
            for line in &mut lines {
                *line = GONB_MAGIC.replace(line, "${1}%%").into_owned();
            }
        }

        if is_code {
            unescape_code_start(&mut lines, &self.ext, &language);
            return lines;
        }
        uncomment(&lines, &state.comment, &self.comment_suffix)
    }
}

/// A Python cell made of a single triple-quoted string is a Markdown cell.
/// The quotes are recorded in the `cell_marker` metadata.
fn triple_quoted_markdown(lines: &[String], metadata: &mut Metadata) -> Option<Vec<String>> {
    let joined = lines.join("\n");
    let content = joined.trim();
    for prefix in ["", "r", "R"] {
        for triple_quote in ["\"\"\"", "'''"] {
            let mut left = format!("{prefix}{triple_quote}");
            let mut right = triple_quote.to_string();
            if !(content.starts_with(&left)
                && content.ends_with(&right)
                && content.len() >= left.len() + right.len())
            {
                continue;
            }
            let mut inner = &content[left.len()..content.len() - right.len()];
            if let Some(rest) = inner.strip_prefix('\n') {
                inner = rest;
                left.push('\n');
            }
            if let Some(rest) = inner.strip_suffix('\n') {
                inner = rest;
                right = format!("\n{right}");
            }

            if prefix.is_empty() {
                if left.len() == 4 && right.len() == 4 {
                    metadata.insert("cell_marker".to_string(), json!(&left[..3]));
                }
            } else if left.len() - 1 == 4 && right.len() == 4 {
                metadata.insert("cell_marker".to_string(), json!(&left[..4]));
            } else {
                metadata.insert("cell_marker".to_string(), json!(format!("{left},{right}")));
            }
            return Some(split_lines(inner));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(text: &str) -> Vec<String> {
        split_lines(text)
    }

    #[test]
    fn uncomment_lines() {
        assert_eq!(uncomment(&lines("# a\n#b\nc"), "#", ""), vec!["a", "b", "c"]);
        assert_eq!(uncomment(&lines("(* a *)"), "(*", "*)"), vec!["a"]);
        assert_eq!(uncomment(&lines("# a"), "", ""), vec!["# a"]);
    }

    #[test]
    fn commented_paragraphs() {
        assert!(paragraph_is_fully_commented(&lines("# a\n# b"), "#", "python"));
        assert!(!paragraph_is_fully_commented(&lines("# a\nb"), "#", "python"));
        assert!(!paragraph_is_fully_commented(&lines("# %matplotlib inline"), "#", "python"));
        assert!(paragraph_is_fully_commented(&lines("# a\n\nb"), "#", "python"));
    }

    #[test]
    fn blank_line_counts() {
        assert_eq!(count_lines_to_next_cell(3, 4, 10, false), 1);
        assert_eq!(count_lines_to_next_cell(3, 4, 10, true), 0);
        assert_eq!(count_lines_to_next_cell(3, 4, 4, false), 2);
        assert_eq!(count_lines_to_next_cell(10, 10, 10, false), 1);
        assert!(last_two_lines_blank(&lines("a\n\n\n")));
        assert!(!last_two_lines_blank(&lines("\n\n\n")));
    }

    #[test]
    fn indented_code_follows() {
        assert!(next_code_is_indented(&lines("\n    x = 1")));
        assert!(!next_code_is_indented(&lines("\nx = 1")));
        assert!(!next_code_is_indented(&[]));
    }

    #[test]
    fn triple_quotes_become_markdown() {
        let mut metadata = Metadata::new();
        let content = triple_quoted_markdown(&lines("\"\"\"\nSome text\n\"\"\""), &mut metadata);
        assert_eq!(content, Some(vec!["Some text".to_string()]));
        assert_eq!(metadata["cell_marker"], json!("\"\"\""));

        let mut metadata = Metadata::new();
        let content = triple_quoted_markdown(&lines("r'''\nText\n'''"), &mut metadata);
        assert_eq!(content, Some(vec!["Text".to_string()]));
        assert_eq!(metadata["cell_marker"], json!("r'''"));

        assert_eq!(triple_quoted_markdown(&lines("x = 1"), &mut Metadata::new()), None);
    }
}
