//! Scripts: the light format (`# +` markers, or paragraphs separated by
//! blank lines), its marker-free variant, and the percent format (`# %%`).

use super::{CellReader, CellState, is_blank, last_two_lines_blank, next_code_is_indented};
use super::{count_lines_to_next_cell, paragraph_is_fully_commented, slice, uncomment};
use crate::cell_metadata::{is_active, is_json_metadata, text_to_metadata};
use crate::stringparser::StringParser;
use crate::types::{CellType, Metadata, NbTextError, Result};
use regex::Regex;
use serde_json::{Value, json};
use std::cell::RefCell;
use std::collections::HashMap;

fn regex(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| NbTextError::InvalidFormat(e.to_string()))
}

#[derive(Debug, Clone)]
pub(super) struct ScriptPatterns {
    start_code_re: Regex,
    /// `# %%` without options, `# <codecell>` and `# In[ ]:`.
    alternative_start_code_re: Option<Regex>,
    /// End marker of user defined cell markers, e.g. `# }}}`.
    custom_end_code_re: Option<Regex>,
    escaped_comment: String,
    /// `# -`, `# --`, ... by `endofcell` value.
    end_of_cell_res: RefCell<HashMap<String, Regex>>,
}

impl ScriptPatterns {
    pub(super) fn light(comment: &str, cell_markers: Option<&str>) -> Result<Self> {
        let comment = regex::escape(comment);
        let custom = cell_markers
            .filter(|markers| *markers != "+,-")
            .and_then(|markers| markers.split_once(','));
        match custom {
            Some((start, end)) => Ok(Self {
                start_code_re: regex(&format!(r"^{comment}\s*{}(.*)$", regex::escape(start)))?,
                alternative_start_code_re: None,
                custom_end_code_re: Some(regex(&format!(r"^{comment}\s*{}\s*$", regex::escape(end)))?),
                escaped_comment: comment,
                end_of_cell_res: RefCell::default(),
            }),
            None => Ok(Self {
                start_code_re: regex(&format!(r"^{comment}\s*\+(.*)$"))?,
                alternative_start_code_re: None,
                custom_end_code_re: None,
                escaped_comment: comment,
                end_of_cell_res: RefCell::default(),
            }),
        }
    }

    pub(super) fn percent(comment: &str) -> Result<Self> {
        let comment = regex::escape(comment);
        Ok(Self {
            start_code_re: regex(&format!(r"^\s*{comment}\s*%%(%*)\s(.*)$"))?,
            alternative_start_code_re: Some(regex(&format!(
                r"^\s*{comment}\s*(%%|<codecell>|In\[[0-9 ]*\]:?)\s*$"
            ))?),
            custom_end_code_re: None,
            escaped_comment: comment,
            end_of_cell_res: RefCell::default(),
        })
    }

    pub(super) fn custom_end_re(&self) -> Option<Regex> {
        self.custom_end_code_re.clone()
    }

    /// The end marker of a light cell with options, compiled once per marker.
    fn end_of_cell_re(&self, end_of_cell: &str) -> Result<Regex> {
        if let Some(re) = self.end_of_cell_res.borrow().get(end_of_cell) {
            return Ok(re.clone());
        }
        let re = regex(&format!(r"^{} {}\s*$", self.escaped_comment, regex::escape(end_of_cell)))?;
        self.end_of_cell_res
            .borrow_mut()
            .insert(end_of_cell.to_string(), re.clone());
        Ok(re)
    }

    fn is_cell_start(&self, line: &str) -> bool {
        self.start_code_re.is_match(line)
            || self.alternative_start_code_re.as_ref().is_some_and(|re| re.is_match(line))
    }
}

/// Metadata from the text that follows a cell marker: a title, a
/// `[markdown]` or `[raw]` cell type, Spyder's `%` sub cell depth and
/// `key=value` options.
fn options_to_metadata(state: &mut CellState, options: &str) -> Metadata {
    state.cell_metadata_json |= is_json_metadata(options);
    let (mut title, mut metadata) = text_to_metadata(options, true);

    for cell_type in ["markdown", "raw", "md"] {
        let code = format!("[{cell_type}]");
        if title.contains(&code) {
            title = title.replace(&code, "").trim().to_string();
            if cell_type == "md" {
                metadata.insert("region_name".to_string(), json!("md"));
                metadata.insert("cell_type".to_string(), json!("markdown"));
            } else {
                metadata.insert("cell_type".to_string(), json!(cell_type));
            }
            break;
        }
    }

    let unindented = title.trim_start_matches('%');
    let cell_depth = title.len() - unindented.len();
    if cell_depth > 0 {
        metadata.insert("cell_depth".to_string(), json!(cell_depth));
        title = unindented.trim().to_string();
    }

    if !title.is_empty() {
        metadata.insert("title".to_string(), Value::String(title));
    }
    metadata
}

fn pop_cell_type(metadata: &mut Metadata) -> Option<CellType> {
    metadata
        .shift_remove("cell_type")
        .map(|value| value.as_str().and_then(CellType::parse).unwrap_or(CellType::Code))
}

impl CellReader {
    // =========================================================================
    // LIGHT
    // =========================================================================

    pub(super) fn light_option_line(&self, state: &mut CellState, patterns: &ScriptPatterns, line: &str) {
        if patterns.start_code_re.is_match(line) {
            let mut line = line;
            if !self.comment_suffix.is_empty() {
                let space_and_suffix = format!(" {}", self.comment_suffix);
                line = line
                    .strip_suffix(&space_and_suffix)
                    .or_else(|| line.strip_suffix(&self.comment_suffix))
                    .unwrap_or(line);
            }
            let options = patterns
                .start_code_re
                .captures(line)
                .and_then(|caps| caps.get(1))
                .map_or("", |m| m.as_str());
            state.metadata = Some(options_to_metadata(state, options));
            state.language = None;
            state.ignore_end_marker = false;
            if patterns.custom_end_code_re.is_some() {
                state.explicit_end_marker_required = true;
            }
        } else if patterns.custom_end_code_re.as_ref().is_some_and(|re| re.is_match(line)) {
            state.metadata = None;
            state.cell_type = Some(CellType::Code);
        }
    }

    pub(super) fn light_find_cell_end(
        &self,
        state: &mut CellState,
        patterns: &ScriptPatterns,
        lines: &[String],
    ) -> Result<(usize, usize, bool)> {
        let first_line_ends_a_cell = patterns
            .custom_end_code_re
            .as_ref()
            .zip(lines.first())
            .is_some_and(|(re, line)| re.is_match(line));

        if state.metadata.is_none()
            && !first_line_ends_a_cell
            && paragraph_is_fully_commented(lines, &self.comment, &self.default_language)
        {
            state.cell_type = Some(CellType::Markdown);
            let total = lines.len();
            return Ok(match lines.iter().position(|line| is_blank(line)) {
                Some(i) => (i, i + 1, false),
                None => (total, total, false),
            });
        }

        match state.metadata.as_ref() {
            None => state.end_code_re = None,
            Some(metadata) if patterns.custom_end_code_re.is_none() => {
                let end_of_cell = metadata.get("endofcell").and_then(Value::as_str).unwrap_or("-");
                state.end_code_re = Some(patterns.end_of_cell_re(end_of_cell)?);
            }
            Some(_) => {}
        }

        Ok(self.find_region_end(state, patterns, lines))
    }

    fn find_region_end(&self, state: &mut CellState, patterns: &ScriptPatterns, lines: &[String]) -> (usize, usize, bool) {
        state.cell_type = Some(
            state
                .metadata
                .as_mut()
                .and_then(pop_cell_type)
                .unwrap_or(CellType::Code),
        );

        let total = lines.len();
        let skip_header = state.metadata.is_some();
        let language = state.language.clone().unwrap_or_else(|| self.default_language.clone());
        let mut parser = StringParser::new(Some(&language));

        for (i, line) in lines.iter().enumerate() {
            if skip_header && i == 0 {
                continue;
            }
            if parser.is_quoted() {
                parser.read_line(line);
                continue;
            }
            parser.read_line(line);

            if patterns.start_code_re.is_match(line) {
                // the options only hold when the cell is closed by an end marker
                if state.explicit_end_marker_required {
                    state.metadata = None;
                    state.language = None;
                }
                if i > 0 && is_blank(&lines[i - 1]) {
                    if i > 1 && is_blank(&lines[i - 2]) {
                        return (i - 2, i, false);
                    }
                    return (i - 1, i, false);
                }
                return (i, i, false);
            }

            if !state.ignore_end_marker && state.end_code_re.is_some() {
                if state.end_code_re.as_ref().is_some_and(|re| re.is_match(line)) {
                    return (i, i + 1, true);
                }
            } else if is_blank(line) && !next_code_is_indented(&lines[i..]) {
                if i > 0 {
                    return (i, i + 1, false);
                }
                if total > 1 && !is_blank(&lines[1]) {
                    return (1, 1, false);
                }
                return (1, 2, false);
            }
        }
        (total, total, false)
    }

    // =========================================================================
    // PERCENT
    // =========================================================================

    pub(super) fn percent_option_line(&self, state: &mut CellState, patterns: &ScriptPatterns, line: &str) {
        if patterns.start_code_re.is_match(line) {
            let uncommented = uncomment(&[line.to_string()], &self.comment, &self.comment_suffix);
            let uncommented = uncommented.first().map(String::as_str).unwrap_or_default();
            let options = uncommented.find("%%").map_or("", |pos| &uncommented[pos + 2..]);
            state.metadata = Some(options_to_metadata(state, options));
            state.language = None;
        } else {
            state.metadata = Some(Metadata::new());
        }
    }

    pub(super) fn percent_find_cell_content(
        &self,
        state: &mut CellState,
        patterns: &ScriptPatterns,
        lines: &[String],
    ) -> usize {
        let (cell_end_marker, next_cell_start, explicit_eoc) = self.percent_find_cell_end(state, patterns, lines);

        let cell_start = usize::from(lines.first().is_some_and(|line| patterns.is_cell_start(line)));
        let source = slice(lines, cell_start, cell_end_marker);
        state.org_content = source.clone();
        state.content = self.extract_content(state, source);
        state.lines_to_next_cell =
            count_lines_to_next_cell(cell_end_marker, next_cell_start, lines.len(), explicit_eoc);
        next_cell_start
    }

    fn percent_find_cell_end(
        &self,
        state: &mut CellState,
        patterns: &ScriptPatterns,
        lines: &[String],
    ) -> (usize, usize, bool) {
        let metadata = state.metadata_mut();
        let (cell_type, uncommented) = if let Some(cell_type) = pop_cell_type(metadata) {
            (cell_type, false)
        } else if !is_active(".ipynb", metadata, true) {
            if metadata.get("active") == Some(&json!("")) {
                metadata.shift_remove("active");
            }
            (CellType::Raw, is_active(&self.ext, metadata, true))
        } else {
            (CellType::Code, false)
        };
        state.cell_type = Some(cell_type);
        if uncommented {
            state.comment = String::new();
        }

        let mut next_cell = lines.len();
        let language = state.language.clone().unwrap_or_else(|| self.default_language.clone());
        let mut parser = StringParser::new(Some(&language));
        for (i, line) in lines.iter().enumerate() {
            if parser.is_quoted() {
                parser.read_line(line);
                continue;
            }
            parser.read_line(line);
            if i > 0 && patterns.is_cell_start(line) {
                next_cell = i;
                break;
            }
        }

        if last_two_lines_blank(&lines[..next_cell]) {
            return (next_cell - 2, next_cell, false);
        }
        if next_cell > 0 && is_blank(&lines[next_cell - 1]) {
            return (next_cell - 1, next_cell, false);
        }
        (next_cell, next_cell, false)
    }
}

#[cfg(test)]
mod tests {
    use super::ScriptPatterns;
    use crate::cell_reader::{CellReader, ReadCell};
    use crate::formats::{FormatKind, JupytextFormat};
    use crate::types::{CellType, split_lines};
    use serde_json::json;

    fn read_with(fmt: &JupytextFormat, kind: FormatKind, text: &str) -> ReadCell {
        let reader = CellReader::new(fmt, kind, None).expect("reader");
        reader.read(&split_lines(text)).expect("read")
    }

    fn read(kind: FormatKind, text: &str) -> ReadCell {
        read_with(&JupytextFormat::with_extension(".py"), kind, text)
    }

    #[test]
    fn light_explicit_cell() {
        let parsed = read(FormatKind::Light, "# +\na = 1\n# -\n\nb = 2");
        assert_eq!(parsed.cell.cell_type, CellType::Code);
        assert_eq!(parsed.cell.source, "a = 1");
        assert!(parsed.cell.metadata.is_empty());
        assert_eq!(parsed.next_position, 4);
    }

    #[test]
    fn light_implicit_cells() {
        let parsed = read(FormatKind::Light, "b = 2");
        assert_eq!(parsed.cell.source, "b = 2");
        assert_eq!(parsed.next_position, 1);
    }

    #[test]
    fn light_commented_paragraph_is_markdown() {
        let parsed = read(FormatKind::Light, "# Title\n\na = 1");
        assert_eq!(parsed.cell.cell_type, CellType::Markdown);
        assert_eq!(parsed.cell.source, "Title");
        assert_eq!(parsed.next_position, 2);
    }

    #[test]
    fn light_cell_options() {
        let parsed = read(FormatKind::Light, "# + tags=[\"parameters\"]\nx = 1\n# -");
        assert_eq!(parsed.cell.metadata.get("tags"), Some(&json!(["parameters"])));
        assert_eq!(parsed.cell.source, "x = 1");
    }

    #[test]
    fn light_custom_markers() {
        let mut fmt = JupytextFormat::with_extension(".py").named("light");
        fmt.options.cell_markers = Some("{{{,}}}".to_string());
        let parsed = read_with(&fmt, FormatKind::Light, "# {{{\na = 1\n\nb = 2\n# }}}");
        assert_eq!(parsed.cell.source, "a = 1\n\nb = 2");
        assert_eq!(parsed.next_position, 5);
    }

    #[test]
    fn percent_markdown_cell() {
        let parsed = read(FormatKind::Percent, "# %% [markdown]\n# Some text\n\n# %%\nx = 1");
        assert_eq!(parsed.cell.cell_type, CellType::Markdown);
        assert_eq!(parsed.cell.source, "Some text");
        assert_eq!(parsed.next_position, 3);
    }

    #[test]
    fn percent_code_cell_with_title() {
        let parsed = read(FormatKind::Percent, "# %% Imports\nimport os\n");
        assert_eq!(parsed.cell.cell_type, CellType::Code);
        assert_eq!(parsed.cell.source, "import os");
        assert_eq!(parsed.cell.metadata.get("title"), Some(&json!("Imports")));
    }

    #[test]
    fn percent_uncomments_magics() {
        let parsed = read(FormatKind::Percent, "# %%\n# %matplotlib inline");
        assert_eq!(parsed.cell.source, "%matplotlib inline");

        let parsed = read(FormatKind::Hydrogen, "# %%\n%matplotlib inline");
        assert_eq!(parsed.cell.source, "%matplotlib inline");
    }

    #[test]
    fn percent_raw_cell() {
        let parsed = read(FormatKind::Percent, "# %% [raw]\n# raw text");
        assert_eq!(parsed.cell.cell_type, CellType::Raw);
        assert_eq!(parsed.cell.source, "raw text");
    }

    #[test]
    fn spyder_sub_cells() {
        let parsed = read(FormatKind::Percent, "# %%% Sub cell\nx = 1");
        assert_eq!(parsed.cell.metadata.get("cell_depth"), Some(&json!(1)));
        assert_eq!(parsed.cell.metadata.get("title"), Some(&json!("Sub cell")));
    }

    #[test]
    fn non_script_extension_is_rejected() {
        let fmt = JupytextFormat::with_extension(".txt");
        assert!(CellReader::new(&fmt, FormatKind::Percent, None).is_err());
    }

    #[test]
    fn end_of_cell_markers_are_compiled_once() {
        let patterns = ScriptPatterns::light("#", None).expect("patterns");
        let first = patterns.end_of_cell_re("-").expect("marker");
        let again = patterns.end_of_cell_re("-").expect("marker");
        let longer = patterns.end_of_cell_re("--").expect("marker");
        assert_eq!(first.as_str(), again.as_str());
        assert!(first.is_match("# -"));
        assert!(!first.is_match("# --"));
        assert!(longer.is_match("# --"));
        assert_eq!(patterns.end_of_cell_res.borrow().len(), 2);
    }
}
