use super::CellExporter;
use crate::cell_metadata::{is_active, metadata_to_double_percent_options};
use crate::cell_reader::CellReader;
use crate::formats::FormatKind;
use crate::languages::{comment_lines, same_language};
use crate::magics::{comment_magic, escape_code_start, need_explicit_marker};
use crate::pep8::pep8_lines_between_cells;
use crate::types::{CellType, Result};
use regex::Regex;
use serde_json::Value;

/// An end-of-cell marker (`-`, `--`, ...) that does not occur in the cell.
fn endofcell_marker(source: &[String], comment: &str) -> String {
    let mut endofcell = "-".to_string();
    loop {
        let marker = format!("{comment} {endofcell}");
        let found = source
            .iter()
            .any(|line| line.strip_prefix(&marker).is_some_and(|rest| rest.trim().is_empty()));
        if !found {
            return endofcell;
        }
        endofcell.push('-');
    }
}

impl CellExporter {
    // =========================================================================
    // LIGHT
    // =========================================================================

    pub(super) fn light_cell_to_text(&mut self) -> Result<Vec<String>> {
        if self.cell_type != CellType::Code && self.metadata.is_empty() && self.use_triple_quotes() {
            self.metadata
                .insert("cell_type".to_string(), Value::String(self.cell_type.as_str().to_string()));
        }
        self.escape_go_commands();

        if !self.is_code() {
            return Ok(self.commented_markdown());
        }

        // Markdown cells with metadata are written as explicit code cells
        let promoted = (self.cell_type == CellType::Markdown && !self.metadata.is_empty()) || self.use_triple_quotes();
        if promoted && is_active(&self.ext, &self.metadata, true) {
            self.metadata
                .insert("cell_type".to_string(), Value::String(self.cell_type.as_str().to_string()));
            self.source = self.markdown_to_text(self.source.clone());
            self.cell_type = CellType::Code;
            self.unfiltered_metadata.shift_remove("cell_marker");
        }
        self.light_code_to_text()
    }

    fn light_code_to_text(&mut self) -> Result<Vec<String>> {
        let active = is_active(
            &self.ext,
            &self.metadata,
            same_language(&self.language, &self.default_language),
        );
        let mut source = self.source.clone();
        escape_code_start(&mut source, &self.ext, Some(&self.language));
        let comment_questions = self
            .metadata
            .shift_remove("comment_questions")
            .and_then(|value| value.as_bool())
            .unwrap_or(true);

        if active {
            comment_magic(&mut source, &self.language, self.comment_magics, comment_questions);
        } else {
            source = self.markdown_to_text(source);
        }

        let needs_marker = active
            && comment_questions
            && need_explicit_marker(&self.source, &self.language, self.comment_magics);
        if needs_marker || self.explicit_start_marker(&source)? {
            let endofcell = self
                .cell_marker_end
                .clone()
                .unwrap_or_else(|| endofcell_marker(&source, &self.comment));
            self.metadata.insert("endofcell".to_string(), Value::String(endofcell));
        }

        if self.metadata.is_empty() || self.kind == FormatKind::Nomarker {
            return Ok(source);
        }

        let endofcell = match self.metadata.get("endofcell") {
            Some(Value::String(endofcell)) => endofcell.clone(),
            _ => "-".to_string(),
        };
        if endofcell == "-" || self.cell_marker_end.is_some() {
            self.metadata.shift_remove("endofcell");
        }

        let mut cell_start = vec![
            self.comment.clone(),
            self.cell_marker_start.clone().unwrap_or_else(|| "+".to_string()),
        ];
        let options = metadata_to_double_percent_options(&mut self.metadata, self.cell_metadata_json);
        if !options.is_empty() {
            cell_start.push(options);
        }

        let mut lines = vec![cell_start.join(" ")];
        lines.extend(source);
        lines.push(format!("{} {}", self.comment, endofcell));
        Ok(lines)
    }

    /// Does the cell need an explicit start marker to be read back as a
    /// single code cell?
    fn explicit_start_marker(&self, source: &[String]) -> Result<bool> {
        if self.kind == FormatKind::Nomarker {
            return Ok(false);
        }
        if !self.metadata.is_empty() {
            return Ok(true);
        }
        if let (Some(start), Some(end), Some(first)) =
            (&self.cell_marker_start, &self.cell_marker_end, source.first())
        {
            let comment = regex::escape(&self.comment);
            let start_re = Regex::new(&format!(r"^{comment}\s*{}\s*(.*)$", regex::escape(start)));
            let end_re = Regex::new(&format!(r"^{comment}\s*{}\s*$", regex::escape(end)));
            if start_re.is_ok_and(|re| re.is_match(first)) || end_re.is_ok_and(|re| re.is_match(first)) {
                return Ok(false);
            }
        }
        if self.source.iter().all(|line| line.starts_with(&self.comment)) {
            return Ok(true);
        }
        let read = CellReader::new(&self.fmt, FormatKind::Light, None)?.read(source)?;
        Ok(read.next_position < source.len())
    }

    pub(super) fn light_remove_eoc_marker(&mut self, text: Vec<String>, next_text: &[String]) -> Vec<String> {
        if self.cell_marker_start.is_some() {
            return text;
        }
        let end_marker = format!("{} -", self.comment);
        if !self.is_code() || text.last() != Some(&end_marker) {
            return text;
        }

        let mut text = text;
        let next_start = format!("{} +", self.comment);
        if next_text.first().is_none_or(|line| line.starts_with(&next_start)) {
            // the next explicit marker ends this cell
            text.pop();
            if let Some(blank_lines) = self.lines_to_end_of_cell_marker.filter(|n| *n > 0) {
                if self.lines_to_next_cell.is_none_or(|n| blank_lines > n) {
                    self.lines_to_next_cell = Some(blank_lines);
                }
            }
        } else {
            let marker_position = text.len() - 1;
            let blank_lines = self.lines_to_end_of_cell_marker.unwrap_or_else(|| {
                // two blank lines when PEP8 requires them
                if pep8_lines_between_cells(&text[..marker_position], next_text, &self.ext) < 2 {
                    0
                } else {
                    2
                }
            });
            let marker = text.split_off(marker_position);
            text.extend(std::iter::repeat_n(String::new(), blank_lines));
            text.extend(marker);
        }
        text
    }

    // =========================================================================
    // PERCENT
    // =========================================================================

    /// A `# %%` marker line followed by the cell source.
    ///
    /// Source lines that already look like a marker, e.g. `// %% note` in
    /// a C++ cell, are written as they are and split the cell when the
    /// script is read again.
    pub(super) fn percent_cell_to_text(&mut self) -> Vec<String> {
        self.escape_go_commands();

        let active = is_active(
            &self.ext,
            &self.metadata,
            same_language(&self.language, &self.default_language),
        );
        if self.cell_type == CellType::Raw && self.metadata.get("active") == Some(&Value::String(String::new())) {
            self.metadata.shift_remove("active");
        }

        let is_code = self.is_code();
        if !is_code {
            self.metadata
                .insert("cell_type".to_string(), Value::String(self.cell_type.as_str().to_string()));
        }

        let options = metadata_to_double_percent_options(&mut self.metadata, self.cell_metadata_json);
        let mut indent = "";
        if is_code && active {
            if let Some(first_line) = self.source.first().filter(|line| !line.trim().is_empty()) {
                indent = &first_line[..first_line.len() - first_line.trim_start().len()];
            }
        }

        let marker = if options.is_empty() || options.starts_with('%') {
            format!("%%{options}")
        } else {
            format!("%% {options}")
        };
        let mut lines = comment_lines(&[marker], &format!("{indent}{}", self.comment), &self.comment_suffix);

        if is_code && active {
            let mut source = self.source.clone();
            comment_magic(&mut source, &self.language, self.comment_magics, true);
            if source != [""] {
                lines.extend(source);
            }
            return lines;
        }
        lines.extend(self.markdown_to_text(self.source.clone()));
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::endofcell_marker;
    use crate::cell_to_text::CellExporter;
    use crate::formats::{FormatKind, JupytextFormat};
    use crate::types::{Cell, Metadata};
    use serde_json::json;

    fn to_text(cell: &Cell, name: &str, kind: FormatKind) -> Vec<String> {
        let fmt = JupytextFormat::with_extension(".py").named(name);
        CellExporter::new(cell, "python", &fmt, kind, None)
            .cell_to_text()
            .expect("cell to text")
    }

    fn tagged(cell: Cell) -> Cell {
        let mut metadata = Metadata::new();
        metadata.insert("tags".into(), json!(["parameters"]));
        cell.with_metadata(metadata)
    }

    #[test]
    fn end_of_cell_marker_avoids_content() {
        assert_eq!(endofcell_marker(&["x = 1".to_string()], "#"), "-");
        assert_eq!(endofcell_marker(&["# -".to_string()], "#"), "--");
    }

    #[test]
    fn light_plain_code() {
        assert_eq!(to_text(&Cell::code("x = 1"), "light", FormatKind::Light), vec!["x = 1"]);
    }

    #[test]
    fn light_code_with_metadata() {
        let text = to_text(&tagged(Cell::code("x = 1")), "light", FormatKind::Light);
        assert_eq!(text, vec!["# + tags=[\"parameters\"]", "x = 1", "# -"]);
    }

    #[test]
    fn light_code_with_blank_lines_needs_markers() {
        let text = to_text(&Cell::code("x = 1\n\ny = 2"), "light", FormatKind::Light);
        assert_eq!(text, vec!["# +", "x = 1", "", "y = 2", "# -"]);
    }

    #[test]
    fn light_markdown_is_commented() {
        assert_eq!(to_text(&Cell::markdown("A *title*"), "light", FormatKind::Light), vec!["# A *title*"]);
    }

    #[test]
    fn light_magics_are_commented() {
        assert_eq!(
            to_text(&Cell::code("%matplotlib inline"), "light", FormatKind::Light),
            vec!["# %matplotlib inline"]
        );
    }

    #[test]
    fn nomarker_never_writes_markers() {
        let text = to_text(&tagged(Cell::code("x = 1")), "nomarker", FormatKind::Nomarker);
        assert_eq!(text, vec!["x = 1"]);
    }

    #[test]
    fn end_marker_dropped_before_next_marker() {
        let fmt = JupytextFormat::with_extension(".py").named("light");
        let mut exporter = CellExporter::new(&tagged(Cell::code("x = 1")), "python", &fmt, FormatKind::Light, None);
        let text = exporter.cell_to_text().expect("cell to text");
        let next = vec!["# +".to_string(), "y = 2".to_string(), "# -".to_string()];
        let text = exporter.remove_eoc_marker(text, &next);
        assert_eq!(text, vec!["# + tags=[\"parameters\"]", "x = 1"]);
    }

    #[test]
    fn percent_code_cell() {
        assert_eq!(to_text(&Cell::code("x = 1"), "percent", FormatKind::Percent), vec!["# %%", "x = 1"]);
    }

    #[test]
    fn percent_markdown_cell() {
        assert_eq!(
            to_text(&Cell::markdown("Some text"), "percent", FormatKind::Percent),
            vec!["# %% [markdown]", "# Some text"]
        );
    }

    #[test]
    fn percent_marker_lines_in_code_are_not_escaped() {
        let cell = Cell::code("x = 1\n# %% not a marker");
        assert_eq!(
            to_text(&cell, "percent", FormatKind::Percent),
            vec!["# %%", "x = 1", "# %% not a marker"]
        );
    }

    #[test]
    fn percent_raw_cell() {
        assert_eq!(to_text(&Cell::raw("raw"), "percent", FormatKind::Percent), vec!["# %% [raw]", "# raw"]);
    }

    #[test]
    fn percent_empty_cell() {
        assert_eq!(to_text(&Cell::code(""), "percent", FormatKind::Percent), vec!["# %%"]);
    }

    #[test]
    fn percent_title_and_tags() {
        let mut metadata = Metadata::new();
        metadata.insert("title".into(), json!("Imports"));
        metadata.insert("tags".into(), json!(["a"]));
        let cell = Cell::code("import os").with_metadata(metadata);
        assert_eq!(
            to_text(&cell, "percent", FormatKind::Percent),
            vec!["# %% Imports tags=[\"a\"]", "import os"]
        );
    }

    #[test]
    fn hydrogen_keeps_magics() {
        assert_eq!(
            to_text(&Cell::code("%matplotlib inline"), "hydrogen", FormatKind::Hydrogen),
            vec!["# %%", "%matplotlib inline"]
        );
    }

    #[test]
    fn triple_quoted_markdown_in_percent_scripts() {
        let mut fmt = JupytextFormat::with_extension(".py").named("percent");
        fmt.options.cell_markers = Some("\"\"\"".to_string());
        let mut exporter = CellExporter::new(&Cell::markdown("Text"), "python", &fmt, FormatKind::Percent, None);
        let text = exporter.cell_to_text().expect("cell to text");
        assert_eq!(text, vec!["# %% [markdown]", "\"\"\"\nText\n\"\"\""]);
    }
}
