use super::CellExporter;
use crate::cell_metadata::{is_active, metadata_to_text};
use crate::cell_reader::CellReader;
use crate::formats::FormatKind;
use crate::magics::comment_magic;
use crate::types::{CellType, Result};
use serde_json::Value;

/// A fence long enough to hold code that contains fences itself.
fn three_backticks_or_more(lines: &[String]) -> String {
    let mut delimiter = "```".to_string();
    for line in lines {
        let Some(rest) = line.strip_prefix(delimiter.as_str()) else {
            continue;
        };
        let extra = rest.chars().take_while(|c| *c == '`').count();
        delimiter.push_str(&"`".repeat(extra + 1));
    }
    delimiter
}

impl CellExporter {
    pub(super) fn markdown_cell_to_text(&mut self) -> Result<Vec<String>> {
        if self.cell_type != CellType::Markdown {
            return Ok(self.markdown_code_to_text());
        }

        // protect the cell when it would not read back as a single Markdown cell
        let protect = if !self.metadata.is_empty() {
            true
        } else {
            let read = CellReader::new(&self.fmt, FormatKind::Markdown, None)?.read(&self.source)?;
            read.next_position < self.source.len() || read.cell.cell_type != self.cell_type
        };
        if protect {
            let region = match self.metadata.shift_remove("region_name") {
                Some(Value::String(name)) => name,
                _ => "region".to_string(),
            };
            return Ok(self.html_comment(&region));
        }
        Ok(self.source.clone())
    }

    /// Wrap the cell in `<!-- #region -->` comments.
    fn html_comment(&self, code: &str) -> Vec<String> {
        let region_start = if self.metadata.is_empty() {
            format!("<!-- #{code} -->")
        } else {
            format!(
                "<!-- #{code} {} -->",
                metadata_to_text(None, &self.metadata, self.cell_metadata_json)
            )
        };
        let mut lines = vec![region_start];
        lines.extend(self.source.iter().cloned());
        lines.push(format!("<!-- #end{code} -->"));
        lines
    }

    fn markdown_code_to_text(&mut self) -> Vec<String> {
        let mut source = self.source.clone();
        comment_magic(&mut source, &self.language, self.comment_magics, true);

        if self.metadata.get("active") == Some(&Value::String(String::new())) {
            self.metadata.shift_remove("active");
        }
        if let Some(Value::String(language)) = self.metadata.shift_remove("language") {
            self.language = language;
        }
        if self.cell_type == CellType::Raw && !is_active(&self.ext, &self.metadata, false) {
            return self.html_comment("raw");
        }

        let options = metadata_to_text(Some(&self.language), &self.metadata, false);
        let delimiter = three_backticks_or_more(&self.source);
        let mut lines = vec![format!("{delimiter}{options}")];
        lines.extend(source);
        lines.push(delimiter);
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::three_backticks_or_more;
    use crate::cell_to_text::CellExporter;
    use crate::formats::{FormatKind, JupytextFormat};
    use crate::types::{Cell, Metadata};
    use serde_json::json;

    fn to_text(cell: &Cell) -> Vec<String> {
        let fmt = JupytextFormat::with_extension(".md").named("markdown");
        CellExporter::new(cell, "python", &fmt, FormatKind::Markdown, None)
            .cell_to_text()
            .expect("cell to text")
    }

    #[test]
    fn fences_grow_with_content() {
        let lines: Vec<String> = vec!["```python".into(), "x".into(), "```".into()];
        assert_eq!(three_backticks_or_more(&lines), "````");
        assert_eq!(three_backticks_or_more(&["x".to_string()]), "```");
    }

    #[test]
    fn code_cell_in_a_fence() {
        assert_eq!(to_text(&Cell::code("1 + 1")), vec!["```python", "1 + 1", "```"]);
    }

    #[test]
    fn code_cell_options() {
        let mut metadata = Metadata::new();
        metadata.insert("tags".into(), json!(["parameters"]));
        let cell = Cell::code("x = 1").with_metadata(metadata);
        assert_eq!(to_text(&cell)[0], "```python tags=[\"parameters\"]");
    }

    #[test]
    fn plain_markdown_is_written_as_is() {
        assert_eq!(to_text(&Cell::markdown("# Title\n\nText")), vec!["# Title", "", "Text"]);
    }

    #[test]
    fn markdown_that_would_split_is_protected() {
        let text = to_text(&Cell::markdown("Part one\n\n\nPart two"));
        assert_eq!(text.first().map(String::as_str), Some("<!-- #region -->"));
        assert_eq!(text.last().map(String::as_str), Some("<!-- #endregion -->"));
    }

    #[test]
    fn raw_cells_use_raw_regions() {
        assert_eq!(to_text(&Cell::raw("raw")), vec!["<!-- #raw -->", "raw", "<!-- #endraw -->"]);
    }
}
