//! Markdown documents: code cells are fenced code blocks with a Jupyter
//! language, Markdown and raw cells can be delimited with
//! `<!-- #region -->` and `<!-- #raw -->` comments.

use super::{CellReader, CellState, is_blank};
use crate::cell_metadata::{is_json_metadata, text_to_metadata};
use crate::languages::jupyter_languages_any_case;
use crate::stringparser::StringParser;
use crate::types::{CellType, Metadata, NbTextError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static START_REGION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^<!--\s*#(region|markdown|md|raw)(.*)-->\s*$").expect("valid region regex")
});
static END_CODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^```\s*$").expect("valid fence regex"));

pub(super) fn default_end_code_re() -> Regex {
    END_CODE_RE.clone()
}

fn regex(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| NbTextError::InvalidFormat(e.to_string()))
}

#[derive(Debug, Clone)]
pub(super) struct MarkdownPatterns {
    start_code_re: Regex,
    non_jupyter_code_re: Regex,
    /// Markdown 1.0 and 1.1 made a code cell of every fenced block.
    legacy: bool,
}

impl MarkdownPatterns {
    pub(super) fn new(format_version: Option<&str>) -> Result<Self> {
        if matches!(format_version, Some("1.0" | "1.1")) {
            return Ok(Self {
                start_code_re: regex(r"^```(.*)")?,
                non_jupyter_code_re: regex(r"^```\{")?,
                legacy: true,
            });
        }
        let languages: Vec<String> = jupyter_languages_any_case()
            .iter()
            .map(|language| regex::escape(language))
            .collect();
        Ok(Self {
            start_code_re: regex(&format!(r"^```(`*)(\s*)({})($|\s.*$)", languages.join("|")))?,
            non_jupyter_code_re: regex(r"^```")?,
            legacy: false,
        })
    }

    /// The language and metadata of a code block start, if `line` is one.
    /// Sets the pattern that closes the block.
    fn code_options(&self, state: &mut CellState, line: &str) -> Option<(String, Metadata)> {
        let caps = self.start_code_re.captures(line)?;
        let group = |i: usize| caps.get(i).map_or("", |m| m.as_str());
        let options = if self.legacy {
            state.end_code_re = Some(default_end_code_re());
            group(1).to_string()
        } else {
            state.end_code_re = Regex::new(&format!("^```{}", regex::escape(group(1)))).ok();
            [group(2), group(3), group(4)].join(" ")
        };
        state.cell_metadata_json |= is_json_metadata(&options);
        Some(text_to_metadata(&options, false))
    }
}

fn is_noeval(metadata: &Metadata) -> bool {
    metadata.get(".noeval") == Some(&Value::Null)
}

impl CellReader {
    pub(super) fn markdown_option_line(
        &self,
        state: &mut CellState,
        patterns: &MarkdownPatterns,
        line: &str,
    ) -> Result<()> {
        if let Some(caps) = START_REGION_RE.captures(line) {
            let region_name = caps.get(1).map_or("", |m| m.as_str());
            let options = caps.get(2).map_or("", |m| m.as_str());
            state.in_region = true;
            state.end_region_re = Some(regex(&format!(r"^<!--\s*#end{region_name}\s*-->\s*$"))?);
            state.cell_metadata_json |= is_json_metadata(options);

            let (title, mut metadata) = text_to_metadata(options, true);
            state.cell_type = Some(if region_name == "raw" { CellType::Raw } else { CellType::Markdown });
            if !title.is_empty() {
                metadata.insert("title".to_string(), Value::String(title));
            }
            if matches!(region_name, "markdown" | "md") {
                metadata.insert("region_name".to_string(), Value::String(region_name.to_string()));
            }
            state.metadata = Some(metadata);
        } else if let Some((language, metadata)) = patterns.code_options(state, line) {
            // a code block with a .noeval attribute is Markdown
            if is_noeval(&metadata) {
                state.cell_type = Some(CellType::Markdown);
                state.metadata = Some(Metadata::new());
                state.language = None;
            } else {
                state.language = Some(language).filter(|l| !l.is_empty());
                state.metadata = Some(metadata);
            }
        }
        Ok(())
    }

    pub(super) fn markdown_find_cell_end(
        &self,
        state: &mut CellState,
        patterns: &MarkdownPatterns,
        lines: &[String],
    ) -> Result<(usize, usize, bool)> {
        let total = lines.len();
        if state.in_region {
            if let Some(end_region_re) = state.end_region_re.as_ref() {
                if let Some(i) = lines.iter().position(|line| end_region_re.is_match(line)) {
                    return Ok((i, i + 1, true));
                }
            }
        } else if state.metadata.is_none() {
            // Markdown until two consecutive blank lines, outside of code blocks
            state.cell_type = Some(CellType::Markdown);
            let mut prev_blank = 0;
            let mut in_explicit_code_block = false;
            let mut in_indented_code_block = false;

            for (i, line) in lines.iter().enumerate() {
                if in_explicit_code_block && state.end_code_re.as_ref().is_some_and(|re| re.is_match(line)) {
                    in_explicit_code_block = false;
                    continue;
                }
                if prev_blank > 0 && line.starts_with("    ") && !is_blank(line) {
                    in_indented_code_block = true;
                    prev_blank = 0;
                    continue;
                }
                if in_indented_code_block && !is_blank(line) && !line.starts_with("    ") {
                    in_indented_code_block = false;
                }
                if in_indented_code_block || in_explicit_code_block {
                    continue;
                }

                if START_REGION_RE.is_match(line) {
                    return Ok(if i > 1 && prev_blank > 0 { (i - 1, i, false) } else { (i, i, false) });
                }

                if patterns.start_code_re.is_match(line) {
                    if line.starts_with("```{bibliography}") {
                        in_explicit_code_block = true;
                        prev_blank = 0;
                        continue;
                    }
                    if patterns
                        .code_options(state, line)
                        .is_some_and(|(_, metadata)| is_noeval(&metadata))
                    {
                        in_explicit_code_block = true;
                        prev_blank = 0;
                        continue;
                    }
                    return Ok(if i > 1 && prev_blank > 0 { (i - 1, i, false) } else { (i, i, false) });
                }

                if patterns.non_jupyter_code_re.is_match(line) {
                    if prev_blank >= 2 {
                        return Ok((i - 2, i, true));
                    }
                    in_explicit_code_block = true;
                    prev_blank = 0;
                    continue;
                }

                if self.split_at_heading && line.starts_with('#') && prev_blank >= 1 {
                    return Ok((i - 1, i, false));
                }

                if is_blank(line) {
                    prev_blank += 1;
                } else if prev_blank >= 2 {
                    return Ok((i - 2, i, true));
                } else {
                    prev_blank = 0;
                }
            }
        } else {
            state.cell_type = Some(CellType::Code);
            let language = state.language.as_deref().unwrap_or(&self.default_language);
            let mut parser = StringParser::new(Some(language));
            for (i, line) in lines.iter().enumerate().skip(1) {
                if parser.is_quoted() {
                    parser.read_line(line);
                    continue;
                }
                parser.read_line(line);
                if state.end_code_re.as_ref().is_some_and(|re| re.is_match(line)) {
                    return Ok((i, i + 1, true));
                }
            }
        }
        Ok((total, total, false))
    }
}

#[cfg(test)]
mod tests {
    use crate::cell_reader::{CellReader, ReadCell};
    use crate::formats::{FormatKind, JupytextFormat};
    use crate::types::{CellType, split_lines};
    use serde_json::json;

    fn read(text: &str, version: Option<&str>) -> ReadCell {
        let mut fmt = JupytextFormat::with_extension(".md").named("markdown");
        fmt.format_version = version.map(str::to_string);
        let reader = CellReader::new(&fmt, FormatKind::Markdown, Some("python")).expect("reader");
        reader.read(&split_lines(text)).expect("read")
    }

    #[test]
    fn reads_a_code_block() {
        let parsed = read("```python\na = 1\n```\n\nText", None);
        assert_eq!(parsed.cell.cell_type, CellType::Code);
        assert_eq!(parsed.cell.source, "a = 1");
        assert_eq!(parsed.next_position, 4);
    }

    #[test]
    fn markdown_ends_at_code_block() {
        let parsed = read("# Title\n\nSome text\n\n```python\na = 1\n```", None);
        assert_eq!(parsed.cell.cell_type, CellType::Markdown);
        assert_eq!(parsed.cell.source, "# Title\n\nSome text");
        assert_eq!(parsed.next_position, 4);
    }

    #[test]
    fn markdown_ends_at_two_blank_lines() {
        let parsed = read("Paragraph one\n\n\nParagraph two", None);
        assert_eq!(parsed.cell.source, "Paragraph one");
        assert_eq!(parsed.next_position, 3);
    }

    #[test]
    fn non_jupyter_code_blocks_stay_in_markdown() {
        let parsed = read("Text\n\n```\nnot a cell\n```\nMore text", None);
        assert_eq!(parsed.cell.cell_type, CellType::Markdown);
        assert_eq!(parsed.next_position, 6);
    }

    #[test]
    fn reads_a_raw_region() {
        let parsed = read("<!-- #raw -->\nraw text\n<!-- #endraw -->", None);
        assert_eq!(parsed.cell.cell_type, CellType::Raw);
        assert_eq!(parsed.cell.source, "raw text");
        assert_eq!(parsed.next_position, 3);
    }

    #[test]
    fn region_options_become_metadata() {
        let parsed = read("<!-- #region tags=[\"intro\"] -->\nText\n<!-- #endregion -->", None);
        assert_eq!(parsed.cell.cell_type, CellType::Markdown);
        assert_eq!(parsed.cell.metadata.get("tags"), Some(&json!(["intro"])));
    }

    #[test]
    fn noeval_blocks_are_markdown() {
        let parsed = read("```python .noeval\na = 1\n```", None);
        assert_eq!(parsed.cell.cell_type, CellType::Markdown);
        assert_eq!(parsed.cell.source, "```python .noeval\na = 1\n```");
    }

    #[test]
    fn legacy_versions_read_unknown_blocks_as_raw() {
        let parsed = read("```\nsome text\n```", Some("1.0"));
        assert_eq!(parsed.cell.cell_type, CellType::Raw);
        assert_eq!(parsed.cell.source, "some text");
    }
}
