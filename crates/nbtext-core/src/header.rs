//! # Header
//!
//! Text notebooks start with an optional `#!` line, an optional encoding
//! line and a YAML block fenced by (commented) `---` lines:
//!
//! ```text
//! # ---
//! # jupyter:
//! #   kernelspec:
//! #     name: python3
//! # ---
//! ```
//!
//! Entries under `jupyter:` are the notebook metadata. Other entries are
//! kept in a leading raw cell, or under `jupytext.root_level_metadata`.

use crate::formats::{FormatDescription, JupytextFormat};
use crate::json::{from_yaml, recursive_update, to_yaml};
use crate::languages::{comment_lines, default_language_from_metadata_and_ext, script_for_extension};
use crate::metadata_filter::{MetadataFilter, filter_metadata};
use crate::pep8::pep8_lines_between_cells;
use crate::primitives::{DEFAULT_NOTEBOOK_METADATA, NBTEXT_VERSION};
use crate::types::{Cell, CellType, Metadata, NbTextError, Result, section, section_mut, split_lines};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Value, json};
use std::collections::BTreeSet;

static HEADER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^---\s*$").expect("valid header regex"));
static BLANK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*$").expect("valid blank regex"));
static JUPYTER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^jupyter\s*:\s*$").expect("valid jupyter regex"));
static LEFTSPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s").expect("valid indent regex"));

const UTF8_HEADER: &str = " -*- coding: utf-8 -*-";

/// Remove the comment prefix (and the space that follows it) and the
/// comment suffix of a line.
#[must_use]
pub fn uncomment_line(line: &str, prefix: &str, suffix: &str) -> String {
    let mut line = line;
    if !prefix.is_empty() {
        line = line
            .strip_prefix(&format!("{prefix} "))
            .or_else(|| line.strip_prefix(prefix))
            .unwrap_or(line);
    }
    if !suffix.is_empty() {
        line = line
            .strip_suffix(&format!("{suffix} "))
            .or_else(|| line.strip_suffix(suffix))
            .unwrap_or(line);
    }
    line.to_string()
}

// =============================================================================
// WRITING
// =============================================================================

/// The `#!` and encoding lines of a script. The executable and encoding are
/// taken out of `metadata`. Non-python scripts with non-ASCII content get
/// an explicit UTF-8 encoding line.
pub fn encoding_and_executable(cells: &[Cell], metadata: &mut Metadata, ext: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let Some(script) = script_for_extension(ext) else {
        return lines;
    };

    if let Some(Value::String(executable)) = crate::types::pop_from_section(metadata, "jupytext", "executable") {
        lines.push(format!("#!{}", executable));
    }

    if let Some(Value::String(encoding)) = crate::types::pop_from_section(metadata, "jupytext", "encoding") {
        lines.push(encoding);
    } else if default_language_from_metadata_and_ext(metadata, ext, false).as_deref() != Some("python")
        && cells.iter().any(|cell| !cell.source.is_ascii())
    {
        lines.push(format!("{}{}", script.comment, UTF8_HEADER));
    }
    lines
}

/// Record the text representation in the notebook metadata (unless
/// `insert_version_number` is off), then apply the notebook metadata filter.
pub fn insert_jupytext_info_and_filter_metadata(
    metadata: &mut Metadata,
    fmt: &JupytextFormat,
    text_format: &FormatDescription,
    insert_version_number: bool,
    unsupported_keys: Option<&mut BTreeSet<String>>,
) -> Metadata {
    if insert_version_number {
        section_mut(metadata, "jupytext").insert(
            "text_representation".to_string(),
            json!({
                "extension": fmt.extension,
                "format_name": text_format.format_name,
                "format_version": text_format.current_version,
                "jupytext_version": NBTEXT_VERSION,
            }),
        );
    }

    if section(metadata, "jupytext").is_some_and(Metadata::is_empty) {
        metadata.shift_remove("jupytext");
    }

    let user_filter = fmt
        .options
        .notebook_metadata_filter
        .as_deref()
        .map(MetadataFilter::parse)
        .unwrap_or_default();
    filter_metadata(
        metadata,
        &user_filter,
        &MetadataFilter::parse(DEFAULT_NOTEBOOK_METADATA),
        unsupported_keys,
    )
}

/// The commented header lines of a notebook, and the number of blank lines
/// that follow the header when it is known.
///
/// A leading raw cell fenced with `---` becomes the YAML header and is
/// removed from `cells`.
pub fn metadata_and_cell_to_header(
    cells: &mut Vec<Cell>,
    metadata: &mut Metadata,
    text_format: &FormatDescription,
    fmt: &JupytextFormat,
    insert_version_number: bool,
    unsupported_keys: Option<&mut BTreeSet<String>>,
) -> Result<(Vec<String>, Option<usize>)> {
    let mut header: Vec<String> = Vec::new();
    let mut lines_to_next_cell = None;
    let mut root_level_metadata = Metadata::new();

    if !fmt.options.root_level_metadata_as_raw_cell.unwrap_or(true) {
        if let Some(Value::Object(root)) = crate::types::pop_from_section(metadata, "jupytext", "root_level_metadata") {
            root_level_metadata = root;
        }
    } else if let Some(cell) = cells.first().filter(|c| c.cell_type == CellType::Raw) {
        let lines = split_lines(cell.source.trim_matches(['\n', '\t', ' ']));
        if lines.len() >= 2
            && HEADER_RE.is_match(&lines[0])
            && HEADER_RE.is_match(&lines[lines.len() - 1])
        {
            header = lines[1..lines.len() - 1].to_vec();
            lines_to_next_cell = cell
                .metadata
                .get("lines_to_next_cell")
                .and_then(Value::as_u64)
                .map(|n| n as usize);
            cells.remove(0);
        }
    }

    let metadata = insert_jupytext_info_and_filter_metadata(
        metadata,
        fmt,
        text_format,
        insert_version_number,
        unsupported_keys,
    );
    if !metadata.is_empty() {
        root_level_metadata.insert("jupyter".to_string(), Value::Object(metadata));
    }
    if !root_level_metadata.is_empty() {
        header.extend(split_lines(&to_yaml(&root_level_metadata)?));
    }

    if !header.is_empty() {
        let mut fenced = vec!["---".to_string()];
        fenced.append(&mut header);
        fenced.push("---".to_string());
        header = fenced;

        if fmt.options.hide_notebook_metadata.unwrap_or(false) && text_format.is_markdown() {
            let mut hidden = vec!["<!--".to_string(), String::new()];
            hidden.append(&mut header);
            hidden.extend(["".to_string(), "-->".to_string()]);
            header = hidden;
        }
    }

    Ok((
        comment_lines(&header, text_format.header_prefix, text_format.header_suffix),
        lines_to_next_cell,
    ))
}

// =============================================================================
// READING
// =============================================================================

/// What the header of a text notebook contains.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TextHeader {
    /// Notebook metadata, including the encoding and executable lines.
    pub metadata: Metadata,
    /// Did the header have a `jupyter:` section?
    pub jupyter_found: bool,
    /// Raw cell holding the YAML entries outside of `jupyter:`.
    pub cell: Option<Cell>,
    /// Index of the first line after the header.
    pub next_line: usize,
}

fn yaml_object(text: &str, what: &str) -> Result<Metadata> {
    match from_yaml(text)? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Metadata::new()),
        other => Err(NbTextError::InvalidHeader(format!(
            "The {} should be a mapping, not {}",
            what, other
        ))),
    }
}

/// Parse the header of a text notebook.
pub fn header_to_metadata_and_cell(
    lines: &[String],
    header_prefix: &str,
    header_suffix: &str,
    ext: &str,
    root_level_metadata_as_raw_cell: bool,
) -> Result<TextHeader> {
    let mut header: Vec<String> = Vec::new();
    let mut jupyter: Vec<String> = Vec::new();
    let mut in_jupyter = false;
    let mut in_html_div = false;

    let mut start = 0;
    let mut started = false;
    let mut ended = false;
    let mut metadata = Metadata::new();
    let mut i = 0;

    let comment = if header_prefix == "#'" { "#" } else { header_prefix };
    let encoding_re = Regex::new(&format!(
        r"^[ \t\f]*{}.*?coding[:=][ \t]*([-_.a-zA-Z0-9]+)",
        regex::escape(comment)
    ))
    .map_err(|e| NbTextError::InvalidHeader(e.to_string()))?;

    for (index, line) in lines.iter().enumerate() {
        i = index;
        if index == 0 {
            if let Some(executable) = line.strip_prefix("#!") {
                section_mut(&mut metadata, "jupytext")
                    .insert("executable".to_string(), Value::String(executable.to_string()));
                start = index + 1;
                continue;
            }
        }
        if index == 0 || (index == 1 && !encoding_re.is_match(&lines[0])) {
            if let Some(encoding) = encoding_re.captures(line) {
                if encoding.get(1).map(|m| m.as_str()) != Some("utf-8") {
                    return Err(NbTextError::InvalidHeader(
                        "Encodings other than utf-8 are not supported".to_string(),
                    ));
                }
                section_mut(&mut metadata, "jupytext")
                    .insert("encoding".to_string(), Value::String(line.clone()));
                start = index + 1;
                continue;
            }
        }
        if !line.starts_with(header_prefix) {
            break;
        }
        if comment.is_empty() && line.trim().starts_with("<!--") {
            in_html_div = true;
            continue;
        }

        if in_html_div {
            if ended && line.contains("-->") {
                break;
            }
            if !started && line.trim().is_empty() {
                continue;
            }
        }

        let line = uncomment_line(line, header_prefix, header_suffix);
        if HEADER_RE.is_match(&line) {
            if !started {
                started = true;
                continue;
            }
            ended = true;
            if in_html_div {
                continue;
            }
            break;
        }

        // something else than a YAML header
        if !started && !line.trim().is_empty() {
            break;
        }

        if JUPYTER_RE.is_match(&line) {
            in_jupyter = true;
        } else if !line.is_empty() && !LEFTSPACE_RE.is_match(&line) {
            in_jupyter = false;
        }

        if in_jupyter {
            jupyter.push(line);
        } else {
            header.push(line);
        }
    }

    if !ended {
        return Ok(TextHeader {
            metadata,
            jupyter_found: false,
            cell: None,
            next_line: start,
        });
    }

    let jupyter_found = !jupyter.is_empty();
    if jupyter_found {
        let extra_metadata = metadata;
        let mut document = yaml_object(&jupyter.join("\n"), "YAML header")?;
        metadata = match document.shift_remove("jupyter") {
            Some(Value::Object(map)) => map,
            Some(Value::Null) | None => Metadata::new(),
            Some(other) => {
                return Err(NbTextError::InvalidHeader(format!(
                    "The jupyter section should be a mapping, not {}",
                    other
                )));
            }
        };
        recursive_update(&mut metadata, &extra_metadata, true);
    }

    let lines_to_next_cell = match lines.get(i + 1) {
        Some(next) if BLANK_RE.is_match(&uncomment_line(next, header_prefix, "")) => {
            i += 1;
            1
        }
        _ => 0,
    };

    let mut cell = None;
    if !header.is_empty() {
        if root_level_metadata_as_raw_cell {
            let mut source = vec!["---".to_string()];
            source.extend(header);
            source.push("---".to_string());
            let mut raw = Cell::raw(source.join("\n"));
            let following = lines.get(i + 1..).unwrap_or_default();
            if lines_to_next_cell != pep8_lines_between_cells(&["---".to_string()], following, ext) {
                raw.metadata
                    .insert("lines_to_next_cell".to_string(), json!(lines_to_next_cell));
            }
            cell = Some(raw);
        } else {
            let root_level_metadata = from_yaml(&header.join("\n"))?;
            section_mut(&mut metadata, "jupytext")
                .insert("root_level_metadata".to_string(), root_level_metadata);
        }
    }

    Ok(TextHeader {
        metadata,
        jupyter_found,
        cell,
        next_line: i + 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::get_format_implementation;

    fn lines(text: &str) -> Vec<String> {
        split_lines(text)
    }

    #[test]
    fn uncomment() {
        assert_eq!(uncomment_line("# ---", "#", ""), "---");
        assert_eq!(uncomment_line("#---", "#", ""), "---");
        assert_eq!(uncomment_line("(* --- *)", "(*", "*)"), "--- ");
        assert_eq!(uncomment_line("text", "", ""), "text");
    }

    #[test]
    fn read_cpp_header() {
        let text = "// ---\n// jupyter:\n//   kernelspec:\n//     display_name: C++14\n//     language: C++14\n//     name: xeus-cling-cpp14\n// ---\n\n// %% [markdown]\n";
        let parsed = header_to_metadata_and_cell(&lines(text), "//", "", ".cpp", true).unwrap_or_default();
        assert!(parsed.jupyter_found);
        assert_eq!(parsed.metadata["kernelspec"]["name"], json!("xeus-cling-cpp14"));
        assert_eq!(parsed.next_line, 8);
        assert!(parsed.cell.is_none());
    }

    #[test]
    fn no_header() {
        let parsed = header_to_metadata_and_cell(&lines("1 + 1\n"), "#", "", ".py", true).unwrap_or_default();
        assert!(parsed.metadata.is_empty());
        assert_eq!(parsed.next_line, 0);
    }

    #[test]
    fn executable_and_encoding() {
        let text = "#!/usr/bin/env python\n# -*- coding: utf-8 -*-\n1 + 1\n";
        let parsed = header_to_metadata_and_cell(&lines(text), "#", "", ".py", true).unwrap_or_default();
        assert_eq!(parsed.metadata["jupytext"]["executable"], json!("/usr/bin/env python"));
        assert_eq!(parsed.metadata["jupytext"]["encoding"], json!("# -*- coding: utf-8 -*-"));
        assert_eq!(parsed.next_line, 2);

        let latin = lines("# -*- coding: latin-1 -*-\n1 + 1\n");
        assert!(header_to_metadata_and_cell(&latin, "#", "", ".py", true).is_err());
    }

    #[test]
    fn root_level_entries_become_a_raw_cell() {
        let text = "---\ntitle: A title\njupyter:\n  kernelspec:\n    name: python3\n---\n\nText\n";
        let parsed = header_to_metadata_and_cell(&lines(text), "", "", ".md", true).unwrap_or_default();
        assert_eq!(parsed.cell.map(|c| c.source), Some("---\ntitle: A title\n---".to_string()));
        assert_eq!(parsed.metadata["kernelspec"]["name"], json!("python3"));
        assert_eq!(parsed.next_line, 7);

        let parsed = header_to_metadata_and_cell(&lines(text), "", "", ".md", false).unwrap_or_default();
        assert!(parsed.cell.is_none());
        assert_eq!(parsed.metadata["jupytext"]["root_level_metadata"], json!({"title": "A title"}));
    }

    #[test]
    fn hidden_markdown_header() {
        let text = "<!--\n\n---\njupyter:\n  kernelspec:\n    name: python3\n---\n\n-->\n\nText\n";
        let parsed = header_to_metadata_and_cell(&lines(text), "", "", ".md", true).unwrap_or_default();
        assert_eq!(parsed.metadata["kernelspec"]["name"], json!("python3"));
        assert_eq!(parsed.next_line, 10);
    }

    #[test]
    fn write_header() {
        let mut metadata = json!({"kernelspec": {"name": "python3", "language": "python"}, "widgets": {}})
            .as_object()
            .cloned()
            .unwrap_or_default();
        let fmt = JupytextFormat::with_extension(".py").named("percent");
        let text_format = get_format_implementation(".py", Some("percent"));
        let Ok(text_format) = text_format else {
            return;
        };
        let mut cells = vec![Cell::raw("---\ntitle: x\n---"), Cell::code("1 + 1")];
        let (header, lines_to_next_cell) =
            metadata_and_cell_to_header(&mut cells, &mut metadata, text_format, &fmt, false, None)
                .unwrap_or_default();
        assert_eq!(
            header,
            vec!["# ---", "# title: x", "# jupyter:", "#   kernelspec:", "#     language: python", "#     name: python3", "# ---"]
        );
        assert_eq!(lines_to_next_cell, None);
        assert_eq!(cells.len(), 1);
    }

    #[test]
    fn executable_and_utf8_lines() {
        let mut metadata = json!({"jupytext": {"executable": "/usr/bin/env Rscript"}, "kernelspec": {"language": "R"}})
            .as_object()
            .cloned()
            .unwrap_or_default();
        let cells = vec![Cell::code("x <- \"\u{e9}\"")];
        let lines = encoding_and_executable(&cells, &mut metadata, ".R");
        assert_eq!(lines, vec!["#!/usr/bin/env Rscript", "# -*- coding: utf-8 -*-"]);
        assert!(!metadata.contains_key("jupytext"));
    }
}
