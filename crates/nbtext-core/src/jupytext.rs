//! # Conversion
//!
//! Read and write notebooks as `.ipynb` files or as text documents.
//!
//! ## Reading
//!
//! ```text
//! text ──► header ──► cell reader, until the lines are exhausted ──► notebook
//!                      (Markdown, light, nomarker, percent, hydrogen)
//! ```
//!
//! ## Writing
//!
//! Cells are exported one by one, then concatenated from the last to the
//! first: the number of blank lines after a cell depends on the text that
//! follows it.

use crate::cell_reader::{CellReader, ReadCell};
use crate::cell_to_text::CellExporter;
use crate::config::JupytextConfiguration;
use crate::formats::ipynb::{reads_ipynb, writes_ipynb};
use crate::formats::{
    FormatDescription, JupytextFormat, VALID_FORMAT_OPTIONS, check_auto_ext, divine_format, format_name_for_ext,
    get_format_implementation, guess_format, is_markdown_extension, long_form_one_format,
    read_format_from_metadata, rearrange_jupytext_metadata, update_jupytext_formats_metadata,
};
use crate::header::{encoding_and_executable, header_to_metadata_and_cell, metadata_and_cell_to_header};
use crate::languages::{default_language_from_metadata_and_ext, is_script_extension, set_main_and_cell_language};
use crate::metadata_filter::update_metadata_filters;
use crate::paired_paths::split_extension;
use crate::pep8::pep8_lines_between_cells;
use crate::primitives::{MAX_DOCUMENT_SIZE, NBFORMAT, NBFORMAT_MINOR};
use crate::types::{Metadata, NbTextError, Notebook, Result, section, section_mut, split_lines};
use serde_json::Value;
use std::collections::BTreeSet;
use std::io::{Read, Write};
use std::path::Path;
use tracing::{debug, warn};

// =============================================================================
// TEXT NOTEBOOK CONVERTER
// =============================================================================

/// Reads or writes a notebook in one text format.
struct TextNotebookConverter<'a> {
    fmt: JupytextFormat,
    config: Option<&'a JupytextConfiguration>,
    implementation: &'static FormatDescription,
}

impl<'a> TextNotebookConverter<'a> {
    fn new(fmt: JupytextFormat, config: Option<&'a JupytextConfiguration>) -> Result<Self> {
        let implementation = get_format_implementation(&fmt.extension, fmt.name())?;
        Ok(Self {
            fmt,
            config,
            implementation,
        })
    }

    fn insert_version_number(&self) -> bool {
        self.config.is_none_or(|c| c.insert_version_number)
    }

    /// Complete the format options with those of the notebook, and record
    /// the options in the notebook metadata.
    ///
    /// When writing, the configuration comes first, since options hidden by
    /// a metadata filter could not be edited in the text file. When reading,
    /// the configuration only provides defaults.
    fn update_fmt_with_notebook_options(&mut self, metadata: &mut Metadata, read: bool) -> Result<()> {
        if !read {
            if let Some(config) = self.config {
                config.set_default_format_options(&mut self.fmt.options, false);
            }
        }

        if let Some(jupytext) = section(metadata, "jupytext") {
            for key in VALID_FORMAT_OPTIONS {
                if let Some(value) = jupytext.get(key) {
                    self.fmt.options.set_default(key, value)?;
                }
            }
        }

        if read {
            if let Some(config) = self.config {
                config.set_default_format_options(&mut self.fmt.options, true);
            }
        }

        let entries = self.fmt.options.entries();
        if !entries.is_empty() {
            let jupytext = section_mut(metadata, "jupytext");
            for (key, value) in entries {
                jupytext.insert(key.to_string(), value);
            }
        }

        // the format version documented in the header applies to this format
        let file_fmt = section(metadata, "jupytext").and_then(|j| section(j, "text_representation"));
        if let Some(file_fmt) = file_fmt {
            let file_ext = file_fmt.get("extension").and_then(Value::as_str);
            let file_name = file_fmt.get("format_name").and_then(Value::as_str);
            if file_ext == Some(self.fmt.extension.as_str()) && file_name == self.fmt.name() {
                self.fmt.format_version = file_fmt.get("format_version").and_then(Value::as_str).map(str::to_string);
                self.fmt.jupytext_version = file_fmt
                    .get("jupytext_version")
                    .and_then(Value::as_str)
                    .map(str::to_string);
            }
        }
        Ok(())
    }

    fn reads(&mut self, text: &str) -> Result<Notebook> {
        let implementation = self.implementation;
        let lines = split_lines(text);
        let root_level_metadata_as_raw_cell = self
            .fmt
            .options
            .root_level_metadata_as_raw_cell
            .unwrap_or_else(|| self.config.is_none_or(|c| c.root_level_metadata_as_raw_cell));

        let header = header_to_metadata_and_cell(
            &lines,
            implementation.header_prefix,
            implementation.header_suffix,
            implementation.extension,
            root_level_metadata_as_raw_cell,
        )?;
        let mut metadata = header.metadata;
        let default_language = default_language_from_metadata_and_ext(&mut metadata, implementation.extension, false);
        self.update_fmt_with_notebook_options(&mut metadata, true)?;

        let mut cells = Vec::new();
        if let Some(cell) = header.cell {
            cells.push(cell);
        }

        let reader = CellReader::new(&self.fmt, implementation.kind, default_language.as_deref())?;
        let mut position = header.next_line;
        let mut cell_metadata_json = false;
        while position < lines.len() {
            let read = reader.read(&lines[position..])?;
            position += consumed_lines(&read, &lines[position..])?;
            cell_metadata_json |= read.cell_metadata_json;
            cells.push(read.cell);
        }
        debug!(
            format = implementation.format_name,
            cells = cells.len(),
            "read text notebook"
        );

        let custom_cell_magics: Vec<String> = self
            .fmt
            .options
            .custom_cell_magics
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .filter(|magic| !magic.is_empty())
            .map(str::to_string)
            .collect();
        set_main_and_cell_language(&mut metadata, &mut cells, implementation.extension, &custom_cell_magics);

        let cell_metadata: BTreeSet<String> = cells
            .iter()
            .flat_map(|cell| cell.metadata.keys().cloned())
            .collect();
        let cell_metadata: Vec<String> = cell_metadata.into_iter().collect();
        update_metadata_filters(&mut metadata, header.jupyter_found, &cell_metadata);

        if cell_metadata_json {
            section_mut(&mut metadata, "jupytext")
                .entry("cell_metadata_json")
                .or_insert(Value::Bool(true));
        }

        Ok(Notebook::new(cells, metadata))
    }

    fn writes(&mut self, nb: &Notebook, mut metadata: Metadata) -> Result<String> {
        let implementation = self.implementation;
        let ext = implementation.extension;
        let default_language = default_language_from_metadata_and_ext(&mut metadata, ext, true)
            .unwrap_or_else(|| "python".to_string());
        self.update_fmt_with_notebook_options(&mut metadata, false)?;

        let mut cells = nb.cells.clone();
        let mut header = encoding_and_executable(&cells, &mut metadata, ext);
        let mut unsupported_keys = BTreeSet::new();
        let (header_content, header_lines_to_next_cell) = metadata_and_cell_to_header(
            &mut cells,
            &mut metadata,
            implementation,
            &self.fmt,
            self.insert_version_number(),
            Some(&mut unsupported_keys),
        )?;
        header.extend(header_content.iter().cloned());

        let mut exporters: Vec<CellExporter> = cells
            .iter()
            .map(|cell| {
                CellExporter::new(
                    cell,
                    &default_language,
                    &self.fmt,
                    implementation.kind,
                    Some(&mut unsupported_keys),
                )
            })
            .collect();
        warn_on_unsupported_keys(&unsupported_keys);

        let texts = exporters
            .iter_mut()
            .map(CellExporter::cell_to_text)
            .collect::<Result<Vec<_>>>()?;

        let split_at_heading = self.fmt.options.split_at_heading.unwrap_or(false);
        let starts_with = |text: &[String], prefix: &str| text.first().is_some_and(|line| line.starts_with(prefix));

        // concatenate from the last cell, so that blank lines depend on the next cell
        let mut lines: Vec<String> = Vec::new();
        for i in (0..exporters.len()).rev() {
            let mut text = exporters[i].remove_eoc_marker(texts[i].clone(), &lines);
            let blank_lines = exporters[i]
                .lines_to_next_cell()
                .unwrap_or_else(|| pep8_lines_between_cells(&text, &lines, ext));
            text.extend(std::iter::repeat_n(String::new(), blank_lines));

            // consecutive Markdown cells without region markers are separated
            // by two blank lines
            if is_markdown_extension(ext) && !exporters[i].is_code() {
                let separate = exporters.get(i + 1).is_some_and(|next| !next.is_code())
                    && !starts_with(&texts[i], "<!-- #")
                    && !starts_with(&texts[i + 1], "<!-- #")
                    && (!split_at_heading || !starts_with(&texts[i + 1], "#"));
                if separate {
                    text.push(String::new());
                }
            }

            text.append(&mut lines);
            lines = text;
        }

        let header_blank_lines =
            header_lines_to_next_cell.unwrap_or_else(|| pep8_lines_between_cells(&header_content, &lines, ext));
        header.extend(std::iter::repeat_n(String::new(), header_blank_lines));
        header.append(&mut lines);

        let mut text = header.join("\n");
        if !text.ends_with('\n') {
            text.push('\n');
        }
        Ok(text)
    }
}

fn warn_on_unsupported_keys(unsupported_keys: &BTreeSet<String>) {
    if !unsupported_keys.is_empty() {
        warn!(
            "The following metadata cannot be exported to the text notebook: {:?}",
            unsupported_keys
        );
    }
}

// =============================================================================
// READS / WRITES
// =============================================================================

/// Read a notebook from a string. Without `fmt`, the format is guessed
/// from the content.
pub fn reads(text: &str, fmt: Option<&JupytextFormat>, config: Option<&JupytextConfiguration>) -> Result<Notebook> {
    let mut fmt = match fmt {
        Some(fmt) if !fmt.extension.is_empty() => fmt.clone(),
        _ => long_form_one_format(&divine_format(text)?, None, true)?,
    };
    let ext = fmt.extension.clone();

    if ext == ".ipynb" {
        let mut nb = reads_ipynb(text)?;
        rearrange_jupytext_metadata(&mut nb.metadata)?;
        return Ok(nb);
    }

    let format_name = match read_format_from_metadata(text, &ext)?.or_else(|| fmt.format_name.clone()) {
        Some(name) => name,
        None => {
            let (name, options) = guess_format(text, &ext)?;
            for (key, value) in options.entries() {
                fmt.options.set(key, &value)?;
            }
            name
        }
    };
    fmt.format_name = Some(format_name.clone());

    let mut converter = TextNotebookConverter::new(fmt, config)?;
    let insert_version_number = converter.insert_version_number();
    let mut notebook = converter.reads(text)?;
    rearrange_jupytext_metadata(&mut notebook.metadata)?;

    if insert_version_number {
        let jupytext = section_mut(&mut notebook.metadata, "jupytext");
        let text_representation = section_mut(jupytext, "text_representation");
        text_representation.insert("extension".to_string(), Value::String(ext));
        text_representation.insert("format_name".to_string(), Value::String(format_name));
    }
    Ok(notebook)
}

/// Drop `jupytext.text_representation` (and an empty `jupytext` section)
/// from notebook metadata written to an `.ipynb` file.
pub fn drop_text_representation_metadata(metadata: &mut Metadata) {
    crate::types::pop_from_section(metadata, "jupytext", "text_representation");
    if section(metadata, "jupytext").is_some_and(Metadata::is_empty) {
        metadata.shift_remove("jupytext");
    }
}

/// The text, or `.ipynb`, representation of a notebook.
///
/// Scripts without a format name are written in the percent format,
/// unless light cell markers are configured.
pub fn writes(nb: &Notebook, fmt: &JupytextFormat, config: Option<&JupytextConfiguration>) -> Result<String> {
    if nb.nbformat < NBFORMAT {
        return Err(NbTextError::UnsupportedNbformat {
            major: nb.nbformat,
            minor: nb.nbformat_minor,
        });
    }
    if nb.nbformat > NBFORMAT || nb.nbformat_minor > NBFORMAT_MINOR {
        warn!(
            "Notebooks in nbformat version {}.{} have not been tested with this converter",
            nb.nbformat, nb.nbformat_minor
        );
    }

    let mut metadata = nb.metadata.clone();
    rearrange_jupytext_metadata(&mut metadata)?;
    let mut fmt = check_auto_ext(fmt, &metadata, "format")?;
    let ext = fmt.extension.clone();

    if ext == ".ipynb" {
        drop_text_representation_metadata(&mut metadata);
        let nb = Notebook {
            metadata,
            ..nb.clone()
        };
        return writes_ipynb(&nb);
    }

    let mut format_name = fmt.format_name.clone().filter(|n| !n.is_empty());
    if format_name.is_none() {
        format_name = format_name_for_ext(&metadata, &ext, None, false)?;
    }
    if format_name.is_none() && fmt.options.cell_markers.is_none() && is_script_extension(&ext) {
        format_name = Some("percent".to_string());
    }
    if let Some(name) = format_name {
        fmt.format_name = Some(name);
        update_jupytext_formats_metadata(&mut metadata, &fmt)?;
    }

    TextNotebookConverter::new(fmt, config)?.writes(nb, metadata)
}

// =============================================================================
// FILES
// =============================================================================

fn io_error(path: &str, e: std::io::Error) -> NbTextError {
    NbTextError::IoError(format!("{}: {}", path, e))
}

/// Read a notebook from a file, or from stdin when `path` is `-`.
///
/// The extension of `path` completes `fmt`.
pub fn read(path: &str, fmt: Option<&JupytextFormat>, config: Option<&JupytextConfiguration>) -> Result<Notebook> {
    if path == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .map_err(|e| io_error(path, e))?;
        return reads(&text, fmt, config);
    }

    let mut fmt = fmt.cloned().unwrap_or_default();
    fmt.extension = split_extension(path).1;
    let size = std::fs::metadata(path).map_err(|e| io_error(path, e))?.len();
    if size > MAX_DOCUMENT_SIZE {
        return Err(NbTextError::IoError(format!(
            "{}: {} bytes exceeds the maximum document size of {} bytes",
            path, size, MAX_DOCUMENT_SIZE
        )));
    }
    let text = std::fs::read_to_string(path).map_err(|e| io_error(path, e))?;
    debug!(path, "reading notebook");
    reads(&text, Some(&fmt), config)
}

/// Create the directory of a paired file with a prefix.
pub fn create_prefix_dir(path: &str, fmt: &JupytextFormat) -> Result<()> {
    if fmt.prefix.is_none() {
        return Ok(());
    }
    let Some(dir) = Path::new(path).parent().filter(|d| !d.as_os_str().is_empty()) else {
        return Ok(());
    };
    if !dir.is_dir() {
        warn!("creating missing directory {}", dir.display());
        std::fs::create_dir_all(dir).map_err(|e| io_error(&dir.to_string_lossy(), e))?;
    }
    Ok(())
}

/// Write a notebook to a file, or to stdout when `path` is `-`.
pub fn write(
    nb: &Notebook,
    path: &str,
    fmt: Option<&JupytextFormat>,
    config: Option<&JupytextConfiguration>,
) -> Result<()> {
    if path == "-" {
        let fmt = fmt.ok_or_else(|| {
            NbTextError::InvalidFormat("A format is required to write to stdout".to_string())
        })?;
        let content = writes(nb, fmt, config)?;
        let mut stdout = std::io::stdout().lock();
        stdout
            .write_all(content.as_bytes())
            .and_then(|()| stdout.flush())
            .map_err(|e| io_error(path, e))?;
        return Ok(());
    }

    let mut fmt = fmt.cloned().unwrap_or_default();
    fmt.extension = split_extension(path).1;
    create_prefix_dir(path, &fmt)?;
    let content = writes(nb, &fmt, config)?;
    debug!(path, "writing notebook");
    std::fs::write(path, content).map_err(|e| io_error(path, e))
}

/// Number of lines used by a cell, an error when the reader consumed none.
fn consumed_lines(read: &ReadCell, remaining: &[String]) -> Result<usize> {
    if read.next_position == 0 {
        return Err(NbTextError::ReaderBlocked(
            remaining.iter().take(6).cloned().collect::<Vec<_>>().join("\n"),
        ));
    }
    Ok(read.next_position)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Cell, CellType};
    use serde_json::json;

    fn fmt(text: &str) -> JupytextFormat {
        long_form_one_format(text, None, true).expect("valid format")
    }

    fn no_version() -> JupytextConfiguration {
        JupytextConfiguration {
            insert_version_number: false,
            ..JupytextConfiguration::default()
        }
    }

    fn python_notebook(cells: Vec<Cell>) -> Notebook {
        let mut metadata = Metadata::new();
        metadata.insert(
            "kernelspec".into(),
            json!({"display_name": "Python 3", "language": "python", "name": "python3"}),
        );
        Notebook::new(cells, metadata)
    }

    #[test]
    fn percent_script_round_trip() {
        let text = "# %% [markdown]\n# A title\n\n# %%\nx = 1\n\n# %%\nprint(x)\n";
        let config = no_version();
        let nb = reads(text, Some(&fmt("py:percent")), Some(&config)).expect("reads");
        assert_eq!(nb.cells.len(), 3);
        assert_eq!(nb.cells[0].cell_type, CellType::Markdown);
        assert_eq!(nb.cells[0].source, "A title");
        assert_eq!(nb.cells[2].source, "print(x)");
        assert_eq!(writes(&nb, &fmt("py:percent"), Some(&config)).expect("writes"), text);
    }

    #[test]
    fn scripts_default_to_percent() {
        let nb = python_notebook(vec![Cell::code("1 + 1")]);
        let text = writes(&nb, &fmt("py"), Some(&no_version())).expect("writes");
        assert!(text.contains("# %%\n1 + 1\n"));
        assert!(text.starts_with("# ---\n# jupyter:\n"));
    }

    #[test]
    fn version_number_is_recorded() {
        let nb = python_notebook(vec![Cell::code("1 + 1")]);
        let text = writes(&nb, &fmt("py:percent"), None).expect("writes");
        assert!(text.contains("format_name: percent"));
        let back = reads(&text, None, None).expect("reads");
        let text_repr = section(&back.metadata, "jupytext").and_then(|j| section(j, "text_representation"));
        assert_eq!(
            text_repr.and_then(|t| t.get("format_name")),
            Some(&json!("percent"))
        );
    }

    #[test]
    fn markdown_cells_are_separated_by_two_blank_lines() {
        let nb = Notebook::new(
            vec![Cell::markdown("First"), Cell::markdown("Second"), Cell::code("1 + 1")],
            Metadata::new(),
        );
        let config = no_version();
        let text = writes(&nb, &fmt("md"), Some(&config)).expect("writes");
        assert!(text.contains("First\n\n\nSecond\n\n```python\n1 + 1\n```\n"));
        let back = reads(&text, Some(&fmt("md")), Some(&config)).expect("reads");
        let sources: Vec<&str> = back.cells.iter().map(|c| c.source.as_str()).collect();
        assert_eq!(sources, vec!["First", "Second", "1 + 1"]);
    }

    #[test]
    fn light_format_with_metadata_filter() {
        let text = "x = 1\n\n\ndef f():\n    return x\n";
        let nb = reads(text, Some(&fmt("py:light")), Some(&no_version())).expect("reads");
        assert_eq!(nb.cells.len(), 2);
        assert_eq!(
            section(&nb.metadata, "jupytext").and_then(|j| j.get("notebook_metadata_filter")),
            Some(&json!("-all"))
        );
        assert_eq!(writes(&nb, &fmt("py:light"), Some(&no_version())).expect("writes"), text);
    }

    #[test]
    fn ipynb_drops_text_representation() {
        let mut nb = python_notebook(vec![Cell::code("1 + 1")]);
        nb.metadata.insert(
            "jupytext".into(),
            json!({"text_representation": {"extension": ".py", "format_name": "percent"}}),
        );
        let text = writes(&nb, &fmt("ipynb"), None).expect("writes");
        assert!(!text.contains("text_representation"));
        assert!(!text.contains("\"jupytext\""));
        let back = reads(&text, None, None).expect("reads");
        assert_eq!(back.cells[0].source, "1 + 1");
    }

    #[test]
    fn old_notebooks_cannot_be_written() {
        let nb = Notebook {
            nbformat: 3,
            ..Notebook::default()
        };
        assert!(matches!(
            writes(&nb, &fmt("py:percent"), None),
            Err(NbTextError::UnsupportedNbformat { major: 3, .. })
        ));
    }

    #[test]
    fn auto_extension_needs_a_language() {
        let nb = Notebook::new(vec![Cell::code("1")], Metadata::new());
        assert!(writes(&nb, &fmt("auto:percent"), None).is_err());
        let nb = python_notebook(vec![Cell::code("1")]);
        assert!(writes(&nb, &fmt("auto:percent"), None).is_ok());
    }

    #[test]
    fn files_round_trip() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("scripts").join("nb.py");
        let path = path.to_string_lossy().into_owned();
        let nb = python_notebook(vec![Cell::markdown("Title"), Cell::code("x = 1")]);
        let target = fmt("scripts//py:percent");
        write(&nb, &path, Some(&target), None).expect("write");
        let back = read(&path, None, None).expect("read");
        assert_eq!(back.cells.len(), 2);
        assert_eq!(back.cells[1].source, "x = 1");
    }

    #[test]
    fn malformed_yaml_header_is_an_error() {
        let text = "# ---\n# jupyter:\n#   a: [\n# ---\n\n# %%\n1 + 1\n";
        assert!(matches!(
            reads(text, Some(&fmt("py:percent")), None),
            Err(NbTextError::InvalidHeader(_))
        ));
    }

    #[test]
    fn reader_without_progress_is_an_error() {
        let remaining: Vec<String> = ["x = 1", "y = 2"].iter().map(|l| l.to_string()).collect();
        let stalled = ReadCell {
            cell: Cell::code("x = 1"),
            next_position: 0,
            cell_metadata_json: false,
        };
        assert!(matches!(
            consumed_lines(&stalled, &remaining),
            Err(NbTextError::ReaderBlocked(lines)) if lines == "x = 1\ny = 2"
        ));

        let progressed = ReadCell { next_position: 1, ..stalled };
        assert_eq!(consumed_lines(&progressed, &remaining).expect("progress"), 1);
    }
}
