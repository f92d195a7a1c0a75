//! # Paired Notebooks
//!
//! A paired notebook exists as several files, e.g. `nb.ipynb` and `nb.py`.
//! The inputs are read from the most recent text file (or from the
//! `.ipynb` file when it is more recent), the outputs from the most recent
//! `.ipynb` file. Writing a paired notebook writes the `.ipynb` files first,
//! so that the text files end up being the most recent.

use crate::combine::combine_inputs_with_outputs;
use crate::formats::JupytextFormat;
use crate::paired_paths::{find_base_path_and_format, full_path, paired_paths};
use crate::types::{NbTextError, Notebook, Result};
use serde_json::Value;
use std::time::SystemTime;
use tracing::debug;

/// One file of a paired notebook. `path` is `None` when no such file exists.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotebookFile {
    pub path: Option<String>,
    pub fmt: Option<JupytextFormat>,
    pub timestamp: Option<SystemTime>,
}

impl NotebookFile {
    fn new(path: &str, fmt: &JupytextFormat, timestamp: SystemTime) -> Self {
        Self {
            path: Some(path.to_string()),
            fmt: Some(fmt.clone()),
            timestamp: Some(timestamp),
        }
    }
}

/// The modification time of a file, or `None` when there is no such file.
#[must_use]
pub fn get_timestamp(path: &str) -> Option<SystemTime> {
    std::fs::symlink_metadata(path)
        .ok()
        .filter(std::fs::Metadata::is_file)
        .and_then(|metadata| metadata.modified().ok())
}

/// The most recent files for the inputs and the outputs of a paired
/// notebook.
///
/// `get_timestamp` returns the modification time of each paired file, or
/// `None` when the file does not exist.
pub fn latest_inputs_and_outputs<F>(
    path: &str,
    fmt: &JupytextFormat,
    formats: &Value,
    get_timestamp: F,
) -> Result<(NotebookFile, NotebookFile)>
where
    F: Fn(&str) -> Option<SystemTime>,
{
    let mut inputs = NotebookFile::default();
    let mut outputs = NotebookFile::default();

    for (alt_path, alt_fmt) in paired_paths(path, fmt, formats)? {
        let Some(timestamp) = get_timestamp(&alt_path) else {
            continue;
        };
        let latest = if alt_fmt.extension == ".ipynb" { &mut outputs } else { &mut inputs };
        if latest.timestamp.is_none_or(|t| timestamp > t) {
            *latest = NotebookFile::new(&alt_path, &alt_fmt, timestamp);
        }
    }

    if inputs.timestamp.is_none() || outputs.timestamp > inputs.timestamp {
        inputs = outputs.clone();
    }
    debug!(inputs = ?inputs.path, outputs = ?outputs.path, "latest paired files");
    Ok((inputs, outputs))
}

/// Read the inputs, and combine them with the outputs when these come from
/// another file.
pub fn read_pair<F>(inputs: &NotebookFile, outputs: &NotebookFile, mut read_one_file: F) -> Result<Notebook>
where
    F: FnMut(&str, &JupytextFormat) -> Result<Notebook>,
{
    let (Some(inputs_path), Some(inputs_fmt)) = (&inputs.path, &inputs.fmt) else {
        return Err(NbTextError::IoError("None of the paired files exist".to_string()));
    };
    let notebook = read_one_file(inputs_path, inputs_fmt)?;

    match (&outputs.path, &outputs.fmt) {
        (Some(outputs_path), Some(outputs_fmt)) if outputs_path != inputs_path => {
            let outputs_nb = read_one_file(outputs_path, outputs_fmt)?;
            combine_inputs_with_outputs(&notebook, &outputs_nb, Some(inputs_fmt))
        }
        _ => Ok(notebook),
    }
}

/// Write every file of a paired notebook: the `.ipynb` files first, then the
/// text files.
pub fn write_pair<F>(path: &str, formats: &[JupytextFormat], mut write_one_file: F) -> Result<()>
where
    F: FnMut(&str, &JupytextFormat) -> Result<()>,
{
    let (base, _) = find_base_path_and_format(path, formats)?;
    let (ipynb, text): (Vec<&JupytextFormat>, Vec<&JupytextFormat>) =
        formats.iter().rev().partition(|fmt| fmt.extension == ".ipynb");
    for fmt in ipynb.into_iter().chain(text) {
        write_one_file(&full_path(&base, fmt)?, fmt)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::{long_form_one_format, parse_formats};
    use crate::types::Cell;
    use std::time::Duration;

    fn fmt(text: &str) -> JupytextFormat {
        long_form_one_format(text, None, true).expect("valid format")
    }

    fn at(seconds: u64) -> Option<SystemTime> {
        Some(SystemTime::UNIX_EPOCH + Duration::from_secs(seconds))
    }

    #[test]
    fn text_file_is_the_source_of_inputs() {
        let formats = Value::from("ipynb,py:percent");
        let (inputs, outputs) = latest_inputs_and_outputs("nb.ipynb", &fmt("ipynb"), &formats, |path| match path {
            "nb.ipynb" => at(10),
            "nb.py" => at(20),
            _ => None,
        })
        .expect("paired paths");
        assert_eq!(inputs.path.as_deref(), Some("nb.py"));
        assert_eq!(outputs.path.as_deref(), Some("nb.ipynb"));
    }

    #[test]
    fn more_recent_ipynb_file_gives_the_inputs() {
        let formats = Value::from("ipynb,py:percent");
        let (inputs, outputs) = latest_inputs_and_outputs("nb.py", &fmt("py:percent"), &formats, |path| match path {
            "nb.ipynb" => at(30),
            "nb.py" => at(20),
            _ => None,
        })
        .expect("paired paths");
        assert_eq!(inputs.path.as_deref(), Some("nb.ipynb"));
        assert_eq!(outputs, inputs);
    }

    #[test]
    fn missing_files_are_skipped() {
        let formats = Value::from("ipynb,py:percent");
        let (inputs, outputs) = latest_inputs_and_outputs("nb.py", &fmt("py:percent"), &formats, |path| {
            (path == "nb.py").then_some(SystemTime::UNIX_EPOCH)
        })
        .expect("paired paths");
        assert_eq!(inputs.path.as_deref(), Some("nb.py"));
        assert!(outputs.path.is_none());
    }

    #[test]
    fn read_pair_combines_outputs() {
        let inputs = NotebookFile::new("nb.py", &fmt("py:percent"), SystemTime::UNIX_EPOCH);
        let outputs = NotebookFile::new("nb.ipynb", &fmt("ipynb"), SystemTime::UNIX_EPOCH);
        let nb = read_pair(&inputs, &outputs, |path, _| {
            let mut cell = Cell::code("1 + 1");
            if path == "nb.ipynb" {
                cell.execution_count = Some(3);
            }
            Ok(Notebook::new(vec![cell], Default::default()))
        })
        .expect("read pair");
        assert_eq!(nb.cells[0].execution_count, Some(3));
    }

    #[test]
    fn read_pair_needs_an_input_file() {
        let none = NotebookFile::default();
        assert!(read_pair(&none, &none, |_, _| Ok(Notebook::default())).is_err());
    }

    #[test]
    fn ipynb_files_are_written_first() {
        let formats = parse_formats("py:percent,ipynb,md").expect("valid formats");
        let mut written = Vec::new();
        write_pair("nb.md", &formats, |path, _| {
            written.push(path.to_string());
            Ok(())
        })
        .expect("written");
        assert_eq!(written, vec!["nb.ipynb", "nb.md", "nb.py"]);
    }
}
