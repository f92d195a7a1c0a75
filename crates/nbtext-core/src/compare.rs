//! # Notebook Comparison
//!
//! Compares two notebooks cell by cell and reports the differences as
//! `NbTextError::NotebookDifference`, with a unified diff of the first
//! difference or a summary of all of them.
//!
//! Text formats do not preserve everything: blank lines inside cells, a
//! final blank line, and filtered cell metadata are expected differences
//! that can be tolerated.

use crate::combine::combine_inputs_with_outputs;
use crate::config::JupytextConfiguration;
use crate::formats::JupytextFormat;
use crate::json::to_pretty_sorted;
use crate::jupytext::{reads, writes};
use crate::metadata_filter::{MetadataFilter, filter_metadata};
use crate::primitives::{DEFAULT_NOTEBOOK_METADATA, IGNORE_CELL_METADATA};
use crate::types::{Cell, CellType, Metadata, NbTextError, Notebook, Result, section, split_lines};
use serde_json::{Value, json};
use similar::TextDiff;
use std::collections::BTreeSet;

// =============================================================================
// TEXT DIFFS
// =============================================================================

/// A unified diff from `expected` to `actual`. Empty when both are equal.
#[must_use]
pub fn unified_diff(actual: &str, expected: &str, actual_name: &str, expected_name: &str) -> String {
    if actual == expected {
        return String::new();
    }
    TextDiff::from_lines(expected, actual)
        .unified_diff()
        .header(expected_name, actual_name)
        .to_string()
}

/// Compare two texts; the error carries their unified diff.
pub fn compare(actual: &str, expected: &str) -> Result<()> {
    if actual == expected {
        return Ok(());
    }
    Err(NbTextError::NotebookDifference(format!(
        "\n{}",
        unified_diff(actual, expected, "actual", "expected")
    )))
}

/// Compare two JSON values through their sorted, indented form.
fn compare_values(actual: &Value, expected: &Value) -> Result<()> {
    if actual == expected {
        return Ok(());
    }
    compare(&to_pretty_sorted(actual, 1)?, &to_pretty_sorted(expected, 1)?)
}

fn diff_message(error: NbTextError) -> String {
    match error {
        NbTextError::NotebookDifference(diff) => diff,
        other => other.to_string(),
    }
}

// =============================================================================
// CELLS
// =============================================================================

/// Which differences `compare_cells` reports.
#[derive(Debug, Clone, Default)]
pub struct CellComparison {
    /// Fail on the first difference, with a diff of that difference.
    pub raise_on_first_difference: bool,
    pub compare_outputs: bool,
    pub compare_ids: bool,
    /// Filter applied to cell metadata before comparing outputs.
    pub cell_metadata_filter: MetadataFilter,
    /// Ignore the cell metadata that text formats never store.
    pub allow_filtered_cell_metadata: bool,
    /// Accept a cell that lost a final blank line.
    pub allow_removed_final_blank_line: bool,
}

fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

fn non_blank_lines(source: &str) -> Vec<String> {
    split_lines(source).into_iter().filter(|line| !is_blank(line)).collect()
}

/// Are the two sources equal, possibly up to a final blank line that the
/// text format removed?
fn same_content(ref_source: &str, test_source: &str, allow_removed_final_blank_line: bool) -> bool {
    if ref_source == test_source {
        return true;
    }
    if !allow_removed_final_blank_line {
        return false;
    }
    let ref_lines = split_lines(ref_source);
    let Some((last, rest)) = ref_lines.split_last() else {
        return false;
    };
    rest == split_lines(test_source).as_slice() && is_blank(last)
}

fn without_ignored_keys(metadata: &Metadata, ignored: &[String]) -> Metadata {
    metadata
        .iter()
        .filter(|(key, _)| !ignored.contains(key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// The parts of a code cell that are compared with outputs.
fn filtered_cell(cell: &Cell, cell_metadata_filter: &MetadataFilter) -> Value {
    let metadata = filter_metadata(&cell.metadata, cell_metadata_filter, &IGNORE_CELL_METADATA.into(), None);
    json!({
        "cell_type": cell.cell_type.as_str(),
        "source": cell.source,
        "metadata": metadata,
        "execution_count": cell.execution_count,
        "outputs": cell.outputs,
    })
}

/// Compare two lists of cells.
///
/// Returns the (1-based) indices of the cells that differ, and the
/// metadata keys that differ. With `raise_on_first_difference`, the first
/// difference is an error instead.
pub fn compare_cells(
    actual_cells: &[Cell],
    expected_cells: &[Cell],
    options: &CellComparison,
) -> Result<(BTreeSet<usize>, BTreeSet<String>)> {
    let raise = options.raise_on_first_difference;
    let mut modified_cells = BTreeSet::new();
    let mut modified_cell_metadata = BTreeSet::new();
    let ignored_keys: Vec<String> = IGNORE_CELL_METADATA
        .split(',')
        .map(|key| key.trim_start_matches('-').to_string())
        .collect();

    for (index, ref_cell) in expected_cells.iter().enumerate() {
        let i = index + 1;
        let Some(test_cell) = actual_cells.get(index) else {
            if raise {
                return Err(NbTextError::NotebookDifference(format!(
                    "No cell corresponding to {} cell #{}:\n{}",
                    ref_cell.cell_type, i, ref_cell.source
                )));
            }
            modified_cells.extend(i..=expected_cells.len());
            break;
        };

        if ref_cell.cell_type != test_cell.cell_type {
            if raise {
                return Err(NbTextError::NotebookDifference(format!(
                    "Unexpected cell type '{}' for {} cell #{}:\n{}",
                    test_cell.cell_type, ref_cell.cell_type, i, ref_cell.source
                )));
            }
            modified_cells.insert(i);
        }

        if options.compare_ids && test_cell.id != ref_cell.id {
            if raise {
                return Err(NbTextError::NotebookDifference(format!(
                    "Cell ids differ on {} cell #{}: '{}' != '{}'",
                    test_cell.cell_type,
                    i,
                    test_cell.id.as_deref().unwrap_or_default(),
                    ref_cell.id.as_deref().unwrap_or_default()
                )));
            }
            modified_cells.insert(i);
        }

        let (ref_metadata, test_metadata) = if options.allow_filtered_cell_metadata {
            (
                without_ignored_keys(&ref_cell.metadata, &ignored_keys),
                without_ignored_keys(&test_cell.metadata, &ignored_keys),
            )
        } else {
            (ref_cell.metadata.clone(), test_cell.metadata.clone())
        };
        if ref_metadata != test_metadata {
            if raise {
                let diff = compare_values(&Value::Object(test_metadata), &Value::Object(ref_metadata))
                    .err()
                    .map(diff_message)
                    .unwrap_or_default();
                return Err(NbTextError::NotebookDifference(format!(
                    "Metadata differ on {} cell #{}: {}\nCell content:\n{}",
                    test_cell.cell_type, i, diff, ref_cell.source
                )));
            }
            for (key, value) in &ref_metadata {
                if test_metadata.get(key) != Some(value) {
                    modified_cell_metadata.insert(key.clone());
                }
            }
            for key in test_metadata.keys() {
                if !ref_metadata.contains_key(key) {
                    modified_cell_metadata.insert(key.clone());
                }
            }
        }

        let ref_lines = non_blank_lines(&ref_cell.source);
        let test_lines = non_blank_lines(&test_cell.source);
        if ref_lines != test_lines {
            if raise {
                let diff = compare(&test_lines.join("\n"), &ref_lines.join("\n"))
                    .err()
                    .map(diff_message)
                    .unwrap_or_default();
                return Err(NbTextError::NotebookDifference(format!(
                    "Cell content differ on {} cell #{}: {}",
                    test_cell.cell_type, i, diff
                )));
            }
            modified_cells.insert(i);
        }

        if !same_content(&ref_cell.source, &test_cell.source, options.allow_removed_final_blank_line) {
            if raise {
                return Err(NbTextError::NotebookDifference(format!(
                    "Cell content differ on {} cell #{}: {}",
                    test_cell.cell_type,
                    i,
                    unified_diff(&test_cell.source, &ref_cell.source, "actual", "expected")
                )));
            }
            modified_cells.insert(i);
        }

        if !options.compare_outputs || ref_cell.cell_type != CellType::Code {
            continue;
        }
        let expected = filtered_cell(ref_cell, &options.cell_metadata_filter);
        let actual = filtered_cell(test_cell, &options.cell_metadata_filter);
        if let Err(error) = compare_values(&actual, &expected) {
            if raise {
                return Err(NbTextError::NotebookDifference(format!(
                    "Cell outputs differ on {} cell #{}: {}",
                    test_cell.cell_type,
                    i,
                    diff_message(error)
                )));
            }
            modified_cells.insert(i);
        }
    }

    if let Some(extra) = actual_cells.get(expected_cells.len()) {
        if raise {
            return Err(NbTextError::NotebookDifference(format!(
                "Additional {} cell: {}",
                extra.cell_type, extra.source
            )));
        }
        modified_cells.extend(expected_cells.len() + 1..=actual_cells.len());
    }

    Ok((modified_cells, modified_cell_metadata))
}

// =============================================================================
// NOTEBOOKS
// =============================================================================

/// Which differences `compare_notebooks` reports.
#[derive(Debug, Clone)]
pub struct NotebookComparison {
    /// Tolerate the differences that text formats are known to introduce.
    pub allow_expected_differences: bool,
    pub raise_on_first_difference: bool,
    pub compare_outputs: bool,
    /// Compare cell ids. Defaults to `compare_outputs`.
    pub compare_ids: Option<bool>,
}

impl Default for NotebookComparison {
    fn default() -> Self {
        Self {
            allow_expected_differences: true,
            raise_on_first_difference: true,
            compare_outputs: false,
            compare_ids: None,
        }
    }
}

/// Notebook metadata without what the converter adds itself.
fn filtered_notebook_metadata(nb: &Notebook) -> Result<Metadata> {
    let user_filter = section(&nb.metadata, "jupytext")
        .and_then(|jupytext| jupytext.get("notebook_metadata_filter"))
        .map_or_else(|| Ok(MetadataFilter::default()), MetadataFilter::from_value)?;
    let mut metadata = filter_metadata(&nb.metadata, &user_filter, &DEFAULT_NOTEBOOK_METADATA.into(), None);
    metadata.shift_remove("jupytext");
    Ok(metadata)
}

/// Compare two notebooks. The error explains the differences, if any.
pub fn compare_notebooks(actual: &Notebook, expected: &Notebook, options: &NotebookComparison) -> Result<()> {
    let raise = options.raise_on_first_difference;
    let cell_metadata_filter = section(&actual.metadata, "jupytext")
        .and_then(|jupytext| jupytext.get("cell_metadata_filter"))
        .map_or_else(|| Ok(MetadataFilter::default()), MetadataFilter::from_value)?;

    let (modified_cells, modified_cell_metadata) = compare_cells(
        &actual.cells,
        &expected.cells,
        &CellComparison {
            raise_on_first_difference: raise,
            compare_outputs: options.compare_outputs,
            compare_ids: options.compare_ids.unwrap_or(options.compare_outputs),
            cell_metadata_filter,
            allow_filtered_cell_metadata: options.allow_expected_differences,
            allow_removed_final_blank_line: options.allow_expected_differences,
        },
    )?;

    let mut modified_metadata = false;
    if let Err(error) = compare_values(
        &Value::Object(filtered_notebook_metadata(actual)?),
        &Value::Object(filtered_notebook_metadata(expected)?),
    ) {
        if raise {
            return Err(NbTextError::NotebookDifference(format!(
                "Notebook metadata differ: {}",
                diff_message(error)
            )));
        }
        modified_metadata = true;
    }

    let mut errors = Vec::new();
    if !modified_cells.is_empty() {
        errors.push(format!(
            "Cells {} differ ({}/{})",
            modified_cells.iter().map(usize::to_string).collect::<Vec<_>>().join(","),
            modified_cells.len(),
            expected.cells.len()
        ));
    }
    if !modified_cell_metadata.is_empty() {
        errors.push(format!(
            "Cell metadata '{}' differ",
            modified_cell_metadata.into_iter().collect::<Vec<_>>().join("', '")
        ));
    }
    if modified_metadata {
        errors.push("Notebook metadata differ".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(NbTextError::NotebookDifference(errors.join(" | ")))
    }
}

/// Write a notebook in the given format, read it back and compare it with
/// the original. With `update`, the outputs of the original are combined
/// with the round trip first.
pub fn test_round_trip_conversion(
    nb: &Notebook,
    fmt: &JupytextFormat,
    config: Option<&JupytextConfiguration>,
    update: bool,
    options: &NotebookComparison,
) -> Result<()> {
    let text = writes(nb, fmt, config)?;
    let mut round_trip = reads(&text, Some(fmt), config)?;
    if update {
        round_trip = combine_inputs_with_outputs(&round_trip, nb, Some(fmt))?;
    }
    compare_notebooks(&round_trip, nb, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::long_form_one_format;

    fn md(value: Value) -> Metadata {
        value.as_object().cloned().unwrap_or_default()
    }

    fn message(result: Result<()>) -> String {
        match result {
            Err(NbTextError::NotebookDifference(message)) => message,
            other => format!("{:?}", other),
        }
    }

    #[test]
    fn unified_diff_of_two_texts() {
        let diff = unified_diff("a\nc\n", "a\nb\n", "actual", "expected");
        assert!(diff.starts_with("--- expected\n+++ actual\n"));
        assert!(diff.contains("-b\n"));
        assert!(diff.contains("+c\n"));
        assert!(unified_diff("x", "x", "a", "b").is_empty());
        assert!(compare("same", "same").is_ok());
    }

    #[test]
    fn identical_notebooks_compare_equal() {
        let nb = Notebook::new(vec![Cell::markdown("# Title"), Cell::code("1 + 1")], Metadata::new());
        assert!(compare_notebooks(&nb, &nb.clone(), &NotebookComparison::default()).is_ok());
    }

    #[test]
    fn blank_lines_are_expected_differences() {
        let expected = Notebook::new(vec![Cell::code("1 + 1\n\n")], Metadata::new());
        let actual = Notebook::new(vec![Cell::code("1 + 1")], Metadata::new());
        assert!(compare_notebooks(&actual, &expected, &NotebookComparison::default()).is_ok());

        let strict = NotebookComparison {
            allow_expected_differences: false,
            ..NotebookComparison::default()
        };
        assert!(message(compare_notebooks(&actual, &expected, &strict)).starts_with("Cell content differ on code cell #1"));
    }

    #[test]
    fn first_difference_is_reported() {
        let expected = Notebook::new(vec![Cell::code("x = 1"), Cell::code("y = 2")], Metadata::new());
        let actual = Notebook::new(vec![Cell::code("x = 1"), Cell::markdown("y = 2")], Metadata::new());
        let error = message(compare_notebooks(&actual, &expected, &NotebookComparison::default()));
        assert!(error.starts_with("Unexpected cell type 'markdown' for code cell #2"));
    }

    #[test]
    fn all_differences_are_summarized() {
        let expected = Notebook::new(
            vec![Cell::code("x = 1").with_metadata(md(json!({"tags": ["a"]}))), Cell::code("y = 2")],
            md(json!({"kernelspec": {"name": "python3"}})),
        );
        let actual = Notebook::new(
            vec![Cell::code("x = 1"), Cell::code("y = 3"), Cell::code("z")],
            Metadata::new(),
        );
        let options = NotebookComparison {
            raise_on_first_difference: false,
            ..NotebookComparison::default()
        };
        assert_eq!(
            message(compare_notebooks(&actual, &expected, &options)),
            "Cells 2,3 differ (2/2) | Cell metadata 'tags' differ | Notebook metadata differ"
        );
    }

    #[test]
    fn ignored_cell_metadata_is_tolerated() {
        let expected = Notebook::new(
            vec![Cell::code("x").with_metadata(md(json!({"collapsed": true})))],
            Metadata::new(),
        );
        let actual = Notebook::new(vec![Cell::code("x")], Metadata::new());
        assert!(compare_notebooks(&actual, &expected, &NotebookComparison::default()).is_ok());
    }

    #[test]
    fn outputs_are_compared_on_request() {
        let mut with_output = Cell::code("1 + 1");
        with_output.execution_count = Some(1);
        let expected = Notebook::new(vec![with_output], Metadata::new());
        let actual = Notebook::new(vec![Cell::code("1 + 1")], Metadata::new());
        let options = NotebookComparison {
            compare_outputs: true,
            compare_ids: Some(false),
            ..NotebookComparison::default()
        };
        assert!(message(compare_notebooks(&actual, &expected, &options)).starts_with("Cell outputs differ"));
    }

    #[test]
    fn percent_round_trip_is_lossless() {
        let nb = Notebook::new(
            vec![
                Cell::markdown("# A title\n\nSome text"),
                Cell::code("def f(x):\n    return x\n\n\nf(1)"),
                Cell::raw("raw text"),
            ],
            md(json!({"kernelspec": {"display_name": "Python 3", "language": "python", "name": "python3"}})),
        );
        let fmt = long_form_one_format("py:percent", None, true).expect("valid format");
        test_round_trip_conversion(&nb, &fmt, None, true, &NotebookComparison::default()).expect("round trip");
    }
}
