//! # Combining Inputs With Outputs
//!
//! A notebook read from a text file has no outputs. When the text file is
//! paired with an `.ipynb` file, the inputs come from the text and the
//! outputs, execution counts, cell ids and filtered metadata come from the
//! `.ipynb` file.
//!
//! ## Cell Mapping
//!
//! Text cells are matched to `.ipynb` cells of the same type, in order:
//! 1. by identical source
//! 2. by source identical up to spaces, quotes, commas and parentheses
//!    (so that reformatted code keeps its outputs)
//! 3. by position, between two cells already matched

use crate::formats::{JupytextFormat, is_markdown_extension};
use crate::metadata_filter::{MetadataFilter, restore_filtered_metadata};
use crate::primitives::{DEFAULT_NOTEBOOK_METADATA, IGNORE_CELL_METADATA};
use crate::types::{Cell, Metadata, Notebook, Result, pop_from_section, section, section_str};
use serde_json::Value;
use tracing::debug;

const FORMATTING_CHARS: [char; 9] = [' ', '\t', '\n', ',', '\'', '"', '(', ')', '\\'];

/// The source without the characters that code formatters rewrite.
fn formatting_invariant(source: &str) -> String {
    source.chars().filter(|c| !FORMATTING_CHARS.contains(c)).collect()
}

/// Map each input cell to the index of the output cell it takes its
/// outputs from.
#[must_use]
pub fn map_outputs_to_inputs(inputs: &[Cell], outputs: &[Cell]) -> Vec<Option<usize>> {
    let mut map: Vec<Option<usize>> = vec![None; inputs.len()];

    // identical sources, in increasing order
    let mut first_out = 0;
    for (i, input) in inputs.iter().enumerate() {
        if let Some(j) = (first_out..outputs.len())
            .find(|&j| outputs[j].cell_type == input.cell_type && outputs[j].source == input.source)
        {
            map[i] = Some(j);
            first_out = j + 1;
        }
    }

    // sources identical up to formatting, between mapped cells
    let mut used: Vec<bool> = vec![false; outputs.len()];
    for j in map.iter().flatten() {
        used[*j] = true;
    }
    let mut prev_out = 0;
    for i in 0..inputs.len() {
        if let Some(j) = map[i] {
            prev_out = j + 1;
            continue;
        }
        let normalized = formatting_invariant(&inputs[i].source);
        let mut j = prev_out;
        while j < outputs.len() && !used[j] {
            if outputs[j].cell_type == inputs[i].cell_type && formatting_invariant(&outputs[j].source) == normalized {
                map[i] = Some(j);
                used[j] = true;
                prev_out = j + 1;
                break;
            }
            j += 1;
        }
    }

    // same position between mapped cells
    let mut prev_out = 0;
    for i in 0..inputs.len() {
        if let Some(j) = map[i] {
            prev_out = j + 1;
            continue;
        }
        let j = prev_out;
        if j < outputs.len() && !used[j] && outputs[j].cell_type == inputs[i].cell_type {
            map[i] = Some(j);
            used[j] = true;
            prev_out = j + 1;
        }
    }

    map
}

fn filter_at(metadata: &Metadata, key: &str) -> Result<MetadataFilter> {
    section(metadata, "jupytext")
        .and_then(|jupytext| jupytext.get(key))
        .map_or_else(|| Ok(MetadataFilter::default()), MetadataFilter::from_value)
}

/// Combine a notebook read from text with the notebook (usually read from an
/// `.ipynb` file) that holds its outputs.
///
/// `fmt` is the format of the text notebook; when empty, the
/// `text_representation` recorded in the text notebook is used.
pub fn combine_inputs_with_outputs(
    nb_source: &Notebook,
    nb_outputs: &Notebook,
    fmt: Option<&JupytextFormat>,
) -> Result<Notebook> {
    let text_repr = section(&nb_source.metadata, "jupytext").and_then(|j| section(j, "text_representation"));
    let repr_str = |key: &str| text_repr.and_then(|r| r.get(key)).and_then(Value::as_str).map(str::to_string);
    let ext = fmt
        .map(|f| f.extension.clone())
        .filter(|e| !e.is_empty())
        .or_else(|| repr_str("extension"))
        .unwrap_or_default();
    let format_name = fmt
        .and_then(|f| f.format_name.clone())
        .or_else(|| repr_str("format_name"));

    let notebook_filter = section(&nb_source.metadata, "jupytext").and_then(|j| j.get("notebook_metadata_filter"));
    let mut metadata = if notebook_filter.and_then(Value::as_str) == Some("-all") {
        nb_outputs.metadata.clone()
    } else {
        restore_filtered_metadata(
            &nb_source.metadata,
            &nb_outputs.metadata,
            &filter_at(&nb_source.metadata, "notebook_metadata_filter")?,
            &DEFAULT_NOTEBOOK_METADATA.into(),
        )
    };

    let has_formats = section(&metadata, "jupytext").is_some_and(|j| j.contains_key("formats"));
    if has_formats || is_markdown_extension(&ext) {
        pop_from_section(&mut metadata, "jupytext", "text_representation");
    }
    if section(&metadata, "jupytext").is_some_and(Metadata::is_empty) {
        metadata.shift_remove("jupytext");
    }

    let cell_filter = if format_name.as_deref() == Some("nomarker") {
        MetadataFilter::parse("-all")
    } else {
        filter_at(&metadata, "cell_metadata_filter")?
    };
    debug!(
        cell_metadata_filter = section_str(&metadata, "jupytext", "cell_metadata_filter").unwrap_or(""),
        "combining inputs with outputs"
    );

    let map = map_outputs_to_inputs(&nb_source.cells, &nb_outputs.cells);
    let ignore_cell_metadata: MetadataFilter = IGNORE_CELL_METADATA.into();
    let cells = nb_source
        .cells
        .iter()
        .zip(map)
        .map(|(source_cell, j)| match j {
            None => source_cell.clone(),
            Some(j) => {
                let output_cell = &nb_outputs.cells[j];
                Cell {
                    source: source_cell.source.clone(),
                    metadata: restore_filtered_metadata(
                        &source_cell.metadata,
                        &output_cell.metadata,
                        &cell_filter,
                        &ignore_cell_metadata,
                    ),
                    ..output_cell.clone()
                }
            }
        })
        .collect();

    Ok(Notebook {
        nbformat: nb_outputs.nbformat,
        nbformat_minor: nb_outputs.nbformat_minor,
        metadata,
        cells,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn md(value: Value) -> Metadata {
        value.as_object().cloned().unwrap_or_default()
    }

    fn with_outputs(source: &str, count: i64) -> Cell {
        let mut cell = Cell::code(source);
        cell.execution_count = Some(count);
        cell.outputs = vec![json!({"output_type": "execute_result", "data": {"text/plain": [count.to_string()]}})];
        cell.id = Some(format!("id-{}", count));
        cell
    }

    #[test]
    fn identical_sources_are_mapped_in_order() {
        let inputs = vec![Cell::markdown("title"), Cell::code("1"), Cell::code("2")];
        let outputs = vec![Cell::code("1"), Cell::markdown("title"), Cell::code("2")];
        assert_eq!(map_outputs_to_inputs(&inputs, &outputs), vec![Some(1), None, Some(2)]);
    }

    #[test]
    fn reformatted_code_keeps_its_outputs() {
        let inputs = vec![Cell::code("f(1, 'a')"), Cell::code("x")];
        let outputs = vec![Cell::code("f(1,\"a\")"), Cell::code("x")];
        assert_eq!(map_outputs_to_inputs(&inputs, &outputs), vec![Some(0), Some(1)]);
    }

    #[test]
    fn edited_cells_are_mapped_by_position() {
        let inputs = vec![Cell::code("a = 1"), Cell::code("b = 3"), Cell::code("c = 3")];
        let outputs = vec![Cell::code("a = 1"), Cell::code("b = 2"), Cell::code("c = 3")];
        assert_eq!(map_outputs_to_inputs(&inputs, &outputs), vec![Some(0), Some(1), Some(2)]);
    }

    #[test]
    fn new_cells_have_no_outputs() {
        let inputs = vec![Cell::code("a"), Cell::markdown("new"), Cell::code("b")];
        let outputs = vec![Cell::code("a"), Cell::code("b")];
        assert_eq!(map_outputs_to_inputs(&inputs, &outputs), vec![Some(0), None, Some(1)]);
    }

    #[test]
    fn outputs_ids_and_counts_are_restored() {
        let text_nb = Notebook::new(vec![Cell::code("1 + 1"), Cell::code("2 + 2")], Metadata::new());
        let ipynb_nb = Notebook::new(vec![with_outputs("1 + 1", 1), with_outputs("2 + 1", 2)], Metadata::new());
        let nb = combine_inputs_with_outputs(&text_nb, &ipynb_nb, None).expect("combined");
        assert_eq!(nb.cells[0].execution_count, Some(1));
        assert_eq!(nb.cells[0].id.as_deref(), Some("id-1"));
        assert_eq!(nb.cells[1].source, "2 + 2");
        assert_eq!(nb.cells[1].outputs.len(), 1);
    }

    #[test]
    fn filtered_metadata_is_restored() {
        let text_nb = Notebook::new(
            vec![Cell::code("x").with_metadata(md(json!({"tags": ["t"]})))],
            md(json!({"jupytext": {"cell_metadata_filter": "tags,-all"}})),
        );
        let ipynb_nb = Notebook::new(
            vec![Cell::code("x").with_metadata(md(json!({"tags": ["old"], "collapsed": true, "scrolled": true})))],
            md(json!({"kernelspec": {"name": "python3"}, "widgets": {"state": {}}})),
        );
        let nb = combine_inputs_with_outputs(&text_nb, &ipynb_nb, None).expect("combined");
        assert_eq!(nb.cells[0].metadata, md(json!({"tags": ["t"], "collapsed": true, "scrolled": true})));
        assert_eq!(nb.metadata["widgets"], json!({"state": {}}));
    }

    #[test]
    fn text_representation_is_dropped_for_paired_notebooks() {
        let text_nb = Notebook::new(
            vec![],
            md(json!({"jupytext": {"formats": "ipynb,py:percent",
                "text_representation": {"extension": ".py", "format_name": "percent"}}})),
        );
        let nb = combine_inputs_with_outputs(&text_nb, &Notebook::default(), None).expect("combined");
        assert_eq!(nb.metadata["jupytext"], json!({"formats": "ipynb,py:percent"}));
    }
}
