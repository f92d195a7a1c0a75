//! # Property-Based Tests
//!
//! Round trips of generated notebooks through the text formats.
//!
//! These tests ensure determinism and losslessness invariants.

use nbtext_core::{
    Cell, CellType, JupytextConfiguration, Metadata, Notebook, combine_inputs_with_outputs,
    long_form_one_format, reads, short_form_one_format, writes,
};
use proptest::collection::vec;
use proptest::prelude::*;
use serde_json::{Value, json};

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

// =============================================================================
// STRATEGIES
// =============================================================================

/// A source of one to four non-blank lines.
fn source() -> impl Strategy<Value = String> {
    vec("[a-z][a-z0-9 =+]{0,20}", 1..4).prop_map(|lines| lines.join("\n"))
}

fn cell() -> impl Strategy<Value = Cell> {
    (prop_oneof![Just(CellType::Code), Just(CellType::Markdown)], source())
        .prop_map(|(cell_type, source)| Cell::new(cell_type, source))
}

fn notebook() -> impl Strategy<Value = Notebook> {
    vec(cell(), 1..8).prop_map(python_notebook)
}

fn metadata_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        "[a-z]{1,8}".prop_map(Value::from),
        (0i64..1000).prop_map(Value::from),
        Just(json!(["parameters"])),
    ]
}

fn sources(nb: &Notebook) -> Vec<(CellType, String)> {
    nb.cells.iter().map(|c| (c.cell_type, c.source.clone())).collect()
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// Percent scripts give back the cells they were written from.
    #[test]
    fn percent_round_trip_preserves_cells(nb in notebook()) {
        let fmt = long_form_one_format("py:percent", None, true).expect("valid format");
        let text = writes(&nb, &fmt, Some(&no_version())).expect("writes");
        let back = reads(&text, Some(&fmt), Some(&no_version())).expect("reads");
        prop_assert_eq!(sources(&back), sources(&nb));
    }

    /// Markdown documents give back the cells they were written from.
    #[test]
    fn markdown_round_trip_preserves_cells(nb in notebook()) {
        let fmt = long_form_one_format("md", None, true).expect("valid format");
        let text = writes(&nb, &fmt, Some(&no_version())).expect("writes");
        let back = reads(&text, Some(&fmt), Some(&no_version())).expect("reads");
        prop_assert_eq!(sources(&back), sources(&nb));
    }

    /// The same notebook always gives the same text.
    #[test]
    fn writing_is_deterministic(nb in notebook()) {
        let fmt = long_form_one_format("py:percent", None, true).expect("valid format");
        let first = writes(&nb, &fmt, Some(&no_version())).expect("writes");
        let second = writes(&nb.clone(), &fmt, Some(&no_version())).expect("writes");
        prop_assert_eq!(first, second);
    }

    /// Cell metadata survives in the percent cell markers.
    #[test]
    fn cell_metadata_round_trip(key in "k_[a-z]{1,6}", value in metadata_value(), code in source()) {
        let mut metadata = Metadata::new();
        metadata.insert(key.clone(), value.clone());
        let nb = python_notebook(vec![Cell::code(code).with_metadata(metadata)]);

        let fmt = long_form_one_format("py:percent", None, true).expect("valid format");
        let text = writes(&nb, &fmt, Some(&no_version())).expect("writes");
        let back = reads(&text, Some(&fmt), Some(&no_version())).expect("reads");
        prop_assert_eq!(back.cells[0].metadata.get(&key), Some(&value));
    }

    /// Format strings are stable through their long form.
    #[test]
    fn short_form_is_stable(
        prefix in prop_oneof![Just(""), Just("scripts//"), Just("../text/")],
        suffix in prop_oneof![Just(""), Just("_nb."), Just("-text.")],
        ext_and_name in prop_oneof![Just("py:percent"), Just("py:light"), Just("R:percent"), Just("jl:hydrogen"), Just("md")],
    ) {
        let text = format!("{}{}{}", prefix, suffix, ext_and_name);
        let fmt = long_form_one_format(&text, None, true).expect("valid format");
        prop_assert_eq!(short_form_one_format(&fmt), text);
    }

    /// Combining a notebook with itself restores every output.
    #[test]
    fn combining_restores_outputs(nb in notebook(), count in 1i64..100) {
        let mut with_outputs = nb.clone();
        for cell in with_outputs.cells.iter_mut().filter(|c| c.is_code()) {
            cell.execution_count = Some(count);
            cell.outputs = vec![json!({"output_type": "stream", "name": "stdout", "text": ["out\n"]})];
        }
        let combined = combine_inputs_with_outputs(&nb, &with_outputs, None).expect("combined");
        prop_assert_eq!(combined.cells, with_outputs.cells);
    }
}
