//! # Fixture Round Trips
//!
//! Text notebooks under `tests/data` are read and written back. Percent and
//! hydrogen scripts must come back byte-for-byte; light scripts must give
//! the same cells when read again.

use nbtext_core::compare::{NotebookComparison, compare_notebooks};
use nbtext_core::formats::guess_format;
use nbtext_core::{CellType, JupytextConfiguration, JupytextFormat, Notebook, long_form_one_format, reads, writes};

fn config() -> JupytextConfiguration {
    JupytextConfiguration {
        insert_version_number: false,
        ..JupytextConfiguration::default()
    }
}

/// The format of a fixture, as guessed from its content.
fn fixture_format(text: &str, ext: &str) -> JupytextFormat {
    let (name, _) = guess_format(text, ext).expect("format guessed");
    long_form_one_format(&format!("{}:{}", ext.trim_start_matches('.'), name), None, true).expect("valid format")
}

fn read_fixture(text: &str, ext: &str) -> (Notebook, JupytextFormat) {
    let fmt = fixture_format(text, ext);
    let nb = reads(text, Some(&fmt), Some(&config())).expect("fixture reads");
    (nb, fmt)
}

fn assert_identical_round_trip(text: &str, ext: &str) -> Notebook {
    let (nb, fmt) = read_fixture(text, ext);
    let back = writes(&nb, &fmt, Some(&config())).expect("fixture writes");
    assert_eq!(back, text, "round trip of {} changed the text", ext);
    nb
}

// =============================================================================
// PERCENT AND HYDROGEN SCRIPTS
// =============================================================================

#[test]
fn xcpp_notebook_round_trip() {
    let text = include_str!("data/xcpp_by_quantstack.cpp");
    let nb = assert_identical_round_trip(text, ".cpp");

    assert_eq!(nb.metadata["kernelspec"]["name"], "xeus-cling-cpp14");
    assert_eq!(nb.cells[0].cell_type, CellType::Markdown);
    assert!(nb.cells[0].source.starts_with("[![xeus-cling](images/xeus-cling.png)]"));
    let first_code = nb.cells.iter().find(|c| c.is_code()).expect("a code cell");
    assert_eq!(first_code.source, "#include <iostream>\n\nstd::cout << \"some output\" << std::endl;");
}

#[test]
fn xcpp_notebook_is_a_percent_script() {
    let text = include_str!("data/xcpp_by_quantstack.cpp");
    let fmt = fixture_format(text, ".cpp");
    assert!(matches!(fmt.format_name.as_deref(), Some("percent" | "hydrogen")));
}

#[test]
fn csharp_notebook_round_trip() {
    let text = include_str!("data/csharp.cs");
    let nb = assert_identical_round_trip(text, ".cs");
    assert_eq!(nb.cells.len(), 7);
    assert_eq!(nb.cells[1].source, "Console.WriteLine(\"Hello World!\");");
}

#[test]
fn hydrogen_magics_round_trip() {
    let text = include_str!("data/hydrogen_magics.py");
    let fmt = fixture_format(text, ".py");
    assert_eq!(fmt.format_name.as_deref(), Some("hydrogen"));

    let nb = assert_identical_round_trip(text, ".py");
    assert_eq!(nb.cells.len(), 7);
    assert!(nb.cells.iter().all(|c| c.is_code()));
    assert_eq!(nb.cells[3].source.lines().next(), Some("%%html"));
}

#[test]
fn percent_titles_become_metadata() {
    let text = include_str!("data/percent_titles.py");
    let (nb, _) = read_fixture(text, ".py");
    assert_eq!(nb.cells.len(), 3);
    assert_eq!(nb.cells[1].metadata["title"], "Display a data frame");
    assert_eq!(nb.cells[2].metadata["title"], "Pandas plot");
    assert_eq!(nb.cells[2].metadata["tags"], serde_json::json!(["parameters"]));
    assert_eq!(nb.cells[2].source, "df.plot(kind='bar')");
}

// =============================================================================
// LIGHT SCRIPTS
// =============================================================================

fn assert_stable_cells(text: &str, ext: &str) -> Notebook {
    let (nb, fmt) = read_fixture(text, ext);
    let back = writes(&nb, &fmt, Some(&config())).expect("fixture writes");
    let again = reads(&back, Some(&fmt), Some(&config())).expect("round trip reads");
    compare_notebooks(&again, &nb, &NotebookComparison::default()).expect("same notebook");
    nb
}

#[test]
fn light_long_cells_are_stable() {
    let nb = assert_stable_cells(include_str!("data/light_long_cells.py"), ".py");
    assert_eq!(nb.cells[0].source, "# Part one - various cells");
    assert!(nb.cells.iter().any(|c| c.source == "2 + 2\n\n\n3 + 3"));
    assert!(nb.cells.iter().any(|c| c.cell_type == CellType::Raw));
}

#[test]
fn hydrogen_long_cells_are_stable() {
    let nb = assert_stable_cells(include_str!("data/hydrogen_long_cells.py"), ".py");
    assert_eq!(nb.cells[0].cell_type, CellType::Markdown);
}

#[test]
fn vim_folding_markers_are_stable() {
    let text = include_str!("data/light_vim_markers.py");
    let fmt = fixture_format(text, ".py");
    assert_eq!(fmt.format_name.as_deref(), Some("light"));
    let nb = assert_stable_cells(text, ".py");
    assert!(nb.cells.iter().any(|c| c.source == "a = 1\nb = 2\na + b"));
}

#[test]
fn vscode_region_markers_are_stable() {
    let nb = assert_stable_cells(include_str!("data/light_vscode_r_magic.py"), ".py");
    assert!(nb.cells.iter().any(|c| c.source.starts_with("%%R\n")));
}
