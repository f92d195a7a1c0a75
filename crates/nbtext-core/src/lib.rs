//! # nbtext-core
//!
//! Converts Jupyter notebooks to and from plain text documents - THE CONVERTER.
//!
//! A notebook becomes a script in which each cell is delimited by a
//! `# %%` marker (percent format), separated by blank lines (light format),
//! or a Markdown document with code blocks. The notebook metadata goes to a
//! YAML header, the cell metadata to the cell markers, and reading the text
//! back gives the same cells.
//!
//! ## Pipeline
//!
//! - `formats` resolves a format string such as `notebooks//py:percent`
//! - `header` and `cell_reader` turn text lines into metadata and cells
//! - `header` and `cell_to_text` turn metadata and cells into text lines
//! - `jupytext` drives both directions, `combine` adds the outputs of a
//!   paired `.ipynb` file, `compare` checks round trips
//!
//! ## Architectural Constraints
//!
//! - Pure Rust: no async, no network, no process spawning
//! - Deterministic: the same notebook and format always give the same text
//! - Errors, not panics: every failure is an `NbTextError`

// =============================================================================
// MODULES
// =============================================================================

pub mod cell_metadata;
pub mod cell_reader;
pub mod cell_to_text;
pub mod combine;
pub mod compare;
pub mod config;
pub mod formats;
pub mod header;
pub mod json;
pub mod jupytext;
pub mod kernels;
pub mod languages;
pub mod magics;
pub mod metadata_filter;
pub mod paired_paths;
pub mod pairs;
pub mod pep8;
pub mod primitives;
pub mod stringparser;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{Cell, CellType, Metadata, NbTextError, Notebook, Result};

// =============================================================================
// RE-EXPORTS: Conversion
// =============================================================================

pub use combine::combine_inputs_with_outputs;
pub use compare::{NotebookComparison, compare_notebooks, test_round_trip_conversion};
pub use jupytext::{read, reads, write, writes};

// =============================================================================
// RE-EXPORTS: Formats and Configuration
// =============================================================================

pub use config::{JupytextConfiguration, load_jupytext_config};
pub use formats::{
    FormatOptions, JupytextFormat, long_form_multiple_formats, long_form_one_format,
    short_form_multiple_formats, short_form_one_format,
};
pub use paired_paths::{base_path, full_path, paired_paths};
pub use pairs::{read_pair, write_pair};
