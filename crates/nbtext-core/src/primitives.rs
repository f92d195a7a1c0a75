//! # Converter Primitives
//!
//! Fixed constants shared by the readers, the exporters and the notebook I/O.
//!
//! These values are compiled into the binary and are immutable at runtime.
//! Changing one of them changes the text produced for existing notebooks.

/// Version of this converter, recorded in `jupytext.text_representation`
/// when `insert_version_number` is enabled.
pub const NBTEXT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Major nbformat version produced and accepted by the notebook I/O.
pub const NBFORMAT: u64 = 4;

/// Minor nbformat version given to notebooks created from text.
///
/// Cell ids exist from minor version 5 onwards.
pub const NBFORMAT_MINOR: u64 = 5;

/// Minor nbformat version from which cells carry an `id`.
pub const NBFORMAT_MINOR_WITH_CELL_IDS: u64 = 5;

/// Length of generated cell ids.
pub const CELL_ID_LENGTH: usize = 8;

/// Number of consecutive blank lines that end a cell in the light
/// and Markdown formats.
pub const BLANK_LINES_SPLIT: usize = 2;

/// Notebook metadata kept in text files when no filter is configured.
pub const DEFAULT_NOTEBOOK_METADATA: &str = "jupytext,kernelspec,kernel_info,orphan,tocdepth";

/// Root level (non `jupyter:`) header metadata kept by default.
pub const DEFAULT_ROOT_LEVEL_METADATA: &str = "-all";

/// Default cell metadata filter for text formats.
pub const DEFAULT_CELL_METADATA: &str = "-all";

/// Cell metadata that is never written to text files.
pub const IGNORE_CELL_METADATA: &str =
    "-autoscroll,-collapsed,-scrolled,-trusted,-execution,-ExecuteTime";

/// Cell metadata that only exists while converting and is never exported.
pub const JUPYTEXT_CELL_METADATA: [&str; 5] = [
    "skipline",
    "noskipline",
    "cell_marker",
    "lines_to_next_cell",
    "lines_to_end_of_cell_marker",
];

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Maximum size of a notebook or text document read from disk (100 MB).
///
/// Larger inputs are rejected before being read into memory.
pub const MAX_DOCUMENT_SIZE: u64 = 100 * 1024 * 1024;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignored_cell_metadata_are_exclusions() {
        assert!(IGNORE_CELL_METADATA.split(',').all(|key| key.starts_with('-')));
    }

    #[test]
    fn generated_ids_fit_in_a_uuid() {
        assert!(CELL_ID_LENGTH <= 32);
    }

    #[test]
    fn cell_ids_start_with_current_minor_version() {
        assert!(NBFORMAT_MINOR >= NBFORMAT_MINOR_WITH_CELL_IDS);
    }
}
