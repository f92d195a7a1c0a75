//! # Core Type Definitions
//!
//! This module contains the notebook model shared by every converter stage:
//! - Notebook metadata (`Metadata`, an insertion-ordered JSON object)
//! - Cells (`Cell`, `CellType`)
//! - Notebooks (`Notebook`)
//! - Error types (`NbTextError`)
//!
//! ## Ordering Guarantees
//!
//! Metadata keeps the order in which keys were inserted, so a notebook read
//! from text and written back produces its options in the same order.

use crate::primitives::{NBFORMAT, NBFORMAT_MINOR};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Notebook or cell metadata: an insertion-ordered JSON object.
pub type Metadata = serde_json::Map<String, Value>;

/// Result alias used across the converter.
pub type Result<T> = std::result::Result<T, NbTextError>;

// =============================================================================
// CELLS
// =============================================================================

/// The three kinds of notebook cells.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum CellType {
    #[default]
    Code,
    Markdown,
    Raw,
}

impl CellType {
    /// The nbformat name of this cell type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Markdown => "markdown",
            Self::Raw => "raw",
        }
    }

    /// Parse an nbformat cell type. `md` is accepted for Markdown.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "code" => Some(Self::Code),
            "markdown" | "md" => Some(Self::Markdown),
            "raw" => Some(Self::Raw),
            _ => None,
        }
    }
}

impl fmt::Display for CellType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A notebook cell.
///
/// `execution_count` and `outputs` are only meaningful for code cells,
/// `attachments` only for Markdown and raw cells.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Cell {
    pub cell_type: CellType,
    pub id: Option<String>,
    pub metadata: Metadata,
    pub source: String,
    pub execution_count: Option<i64>,
    pub outputs: Vec<Value>,
    pub attachments: Option<Value>,
}

impl Cell {
    /// Create a cell of the given type with empty metadata.
    #[must_use]
    pub fn new(cell_type: CellType, source: impl Into<String>) -> Self {
        Self {
            cell_type,
            source: source.into(),
            ..Self::default()
        }
    }

    /// Create a code cell.
    #[must_use]
    pub fn code(source: impl Into<String>) -> Self {
        Self::new(CellType::Code, source)
    }

    /// Create a Markdown cell.
    #[must_use]
    pub fn markdown(source: impl Into<String>) -> Self {
        Self::new(CellType::Markdown, source)
    }

    /// Create a raw cell.
    #[must_use]
    pub fn raw(source: impl Into<String>) -> Self {
        Self::new(CellType::Raw, source)
    }

    /// Replace the cell metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Is this a code cell?
    #[must_use]
    pub fn is_code(&self) -> bool {
        self.cell_type == CellType::Code
    }

    /// The source split into lines, without line terminators.
    ///
    /// An empty source has no lines.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        split_lines(&self.source)
    }
}

// =============================================================================
// NOTEBOOK
// =============================================================================

/// A Jupyter notebook in nbformat 4.
#[derive(Debug, Clone, PartialEq)]
pub struct Notebook {
    pub nbformat: u64,
    pub nbformat_minor: u64,
    pub metadata: Metadata,
    pub cells: Vec<Cell>,
}

impl Notebook {
    /// Create a notebook in the current nbformat version.
    #[must_use]
    pub fn new(cells: Vec<Cell>, metadata: Metadata) -> Self {
        Self {
            nbformat: NBFORMAT,
            nbformat_minor: NBFORMAT_MINOR,
            metadata,
            cells,
        }
    }

    /// The `jupytext` section of the notebook metadata, if any.
    #[must_use]
    pub fn jupytext(&self) -> Option<&Metadata> {
        self.metadata.get("jupytext").and_then(Value::as_object)
    }
}

impl Default for Notebook {
    fn default() -> Self {
        Self::new(Vec::new(), Metadata::new())
    }
}

// =============================================================================
// METADATA HELPERS
// =============================================================================

/// The object stored under `key`, if `key` holds an object.
#[must_use]
pub fn section<'a>(metadata: &'a Metadata, key: &str) -> Option<&'a Metadata> {
    metadata.get(key).and_then(Value::as_object)
}

/// The object stored under `key`, created (or replaced, when `key` holds
/// something else) as an empty object.
pub fn section_mut<'a>(metadata: &'a mut Metadata, key: &str) -> &'a mut Metadata {
    if !metadata.get(key).is_some_and(Value::is_object) {
        metadata.insert(key.to_string(), Value::Object(Metadata::new()));
    }
    match metadata.get_mut(key) {
        Some(Value::Object(map)) => map,
        _ => unreachable!("section was just set to an object"),
    }
}

/// A string stored under `section.key`.
#[must_use]
pub fn section_str<'a>(metadata: &'a Metadata, section_key: &str, key: &str) -> Option<&'a str> {
    section(metadata, section_key)
        .and_then(|s| s.get(key))
        .and_then(Value::as_str)
}

/// Remove `section.key`, and `section` itself when it becomes empty.
pub fn pop_from_section(metadata: &mut Metadata, section_key: &str, key: &str) -> Option<Value> {
    let removed = match metadata.get_mut(section_key) {
        Some(Value::Object(map)) => map.shift_remove(key),
        _ => None,
    };
    if metadata
        .get(section_key)
        .and_then(Value::as_object)
        .is_some_and(Metadata::is_empty)
    {
        metadata.shift_remove(section_key);
    }
    removed
}

/// Split a text into lines like Python's `str.splitlines()` restricted to
/// `\n`: a trailing newline does not produce an empty last line.
#[must_use]
pub fn split_lines(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    let text = text.strip_suffix('\n').unwrap_or(text);
    text.split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
        .collect()
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur while converting notebooks.
///
/// - No silent failures
/// - Use `Result<T, NbTextError>` for fallible operations
/// - The converter should never panic; all errors must be recoverable
#[derive(Debug, Error)]
pub enum NbTextError {
    /// A format string or format option is invalid.
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// The notebook JSON does not follow nbformat 4.
    #[error("Invalid notebook: {0}")]
    InvalidNotebook(String),

    /// The notebook uses an nbformat version this converter cannot read.
    #[error("Notebooks in nbformat version {major}.{minor} are not supported")]
    UnsupportedNbformat { major: u64, minor: u64 },

    /// The text header (YAML front matter or encoding line) is invalid.
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// A file name does not match the expected paired format.
    #[error("Inconsistent path: {0}")]
    InconsistentPath(String),

    /// The configuration file is invalid.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Two notebooks that should be equal differ.
    #[error("Notebook difference: {0}")]
    NotebookDifference(String),

    /// A cell reader did not consume any line.
    #[error("Reader made no progress at lines:\n{0}")]
    ReaderBlocked(String),

    /// No kernel matches the requested name or language.
    #[error("Kernel error: {0}")]
    KernelError(String),

    /// A serialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A deserialization error occurred.
    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),
}

// =============================================================================
// TESTS
// =============================================================================
