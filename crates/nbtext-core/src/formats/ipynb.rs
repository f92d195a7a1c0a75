//! # Notebook Files
//!
//! Reads and writes `.ipynb` files in nbformat 4.
//!
//! - Sources are multi-line strings, or arrays of lines, when read; they are
//!   always written as arrays of lines
//! - Cells carry an `id` from nbformat 4.5; missing ids are generated
//! - Output lists keys in sorted order with a one-space indent and ends with
//!   a newline, like Jupyter does

use crate::json::to_pretty_sorted;
use crate::primitives::{CELL_ID_LENGTH, NBFORMAT, NBFORMAT_MINOR_WITH_CELL_IDS};
use crate::types::{Cell, CellType, Metadata, NbTextError, Notebook, Result};
use serde_json::{Value, json};
use uuid::Uuid;

/// A random cell id.
#[must_use]
pub fn new_cell_id() -> String {
    Uuid::new_v4().simple().to_string()[..CELL_ID_LENGTH].to_string()
}

// =============================================================================
// READING
// =============================================================================

fn source_from_value(value: Option<&Value>) -> Result<String> {
    match value {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(text)) => Ok(text.clone()),
        Some(Value::Array(lines)) => lines
            .iter()
            .map(|line| {
                line.as_str().ok_or_else(|| {
                    NbTextError::InvalidNotebook(format!("source lines should be strings, not {}", line))
                })
            })
            .collect::<Result<Vec<&str>>>()
            .map(|lines| lines.concat()),
        Some(other) => Err(NbTextError::InvalidNotebook(format!(
            "cell source should be a string or a list of strings, not {}",
            other
        ))),
    }
}

fn cell_from_value(value: &Value) -> Result<Cell> {
    let Some(map) = value.as_object() else {
        return Err(NbTextError::InvalidNotebook("cells should be objects".to_string()));
    };
    let cell_type = map
        .get("cell_type")
        .and_then(Value::as_str)
        .ok_or_else(|| NbTextError::InvalidNotebook("cell without a cell_type".to_string()))?;
    let cell_type = CellType::parse(cell_type)
        .filter(|_| cell_type != "md")
        .ok_or_else(|| NbTextError::InvalidNotebook(format!("unknown cell type '{}'", cell_type)))?;

    let metadata = match map.get("metadata") {
        None | Some(Value::Null) => Metadata::new(),
        Some(Value::Object(metadata)) => metadata.clone(),
        Some(other) => {
            return Err(NbTextError::InvalidNotebook(format!(
                "cell metadata should be an object, not {}",
                other
            )));
        }
    };

    let mut cell = Cell::new(cell_type, source_from_value(map.get("source"))?).with_metadata(metadata);
    cell.id = map.get("id").and_then(Value::as_str).map(str::to_string);
    if cell_type == CellType::Code {
        cell.execution_count = map.get("execution_count").and_then(Value::as_i64);
        cell.outputs = match map.get("outputs") {
            Some(Value::Array(outputs)) => outputs.clone(),
            _ => Vec::new(),
        };
    } else {
        cell.attachments = map.get("attachments").cloned().filter(|a| !a.is_null());
    }
    Ok(cell)
}

/// Parse an `.ipynb` document.
pub fn reads_ipynb(text: &str) -> Result<Notebook> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| NbTextError::DeserializationError(e.to_string()))?;
    let Some(map) = value.as_object() else {
        return Err(NbTextError::InvalidNotebook("a notebook should be a JSON object".to_string()));
    };

    let major = map.get("nbformat").and_then(Value::as_u64).unwrap_or(0);
    let minor = map.get("nbformat_minor").and_then(Value::as_u64).unwrap_or(0);
    if major != NBFORMAT {
        return Err(NbTextError::UnsupportedNbformat { major, minor });
    }

    let metadata = map
        .get("metadata")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let cells = match map.get("cells") {
        Some(Value::Array(cells)) => cells.iter().map(cell_from_value).collect::<Result<Vec<_>>>()?,
        _ => return Err(NbTextError::InvalidNotebook("the notebook has no cells list".to_string())),
    };

    Ok(Notebook {
        nbformat: major,
        nbformat_minor: minor,
        metadata,
        cells,
    })
}

// =============================================================================
// WRITING
// =============================================================================

/// Split a source into lines that keep their newline.
fn source_lines(source: &str) -> Value {
    Value::Array(
        source
            .split_inclusive('\n')
            .map(|line| Value::String(line.to_string()))
            .collect(),
    )
}

fn cell_to_value(cell: &Cell, with_id: bool) -> Value {
    let mut map = Metadata::new();
    map.insert("cell_type".to_string(), json!(cell.cell_type.as_str()));
    if with_id {
        let id = cell.id.clone().unwrap_or_else(new_cell_id);
        map.insert("id".to_string(), Value::String(id));
    }
    map.insert("metadata".to_string(), Value::Object(cell.metadata.clone()));
    map.insert("source".to_string(), source_lines(&cell.source));
    if cell.cell_type == CellType::Code {
        map.insert("execution_count".to_string(), json!(cell.execution_count));
        map.insert("outputs".to_string(), Value::Array(cell.outputs.clone()));
    } else if let Some(attachments) = &cell.attachments {
        map.insert("attachments".to_string(), attachments.clone());
    }
    Value::Object(map)
}

/// The JSON value of a notebook, as written to `.ipynb` files.
#[must_use]
pub fn notebook_to_value(nb: &Notebook) -> Value {
    let with_ids = nb.nbformat_minor >= NBFORMAT_MINOR_WITH_CELL_IDS;
    json!({
        "cells": nb.cells.iter().map(|cell| cell_to_value(cell, with_ids)).collect::<Vec<_>>(),
        "metadata": nb.metadata,
        "nbformat": nb.nbformat,
        "nbformat_minor": nb.nbformat_minor,
    })
}

/// Serialize a notebook as an `.ipynb` document.
pub fn writes_ipynb(nb: &Notebook) -> Result<String> {
    let mut text = to_pretty_sorted(&notebook_to_value(nb), 1)?;
    text.push('\n');
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOTEBOOK: &str = r##"{
 "cells": [
  {
   "cell_type": "markdown",
   "id": "cell-md",
   "metadata": {},
   "source": [
    "# Title\n",
    "\n",
    "Text"
   ]
  },
  {
   "cell_type": "code",
   "execution_count": 1,
   "id": "cell-code",
   "metadata": {
    "tags": [
     "parameters"
    ]
   },
   "outputs": [
    {
     "name": "stdout",
     "output_type": "stream",
     "text": [
      "2\n"
     ]
    }
   ],
   "source": [
    "print(1 + 1)"
   ]
  }
 ],
 "metadata": {
  "kernelspec": {
   "display_name": "Python 3",
   "language": "python",
   "name": "python3"
  }
 },
 "nbformat": 4,
 "nbformat_minor": 5
}
"##;

    #[test]
    fn reads_cells_and_outputs() {
        let nb = reads_ipynb(NOTEBOOK).expect("valid notebook");
        assert_eq!(nb.cells.len(), 2);
        assert_eq!(nb.cells[0].source, "# Title\n\nText");
        assert_eq!(nb.cells[1].execution_count, Some(1));
        assert_eq!(nb.cells[1].outputs.len(), 1);
        assert_eq!(nb.cells[1].id.as_deref(), Some("cell-code"));
    }

    #[test]
    fn writes_what_it_reads() {
        let nb = reads_ipynb(NOTEBOOK).expect("valid notebook");
        assert_eq!(writes_ipynb(&nb).expect("serializable"), NOTEBOOK);
    }

    #[test]
    fn string_sources_are_accepted() {
        let text = r#"{"cells": [{"cell_type": "raw", "metadata": {}, "source": "a\nb"}],
                       "metadata": {}, "nbformat": 4, "nbformat_minor": 4}"#;
        let nb = reads_ipynb(text).expect("valid notebook");
        assert_eq!(nb.cells[0].source, "a\nb");
        let written = writes_ipynb(&nb).expect("serializable");
        assert!(!written.contains("\"id\""));
    }

    #[test]
    fn missing_ids_are_generated() {
        let nb = Notebook::new(vec![Cell::code("x")], Metadata::new());
        let value = notebook_to_value(&nb);
        let id = value["cells"][0]["id"].as_str().unwrap_or_default();
        assert_eq!(id.len(), CELL_ID_LENGTH);
    }

    #[test]
    fn old_notebooks_are_rejected() {
        let text = r#"{"worksheets": [], "metadata": {}, "nbformat": 3, "nbformat_minor": 0}"#;
        assert!(matches!(
            reads_ipynb(text),
            Err(NbTextError::UnsupportedNbformat { major: 3, minor: 0 })
        ));
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(reads_ipynb("{not json").is_err());
        assert!(reads_ipynb(r#"{"nbformat": 4, "nbformat_minor": 5, "metadata": {}}"#).is_err());
    }
}
