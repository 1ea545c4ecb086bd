#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Notebook document model and extraction.
//!
//! Parses nbformat-style JSON into an ordered cell list and exposes the
//! extracted code text, narrative text, and per-cell records that the
//! validator and comparator consume. Cell order is preserved end-to-end;
//! nothing is dropped or duplicated, and error outputs survive unmodified.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Errors raised while loading or parsing a notebook document.
///
/// A malformed document is fatal for the submission it belongs to: it is
/// reported as an ungraded result, never retried and never silently skipped.
#[derive(thiserror::Error, Debug)]
pub enum DocumentError {
    /// The document could not be parsed as structured notebook JSON.
    #[error("malformed notebook document: {reason}")]
    Malformed {
        /// Why parsing failed.
        reason: String,
    },
    /// The document could not be read from disk.
    #[error("could not read notebook document: {0}")]
    Io(#[from] std::io::Error),
}

/// Kind of a notebook cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellKind {
    /// An executable code cell.
    Code,
    /// A markdown/raw narrative cell.
    Narrative,
}

/// A single captured output attached to a code cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Output {
    /// Plain text output (stream output or a text/plain result).
    Text {
        /// The captured text.
        text: String,
    },
    /// A tabular result (rendered with an HTML table representation).
    Table {
        /// The text/plain rendering of the table.
        text: String,
    },
    /// An image output; only the MIME type is retained.
    Image {
        /// MIME type of the image payload.
        mime: String,
    },
    /// An execution error. First-class grading evidence, not an exception.
    Error {
        /// Error class name.
        ename:  String,
        /// Error message.
        evalue: String,
    },
}

impl Output {
    /// Returns true if this output is an execution error marker.
    pub fn is_error(&self) -> bool {
        matches!(self, Output::Error { .. })
    }

    /// Returns the comparable text of this output, if it has any.
    pub fn text(&self) -> Option<&str> {
        match self {
            Output::Text { text } | Output::Table { text } => Some(text.as_str()),
            Output::Image { .. } | Output::Error { .. } => None,
        }
    }
}

/// A single notebook cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    /// Whether this is a code or narrative cell.
    pub kind:            CellKind,
    /// The cell's source text.
    pub source:          String,
    /// Captured outputs, in notebook order. Empty for narrative cells.
    pub outputs:         Vec<Output>,
    /// Execution marker: the order this cell was run in, if it was run.
    pub execution_count: Option<u64>,
}

/// An ordered notebook document.
///
/// Owned by the extractor for the duration of one grading run and never
/// mutated in place; normalization and execution each produce a new derived
/// document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notebook {
    /// The cells, in document order.
    cells: Vec<Cell>,
}

/// nbformat `source` fields arrive either as a string or a line array.
#[derive(Deserialize)]
#[serde(untagged)]
enum SourceText {
    /// Source as one string.
    Text(String),
    /// Source as a list of lines (with embedded newlines).
    Lines(Vec<String>),
}

impl SourceText {
    /// Joins the source into a single string.
    fn join(self) -> String {
        match self {
            SourceText::Text(s) => s,
            SourceText::Lines(lines) => lines.concat(),
        }
    }
}

/// Wire format for a notebook cell.
#[derive(Deserialize)]
struct RawCell {
    /// nbformat cell type: `code`, `markdown`, or `raw`.
    cell_type:       String,
    /// Cell source text.
    source:          SourceText,
    /// Captured outputs for code cells.
    #[serde(default)]
    outputs:         Vec<Value>,
    /// Execution counter, if the cell was run.
    #[serde(default)]
    execution_count: Option<u64>,
}

/// Wire format for a notebook document.
#[derive(Deserialize)]
struct RawNotebook {
    /// The document's cells.
    cells: Vec<RawCell>,
}

impl Notebook {
    /// Creates a notebook directly from cells. Used by the execution gate to
    /// build derived documents and by tests.
    pub fn from_cells(cells: Vec<Cell>) -> Self {
        Self { cells }
    }

    /// Reads and parses a notebook document from disk.
    pub fn from_path(path: &Path) -> Result<Self, DocumentError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Parses a notebook document from nbformat-style JSON.
    pub fn from_json_str(raw: &str) -> Result<Self, DocumentError> {
        let parsed: RawNotebook =
            serde_json::from_str(raw).map_err(|e| DocumentError::Malformed {
                reason: e.to_string(),
            })?;

        let mut cells = Vec::with_capacity(parsed.cells.len());
        for (index, cell) in parsed.cells.into_iter().enumerate() {
            let kind = match cell.cell_type.as_str() {
                "code" => CellKind::Code,
                "markdown" | "raw" => CellKind::Narrative,
                other => {
                    return Err(DocumentError::Malformed {
                        reason: format!("cell {index} has unknown cell_type `{other}`"),
                    });
                }
            };

            let outputs = cell
                .outputs
                .iter()
                .filter_map(convert_output)
                .collect::<Vec<_>>();

            cells.push(Cell {
                kind,
                source: cell.source.join(),
                outputs,
                execution_count: cell.execution_count,
            });
        }

        Ok(Self { cells })
    }

    /// Returns the cells in document order.
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// Renders the notebook back into minimal nbformat v4 JSON, suitable for
    /// handing to an execution sandbox.
    pub fn to_nbformat(&self) -> Value {
        let cells: Vec<Value> = self
            .cells
            .iter()
            .map(|cell| match cell.kind {
                CellKind::Code => json!({
                    "cell_type": "code",
                    "metadata": {},
                    "source": cell.source,
                    "execution_count": cell.execution_count,
                    "outputs": cell.outputs.iter().map(render_output).collect::<Vec<_>>(),
                }),
                CellKind::Narrative => json!({
                    "cell_type": "markdown",
                    "metadata": {},
                    "source": cell.source,
                }),
            })
            .collect();

        json!({
            "nbformat": 4,
            "nbformat_minor": 5,
            "metadata": {},
            "cells": cells,
        })
    }

    /// Extracts code text, narrative text, and per-cell records, preserving
    /// the mapping from extracted code back to originating cell index.
    pub fn extract(&self) -> ExtractedSource {
        let mut code_text = Vec::new();
        let mut narrative_text = Vec::new();
        let mut code_cells = Vec::new();

        for (cell_index, cell) in self.cells.iter().enumerate() {
            match cell.kind {
                CellKind::Code => {
                    code_text.push(cell.source.clone());
                    code_cells.push(CodeCellRecord {
                        cell_index,
                        code: cell.source.clone(),
                        outputs: cell.outputs.clone(),
                        executed: cell.execution_count.is_some() || !cell.outputs.is_empty(),
                    });
                }
                CellKind::Narrative => narrative_text.push(cell.source.clone()),
            }
        }

        ExtractedSource {
            code_text: code_text.join("\n\n"),
            narrative_text: narrative_text.join("\n\n"),
            code_cells,
        }
    }
}

/// Converts one nbformat output object into the domain `Output` type.
///
/// Outputs with no recognisable payload (e.g. empty data bundles) are
/// represented as empty text rather than dropped, so the comparator still
/// sees the unit.
fn convert_output(raw: &Value) -> Option<Output> {
    let output_type = raw.get("output_type")?.as_str()?;
    match output_type {
        "stream" => Some(Output::Text {
            text: join_text(raw.get("text")),
        }),
        "error" => Some(Output::Error {
            ename:  raw
                .get("ename")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            evalue: raw
                .get("evalue")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }),
        "execute_result" | "display_data" => {
            let data = raw.get("data");
            let plain = join_text(data.and_then(|d| d.get("text/plain")));

            let html = data
                .and_then(|d| d.get("text/html"))
                .map(|v| join_text(Some(v)))
                .unwrap_or_default();
            if html.contains("<table") {
                return Some(Output::Table { text: plain });
            }

            if let Some(map) = data.and_then(Value::as_object)
                && let Some(mime) = map.keys().find(|k| k.starts_with("image/"))
            {
                return Some(Output::Image { mime: mime.clone() });
            }

            Some(Output::Text { text: plain })
        }
        _ => None,
    }
}

/// Renders a domain `Output` back into nbformat JSON.
fn render_output(output: &Output) -> Value {
    match output {
        Output::Text { text } => json!({
            "output_type": "stream",
            "name": "stdout",
            "text": text,
        }),
        Output::Table { text } => json!({
            "output_type": "execute_result",
            "execution_count": null,
            "metadata": {},
            "data": { "text/plain": text, "text/html": "<table></table>" },
        }),
        Output::Image { mime } => json!({
            "output_type": "display_data",
            "metadata": {},
            "data": { (mime.as_str()): "" },
        }),
        Output::Error { ename, evalue } => json!({
            "output_type": "error",
            "ename": ename,
            "evalue": evalue,
            "traceback": [],
        }),
    }
}

/// Joins an nbformat text field (string or line array) into one string.
fn join_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .concat(),
        _ => String::new(),
    }
}

/// Per-cell record kept alongside the concatenated code text so later stages
/// can align outputs cell-by-cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeCellRecord {
    /// Index of the originating cell in the notebook.
    pub cell_index: usize,
    /// The cell's code.
    pub code:       String,
    /// Captured outputs for the cell.
    pub outputs:    Vec<Output>,
    /// Whether the cell carries evidence of having been run.
    pub executed:   bool,
}

/// Extraction result: concatenated code and narrative plus per-cell records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedSource {
    /// All code cells concatenated in order.
    pub code_text:      String,
    /// All narrative cells concatenated in order.
    pub narrative_text: String,
    /// Per-code-cell records, in order.
    pub code_cells:     Vec<CodeCellRecord>,
}

impl ExtractedSource {
    /// Fraction of code cells that carry at least one output, in 0..=1.
    pub fn execution_rate(&self) -> f64 {
        if self.code_cells.is_empty() {
            return 1.0;
        }
        let with_output = self
            .code_cells
            .iter()
            .filter(|c| !c.outputs.is_empty())
            .count();
        with_output as f64 / self.code_cells.len() as f64
    }

    /// Number of execution-error outputs captured across all code cells.
    pub fn error_output_count(&self) -> usize {
        self.code_cells
            .iter()
            .flat_map(|c| c.outputs.iter())
            .filter(|o| o.is_error())
            .count()
    }

    /// Total size in bytes of all captured textual output.
    pub fn total_output_bytes(&self) -> usize {
        self.code_cells
            .iter()
            .flat_map(|c| c.outputs.iter())
            .filter_map(Output::text)
            .map(str::len)
            .sum()
    }
}
