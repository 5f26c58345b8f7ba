//! Result tables and the wire payloads built from them.
//!
//! Every executor and analysis operation returns `InsightResult<T>`.
//! The payload types here are the JSON shapes handed across the
//! narration boundary: success XOR error, never both.

use crate::{
    error::{InsightError, InsightResult},
    types::Row,
};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use serde_json::Value;

/// A row-oriented result: column names plus aligned rows.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultTable {
    pub columns:  Vec<String>,
    pub rows:     Vec<Row>,
    /// Non-fatal notes, e.g. computations that were skipped.
    pub warnings: Vec<String>,
}

impl ResultTable {
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self { columns, rows, warnings: Vec::new() }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

/// Serializes rows as records while keeping column order,
/// independent of how serde_json orders map keys.
struct Records<'a>(&'a ResultTable);

impl Serialize for Records<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let table = self.0;
        let mut seq = serializer.serialize_seq(Some(table.rows.len()))?;
        for row in &table.rows {
            seq.serialize_element(&Record { columns: &table.columns, row })?;
        }
        seq.end()
    }
}

struct Record<'a> {
    columns: &'a [String],
    row:     &'a Row,
}

impl Serialize for Record<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (column, cell) in self.columns.iter().zip(self.row) {
            map.serialize_entry(column, &cell.to_json())?;
        }
        map.end()
    }
}

// ── Execution payload ────────────────────────────────────────────────────────

/// `{success, data?, row_count, columns, error?, warnings?}`
pub struct ExecutionPayload<'a> {
    outcome: &'a InsightResult<ResultTable>,
}

impl<'a> ExecutionPayload<'a> {
    pub fn new(outcome: &'a InsightResult<ResultTable>) -> Self {
        Self { outcome }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|e| {
            serde_json::json!({ "success": false, "error": e.to_string(), "row_count": 0, "columns": [] })
        })
    }
}

impl Serialize for ExecutionPayload<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        match self.outcome {
            Ok(table) => {
                map.serialize_entry("success", &true)?;
                map.serialize_entry("data", &Records(table))?;
                map.serialize_entry("row_count", &table.row_count())?;
                map.serialize_entry("columns", &table.columns)?;
                if !table.warnings.is_empty() {
                    map.serialize_entry("warnings", &table.warnings)?;
                }
            }
            Err(err) => {
                map.serialize_entry("success", &false)?;
                map.serialize_entry("row_count", &0)?;
                map.serialize_entry("columns", &Vec::<String>::new())?;
                map.serialize_entry("error", &err.to_string())?;
            }
        }
        map.end()
    }
}

// ── Statistical payload ──────────────────────────────────────────────────────

/// The structured output of one statistical analysis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub analysis: String,
    pub results:  Value,
}

/// `{success, analysis, results?, error?}`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisPayload {
    pub success:  bool,
    pub analysis: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results:  Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error:    Option<String>,
}

impl AnalysisPayload {
    pub fn from_outcome(analysis: &str, outcome: InsightResult<AnalysisReport>) -> Self {
        match outcome {
            Ok(report) => Self {
                success:  true,
                analysis: report.analysis,
                results:  Some(report.results),
                error:    None,
            },
            Err(err) => Self::failure(analysis, &err),
        }
    }

    pub fn failure(analysis: &str, err: &InsightError) -> Self {
        Self {
            success:  false,
            analysis: analysis.to_string(),
            results:  None,
            error:    Some(err.to_string()),
        }
    }
}
