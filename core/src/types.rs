//! Shared primitive types used across the entire engine.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Canonical rendering of timestamps in payloads.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One row of the dataset, positionally aligned with the schema.
pub type Row = Vec<Cell>;

/// The type of a dataset column.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Bool,
    Int,
    Float,
    Text,
    Timestamp,
}

impl ColumnKind {
    /// Numeric in the aggregation sense: sum/mean/median are defined.
    pub fn is_numeric(self) -> bool {
        matches!(self, ColumnKind::Bool | ColumnKind::Int | ColumnKind::Float)
    }

    pub fn is_orderable(self) -> bool {
        !matches!(self, ColumnKind::Bool)
    }

    pub fn label(self) -> &'static str {
        match self {
            ColumnKind::Bool      => "boolean",
            ColumnKind::Int       => "integer",
            ColumnKind::Float     => "decimal",
            ColumnKind::Text      => "text",
            ColumnKind::Timestamp => "timestamp",
        }
    }
}

/// A single typed value.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(NaiveDateTime),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Bool(b)  => Some(if *b { 1.0 } else { 0.0 }),
            Cell::Int(i)   => Some(*i as f64),
            Cell::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Cell::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Cell::Bool(_)                 => 0,
            Cell::Int(_) | Cell::Float(_) => 1,
            Cell::Timestamp(_)            => 2,
            Cell::Text(_)                 => 3,
            Cell::Null                    => 4,
        }
    }

    /// Total order used for grouping keys and sorting. Nulls sort last.
    pub fn total_cmp(&self, other: &Cell) -> Ordering {
        match (self, other) {
            (Cell::Null, Cell::Null)               => Ordering::Equal,
            (Cell::Bool(a), Cell::Bool(b))         => a.cmp(b),
            (Cell::Int(a), Cell::Int(b))           => a.cmp(b),
            (Cell::Text(a), Cell::Text(b))         => a.cmp(b),
            (Cell::Timestamp(a), Cell::Timestamp(b)) => a.cmp(b),
            (Cell::Int(_) | Cell::Float(_), Cell::Int(_) | Cell::Float(_)) => {
                let (a, b) = (self.as_f64().unwrap_or(f64::NAN), other.as_f64().unwrap_or(f64::NAN));
                a.total_cmp(&b)
            }
            _ => self.rank().cmp(&other.rank()),
        }
    }

    /// Render as a segment label (map keys in statistical results).
    pub fn label(&self) -> String {
        match self {
            Cell::Null         => "null".to_string(),
            Cell::Bool(b)      => b.to_string(),
            Cell::Int(i)       => i.to_string(),
            Cell::Float(f)     => f.to_string(),
            Cell::Text(s)      => s.clone(),
            Cell::Timestamp(t) => t.format(TIMESTAMP_FORMAT).to_string(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            Cell::Null         => Value::Null,
            Cell::Bool(b)      => Value::Bool(*b),
            Cell::Int(i)       => Value::from(*i),
            Cell::Float(f)     => float_json(*f),
            Cell::Text(s)      => Value::String(s.clone()),
            Cell::Timestamp(t) => Value::String(t.format(TIMESTAMP_FORMAT).to_string()),
        }
    }
}

/// Non-finite floats have no JSON form; they become null.
pub fn float_json(f: f64) -> serde_json::Value {
    serde_json::Number::from_f64(f)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

/// A composite grouping key with a total order.
#[derive(Debug, Clone)]
pub struct GroupKey(pub Vec<Cell>);

impl PartialEq for GroupKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for GroupKey {}

impl PartialOrd for GroupKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for GroupKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| a.total_cmp(b))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or_else(|| self.0.len().cmp(&other.0.len()))
    }
}
