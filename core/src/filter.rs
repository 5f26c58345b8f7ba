//! The filter stage shared by the query executor and the statistics engine.
//!
//! RULE: There is exactly one filter implementation.
//! Executor and analyses both call `apply_filters`, so a condition means
//! the same thing everywhere.
//!
//! Conditions combine with logical AND and run in the order given.
//! Each condition is compiled against the schema before any row is touched,
//! so a bad column, operator or value fails fast with a `PlanValidation`
//! error instead of a partial result.

use crate::{
    dataset::{parse_timestamp, Dataset},
    error::{InsightError, InsightResult},
    plan::{FilterCondition, FilterOp},
    types::{Cell, ColumnKind},
};
use serde_json::Value;
use std::cmp::Ordering;

/// Row indices (into the dataset) that satisfy every condition,
/// in original row order.
pub fn apply_filters(dataset: &Dataset, filters: &[FilterCondition]) -> InsightResult<Vec<usize>> {
    let predicates = filters
        .iter()
        .map(|f| Predicate::compile(dataset, f))
        .collect::<InsightResult<Vec<_>>>()?;

    let mut selected = dataset.all_indices();
    for (predicate, filter) in predicates.iter().zip(filters) {
        selected.retain(|&i| predicate.matches(&dataset.row(i)[predicate.column]));
        log::debug!(
            "Filter {} {} {} kept {} rows",
            filter.column,
            filter.operator,
            filter.value,
            selected.len()
        );
    }
    Ok(selected)
}

enum Target {
    Single(Cell),
    Set(Vec<Cell>),
}

struct Predicate {
    column: usize,
    op:     FilterOp,
    target: Target,
}

impl Predicate {
    fn compile(dataset: &Dataset, filter: &FilterCondition) -> InsightResult<Self> {
        let (column, kind) = dataset.schema().resolve(&filter.column)?;
        let op = filter.operator;

        let target = match (op, &filter.value) {
            (FilterOp::In, Value::Array(items)) => Target::Set(
                items
                    .iter()
                    .map(|v| coerce(v, kind, &filter.column))
                    .collect::<InsightResult<Vec<_>>>()?,
            ),
            (FilterOp::In, _) => {
                return Err(InsightError::PlanValidation(format!(
                    "operator 'in' on '{}' expects a list of values",
                    filter.column
                )))
            }
            (_, Value::Array(_)) => {
                return Err(InsightError::PlanValidation(format!(
                    "operator '{op}' on '{}' expects a single value, got a list",
                    filter.column
                )))
            }
            (_, v) => Target::Single(coerce(v, kind, &filter.column)?),
        };

        if op.is_ordering() {
            if !kind.is_orderable() {
                return Err(InsightError::PlanValidation(format!(
                    "operator '{op}' is not valid for {} column '{}'",
                    kind.label(),
                    filter.column
                )));
            }
            if matches!(target, Target::Single(Cell::Null)) {
                return Err(InsightError::PlanValidation(format!(
                    "operator '{op}' on '{}' needs a non-null value",
                    filter.column
                )));
            }
        }

        Ok(Self { column, op, target })
    }

    fn matches(&self, cell: &Cell) -> bool {
        match &self.target {
            Target::Set(values) => {
                !cell.is_null() && values.iter().any(|v| cell.total_cmp(v) == Ordering::Equal)
            }
            Target::Single(value) => {
                if cell.is_null() || value.is_null() {
                    return match self.op {
                        FilterOp::Eq => cell.is_null() && value.is_null(),
                        FilterOp::Ne => cell.is_null() != value.is_null(),
                        _ => false,
                    };
                }
                let ord = cell.total_cmp(value);
                match self.op {
                    FilterOp::Eq => ord == Ordering::Equal,
                    FilterOp::Ne => ord != Ordering::Equal,
                    FilterOp::Gt => ord == Ordering::Greater,
                    FilterOp::Lt => ord == Ordering::Less,
                    FilterOp::Ge => ord != Ordering::Less,
                    FilterOp::Le => ord != Ordering::Greater,
                    FilterOp::In => false,
                }
            }
        }
    }
}

/// Coerce a JSON filter value to the column's kind when that is lossless.
fn coerce(value: &Value, kind: ColumnKind, column: &str) -> InsightResult<Cell> {
    let mismatch = || {
        InsightError::PlanValidation(format!(
            "value {value} is not comparable with {} column '{column}'",
            kind.label()
        ))
    };

    if value.is_null() {
        return Ok(Cell::Null);
    }

    match kind {
        ColumnKind::Bool => match value {
            Value::Bool(b) => Ok(Cell::Bool(*b)),
            Value::Number(n) => match n.as_f64() {
                Some(f) if f == 0.0 => Ok(Cell::Bool(false)),
                Some(f) if f == 1.0 => Ok(Cell::Bool(true)),
                _ => Err(mismatch()),
            },
            Value::String(s) => match s.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(Cell::Bool(true)),
                "false" | "0" | "no" => Ok(Cell::Bool(false)),
                _ => Err(mismatch()),
            },
            _ => Err(mismatch()),
        },
        ColumnKind::Int | ColumnKind::Float => {
            let number = match value {
                Value::Number(n) => n.as_i64().map(Cell::Int).or_else(|| n.as_f64().map(Cell::Float)),
                Value::String(s) => {
                    let s = s.trim();
                    s.parse::<i64>()
                        .map(Cell::Int)
                        .ok()
                        .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(Cell::Float))
                }
                _ => None,
            };
            number.ok_or_else(mismatch)
        }
        ColumnKind::Text => match value {
            Value::String(s) => Ok(Cell::Text(s.clone())),
            Value::Number(n) => Ok(Cell::Text(n.to_string())),
            Value::Bool(b) => Ok(Cell::Text(b.to_string())),
            _ => Err(mismatch()),
        },
        ColumnKind::Timestamp => value
            .as_str()
            .and_then(parse_timestamp)
            .map(Cell::Timestamp)
            .ok_or_else(mismatch),
    }
}
