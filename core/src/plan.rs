//! Execution plan — the data contract between the compiler and the executor.
//!
//! A plan is a value object: built once, consumed once, never mutated.
//! Stages always run in the same order:
//!   filter -> group/aggregate -> computations -> sort -> limit

use crate::{
    dataset::normalize_column_name,
    error::{InsightError, InsightResult},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

// ── Filters ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FilterOp {
    #[serde(rename = "==", alias = "=", alias = "eq")]
    Eq,
    #[serde(rename = "!=", alias = "<>", alias = "ne")]
    Ne,
    #[serde(rename = ">", alias = "gt")]
    Gt,
    #[serde(rename = "<", alias = "lt")]
    Lt,
    #[serde(rename = ">=", alias = "gte")]
    Ge,
    #[serde(rename = "<=", alias = "lte")]
    Le,
    #[serde(rename = "in")]
    In,
}

impl FilterOp {
    pub fn symbol(self) -> &'static str {
        match self {
            FilterOp::Eq => "==",
            FilterOp::Ne => "!=",
            FilterOp::Gt => ">",
            FilterOp::Lt => "<",
            FilterOp::Ge => ">=",
            FilterOp::Le => "<=",
            FilterOp::In => "in",
        }
    }

    pub fn is_ordering(self) -> bool {
        matches!(self, FilterOp::Gt | FilterOp::Lt | FilterOp::Ge | FilterOp::Le)
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for FilterOp {
    type Err = InsightError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "==" | "=" | "eq" | "equals" | "is"        => Ok(FilterOp::Eq),
            "!=" | "<>" | "ne" | "not_equals" | "neq"  => Ok(FilterOp::Ne),
            ">" | "gt"                                  => Ok(FilterOp::Gt),
            "<" | "lt"                                  => Ok(FilterOp::Lt),
            ">=" | "gte" | "ge"                         => Ok(FilterOp::Ge),
            "<=" | "lte" | "le"                         => Ok(FilterOp::Le),
            "in" | "isin"                               => Ok(FilterOp::In),
            other => Err(InsightError::PlanValidation(format!("unknown operator '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilterCondition {
    pub column:   String,
    pub operator: FilterOp,
    #[serde(default)]
    pub value:    Value,
}

impl FilterCondition {
    pub fn new(column: impl Into<String>, operator: FilterOp, value: impl Into<Value>) -> Self {
        Self { column: column.into(), operator, value: value.into() }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, FilterOp::Eq, value)
    }
}

// ── Aggregations ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AggFunc {
    Count,
    Sum,
    #[serde(alias = "avg", alias = "average")]
    Mean,
    Median,
    Min,
    Max,
}

impl AggFunc {
    pub fn name(self) -> &'static str {
        match self {
            AggFunc::Count  => "count",
            AggFunc::Sum    => "sum",
            AggFunc::Mean   => "mean",
            AggFunc::Median => "median",
            AggFunc::Min    => "min",
            AggFunc::Max    => "max",
        }
    }
}

impl fmt::Display for AggFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AggFunc {
    type Err = InsightError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "count"                   => Ok(AggFunc::Count),
            "sum"                     => Ok(AggFunc::Sum),
            "mean" | "avg" | "average" => Ok(AggFunc::Mean),
            "median"                  => Ok(AggFunc::Median),
            "min"                     => Ok(AggFunc::Min),
            "max"                     => Ok(AggFunc::Max),
            other => Err(InsightError::PlanValidation(format!("unknown aggregation function '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AggregationSpec {
    pub column:   String,
    pub function: AggFunc,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias:    Option<String>,
}

impl AggregationSpec {
    pub fn new(column: impl Into<String>, function: AggFunc) -> Self {
        Self { column: column.into(), function, alias: None }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// The result column name: the alias, or `{function}_{column}`.
    pub fn output_name(&self) -> String {
        self.alias
            .clone()
            .unwrap_or_else(|| format!("{}_{}", self.function, self.column))
    }
}

// ── Computations, sort ───────────────────────────────────────────────────────

/// A derived metric evaluated over each result row, e.g.
/// `{"name": "avg_ticket", "formula": "sum_amount_inr / transaction_count"}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Computation {
    pub name:    String,
    pub formula: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SortSpec {
    pub by:        String,
    #[serde(default)]
    pub ascending: bool,
}

// ── Plan ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutionPlan {
    pub filters:      Vec<FilterCondition>,
    pub groupby:      Vec<String>,
    pub aggregations: Vec<AggregationSpec>,
    pub computations: Vec<Computation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort:         Option<SortSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit:        Option<usize>,
}

impl ExecutionPlan {
    /// The safe default: no filters, no grouping, one row count.
    pub fn default_count(identifier_column: &str) -> Self {
        Self {
            aggregations: vec![AggregationSpec::new(identifier_column, AggFunc::Count)],
            ..Self::default()
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.groupby.is_empty() && self.aggregations.is_empty()
    }

    /// Output column names in result order.
    pub fn output_columns(&self) -> Vec<String> {
        let mut columns = self.output_columns_without_computations();
        columns.extend(self.computations.iter().map(|c| c.name.clone()));
        columns
    }

    /// Group keys followed by aggregation outputs.
    pub fn output_columns_without_computations(&self) -> Vec<String> {
        self.groupby
            .iter()
            .cloned()
            .chain(self.aggregations.iter().map(AggregationSpec::output_name))
            .collect()
    }

    /// Reject output names that would overwrite one another.
    pub fn check_unique_outputs(&self) -> InsightResult<()> {
        let names = self.output_columns();
        for (i, name) in names.iter().enumerate() {
            if names[..i].contains(name) {
                return Err(InsightError::PlanValidation(format!(
                    "duplicate output column '{name}'; give each aggregation a distinct alias"
                )));
            }
        }
        Ok(())
    }

    /// Lenient parse of a plan payload produced outside the process.
    ///
    /// Structural problems (wrong JSON types) are `PlanCompilation` errors.
    /// Unknown operator or function names are `PlanValidation` errors.
    /// Column names are normalized the same way the dataset headers are.
    pub fn from_value(value: &Value) -> InsightResult<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| malformed("plan must be a JSON object"))?;

        let filters = match obj.get("filters") {
            None | Some(Value::Null) => Vec::new(),
            Some(v) => parse_filters(v)?,
        };

        let groupby = match obj.get("groupby") {
            None | Some(Value::Null) => Vec::new(),
            Some(v) => string_list(v, "groupby")?
                .iter()
                .map(|c| normalize_column_name(c))
                .collect(),
        };

        let aggregations = match obj.get("aggregations") {
            None | Some(Value::Null) => Vec::new(),
            Some(v) => array(v, "aggregations")?
                .iter()
                .map(parse_aggregation)
                .collect::<InsightResult<Vec<_>>>()?,
        };

        let computations = match obj.get("computations") {
            None | Some(Value::Null) => Vec::new(),
            Some(v) => array(v, "computations")?
                .iter()
                .map(|c| {
                    Ok(Computation {
                        name:    required_str(c, "name", "computation")?.to_string(),
                        formula: required_str(c, "formula", "computation")?.to_string(),
                    })
                })
                .collect::<InsightResult<Vec<_>>>()?,
        };

        let sort = match obj.get("sort") {
            None | Some(Value::Null) => None,
            Some(Value::String(by)) => Some(SortSpec { by: by.trim().to_string(), ascending: false }),
            Some(v @ Value::Object(_)) => Some(SortSpec {
                by:        required_str(v, "by", "sort")?.trim().to_string(),
                ascending: match v.get("ascending") {
                    None | Some(Value::Null) => false,
                    Some(Value::Bool(b)) => *b,
                    Some(_) => return Err(malformed("sort.ascending must be a boolean")),
                },
            }),
            Some(_) => return Err(malformed("sort must be an object with 'by' and 'ascending'")),
        };

        let limit = match obj.get("limit") {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => {
                let n = n
                    .as_i64()
                    .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                    .ok_or_else(|| malformed("limit must be an integer"))?;
                if n > 0 {
                    Some(n as usize)
                } else {
                    log::warn!("Ignoring non-positive limit {n}");
                    None
                }
            }
            Some(_) => return Err(malformed("limit must be an integer")),
        };

        Ok(Self { filters, groupby, aggregations, computations, sort, limit })
    }
}

// ── Lenient parsing helpers ──────────────────────────────────────────────────

fn malformed(msg: impl Into<String>) -> InsightError {
    InsightError::PlanCompilation(msg.into())
}

fn array<'a>(value: &'a Value, field: &str) -> InsightResult<&'a Vec<Value>> {
    value
        .as_array()
        .ok_or_else(|| malformed(format!("{field} must be an array")))
}

fn required_str<'a>(value: &'a Value, key: &str, what: &str) -> InsightResult<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| malformed(format!("{what} needs a string '{key}'")))
}

/// A string or an array of strings.
pub(crate) fn string_list(value: &Value, field: &str) -> InsightResult<Vec<String>> {
    match value {
        Value::String(s) => Ok(vec![s.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|i| {
                i.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| malformed(format!("{field} entries must be strings")))
            })
            .collect(),
        _ => Err(malformed(format!("{field} must be a string or an array of strings"))),
    }
}

/// Parse a filter list. A scalar value given to `in` becomes a one-element set.
pub(crate) fn parse_filters(value: &Value) -> InsightResult<Vec<FilterCondition>> {
    array(value, "filters")?
        .iter()
        .map(|f| {
            if !f.is_object() {
                return Err(malformed("each filter must be an object"));
            }
            let column = normalize_column_name(required_str(f, "column", "filter")?);
            let operator: FilterOp = required_str(f, "operator", "filter")?.parse()?;
            let mut value = f.get("value").cloned().unwrap_or(Value::Null);
            if operator == FilterOp::In && !value.is_array() {
                value = Value::Array(vec![value]);
            }
            Ok(FilterCondition { column, operator, value })
        })
        .collect()
}

fn parse_aggregation(value: &Value) -> InsightResult<AggregationSpec> {
    if !value.is_object() {
        return Err(malformed("each aggregation must be an object"));
    }
    let column = normalize_column_name(required_str(value, "column", "aggregation")?);
    let function: AggFunc = required_str(value, "function", "aggregation")?.parse()?;
    let alias = value
        .get("alias")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string);
    Ok(AggregationSpec { column, function, alias })
}
