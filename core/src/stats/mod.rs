//! Statistical analysis engine.
//!
//! A fixed catalogue of analyses over filtered slices of the dataset:
//!   - failure_rate   share of FAILED transactions, overall or per segment
//!   - fraud_rate     share of transactions flagged for review
//!   - correlation    chi-square independence test of two categorical columns
//!   - distribution   summary statistics of one numeric column
//!   - comparison     count/mean/median/sum of a metric per segment
//!
//! RULES:
//!   - Every analysis starts with the shared filter stage.
//!   - fraud_flag is a review flag. Output never labels it as confirmed fraud.
//!   - Unknown analyses and bad parameters are `Analysis` errors, never panics.

pub mod math;

use crate::{
    dataset::{normalize_column_name, Dataset, FRAUD_FLAG, STATUS},
    error::{InsightError, InsightResult},
    filter::apply_filters,
    plan::{parse_filters, FilterCondition},
    result::{AnalysisPayload, AnalysisReport},
    types::{float_json, Cell, GroupKey},
};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// p-value threshold for calling an association significant.
pub const SIGNIFICANCE_LEVEL: f64 = 0.05;

pub const ANALYSIS_TYPES: [&str; 5] =
    ["failure_rate", "fraud_rate", "correlation", "distribution", "comparison"];

const FAILED_STATUS: &str = "FAILED";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "analysis", rename_all = "snake_case")]
pub enum AnalysisRequest {
    FailureRate {
        filters:    Vec<FilterCondition>,
        #[serde(skip_serializing_if = "Option::is_none")]
        segment_by: Option<String>,
    },
    FraudRate {
        filters:    Vec<FilterCondition>,
        #[serde(skip_serializing_if = "Option::is_none")]
        segment_by: Option<String>,
    },
    Correlation {
        filters:   Vec<FilterCondition>,
        variable1: String,
        variable2: String,
    },
    Distribution {
        filters: Vec<FilterCondition>,
        column:  String,
    },
    Comparison {
        filters:    Vec<FilterCondition>,
        segment_by: String,
        metric:     String,
    },
}

impl AnalysisRequest {
    pub fn name(&self) -> &'static str {
        match self {
            AnalysisRequest::FailureRate { .. }  => "failure_rate",
            AnalysisRequest::FraudRate { .. }    => "fraud_rate",
            AnalysisRequest::Correlation { .. }  => "correlation",
            AnalysisRequest::Distribution { .. } => "distribution",
            AnalysisRequest::Comparison { .. }   => "comparison",
        }
    }

    pub fn filters(&self) -> &[FilterCondition] {
        match self {
            AnalysisRequest::FailureRate { filters, .. }
            | AnalysisRequest::FraudRate { filters, .. }
            | AnalysisRequest::Correlation { filters, .. }
            | AnalysisRequest::Distribution { filters, .. }
            | AnalysisRequest::Comparison { filters, .. } => filters,
        }
    }

    /// Build a request from an analysis name and a JSON parameter object.
    pub fn parse(analysis_type: &str, params: &Value) -> InsightResult<Self> {
        if !ANALYSIS_TYPES.contains(&analysis_type.trim()) {
            return Err(InsightError::Analysis(format!("unknown analysis type '{analysis_type}'")));
        }
        let params = match params {
            Value::Null => Value::Object(Map::new()),
            Value::Object(_) => params.clone(),
            _ => return Err(bad_params("parameters must be a JSON object")),
        };
        let filters = match params.get("filters") {
            None | Some(Value::Null) => Vec::new(),
            Some(v) => parse_filters(v).map_err(|e| bad_params(&e.to_string()))?,
        };

        match analysis_type.trim() {
            "failure_rate" => Ok(AnalysisRequest::FailureRate {
                filters,
                segment_by: optional_column(&params, "segment_by")?,
            }),
            "fraud_rate" => Ok(AnalysisRequest::FraudRate {
                filters,
                segment_by: optional_column(&params, "segment_by")?,
            }),
            "correlation" => Ok(AnalysisRequest::Correlation {
                filters,
                variable1: required_column(&params, "variable1", analysis_type)?,
                variable2: required_column(&params, "variable2", analysis_type)?,
            }),
            "distribution" => Ok(AnalysisRequest::Distribution {
                filters,
                column: required_column(&params, "column", analysis_type)?,
            }),
            "comparison" => Ok(AnalysisRequest::Comparison {
                filters,
                segment_by: required_column(&params, "segment_by", analysis_type)?,
                metric:     required_column(&params, "metric", analysis_type)?,
            }),
            other => Err(InsightError::Analysis(format!("unknown analysis type '{other}'"))),
        }
    }
}

fn bad_params(msg: &str) -> InsightError {
    InsightError::Analysis(format!("malformed parameters: {msg}"))
}

fn optional_column(params: &Value, key: &str) -> InsightResult<Option<String>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(normalize_column_name(s))),
        Some(_) => Err(bad_params(&format!("'{key}' must be a column name"))),
    }
}

fn required_column(params: &Value, key: &str, analysis: &str) -> InsightResult<String> {
    optional_column(params, key)?
        .ok_or_else(|| bad_params(&format!("{analysis} needs '{key}'")))
}

// ── Entry points ─────────────────────────────────────────────────────────────

/// Run a typed analysis request.
pub fn analyze(request: &AnalysisRequest, dataset: &Dataset) -> InsightResult<AnalysisReport> {
    let selected = apply_filters(dataset, request.filters())?;
    log::debug!("Analysis {} over {} filtered rows", request.name(), selected.len());

    let results = match request {
        AnalysisRequest::FailureRate { segment_by, .. } => {
            failure_rate(dataset, &selected, segment_by.as_deref())?
        }
        AnalysisRequest::FraudRate { segment_by, .. } => {
            fraud_rate(dataset, &selected, segment_by.as_deref())?
        }
        AnalysisRequest::Correlation { variable1, variable2, .. } => {
            correlation(dataset, &selected, variable1, variable2)?
        }
        AnalysisRequest::Distribution { column, .. } => distribution(dataset, &selected, column)?,
        AnalysisRequest::Comparison { segment_by, metric, .. } => {
            comparison(dataset, &selected, segment_by, metric)?
        }
    };

    Ok(AnalysisReport { analysis: request.name().to_string(), results })
}

/// Run an analysis by name with JSON parameters. Never fails: errors
/// come back as an error payload.
pub fn run_named(analysis_type: &str, params: &Value, dataset: &Dataset) -> AnalysisPayload {
    let outcome = AnalysisRequest::parse(analysis_type, params).and_then(|req| analyze(&req, dataset));
    if let Err(e) = &outcome {
        log::warn!("Analysis '{analysis_type}' failed: {e}");
    }
    AnalysisPayload::from_outcome(analysis_type, outcome)
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn column(dataset: &Dataset, name: &str) -> InsightResult<usize> {
    dataset
        .schema()
        .index_of(name)
        .ok_or_else(|| InsightError::Analysis(format!("unknown column '{name}'")))
}

fn numeric_column(dataset: &Dataset, name: &str) -> InsightResult<usize> {
    let idx = column(dataset, name)?;
    match dataset.schema().kind_of(name) {
        Some(kind) if kind.is_numeric() => Ok(idx),
        Some(kind) => Err(InsightError::Analysis(format!(
            "'{name}' is a {} column; a numeric column is required",
            kind.label()
        ))),
        None => Err(InsightError::Analysis(format!("unknown column '{name}'"))),
    }
}

/// Partition row indices by one column's value, segments in key order.
fn segments(dataset: &Dataset, selected: &[usize], col: usize) -> BTreeMap<GroupKey, Vec<usize>> {
    let mut groups: BTreeMap<GroupKey, Vec<usize>> = BTreeMap::new();
    for &i in selected {
        groups
            .entry(GroupKey(vec![dataset.row(i)[col].clone()]))
            .or_default()
            .push(i);
    }
    groups
}

fn segment_label(key: &GroupKey) -> String {
    key.0.first().map(Cell::label).unwrap_or_default()
}

/// `part / total * 100`, 0 for an empty slice.
pub fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

/// Per-segment (or overall) counting of rows matching `hit`.
fn rate_table<F>(
    dataset: &Dataset,
    selected: &[usize],
    segment_by: Option<&str>,
    hit_key: &str,
    rate_key: &str,
    hit: F,
) -> InsightResult<Value>
where
    F: Fn(&[Cell]) -> bool,
{
    let entry = |rows: &[usize]| {
        let hits = rows.iter().filter(|&&i| hit(dataset.row(i).as_slice())).count();
        json!({
            "total":  rows.len(),
            hit_key:  hits,
            rate_key: float_json(percentage(hits, rows.len())),
        })
    };

    let mut results = Map::new();
    match segment_by {
        Some(seg) => {
            let col = column(dataset, seg)?;
            for (key, rows) in segments(dataset, selected, col) {
                results.insert(segment_label(&key), entry(&rows));
            }
        }
        None => {
            results.insert("overall".to_string(), entry(selected));
        }
    }
    Ok(Value::Object(results))
}

// ── Analyses ─────────────────────────────────────────────────────────────────

fn failure_rate(dataset: &Dataset, selected: &[usize], segment_by: Option<&str>) -> InsightResult<Value> {
    let status = column(dataset, STATUS)?;
    rate_table(dataset, selected, segment_by, "failed", "failure_rate", |row| {
        row[status]
            .as_str()
            .map(|s| s.trim().eq_ignore_ascii_case(FAILED_STATUS))
            .unwrap_or(false)
    })
}

fn fraud_rate(dataset: &Dataset, selected: &[usize], segment_by: Option<&str>) -> InsightResult<Value> {
    // Without a fraud_flag column nothing is flagged.
    let flag = dataset.schema().index_of(FRAUD_FLAG);
    rate_table(dataset, selected, segment_by, "flagged_for_review", "flag_rate", |row| {
        flag.and_then(|f| row[f].as_bool()).unwrap_or(false)
    })
}

fn correlation(
    dataset: &Dataset,
    selected: &[usize],
    variable1: &str,
    variable2: &str,
) -> InsightResult<Value> {
    let (a, b) = (column(dataset, variable1)?, column(dataset, variable2)?);

    let mut row_levels: BTreeMap<GroupKey, usize> = BTreeMap::new();
    let mut col_levels: BTreeMap<GroupKey, usize> = BTreeMap::new();
    let mut pairs: Vec<(GroupKey, GroupKey)> = Vec::new();
    for &i in selected {
        let row = dataset.row(i);
        if row[a].is_null() || row[b].is_null() {
            continue;
        }
        let (ka, kb) = (GroupKey(vec![row[a].clone()]), GroupKey(vec![row[b].clone()]));
        row_levels.entry(ka.clone()).or_insert(0);
        col_levels.entry(kb.clone()).or_insert(0);
        pairs.push((ka, kb));
    }
    if pairs.is_empty() {
        return Err(InsightError::Analysis(format!(
            "no rows with values for both '{variable1}' and '{variable2}'"
        )));
    }

    for (i, v) in row_levels.values_mut().enumerate() {
        *v = i;
    }
    for (j, v) in col_levels.values_mut().enumerate() {
        *v = j;
    }
    let mut observed = vec![vec![0.0; col_levels.len()]; row_levels.len()];
    for (ka, kb) in &pairs {
        observed[row_levels[ka]][col_levels[kb]] += 1.0;
    }

    let test = math::chi_square_independence(&observed);
    let significant = test.p_value < SIGNIFICANCE_LEVEL;
    let interpretation = if significant {
        "Significant relationship exists"
    } else {
        "No significant relationship"
    };
    Ok(json!({
        "chi2_statistic":     float_json(test.statistic),
        "p_value":            float_json(test.p_value),
        "degrees_of_freedom": test.dof,
        "significant":        significant,
        "interpretation":     interpretation,
        "observations":       pairs.len(),
        "table_shape":        [row_levels.len(), col_levels.len()],
    }))
}

fn distribution(dataset: &Dataset, selected: &[usize], name: &str) -> InsightResult<Value> {
    let col = numeric_column(dataset, name)?;
    let mut values: Vec<f64> = selected
        .iter()
        .filter_map(|&i| dataset.row(i)[col].as_f64())
        .collect();
    values.sort_by(f64::total_cmp);

    let opt = |v: Option<f64>| v.map(float_json).unwrap_or(Value::Null);
    Ok(json!({
        "count":  values.len(),
        "mean":   opt(math::mean(&values)),
        "median": opt(math::quantile_sorted(&values, 0.5)),
        "std":    opt(math::sample_std(&values)),
        "min":    opt(values.first().copied()),
        "max":    opt(values.last().copied()),
        "q25":    opt(math::quantile_sorted(&values, 0.25)),
        "q75":    opt(math::quantile_sorted(&values, 0.75)),
    }))
}

fn comparison(
    dataset: &Dataset,
    selected: &[usize],
    segment_by: &str,
    metric: &str,
) -> InsightResult<Value> {
    let seg = column(dataset, segment_by)?;
    let met = numeric_column(dataset, metric)?;

    let mut results = Map::new();
    for (key, rows) in segments(dataset, selected, seg) {
        let mut values: Vec<f64> = rows
            .iter()
            .filter_map(|&i| dataset.row(i)[met].as_f64())
            .collect();
        values.sort_by(f64::total_cmp);
        let opt = |v: Option<f64>| v.map(float_json).unwrap_or(Value::Null);
        results.insert(
            segment_label(&key),
            json!({
                "count":  values.len(),
                "mean":   opt(math::mean(&values)),
                "median": opt(math::quantile_sorted(&values, 0.5)),
                "sum":    float_json(values.iter().sum()),
            }),
        );
    }
    Ok(Value::Object(results))
}
