//! Query executor — interprets an ExecutionPlan against a dataset snapshot.
//!
//! EXECUTION ORDER (fixed, never reordered):
//!   1. Validate every column, function and output name
//!   2. Filter (shared filter stage, conjunctive, in sequence)
//!   3. Group + aggregate | global aggregate | pass-through
//!   4. Computations (derived metrics over result rows)
//!   5. Sort (single column, stable, nulls last)
//!   6. Limit
//!
//! RULES:
//!   - The dataset is never mutated; stages work on row indices and
//!     freshly built result rows.
//!   - Identical plan + identical snapshot gives an identical result.

use crate::{
    dataset::{normalize_column_name, Dataset},
    error::{InsightError, InsightResult},
    filter::apply_filters,
    formula::Formula,
    plan::{AggFunc, ExecutionPlan},
    result::ResultTable,
    types::{Cell, ColumnKind, GroupKey, Row},
};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Run `plan` against `dataset`.
pub fn execute(plan: &ExecutionPlan, dataset: &Dataset) -> InsightResult<ResultTable> {
    let aggregations = validate(plan, dataset)?;
    let selected = apply_filters(dataset, &plan.filters)?;

    let mut table = if !plan.groupby.is_empty() {
        grouped(plan, dataset, &selected, &aggregations)?
    } else if !aggregations.is_empty() {
        global(plan, dataset, &selected, &aggregations)
    } else {
        passthrough(dataset, &selected)
    };

    apply_computations(plan, &mut table);

    if let Some(sort) = &plan.sort {
        let idx = table
            .column_index(&sort.by)
            .or_else(|| table.column_index(&normalize_column_name(&sort.by)))
            .ok_or_else(|| {
                InsightError::PlanValidation(format!("cannot sort by unknown column '{}'", sort.by))
            })?;
        sort_rows(&mut table.rows, idx, sort.ascending);
    }

    if let Some(limit) = plan.limit {
        table.rows.truncate(limit);
    }

    log::debug!(
        "Executed plan: {} filtered rows -> {} result rows, {} columns",
        selected.len(),
        table.row_count(),
        table.columns.len()
    );
    Ok(table)
}

/// An aggregation resolved against the schema.
struct BoundAggregation {
    column:   usize,
    kind:     ColumnKind,
    function: AggFunc,
}

fn validate(plan: &ExecutionPlan, dataset: &Dataset) -> InsightResult<Vec<BoundAggregation>> {
    let schema = dataset.schema();

    for column in &plan.groupby {
        schema.resolve(column)?;
    }

    let aggregations = plan
        .aggregations
        .iter()
        .map(|agg| {
            let (column, kind) = schema.resolve(&agg.column)?;
            let needs_numeric = matches!(agg.function, AggFunc::Sum | AggFunc::Mean | AggFunc::Median);
            if needs_numeric && !kind.is_numeric() {
                return Err(InsightError::PlanValidation(format!(
                    "'{}' cannot be applied to {} column '{}'",
                    agg.function,
                    kind.label(),
                    agg.column
                )));
            }
            Ok(BoundAggregation { column, kind, function: agg.function })
        })
        .collect::<InsightResult<Vec<_>>>()?;

    plan.check_unique_outputs()?;
    if plan.is_passthrough() {
        if let Some(c) = plan.computations.iter().find(|c| schema.contains(&c.name)) {
            return Err(InsightError::PlanValidation(format!(
                "computation '{}' would overwrite a dataset column",
                c.name
            )));
        }
    }

    Ok(aggregations)
}

// ── Shaping stages ───────────────────────────────────────────────────────────

fn passthrough(dataset: &Dataset, selected: &[usize]) -> ResultTable {
    let rows = selected.iter().map(|&i| dataset.row(i).clone()).collect();
    ResultTable::new(dataset.schema().names(), rows)
}

fn global(
    plan: &ExecutionPlan,
    dataset: &Dataset,
    selected: &[usize],
    aggregations: &[BoundAggregation],
) -> ResultTable {
    let row: Row = aggregations
        .iter()
        .map(|agg| {
            aggregate(
                agg.function,
                agg.kind,
                selected.iter().map(|&i| &dataset.row(i)[agg.column]),
            )
        })
        .collect();
    ResultTable::new(plan.output_columns_without_computations(), vec![row])
}

fn grouped(
    plan: &ExecutionPlan,
    dataset: &Dataset,
    selected: &[usize],
    aggregations: &[BoundAggregation],
) -> InsightResult<ResultTable> {
    let key_columns = plan
        .groupby
        .iter()
        .map(|c| dataset.schema().resolve(c).map(|(i, _)| i))
        .collect::<InsightResult<Vec<_>>>()?;

    // Keys are ordered, so groups come out sorted. Null is a key of its own,
    // which keeps the groups a partition of the filtered rows.
    let mut groups: BTreeMap<GroupKey, Vec<usize>> = BTreeMap::new();
    for &i in selected {
        let row = dataset.row(i);
        let key = GroupKey(key_columns.iter().map(|&k| row[k].clone()).collect());
        groups.entry(key).or_default().push(i);
    }

    let rows = groups
        .into_iter()
        .map(|(GroupKey(mut key), members)| {
            key.extend(aggregations.iter().map(|agg| {
                aggregate(
                    agg.function,
                    agg.kind,
                    members.iter().map(|&i| &dataset.row(i)[agg.column]),
                )
            }));
            key
        })
        .collect();

    Ok(ResultTable::new(plan.output_columns_without_computations(), rows))
}

// ── Aggregation ──────────────────────────────────────────────────────────────

/// Apply one aggregation to a partition. Nulls are ignored.
/// `count` and `sum` of nothing are 0; every other function of nothing is null.
pub fn aggregate<'a, I>(function: AggFunc, kind: ColumnKind, cells: I) -> Cell
where
    I: Iterator<Item = &'a Cell>,
{
    let values: Vec<&Cell> = cells.filter(|c| !c.is_null()).collect();
    match function {
        AggFunc::Count => Cell::Int(values.len() as i64),
        AggFunc::Sum => match kind {
            ColumnKind::Float => Cell::Float(values.iter().filter_map(|c| c.as_f64()).sum()),
            _ => {
                let ints: Vec<i64> = values
                    .iter()
                    .map(|c| match c {
                        Cell::Int(i) => *i,
                        Cell::Bool(b) => i64::from(*b),
                        _ => 0,
                    })
                    .collect();
                match ints.iter().try_fold(0i64, |acc, i| acc.checked_add(*i)) {
                    Some(total) => Cell::Int(total),
                    None => {
                        log::warn!("Integer sum overflowed i64; reporting it as a float");
                        Cell::Float(ints.iter().map(|i| *i as f64).sum())
                    }
                }
            }
        },
        AggFunc::Mean => {
            let nums: Vec<f64> = values.iter().filter_map(|c| c.as_f64()).collect();
            if nums.is_empty() {
                Cell::Null
            } else {
                Cell::Float(nums.iter().sum::<f64>() / nums.len() as f64)
            }
        }
        AggFunc::Median => {
            let mut nums: Vec<f64> = values.iter().filter_map(|c| c.as_f64()).collect();
            nums.sort_by(f64::total_cmp);
            median_sorted(&nums).map(Cell::Float).unwrap_or(Cell::Null)
        }
        AggFunc::Min => values
            .into_iter()
            .min_by(|a, b| a.total_cmp(b))
            .cloned()
            .unwrap_or(Cell::Null),
        AggFunc::Max => values
            .into_iter()
            .max_by(|a, b| a.total_cmp(b))
            .cloned()
            .unwrap_or(Cell::Null),
    }
}

/// Median of an already sorted slice.
pub fn median_sorted(sorted: &[f64]) -> Option<f64> {
    let n = sorted.len();
    match n {
        0 => None,
        _ if n % 2 == 1 => Some(sorted[n / 2]),
        _ => Some((sorted[n / 2 - 1] + sorted[n / 2]) / 2.0),
    }
}

// ── Computations, sort ───────────────────────────────────────────────────────

fn apply_computations(plan: &ExecutionPlan, table: &mut ResultTable) {
    for computation in &plan.computations {
        let formula = match Formula::parse(&computation.formula) {
            Ok(f) => f,
            Err(e) => {
                skip_computation(table, &computation.name, &e.to_string());
                continue;
            }
        };
        if let Some(missing) = formula.columns().into_iter().find(|c| table.column_index(c).is_none()) {
            let reason = format!("formula '{}' references unknown column '{missing}'", formula.source());
            skip_computation(table, &computation.name, &reason);
            continue;
        }

        let columns = table.columns.clone();
        for row in &mut table.rows {
            let lookup = |name: &str| {
                columns
                    .iter()
                    .position(|c| c == name)
                    .and_then(|i| row[i].as_f64())
            };
            let value = formula.eval(&lookup).map(Cell::Float).unwrap_or(Cell::Null);
            row.push(value);
        }
        table.columns.push(computation.name.clone());
    }
}

fn skip_computation(table: &mut ResultTable, name: &str, reason: &str) {
    log::warn!("Skipping computation '{name}': {reason}");
    table.warnings.push(format!("computation '{name}' skipped: {reason}"));
}

/// Stable sort on one column. Nulls stay last in both directions.
fn sort_rows(rows: &mut [Row], column: usize, ascending: bool) {
    rows.sort_by(|a, b| {
        let (x, y) = (&a[column], &b[column]);
        match (x.is_null(), y.is_null()) {
            (true, true)   => Ordering::Equal,
            (true, false)  => Ordering::Greater,
            (false, true)  => Ordering::Less,
            (false, false) => {
                let ord = x.total_cmp(y);
                if ascending { ord } else { ord.reverse() }
            }
        }
    });
}
