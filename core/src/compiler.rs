//! Plan compiler — turns a query intent into an ExecutionPlan plus the
//! statistical analyses the question calls for.
//!
//! RULE: compile() never fails. A malformed intent or payload compiles to
//! the default plan (one row count) and the reason is kept on the result.
//!
//! MAPPING ORDER:
//!   1. Intent filters (columns normalized, operators canonical)
//!   2. Entities naming a dataset column become extra filters
//!   3. Grouping
//!   4. Metrics -> aggregations (count when nothing maps)
//!   5. Metrics + intent kind -> analyses
//!   6. Sort by first aggregation (grouped plans), limit from entities

use crate::{
    dataset::{normalize_column_name, Dataset, Schema, AMOUNT},
    intent::{IntentKind, QueryIntent},
    plan::{AggFunc, AggregationSpec, ExecutionPlan, FilterCondition, FilterOp, SortSpec},
    stats::AnalysisRequest,
    types::ColumnKind,
};
use serde::Serialize;
use serde_json::Value;

/// What a question compiled to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledPlan {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent:   Option<IntentKind>,
    pub plan:     ExecutionPlan,
    pub analyses: Vec<AnalysisRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

impl CompiledPlan {
    pub fn is_fallback(&self) -> bool {
        self.fallback.is_some()
    }
}

/// Entity keys the intent producer tends to use for columns with a
/// longer name in the dataset.
const ENTITY_ALIASES: [(&str, &str); 6] = [
    ("age_group", "sender_age_group"),
    ("state", "sender_state"),
    ("bank", "sender_bank"),
    ("category", "merchant_category"),
    ("device", "device_type"),
    ("network", "network_type"),
];

const LIMIT_ENTITIES: [&str; 3] = ["top_n", "limit", "top"];

/// A metric word resolved to what it asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Metric {
    Aggregate(AggFunc),
    FailureRate,
    FraudRate,
    Distribution,
}

fn classify_metric(raw: &str) -> Option<Metric> {
    let metric = raw.trim().to_lowercase().replace([' ', '-'], "_");
    let resolved = match metric.as_str() {
        "count" | "transaction_count" | "transactions" | "volume" | "total_transactions"
        | "number_of_transactions" => Metric::Aggregate(AggFunc::Count),
        "sum" | "total" | "total_amount" | "total_value" | "amount" | "value" => {
            Metric::Aggregate(AggFunc::Sum)
        }
        "average" | "avg" | "mean" | "average_amount" | "avg_amount" | "mean_amount" => {
            Metric::Aggregate(AggFunc::Mean)
        }
        "median" | "median_amount" => Metric::Aggregate(AggFunc::Median),
        "min" | "minimum" | "min_amount" => Metric::Aggregate(AggFunc::Min),
        "max" | "maximum" | "max_amount" => Metric::Aggregate(AggFunc::Max),
        "failure_rate" | "failure_percentage" | "failures" | "failed" => Metric::FailureRate,
        "fraud_rate" | "flag_rate" | "fraud" | "flagged" => Metric::FraudRate,
        "distribution" | "spread" => Metric::Distribution,
        _ => return None,
    };
    Some(resolved)
}

pub struct PlanCompiler {
    schema: Schema,
}

impl PlanCompiler {
    pub fn new(schema: Schema) -> Self {
        Self { schema }
    }

    pub fn for_dataset(dataset: &Dataset) -> Self {
        Self::new(dataset.schema().clone())
    }

    /// The safe default plan, tagged with why it was chosen.
    pub fn fallback(&self, reason: &str) -> CompiledPlan {
        log::warn!("Falling back to default count plan: {reason}");
        CompiledPlan {
            intent:   None,
            plan:     ExecutionPlan::default_count(&self.schema.identifier_column()),
            analyses: Vec::new(),
            fallback: Some(reason.to_string()),
        }
    }

    /// Compile an intent JSON value.
    pub fn compile(&self, intent_json: &Value) -> CompiledPlan {
        match QueryIntent::from_value(intent_json) {
            Ok(intent) => self.compile_intent(&intent),
            Err(e) => self.fallback(&e.to_string()),
        }
    }

    /// Compile a raw model reply (JSON, possibly inside markdown fences).
    pub fn compile_text(&self, text: &str) -> CompiledPlan {
        match QueryIntent::from_llm_text(text) {
            Ok(intent) => self.compile_intent(&intent),
            Err(e) => self.fallback(&e.to_string()),
        }
    }

    /// Accept an already-planned payload. Malformed payloads fall back.
    pub fn compile_plan_payload(&self, payload: &Value) -> CompiledPlan {
        match ExecutionPlan::from_value(payload) {
            Ok(plan) => CompiledPlan { intent: None, plan, analyses: Vec::new(), fallback: None },
            Err(e) => self.fallback(&e.to_string()),
        }
    }

    pub fn compile_intent(&self, intent: &QueryIntent) -> CompiledPlan {
        let grouping = dedup(intent.grouping.iter().cloned());

        let mut filters = intent.filters.clone();
        filters.extend(self.entity_filters(intent, &filters, &grouping));

        let metrics: Vec<Metric> = intent
            .metrics
            .iter()
            .filter_map(|m| {
                let metric = classify_metric(m);
                if metric.is_none() {
                    log::debug!("Metric '{m}' has no direct mapping");
                }
                metric
            })
            .collect();

        let aggregations = self.aggregations(&metrics);
        let analyses = self.analyses(intent.intent, &metrics, &filters, &grouping);

        let sort = match (grouping.is_empty(), aggregations.first()) {
            (false, Some(first)) => Some(SortSpec { by: first.output_name(), ascending: false }),
            _ => None,
        };
        let limit = LIMIT_ENTITIES
            .iter()
            .find_map(|k| intent.entities.get(*k))
            .and_then(Value::as_u64)
            .filter(|n| *n > 0)
            .map(|n| n as usize);

        let plan = ExecutionPlan {
            filters,
            groupby: grouping,
            aggregations,
            computations: Vec::new(),
            sort,
            limit,
        };
        log::debug!(
            "Compiled {} intent: {} filters, {} groups, {} aggregations, {} analyses",
            intent.intent,
            plan.filters.len(),
            plan.groupby.len(),
            plan.aggregations.len(),
            analyses.len()
        );

        CompiledPlan { intent: Some(intent.intent), plan, analyses, fallback: None }
    }

    // ── Mapping stages ───────────────────────────────────────────────────────

    fn entity_filters(
        &self,
        intent: &QueryIntent,
        existing: &[FilterCondition],
        grouping: &[String],
    ) -> Vec<FilterCondition> {
        let mut added: Vec<FilterCondition> = Vec::new();
        for (key, value) in &intent.entities {
            let column = self.entity_column(key);
            let Some(kind) = self.schema.kind_of(&column) else { continue };
            if existing.iter().chain(added.iter()).any(|f| f.column == column) {
                continue;
            }
            // Free-text entities ("last week", "high value") are not filter values.
            let fits = |v: &Value| match kind {
                ColumnKind::Text      => v.is_string(),
                ColumnKind::Bool      => v.is_boolean(),
                ColumnKind::Int | ColumnKind::Float => v.is_number(),
                ColumnKind::Timestamp => false,
            };
            match value {
                Value::Array(items) if !items.is_empty() && items.iter().all(fits) => {
                    added.push(FilterCondition::new(column, FilterOp::In, value.clone()));
                }
                Value::String(_) | Value::Number(_) | Value::Bool(_) if fits(value) => {
                    if grouping.contains(&column) {
                        continue;
                    }
                    added.push(FilterCondition::eq(column, value.clone()));
                }
                _ => {}
            }
        }
        added
    }

    fn entity_column(&self, key: &str) -> String {
        let column = normalize_column_name(key);
        if self.schema.contains(&column) {
            return column;
        }
        ENTITY_ALIASES
            .iter()
            .find(|(alias, _)| *alias == column)
            .map(|(_, target)| target.to_string())
            .unwrap_or(column)
    }

    fn aggregations(&self, metrics: &[Metric]) -> Vec<AggregationSpec> {
        let identifier = self.schema.identifier_column();
        let mut aggregations: Vec<AggregationSpec> = Vec::new();

        for metric in metrics {
            let Metric::Aggregate(function) = metric else { continue };
            let spec = match function {
                AggFunc::Count => {
                    AggregationSpec::new(identifier.as_str(), AggFunc::Count).with_alias("transaction_count")
                }
                f => AggregationSpec::new(AMOUNT, *f).with_alias(format!("{}_{AMOUNT}", amount_prefix(*f))),
            };
            if spec.column == AMOUNT && !self.schema.contains(AMOUNT) {
                log::warn!("Dropping '{}' aggregation: dataset has no {AMOUNT} column", spec.function);
                continue;
            }
            if !aggregations.iter().any(|a| a.output_name() == spec.output_name()) {
                aggregations.push(spec);
            }
        }

        if aggregations.is_empty() {
            aggregations.push(
                AggregationSpec::new(identifier.as_str(), AggFunc::Count).with_alias("transaction_count"),
            );
        }
        aggregations
    }

    fn analyses(
        &self,
        kind: IntentKind,
        metrics: &[Metric],
        filters: &[FilterCondition],
        grouping: &[String],
    ) -> Vec<AnalysisRequest> {
        let segment_by = grouping.first().cloned();
        let mut analyses: Vec<AnalysisRequest> = Vec::new();
        let mut push = |request: AnalysisRequest| {
            if !analyses.contains(&request) {
                analyses.push(request);
            }
        };

        let wants_fraud = metrics.contains(&Metric::FraudRate);
        if metrics.contains(&Metric::FailureRate) || (kind == IntentKind::RiskAnalysis && !wants_fraud) {
            push(AnalysisRequest::FailureRate { filters: filters.to_vec(), segment_by: segment_by.clone() });
        }
        if wants_fraud {
            push(AnalysisRequest::FraudRate { filters: filters.to_vec(), segment_by: segment_by.clone() });
        }
        if kind == IntentKind::Correlation && grouping.len() >= 2 {
            push(AnalysisRequest::Correlation {
                filters:   filters.to_vec(),
                variable1: grouping[0].clone(),
                variable2: grouping[1].clone(),
            });
        }
        let amount_metric = metrics
            .iter()
            .any(|m| matches!(m, Metric::Aggregate(f) if *f != AggFunc::Count));
        if kind == IntentKind::Comparative && amount_metric && self.schema.contains(AMOUNT) {
            if let Some(segment) = &segment_by {
                push(AnalysisRequest::Comparison {
                    filters:    filters.to_vec(),
                    segment_by: segment.clone(),
                    metric:     AMOUNT.to_string(),
                });
            }
        }
        if metrics.contains(&Metric::Distribution) && self.schema.contains(AMOUNT) {
            push(AnalysisRequest::Distribution { filters: filters.to_vec(), column: AMOUNT.to_string() });
        }
        analyses
    }
}

fn amount_prefix(function: AggFunc) -> &'static str {
    match function {
        AggFunc::Sum    => "total",
        AggFunc::Mean   => "avg",
        AggFunc::Median => "median",
        AggFunc::Min    => "min",
        AggFunc::Max    => "max",
        AggFunc::Count  => "count",
    }
}

fn dedup(items: impl Iterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}
