//! Query intent — the semi-structured reading of a question.
//!
//! Intents come from an external producer and are untrusted.
//! Every field is validated here; anything malformed is a
//! `PlanCompilation` error that the compiler turns into its fallback plan.

use crate::{
    dataset::normalize_column_name,
    error::{InsightError, InsightResult},
    plan::{parse_filters, string_list, FilterCondition},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    Descriptive,
    Comparative,
    Temporal,
    Segmentation,
    Correlation,
    RiskAnalysis,
    Trend,
}

impl IntentKind {
    pub fn name(self) -> &'static str {
        match self {
            IntentKind::Descriptive  => "descriptive",
            IntentKind::Comparative  => "comparative",
            IntentKind::Temporal     => "temporal",
            IntentKind::Segmentation => "segmentation",
            IntentKind::Correlation  => "correlation",
            IntentKind::RiskAnalysis => "risk_analysis",
            IntentKind::Trend        => "trend",
        }
    }
}

impl fmt::Display for IntentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for IntentKind {
    type Err = InsightError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "descriptive"   => Ok(IntentKind::Descriptive),
            "comparative"   => Ok(IntentKind::Comparative),
            "temporal"      => Ok(IntentKind::Temporal),
            "segmentation"  => Ok(IntentKind::Segmentation),
            "correlation"   => Ok(IntentKind::Correlation),
            "risk_analysis" => Ok(IntentKind::RiskAnalysis),
            "trend"         => Ok(IntentKind::Trend),
            other => Err(InsightError::PlanCompilation(format!("unknown intent '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryIntent {
    pub intent:      IntentKind,
    pub entities:    Map<String, Value>,
    pub metrics:     Vec<String>,
    pub filters:     Vec<FilterCondition>,
    pub grouping:    Vec<String>,
    pub is_followup: bool,
}

impl QueryIntent {
    /// Parse a model reply, tolerating markdown code fences around the JSON.
    pub fn from_llm_text(text: &str) -> InsightResult<Self> {
        let json = extract_json_block(text)
            .ok_or_else(|| InsightError::PlanCompilation("reply contains no JSON object".to_string()))?;
        let value: Value = serde_json::from_str(json)
            .map_err(|e| InsightError::PlanCompilation(format!("intent is not valid JSON: {e}")))?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> InsightResult<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| malformed("intent must be a JSON object"))?;

        let intent: IntentKind = match obj.get("intent") {
            Some(Value::String(s)) => s.parse()?,
            Some(_) => return Err(malformed("'intent' must be a string")),
            None => return Err(malformed("missing 'intent'")),
        };

        let entities = match obj.get("entities") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(m)) => m.clone(),
            Some(_) => return Err(malformed("'entities' must be an object")),
        };

        let metrics = match obj.get("metrics") {
            None | Some(Value::Null) => Vec::new(),
            Some(v) => string_list(v, "metrics").map_err(|e| malformed(&e.to_string()))?,
        };

        let filters = match obj.get("filters") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => {
                let canonical: Vec<Value> = items.iter().flat_map(canonical_filter).collect();
                parse_filters(&Value::Array(canonical)).map_err(|e| malformed(&e.to_string()))?
            }
            Some(_) => return Err(malformed("'filters' must be an array")),
        };

        let grouping = match obj.get("grouping") {
            None | Some(Value::Null) => Vec::new(),
            Some(v) => string_list(v, "grouping")
                .map_err(|e| malformed(&e.to_string()))?
                .iter()
                .map(|c| normalize_column_name(c))
                .filter(|c| !c.is_empty())
                .collect(),
        };

        let is_followup = match obj.get("is_followup") {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(_) => return Err(malformed("'is_followup' must be a boolean")),
        };

        Ok(Self { intent, entities, metrics, filters, grouping, is_followup })
    }
}

fn malformed(msg: &str) -> InsightError {
    InsightError::PlanCompilation(msg.to_string())
}

/// Filters arrive either as `{column, operator, value}` or as the shorthand
/// `{"device_type": "iOS"}`. Shorthand entries expand to one equality
/// (or `in`, for arrays) per key.
fn canonical_filter(item: &Value) -> Vec<Value> {
    match item.as_object() {
        Some(obj) if obj.contains_key("column") => vec![item.clone()],
        Some(obj) => obj
            .iter()
            .map(|(column, value)| {
                let operator = if value.is_array() { "in" } else { "==" };
                serde_json::json!({ "column": column, "operator": operator, "value": value })
            })
            .collect(),
        None => vec![item.clone()],
    }
}

/// Pull the JSON object out of a model reply: a ```json fence, any ```
/// fence, or the outermost braces.
pub fn extract_json_block(text: &str) -> Option<&str> {
    if let Some((_, rest)) = text.split_once("```json") {
        return rest.split("```").next().map(str::trim);
    }
    if let Some((_, rest)) = text.split_once("```") {
        return rest.split("```").next().map(str::trim);
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}
