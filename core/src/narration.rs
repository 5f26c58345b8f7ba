//! Narration boundary — what the narrator is handed, and an offline
//! narrator that needs no model.
//!
//! RULE: History handed to any capability is bounded to the last
//! `history_window` turns, most recent last.

use crate::capability::{CancelToken, Narrator};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Returned when nothing usable can be said about a question.
pub const FALLBACK_NARRATION: &str =
    "I encountered an error generating insights. Please try rephrasing your question.";

/// Added to the stats context whenever fraud_flag figures are reported.
pub const FRAUD_FLAG_NOTE: &str =
    "fraud_flag marks transactions flagged for review; it is not a confirmed fraud determination.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub question: String,
    pub answer:   String,
}

impl ConversationTurn {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self { question: question.into(), answer: answer.into() }
    }
}

/// The last `window` turns of a conversation.
pub fn recent_history(history: &[ConversationTurn], window: usize) -> &[ConversationTurn] {
    &history[history.len().saturating_sub(window)..]
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NarrationRequest {
    pub question:      String,
    /// Execution and analysis payloads, in the order they were produced.
    pub results:       Vec<Value>,
    pub stats_context: Vec<String>,
    pub history:       Vec<ConversationTurn>,
}

impl NarrationRequest {
    pub fn new(
        question: impl Into<String>,
        results: Vec<Value>,
        stats_context: Vec<String>,
        history: &[ConversationTurn],
        window: usize,
    ) -> Self {
        Self {
            question: question.into(),
            results,
            stats_context,
            history: recent_history(history, window).to_vec(),
        }
    }
}

// ── Offline narrator ─────────────────────────────────────────────────────────

/// Deterministic summary of the payloads. Used by the runner and as the
/// degrade target when the real narrator fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainNarrator;

impl Narrator for PlainNarrator {
    fn narrate(&self, request: &NarrationRequest, _cancel: &CancelToken) -> anyhow::Result<String> {
        Ok(PlainNarrator::summarize(request))
    }
}

impl PlainNarrator {
    pub fn summarize(request: &NarrationRequest) -> String {
        let lines: Vec<String> = request.results.iter().filter_map(describe_payload).collect();
        if lines.is_empty() {
            return FALLBACK_NARRATION.to_string();
        }
        let mut text = lines.join("\n");
        for note in &request.stats_context {
            text.push_str("\nNote: ");
            text.push_str(note);
        }
        text
    }
}

fn describe_payload(payload: &Value) -> Option<String> {
    let ok = payload.get("success").and_then(Value::as_bool).unwrap_or(false);
    let analysis = payload.get("analysis").and_then(Value::as_str);

    if !ok {
        let error = payload.get("error").and_then(Value::as_str).unwrap_or("unknown error");
        return Some(match analysis {
            Some(name) => format!("The {name} analysis failed: {error}"),
            None => format!("The query failed: {error}"),
        });
    }

    match analysis {
        Some(name) => {
            let results = payload.get("results")?;
            Some(format!("{name}: {}", compact(results)))
        }
        None => {
            let rows = payload.get("row_count").and_then(Value::as_u64).unwrap_or(0);
            let data = payload.get("data").and_then(Value::as_array)?;
            Some(match (rows, data.first()) {
                (0, _) | (_, None) => "No transactions matched the question.".to_string(),
                (1, Some(row)) => format!("Result: {}", compact(row)),
                (n, Some(row)) => format!("{n} result rows; first: {}", compact(row)),
            })
        }
    }
}

/// `{"a": 1, "b": "x"}` as `a = 1, b = x`; other values as JSON.
fn compact(value: &Value) -> String {
    match value {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| match v {
                Value::String(s) => format!("{k} = {s}"),
                Value::Number(n) => match (n.as_i64(), n.as_f64()) {
                    (Some(i), _) => format!("{k} = {i}"),
                    (None, Some(f)) if f.fract() == 0.0 => format!("{k} = {f:.0}"),
                    (None, Some(f)) => format!("{k} = {f:.2}"),
                    (None, None) => format!("{k} = {n}"),
                },
                Value::Object(_) => format!("{k} ({})", compact(v)),
                other => format!("{k} = {other}"),
            })
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}
