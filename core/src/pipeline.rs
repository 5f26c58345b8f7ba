//! Insight pipeline — one question in, one narrated answer out.
//!
//! EXECUTION ORDER:
//!   1. Dataset snapshot (fatal on DataLoad / Schema)
//!   2. Intent producer -> PlanCompiler (fallback plan on any failure)
//!   3. Execute the plan
//!   4. Run the selected analyses
//!   5. Narrator (PlainNarrator text on failure)
//!
//! RULE: Only fatal errors leave `ask` as `Err`. Everything else becomes an
//! error payload that still reaches narration.

use crate::{
    capability::{call_with_policy, IntentProducer, Narrator},
    compiler::{CompiledPlan, PlanCompiler},
    config::InsightConfig,
    error::InsightResult,
    executor::execute,
    narration::{recent_history, ConversationTurn, NarrationRequest, PlainNarrator, FRAUD_FLAG_NOTE},
    result::{AnalysisPayload, ExecutionPayload},
    stats::{self, AnalysisRequest},
    store::DatasetStore,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

const FALLBACK_NOTE: &str =
    "The question could not be interpreted, so the overall transaction count is shown instead.";

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub question:           String,
    pub text:               String,
    pub compiled:           CompiledPlan,
    pub execution:          Value,
    pub analyses:           Vec<AnalysisPayload>,
    /// True when the narrator failed and the offline summary was used.
    pub narration_degraded: bool,
}

impl Answer {
    /// Why the default plan was used, if it was.
    pub fn fallback(&self) -> Option<&str> {
        self.compiled.fallback.as_deref()
    }
}

pub struct InsightPipeline {
    store:    Arc<DatasetStore>,
    producer: Arc<dyn IntentProducer>,
    narrator: Arc<dyn Narrator>,
    config:   InsightConfig,
}

impl InsightPipeline {
    pub fn new(
        store: Arc<DatasetStore>,
        producer: Arc<dyn IntentProducer>,
        narrator: Arc<dyn Narrator>,
        config: InsightConfig,
    ) -> Self {
        Self { store, producer, narrator, config }
    }

    pub fn store(&self) -> &DatasetStore {
        &self.store
    }

    pub fn ask(&self, question: &str, history: &[ConversationTurn]) -> InsightResult<Answer> {
        let dataset = self.store.load(false)?;
        let compiler = PlanCompiler::for_dataset(&dataset);
        let window = self.config.history_window;

        let compiled = {
            let producer = Arc::clone(&self.producer);
            let owned_question = question.to_string();
            let owned_history = recent_history(history, window).to_vec();
            let reply = call_with_policy("intent_producer", &self.config.intent_call, move |cancel| {
                producer.produce_intent(&owned_question, &owned_history, cancel)
            });
            match reply {
                Ok(text) => compiler.compile_text(&text),
                Err(e) => compiler.fallback(&e.to_string()),
            }
        };

        let outcome = execute(&compiled.plan, &dataset);
        if let Err(e) = &outcome {
            log::warn!("Plan execution failed: {e}");
        }
        let execution = ExecutionPayload::new(&outcome).to_value();

        let analyses: Vec<AnalysisPayload> = compiled
            .analyses
            .iter()
            .map(|request| AnalysisPayload::from_outcome(request.name(), stats::analyze(request, &dataset)))
            .collect();

        let request = NarrationRequest::new(
            question,
            std::iter::once(execution.clone())
                .chain(analyses.iter().filter_map(|a| serde_json::to_value(a).ok()))
                .collect(),
            stats_context(&compiled),
            history,
            window,
        );

        let narrator = Arc::clone(&self.narrator);
        let shared_request = request.clone();
        let narrated = call_with_policy("narrator", &self.config.narration_call, move |cancel| {
            narrator.narrate(&shared_request, cancel)
        });
        let (text, narration_degraded) = match narrated {
            Ok(text) if !text.trim().is_empty() => (text, false),
            Ok(_) => {
                log::warn!("Narrator returned empty text; using plain summary");
                (PlainNarrator::summarize(&request), true)
            }
            Err(e) => {
                log::warn!("Narration failed: {e}; using plain summary");
                (PlainNarrator::summarize(&request), true)
            }
        };

        Ok(Answer {
            question: question.to_string(),
            text,
            compiled,
            execution,
            analyses,
            narration_degraded,
        })
    }
}

/// Domain notes the narrator must respect for this answer.
fn stats_context(compiled: &CompiledPlan) -> Vec<String> {
    let mut notes = Vec::new();
    if compiled.is_fallback() {
        notes.push(FALLBACK_NOTE.to_string());
    }
    if compiled.analyses.iter().any(|a| matches!(a, AnalysisRequest::FraudRate { .. })) {
        notes.push(FRAUD_FLAG_NOTE.to_string());
    }
    notes
}
