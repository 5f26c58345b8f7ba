use serde_json::json;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use txn_insight_core::{
    capability::{CancelToken, IntentProducer, Narrator},
    config::InsightConfig,
    error::InsightError,
    narration::{ConversationTurn, NarrationRequest, FRAUD_FLAG_NOTE},
    pipeline::InsightPipeline,
    store::{DataSource, DatasetStore},
};

const FIXTURE: &str = "\
transaction id,timestamp,transaction type,merchant_category,amount (INR),transaction_status,sender_age_group,sender_bank,device_type,network_type,fraud_flag
T1,2024-01-01 10:00:00,P2P,,100,SUCCESS,18-25,SBI,Android,4G,0
T2,2024-01-06 11:00:00,P2M,Food,200,FAILED,26-35,HDFC,iOS,5G,1
T3,2024-01-07 12:30:00,P2M,Grocery,300,SUCCESS,26-35,SBI,Android,WiFi,0
T4,2024-01-08 23:15:00,P2P,,400,FAILED,18-25,ICICI,Web,4G,0
T5,2024-01-09 09:00:00,Bill Payment,,500,SUCCESS,36-45,SBI,Android,4G,0
T6,2024-01-10 18:45:00,Recharge,,n/a,PENDING,36-45,HDFC,iOS,5G,0
";

// ── Test capabilities ────────────────────────────────────────────────────────

struct Scripted(String);

impl IntentProducer for Scripted {
    fn produce_intent(&self, _: &str, _: &[ConversationTurn], _: &CancelToken) -> anyhow::Result<String> {
        Ok(self.0.clone())
    }
}

/// Never answers on its own; gives up once cancelled.
struct Stalled;

impl IntentProducer for Stalled {
    fn produce_intent(&self, _: &str, _: &[ConversationTurn], cancel: &CancelToken) -> anyhow::Result<String> {
        while !cancel.is_cancelled() {
            thread::sleep(Duration::from_millis(5));
        }
        anyhow::bail!("cancelled")
    }
}

#[derive(Default)]
struct Recording {
    seen: Mutex<Vec<NarrationRequest>>,
}

impl Narrator for Recording {
    fn narrate(&self, request: &NarrationRequest, _: &CancelToken) -> anyhow::Result<String> {
        self.seen.lock().unwrap().push(request.clone());
        Ok(format!("{} payloads narrated", request.results.len()))
    }
}

struct Broken;

impl Narrator for Broken {
    fn narrate(&self, _: &NarrationRequest, _: &CancelToken) -> anyhow::Result<String> {
        anyhow::bail!("model unavailable")
    }
}

fn store() -> Arc<DatasetStore> {
    Arc::new(DatasetStore::new(DataSource::CsvText(FIXTURE.to_string())))
}

fn pipeline(producer: Arc<dyn IntentProducer>, narrator: Arc<dyn Narrator>) -> InsightPipeline {
    let _ = env_logger::builder().is_test(true).try_init();
    InsightPipeline::new(store(), producer, narrator, InsightConfig::default_test())
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[test]
fn question_flows_through_to_narration() {
    let narrator = Arc::new(Recording::default());
    let intent = json!({"intent": "risk_analysis", "grouping": ["device_type"], "metrics": ["count"]});
    let p = pipeline(Arc::new(Scripted(intent.to_string())), narrator.clone());

    let answer = p.ask("Which devices fail most?", &[]).unwrap();
    assert_eq!(answer.text, "2 payloads narrated");
    assert!(answer.fallback().is_none());
    assert!(!answer.narration_degraded);
    assert_eq!(answer.execution["success"], json!(true));
    assert_eq!(answer.execution["row_count"], json!(3));
    assert_eq!(answer.analyses.len(), 1);
    assert_eq!(answer.analyses[0].analysis, "failure_rate");
    assert!(answer.analyses[0].success);

    let seen = narrator.seen.lock().unwrap();
    assert_eq!(seen[0].question, "Which devices fail most?");
    assert_eq!(seen[0].results.len(), 2);
}

#[test]
fn stalled_intent_producer_degrades_to_default_plan() {
    let p = pipeline(Arc::new(Stalled), Arc::new(Recording::default()));
    let answer = p.ask("How many transactions?", &[]).unwrap();

    let reason = answer.fallback().expect("fallback reason recorded");
    assert!(reason.contains("intent_producer"), "reason: {reason}");
    assert_eq!(answer.execution["data"][0]["count_transaction_id"], json!(6));
}

#[test]
fn garbage_intent_degrades_to_default_plan() {
    let p = pipeline(Arc::new(Scripted("not json at all".into())), Arc::new(Recording::default()));
    let answer = p.ask("??", &[]).unwrap();
    assert!(answer.fallback().is_some());
    assert_eq!(answer.execution["row_count"], json!(1));
}

#[test]
fn broken_narrator_falls_back_to_plain_summary() {
    let intent = json!({"intent": "descriptive", "metrics": ["average"]});
    let p = pipeline(Arc::new(Scripted(intent.to_string())), Arc::new(Broken));
    let answer = p.ask("Average amount?", &[]).unwrap();
    assert!(answer.narration_degraded);
    assert_eq!(answer.text, "Result: avg_amount_inr = 300");
}

#[test]
fn execution_errors_still_reach_narration() {
    let narrator = Arc::new(Recording::default());
    let intent = json!({"intent": "segmentation", "grouping": ["favourite_colour"]});
    let p = pipeline(Arc::new(Scripted(intent.to_string())), narrator.clone());

    let answer = p.ask("By colour?", &[]).unwrap();
    assert_eq!(answer.execution["success"], json!(false));
    assert!(answer.execution["error"].as_str().unwrap().contains("favourite_colour"));
    assert_eq!(narrator.seen.lock().unwrap().len(), 1);
}

#[test]
fn history_is_bounded_and_fraud_note_is_added() {
    let narrator = Arc::new(Recording::default());
    let intent = json!({"intent": "descriptive", "metrics": ["flag_rate"]});
    let p = pipeline(Arc::new(Scripted(intent.to_string())), narrator.clone());

    let history: Vec<ConversationTurn> =
        (0..5).map(|i| ConversationTurn::new(format!("q{i}"), format!("a{i}"))).collect();
    p.ask("And the flag rate?", &history).unwrap();

    let seen = narrator.seen.lock().unwrap();
    let request = &seen[0];
    assert_eq!(request.history.len(), 3);
    assert_eq!(request.history[0].question, "q2");
    assert!(request.stats_context.iter().any(|n| n == FRAUD_FLAG_NOTE));
}

#[test]
fn schema_failure_is_fatal_with_one_sentence() {
    let store = Arc::new(DatasetStore::new(DataSource::CsvText(
        "timestamp,transaction_status\n2024-01-01 00:00:00,SUCCESS\n".into(),
    )));
    let p = InsightPipeline::new(
        store,
        Arc::new(Scripted("{}".into())),
        Arc::new(Recording::default()),
        InsightConfig::default_test(),
    );
    let err = p.ask("anything", &[]).unwrap_err();
    assert!(matches!(err, InsightError::Schema { .. }));
    assert!(err.is_fatal());
    assert!(err.user_message().contains("amount_inr"));
}
