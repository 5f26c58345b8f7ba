use serde_json::json;
use txn_insight_core::{
    compiler::PlanCompiler,
    dataset::Dataset,
    executor::execute,
    intent::{IntentKind, QueryIntent},
    plan::{AggFunc, AggregationSpec, ExecutionPlan, FilterCondition, FilterOp, SortSpec},
    stats::AnalysisRequest,
    types::Cell,
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

fn fixture() -> Dataset {
    Dataset::from_csv_str(FIXTURE).expect("fixture loads")
}

fn compiler() -> PlanCompiler {
    PlanCompiler::for_dataset(&fixture())
}

fn assert_default_plan(plan: &ExecutionPlan) {
    assert!(plan.filters.is_empty());
    assert!(plan.groupby.is_empty());
    assert_eq!(plan.aggregations, vec![AggregationSpec::new("transaction_id", AggFunc::Count)]);
}

#[test]
fn malformed_intents_compile_to_the_default_plan() {
    let c = compiler();
    let cases = [
        json!({"metrics": ["count"]}),
        json!({"intent": 7}),
        json!({"intent": "forecasting"}),
        json!({"intent": "descriptive", "grouping": {"not": "a list"}}),
        json!({"intent": "descriptive", "filters": [{"column": "device_type", "operator": "~", "value": "iOS"}]}),
        json!("just a string"),
    ];
    for intent in cases {
        let compiled = c.compile(&intent);
        assert!(compiled.is_fallback(), "expected fallback for {intent}");
        assert!(compiled.analyses.is_empty());
        assert_default_plan(&compiled.plan);
    }
}

#[test]
fn unparsable_reply_falls_back_and_says_why() {
    let compiled = compiler().compile_text("Sorry, I cannot help with that.");
    assert_default_plan(&compiled.plan);
    assert!(compiled.fallback.as_deref().unwrap().contains("no JSON"));
}

#[test]
fn fenced_reply_is_accepted() {
    let reply = "```json\n{\"intent\": \"descriptive\", \"metrics\": [\"average\"]}\n```";
    let compiled = compiler().compile_text(reply);
    assert!(!compiled.is_fallback());
    assert_eq!(compiled.intent, Some(IntentKind::Descriptive));
    assert_eq!(
        compiled.plan.aggregations,
        vec![AggregationSpec::new("amount_inr", AggFunc::Mean).with_alias("avg_amount_inr")]
    );
}

#[test]
fn filters_and_grouping_map_directly() {
    let compiled = compiler().compile(&json!({
        "intent": "segmentation",
        "filters": [
            {"column": "Transaction Type", "operator": "equals", "value": "P2M"},
            {"column": "device_type", "operator": "in", "value": "iOS"},
            {"network_type": "5G"}
        ],
        "grouping": ["sender_bank", "sender_bank"],
        "metrics": ["count", "total"]
    }));
    let plan = &compiled.plan;
    assert_eq!(
        plan.filters,
        vec![
            FilterCondition::eq("transaction_type", "P2M"),
            FilterCondition::new("device_type", FilterOp::In, json!(["iOS"])),
            FilterCondition::eq("network_type", "5G"),
        ]
    );
    assert_eq!(plan.groupby, vec!["sender_bank"], "duplicate grouping collapses");
    let names: Vec<String> = plan.aggregations.iter().map(AggregationSpec::output_name).collect();
    assert_eq!(names, vec!["transaction_count", "total_amount_inr"]);
    assert_eq!(plan.sort, Some(SortSpec { by: "transaction_count".into(), ascending: false }));
}

#[test]
fn entities_become_filters_and_limits() {
    let compiled = compiler().compile(&json!({
        "intent": "segmentation",
        "entities": {"device": "Android", "sender_age_group": "18-25", "timeframe": "last week", "top_n": 2},
        "grouping": ["sender_age_group"],
        "metrics": ["volume"]
    }));
    let plan = &compiled.plan;
    assert_eq!(plan.filters, vec![FilterCondition::eq("device_type", "Android")]);
    assert_eq!(plan.limit, Some(2));

    let table = execute(plan, &fixture()).unwrap();
    assert_eq!(table.row_count(), 2);
    assert_eq!(table.rows[0], vec![Cell::Text("18-25".into()), Cell::Int(1)]);
}

#[test]
fn metrics_without_mapping_fall_back_to_count() {
    let compiled = compiler().compile(&json!({"intent": "descriptive", "metrics": ["vibes"]}));
    assert!(!compiled.is_fallback());
    assert_eq!(
        compiled.plan.aggregations,
        vec![AggregationSpec::new("transaction_id", AggFunc::Count).with_alias("transaction_count")]
    );
}

#[test]
fn risk_questions_select_failure_rate() {
    let compiled = compiler().compile(&json!({
        "intent": "risk_analysis",
        "grouping": ["device_type"],
        "filters": [{"column": "transaction_type", "operator": "==", "value": "P2P"}]
    }));
    assert_eq!(
        compiled.analyses,
        vec![AnalysisRequest::FailureRate {
            filters:    vec![FilterCondition::eq("transaction_type", "P2P")],
            segment_by: Some("device_type".into()),
        }]
    );
}

#[test]
fn metric_and_intent_driven_analyses() {
    let c = compiler();

    let fraud = c.compile(&json!({"intent": "descriptive", "metrics": ["fraud_rate"]}));
    assert!(matches!(fraud.analyses.as_slice(), [AnalysisRequest::FraudRate { segment_by: None, .. }]));

    let corr = c.compile(&json!({"intent": "correlation", "grouping": ["device_type", "network_type"]}));
    assert!(matches!(
        corr.analyses.as_slice(),
        [AnalysisRequest::Correlation { variable1, variable2, .. }]
            if variable1 == "device_type" && variable2 == "network_type"
    ));

    let cmp = c.compile(&json!({"intent": "comparative", "grouping": ["device_type"], "metrics": ["average"]}));
    assert!(matches!(
        cmp.analyses.as_slice(),
        [AnalysisRequest::Comparison { segment_by, metric, .. }]
            if segment_by == "device_type" && metric == "amount_inr"
    ));

    let dist = c.compile(&json!({"intent": "descriptive", "metrics": ["distribution"]}));
    assert!(matches!(dist.analyses.as_slice(), [AnalysisRequest::Distribution { column, .. }] if column == "amount_inr"));

    let plain = c.compile(&json!({"intent": "descriptive"}));
    assert!(plain.analyses.is_empty());
}

#[test]
fn plan_payloads_are_accepted_or_fall_back() {
    let c = compiler();
    let good = c.compile_plan_payload(&json!({"groupby": ["device_type"], "aggregations": [{"column": "amount_inr", "function": "sum"}]}));
    assert!(!good.is_fallback());
    assert_eq!(good.plan.groupby, vec!["device_type"]);

    let bad = c.compile_plan_payload(&json!({"aggregations": "sum everything"}));
    assert!(bad.is_fallback());
    assert_default_plan(&bad.plan);
}

#[test]
fn every_compiled_plan_executes() {
    let ds = fixture();
    let c = PlanCompiler::for_dataset(&ds);
    let intents = [
        json!({"intent": "descriptive", "metrics": ["count", "average", "median", "max"]}),
        json!({"intent": "temporal", "grouping": ["hour_of_day"], "metrics": ["volume"]}),
        json!({"intent": "trend", "grouping": ["day_of_week"], "metrics": ["total"], "entities": {"is_weekend": true}}),
        json!({"intent": "comparative", "grouping": ["sender_bank"], "metrics": ["min", "max"]}),
        json!({"bogus": true}),
    ];
    for intent in intents {
        let compiled = c.compile(&intent);
        assert!(execute(&compiled.plan, &ds).is_ok(), "plan for {intent} should execute");
    }
}

#[test]
fn intent_fields_are_validated() {
    let intent = QueryIntent::from_value(&json!({
        "intent": "Risk Analysis",
        "metrics": "failure_rate",
        "grouping": "Device Type",
        "is_followup": true
    }))
    .unwrap();
    assert_eq!(intent.intent, IntentKind::RiskAnalysis);
    assert_eq!(intent.metrics, vec!["failure_rate"]);
    assert_eq!(intent.grouping, vec!["device_type"]);
    assert!(intent.is_followup);

    assert!(QueryIntent::from_value(&json!({"intent": "descriptive", "is_followup": "yes"})).is_err());
    assert!(QueryIntent::from_value(&json!({"intent": "descriptive", "entities": []})).is_err());
}
