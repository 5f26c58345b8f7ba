use serde_json::json;
use txn_insight_core::{
    dataset::Dataset,
    error::InsightError,
    executor::execute,
    plan::{AggFunc, AggregationSpec, Computation, ExecutionPlan, FilterCondition, FilterOp, SortSpec},
    result::ExecutionPayload,
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

fn count_by(column: &str) -> ExecutionPlan {
    ExecutionPlan {
        groupby: vec![column.to_string()],
        aggregations: vec![AggregationSpec::new("transaction_id", AggFunc::Count).with_alias("n")],
        ..ExecutionPlan::default()
    }
}

fn filtered_rows(ds: &Dataset, filter: FilterCondition) -> usize {
    let plan = ExecutionPlan { filters: vec![filter], ..ExecutionPlan::default() };
    execute(&plan, ds).unwrap().row_count()
}

#[test]
fn empty_plan_passes_every_row_through() {
    let ds = fixture();
    let table = execute(&ExecutionPlan::default(), &ds).unwrap();
    assert_eq!(table.row_count(), ds.len());
    assert_eq!(table.columns, ds.schema().names());
    assert_eq!(&table.rows[..], ds.rows());
}

#[test]
fn equality_filter_counts_matching_rows() {
    let ds = fixture();
    let plan = ExecutionPlan {
        filters: vec![FilterCondition::eq("transaction_type", "P2P")],
        ..ExecutionPlan::default_count("transaction_id")
    };
    let table = execute(&plan, &ds).unwrap();
    assert_eq!(table.columns, vec!["count_transaction_id"]);
    assert_eq!(table.rows, vec![vec![Cell::Int(2)]]);
}

#[test]
fn filter_operators() {
    let ds = fixture();
    assert_eq!(filtered_rows(&ds, FilterCondition::new("device_type", FilterOp::In, json!(["iOS", "Web"]))), 3);
    assert_eq!(filtered_rows(&ds, FilterCondition::new("amount_inr", FilterOp::Gt, 250)), 3, "null amount never matches >");
    assert_eq!(filtered_rows(&ds, FilterCondition::new("transaction_type", FilterOp::Ne, "P2P")), 4);
    assert_eq!(filtered_rows(&ds, FilterCondition::new("timestamp", FilterOp::Ge, "2024-01-08")), 3);
    assert_eq!(filtered_rows(&ds, FilterCondition::eq("is_weekend", true)), 2);
    assert_eq!(filtered_rows(&ds, FilterCondition::eq("fraud_flag", 1)), 1);
    assert_eq!(filtered_rows(&ds, FilterCondition::eq("merchant_category", serde_json::Value::Null)), 4);
    assert_eq!(filtered_rows(&ds, FilterCondition::new("hour_of_day", FilterOp::Le, 11)), 3);
    assert_eq!(
        filtered_rows(&ds, FilterCondition::new("merchant_category", FilterOp::In, json!([null]))),
        0,
        "null cells never satisfy in"
    );
    assert_eq!(filtered_rows(&ds, FilterCondition::new("merchant_category", FilterOp::In, json!([null, "Food"]))), 1);
}

#[test]
fn filters_combine_conjunctively() {
    let ds = fixture();
    let plan = ExecutionPlan {
        filters: vec![
            FilterCondition::eq("device_type", "Android"),
            FilterCondition::eq("transaction_status", "SUCCESS"),
            FilterCondition::new("amount_inr", FilterOp::Ge, 300),
        ],
        ..ExecutionPlan::default()
    };
    assert_eq!(execute(&plan, &ds).unwrap().row_count(), 2);
}

#[test]
fn grouped_counts_partition_the_filtered_rows() {
    let ds = fixture();
    let table = execute(&count_by("device_type"), &ds).unwrap();
    assert_eq!(table.columns, vec!["device_type", "n"]);

    let keys: Vec<String> = table.rows.iter().map(|r| r[0].label()).collect();
    assert_eq!(keys, vec!["Android", "Web", "iOS"], "groups come out in key order");
    let total: i64 = table.rows.iter().map(|r| if let Cell::Int(n) = r[1] { n } else { 0 }).sum();
    assert_eq!(total, 6);
}

#[test]
fn null_is_a_group_of_its_own() {
    let ds = fixture();
    let table = execute(&count_by("merchant_category"), &ds).unwrap();
    assert_eq!(table.row_count(), 3);
    let last = table.rows.last().unwrap();
    assert_eq!(last[0], Cell::Null, "null group sorts last");
    assert_eq!(last[1], Cell::Int(4));
}

#[test]
fn global_aggregations_ignore_nulls() {
    let ds = fixture();
    let plan = ExecutionPlan {
        aggregations: vec![
            AggregationSpec::new("amount_inr", AggFunc::Count),
            AggregationSpec::new("amount_inr", AggFunc::Sum),
            AggregationSpec::new("amount_inr", AggFunc::Mean),
            AggregationSpec::new("amount_inr", AggFunc::Median),
            AggregationSpec::new("amount_inr", AggFunc::Min),
            AggregationSpec::new("amount_inr", AggFunc::Max),
            AggregationSpec::new("timestamp", AggFunc::Max),
        ],
        ..ExecutionPlan::default()
    };
    let table = execute(&plan, &ds).unwrap();
    let row = &table.rows[0];
    assert_eq!(row[0], Cell::Int(5));
    assert_eq!(row[1], Cell::Float(1500.0));
    assert_eq!(row[2], Cell::Float(300.0));
    assert_eq!(row[3], Cell::Float(300.0));
    assert_eq!(row[4], Cell::Float(100.0));
    assert_eq!(row[5], Cell::Float(500.0));
    assert_eq!(row[6].label(), "2024-01-10 18:45:00");
}

#[test]
fn integer_sum_past_i64_is_reported_as_float() {
    let text = "timestamp,amount_inr,account_no\n\
                2024-01-01 00:00:00,1,5000000000000000000\n\
                2024-01-01 01:00:00,2,5000000000000000000\n";
    let ds = Dataset::from_csv_str(text).unwrap();
    let plan = ExecutionPlan::from_value(&json!({
        "aggregations": [{"column": "account_no", "function": "sum"}]
    }))
    .unwrap();
    let table = execute(&plan, &ds).unwrap();
    match table.rows[0][0] {
        Cell::Float(total) => assert!((total - 1e19).abs() < 1e6, "got {total}"),
        ref other => panic!("expected a float total, got {other:?}"),
    }

    let small = ExecutionPlan::from_value(&json!({
        "aggregations": [{"column": "hour_of_day", "function": "sum"}]
    }))
    .unwrap();
    assert_eq!(execute(&small, &ds).unwrap().rows, vec![vec![Cell::Int(1)]]);
}

#[test]
fn mean_of_all_null_values_is_null_not_an_error() {
    let ds = fixture();
    let plan = ExecutionPlan {
        filters: vec![FilterCondition::eq("transaction_type", "Recharge")],
        aggregations: vec![AggregationSpec::new("amount_inr", AggFunc::Mean)],
        ..ExecutionPlan::default()
    };
    let outcome = execute(&plan, &ds);
    assert_eq!(outcome.as_ref().unwrap().rows, vec![vec![Cell::Null]]);

    let payload = ExecutionPayload::new(&outcome).to_value();
    assert_eq!(payload["success"], json!(true));
    assert_eq!(payload["data"][0]["mean_amount_inr"], json!(null));
}

#[test]
fn empty_filter_result_keeps_columns() {
    let ds = fixture();
    let mut plan = count_by("device_type");
    plan.filters = vec![FilterCondition::eq("transaction_type", "UPI Lite")];
    let table = execute(&plan, &ds).unwrap();
    assert_eq!(table.row_count(), 0);
    assert_eq!(table.columns, vec!["device_type", "n"]);

    let global = ExecutionPlan {
        filters: plan.filters.clone(),
        aggregations: vec![AggregationSpec::new("amount_inr", AggFunc::Sum)],
        ..ExecutionPlan::default()
    };
    assert_eq!(execute(&global, &ds).unwrap().rows, vec![vec![Cell::Float(0.0)]]);
}

#[test]
fn sort_then_limit_is_a_prefix_of_the_sorted_result() {
    let ds = fixture();
    let mut plan = ExecutionPlan {
        groupby: vec!["sender_bank".into()],
        aggregations: vec![AggregationSpec::new("amount_inr", AggFunc::Sum).with_alias("total")],
        sort: Some(SortSpec { by: "total".into(), ascending: false }),
        ..ExecutionPlan::default()
    };
    let full = execute(&plan, &ds).unwrap();
    let banks: Vec<String> = full.rows.iter().map(|r| r[0].label()).collect();
    assert_eq!(banks, vec!["SBI", "ICICI", "HDFC"]);

    plan.limit = Some(2);
    let limited = execute(&plan, &ds).unwrap();
    assert_eq!(limited.rows, full.rows[..2].to_vec());
}

#[test]
fn sort_column_is_normalized_like_groupby() {
    let ds = fixture();
    let plan = ExecutionPlan::from_value(&json!({
        "groupby": ["Sender Bank"],
        "aggregations": [{"column": "Amount (INR)", "function": "sum"}],
        "sort": {"by": "Sender Bank", "ascending": true}
    }))
    .unwrap();
    let table = execute(&plan, &ds).unwrap();
    let banks: Vec<String> = table.rows.iter().map(|r| r[0].label()).collect();
    assert_eq!(banks, vec!["HDFC", "ICICI", "SBI"]);
}

#[test]
fn nulls_sort_last_in_both_directions() {
    let ds = fixture();
    for ascending in [true, false] {
        let plan = ExecutionPlan {
            groupby: vec!["transaction_type".into()],
            aggregations: vec![AggregationSpec::new("amount_inr", AggFunc::Mean).with_alias("avg")],
            sort: Some(SortSpec { by: "avg".into(), ascending }),
            ..ExecutionPlan::default()
        };
        let table = execute(&plan, &ds).unwrap();
        let last = table.rows.last().unwrap();
        assert_eq!(last[0].label(), "Recharge", "ascending={ascending}");
        assert_eq!(last[1], Cell::Null);
    }
}

#[test]
fn computations_evaluate_per_row_and_can_be_sorted_on() {
    let ds = fixture();
    let plan = ExecutionPlan {
        groupby: vec!["transaction_type".into()],
        aggregations: vec![
            AggregationSpec::new("transaction_id", AggFunc::Count).with_alias("n"),
            AggregationSpec::new("amount_inr", AggFunc::Sum).with_alias("total"),
        ],
        computations: vec![Computation { name: "avg_ticket".into(), formula: "total / n".into() }],
        sort: Some(SortSpec { by: "avg_ticket".into(), ascending: false }),
        ..ExecutionPlan::default()
    };
    let table = execute(&plan, &ds).unwrap();
    assert_eq!(table.columns, vec!["transaction_type", "n", "total", "avg_ticket"]);
    assert_eq!(table.rows[0][0].label(), "Bill Payment");
    assert_eq!(table.rows[0][3], Cell::Float(500.0));
    assert!(table.warnings.is_empty());
}

#[test]
fn bad_computation_is_skipped_with_a_warning() {
    let ds = fixture();
    let plan = ExecutionPlan {
        aggregations: vec![AggregationSpec::new("transaction_id", AggFunc::Count).with_alias("n")],
        computations: vec![
            Computation { name: "broken".into(), formula: "n * (".into() },
            Computation { name: "ghost".into(), formula: "missing_column + 1".into() },
            Computation { name: "doubled".into(), formula: "n * 2".into() },
        ],
        ..ExecutionPlan::default()
    };
    let outcome = execute(&plan, &ds);
    let table = outcome.as_ref().unwrap();
    assert_eq!(table.columns, vec!["n", "doubled"]);
    assert_eq!(table.rows[0][1], Cell::Float(12.0));
    assert_eq!(table.warnings.len(), 2);

    let payload = ExecutionPayload::new(&outcome).to_value();
    assert_eq!(payload["warnings"].as_array().map(Vec::len), Some(2));
}

#[test]
fn unknown_column_is_a_validation_error() {
    let ds = fixture();
    let outcome = execute(&count_by("no_such_column"), &ds);
    assert!(matches!(outcome, Err(InsightError::PlanValidation(_))));

    let payload = ExecutionPayload::new(&outcome).to_value();
    assert_eq!(payload["success"], json!(false));
    assert_eq!(payload["row_count"], json!(0));
    assert!(payload["error"].as_str().unwrap().contains("no_such_column"));
    assert!(payload.get("data").is_none(), "error payloads carry no data");
}

#[test]
fn invalid_plans_are_rejected() {
    let ds = fixture();

    let text_sum = ExecutionPlan {
        aggregations: vec![AggregationSpec::new("device_type", AggFunc::Sum)],
        ..ExecutionPlan::default()
    };
    assert!(matches!(execute(&text_sum, &ds), Err(InsightError::PlanValidation(_))));

    let duplicate = ExecutionPlan {
        aggregations: vec![
            AggregationSpec::new("amount_inr", AggFunc::Sum).with_alias("x"),
            AggregationSpec::new("amount_inr", AggFunc::Mean).with_alias("x"),
        ],
        ..ExecutionPlan::default()
    };
    assert!(matches!(execute(&duplicate, &ds), Err(InsightError::PlanValidation(_))));

    let ordering_on_bool = ExecutionPlan {
        filters: vec![FilterCondition::new("fraud_flag", FilterOp::Gt, 0)],
        ..ExecutionPlan::default()
    };
    assert!(matches!(execute(&ordering_on_bool, &ds), Err(InsightError::PlanValidation(_))));

    let bad_sort = ExecutionPlan {
        sort: Some(SortSpec { by: "nope".into(), ascending: true }),
        ..ExecutionPlan::default()
    };
    assert!(matches!(execute(&bad_sort, &ds), Err(InsightError::PlanValidation(_))));
}

#[test]
fn plan_json_is_parsed_leniently() {
    let plan = ExecutionPlan::from_value(&json!({
        "filters": [{"column": "Transaction Type", "operator": "eq", "value": "P2M"},
                    {"column": "device_type", "operator": "in", "value": "iOS"}],
        "groupby": "sender_bank",
        "aggregations": [{"column": "amount_inr", "function": "avg", "alias": "avg_amt"}],
        "sort": "avg_amt",
        "limit": 0
    }))
    .unwrap();
    assert_eq!(plan.filters[0].column, "transaction_type");
    assert_eq!(plan.filters[0].operator, FilterOp::Eq);
    assert_eq!(plan.filters[1].value, json!(["iOS"]));
    assert_eq!(plan.groupby, vec!["sender_bank"]);
    assert_eq!(plan.aggregations[0].function, AggFunc::Mean);
    assert_eq!(plan.sort, Some(SortSpec { by: "avg_amt".into(), ascending: false }));
    assert_eq!(plan.limit, None, "non-positive limits are dropped");

    let ds = fixture();
    let table = execute(&plan, &ds).unwrap();
    assert_eq!(table.rows, vec![vec![Cell::Text("HDFC".into()), Cell::Float(200.0)]]);

    let err = ExecutionPlan::from_value(&json!({"aggregations": [{"column": "x", "function": "mode"}]})).unwrap_err();
    assert!(matches!(err, InsightError::PlanValidation(_)));
    let err = ExecutionPlan::from_value(&json!({"groupby": 5})).unwrap_err();
    assert!(matches!(err, InsightError::PlanCompilation(_)));
}

#[test]
fn identical_plans_give_identical_results() {
    let ds = fixture();
    let plan = count_by("sender_age_group");
    assert_eq!(execute(&plan, &ds).unwrap(), execute(&plan, &ds).unwrap());
}
