//! insight-runner: headless runner for the transaction insight engine.
//!
//! Usage:
//!   insight-runner --data upi.csv --plan plan.json
//!   insight-runner --synthetic 5000 --seed 42 --analysis failure_rate --params '{"segment_by":"device_type"}'
//!   insight-runner --data upi.csv --intent intent.json --question "Which bank fails most?"
//!   insight-runner --synthetic 5000 --ipc-mode

use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::env;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use txn_insight_core::{
    capability::{CancelToken, IntentProducer},
    compiler::PlanCompiler,
    config::InsightConfig,
    dataset::COLUMN_INFO,
    executor::execute,
    narration::{ConversationTurn, PlainNarrator},
    pipeline::InsightPipeline,
    plan::ExecutionPlan,
    result::ExecutionPayload,
    stats,
    store::DatasetStore,
    synth::synthetic_dataset,
};

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    Execute {
        plan: Value,
    },
    Analyze {
        analysis: String,
        #[serde(default)]
        parameters: Value,
    },
    Compile {
        intent: Value,
    },
    Ask {
        question: String,
        intent: Value,
    },
    Reload,
    Quit,
}

/// Hands back a pre-written intent instead of asking a model.
struct FixedIntent(String);

impl IntentProducer for FixedIntent {
    fn produce_intent(&self, _q: &str, _h: &[ConversationTurn], _c: &CancelToken) -> Result<String> {
        Ok(self.0.clone())
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let synthetic = parse_arg(&args, "--synthetic", 0usize);
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");

    let config = match flag_value(&args, "--config") {
        Some(path) => InsightConfig::load(path)?,
        None => InsightConfig::default(),
    };

    let store = if synthetic > 0 {
        DatasetStore::preloaded(synthetic_dataset(synthetic, seed)?)
    } else {
        let path = flag_value(&args, "--data")
            .map(std::path::PathBuf::from)
            .or_else(|| config.data_path.clone())
            .context("pass --data <csv>, --synthetic <rows> or set data_path in --config")?;
        DatasetStore::from_path(path)
    };
    let store = Arc::new(store);

    // Fatal load errors end the run with the user-facing sentence.
    let dataset = store.load(false).map_err(|e| {
        log::error!("{e}");
        anyhow::anyhow!(e.user_message())
    })?;

    if ipc_mode {
        return run_ipc_loop(&store, &config);
    }

    if !args.iter().any(|a| a == "--quiet") {
        println!("insight-runner");
        println!("  rows:      {}", dataset.len());
        println!("  columns:   {}", dataset.schema().names().join(", "));
        println!();
    }

    if let Some(path) = flag_value(&args, "--plan") {
        let text = std::fs::read_to_string(path).with_context(|| format!("Cannot read {path}"))?;
        let payload: Value = serde_json::from_str(&text)?;
        let compiled = PlanCompiler::for_dataset(&dataset).compile_plan_payload(&payload);
        if let Some(reason) = &compiled.fallback {
            println!("plan rejected ({reason}); running the default count");
        }
        let outcome = execute(&compiled.plan, &dataset);
        println!("{}", serde_json::to_string_pretty(&ExecutionPayload::new(&outcome))?);
    } else if let Some(analysis) = flag_value(&args, "--analysis") {
        let params: Value = match flag_value(&args, "--params") {
            Some(raw) => serde_json::from_str(raw)?,
            None => Value::Null,
        };
        let payload = stats::run_named(analysis, &params, &dataset);
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else if let Some(path) = flag_value(&args, "--intent") {
        let intent = std::fs::read_to_string(path).with_context(|| format!("Cannot read {path}"))?;
        let question = flag_value(&args, "--question").unwrap_or("");
        let pipeline = build_pipeline(&store, &config, intent);
        let answer = pipeline.ask(question, &[]).map_err(|e| anyhow::anyhow!(e.user_message()))?;
        println!("{}", serde_json::to_string_pretty(&answer.compiled)?);
        println!();
        println!("{}", answer.text);
    } else {
        print_summary(&store)?;
    }

    Ok(())
}

fn build_pipeline(store: &Arc<DatasetStore>, config: &InsightConfig, intent: String) -> InsightPipeline {
    InsightPipeline::new(
        Arc::clone(store),
        Arc::new(FixedIntent(intent)),
        Arc::new(PlainNarrator),
        config.clone(),
    )
}

fn run_ipc_loop(store: &Arc<DatasetStore>, config: &InsightConfig) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();
    let mut history: Vec<ConversationTurn> = Vec::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }
        if buffer.trim().is_empty() {
            continue;
        }

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                writeln!(stdout, "{}", json!({ "error": e.to_string() }))?;
                stdout.flush()?;
                continue;
            }
        };

        let reply = match cmd {
            IpcCommand::Quit => break,
            other => handle_command(store, config, &mut history, other),
        };
        writeln!(stdout, "{reply}")?;
        stdout.flush()?;
    }
    Ok(())
}

fn handle_command(
    store: &Arc<DatasetStore>,
    config: &InsightConfig,
    history: &mut Vec<ConversationTurn>,
    cmd: IpcCommand,
) -> Value {
    let dataset = match store.load(false) {
        Ok(d) => d,
        Err(e) => return json!({ "error": e.user_message() }),
    };

    match cmd {
        IpcCommand::Execute { plan } => {
            let outcome = ExecutionPlan::from_value(&plan).and_then(|p| execute(&p, &dataset));
            ExecutionPayload::new(&outcome).to_value()
        }
        IpcCommand::Analyze { analysis, parameters } => {
            let payload = stats::run_named(&analysis, &parameters, &dataset);
            serde_json::to_value(payload).unwrap_or_else(|e| json!({ "error": e.to_string() }))
        }
        IpcCommand::Compile { intent } => {
            let compiled = PlanCompiler::for_dataset(&dataset).compile(&intent);
            serde_json::to_value(compiled).unwrap_or_else(|e| json!({ "error": e.to_string() }))
        }
        IpcCommand::Ask { question, intent } => {
            let intent = match intent {
                Value::String(raw) => raw,
                other => other.to_string(),
            };
            let pipeline = build_pipeline(store, config, intent);
            match pipeline.ask(&question, history) {
                Ok(answer) => {
                    history.push(ConversationTurn::new(question, answer.text.clone()));
                    serde_json::to_value(answer).unwrap_or_else(|e| json!({ "error": e.to_string() }))
                }
                Err(e) => json!({ "error": e.user_message() }),
            }
        }
        IpcCommand::Reload => match store.load(true) {
            Ok(d) => json!({ "reloaded": true, "rows": d.len() }),
            Err(e) => json!({ "reloaded": false, "error": e.user_message() }),
        },
        IpcCommand::Quit => json!({}),
    }
}

fn print_summary(store: &DatasetStore) -> Result<()> {
    let dataset = store.load(false).map_err(|e| anyhow::anyhow!(e.user_message()))?;
    println!("=== DATASET SUMMARY ===");
    for field in dataset.schema().fields() {
        let distinct = dataset.unique_values(&field.name).map(|v| v.len()).unwrap_or(0);
        let about = COLUMN_INFO
            .iter()
            .find(|(name, _)| *name == field.name)
            .map(|(_, text)| *text)
            .unwrap_or("");
        println!("  {:<22} {:<10} {distinct:>5} distinct  {about}", field.name, field.kind.label());
    }

    println!();
    println!("=== FAILURE RATE ===");
    let payload = stats::run_named("failure_rate", &Value::Null, &dataset);
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].as_str())
}
