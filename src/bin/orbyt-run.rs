//! Demo/smoke-test harness for the Orbyt engine.
//!
//! Loads a JSON workflow document from disk and runs it to completion,
//! printing the result. This is explicitly not "the CLI front end" (parsing
//! YAML, a plugin system for real action providers, etc. are out of scope
//! for the core crate) — it exists so the kernel can be exercised end to end
//! without embedding it in a larger service.

use anyhow::{Context, Result};
use clap::Parser;
use orbyt::{Engine, ExecutionOptions, WorkflowDefinition, WorkflowStatus};
use orbyt::infrastructure::config::ConfigLoader;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "orbyt-run", about = "Run a workflow document through the Orbyt engine")]
struct Args {
    /// Path to a JSON workflow document.
    workflow: PathBuf,

    /// Print the dry-run explanation instead of executing the workflow.
    #[arg(long)]
    explain: bool,

    /// Validate only; never executes the workflow.
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = ConfigLoader::load().unwrap_or_default();
    let _logger = orbyt::infrastructure::logging::LoggerImpl::init(&config.logging).ok();

    let raw = std::fs::read_to_string(&args.workflow)
        .with_context(|| format!("failed to read workflow file {}", args.workflow.display()))?;
    let workflow: WorkflowDefinition =
        serde_json::from_str(&raw).context("workflow file is not valid JSON for the expected shape")?;

    let engine = Engine::new(config.default_step_timeout_ms, config.default_concurrency, config.event_bus_capacity);

    if args.validate {
        let report = engine.validate(workflow);
        println!("{}", serde_json::to_string_pretty(&report)?);
        std::process::exit(if report.valid { 0 } else { 1 });
    }

    let plan = engine.load_and_validate(workflow).map_err(|errors| {
        anyhow::anyhow!("workflow failed validation: {}", errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))
    })?;

    if args.explain {
        let explanation = engine.explain(&plan);
        println!("{}", serde_json::to_string_pretty(&explanation)?);
        return Ok(());
    }

    let result = engine.run_plan(plan, ExecutionOptions::default()).await;
    println!("{}", serde_json::to_string_pretty(&result)?);
    std::process::exit(exit_code_for_result(&result));
}

/// Exit codes per spec §6: 0 success; 2 cycle detected or partial/failed
/// workflow; 3 timeout; otherwise fall back to the offending error's own
/// code (e.g. a security violation's dedicated exit code).
fn exit_code_for_result(result: &orbyt::WorkflowResult) -> i32 {
    match result.status {
        WorkflowStatus::Completed => 0,
        WorkflowStatus::Timeout => 3,
        WorkflowStatus::Partial | WorkflowStatus::Failed | WorkflowStatus::Cancelled => {
            result.error.as_ref().map_or(2, orbyt::EngineError::exit_code)
        }
        WorkflowStatus::Queued | WorkflowStatus::Running | WorkflowStatus::Paused => 4,
    }
}
