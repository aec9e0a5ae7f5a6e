use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use membench_core::{
    AgentBuilder, AgentKind, HarnessConfig, RunInstance, RunMeta, RunOptions, WorkloadSource,
};
use serde::Serialize;
use tracing::{error, info};

use super::context::SweepContext;
use crate::cli::args::RunInstanceArgs;
use crate::exit_codes::SUCCESS;

/// Snapshot written to `parameters.json`.
#[derive(Debug, Serialize)]
struct RunParameters<'a> {
    version: &'static str,
    global_idx: usize,
    agent: AgentKind,
    dataset: &'a str,
    model: &'a str,
    workload: &'a PathBuf,
    #[serde(flatten)]
    meta: RunMeta,
    options: &'a RunOptions,
    config: &'a HarnessConfig,
}

pub async fn run(args: RunInstanceArgs) -> anyhow::Result<i32> {
    let ctx = SweepContext::load(&args.selector)?;
    let idx = args.global_idx;
    let out_dir = ctx
        .out_dir(idx)
        .with_context(|| format!("resolving run {idx}"))?;
    info!(global_idx = idx, out_dir = %out_dir.display(), "starting run");

    let factory = AgentBuilder::new(args.selector.agent, &args.selector.model, &ctx.config)?
        .with_working_dir(&out_dir);
    let options = RunOptions {
        force_restart: args.phases.force_restart,
        questions_only: args.phases.questions_only,
        ..RunOptions::from_config(&ctx.config)
    };
    let parameters = RunParameters {
        version: env!("CARGO_PKG_VERSION"),
        global_idx: idx,
        agent: args.selector.agent,
        dataset: ctx.workload.dataset(),
        model: &args.selector.model,
        workload: &args.selector.workload,
        meta: ctx.workload.run_meta(idx)?,
        options: &options,
        config: &ctx.config,
    };

    let instance = RunInstance::new(idx, &out_dir, Arc::new(factory), options.clone());
    match instance.execute(&ctx.workload, &parameters).await {
        Ok(summary) => {
            println!(
                "run {idx}: {} steps executed ({} skipped), {} answered, {} skipped, {} failed",
                summary.steps.executed,
                summary.steps.skipped,
                summary.questions.answered,
                summary.questions.skipped,
                summary.questions.failed,
            );
            Ok(SUCCESS)
        }
        Err(e) => {
            error!(global_idx = idx, error = %e, "run failed");
            Ok(e.exit_code())
        }
    }
}
