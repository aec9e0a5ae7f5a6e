use std::sync::Arc;

use membench_core::{RunOutcome, RunTarget, SelfExec, Supervisor, WorkloadSource};
use tracing::info;

use super::context::SweepContext;
use crate::cli::args::{LogFormat, SweepArgs};
use crate::exit_codes::SUCCESS;

pub async fn run(args: SweepArgs, log_format: LogFormat) -> anyhow::Result<i32> {
    let ctx = SweepContext::load(&args.selector)?;
    let ids: Vec<usize> = match args.global_idx {
        Some(idx) => vec![idx],
        None => (0..ctx.workload.len()).collect(),
    };
    let targets = ids
        .into_iter()
        .map(|idx| {
            Ok::<_, anyhow::Error>(RunTarget {
                global_idx: idx,
                out_dir: ctx.out_dir(idx)?,
            })
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    info!(
        sweep = %ctx.layout.sweep_dir().display(),
        runs = targets.len(),
        "sweep selected"
    );

    let mut child_args = args.selector.to_args();
    child_args.extend(args.phases.to_args());
    child_args.push("--log-format".into());
    child_args.push(log_format.as_arg().into());

    let supervisor = Supervisor::new(&ctx.config.supervisor, Arc::new(SelfExec::new(child_args)));
    let report = supervisor.run_batch(targets).await;

    for record in report.failed() {
        let reason = match &record.outcome {
            RunOutcome::Failed { exit_code: Some(code) } => format!("exit code {code}"),
            RunOutcome::Failed { exit_code: None } => "killed by signal".to_string(),
            RunOutcome::TimedOut => "timed out".to_string(),
            RunOutcome::SpawnFailed { reason } => format!("not started: {reason}"),
            RunOutcome::Succeeded => continue,
        };
        let log = record
            .logs
            .as_ref()
            .map(|l| l.child.display().to_string())
            .unwrap_or_default();
        eprintln!("run {} failed ({reason}) {log}", record.global_idx);
    }
    println!(
        "{} of {} runs succeeded",
        report.succeeded(),
        report.runs.len()
    );
    Ok(SUCCESS)
}
