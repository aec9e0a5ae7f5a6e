use membench_core::{RunStatus, WorkloadSource};

use super::context::SweepContext;
use crate::cli::args::StatusArgs;
use crate::exit_codes::SUCCESS;

pub fn run(args: StatusArgs) -> anyhow::Result<i32> {
    let ctx = SweepContext::load(&args.selector)?;

    for idx in 0..ctx.workload.len() {
        let out_dir = ctx.out_dir(idx)?;
        match RunStatus::inspect(&ctx.workload, idx, &out_dir) {
            Ok(status) if args.json => println!("{}", serde_json::to_string(&status)?),
            Ok(status) => println!(
                "{:>4}  steps {}/{}  answered {}/{}  errors {}  {}{}",
                status.global_idx,
                status.current_step + 1,
                status.total_steps,
                status.answered,
                status.total_questions,
                status.placeholders,
                status.out_dir.display(),
                if status.is_complete() { "  done" } else { "" },
            ),
            // One unreadable checkpoint should not hide the others.
            Err(e) if args.json => println!(
                "{}",
                serde_json::json!({"global_idx": idx, "error": e.to_string()})
            ),
            Err(e) => println!("{idx:>4}  unreadable: {e}"),
        }
    }
    Ok(SUCCESS)
}
