use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::agent::ProcessingUnit;
use crate::checkpoint::CheckpointStore;
use crate::error::{HarnessError, HarnessResult};
use crate::model::{Checkpoint, StepInput, StepRecord};

/// Outcome of a memorization pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepReport {
    pub executed: usize,
    pub skipped: usize,
}

/// Drives a run through its memorization steps, one committed step at a time.
///
/// Steps up to `checkpoint.current_step` are never executed again unless
/// `force_restart` is set, which discards the committed steps first. Failures
/// abort the pass; retrying transient errors is the agent's job.
pub struct StepRunner {
    global_idx: usize,
    store: CheckpointStore,
    agent: Arc<dyn ProcessingUnit>,
    state_dir: PathBuf,
    force_restart: bool,
}

impl StepRunner {
    pub fn new(
        global_idx: usize,
        store: CheckpointStore,
        agent: Arc<dyn ProcessingUnit>,
        state_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            global_idx,
            store,
            agent,
            state_dir: state_dir.into(),
            force_restart: false,
        }
    }

    /// Re-execute every step from zero. For recovering from a known-bad checkpoint.
    pub fn force_restart(mut self, force: bool) -> Self {
        self.force_restart = force;
        self
    }

    pub async fn run(
        &self,
        checkpoint: &mut Checkpoint,
        steps: &[StepInput],
    ) -> HarnessResult<StepReport> {
        if self.force_restart && checkpoint.current_step >= 0 {
            self.store.reset_steps(checkpoint)?;
        }

        let total = steps.len();
        let start = checkpoint.next_step();
        if start > total {
            warn!(
                global_idx = self.global_idx,
                committed = start,
                total,
                "checkpoint has more steps than the workload"
            );
        }

        let mut report = StepReport {
            executed: 0,
            skipped: start.min(total),
        };
        if report.skipped > 0 {
            info!(
                global_idx = self.global_idx,
                skipped = report.skipped,
                total,
                "resuming after committed steps"
            );
        }

        for (step_index, input) in steps.iter().enumerate().skip(start) {
            info!(
                global_idx = self.global_idx,
                step = step_index,
                total,
                input = %input.summary(),
                "executing step"
            );
            let record = self
                .execute(input)
                .await
                .map_err(|e| HarnessError::Step {
                    global_idx: self.global_idx,
                    step_index,
                    source: Box::new(e),
                })?;
            self.store.commit_step(checkpoint, step_index, record)?;
            report.executed += 1;
        }
        Ok(report)
    }

    async fn execute(&self, input: &StepInput) -> HarnessResult<StepRecord> {
        if !self.agent.capabilities().accepts(input) {
            return Err(HarnessError::UnsupportedInput {
                agent: self.agent.name().to_string(),
                detail: input.summary(),
            });
        }
        let output = self.agent.send(input, true).await?;
        // Agent state must be on disk before the step is marked committed.
        self.agent.save_state(&self.state_dir).await?;
        Ok(StepRecord {
            input: input.clone(),
            output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::ScriptedAgent;

    fn steps(n: usize) -> Vec<StepInput> {
        (0..n).map(|i| StepInput::text(format!("chunk {i}"))).collect()
    }

    #[tokio::test]
    async fn fresh_run_executes_and_commits_every_step() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let agent = Arc::new(ScriptedAgent::default());
        let runner = StepRunner::new(0, store.clone(), agent.clone(), dir.path().join("agent_state"));

        let mut cp = store.load().unwrap();
        let report = runner.run(&mut cp, &steps(3)).await.unwrap();

        assert_eq!(report, StepReport { executed: 3, skipped: 0 });
        assert_eq!(cp.current_step, 2);
        assert_eq!(store.load().unwrap(), cp);
        assert_eq!(agent.memorized(), vec!["chunk 0", "chunk 1", "chunk 2"]);
        assert_eq!(agent.saves(), 3);
    }

    #[tokio::test]
    async fn resume_skips_committed_steps() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let mut cp = store.load().unwrap();
        for i in 0..2 {
            store
                .commit_step(
                    &mut cp,
                    i,
                    StepRecord {
                        input: StepInput::text(format!("chunk {i}")),
                        output: "old".into(),
                    },
                )
                .unwrap();
        }

        let agent = Arc::new(ScriptedAgent::default());
        let runner = StepRunner::new(0, store.clone(), agent.clone(), dir.path().join("s"));
        let mut cp = store.load().unwrap();
        let report = runner.run(&mut cp, &steps(3)).await.unwrap();

        assert_eq!(report, StepReport { executed: 1, skipped: 2 });
        assert_eq!(agent.memorized(), vec!["chunk 2"]);
        assert_eq!(cp.steps[0].output, "old");
    }

    #[tokio::test]
    async fn failure_aborts_without_committing_the_failed_step() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let agent = Arc::new(ScriptedAgent::default().fail_memorizing("chunk 1"));
        let runner = StepRunner::new(7, store.clone(), agent, dir.path().join("s"));

        let mut cp = store.load().unwrap();
        let err = runner.run(&mut cp, &steps(3)).await.unwrap_err();

        assert!(matches!(
            err,
            HarnessError::Step {
                global_idx: 7,
                step_index: 1,
                ..
            }
        ));
        assert_eq!(store.load().unwrap().current_step, 0);
    }

    #[tokio::test]
    async fn force_restart_reexecutes_from_zero() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let agent = Arc::new(ScriptedAgent::default());
        let mut cp = store.load().unwrap();
        StepRunner::new(0, store.clone(), agent.clone(), dir.path().join("s"))
            .run(&mut cp, &steps(2))
            .await
            .unwrap();

        let again = Arc::new(ScriptedAgent::default());
        let report = StepRunner::new(0, store.clone(), again.clone(), dir.path().join("s"))
            .force_restart(true)
            .run(&mut cp, &steps(2))
            .await
            .unwrap();

        assert_eq!(report, StepReport { executed: 2, skipped: 0 });
        assert_eq!(again.memorized().len(), 2);
        assert_eq!(store.load().unwrap().current_step, 1);
    }

    #[tokio::test]
    async fn image_steps_need_an_image_capable_agent() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let agent = Arc::new(ScriptedAgent::default().text_only());
        let runner = StepRunner::new(0, store.clone(), agent, dir.path().join("s"));
        let images = vec![StepInput::Images { images: vec![] }];

        let mut cp = store.load().unwrap();
        let err = runner.run(&mut cp, &images).await.unwrap_err();
        match err {
            HarnessError::Step { source, .. } => {
                assert!(matches!(*source, HarnessError::UnsupportedInput { .. }))
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
