use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use super::{QuestionReport, QuestionRunner, StepReport, StepRunner};
use crate::agent::AgentFactory;
use crate::checkpoint::CheckpointStore;
use crate::config::HarnessConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::layout::RunLayout;
use crate::retry::RetryPolicy;
use crate::workload::WorkloadSource;

/// Knobs for a single run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunOptions {
    /// Discard committed steps and memorize from the first step.
    pub force_restart: bool,
    /// Skip memorization and answer against the existing agent state.
    pub questions_only: bool,
    pub question_workers: usize,
    /// Retry policy around each question; `None` asks once.
    pub answer_retry: Option<RetryPolicy>,
}

impl RunOptions {
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            force_restart: false,
            questions_only: false,
            question_workers: config.questions.workers,
            answer_retry: config
                .questions
                .retry_answers
                .then(|| config.retry.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub global_idx: usize,
    pub out_dir: PathBuf,
    pub steps: StepReport,
    pub questions: QuestionReport,
}

/// One run, end to end: load or create the agent, memorize, answer.
pub struct RunInstance {
    global_idx: usize,
    out_dir: PathBuf,
    factory: Arc<dyn AgentFactory>,
    options: RunOptions,
}

impl RunInstance {
    pub fn new(
        global_idx: usize,
        out_dir: impl Into<PathBuf>,
        factory: Arc<dyn AgentFactory>,
        options: RunOptions,
    ) -> Self {
        Self {
            global_idx,
            out_dir: out_dir.into(),
            factory,
            options,
        }
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Execute the run. `parameters` is written to `parameters.json` before
    /// the question phase.
    pub async fn execute<P: Serialize>(
        &self,
        workload: &dyn WorkloadSource,
        parameters: &P,
    ) -> HarnessResult<RunSummary> {
        workload.check_index(self.global_idx)?;
        if self.options.force_restart && self.options.questions_only {
            return Err(HarnessError::config(
                "force_restart and questions_only cannot be combined",
            ));
        }
        let steps = workload.steps(self.global_idx)?;
        let questions = workload.questions(self.global_idx)?;
        let state_dir = RunLayout::agent_state_dir(&self.out_dir);
        let store = CheckpointStore::new(&self.out_dir);

        if self.options.force_restart {
            // Step files may not parse; neither is read before this.
            store.discard_steps()?;
            if state_dir.exists() {
                warn!(
                    global_idx = self.global_idx,
                    state_dir = %state_dir.display(),
                    "discarding saved agent state (forced restart)"
                );
                std::fs::remove_dir_all(&state_dir)?;
            }
        }

        // Only saved agent state means resume; `logs/` may already exist.
        let resuming = state_dir.is_dir();
        std::fs::create_dir_all(&self.out_dir)?;
        let agent = if resuming {
            info!(
                global_idx = self.global_idx,
                state_dir = %state_dir.display(),
                "loading agent from saved state"
            );
            self.factory.load(&state_dir).await?
        } else {
            info!(global_idx = self.global_idx, kind = %self.factory.kind(), "creating agent");
            self.factory.create().await?
        };

        let mut checkpoint = store.load()?;

        let step_report = if self.options.questions_only {
            info!(global_idx = self.global_idx, "skipping memorization");
            StepReport {
                executed: 0,
                skipped: steps.len(),
            }
        } else {
            let report = StepRunner::new(self.global_idx, store.clone(), agent.clone(), &state_dir)
                .run(&mut checkpoint, &steps)
                .await?;
            agent.save_state(&state_dir).await?;
            report
        };

        agent.prepare_for_questions().await?;
        store.save_parameters(parameters)?;

        let question_report =
            QuestionRunner::new(self.global_idx, store, self.factory.clone(), &state_dir)
                .with_workers(self.options.question_workers)
                .with_retry(self.options.answer_retry.clone())
                .run(&mut checkpoint, agent, &questions)
                .await?;

        info!(
            global_idx = self.global_idx,
            steps_executed = step_report.executed,
            answered = question_report.answered,
            failed = question_report.failed,
            "run finished"
        );
        Ok(RunSummary {
            global_idx: self.global_idx,
            out_dir: self.out_dir.clone(),
            steps: step_report,
            questions: question_report,
        })
    }
}

/// Progress of a run as seen from its checkpoint, without touching the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunStatus {
    pub global_idx: usize,
    pub out_dir: PathBuf,
    pub current_step: i64,
    pub total_steps: usize,
    pub answered: usize,
    pub placeholders: usize,
    pub total_questions: usize,
}

impl RunStatus {
    pub fn inspect(
        workload: &dyn WorkloadSource,
        global_idx: usize,
        out_dir: &Path,
    ) -> HarnessResult<Self> {
        workload.check_index(global_idx)?;
        let checkpoint = CheckpointStore::new(out_dir).load()?;
        let questions = workload.questions(global_idx)?;
        let answered = questions
            .iter()
            .filter(|q| checkpoint.answer_for(&q.question).is_some())
            .count();
        Ok(Self {
            global_idx,
            out_dir: out_dir.to_path_buf(),
            current_step: checkpoint.current_step,
            total_steps: workload.steps(global_idx)?.len(),
            answered,
            placeholders: checkpoint.placeholders(),
            total_questions: questions.len(),
        })
    }

    pub fn is_complete(&self) -> bool {
        self.current_step.saturating_add(1) >= self.total_steps as i64
            && self.answered == self.total_questions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::PARAMETERS_FILE;
    use crate::engine::testing::{ScriptedAgent, ScriptedFactory};
    use crate::workload::JsonWorkload;

    const WORKLOAD: &str = r#"{
        "dataset": "toy",
        "runs": [{
            "subset": "a",
            "steps": ["s0", "s1", "s2"],
            "questions": [
                {"question": "q1", "answer": "x"},
                {"question": "q2", "answer": "y"}
            ]
        }]
    }"#;

    fn setup() -> (tempfile::TempDir, JsonWorkload, Arc<ScriptedFactory>) {
        (
            tempfile::tempdir().unwrap(),
            JsonWorkload::from_json_str(WORKLOAD).unwrap(),
            Arc::new(ScriptedFactory::new(ScriptedAgent::default())),
        )
    }

    #[tokio::test]
    async fn fresh_run_creates_agent_and_writes_parameters() {
        let (dir, workload, factory) = setup();
        let out = dir.path().join("run0");
        let run = RunInstance::new(0, &out, factory.clone(), RunOptions::default());

        let summary = run
            .execute(&workload, &serde_json::json!({"model": "m"}))
            .await
            .unwrap();

        assert_eq!(summary.steps.executed, 3);
        assert_eq!(summary.questions.answered, 2);
        assert_eq!((factory.creates(), factory.loads()), (1, 0));
        assert_eq!(factory.agent.prepared(), 1);
        assert!(out.join(PARAMETERS_FILE).exists());

        let status = RunStatus::inspect(&workload, 0, &out).unwrap();
        assert!(status.is_complete());
    }

    #[tokio::test]
    async fn existing_out_dir_loads_agent_and_skips_finished_work() {
        let (dir, workload, factory) = setup();
        let out = dir.path().join("run0");
        let run = RunInstance::new(0, &out, factory.clone(), RunOptions::default());
        run.execute(&workload, &()).await.unwrap();

        let again = run.execute(&workload, &()).await.unwrap();
        assert_eq!(again.steps, StepReport { executed: 0, skipped: 3 });
        assert_eq!(again.questions.skipped, 2);
        assert_eq!(factory.loads(), 1);
        assert_eq!(factory.agent.memorized().len(), 3);
    }

    #[tokio::test]
    async fn questions_only_never_memorizes() {
        let (dir, workload, factory) = setup();
        let out = dir.path().join("run0");
        let options = RunOptions {
            questions_only: true,
            ..RunOptions::default()
        };
        let summary = RunInstance::new(0, &out, factory.clone(), options)
            .execute(&workload, &())
            .await
            .unwrap();

        assert_eq!(summary.steps.executed, 0);
        assert!(factory.agent.memorized().is_empty());
        assert_eq!(factory.agent.queries(), vec!["q1", "q2"]);
    }

    #[tokio::test]
    async fn out_of_range_selector_is_rejected_before_any_io() {
        let (dir, workload, factory) = setup();
        let out = dir.path().join("run9");
        let err = RunInstance::new(9, &out, factory, RunOptions::default())
            .execute(&workload, &())
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn prepared_logs_dir_does_not_count_as_saved_state() {
        let (dir, workload, factory) = setup();
        let out = dir.path().join("run0");
        crate::supervisor::RunLogs::prepare(&out).unwrap();

        RunInstance::new(0, &out, factory.clone(), RunOptions::default())
            .execute(&workload, &())
            .await
            .unwrap();

        assert_eq!((factory.creates(), factory.loads()), (1, 0));
        assert!(RunLayout::agent_state_dir(&out).is_dir());
    }

    #[tokio::test]
    async fn forced_restart_recovers_from_unparseable_marker() {
        let (dir, workload, factory) = setup();
        let out = dir.path().join("run0");
        std::fs::create_dir_all(&out).unwrap();
        std::fs::write(out.join(crate::checkpoint::CURRENT_STEP_FILE), "garbage").unwrap();

        let err = RunInstance::new(0, &out, factory.clone(), RunOptions::default())
            .execute(&workload, &())
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::CheckpointCorruption { .. }));

        let options = RunOptions {
            force_restart: true,
            ..RunOptions::default()
        };
        let summary = RunInstance::new(0, &out, factory.clone(), options)
            .execute(&workload, &())
            .await
            .unwrap();
        assert_eq!(summary.steps.executed, 3);
        assert_eq!(CheckpointStore::new(&out).load().unwrap().current_step, 2);
    }

    #[tokio::test]
    async fn forced_restart_creates_a_fresh_agent() {
        let (dir, workload, factory) = setup();
        let out = dir.path().join("run0");
        RunInstance::new(0, &out, factory.clone(), RunOptions::default())
            .execute(&workload, &())
            .await
            .unwrap();
        std::fs::write(RunLayout::agent_state_dir(&out).join("stale"), "x").unwrap();

        let options = RunOptions {
            force_restart: true,
            ..RunOptions::default()
        };
        let summary = RunInstance::new(0, &out, factory.clone(), options)
            .execute(&workload, &())
            .await
            .unwrap();

        assert_eq!(summary.steps.executed, 3);
        assert_eq!((factory.creates(), factory.loads()), (2, 0));
        assert!(!RunLayout::agent_state_dir(&out).join("stale").exists());
    }

    #[tokio::test]
    async fn forced_restart_with_questions_only_is_a_config_error() {
        let (dir, workload, factory) = setup();
        let options = RunOptions {
            force_restart: true,
            questions_only: true,
            ..RunOptions::default()
        };
        let err = RunInstance::new(0, dir.path().join("run0"), factory, options)
            .execute(&workload, &())
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
