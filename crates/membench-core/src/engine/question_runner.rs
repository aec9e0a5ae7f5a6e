use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::agent::{AgentFactory, ProcessingUnit};
use crate::checkpoint::CheckpointStore;
use crate::error::{HarnessError, HarnessResult};
use crate::model::{Checkpoint, QuestionItem, QuestionResult, StepInput};
use crate::retry::RetryPolicy;

/// Outcome of a question pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuestionReport {
    /// Questions that got a real answer in this pass.
    pub answered: usize,
    /// Questions already answered by an earlier pass.
    pub skipped: usize,
    /// Questions that ended as error placeholders.
    pub failed: usize,
    /// Answered results whose missing metadata was filled in.
    pub backfilled: usize,
}

/// Answers every question of a run that does not yet have a real answer.
///
/// A failed question is recorded as an error placeholder and the pass moves
/// on; placeholders are asked again by the next pass.
pub struct QuestionRunner {
    global_idx: usize,
    store: CheckpointStore,
    factory: Arc<dyn AgentFactory>,
    state_dir: PathBuf,
    workers: usize,
    retry: Option<RetryPolicy>,
}

impl QuestionRunner {
    pub fn new(
        global_idx: usize,
        store: CheckpointStore,
        factory: Arc<dyn AgentFactory>,
        state_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            global_idx,
            store,
            factory,
            state_dir: state_dir.into(),
            workers: 1,
            retry: None,
        }
    }

    /// Concurrent queries, honoured only for agents with stateless queries.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Retry transient failures of each query with `policy`.
    pub fn with_retry(mut self, policy: Option<RetryPolicy>) -> Self {
        self.retry = policy;
        self
    }

    pub async fn run(
        &self,
        checkpoint: &mut Checkpoint,
        agent: Arc<dyn ProcessingUnit>,
        questions: &[QuestionItem],
    ) -> HarnessResult<QuestionReport> {
        let mut report = QuestionReport::default();
        let mut pending = Vec::new();
        let mut seen = HashSet::new();

        for item in questions {
            if !seen.insert(item.question.as_str()) {
                continue;
            }
            if checkpoint.answer_for(&item.question).is_some() {
                report.skipped += 1;
                if self.backfill(checkpoint, item)? {
                    report.backfilled += 1;
                }
            } else {
                pending.push(item.clone());
            }
        }

        let total = seen.len();
        info!(
            global_idx = self.global_idx,
            total,
            answered = report.skipped,
            pending = pending.len(),
            "answering questions"
        );

        let caps = agent.capabilities();
        if self.workers > 1 && caps.parallel_questions() && pending.len() > 1 {
            self.run_pool(checkpoint, agent, pending, total, &mut report)
                .await?;
        } else {
            self.run_sequential(checkpoint, agent, pending, total, &mut report)
                .await?;
        }
        Ok(report)
    }

    /// Fill in metadata for an already-answered question. Returns whether
    /// anything was written.
    fn backfill(&self, checkpoint: &mut Checkpoint, item: &QuestionItem) -> HarnessResult<bool> {
        let Some(metadata) = &item.metadata else {
            return Ok(false);
        };
        let Some(existing) = checkpoint
            .results
            .iter_mut()
            .find(|r| r.question == item.question && !r.is_error())
        else {
            return Ok(false);
        };
        if existing.metadata.is_some() {
            return Ok(false);
        }
        existing.metadata = Some(metadata.clone());
        self.store.commit_results(checkpoint)?;
        Ok(true)
    }

    async fn run_sequential(
        &self,
        checkpoint: &mut Checkpoint,
        mut agent: Arc<dyn ProcessingUnit>,
        pending: Vec<QuestionItem>,
        total: usize,
        report: &mut QuestionReport,
    ) -> HarnessResult<()> {
        let reload = agent.capabilities().requires_reload;
        // The agent handed in is fresh from its saved state.
        let mut dirty = false;

        for item in pending {
            let outcome = if reload && dirty {
                match self.factory.load(&self.state_dir).await {
                    Ok(fresh) => {
                        agent = fresh;
                        ask(agent.as_ref(), self.retry.as_ref(), &item.question).await
                    }
                    Err(e) => Err(e),
                }
            } else {
                ask(agent.as_ref(), self.retry.as_ref(), &item.question).await
            };
            dirty = true;
            self.record(checkpoint, &item, outcome, total, report)?;
        }
        Ok(())
    }

    async fn run_pool(
        &self,
        checkpoint: &mut Checkpoint,
        agent: Arc<dyn ProcessingUnit>,
        pending: Vec<QuestionItem>,
        total: usize,
        report: &mut QuestionReport,
    ) -> HarnessResult<()> {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut join_set = JoinSet::new();

        for item in pending {
            let semaphore = semaphore.clone();
            let agent = agent.clone();
            let retry = self.retry.clone();
            join_set.spawn(async move {
                let outcome = match semaphore.acquire_owned().await {
                    Ok(_permit) => {
                        // Inner task so a panic still comes back paired with its question.
                        let question = item.question.clone();
                        let answer = tokio::spawn(async move {
                            ask(agent.as_ref(), retry.as_ref(), &question).await
                        });
                        match answer.await {
                            Ok(outcome) => outcome,
                            Err(e) => Err(HarnessError::agent(format!("question task panicked: {e}"))),
                        }
                    }
                    Err(e) => Err(HarnessError::agent(format!("question pool closed: {e}"))),
                };
                (item, outcome)
            });
        }

        // Commits happen here, one at a time, in completion order.
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((item, outcome)) => self.record(checkpoint, &item, outcome, total, report)?,
                Err(e) => {
                    warn!(global_idx = self.global_idx, error = %e, "question task panicked");
                    report.failed += 1;
                }
            }
        }
        Ok(())
    }

    fn record(
        &self,
        checkpoint: &mut Checkpoint,
        item: &QuestionItem,
        outcome: HarnessResult<String>,
        total: usize,
        report: &mut QuestionReport,
    ) -> HarnessResult<()> {
        let result = match outcome {
            Ok(response) => {
                report.answered += 1;
                QuestionResult::answered(item, response)
            }
            Err(e) => {
                warn!(
                    global_idx = self.global_idx,
                    question = %item.question,
                    error = %e,
                    "question failed, recording placeholder"
                );
                report.failed += 1;
                QuestionResult::placeholder(item, e.to_string())
            }
        };
        self.store.commit_result(checkpoint, result)?;

        let done = checkpoint.results.iter().filter(|r| !r.is_error()).count();
        info!(global_idx = self.global_idx, "Question [{done} / {total}]");
        Ok(())
    }
}

async fn ask(
    agent: &dyn ProcessingUnit,
    retry: Option<&RetryPolicy>,
    question: &str,
) -> HarnessResult<String> {
    let input = StepInput::text(question);
    match retry {
        Some(policy) => policy.run(|| agent.send(&input, false)).await,
        None => agent.send(&input, false).await,
    }
}
