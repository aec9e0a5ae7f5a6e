//! File-based checkpoint store.
//!
//! # Layout
//!
//! ```text
//! <out_dir>/
//!   current_step.txt   # index of the last committed step (absent = -1)
//!   steps.json         # committed steps, [{input, output}, ...]
//!   results.json       # question results, [{question, response, answer, metadata?}, ...]
//!   parameters.json    # run configuration snapshot
//! ```
//!
//! A step commit writes `steps.json` first and `current_step.txt` second. The
//! marker is the commit point: a step payload without a marker is ignored on
//! load and re-executed.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{HarnessError, HarnessResult};
use crate::model::{Checkpoint, QuestionResult, StepRecord};

mod io;

pub const CURRENT_STEP_FILE: &str = "current_step.txt";
pub const STEPS_FILE: &str = "steps.json";
pub const RESULTS_FILE: &str = "results.json";
pub const PARAMETERS_FILE: &str = "parameters.json";

/// Checkpoint store rooted at one run's output directory.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    out_dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    fn path(&self, name: &str) -> PathBuf {
        self.out_dir.join(name)
    }

    /// Whether any checkpoint state has been written yet.
    pub fn exists(&self) -> bool {
        self.path(CURRENT_STEP_FILE).exists()
            || self.path(STEPS_FILE).exists()
            || self.path(RESULTS_FILE).exists()
    }

    /// Load the last committed state, or a zero-value checkpoint.
    pub fn load(&self) -> HarnessResult<Checkpoint> {
        let current_step = self.load_current_step()?;
        let steps = self.load_steps(current_step)?;
        let results = self.load_results()?;
        debug!(
            out_dir = %self.out_dir.display(),
            current_step,
            results = results.len(),
            "checkpoint loaded"
        );
        Ok(Checkpoint {
            current_step,
            steps,
            results,
        })
    }

    fn load_current_step(&self) -> HarnessResult<i64> {
        let path = self.path(CURRENT_STEP_FILE);
        let Some(raw) = io::read_optional(&path)? else {
            return Ok(-1);
        };
        let value: i64 = raw
            .trim()
            .parse()
            .map_err(|e| HarnessError::corruption(&path, format!("invalid step index {raw:?}: {e}")))?;
        if value < -1 {
            return Err(HarnessError::corruption(
                &path,
                format!("negative step index {value}"),
            ));
        }
        Ok(value)
    }

    fn load_steps(&self, current_step: i64) -> HarnessResult<Vec<StepRecord>> {
        let path = self.path(STEPS_FILE);
        let committed = current_step
            .checked_add(1)
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| {
                HarnessError::corruption(
                    self.path(CURRENT_STEP_FILE),
                    format!("step index {current_step} out of range"),
                )
            })?;
        let mut steps: Vec<StepRecord> = match io::read_optional(&path)? {
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|e| HarnessError::corruption(&path, e.to_string()))?,
            None => Vec::new(),
        };

        if steps.len() < committed {
            return Err(HarnessError::corruption(
                &path,
                format!(
                    "marker says step {current_step} is committed but only {} steps are stored",
                    steps.len()
                ),
            ));
        }
        if steps.len() > committed {
            warn!(
                out_dir = %self.out_dir.display(),
                stored = steps.len(),
                committed,
                "ignoring uncommitted step payload"
            );
            steps.truncate(committed);
        }
        Ok(steps)
    }

    fn load_results(&self) -> HarnessResult<Vec<QuestionResult>> {
        let path = self.path(RESULTS_FILE);
        match io::read_optional(&path)? {
            Some(raw) => {
                serde_json::from_str(&raw).map_err(|e| HarnessError::corruption(&path, e.to_string()))
            }
            None => Ok(Vec::new()),
        }
    }

    fn ensure_dir(&self) -> HarnessResult<()> {
        std::fs::create_dir_all(&self.out_dir)?;
        Ok(())
    }

    /// Durably commit step `step_index`, which must directly follow the last one.
    pub fn commit_step(
        &self,
        checkpoint: &mut Checkpoint,
        step_index: usize,
        record: StepRecord,
    ) -> HarnessResult<()> {
        let expected = checkpoint.current_step.saturating_add(1);
        if step_index as i64 != expected {
            return Err(HarnessError::OutOfOrderCommit {
                expected,
                got: step_index as i64,
            });
        }
        self.ensure_dir()?;

        let mut steps = checkpoint.steps.clone();
        steps.push(record);

        // Payload first, marker second. Never reorder.
        io::write_json_atomic(&self.path(STEPS_FILE), &steps)?;
        io::write_atomic(
            &self.path(CURRENT_STEP_FILE),
            step_index.to_string().as_bytes(),
        )?;

        checkpoint.steps = steps;
        checkpoint.current_step = step_index as i64;
        Ok(())
    }

    /// Insert or replace a result by question text and persist all results.
    pub fn commit_result(
        &self,
        checkpoint: &mut Checkpoint,
        result: QuestionResult,
    ) -> HarnessResult<()> {
        self.ensure_dir()?;

        let mut results = checkpoint.results.clone();
        results.retain(|r| r.question != result.question);
        match checkpoint
            .results
            .iter()
            .position(|r| r.question == result.question)
        {
            Some(pos) => results.insert(pos.min(results.len()), result),
            None => results.push(result),
        }

        io::write_json_atomic(&self.path(RESULTS_FILE), &results)?;
        checkpoint.results = results;
        Ok(())
    }

    /// Persist the results collection as-is (metadata backfill).
    pub fn commit_results(&self, checkpoint: &Checkpoint) -> HarnessResult<()> {
        self.ensure_dir()?;
        io::write_json_atomic(&self.path(RESULTS_FILE), &checkpoint.results)
    }

    /// Discard all committed steps. Marker first so no reader ever sees a
    /// marker pointing past the payload.
    pub fn reset_steps(&self, checkpoint: &mut Checkpoint) -> HarnessResult<()> {
        self.discard_steps()?;
        checkpoint.current_step = -1;
        checkpoint.steps.clear();
        Ok(())
    }

    /// Like [`reset_steps`](Self::reset_steps) but without a loaded
    /// checkpoint, so it also clears step files that no longer parse.
    pub fn discard_steps(&self) -> HarnessResult<()> {
        warn!(out_dir = %self.out_dir.display(), "discarding committed steps (forced restart)");
        io::remove_if_exists(&self.path(CURRENT_STEP_FILE))?;
        if self.path(STEPS_FILE).exists() {
            io::write_json_atomic(&self.path(STEPS_FILE), &Vec::<StepRecord>::new())?;
        }
        Ok(())
    }

    /// Snapshot of the configuration the run was executed with.
    pub fn save_parameters<T: serde::Serialize>(&self, parameters: &T) -> HarnessResult<()> {
        self.ensure_dir()?;
        io::write_json_atomic(&self.path(PARAMETERS_FILE), parameters)
    }
}
