//! Per-run execution: memorization steps, then questions.

pub mod instance;
pub mod question_runner;
pub mod step_runner;

pub use instance::{RunInstance, RunOptions, RunStatus, RunSummary};
pub use question_runner::{QuestionReport, QuestionRunner};
pub use step_runner::{StepReport, StepRunner};
