//! Resumable execution engine for memory-agent evaluation runs.
//!
//! A sweep is a set of runs. Each run feeds an ordered sequence of
//! memorization steps to a processing unit (the agent under test), then asks
//! it a set of questions. Progress is checkpointed after every step and every
//! answer so a killed or crashed run resumes where it stopped:
//!
//! - [`checkpoint`]: durable per-run progress (`current_step.txt`, `steps.json`, `results.json`)
//! - [`engine`]: step runner, question runner and the per-run orchestration
//! - [`retry`]: bounded exponential backoff for rate-limited services
//! - [`supervisor`]: one child process per run, with per-run log files
//! - [`agent`]: the processing-unit seam and the built-in agent variants
//!
//! # Configuration
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `MEMBENCH_RESULTS_DIR` | Root of all run output directories (default: `results`) |
//! | `MEMBENCH_MAX_RETRIES` | Attempt budget for transient failures (default: 5) |
//! | `MEMBENCH_QUESTION_WORKERS` | Concurrent questions for stateless agents (default: 1) |
//! | `MEMBENCH_RUN_TIMEOUT_SECS` | Kill a run's child process after this long |
//! | `MEMBENCH_LLM_BASE_URL` | OpenAI-compatible API base URL |
//! | `OPENAI_API_KEY` | API key (name configurable via `llm.api_key_env`) |

pub mod agent;
pub mod checkpoint;
pub mod config;
pub mod engine;
pub mod error;
pub mod layout;
pub mod model;
pub mod providers;
pub mod retry;
pub mod supervisor;
pub mod workload;

pub use agent::{AgentBuilder, AgentFactory, AgentKind, Capabilities, ProcessingUnit};
pub use checkpoint::CheckpointStore;
pub use config::HarnessConfig;
pub use engine::{RunInstance, RunOptions, RunStatus, RunSummary};
pub use error::{HarnessError, HarnessResult};
pub use layout::RunLayout;
pub use model::{Checkpoint, QuestionItem, QuestionResult, StepInput, StepRecord};
pub use retry::RetryPolicy;
pub use supervisor::{BatchReport, RunOutcome, RunTarget, SelfExec, Supervisor};
pub use workload::{JsonWorkload, RunMeta, WorkloadSource};
