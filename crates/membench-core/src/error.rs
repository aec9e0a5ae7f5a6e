//! Error types for the execution engine.

use std::path::PathBuf;
use std::time::Duration;

/// Harness errors.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// External service asked us to slow down (HTTP 429 or equivalent).
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    /// Any other external-call failure. Never retried.
    #[error("service error{}: {message}", .status.map(|s| format!(" (status {s})")).unwrap_or_default())]
    Service {
        message: String,
        status: Option<u16>,
    },

    /// Transient failures persisted past the retry budget.
    #[error("retries exhausted after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<HarnessError>,
    },

    /// Malformed on-disk state. Only a forced restart recovers.
    #[error("checkpoint corrupted at {}: {detail}", .path.display())]
    CheckpointCorruption { path: PathBuf, detail: String },

    /// A step commit arrived with a non-consecutive index.
    #[error("out-of-order step commit: expected step {expected}, got {got}")]
    OutOfOrderCommit { expected: i64, got: i64 },

    /// A memorization step failed; the run is aborted.
    #[error("run {global_idx}: step {step_index} failed: {source}")]
    Step {
        global_idx: usize,
        step_index: usize,
        #[source]
        source: Box<HarnessError>,
    },

    /// A run's child process did not complete successfully.
    #[error("run {global_idx} failed: {detail}")]
    RunFailure { global_idx: usize, detail: String },

    /// The agent cannot accept this kind of input.
    #[error("agent {agent} does not accept this input: {detail}")]
    UnsupportedInput { agent: String, detail: String },

    /// Run selector does not address a run in the workload.
    #[error("global_idx {idx} is out of range (workload has {len} runs)")]
    SelectorOutOfRange { idx: usize, len: usize },

    /// Invalid configuration.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Workload file could not be read or parsed.
    #[error("workload error: {message}")]
    Workload { message: String },

    /// Processing unit misbehaved (protocol error, crashed, ...).
    #[error("agent error: {message}")]
    Agent { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl HarnessError {
    /// Whether a retry policy should try again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Server-provided hint for the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Exit code for the CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::SelectorOutOfRange { .. } | Self::Config { .. } | Self::Workload { .. } => 2,
            Self::CheckpointCorruption { .. } | Self::OutOfOrderCommit { .. } => 2,
            _ => 1,
        }
    }

    pub fn agent(message: impl Into<String>) -> Self {
        Self::Agent {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn corruption(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        Self::CheckpointCorruption {
            path: path.into(),
            detail: detail.into(),
        }
    }
}

impl From<reqwest::Error> for HarnessError {
    fn from(err: reqwest::Error) -> Self {
        Self::Service {
            message: err.to_string(),
            status: err.status().map(|s| s.as_u16()),
        }
    }
}

/// Result type for harness operations.
pub type HarnessResult<T> = Result<T, HarnessError>;
