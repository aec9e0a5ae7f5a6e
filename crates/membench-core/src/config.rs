//! Harness configuration: YAML file, then environment overrides.
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `MEMBENCH_RESULTS_DIR` | Root directory for run output (default: `results`) |
//! | `MEMBENCH_MAX_RETRIES` | Attempt budget for rate-limited calls (default: 5) |
//! | `MEMBENCH_QUESTION_WORKERS` | Parallel question workers for stateless agents (default: 1) |
//! | `MEMBENCH_RUN_TIMEOUT_SECS` | Kill a run's child process after this many seconds |
//! | `MEMBENCH_LLM_BASE_URL` | OpenAI-compatible API base URL |

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, HarnessResult};
use crate::retry::RetryPolicy;

/// Config file picked up from the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "membench.yaml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HarnessConfig {
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub questions: QuestionConfig,

    #[serde(default)]
    pub supervisor: SupervisorConfig,

    #[serde(default)]
    pub agent: AgentCommandConfig,
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            results_dir: default_results_dir(),
            llm: LlmConfig::default(),
            retry: RetryPolicy::default(),
            questions: QuestionConfig::default(),
            supervisor: SupervisorConfig::default(),
            agent: AgentCommandConfig::default(),
        }
    }
}

/// OpenAI-compatible chat endpoint used by the long-context agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default)]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_llm_timeout() -> u64 {
    120
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            temperature: 0.0,
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

impl LlmConfig {
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok().filter(|k| !k.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionConfig {
    /// Parallel answer workers; only honored for agents that are stateless across questions.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Wrap each answer call in the retry policy.
    #[serde(default)]
    pub retry_answers: bool,
}

fn default_workers() -> usize {
    1
}

impl Default for QuestionConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            retry_answers: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default = "default_parallel_runs")]
    pub max_parallel_runs: usize,

    #[serde(default)]
    pub run_timeout_secs: Option<u64>,

    /// Also print child output on the console.
    #[serde(default)]
    pub echo_child_output: bool,
}

fn default_parallel_runs() -> usize {
    1
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_parallel_runs: default_parallel_runs(),
            run_timeout_secs: None,
            echo_child_output: false,
        }
    }
}

/// External agent program for episodic and image memory agents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCommandConfig {
    #[serde(default)]
    pub command: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,
}

impl HarnessConfig {
    /// Load from `path`, or from `membench.yaml` when present, or defaults.
    pub fn load(path: Option<&Path>) -> HarnessResult<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.with_env_overrides()
    }

    pub fn from_file(path: &Path) -> HarnessResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            HarnessError::config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_yaml(&raw)
            .map_err(|e| HarnessError::config(format!("{}: {e}", path.display())))
    }

    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
    }

    /// Apply `MEMBENCH_*` environment variables on top of file values.
    pub fn with_env_overrides(mut self) -> HarnessResult<Self> {
        if let Ok(dir) = std::env::var("MEMBENCH_RESULTS_DIR") {
            self.results_dir = PathBuf::from(dir);
        }
        if let Some(n) = env_parse::<u32>("MEMBENCH_MAX_RETRIES")? {
            self.retry.max_retries = n;
        }
        if let Some(n) = env_parse::<usize>("MEMBENCH_QUESTION_WORKERS")? {
            self.questions.workers = n;
        }
        if let Some(n) = env_parse::<u64>("MEMBENCH_RUN_TIMEOUT_SECS")? {
            self.supervisor.run_timeout_secs = Some(n);
        }
        if let Ok(url) = std::env::var("MEMBENCH_LLM_BASE_URL") {
            self.llm.base_url = url;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> HarnessResult<()> {
        if self.retry.max_retries == 0 {
            return Err(HarnessError::config("retry.max_retries must be at least 1"));
        }
        if self.questions.workers == 0 {
            return Err(HarnessError::config("questions.workers must be at least 1"));
        }
        if self.supervisor.max_parallel_runs == 0 {
            return Err(HarnessError::config(
                "supervisor.max_parallel_runs must be at least 1",
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> HarnessResult<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| HarnessError::config(format!("{name}={raw:?}: {e}"))),
        Err(_) => Ok(None),
    }
}
