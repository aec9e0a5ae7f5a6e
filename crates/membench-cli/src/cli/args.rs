use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use membench_core::AgentKind;

#[derive(Parser)]
#[command(
    name = "membench",
    version,
    about = "Resumable evaluation harness for memory agents"
)]
pub struct Cli {
    /// Log line format on stderr
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    pub fn as_arg(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Json => "json",
        }
    }
}

#[derive(Subcommand)]
pub enum Command {
    /// Execute every run of a workload (or one), each in its own child process
    Sweep(SweepArgs),
    /// Child entry point: execute one run in this process
    #[command(hide = true)]
    RunInstance(RunInstanceArgs),
    /// Show checkpoint progress of every run
    Status(StatusArgs),
    Version,
}

/// Which sweep the command addresses.
#[derive(Args, Debug, Clone)]
pub struct SelectorArgs {
    /// Workload file (JSON, or YAML with a .yaml/.yml extension)
    #[arg(long)]
    pub workload: PathBuf,

    /// long-context | episodic-memory | image-memory
    #[arg(long)]
    pub agent: AgentKind,

    /// Model name, used in the output directory name
    #[arg(long, env = "MEMBENCH_MODEL")]
    pub model: String,

    /// Config file (default: ./membench.yaml when present)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Only consider the first N runs of the workload
    #[arg(long)]
    pub num_runs: Option<usize>,
}

impl SelectorArgs {
    /// The same selection as command-line arguments, for child processes.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "--workload".to_string(),
            self.workload.display().to_string(),
            "--agent".to_string(),
            self.agent.to_string(),
            "--model".to_string(),
            self.model.clone(),
        ];
        if let Some(config) = &self.config {
            args.push("--config".into());
            args.push(config.display().to_string());
        }
        if let Some(n) = self.num_runs {
            args.push("--num-runs".into());
            args.push(n.to_string());
        }
        args
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct PhaseArgs {
    /// Discard committed steps and agent state, then memorize from the first step
    #[arg(long, conflicts_with = "questions_only")]
    pub force_restart: bool,

    /// Skip memorization and only answer questions
    #[arg(long)]
    pub questions_only: bool,
}

impl PhaseArgs {
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.force_restart {
            args.push("--force-restart".to_string());
        }
        if self.questions_only {
            args.push("--questions-only".to_string());
        }
        args
    }
}

#[derive(Args, Debug, Clone)]
pub struct SweepArgs {
    #[command(flatten)]
    pub selector: SelectorArgs,

    /// Only execute this run
    #[arg(long)]
    pub global_idx: Option<usize>,

    #[command(flatten)]
    pub phases: PhaseArgs,
}

#[derive(Args, Debug, Clone)]
pub struct RunInstanceArgs {
    #[command(flatten)]
    pub selector: SelectorArgs,

    #[arg(long)]
    pub global_idx: usize,

    #[command(flatten)]
    pub phases: PhaseArgs,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[command(flatten)]
    pub selector: SelectorArgs,

    /// Print one JSON object per run instead of a table
    #[arg(long)]
    pub json: bool,
}
