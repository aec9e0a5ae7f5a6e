//! Process supervisor: every run executes in its own child process.
//!
//! A crashing, hanging or leaking run cannot take the batch down with it. The
//! child's stdout and stderr are streamed line by line into
//! `<out_dir>/logs/child_<ts>.log`; the supervisor's own notes about the run
//! go to the console and `<out_dir>/logs/parent_<ts>.log`.

use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::SupervisorConfig;

pub mod logs;

pub use logs::{RunLogs, Tee};

/// Builds the child command for one run.
pub trait ChildCommand: Send + Sync {
    fn command(&self, global_idx: usize) -> Command;
}

/// Re-executes the harness binary as `membench run-instance --global-idx N <args>`.
#[derive(Debug, Clone)]
pub struct SelfExec {
    program: PathBuf,
    args: Vec<String>,
}

impl SelfExec {
    /// `args` are appended to every child command line (workload, agent, model, ...).
    pub fn new(args: Vec<String>) -> Self {
        Self {
            program: find_binary(),
            args,
        }
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }
}

impl ChildCommand for SelfExec {
    fn command(&self, global_idx: usize) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("run-instance")
            .arg("--global-idx")
            .arg(global_idx.to_string())
            .args(&self.args);
        cmd
    }
}

/// Find the membench binary. Prefers MEMBENCH_BIN, then the running
/// executable, then its sibling, then PATH.
pub fn find_binary() -> PathBuf {
    if let Ok(bin) = std::env::var("MEMBENCH_BIN") {
        let path = PathBuf::from(bin);
        if path.exists() {
            return path;
        }
    }

    if let Ok(exe) = std::env::current_exe() {
        if exe.file_stem().is_some_and(|s| s == "membench") {
            return exe;
        }
        if let Some(dir) = exe.parent() {
            let sibling = dir.join(format!("membench{}", std::env::consts::EXE_SUFFIX));
            if sibling.exists() {
                return sibling;
            }
        }
    }

    PathBuf::from("membench")
}

/// A run the supervisor should execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunTarget {
    pub global_idx: usize,
    pub out_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded,
    /// Non-zero exit. `None` when the child died from a signal.
    Failed { exit_code: Option<i32> },
    TimedOut,
    SpawnFailed { reason: String },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

#[derive(Debug, Clone)]
pub struct RunRecord {
    pub global_idx: usize,
    pub outcome: RunOutcome,
    pub elapsed: Duration,
    /// Absent when the log directory could not be created.
    pub logs: Option<RunLogs>,
}

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// In the order the runs were submitted.
    pub runs: Vec<RunRecord>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.runs.iter().filter(|r| r.outcome.is_success()).count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &RunRecord> {
        self.runs.iter().filter(|r| !r.outcome.is_success())
    }

    pub fn all_succeeded(&self) -> bool {
        self.runs.iter().all(|r| r.outcome.is_success())
    }
}

#[derive(Clone)]
pub struct Supervisor {
    launcher: Arc<dyn ChildCommand>,
    max_parallel_runs: usize,
    timeout: Option<Duration>,
    echo_child_output: bool,
}

impl Supervisor {
    pub fn new(config: &SupervisorConfig, launcher: Arc<dyn ChildCommand>) -> Self {
        Self {
            launcher,
            max_parallel_runs: config.max_parallel_runs.max(1),
            timeout: config.run_timeout_secs.map(Duration::from_secs),
            echo_child_output: config.echo_child_output,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Execute every target. Failed runs are recorded and the batch goes on.
    pub async fn run_batch(&self, targets: Vec<RunTarget>) -> BatchReport {
        let total = targets.len();
        info!(runs = total, parallel = self.max_parallel_runs, "starting batch");

        let mut runs = Vec::with_capacity(total);
        if self.max_parallel_runs <= 1 {
            for target in &targets {
                runs.push(self.run_one(target).await);
            }
        } else {
            let semaphore = Arc::new(Semaphore::new(self.max_parallel_runs));
            let mut join_set = JoinSet::new();
            for (position, target) in targets.into_iter().enumerate() {
                let semaphore = semaphore.clone();
                let supervisor = self.clone();
                join_set.spawn(async move {
                    let record = match semaphore.acquire_owned().await {
                        Ok(_permit) => supervisor.run_one(&target).await,
                        Err(e) => RunRecord {
                            global_idx: target.global_idx,
                            outcome: RunOutcome::SpawnFailed {
                                reason: format!("run pool closed: {e}"),
                            },
                            elapsed: Duration::ZERO,
                            logs: None,
                        },
                    };
                    (position, record)
                });
            }

            let mut indexed = Vec::with_capacity(total);
            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok(entry) => indexed.push(entry),
                    Err(e) => error!(error = %e, "supervisor task panicked"),
                }
            }
            indexed.sort_by_key(|(position, _)| *position);
            runs.extend(indexed.into_iter().map(|(_, record)| record));
        }

        let report = BatchReport { runs };
        info!(
            runs = total,
            succeeded = report.succeeded(),
            failed = total - report.succeeded(),
            "batch finished"
        );
        report
    }

    /// Execute one run in a child process and wait for it.
    pub async fn run_one(&self, target: &RunTarget) -> RunRecord {
        let started = Instant::now();
        let idx = target.global_idx;

        let prepared = RunLogs::prepare(&target.out_dir)
            .and_then(|logs| logs.open_parent().map(|parent| (logs, parent)));
        let (logs, mut parent) = match prepared {
            Ok(pair) => pair,
            Err(e) => {
                error!(global_idx = idx, error = %e, "cannot prepare run logs");
                return RunRecord {
                    global_idx: idx,
                    outcome: RunOutcome::SpawnFailed {
                        reason: format!("cannot prepare logs: {e}"),
                    },
                    elapsed: started.elapsed(),
                    logs: None,
                };
            }
        };

        note(&mut parent, &format!("Running subprocess for global_idx {idx}"));
        note(&mut parent, &format!("Parent log: {}", logs.parent.display()));
        note(&mut parent, &format!("Child log: {}", logs.child.display()));
        note(&mut parent, "=====");

        let outcome = self.supervise(idx, &logs).await;
        let elapsed = started.elapsed();

        note(&mut parent, "=====");
        match &outcome {
            RunOutcome::Succeeded => note(
                &mut parent,
                &format!("Subprocess completed for global_idx {idx} with return code 0"),
            ),
            RunOutcome::Failed { exit_code } => {
                let code = exit_code.map_or_else(|| "none (signal)".to_string(), |c| c.to_string());
                note(
                    &mut parent,
                    &format!("Subprocess failed for global_idx {idx} with return code {code}"),
                );
                error!(global_idx = idx, exit_code = ?exit_code, "run failed");
            }
            RunOutcome::TimedOut => {
                note(
                    &mut parent,
                    &format!("Subprocess for global_idx {idx} timed out after {elapsed:?} and was killed"),
                );
                error!(global_idx = idx, ?elapsed, "run timed out");
            }
            RunOutcome::SpawnFailed { reason } => {
                note(
                    &mut parent,
                    &format!("Subprocess for global_idx {idx} could not be started: {reason}"),
                );
                error!(global_idx = idx, reason = %reason, "run could not be started");
            }
        }

        RunRecord {
            global_idx: idx,
            outcome,
            elapsed,
            logs: Some(logs),
        }
    }

    async fn supervise(&self, idx: usize, logs: &RunLogs) -> RunOutcome {
        let log_file = match tokio::fs::File::create(&logs.child).await {
            Ok(file) => file,
            Err(e) => {
                return RunOutcome::SpawnFailed {
                    reason: format!("cannot create {}: {e}", logs.child.display()),
                }
            }
        };

        let mut cmd = self.launcher.command(idx);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return RunOutcome::SpawnFailed {
                    reason: e.to_string(),
                }
            }
        };
        debug!(global_idx = idx, pid = child.id(), "child started");

        let (tx, rx) = mpsc::unbounded_channel();
        let mut pumps = JoinSet::new();
        if let Some(stdout) = child.stdout.take() {
            pumps.spawn(pump(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.spawn(pump(stderr, tx.clone()));
        }
        drop(tx);
        let writer = tokio::spawn(write_child_log(rx, log_file, self.echo_child_output));

        let waited = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait()).await.ok(),
            None => Some(child.wait().await),
        };

        let outcome = match waited {
            Some(Ok(status)) if status.success() => RunOutcome::Succeeded,
            Some(Ok(status)) => RunOutcome::Failed {
                exit_code: status.code(),
            },
            Some(Err(e)) => RunOutcome::SpawnFailed {
                reason: format!("wait failed: {e}"),
            },
            None => {
                if let Err(e) = child.kill().await {
                    warn!(global_idx = idx, error = %e, "failed to kill timed-out child");
                }
                // Grandchildren may still hold the pipes open.
                pumps.abort_all();
                RunOutcome::TimedOut
            }
        };

        while pumps.join_next().await.is_some() {}
        match writer.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(global_idx = idx, error = %e, "child log write failed"),
            Err(e) => warn!(global_idx = idx, error = %e, "child log writer panicked"),
        }
        outcome
    }
}

fn note<A: io::Write, B: io::Write>(parent: &mut Tee<A, B>, message: &str) {
    if let Err(e) = parent.line(message) {
        warn!(error = %e, "cannot write parent log");
    }
}

async fn pump<R: AsyncRead + Unpin>(reader: R, tx: mpsc::UnboundedSender<String>) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if tx.send(line).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "child output stream closed");
                break;
            }
        }
    }
}

async fn write_child_log(
    mut rx: mpsc::UnboundedReceiver<String>,
    mut file: tokio::fs::File,
    echo: bool,
) -> io::Result<()> {
    while let Some(line) = rx.recv().await {
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        if echo {
            eprintln!("{line}");
        }
    }
    file.sync_all().await
}
