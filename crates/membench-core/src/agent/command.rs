//! External agents driven over a JSON-lines protocol on stdin/stdout.
//!
//! Requests, one per line:
//!
//! ```text
//! {"op":"send","input":{"kind":"text","text":"..."},"memorizing":true}
//! {"op":"save_state","dir":"/abs/path"}
//! {"op":"load_state","dir":"/abs/path"}
//! {"op":"prepare"}
//! ```
//!
//! Responses, one per request: `{"ok":true,"output":"..."}` or
//! `{"ok":false,"error":{"kind":"rate_limited","message":"...","retry_after_secs":5}}`.
//! Lines that are not JSON objects are treated as agent chatter and skipped.
//! The agent's stderr is inherited.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{AgentKind, Capabilities, ProcessingUnit};
use crate::error::{HarnessError, HarnessResult};
use crate::model::StepInput;

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request<'a> {
    Send {
        input: &'a StepInput,
        memorizing: bool,
    },
    SaveState {
        dir: &'a Path,
    },
    LoadState {
        dir: &'a Path,
    },
    Prepare,
}

#[derive(Debug, Deserialize)]
struct Response {
    ok: bool,
    #[serde(default)]
    output: Option<String>,
    #[serde(default)]
    error: Option<ResponseError>,
}

#[derive(Debug, Deserialize)]
struct ResponseError {
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    message: String,
    #[serde(default)]
    retry_after_secs: Option<u64>,
}

impl From<ResponseError> for HarnessError {
    fn from(err: ResponseError) -> Self {
        match err.kind.as_deref() {
            Some("rate_limited") => HarnessError::RateLimited {
                message: err.message,
                retry_after: err.retry_after_secs.map(Duration::from_secs),
            },
            Some("unsupported_input") => HarnessError::UnsupportedInput {
                agent: "external".into(),
                detail: err.message,
            },
            _ => HarnessError::Service {
                message: err.message,
                status: None,
            },
        }
    }
}

struct Pipe {
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

pub struct CommandAgent {
    kind: AgentKind,
    pipe: Mutex<Pipe>,
    // Held so the process is killed when the agent is dropped.
    _child: Child,
}

impl CommandAgent {
    pub async fn spawn(
        kind: AgentKind,
        program: &str,
        args: &[String],
        model: &str,
        working_dir: Option<&Path>,
    ) -> HarnessResult<Self> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .env("MEMBENCH_AGENT_KIND", kind.as_str())
            .env("MEMBENCH_MODEL", model)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| HarnessError::agent(format!("failed to spawn {program}: {e}")))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| HarnessError::agent("agent stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HarnessError::agent("agent stdout unavailable"))?;
        info!(kind = %kind, program, pid = child.id(), "external agent started");

        Ok(Self {
            kind,
            pipe: Mutex::new(Pipe {
                stdin,
                stdout: BufReader::new(stdout).lines(),
            }),
            _child: child,
        })
    }

    async fn call(&self, request: &Request<'_>) -> HarnessResult<String> {
        let mut line = serde_json::to_string(request)?;
        line.push('\n');

        let mut pipe = self.pipe.lock().await;
        pipe.stdin.write_all(line.as_bytes()).await?;
        pipe.stdin.flush().await?;

        loop {
            let Some(raw) = pipe.stdout.next_line().await? else {
                return Err(HarnessError::agent(format!(
                    "{} agent exited before answering",
                    self.kind
                )));
            };
            let trimmed = raw.trim();
            if !trimmed.starts_with('{') {
                debug!(kind = %self.kind, line = trimmed, "agent output");
                continue;
            }
            let response: Response = serde_json::from_str(trimmed)
                .map_err(|e| HarnessError::agent(format!("bad agent response {trimmed:?}: {e}")))?;
            if response.ok {
                return Ok(response.output.unwrap_or_default());
            }
            return Err(response
                .error
                .map(HarnessError::from)
                .unwrap_or_else(|| HarnessError::agent("agent reported failure without detail")));
        }
    }

    pub async fn load_state(&self, dir: &Path) -> HarnessResult<()> {
        let dir = std::path::absolute(dir)?;
        self.call(&Request::LoadState { dir: &dir }).await.map(|_| ())
    }
}

#[async_trait]
impl ProcessingUnit for CommandAgent {
    fn name(&self) -> &str {
        self.kind.as_str()
    }

    fn capabilities(&self) -> Capabilities {
        self.kind.capabilities()
    }

    async fn send(&self, input: &StepInput, memorizing: bool) -> HarnessResult<String> {
        self.call(&Request::Send { input, memorizing }).await
    }

    async fn save_state(&self, dir: &Path) -> HarnessResult<()> {
        tokio::fs::create_dir_all(dir).await?;
        let dir = std::path::absolute(dir)?;
        self.call(&Request::SaveState { dir: &dir }).await.map(|_| ())
    }

    async fn prepare_for_questions(&self) -> HarnessResult<()> {
        self.call(&Request::Prepare).await.map(|_| ())
    }
}
