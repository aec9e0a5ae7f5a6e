//! Processing units: the benchmarked memory agents.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{AgentCommandConfig, HarnessConfig};
use crate::error::{HarnessError, HarnessResult};
use crate::model::StepInput;
use crate::providers::chat::ChatClient;

pub mod command;
pub mod long_context;

pub use command::CommandAgent;
pub use long_context::LongContextAgent;

/// The closed set of agent variants, selected once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentKind {
    /// Everything memorized is replayed as context on each question.
    LongContext,
    /// External agent with its own memory store; reloaded before every question.
    EpisodicMemory,
    /// External agent memorizing screenshots with timestamps.
    ImageMemory,
}

impl AgentKind {
    pub const ALL: [AgentKind; 3] = [
        AgentKind::LongContext,
        AgentKind::EpisodicMemory,
        AgentKind::ImageMemory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LongContext => "long-context",
            Self::EpisodicMemory => "episodic-memory",
            Self::ImageMemory => "image-memory",
        }
    }

    pub fn is_long_context(&self) -> bool {
        matches!(self, Self::LongContext)
    }

    /// Capabilities of the variant before any instance exists.
    pub fn capabilities(&self) -> Capabilities {
        match self {
            Self::LongContext => Capabilities {
                text_input: true,
                image_input: true,
                requires_reload: false,
                stateless_queries: true,
            },
            Self::EpisodicMemory => Capabilities {
                text_input: true,
                image_input: false,
                requires_reload: true,
                stateless_queries: false,
            },
            Self::ImageMemory => Capabilities {
                text_input: true,
                image_input: true,
                requires_reload: true,
                stateless_queries: false,
            },
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentKind {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| {
                HarnessError::config(format!(
                    "unknown agent kind {s:?} (expected one of: long-context, episodic-memory, image-memory)"
                ))
            })
    }
}

/// What a processing unit accepts and how it must be driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub text_input: bool,
    pub image_input: bool,
    /// Reload from the persisted state dir before every question, so query
    /// turns never accumulate in the agent's context.
    pub requires_reload: bool,
    /// Questions do not mutate agent state; safe to answer concurrently.
    pub stateless_queries: bool,
}

impl Capabilities {
    pub fn accepts(&self, input: &StepInput) -> bool {
        match input {
            StepInput::Text { .. } => self.text_input,
            StepInput::Images { .. } => self.image_input,
        }
    }

    pub fn parallel_questions(&self) -> bool {
        self.stateless_queries && !self.requires_reload
    }
}

/// A benchmarked agent.
#[async_trait]
pub trait ProcessingUnit: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    /// Feed a memorization step (`memorizing = true`) or ask a question.
    async fn send(&self, input: &StepInput, memorizing: bool) -> HarnessResult<String>;

    /// Persist the agent's state so it can be reloaded from `dir`.
    async fn save_state(&self, dir: &Path) -> HarnessResult<()>;

    /// Called once after memorization, before the first question.
    async fn prepare_for_questions(&self) -> HarnessResult<()> {
        Ok(())
    }
}

/// Creates processing units, fresh or from persisted state.
#[async_trait]
pub trait AgentFactory: Send + Sync {
    fn kind(&self) -> AgentKind;

    async fn create(&self) -> HarnessResult<Arc<dyn ProcessingUnit>>;

    async fn load(&self, state_dir: &Path) -> HarnessResult<Arc<dyn ProcessingUnit>>;
}

/// Builds the built-in agent variants from configuration.
pub struct AgentBuilder {
    kind: AgentKind,
    chat: Option<Arc<ChatClient>>,
    command: AgentCommandConfig,
    model: String,
    working_dir: Option<PathBuf>,
}

impl AgentBuilder {
    pub fn new(kind: AgentKind, model: impl Into<String>, config: &HarnessConfig) -> HarnessResult<Self> {
        let model = model.into();
        let chat = if kind.is_long_context() {
            Some(Arc::new(ChatClient::new(&config.llm, &model, config.retry.clone())?))
        } else {
            if config.agent.command.is_none() {
                return Err(HarnessError::config(format!(
                    "agent kind {kind} needs agent.command in the config file"
                )));
            }
            None
        };
        Ok(Self {
            kind,
            chat,
            command: config.agent.clone(),
            model,
            working_dir: None,
        })
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    fn chat(&self) -> HarnessResult<Arc<ChatClient>> {
        self.chat
            .clone()
            .ok_or_else(|| HarnessError::config("long-context agent without chat client"))
    }

    async fn spawn_command(&self) -> HarnessResult<CommandAgent> {
        let program = self
            .command
            .command
            .as_deref()
            .ok_or_else(|| HarnessError::config("agent.command is not set"))?;
        CommandAgent::spawn(
            self.kind,
            program,
            &self.command.args,
            &self.model,
            self.working_dir.as_deref(),
        )
        .await
    }
}

#[async_trait]
impl AgentFactory for AgentBuilder {
    fn kind(&self) -> AgentKind {
        self.kind
    }

    async fn create(&self) -> HarnessResult<Arc<dyn ProcessingUnit>> {
        match self.kind {
            AgentKind::LongContext => Ok(Arc::new(LongContextAgent::new(self.chat()?))),
            AgentKind::EpisodicMemory | AgentKind::ImageMemory => {
                Ok(Arc::new(self.spawn_command().await?))
            }
        }
    }

    async fn load(&self, state_dir: &Path) -> HarnessResult<Arc<dyn ProcessingUnit>> {
        match self.kind {
            AgentKind::LongContext => Ok(Arc::new(LongContextAgent::load(self.chat()?, state_dir)?)),
            AgentKind::EpisodicMemory | AgentKind::ImageMemory => {
                let agent = self.spawn_command().await?;
                agent.load_state(state_dir).await?;
                Ok(Arc::new(agent))
            }
        }
    }
}
