//! Long-context baseline: memorization appends to a transcript, every question
//! is answered by an LLM that sees the whole transcript.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use super::{AgentKind, Capabilities, ProcessingUnit};
use crate::error::{HarnessError, HarnessResult};
use crate::model::StepInput;
use crate::providers::chat::ChatClient;

pub const STATE_FILE: &str = "long_context.json";

const SYSTEM_PROMPT: &str = "You are a helpful assistant with a perfect memory. \
The user first shares a sequence of memories (conversation chunks or screenshots), \
then asks questions about them. Answer concisely using only the shared memories.";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Transcript {
    memories: Vec<StepInput>,
}

pub struct LongContextAgent {
    chat: Arc<ChatClient>,
    transcript: Mutex<Transcript>,
}

impl LongContextAgent {
    pub fn new(chat: Arc<ChatClient>) -> Self {
        Self {
            chat,
            transcript: Mutex::new(Transcript::default()),
        }
    }

    /// Restore from a state dir written by `save_state`. A missing state file
    /// yields an empty transcript.
    pub fn load(chat: Arc<ChatClient>, state_dir: &Path) -> HarnessResult<Self> {
        let path = state_dir.join(STATE_FILE);
        let transcript = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|e| HarnessError::corruption(&path, e.to_string()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Transcript::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            chat,
            transcript: Mutex::new(transcript),
        })
    }

    pub async fn memory_count(&self) -> usize {
        self.transcript.lock().await.memories.len()
    }

    fn content_parts(input: &StepInput) -> Vec<Value> {
        match input {
            StepInput::Text { text } => vec![json!({"type": "text", "text": text})],
            StepInput::Images { images } => images
                .iter()
                .flat_map(|img| {
                    let caption = match &img.timestamp {
                        Some(ts) => format!("Screenshot taken at {ts}:"),
                        None => "Screenshot:".to_string(),
                    };
                    [
                        json!({"type": "text", "text": caption}),
                        json!({"type": "image_url", "image_url": {"url": img.uri}}),
                    ]
                })
                .collect(),
        }
    }

    fn build_messages(memories: &[StepInput], question: &StepInput) -> Vec<Value> {
        let mut messages = vec![json!({"role": "system", "content": SYSTEM_PROMPT})];
        let memory_parts: Vec<Value> = memories.iter().flat_map(Self::content_parts).collect();
        if !memory_parts.is_empty() {
            messages.push(json!({"role": "user", "content": memory_parts}));
        }
        messages.push(json!({"role": "user", "content": Self::content_parts(question)}));
        messages
    }
}

#[async_trait]
impl ProcessingUnit for LongContextAgent {
    fn name(&self) -> &str {
        AgentKind::LongContext.as_str()
    }

    fn capabilities(&self) -> Capabilities {
        AgentKind::LongContext.capabilities()
    }

    async fn send(&self, input: &StepInput, memorizing: bool) -> HarnessResult<String> {
        if memorizing {
            let mut transcript = self.transcript.lock().await;
            transcript.memories.push(input.clone());
            return Ok(format!("memorized ({})", input.summary()));
        }

        // Clone so the lock is not held across the network call.
        let memories = self.transcript.lock().await.memories.clone();
        let messages = Self::build_messages(&memories, input);
        self.chat.complete(&messages).await
    }

    async fn save_state(&self, dir: &Path) -> HarnessResult<()> {
        tokio::fs::create_dir_all(dir).await?;
        let transcript = self.transcript.lock().await.clone();
        let content = serde_json::to_vec_pretty(&transcript)?;
        let tmp = dir.join(format!(".{STATE_FILE}.tmp"));
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, dir.join(STATE_FILE)).await?;
        Ok(())
    }
}
