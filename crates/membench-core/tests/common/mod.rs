#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use membench_core::{
    AgentFactory, AgentKind, Capabilities, HarnessError, HarnessResult, JsonWorkload,
    ProcessingUnit, StepInput,
};

pub const WORKLOAD: &str = r#"{
    "dataset": "toy",
    "runs": [{
        "subset": "conv-1",
        "chunk_size": 512,
        "steps": ["s0", "s1", "s2"],
        "questions": [
            {"question": "q1", "answer": "a1", "metadata": {"category": 1}},
            {"question": "q2", "answer": "a2"}
        ]
    }]
}"#;

pub fn workload() -> JsonWorkload {
    JsonWorkload::from_json_str(WORKLOAD).unwrap()
}

/// What every agent instance did, shared across reloads and "restarts".
#[derive(Default)]
pub struct Journal {
    pub memorized: Vec<String>,
    pub queries: Vec<String>,
    /// `current_step.txt` contents seen at each `save_state`.
    pub markers: Vec<Option<String>>,
    /// `"create"` or `"load"`, one per agent the factory handed out.
    pub constructed: Vec<&'static str>,
}

#[derive(Default)]
pub struct Script {
    /// Memorizing this text fails, simulating a crash mid-run.
    pub crash_on: Option<String>,
    /// Queued errors per question text, one popped per attempt.
    pub failures: HashMap<String, VecDeque<HarnessError>>,
}

/// File inside the agent state dir holding everything memorized so far.
pub const MEMORIES_FILE: &str = "memories.json";

pub fn saved_memories(state_dir: &Path) -> Vec<String> {
    let raw = std::fs::read_to_string(state_dir.join(MEMORIES_FILE)).unwrap();
    serde_json::from_str(&raw).unwrap()
}

pub struct FakeAgent {
    out_dir: PathBuf,
    memories: Mutex<Vec<String>>,
    journal: Arc<Mutex<Journal>>,
    script: Arc<Mutex<Script>>,
}

fn text(input: &StepInput) -> String {
    match input {
        StepInput::Text { text } => text.clone(),
        StepInput::Images { images } => format!("{} images", images.len()),
    }
}

#[async_trait]
impl ProcessingUnit for FakeAgent {
    fn name(&self) -> &str {
        "fake"
    }

    fn capabilities(&self) -> Capabilities {
        AgentKind::EpisodicMemory.capabilities()
    }

    async fn send(&self, input: &StepInput, memorizing: bool) -> HarnessResult<String> {
        let text = text(input);
        if memorizing {
            if self.script.lock().unwrap().crash_on.as_deref() == Some(text.as_str()) {
                return Err(HarnessError::agent(format!("crashed on {text}")));
            }
            self.memories.lock().unwrap().push(text.clone());
            self.journal.lock().unwrap().memorized.push(text);
            return Ok("stored".into());
        }

        self.journal.lock().unwrap().queries.push(text.clone());
        let queued = self
            .script
            .lock()
            .unwrap()
            .failures
            .get_mut(&text)
            .and_then(VecDeque::pop_front);
        match queued {
            Some(err) => Err(err),
            None => Ok(format!("reply to {text}")),
        }
    }

    async fn save_state(&self, dir: &Path) -> HarnessResult<()> {
        std::fs::create_dir_all(dir)?;
        let memories = serde_json::to_string(&*self.memories.lock().unwrap())?;
        std::fs::write(dir.join(MEMORIES_FILE), memories)?;
        let marker = std::fs::read_to_string(self.out_dir.join("current_step.txt")).ok();
        self.journal.lock().unwrap().markers.push(marker);
        Ok(())
    }
}

pub struct FakeFactory {
    pub out_dir: PathBuf,
    pub journal: Arc<Mutex<Journal>>,
    pub script: Arc<Mutex<Script>>,
}

impl FakeFactory {
    pub fn new(out_dir: &Path) -> Arc<Self> {
        Arc::new(Self {
            out_dir: out_dir.to_path_buf(),
            journal: Arc::default(),
            script: Arc::default(),
        })
    }

    fn agent(&self, memories: Vec<String>) -> Arc<dyn ProcessingUnit> {
        Arc::new(FakeAgent {
            out_dir: self.out_dir.clone(),
            memories: Mutex::new(memories),
            journal: self.journal.clone(),
            script: self.script.clone(),
        })
    }

    pub fn memorized(&self) -> Vec<String> {
        self.journal.lock().unwrap().memorized.clone()
    }

    pub fn queries(&self) -> Vec<String> {
        self.journal.lock().unwrap().queries.clone()
    }

    pub fn constructed(&self) -> Vec<&'static str> {
        self.journal.lock().unwrap().constructed.clone()
    }
}

#[async_trait]
impl AgentFactory for FakeFactory {
    fn kind(&self) -> AgentKind {
        AgentKind::EpisodicMemory
    }

    async fn create(&self) -> HarnessResult<Arc<dyn ProcessingUnit>> {
        self.journal.lock().unwrap().constructed.push("create");
        Ok(self.agent(Vec::new()))
    }

    /// Restores the memories written by the last `save_state`.
    async fn load(&self, state_dir: &Path) -> HarnessResult<Arc<dyn ProcessingUnit>> {
        self.journal.lock().unwrap().constructed.push("load");
        let raw = std::fs::read_to_string(state_dir.join(MEMORIES_FILE))?;
        Ok(self.agent(serde_json::from_str(&raw)?))
    }
}

pub fn rate_limited() -> HarnessError {
    HarnessError::RateLimited {
        message: "slow down".into(),
        retry_after: None,
    }
}
