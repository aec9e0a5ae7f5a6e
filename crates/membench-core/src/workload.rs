//! Workload sources: the ordered steps and questions of each run.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, HarnessResult};
use crate::model::{QuestionItem, StepInput};

/// Per-run dataset metadata that feeds into the output directory name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMeta {
    #[serde(default)]
    pub subset: Option<String>,
    #[serde(default)]
    pub chunk_size: Option<usize>,
}

/// Where runs come from. Implementations must be restartable: the same index
/// always yields the same steps and questions.
pub trait WorkloadSource: Send + Sync {
    fn dataset(&self) -> &str;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn run_meta(&self, global_idx: usize) -> HarnessResult<RunMeta>;

    fn steps(&self, global_idx: usize) -> HarnessResult<Vec<StepInput>>;

    fn questions(&self, global_idx: usize) -> HarnessResult<Vec<QuestionItem>>;

    fn check_index(&self, global_idx: usize) -> HarnessResult<()> {
        if global_idx >= self.len() {
            return Err(HarnessError::SelectorOutOfRange {
                idx: global_idx,
                len: self.len(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum StepSpec {
    Plain(String),
    Input(StepInput),
}

impl From<StepSpec> for StepInput {
    fn from(spec: StepSpec) -> Self {
        match spec {
            StepSpec::Plain(text) => StepInput::Text { text },
            StepSpec::Input(input) => input,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RunSpec {
    #[serde(flatten)]
    meta: RunMeta,
    #[serde(default)]
    steps: Vec<StepSpec>,
    #[serde(default)]
    questions: Vec<QuestionItem>,
}

#[derive(Debug, Clone, Deserialize)]
struct WorkloadFile {
    dataset: String,
    runs: Vec<RunSpec>,
}

/// Workload read eagerly from a JSON or YAML file.
///
/// ```yaml
/// dataset: LOCOMO
/// runs:
///   - subset: conv-26
///     steps:
///       - "plain text chunk"
///       - kind: images
///         images: [{uri: "shot-001.png", timestamp: "2024-05-01 10:00"}]
///     questions:
///       - {question: "Where did they meet?", answer: "Paris"}
/// ```
#[derive(Debug, Clone)]
pub struct JsonWorkload {
    dataset: String,
    runs: Vec<RunSpec>,
}

impl JsonWorkload {
    pub fn from_path(path: &Path) -> HarnessResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| HarnessError::Workload {
            message: format!("failed to read {}: {e}", path.display()),
        })?;
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        let parsed = if is_yaml {
            Self::from_yaml_str(&raw)
        } else {
            Self::from_json_str(&raw)
        };
        parsed.map_err(|e| HarnessError::Workload {
            message: format!("{}: {e}", path.display()),
        })
    }

    pub fn from_json_str(raw: &str) -> HarnessResult<Self> {
        let file: WorkloadFile = serde_json::from_str(raw).map_err(|e| HarnessError::Workload {
            message: e.to_string(),
        })?;
        Ok(file.into())
    }

    pub fn from_yaml_str(raw: &str) -> HarnessResult<Self> {
        let file: WorkloadFile = serde_yaml::from_str(raw).map_err(|e| HarnessError::Workload {
            message: e.to_string(),
        })?;
        Ok(file.into())
    }

    /// Keep only the first `n` runs.
    pub fn limit(mut self, n: usize) -> Self {
        self.runs.truncate(n);
        self
    }

    fn run(&self, global_idx: usize) -> HarnessResult<&RunSpec> {
        self.check_index(global_idx)?;
        Ok(&self.runs[global_idx])
    }
}

impl From<WorkloadFile> for JsonWorkload {
    fn from(file: WorkloadFile) -> Self {
        Self {
            dataset: file.dataset,
            runs: file.runs,
        }
    }
}

impl WorkloadSource for JsonWorkload {
    fn dataset(&self) -> &str {
        &self.dataset
    }

    fn len(&self) -> usize {
        self.runs.len()
    }

    fn run_meta(&self, global_idx: usize) -> HarnessResult<RunMeta> {
        Ok(self.run(global_idx)?.meta.clone())
    }

    fn steps(&self, global_idx: usize) -> HarnessResult<Vec<StepInput>> {
        Ok(self
            .run(global_idx)?
            .steps
            .iter()
            .cloned()
            .map(StepInput::from)
            .collect())
    }

    fn questions(&self, global_idx: usize) -> HarnessResult<Vec<QuestionItem>> {
        Ok(self.run(global_idx)?.questions.clone())
    }
}
