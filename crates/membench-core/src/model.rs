use serde::{Deserialize, Serialize};

/// Response text that marks a question result as an error placeholder.
pub const ERROR_SENTINEL: &str = "ERROR";

/// One image reference in an image-memory step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRef {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// A unit of memorization input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepInput {
    Text { text: String },
    Images { images: Vec<ImageRef> },
}

impl StepInput {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, Self::Images { .. })
    }

    /// Short description for log lines.
    pub fn summary(&self) -> String {
        match self {
            Self::Text { text } => format!("text ({} chars)", text.chars().count()),
            Self::Images { images } => format!("{} images", images.len()),
        }
    }
}

/// A committed memorization step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub input: StepInput,
    pub output: String,
}

/// A question from the workload, with its ground truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionItem {
    pub question: String,
    pub answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// The outcome of asking one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionResult {
    pub question: String,
    pub response: String,
    pub answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    /// Underlying failure for error placeholders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QuestionResult {
    pub fn answered(item: &QuestionItem, response: impl Into<String>) -> Self {
        Self {
            question: item.question.clone(),
            response: response.into(),
            answer: item.answer.clone(),
            metadata: item.metadata.clone(),
            error: None,
        }
    }

    pub fn placeholder(item: &QuestionItem, error: impl Into<String>) -> Self {
        Self {
            question: item.question.clone(),
            response: ERROR_SENTINEL.to_string(),
            answer: item.answer.clone(),
            metadata: item.metadata.clone(),
            error: Some(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.response == ERROR_SENTINEL
    }
}

/// Durable progress of a single run.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    /// Index of the last committed step, -1 when none.
    pub current_step: i64,
    pub steps: Vec<StepRecord>,
    pub results: Vec<QuestionResult>,
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self {
            current_step: -1,
            steps: Vec::new(),
            results: Vec::new(),
        }
    }
}

impl Checkpoint {
    /// Index of the next step to execute.
    pub fn next_step(&self) -> usize {
        let next = self.current_step.saturating_add(1).max(0);
        usize::try_from(next).unwrap_or(usize::MAX)
    }

    /// Non-placeholder result for a question text.
    pub fn answer_for(&self, question: &str) -> Option<&QuestionResult> {
        self.results
            .iter()
            .find(|r| r.question == question && !r.is_error())
    }

    pub fn placeholders(&self) -> usize {
        self.results.iter().filter(|r| r.is_error()).count()
    }
}
