//! Output directory naming. One directory per (agent, dataset, model, run).

use std::path::{Path, PathBuf};

use crate::agent::AgentKind;
use crate::workload::RunMeta;

/// Identifies the sweep a run belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLayout {
    pub results_dir: PathBuf,
    pub agent: AgentKind,
    pub dataset: String,
    pub model: String,
}

impl RunLayout {
    pub fn new(
        results_dir: impl Into<PathBuf>,
        agent: AgentKind,
        dataset: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            results_dir: results_dir.into(),
            agent,
            dataset: dataset.into(),
            model: model.into(),
        }
    }

    /// `<agent>_<dataset>-<model>` for long-context agents, `...-model<model>` otherwise.
    pub fn sweep_folder(&self) -> String {
        if self.agent.is_long_context() {
            format!("{}_{}-{}", self.agent, self.dataset, self.model)
        } else {
            format!("{}_{}-model{}", self.agent, self.dataset, self.model)
        }
    }

    pub fn sweep_dir(&self) -> PathBuf {
        self.results_dir.join(sanitize(&self.sweep_folder()))
    }

    /// `<idx>_subset<subset>_cksize<chunk_size>`, `None` for absent fields.
    pub fn run_folder(global_idx: usize, meta: &RunMeta) -> String {
        let subset = meta.subset.as_deref().unwrap_or("None");
        let chunk = meta
            .chunk_size
            .map(|c| c.to_string())
            .unwrap_or_else(|| "None".to_string());
        format!("{global_idx}_subset{subset}_cksize{chunk}")
    }

    pub fn out_dir(&self, global_idx: usize, meta: &RunMeta) -> PathBuf {
        self.sweep_dir()
            .join(sanitize(&Self::run_folder(global_idx, meta)))
    }

    pub fn logs_dir(out_dir: &Path) -> PathBuf {
        out_dir.join("logs")
    }

    pub fn agent_state_dir(out_dir: &Path) -> PathBuf {
        out_dir.join("agent_state")
    }
}

// Model names like `org/model:tag` must not create nested directories.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c => c,
        })
        .collect()
}
