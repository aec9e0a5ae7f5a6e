use std::path::PathBuf;

use anyhow::Context as _;
use membench_core::{HarnessConfig, JsonWorkload, RunLayout, WorkloadSource};

use crate::cli::args::SelectorArgs;

/// Config, workload and directory layout resolved from the selector flags.
pub struct SweepContext {
    pub config: HarnessConfig,
    pub workload: JsonWorkload,
    pub layout: RunLayout,
}

impl SweepContext {
    pub fn load(selector: &SelectorArgs) -> anyhow::Result<Self> {
        let config = HarnessConfig::load(selector.config.as_deref())
            .context("failed to load configuration")?;
        let mut workload = JsonWorkload::from_path(&selector.workload)
            .with_context(|| format!("failed to load workload {}", selector.workload.display()))?;
        if let Some(n) = selector.num_runs {
            workload = workload.limit(n);
        }
        let layout = RunLayout::new(
            &config.results_dir,
            selector.agent,
            workload.dataset(),
            &selector.model,
        );
        Ok(Self {
            config,
            workload,
            layout,
        })
    }

    pub fn out_dir(&self, global_idx: usize) -> anyhow::Result<PathBuf> {
        self.workload.check_index(global_idx)?;
        let meta = self.workload.run_meta(global_idx)?;
        Ok(self.layout.out_dir(global_idx, &meta))
    }
}
