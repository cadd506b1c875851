use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::llm::GenerativeOracle;
use crate::optimize::prompts::PromptTemplates;
use crate::optimize::{LoopSettings, Optimizer};
use crate::ranker::RankingOracle;
use crate::serp::polling::RetryPolicy;

/// How the optimization loop decides when to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OptimizationMode {
    /// Always run the full iteration budget, collecting every draft.
    Complete,
    /// Stop as soon as a draft beats the benchmark (plus offset).
    EarlyExit,
}

/// Pipeline tunables.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub parallel_tasks: usize,
    pub navigation_timeout_ms: u64,
    pub fallback_timeout_ms: u64,
    pub max_iterations: u32,
    pub mode: OptimizationMode,
    pub benchmark_offset: f64,
    /// Waiting for a SERP task to complete.
    pub readiness_policy: RetryPolicy,
    /// Waiting for the AI overview to show up in a completed task.
    pub feature_policy: RetryPolicy,
    pub output_dir: PathBuf,
    pub chromium_path: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            parallel_tasks: 5,
            navigation_timeout_ms: 60_000,
            fallback_timeout_ms: 10_000,
            max_iterations: 3,
            mode: OptimizationMode::Complete,
            benchmark_offset: 0.0,
            readiness_policy: RetryPolicy::new(59, Duration::from_secs(30)),
            feature_policy: RetryPolicy::new(5, Duration::from_secs(15)),
            output_dir: PathBuf::from("output"),
            chromium_path: dotenv::var("CHROMIUM_PATH").ok().map(PathBuf::from),
        }
    }
}

impl PipelineConfig {
    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            max_iterations: self.max_iterations,
            mode: self.mode,
            benchmark_offset: self.benchmark_offset,
        }
    }
}

/// Optimization collaborators, constructed once in `main`.
pub struct AppState {
    pub config: PipelineConfig,
    pub llm: Arc<dyn GenerativeOracle>,
    pub ranker: Arc<dyn RankingOracle>,
    pub prompts: PromptTemplates,
}

impl AppState {
    pub fn optimizer(&self) -> Optimizer {
        Optimizer::new(
            self.llm.clone(),
            self.ranker.clone(),
            self.prompts.clone(),
            self.config.loop_settings(),
        )
    }
}
