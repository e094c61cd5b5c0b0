use serde::{Deserialize, Serialize};
use std::path::Path;
use weavecore::EngineError;

/// Configuration for the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Ceiling on simultaneously active runs across all workflows
    pub max_concurrent_runs: usize,
    pub event_buffer_size: usize,
    /// Number of recent run durations kept for percentiles
    pub stats_window: usize,
    /// Smoothing factor of the average latency, in (0, 1]
    pub ewma_alpha: f64,
    /// Iteration cap applied to loop steps that do not set their own;
    /// `None` leaves loops bounded only by their condition
    pub max_loop_iterations: Option<usize>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_runs: 100,
            event_buffer_size: 1000,
            stats_window: 1000,
            ewma_alpha: 0.2,
            max_loop_iterations: Some(10_000),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn with_max_concurrent_runs(mut self, max: usize) -> Self {
        self.max_concurrent_runs = max;
        self
    }

    pub fn with_event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = size;
        self
    }

    pub fn with_stats_window(mut self, window: usize) -> Self {
        self.stats_window = window;
        self
    }

    pub fn with_ewma_alpha(mut self, alpha: f64) -> Self {
        self.ewma_alpha = alpha;
        self
    }

    pub fn with_max_loop_iterations(mut self, max: Option<usize>) -> Self {
        self.max_loop_iterations = max;
        self
    }
}
