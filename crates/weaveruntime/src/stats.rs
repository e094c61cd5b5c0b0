//! Rolling latency and throughput statistics over finalized runs.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use weavecore::RunStatus;

/// Read-only snapshot of orchestrator statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorStats {
    pub total_workflows: u64,
    pub completed_workflows: u64,
    pub failed_workflows: u64,
    pub cancelled_workflows: u64,
    pub active_runs: usize,
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
    /// Exponentially weighted moving average of run latency
    pub avg_latency_ms: f64,
    /// Finalized runs per second since the tracker started
    pub throughput_per_sec: f64,
    pub success_rate: f64,
    pub error_rate: f64,
}

/// Bounded window of run durations plus counters.
///
/// Not synchronized itself; the orchestrator keeps it behind a mutex.
#[derive(Debug)]
pub struct StatisticsTracker {
    window: VecDeque<f64>,
    capacity: usize,
    alpha: f64,
    ewma_ms: Option<f64>,
    total: u64,
    completed: u64,
    failed: u64,
    cancelled: u64,
    started: Instant,
}

impl StatisticsTracker {
    pub fn new(capacity: usize, alpha: f64) -> Self {
        Self {
            window: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
            alpha: alpha.clamp(f64::EPSILON, 1.0),
            ewma_ms: None,
            total: 0,
            completed: 0,
            failed: 0,
            cancelled: 0,
            started: Instant::now(),
        }
    }

    /// Record one finalized run
    pub fn record(&mut self, status: RunStatus, duration: Duration) {
        match status {
            RunStatus::Completed => self.completed += 1,
            RunStatus::Failed => self.failed += 1,
            RunStatus::Cancelled => self.cancelled += 1,
            RunStatus::Pending | RunStatus::Running => {
                tracing::warn!("Ignoring statistics for non-terminal status {:?}", status);
                return;
            }
        }
        self.total += 1;
        self.record_duration(duration.as_secs_f64() * 1000.0);
    }

    /// Push a latency sample (milliseconds) into the window and the average
    pub fn record_duration(&mut self, millis: f64) {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(millis);

        self.ewma_ms = Some(match self.ewma_ms {
            None => millis,
            Some(prev) => self.alpha * millis + (1.0 - self.alpha) * prev,
        });
    }

    /// Latency at percentile `pct` (0..=100) over the current window
    pub fn percentile(&self, pct: usize) -> f64 {
        let mut sorted: Vec<f64> = self.window.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));
        percentile_of_sorted(&sorted, pct)
    }

    pub fn ewma_ms(&self) -> f64 {
        self.ewma_ms.unwrap_or(0.0)
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    pub fn snapshot(&self, active_runs: usize) -> OrchestratorStats {
        let mut sorted: Vec<f64> = self.window.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let elapsed = self.started.elapsed().as_secs_f64();
        let rate = |count: u64| {
            if self.total == 0 {
                0.0
            } else {
                count as f64 / self.total as f64
            }
        };

        OrchestratorStats {
            total_workflows: self.total,
            completed_workflows: self.completed,
            failed_workflows: self.failed,
            cancelled_workflows: self.cancelled,
            active_runs,
            p50_latency_ms: percentile_of_sorted(&sorted, 50),
            p95_latency_ms: percentile_of_sorted(&sorted, 95),
            p99_latency_ms: percentile_of_sorted(&sorted, 99),
            avg_latency_ms: self.ewma_ms(),
            throughput_per_sec: if elapsed > 0.0 {
                self.total as f64 / elapsed
            } else {
                0.0
            },
            success_rate: rate(self.completed),
            error_rate: rate(self.failed),
        }
    }
}

fn percentile_of_sorted(sorted: &[f64], pct: usize) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let n = sorted.len();
    sorted[(n * pct.min(100) / 100).min(n - 1)]
}
