use crate::{RunId, StepError, StepId, Value, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Status of a single step within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Cancelled,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, StepStatus::Pending | StepStatus::Running)
    }

    /// Whether downstream steps may treat this step as done
    pub fn satisfies_dependents(self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Skipped)
    }
}

/// Status of a whole run: `pending -> running -> {completed | failed | cancelled}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

/// Record of one step in one run, written exactly once
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecutionResult {
    pub step_id: StepId,
    pub status: StepStatus,
    pub input: Value,
    pub output: Option<Value>,
    pub error: Option<StepError>,
    pub duration_ms: u64,
    pub retry_count: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub metadata: HashMap<String, Value>,
}

impl StepExecutionResult {
    fn base(step_id: impl Into<StepId>, status: StepStatus, input: Value) -> Self {
        Self {
            step_id: step_id.into(),
            status,
            input,
            output: None,
            error: None,
            duration_ms: 0,
            retry_count: 0,
            started_at: None,
            metadata: HashMap::new(),
        }
    }

    pub fn completed(
        step_id: impl Into<StepId>,
        input: Value,
        output: Value,
        started_at: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        Self {
            output: Some(output),
            started_at: Some(started_at),
            duration_ms: duration.as_millis() as u64,
            ..Self::base(step_id, StepStatus::Completed, input)
        }
    }

    pub fn failed(
        step_id: impl Into<StepId>,
        input: Value,
        error: StepError,
        started_at: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        Self {
            error: Some(error),
            started_at: Some(started_at),
            duration_ms: duration.as_millis() as u64,
            ..Self::base(step_id, StepStatus::Failed, input)
        }
    }

    /// Guard evaluated false: terminal, zero duration
    pub fn skipped(step_id: impl Into<StepId>, input: Value) -> Self {
        Self::base(step_id, StepStatus::Skipped, input)
    }

    /// Never dispatched because the run stopped scheduling
    pub fn cancelled(step_id: impl Into<StepId>) -> Self {
        Self::base(step_id, StepStatus::Cancelled, Value::Null)
    }

    pub fn with_retries(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn is_failed(&self) -> bool {
        self.status == StepStatus::Failed
    }
}

/// Final, immutable record of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecutionResult {
    pub run_id: RunId,
    pub workflow_id: WorkflowId,
    pub status: RunStatus,
    pub input: Value,
    pub output: Option<Value>,
    pub error: Option<StepError>,
    pub failed_step: Option<StepId>,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub step_results: HashMap<StepId, StepExecutionResult>,
    pub metadata: HashMap<String, Value>,
}

impl WorkflowExecutionResult {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }

    pub fn step(&self, id: &str) -> Option<&StepExecutionResult> {
        self.step_results.get(id)
    }

    pub fn step_status(&self, id: &str) -> Option<StepStatus> {
        self.step(id).map(|r| r.status)
    }

    /// Number of steps with the given status
    pub fn count(&self, status: StepStatus) -> usize {
        self.step_results
            .values()
            .filter(|r| r.status == status)
            .count()
    }
}
