use crate::{RunId, StepExecutionResult, StepId, StepStatus, Value, WorkflowId};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Mutable state of one run.
///
/// Owned by exactly one execution and shared (behind an `Arc`) only with the
/// step tasks of that execution. Writes to the step-result map are serialized
/// by the mutex; variables are last-writer-wins per key.
#[derive(Debug)]
pub struct WorkflowContext {
    run_id: RunId,
    workflow_id: WorkflowId,
    input: Value,
    output: Mutex<Option<Value>>,
    variables: RwLock<HashMap<String, Value>>,
    step_results: Mutex<HashMap<StepId, StepExecutionResult>>,
    started_at: DateTime<Utc>,
    metadata: HashMap<String, Value>,
    cancellation: CancellationToken,
}

impl WorkflowContext {
    pub fn new(
        run_id: RunId,
        workflow_id: impl Into<WorkflowId>,
        input: Value,
        metadata: HashMap<String, Value>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            run_id,
            workflow_id: workflow_id.into(),
            input,
            output: Mutex::new(None),
            variables: RwLock::new(HashMap::new()),
            step_results: Mutex::new(HashMap::new()),
            started_at: Utc::now(),
            metadata,
            cancellation,
        }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn input(&self) -> &Value {
        &self.input
    }

    pub fn metadata(&self) -> &HashMap<String, Value> {
        &self.metadata
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn variable(&self, name: &str) -> Option<Value> {
        self.variables.read().get(name).cloned()
    }

    pub fn set_variable(&self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.variables.write().insert(name.into(), value)
    }

    pub fn variables(&self) -> HashMap<String, Value> {
        self.variables.read().clone()
    }

    /// Set the run output explicitly. The first write wins; returns whether
    /// this call stored the value.
    pub fn set_output(&self, value: Value) -> bool {
        let mut output = self.output.lock();
        if output.is_some() {
            return false;
        }
        *output = Some(value);
        true
    }

    pub fn output(&self) -> Option<Value> {
        self.output.lock().clone()
    }

    /// Record a step's terminal result. A second write for the same step is
    /// rejected and logged.
    pub fn record_result(&self, result: StepExecutionResult) -> bool {
        let mut results = self.step_results.lock();
        if results.contains_key(&result.step_id) {
            tracing::warn!(
                "Run {}: duplicate result for step {} ignored",
                self.run_id,
                result.step_id
            );
            return false;
        }
        results.insert(result.step_id.clone(), result);
        true
    }

    pub fn has_result(&self, step_id: &str) -> bool {
        self.step_results.lock().contains_key(step_id)
    }

    pub fn step_status(&self, step_id: &str) -> Option<StepStatus> {
        self.step_results.lock().get(step_id).map(|r| r.status)
    }

    /// Output of a completed step
    pub fn step_output(&self, step_id: &str) -> Option<Value> {
        self.step_results
            .lock()
            .get(step_id)
            .and_then(|r| r.output.clone())
    }

    pub fn step_results(&self) -> HashMap<StepId, StepExecutionResult> {
        self.step_results.lock().clone()
    }

    /// Snapshot of the context as a condition scope:
    /// `{ input, vars, steps: { id: output }, metadata }`
    pub fn scope(&self) -> Value {
        let steps: HashMap<String, Value> = self
            .step_results
            .lock()
            .iter()
            .map(|(id, r)| (id.clone(), r.output.clone().unwrap_or_default()))
            .collect();

        Value::object([
            ("input", self.input.clone()),
            ("vars", Value::Object(self.variables())),
            ("steps", Value::Object(steps)),
            ("metadata", Value::Object(self.metadata.clone())),
        ])
    }
}
