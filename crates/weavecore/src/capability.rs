use crate::{EventEmitter, RunId, StepError, Value, WorkflowContext};
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Contract every business-logic collaborator implements.
///
/// The engine invokes the capability and captures its outcome; it never
/// interprets what the capability does. Timeouts, retries and preemption are
/// the capability's own concern, using what the [`StepContext`] exposes.
#[async_trait]
pub trait Capability: Send + Sync {
    async fn invoke(&self, ctx: &StepContext<'_>, input: Value) -> Result<Value, StepError>;
}

/// Execution context passed to a capability for one step invocation
pub struct StepContext<'a> {
    step_id: &'a str,
    workflow: &'a WorkflowContext,
    metadata: &'a HashMap<String, Value>,
    timeout: Option<Duration>,
    retries: u32,
    retries_used: AtomicU32,

    /// Event emitter for real-time updates
    pub events: EventEmitter,
}

impl<'a> StepContext<'a> {
    pub fn new(
        step_id: &'a str,
        workflow: &'a WorkflowContext,
        metadata: &'a HashMap<String, Value>,
        timeout: Option<Duration>,
        retries: u32,
        events: EventEmitter,
    ) -> Self {
        Self {
            step_id,
            workflow,
            metadata,
            timeout,
            retries,
            retries_used: AtomicU32::new(0),
            events,
        }
    }

    pub fn step_id(&self) -> &str {
        self.step_id
    }

    pub fn run_id(&self) -> RunId {
        self.workflow.run_id()
    }

    pub fn workflow(&self) -> &WorkflowContext {
        self.workflow
    }

    /// Step metadata from the definition
    pub fn metadata(&self) -> &HashMap<String, Value> {
        self.metadata
    }

    pub fn variable(&self, name: &str) -> Option<Value> {
        self.workflow.variable(name)
    }

    pub fn set_variable(&self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.workflow.set_variable(name, value)
    }

    pub fn step_output(&self, step_id: &str) -> Option<Value> {
        self.workflow.step_output(step_id)
    }

    /// Write the run output explicitly (first write wins)
    pub fn set_output(&self, value: Value) -> bool {
        self.workflow.set_output(value)
    }

    /// Step timeout, falling back to the workflow default
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Retries the capability may attempt before reporting failure
    pub fn retry_budget(&self) -> u32 {
        self.retries
    }

    /// Note one retry attempt; returns false once the budget is spent
    pub fn record_retry(&self) -> bool {
        let used = self.retries_used.fetch_add(1, Ordering::SeqCst) + 1;
        used <= self.retries
    }

    pub fn retries_used(&self) -> u32 {
        self.retries_used.load(Ordering::SeqCst).min(self.retries)
    }

    pub fn cancellation(&self) -> &CancellationToken {
        self.workflow.cancellation()
    }

    pub fn is_cancelled(&self) -> bool {
        self.workflow.is_cancelled()
    }

    /// Run `fut` under the effective timeout, reporting `StepError::Timeout`
    /// when it elapses
    pub async fn within_timeout<F, T>(&self, fut: F) -> Result<T, StepError>
    where
        F: Future<Output = Result<T, StepError>>,
    {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| StepError::Timeout {
                    millis: limit.as_millis() as u64,
                })?,
            None => fut.await,
        }
    }
}

/// Adapter turning a synchronous closure into a [`Capability`]
pub struct FnCapability<F> {
    f: F,
}

impl<F> FnCapability<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> Capability for FnCapability<F>
where
    F: Fn(&StepContext<'_>, Value) -> Result<Value, StepError> + Send + Sync,
{
    async fn invoke(&self, ctx: &StepContext<'_>, input: Value) -> Result<Value, StepError> {
        (self.f)(ctx, input)
    }
}
