use crate::config::OrchestratorConfig;
use crate::dispatcher::StepDispatcher;
use crate::resolver::DependencyGraph;
use crate::stats::{OrchestratorStats, StatisticsTracker};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use weavecore::{
    EngineError, ErrorPolicy, EventBus, ExecutionEvent, RunId, RunStatus, StepError,
    StepExecutionResult, StepId, Value, WorkflowContext, WorkflowDefinition, WorkflowError,
    WorkflowExecutionResult, WorkflowId,
};

/// Public view of an active run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInfo {
    pub run_id: RunId,
    pub workflow_id: WorkflowId,
    pub started_at: DateTime<Utc>,
}

struct ActiveRun {
    info: RunInfo,
    cancellation: CancellationToken,
}

/// Frees the run's concurrency slot when the execution ends, however it ends
struct RunSlot<'a> {
    active: &'a Mutex<HashMap<RunId, ActiveRun>>,
    run_id: RunId,
    released: bool,
}

impl RunSlot<'_> {
    /// Leave the active set. Returns false when `cancel` got there first, in
    /// which case the run has already been reported cancelled.
    fn release(mut self) -> bool {
        self.released = true;
        self.active.lock().remove(&self.run_id).is_some()
    }
}

impl Drop for RunSlot<'_> {
    fn drop(&mut self) {
        if !self.released {
            self.active.lock().remove(&self.run_id);
        }
    }
}

/// Workflow catalog, admission control and run driver
pub struct Orchestrator {
    config: OrchestratorConfig,
    workflows: RwLock<HashMap<WorkflowId, Arc<WorkflowDefinition>>>,
    active: Mutex<HashMap<RunId, ActiveRun>>,
    stats: Mutex<StatisticsTracker>,
    event_bus: Arc<EventBus>,
    dispatcher: Arc<StepDispatcher>,
}

impl Orchestrator {
    /// Create an orchestrator with default settings
    pub fn new() -> Self {
        Self::with_config(OrchestratorConfig::default())
    }

    pub fn with_config(config: OrchestratorConfig) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        let dispatcher = Arc::new(StepDispatcher::new(
            event_bus.clone(),
            config.max_loop_iterations,
        ));
        let stats = StatisticsTracker::new(config.stats_window, config.ewma_alpha);

        Self {
            config,
            workflows: RwLock::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
            stats: Mutex::new(stats),
            event_bus,
            dispatcher,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Register (or replace) a workflow definition.
    ///
    /// Runs already in flight keep the definition they captured. Returns the
    /// replaced definition, if any.
    pub async fn register(
        &self,
        definition: WorkflowDefinition,
    ) -> Result<Option<Arc<WorkflowDefinition>>, EngineError> {
        definition.validate_structure()?;

        let id = definition.id.clone();
        let previous = self
            .workflows
            .write()
            .await
            .insert(id.clone(), Arc::new(definition));

        if previous.is_some() {
            tracing::info!("Replaced workflow: {}", id);
        } else {
            tracing::info!("Registered workflow: {}", id);
        }
        Ok(previous)
    }

    pub async fn unregister(&self, workflow_id: &str) -> Option<Arc<WorkflowDefinition>> {
        let removed = self.workflows.write().await.remove(workflow_id);
        if removed.is_some() {
            tracing::info!("Unregistered workflow: {}", workflow_id);
        }
        removed
    }

    /// Structural and acyclicity checks, for callers validating ahead of
    /// registration
    pub fn validate(&self, definition: &WorkflowDefinition) -> Result<(), WorkflowError> {
        definition.validate_structure()?;
        DependencyGraph::build(definition)?.validate_acyclic()
    }

    pub async fn get_workflow(&self, workflow_id: &str) -> Option<Arc<WorkflowDefinition>> {
        self.workflows.read().await.get(workflow_id).cloned()
    }

    pub async fn list_workflows(&self) -> Vec<Arc<WorkflowDefinition>> {
        let mut workflows: Vec<_> = self.workflows.read().await.values().cloned().collect();
        workflows.sort_by(|a, b| a.id.cmp(&b.id));
        workflows
    }

    pub fn active_runs(&self) -> Vec<RunInfo> {
        self.active
            .lock()
            .values()
            .map(|run| run.info.clone())
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    /// Subscribe to execution events for the lifetime of the receiver
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Snapshot of the statistics; never a live reference
    pub fn stats(&self) -> OrchestratorStats {
        let active = self.active_count();
        self.stats.lock().snapshot(active)
    }

    /// Cooperatively cancel an active run.
    ///
    /// The run leaves the active set and is reported cancelled immediately;
    /// steps already dispatched finish on their own and their results are
    /// still recorded. Returns false if the run is not active.
    pub fn cancel(&self, run_id: RunId) -> bool {
        let Some(run) = self.active.lock().remove(&run_id) else {
            return false;
        };

        run.cancellation.cancel();
        tracing::info!("Cancelled run {} of workflow {}", run_id, run.info.workflow_id);
        self.event_bus.emit(ExecutionEvent::WorkflowCancelled {
            run_id,
            workflow_id: run.info.workflow_id,
            timestamp: Utc::now(),
        });
        true
    }

    /// Execute a registered workflow to completion.
    ///
    /// Unknown workflows, a full concurrency ceiling, definition errors and
    /// engine invariant violations are returned as `Err`. Step failures are
    /// not: they produce an `Ok` result with status `failed`.
    #[tracing::instrument(skip(self, input, metadata))]
    pub async fn execute(
        &self,
        workflow_id: &str,
        input: Value,
        metadata: HashMap<String, Value>,
    ) -> Result<WorkflowExecutionResult, EngineError> {
        let definition = self
            .get_workflow(workflow_id)
            .await
            .ok_or_else(|| EngineError::DefinitionNotFound(workflow_id.to_string()))?;

        let run_id = RunId::new_v4();
        let cancellation = CancellationToken::new();
        let slot = self.admit(run_id, &definition.id, cancellation.clone())?;

        let start = Instant::now();
        let ctx = Arc::new(WorkflowContext::new(
            run_id,
            definition.id.clone(),
            input,
            metadata,
            cancellation,
        ));

        tracing::info!("Starting run {} of workflow {}", run_id, definition.id);
        self.event_bus.emit(ExecutionEvent::WorkflowStarted {
            run_id,
            workflow_id: definition.id.clone(),
            timestamp: Utc::now(),
        });

        let outcome = self.drive(&definition, &ctx).await;
        let duration = start.elapsed();
        let duration_ms = duration.as_millis() as u64;

        // Settles the race with `cancel`: whoever removes the run from the
        // active set decides its terminal state
        let cancelled = !slot.release();

        let failure = match outcome {
            Ok(failure) => failure,
            Err(err) if cancelled => {
                tracing::error!("Run {} aborted after cancellation: {}", run_id, err);
                self.stats.lock().record(RunStatus::Cancelled, duration);
                return Err(err);
            }
            Err(err) => {
                tracing::error!("Run {} aborted: {}", run_id, err);
                self.stats.lock().record(RunStatus::Failed, duration);
                self.event_bus.emit(ExecutionEvent::WorkflowFailed {
                    run_id,
                    workflow_id: definition.id.clone(),
                    error: err.to_string(),
                    duration_ms,
                    timestamp: Utc::now(),
                });
                return Err(err);
            }
        };

        let status = if cancelled {
            RunStatus::Cancelled
        } else if failure.is_some() {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };

        self.stats.lock().record(status, duration);

        let (failed_step, error) = match failure {
            Some((step, error)) => (Some(step), Some(error)),
            None => (None, None),
        };

        match status {
            RunStatus::Completed => {
                tracing::info!("Run {} completed in {}ms", run_id, duration_ms);
                self.event_bus.emit(ExecutionEvent::WorkflowCompleted {
                    run_id,
                    workflow_id: definition.id.clone(),
                    duration_ms,
                    timestamp: Utc::now(),
                });
            }
            RunStatus::Failed => {
                let message = error.as_ref().map(|e| e.to_string()).unwrap_or_default();
                tracing::error!("Run {} failed after {}ms: {}", run_id, duration_ms, message);
                self.event_bus.emit(ExecutionEvent::WorkflowFailed {
                    run_id,
                    workflow_id: definition.id.clone(),
                    error: message,
                    duration_ms,
                    timestamp: Utc::now(),
                });
            }
            // workflow.cancelled was emitted by `cancel`
            _ => tracing::info!("Run {} settled as cancelled after {}ms", run_id, duration_ms),
        }

        let output = match status {
            RunStatus::Completed => Some(run_output(&definition, &ctx)),
            _ => None,
        };

        Ok(WorkflowExecutionResult {
            run_id,
            workflow_id: definition.id.clone(),
            status,
            input: ctx.input().clone(),
            output,
            error,
            failed_step,
            duration_ms,
            started_at: ctx.started_at(),
            finished_at: Utc::now(),
            step_results: ctx.step_results(),
            metadata: ctx.metadata().clone(),
        })
    }

    /// Take a concurrency slot or fail with a capacity error
    fn admit(
        &self,
        run_id: RunId,
        workflow_id: &str,
        cancellation: CancellationToken,
    ) -> Result<RunSlot<'_>, EngineError> {
        let mut active = self.active.lock();
        if active.len() >= self.config.max_concurrent_runs {
            tracing::warn!(
                "Rejecting run of {}: {} runs active",
                workflow_id,
                active.len()
            );
            return Err(EngineError::ConcurrencyLimitExceeded {
                limit: self.config.max_concurrent_runs,
            });
        }

        active.insert(
            run_id,
            ActiveRun {
                info: RunInfo {
                    run_id,
                    workflow_id: workflow_id.to_string(),
                    started_at: Utc::now(),
                },
                cancellation,
            },
        );

        Ok(RunSlot {
            active: &self.active,
            run_id,
            released: false,
        })
    }

    /// Ready-set batch loop. Returns the first step failure, if any.
    async fn drive(
        &self,
        definition: &Arc<WorkflowDefinition>,
        ctx: &Arc<WorkflowContext>,
    ) -> Result<Option<(StepId, StepError)>, EngineError> {
        definition.validate_structure()?;
        let graph = DependencyGraph::build(definition)?;
        graph.validate_acyclic()?;

        let mut pending: Vec<usize> = (0..definition.steps.len()).collect();
        let mut satisfied: HashSet<StepId> = HashSet::new();
        let mut first_failure: Option<(StepId, StepError)> = None;
        let mut batch = 0usize;

        while !pending.is_empty() {
            if ctx.is_cancelled() {
                tracing::warn!(
                    "Run {} cancelled with {} steps not dispatched",
                    ctx.run_id(),
                    pending.len()
                );
                break;
            }

            let ready = graph.ready_set(&pending, &satisfied);
            if ready.is_empty() {
                let remaining: Vec<&str> = pending
                    .iter()
                    .map(|&p| definition.steps[p].id.as_str())
                    .collect();
                tracing::error!(
                    "Run {} stalled: no ready steps among {:?}",
                    ctx.run_id(),
                    remaining
                );
                return Err(EngineError::Invariant(format!(
                    "no ready steps with {} remaining: {}",
                    remaining.len(),
                    remaining.join(", ")
                )));
            }

            batch += 1;
            tracing::debug!(
                "Run {} batch {}: dispatching {} steps",
                ctx.run_id(),
                batch,
                ready.len()
            );

            let handles = ready.iter().map(|&position| {
                let dispatcher = self.dispatcher.clone();
                let definition = definition.clone();
                let ctx = ctx.clone();
                let step_id = definition.steps[position].id.clone();
                let handle = tokio::spawn(async move {
                    let step = &definition.steps[position];
                    dispatcher
                        .dispatch(step, &ctx, definition.default_timeout)
                        .await
                });
                async move { (step_id, handle.await) }
            });

            // The whole batch settles before readiness is recomputed
            let settled = join_all(handles).await;
            pending.retain(|p| !ready.contains(p));

            let mut newly_failed = Vec::new();
            for (step_id, joined) in settled {
                let result = joined.unwrap_or_else(|e| {
                    StepExecutionResult::failed(
                        step_id.clone(),
                        Value::Null,
                        StepError::Panicked(e.to_string()),
                        Utc::now(),
                        Duration::ZERO,
                    )
                });

                if result.status.satisfies_dependents() {
                    satisfied.insert(step_id.clone());
                } else if let Some(error) = &result.error {
                    if first_failure.is_none() {
                        first_failure = Some((step_id.clone(), error.clone()));
                    }
                    newly_failed.push(step_id.clone());
                }
                ctx.record_result(result);
            }

            if newly_failed.is_empty() {
                continue;
            }

            match definition.on_error {
                ErrorPolicy::StopWorkflow => break,
                ErrorPolicy::ContinueOnError => {
                    let unreachable: HashSet<StepId> = newly_failed
                        .iter()
                        .flat_map(|id| graph.dependents_of(id))
                        .collect();
                    pending.retain(|&p| {
                        let id = &definition.steps[p].id;
                        if unreachable.contains(id) {
                            tracing::debug!("Step {} unreachable after upstream failure", id);
                            ctx.record_result(StepExecutionResult::cancelled(id.clone()));
                            false
                        } else {
                            true
                        }
                    });
                }
            }
        }

        for &position in &pending {
            ctx.record_result(StepExecutionResult::cancelled(
                definition.steps[position].id.clone(),
            ));
        }

        Ok(first_failure)
    }
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

/// Explicit output if a step set one, otherwise the output of the last
/// completed terminal step in definition order
fn run_output(definition: &WorkflowDefinition, ctx: &WorkflowContext) -> Value {
    if let Some(output) = ctx.output() {
        return output;
    }

    definition
        .terminal_steps()
        .into_iter()
        .rev()
        .find_map(|step| ctx.step_output(&step.id))
        .unwrap_or_default()
}
