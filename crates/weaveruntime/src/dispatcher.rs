use chrono::Utc;
use futures::future::{join_all, BoxFuture, FutureExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use weavecore::{
    Condition, EventBus, ExecutionEvent, Handler, InputSource, StepContext, StepError,
    StepExecutionResult, StepKind, StepStatus, Value, WorkflowContext, WorkflowStep,
};

/// Routes a step to the behavior of its kind and turns the outcome into a
/// result record. Dispatch itself never fails: step errors are captured in the
/// returned [`StepExecutionResult`].
pub struct StepDispatcher {
    event_bus: Arc<EventBus>,
    max_loop_iterations: Option<usize>,
}

impl StepDispatcher {
    pub fn new(event_bus: Arc<EventBus>, max_loop_iterations: Option<usize>) -> Self {
        Self {
            event_bus,
            max_loop_iterations,
        }
    }

    /// Dispatch a top-level step of a run
    pub async fn dispatch(
        &self,
        step: &WorkflowStep,
        ctx: &WorkflowContext,
        default_timeout: Option<Duration>,
    ) -> StepExecutionResult {
        let input = resolve_input(step, ctx);
        self.dispatch_with_input(step, ctx, input, default_timeout)
            .await
    }

    fn dispatch_with_input<'a>(
        &'a self,
        step: &'a WorkflowStep,
        ctx: &'a WorkflowContext,
        input: Value,
        default_timeout: Option<Duration>,
    ) -> BoxFuture<'a, StepExecutionResult> {
        async move {
            let run_id = ctx.run_id();

            if let Some(guard) = &step.condition {
                let scope = bind(ctx.scope(), "value", input.clone());
                if !guard.evaluate(&scope) {
                    tracing::debug!("Step {} skipped: guard is false", step.id);
                    self.event_bus.emit(ExecutionEvent::StepSkipped {
                        run_id,
                        step_id: step.id.clone(),
                        timestamp: Utc::now(),
                    });
                    return StepExecutionResult::skipped(step.id.clone(), input);
                }
            }

            self.event_bus.emit(ExecutionEvent::StepStarted {
                run_id,
                step_id: step.id.clone(),
                kind: step.kind.name().to_string(),
                timestamp: Utc::now(),
            });

            let started_at = Utc::now();
            let start = Instant::now();
            let step_ctx = StepContext::new(
                &step.id,
                ctx,
                &step.metadata,
                step.timeout.or(default_timeout),
                step.retries,
                self.event_bus.create_emitter(run_id, step.id.clone()),
            );

            let outcome = self
                .run_kind(step, &step_ctx, input.clone(), default_timeout)
                .await;
            let duration = start.elapsed();
            let duration_ms = duration.as_millis() as u64;
            let retries = step_ctx.retries_used();

            match outcome {
                Ok(output) => {
                    tracing::debug!("Step {} completed in {}ms", step.id, duration_ms);
                    if let Some(var) = &step.output_var {
                        ctx.set_variable(var.clone(), output.clone());
                    }
                    self.event_bus.emit(ExecutionEvent::StepCompleted {
                        run_id,
                        step_id: step.id.clone(),
                        duration_ms,
                        timestamp: Utc::now(),
                    });
                    StepExecutionResult::completed(step.id.clone(), input, output, started_at, duration)
                        .with_retries(retries)
                }
                Err(error) => {
                    tracing::error!("Step {} failed: {}", step.id, error);
                    if let Some(handler) = &step.on_error {
                        self.compensate(handler, &step_ctx, &input, &error).await;
                    }
                    self.event_bus.emit(ExecutionEvent::StepFailed {
                        run_id,
                        step_id: step.id.clone(),
                        error: error.to_string(),
                        duration_ms,
                        timestamp: Utc::now(),
                    });
                    StepExecutionResult::failed(step.id.clone(), input, error, started_at, duration)
                        .with_retries(retries)
                }
            }
        }
        .boxed()
    }

    async fn run_kind(
        &self,
        step: &WorkflowStep,
        sctx: &StepContext<'_>,
        input: Value,
        default_timeout: Option<Duration>,
    ) -> Result<Value, StepError> {
        let ctx = sctx.workflow();

        match &step.kind {
            StepKind::Transform { handler } | StepKind::Call { capability: handler } => {
                handler.capability().invoke(sctx, input).await
            }

            StepKind::Route { routes } => {
                let scope = bind(ctx.scope(), "value", input.clone());
                match routes.iter().find(|arm| arm.when.evaluate(&scope)) {
                    Some(arm) => {
                        tracing::debug!("Step {} routed to {}", step.id, arm.handler.name());
                        arm.handler.capability().invoke(sctx, input).await
                    }
                    None => Ok(input),
                }
            }

            StepKind::Filter { predicate } => Ok(filter(predicate, ctx, input)),

            StepKind::Aggregate { handler } => match input {
                Value::Array(_) => handler.capability().invoke(sctx, input).await,
                other => Ok(other),
            },

            StepKind::Split { handler } => {
                let output = handler.capability().invoke(sctx, input).await?;
                Ok(match output {
                    Value::Array(_) => output,
                    Value::Null => Value::Array(Vec::new()),
                    other => Value::Array(vec![other]),
                })
            }

            StepKind::Enrich { handler } => {
                let extra = handler.capability().invoke(sctx, input.clone()).await?;
                Ok(merge(input, extra))
            }

            StepKind::Validate { rule, message } => {
                let scope = bind(ctx.scope(), "value", input.clone());
                if rule.evaluate(&scope) {
                    Ok(input)
                } else {
                    Err(StepError::ValidationFailed(message.clone().unwrap_or_else(|| {
                        format!("step '{}' rejected its input", step.id)
                    })))
                }
            }

            StepKind::Parallel { steps } => {
                let outcomes = join_all(
                    steps
                        .iter()
                        .map(|sub| self.run_nested(sub, ctx, input.clone(), default_timeout)),
                )
                .await;
                outcomes
                    .into_iter()
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array)
            }

            StepKind::Conditional {
                condition,
                then_step,
                else_step,
            } => {
                let scope = bind(ctx.scope(), "value", input.clone());
                let branch = if condition.evaluate(&scope) {
                    Some(then_step)
                } else {
                    else_step.as_ref()
                };
                match branch {
                    Some(sub) => self.run_nested(sub, ctx, input, default_timeout).await,
                    None => Ok(input),
                }
            }

            StepKind::Loop {
                condition,
                body,
                max_iterations,
            } => {
                let limit = max_iterations.or(self.max_loop_iterations);
                let mut outputs: Vec<Value> = Vec::new();
                let mut current = input;

                loop {
                    if sctx.is_cancelled() {
                        return Err(StepError::Cancelled);
                    }

                    let frame = Value::object([
                        ("index", Value::from(outputs.len())),
                        ("last", outputs.last().cloned().unwrap_or_default()),
                    ]);
                    let scope = bind(bind(ctx.scope(), "value", current.clone()), "loop", frame);
                    if !condition.evaluate(&scope) {
                        break;
                    }

                    if let Some(limit) = limit {
                        if outputs.len() >= limit {
                            tracing::warn!("Loop step {} hit its {} iteration cap", step.id, limit);
                            return Err(StepError::LoopLimitExceeded { limit });
                        }
                    }

                    let output = self
                        .run_nested(body, ctx, current, default_timeout)
                        .await?;
                    outputs.push(output.clone());
                    current = output;
                }

                Ok(Value::Array(outputs))
            }
        }
    }

    /// Dispatch a sub-step of a parallel, conditional or loop step. Its result
    /// is not entered into the run's step map; the output (or `null` when its
    /// guard skipped it) or failure propagates to the parent.
    async fn run_nested(
        &self,
        sub: &WorkflowStep,
        ctx: &WorkflowContext,
        parent_input: Value,
        default_timeout: Option<Duration>,
    ) -> Result<Value, StepError> {
        let input = match &sub.input {
            InputSource::Auto => parent_input,
            _ => resolve_input(sub, ctx),
        };

        let result = self
            .dispatch_with_input(sub, ctx, input, default_timeout)
            .await;

        match result.status {
            StepStatus::Completed => Ok(result.output.unwrap_or_default()),
            StepStatus::Skipped => Ok(Value::Null),
            _ => Err(StepError::Nested {
                step: sub.id.clone(),
                message: result
                    .error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "did not complete".to_string()),
            }),
        }
    }

    /// Run the step's error handler. Compensation only: its result never
    /// changes the step's status.
    async fn compensate(
        &self,
        handler: &Handler,
        sctx: &StepContext<'_>,
        input: &Value,
        error: &StepError,
    ) {
        let payload = Value::object([
            ("step", Value::from(sctx.step_id())),
            ("error", Value::from(error.to_string())),
            ("input", input.clone()),
        ]);

        if let Err(e) = handler.capability().invoke(sctx, payload).await {
            tracing::warn!(
                "Error handler {} for step {} failed: {}",
                handler.name(),
                sctx.step_id(),
                e
            );
        }
    }
}

/// Resolve a step's input from the run context
pub fn resolve_input(step: &WorkflowStep, ctx: &WorkflowContext) -> Value {
    match &step.input {
        InputSource::Auto => match step.depends_on.as_slice() {
            [] => ctx.input().clone(),
            [only] => ctx.step_output(only).unwrap_or_default(),
            deps => Value::Object(
                deps.iter()
                    .map(|dep| (dep.clone(), ctx.step_output(dep).unwrap_or_default()))
                    .collect(),
            ),
        },
        InputSource::Workflow => ctx.input().clone(),
        InputSource::Step(id) => ctx.step_output(id).unwrap_or_default(),
        InputSource::Variable(name) => ctx.variable(name).unwrap_or_default(),
        InputSource::Literal(value) => value.clone(),
    }
}

fn bind(mut scope: Value, key: &str, value: Value) -> Value {
    if let Value::Object(map) = &mut scope {
        map.insert(key.to_string(), value);
    }
    scope
}

fn filter(predicate: &Condition, ctx: &WorkflowContext, input: Value) -> Value {
    let mut scope = ctx.scope();

    match input {
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .filter(|item| {
                    scope = bind(std::mem::take(&mut scope), "item", item.clone());
                    predicate.evaluate(&scope)
                })
                .collect(),
        ),
        other => {
            scope = bind(scope, "item", other.clone());
            if predicate.evaluate(&scope) {
                other
            } else {
                Value::Null
            }
        }
    }
}

/// Objects merge key by key with the enrichment winning; anything else is
/// wrapped as `{ value, enrichment }`
fn merge(input: Value, extra: Value) -> Value {
    match (input, extra) {
        (Value::Object(mut base), Value::Object(extra)) => {
            base.extend(extra);
            Value::Object(base)
        }
        (input, extra) => Value::object([("value", input), ("enrichment", extra)]),
    }
}
