// crates/weaveruntime/tests/orchestrator_test.rs

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Barrier};
use weavecore::{
    Capability, Condition, EngineError, ErrorPolicy, ExecutionEvent, Handler, RunStatus,
    StepContext, StepError, StepKind, StepStatus, Value, WorkflowDefinition, WorkflowError,
    WorkflowStep,
};
use weaveruntime::{Orchestrator, OrchestratorConfig};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("weaveruntime=debug")
        .with_test_writer()
        .try_init();
}

fn call(id: &str, handler: Handler) -> WorkflowStep {
    WorkflowStep::new(id, StepKind::Call { capability: handler })
}

fn echo(id: &str) -> WorkflowStep {
    call(id, Handler::from_fn("echo", |_, input| Ok(input)))
}

fn failing(id: &str) -> WorkflowStep {
    call(
        id,
        Handler::from_fn("boom", |_, _| Err(StepError::Capability("boom".to_string()))),
    )
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<ExecutionEvent>) -> Vec<ExecutionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn position(events: &[ExecutionEvent], name: &str, step: &str) -> Option<usize> {
    events
        .iter()
        .position(|e| e.name() == name && e.step_id() == Some(step))
}

/// Blocks until the gate opens; ignores cancellation on purpose
struct Gated {
    open: watch::Receiver<bool>,
    entered: Arc<AtomicUsize>,
}

#[async_trait]
impl Capability for Gated {
    async fn invoke(&self, _ctx: &StepContext<'_>, input: Value) -> Result<Value, StepError> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let mut open = self.open.clone();
        open.wait_for(|open| *open)
            .await
            .map_err(|e| StepError::Capability(e.to_string()))?;
        Ok(input)
    }
}

struct Rendezvous(Arc<Barrier>);

#[async_trait]
impl Capability for Rendezvous {
    async fn invoke(&self, _ctx: &StepContext<'_>, input: Value) -> Result<Value, StepError> {
        self.0.wait().await;
        Ok(input)
    }
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_fan_out_dispatches_in_one_batch() {
    init_tracing();
    let orchestrator = Orchestrator::new();
    let barrier = Arc::new(Barrier::new(2));
    let meet = |id: &str| {
        call(
            id,
            Handler::new("meet", Arc::new(Rendezvous(barrier.clone()))),
        )
        .depends_on(["a"])
    };

    let def = WorkflowDefinition::new("fan-out")
        .with_step(echo("a"))
        .with_step(meet("b"))
        .with_step(meet("c"));
    orchestrator.register(def).await.unwrap();

    let mut rx = orchestrator.subscribe();
    // b and c only get past the barrier if they run concurrently
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        orchestrator.execute("fan-out", Value::from(7i64), HashMap::new()),
    )
    .await
    .expect("b and c did not run in the same batch")
    .unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.count(StepStatus::Completed), 3);

    let events = drain(&mut rx);
    let a_done = position(&events, "step.completed", "a").unwrap();
    assert!(a_done < position(&events, "step.started", "b").unwrap());
    assert!(a_done < position(&events, "step.started", "c").unwrap());
    assert_eq!(events.first().unwrap().name(), "workflow.started");
    assert_eq!(events.last().unwrap().name(), "workflow.completed");
}

#[tokio::test]
async fn test_cycle_rejected_before_any_dispatch() {
    init_tracing();
    let orchestrator = Orchestrator::new();
    let dispatched = Arc::new(AtomicUsize::new(0));
    let counter = |id: &str| {
        let dispatched = dispatched.clone();
        call(
            id,
            Handler::from_fn("count", move |_, input| {
                dispatched.fetch_add(1, Ordering::SeqCst);
                Ok(input)
            }),
        )
    };

    let def = WorkflowDefinition::new("cyclic")
        .with_step(counter("a").depends_on(["b"]))
        .with_step(counter("b").depends_on(["a"]));

    assert!(matches!(
        orchestrator.validate(&def),
        Err(WorkflowError::Cycle { .. })
    ));
    orchestrator.register(def).await.unwrap();

    let mut rx = orchestrator.subscribe();
    let err = orchestrator
        .execute("cyclic", Value::Null, HashMap::new())
        .await
        .unwrap_err();

    match err {
        EngineError::Workflow(WorkflowError::Cycle { path }) => {
            assert!(path.contains(&"a".to_string()));
            assert_eq!(path.first(), path.last());
        }
        other => panic!("expected a cycle error, got {other}"),
    }
    assert_eq!(dispatched.load(Ordering::SeqCst), 0);

    let names: Vec<_> = drain(&mut rx).iter().map(|e| e.name()).collect();
    assert_eq!(names, vec!["workflow.started", "workflow.failed"]);

    let stats = orchestrator.stats();
    assert_eq!(stats.failed_workflows, 1);
    assert_eq!(stats.active_runs, 0);
}

#[tokio::test]
async fn test_failure_stops_dependents() {
    init_tracing();
    let orchestrator = Orchestrator::new();
    let def = WorkflowDefinition::new("fails")
        .with_step(failing("a"))
        .with_step(echo("b").depends_on(["a"]))
        .with_step(echo("c").depends_on(["b"]));
    orchestrator.register(def).await.unwrap();

    let mut rx = orchestrator.subscribe();
    let result = orchestrator
        .execute("fails", Value::Null, HashMap::new())
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.failed_step.as_deref(), Some("a"));
    assert_eq!(result.error, Some(StepError::Capability("boom".to_string())));
    assert!(result.output.is_none());
    assert_eq!(result.step_status("a"), Some(StepStatus::Failed));
    assert_eq!(result.step_status("b"), Some(StepStatus::Cancelled));
    assert_eq!(result.step_status("c"), Some(StepStatus::Cancelled));

    let events = drain(&mut rx);
    assert!(position(&events, "step.started", "b").is_none());
    assert!(position(&events, "step.failed", "a").is_some());
    assert_eq!(events.last().unwrap().name(), "workflow.failed");
}

#[tokio::test]
async fn test_continue_on_error_runs_independent_branches() {
    let orchestrator = Orchestrator::new();
    let def = WorkflowDefinition::new("partial")
        .with_error_policy(ErrorPolicy::ContinueOnError)
        .with_step(failing("a"))
        .with_step(echo("b").depends_on(["a"]))
        .with_step(echo("c"))
        .with_step(echo("d").depends_on(["c"]));
    orchestrator.register(def).await.unwrap();

    let result = orchestrator
        .execute("partial", Value::from("x"), HashMap::new())
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.step_status("b"), Some(StepStatus::Cancelled));
    assert_eq!(result.step_status("c"), Some(StepStatus::Completed));
    assert_eq!(result.step_status("d"), Some(StepStatus::Completed));
    assert_eq!(result.step("d").unwrap().output, Some(Value::from("x")));
}

#[tokio::test]
async fn test_loop_accumulates_three_iterations() {
    let orchestrator = Orchestrator::new();
    let body = WorkflowStep::new(
        "inc",
        StepKind::Transform {
            handler: Handler::from_fn("inc", |_, input| {
                Ok(Value::from(input.as_f64().unwrap_or(0.0) + 1.0))
            }),
        },
    );
    let def = WorkflowDefinition::new("loop").with_step(WorkflowStep::new(
        "repeat",
        StepKind::Loop {
            condition: Condition::less_than("value", 3.0),
            body: Box::new(body),
            max_iterations: None,
        },
    ));
    orchestrator.register(def).await.unwrap();

    let result = orchestrator
        .execute("loop", Value::from(0i64), HashMap::new())
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(
        result.output,
        Some(Value::Array(vec![
            Value::from(1i64),
            Value::from(2i64),
            Value::from(3i64)
        ]))
    );
}

#[tokio::test]
async fn test_capacity_limit_rejects_extra_run_until_slot_frees() {
    let orchestrator = Arc::new(Orchestrator::with_config(
        OrchestratorConfig::default().with_max_concurrent_runs(100),
    ));
    let (open_tx, open_rx) = watch::channel(false);
    let entered = Arc::new(AtomicUsize::new(0));

    for n in 0..101 {
        let gated = Gated {
            open: open_rx.clone(),
            entered: entered.clone(),
        };
        let def = WorkflowDefinition::new(format!("wf-{n}"))
            .with_step(call("hold", Handler::new("gated", Arc::new(gated))));
        orchestrator.register(def).await.unwrap();
    }

    let mut runs = Vec::new();
    for n in 0..100 {
        let orchestrator = orchestrator.clone();
        runs.push(tokio::spawn(async move {
            orchestrator
                .execute(&format!("wf-{n}"), Value::Null, HashMap::new())
                .await
        }));
    }
    wait_until(|| entered.load(Ordering::SeqCst) == 100).await;
    assert_eq!(orchestrator.active_count(), 100);

    let err = orchestrator
        .execute("wf-100", Value::Null, HashMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ConcurrencyLimitExceeded { limit: 100 }));
    assert!(err.is_transient());

    open_tx.send(true).unwrap();
    for run in runs {
        assert_eq!(run.await.unwrap().unwrap().status, RunStatus::Completed);
    }
    assert_eq!(orchestrator.active_count(), 0);

    let result = orchestrator
        .execute("wf-100", Value::Null, HashMap::new())
        .await
        .unwrap();
    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(orchestrator.stats().completed_workflows, 101);
}

#[tokio::test]
async fn test_cancel_keeps_in_flight_result() {
    init_tracing();
    let orchestrator = Arc::new(Orchestrator::new());
    let (open_tx, open_rx) = watch::channel(false);
    let entered = Arc::new(AtomicUsize::new(0));
    let gated = Gated {
        open: open_rx,
        entered: entered.clone(),
    };

    let def = WorkflowDefinition::new("slow")
        .with_step(call("long", Handler::new("gated", Arc::new(gated))))
        .with_step(echo("after").depends_on(["long"]));
    orchestrator.register(def).await.unwrap();

    let mut rx = orchestrator.subscribe();
    let run = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .execute("slow", Value::from("payload"), HashMap::new())
                .await
        })
    };
    wait_until(|| entered.load(Ordering::SeqCst) == 1).await;

    let run_id = orchestrator.active_runs()[0].run_id;
    assert!(orchestrator.cancel(run_id));
    assert!(orchestrator.active_runs().is_empty());
    assert!(!orchestrator.cancel(run_id));

    open_tx.send(true).unwrap();
    let result = run.await.unwrap().unwrap();

    assert_eq!(result.status, RunStatus::Cancelled);
    assert_eq!(result.step_status("long"), Some(StepStatus::Completed));
    assert_eq!(
        result.step("long").unwrap().output,
        Some(Value::from("payload"))
    );
    assert_eq!(result.step_status("after"), Some(StepStatus::Cancelled));

    let names: Vec<_> = drain(&mut rx).iter().map(|e| e.name()).collect();
    assert!(names.contains(&"workflow.cancelled"));
    assert!(!names.contains(&"workflow.completed"));
    assert_eq!(orchestrator.stats().cancelled_workflows, 1);
}

#[tokio::test]
async fn test_cancel_after_settle_is_rejected() {
    let orchestrator = Orchestrator::new();
    orchestrator
        .register(WorkflowDefinition::new("quick").with_step(echo("a")))
        .await
        .unwrap();

    let mut rx = orchestrator.subscribe();
    let result = orchestrator
        .execute("quick", Value::Null, HashMap::new())
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert!(!orchestrator.cancel(result.run_id));

    let names: Vec<_> = drain(&mut rx).iter().map(|e| e.name()).collect();
    assert!(!names.contains(&"workflow.cancelled"));
    assert_eq!(orchestrator.stats().cancelled_workflows, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_cancel_settles_each_run_once() {
    const RUNS: usize = 2_000;
    let orchestrator = Arc::new(Orchestrator::with_config(
        OrchestratorConfig::default().with_event_buffer_size(RUNS * 8),
    ));

    // The step fires a cancel for its own run after a varying spin, so the
    // cancel lands anywhere from mid-step to after the run has finished
    let spins = Arc::new(AtomicUsize::new(0));
    let canceller = {
        let orchestrator = Arc::downgrade(&orchestrator);
        Handler::from_fn("cancel-self", move |ctx, input| {
            let run_id = ctx.run_id();
            let spin = Duration::from_micros((spins.fetch_add(1, Ordering::SeqCst) % 400) as u64);
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move {
                let start = std::time::Instant::now();
                while start.elapsed() < spin {
                    std::hint::spin_loop();
                }
                if let Some(orchestrator) = orchestrator.upgrade() {
                    orchestrator.cancel(run_id);
                }
            });
            Ok(input)
        })
    };
    orchestrator
        .register(WorkflowDefinition::new("racy").with_step(call("a", canceller)))
        .await
        .unwrap();

    let mut rx = orchestrator.subscribe();
    let mut results = Vec::new();
    for _ in 0..RUNS {
        results.push(
            orchestrator
                .execute("racy", Value::Null, HashMap::new())
                .await
                .unwrap(),
        );
    }
    // Let the trailing cancel tasks finish
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut terminal: HashMap<_, Vec<&'static str>> = HashMap::new();
    for event in drain(&mut rx) {
        if matches!(
            event.name(),
            "workflow.completed" | "workflow.failed" | "workflow.cancelled"
        ) {
            terminal.entry(event.run_id()).or_default().push(event.name());
        }
    }

    for result in &results {
        let expected = match result.status {
            RunStatus::Completed => "workflow.completed",
            RunStatus::Cancelled => "workflow.cancelled",
            other => panic!("unexpected status {other:?}"),
        };
        assert_eq!(terminal.get(&result.run_id), Some(&vec![expected]));
    }

    let stats = orchestrator.stats();
    let completed = results
        .iter()
        .filter(|r| r.status == RunStatus::Completed)
        .count() as u64;
    assert_eq!(stats.completed_workflows, completed);
    assert_eq!(stats.cancelled_workflows, RUNS as u64 - completed);
    assert_eq!(stats.active_runs, 0);
}

#[tokio::test]
async fn test_replacing_definition_leaves_in_flight_run_alone() {
    let orchestrator = Arc::new(Orchestrator::new());
    let (open_tx, open_rx) = watch::channel(false);
    let entered = Arc::new(AtomicUsize::new(0));
    let gated = Gated {
        open: open_rx,
        entered: entered.clone(),
    };

    orchestrator
        .register(
            WorkflowDefinition::new("wf")
                .with_step(call("hold", Handler::new("gated", Arc::new(gated))))
                .with_step(echo("old_tail").depends_on(["hold"])),
        )
        .await
        .unwrap();

    let run = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .execute("wf", Value::from("v1"), HashMap::new())
                .await
        })
    };
    wait_until(|| entered.load(Ordering::SeqCst) == 1).await;

    let replaced = orchestrator
        .register(WorkflowDefinition::new("wf").with_step(echo("new")))
        .await
        .unwrap();
    assert_eq!(replaced.unwrap().steps.len(), 2);

    open_tx.send(true).unwrap();
    let result = run.await.unwrap().unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.step_results.len(), 2);
    assert_eq!(result.step_status("hold"), Some(StepStatus::Completed));
    assert_eq!(result.step_status("old_tail"), Some(StepStatus::Completed));
    assert_eq!(result.step_status("new"), None);

    let fresh = orchestrator
        .execute("wf", Value::from("v2"), HashMap::new())
        .await
        .unwrap();
    assert_eq!(fresh.step_results.len(), 1);
    assert_eq!(fresh.step_status("new"), Some(StepStatus::Completed));
    assert_eq!(fresh.output, Some(Value::from("v2")));
}

#[tokio::test]
async fn test_unknown_workflow_is_definition_error() {
    let orchestrator = Orchestrator::new();
    let err = orchestrator
        .execute("missing", Value::Null, HashMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::DefinitionNotFound(id) if id == "missing"));
    assert_eq!(orchestrator.stats().total_workflows, 0);
}

#[tokio::test]
async fn test_register_validates_structure_and_replaces() {
    let orchestrator = Orchestrator::new();

    let err = orchestrator
        .register(WorkflowDefinition::new("bad").with_step(echo("a").depends_on(["ghost"])))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Workflow(WorkflowError::UnknownDependency { .. })
    ));

    let empty = orchestrator
        .register(WorkflowDefinition::new("empty"))
        .await
        .unwrap_err();
    assert!(matches!(empty, EngineError::Workflow(WorkflowError::EmptyWorkflow)));

    let first = orchestrator
        .register(WorkflowDefinition::new("wf").with_step(echo("a")))
        .await
        .unwrap();
    assert!(first.is_none());

    let replaced = orchestrator
        .register(WorkflowDefinition::new("wf").with_step(echo("a")).with_step(echo("b")))
        .await
        .unwrap();
    assert_eq!(replaced.unwrap().steps.len(), 1);
    assert_eq!(orchestrator.get_workflow("wf").await.unwrap().steps.len(), 2);
    assert_eq!(orchestrator.list_workflows().await.len(), 1);

    assert!(orchestrator.unregister("wf").await.is_some());
    assert!(orchestrator.get_workflow("wf").await.is_none());
}

#[tokio::test]
async fn test_output_prefers_explicit_value() {
    let orchestrator = Orchestrator::new();
    let def = WorkflowDefinition::new("out")
        .with_step(call(
            "publish",
            Handler::from_fn("publish", |ctx, input| {
                ctx.set_output(Value::from("explicit"));
                Ok(input)
            }),
        ))
        .with_step(echo("last").depends_on(["publish"]));
    orchestrator.register(def).await.unwrap();

    let result = orchestrator
        .execute("out", Value::from("in"), HashMap::new())
        .await
        .unwrap();
    assert_eq!(result.output, Some(Value::from("explicit")));

    let def = WorkflowDefinition::new("implicit")
        .with_step(echo("a"))
        .with_step(call("b", Handler::from_fn("b", |_, _| Ok(Value::from("from-b")))).depends_on(["a"]));
    orchestrator.register(def).await.unwrap();
    let result = orchestrator
        .execute("implicit", Value::from("in"), HashMap::new())
        .await
        .unwrap();
    assert_eq!(result.output, Some(Value::from("from-b")));
}

#[tokio::test]
async fn test_stats_track_finalized_runs() {
    let orchestrator = Orchestrator::new();
    orchestrator
        .register(WorkflowDefinition::new("ok").with_step(echo("a")))
        .await
        .unwrap();
    orchestrator
        .register(WorkflowDefinition::new("bad").with_step(failing("a")))
        .await
        .unwrap();

    for _ in 0..3 {
        orchestrator
            .execute("ok", Value::Null, HashMap::new())
            .await
            .unwrap();
    }
    orchestrator
        .execute("bad", Value::Null, HashMap::new())
        .await
        .unwrap();

    let stats = orchestrator.stats();
    assert_eq!(stats.total_workflows, 4);
    assert_eq!(stats.completed_workflows, 3);
    assert_eq!(stats.failed_workflows, 1);
    assert_eq!(stats.success_rate, 0.75);
    assert_eq!(stats.error_rate, 0.25);
    assert!(stats.p99_latency_ms >= stats.p50_latency_ms);
    assert!(stats.throughput_per_sec > 0.0);
}
