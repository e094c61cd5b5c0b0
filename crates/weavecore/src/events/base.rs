use crate::{RunId, StepId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Lifecycle events emitted during workflow execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionEvent {
    #[serde(rename = "workflow.started")]
    WorkflowStarted {
        run_id: RunId,
        workflow_id: WorkflowId,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "workflow.completed")]
    WorkflowCompleted {
        run_id: RunId,
        workflow_id: WorkflowId,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "workflow.failed")]
    WorkflowFailed {
        run_id: RunId,
        workflow_id: WorkflowId,
        error: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "workflow.cancelled")]
    WorkflowCancelled {
        run_id: RunId,
        workflow_id: WorkflowId,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "step.started")]
    StepStarted {
        run_id: RunId,
        step_id: StepId,
        kind: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "step.completed")]
    StepCompleted {
        run_id: RunId,
        step_id: StepId,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "step.failed")]
    StepFailed {
        run_id: RunId,
        step_id: StepId,
        error: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "step.skipped")]
    StepSkipped {
        run_id: RunId,
        step_id: StepId,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "step.event")]
    StepEvent {
        run_id: RunId,
        step_id: StepId,
        event: StepEvent,
        timestamp: DateTime<Utc>,
    },
}

impl ExecutionEvent {
    /// Dotted event name, identical to the serialized `type` tag
    pub fn name(&self) -> &'static str {
        match self {
            ExecutionEvent::WorkflowStarted { .. } => "workflow.started",
            ExecutionEvent::WorkflowCompleted { .. } => "workflow.completed",
            ExecutionEvent::WorkflowFailed { .. } => "workflow.failed",
            ExecutionEvent::WorkflowCancelled { .. } => "workflow.cancelled",
            ExecutionEvent::StepStarted { .. } => "step.started",
            ExecutionEvent::StepCompleted { .. } => "step.completed",
            ExecutionEvent::StepFailed { .. } => "step.failed",
            ExecutionEvent::StepSkipped { .. } => "step.skipped",
            ExecutionEvent::StepEvent { .. } => "step.event",
        }
    }

    pub fn run_id(&self) -> RunId {
        match self {
            ExecutionEvent::WorkflowStarted { run_id, .. }
            | ExecutionEvent::WorkflowCompleted { run_id, .. }
            | ExecutionEvent::WorkflowFailed { run_id, .. }
            | ExecutionEvent::WorkflowCancelled { run_id, .. }
            | ExecutionEvent::StepStarted { run_id, .. }
            | ExecutionEvent::StepCompleted { run_id, .. }
            | ExecutionEvent::StepFailed { run_id, .. }
            | ExecutionEvent::StepSkipped { run_id, .. }
            | ExecutionEvent::StepEvent { run_id, .. } => *run_id,
        }
    }

    pub fn step_id(&self) -> Option<&str> {
        match self {
            ExecutionEvent::StepStarted { step_id, .. }
            | ExecutionEvent::StepCompleted { step_id, .. }
            | ExecutionEvent::StepFailed { step_id, .. }
            | ExecutionEvent::StepSkipped { step_id, .. }
            | ExecutionEvent::StepEvent { step_id, .. } => Some(step_id),
            _ => None,
        }
    }
}

/// Events a capability emits while it runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum StepEvent {
    Info { message: String },
    Warning { message: String },
    Progress { percent: f64, message: Option<String> },
}

/// Event emitter handed to capabilities for real-time updates
#[derive(Clone, Debug)]
pub struct EventEmitter {
    run_id: RunId,
    step_id: StepId,
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventEmitter {
    pub fn new(run_id: RunId, step_id: StepId, sender: broadcast::Sender<ExecutionEvent>) -> Self {
        Self {
            run_id,
            step_id,
            sender,
        }
    }

    /// Emit a step-specific event
    pub fn emit(&self, event: StepEvent) {
        let _ = self.sender.send(ExecutionEvent::StepEvent {
            run_id: self.run_id,
            step_id: self.step_id.clone(),
            event,
            timestamp: Utc::now(),
        });
    }

    /// Emit info message
    pub fn info(&self, message: impl Into<String>) {
        self.emit(StepEvent::Info {
            message: message.into(),
        });
    }

    /// Emit warning message
    pub fn warn(&self, message: impl Into<String>) {
        self.emit(StepEvent::Warning {
            message: message.into(),
        });
    }

    /// Emit progress update
    pub fn progress(&self, percent: f64, message: Option<String>) {
        self.emit(StepEvent::Progress { percent, message });
    }
}

/// Process-wide event bus owned by the orchestrator.
///
/// Delivery is best-effort: events sent while nobody is subscribed, or that a
/// lagging receiver misses, are dropped.
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn create_emitter(&self, run_id: RunId, step_id: impl Into<StepId>) -> EventEmitter {
        EventEmitter::new(run_id, step_id.into(), self.sender.clone())
    }
}
