use crate::{Capability, Condition, StepContext, StepError, Value, WorkflowError};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub type WorkflowId = String;
pub type StepId = String;
pub type RunId = Uuid;

/// Named, shareable capability handle carried by a step's configuration
#[derive(Clone)]
pub struct Handler {
    name: String,
    capability: Arc<dyn Capability>,
}

impl Handler {
    pub fn new(name: impl Into<String>, capability: Arc<dyn Capability>) -> Self {
        Self {
            name: name.into(),
            capability,
        }
    }

    /// Wrap a synchronous closure as a capability
    pub fn from_fn<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&StepContext<'_>, Value) -> Result<Value, StepError> + Send + Sync + 'static,
    {
        Self::new(name, Arc::new(crate::capability::FnCapability::new(f)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capability(&self) -> &Arc<dyn Capability> {
        &self.capability
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handler").field(&self.name).finish()
    }
}

/// One guarded arm of a route step
#[derive(Debug, Clone)]
pub struct RouteArm {
    pub when: Condition,
    pub handler: Handler,
}

/// The fixed set of step kinds, each with its own configuration
#[derive(Debug, Clone)]
pub enum StepKind {
    /// Pure input to output mapping
    Transform { handler: Handler },
    /// First arm whose condition holds handles the input; passthrough if none match
    Route { routes: Vec<RouteArm> },
    /// Keep collection elements (bound as `item`) matching the predicate
    Filter { predicate: Condition },
    /// Many to one over a collection input
    Aggregate { handler: Handler },
    /// One to many; the handler result is always returned as a collection
    Split { handler: Handler },
    /// Merge a side lookup into the input
    Enrich { handler: Handler },
    /// Fail the step unless the rule holds for the input (bound as `value`)
    Validate {
        rule: Condition,
        message: Option<String>,
    },
    /// Externally supplied capability
    Call { capability: Handler },
    /// Nested steps run concurrently, outputs collected in declaration order
    Parallel { steps: Vec<WorkflowStep> },
    Conditional {
        condition: Condition,
        then_step: Box<WorkflowStep>,
        else_step: Option<Box<WorkflowStep>>,
    },
    /// Re-dispatch `body` while `condition` holds, collecting each iteration's output
    Loop {
        condition: Condition,
        body: Box<WorkflowStep>,
        max_iterations: Option<usize>,
    },
}

impl StepKind {
    pub fn name(&self) -> &'static str {
        match self {
            StepKind::Transform { .. } => "transform",
            StepKind::Route { .. } => "route",
            StepKind::Filter { .. } => "filter",
            StepKind::Aggregate { .. } => "aggregate",
            StepKind::Split { .. } => "split",
            StepKind::Enrich { .. } => "enrich",
            StepKind::Validate { .. } => "validate",
            StepKind::Call { .. } => "call",
            StepKind::Parallel { .. } => "parallel",
            StepKind::Conditional { .. } => "conditional",
            StepKind::Loop { .. } => "loop",
        }
    }
}

/// Where a step reads its input from
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "from", content = "key", rename_all = "snake_case")]
pub enum InputSource {
    /// No dependencies: workflow input. One: that step's output.
    /// Several: an object keyed by dependency id.
    #[default]
    Auto,
    Workflow,
    Step(StepId),
    Variable(String),
    Literal(Value),
}

/// Step specification in a workflow
#[derive(Debug, Clone)]
pub struct WorkflowStep {
    pub id: StepId,
    pub kind: StepKind,
    pub depends_on: Vec<StepId>,
    pub condition: Option<Condition>,
    pub input: InputSource,
    pub output_var: Option<String>,
    pub timeout: Option<Duration>,
    pub retries: u32,
    pub on_error: Option<Handler>,
    pub metadata: HashMap<String, Value>,
}

impl WorkflowStep {
    pub fn new(id: impl Into<StepId>, kind: StepKind) -> Self {
        Self {
            id: id.into(),
            kind,
            depends_on: Vec::new(),
            condition: None,
            input: InputSource::Auto,
            output_var: None,
            timeout: None,
            retries: 0,
            on_error: None,
            metadata: HashMap::new(),
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StepId>,
    {
        for dep in deps {
            let dep = dep.into();
            if !self.depends_on.contains(&dep) {
                self.depends_on.push(dep);
            }
        }
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_input(mut self, input: InputSource) -> Self {
        self.input = input;
        self
    }

    pub fn with_output_var(mut self, name: impl Into<String>) -> Self {
        self.output_var = Some(name.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_error_handler(mut self, handler: Handler) -> Self {
        self.on_error = Some(handler);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// How a run reacts to a failed step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Stop scheduling new steps on the first failure
    #[default]
    StopWorkflow,
    /// Keep running branches that do not depend on a failed step
    ContinueOnError,
}

/// Complete workflow definition, immutable once registered
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    pub id: WorkflowId,
    pub name: String,
    pub description: Option<String>,
    pub steps: Vec<WorkflowStep>,
    pub default_timeout: Option<Duration>,
    pub on_error: ErrorPolicy,
    pub metadata: HashMap<String, Value>,
}

impl WorkflowDefinition {
    pub fn new(id: impl Into<WorkflowId>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: None,
            steps: Vec::new(),
            default_timeout: None,
            on_error: ErrorPolicy::default(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.on_error = policy;
        self
    }

    pub fn add_step(&mut self, step: WorkflowStep) -> StepId {
        let id = step.id.clone();
        self.steps.push(step);
        id
    }

    pub fn find_step(&self, id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Steps no other step depends on, in definition order
    pub fn terminal_steps(&self) -> Vec<&WorkflowStep> {
        let depended_on: HashSet<&str> = self
            .steps
            .iter()
            .flat_map(|s| s.depends_on.iter().map(String::as_str))
            .collect();

        self.steps
            .iter()
            .filter(|s| !depended_on.contains(s.id.as_str()))
            .collect()
    }

    /// Structural checks: at least one step, unique ids, known dependencies.
    ///
    /// Acyclicity is checked separately by the dependency resolver.
    pub fn validate_structure(&self) -> Result<(), WorkflowError> {
        if self.steps.is_empty() {
            return Err(WorkflowError::EmptyWorkflow);
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.id.as_str()) {
                return Err(WorkflowError::DuplicateStep(step.id.clone()));
            }
        }

        for step in &self.steps {
            for dep in &step.depends_on {
                if !seen.contains(dep.as_str()) {
                    return Err(WorkflowError::UnknownDependency {
                        step: step.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}
