use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use weavecore::{
    Capability, CapabilityRef, Handler, KindDocument, RouteArm, StepDocument, StepError,
    StepKind, Value, WorkflowDefinition, WorkflowDocument, WorkflowError, WorkflowStep,
};

/// Factory trait for creating capability instances
pub trait CapabilityFactory: Send + Sync {
    /// Create a capability from the per-step configuration
    fn create(&self, config: &HashMap<String, Value>) -> Result<Arc<dyn Capability>, StepError>;

    /// Registered name, e.g. `math.sum`
    fn name(&self) -> &str;

    fn metadata(&self) -> CapabilityMetadata {
        CapabilityMetadata::default()
    }
}

/// Metadata about a capability
#[derive(Debug, Clone, serde::Serialize)]
pub struct CapabilityMetadata {
    pub description: String,
    pub category: String,
}

impl Default for CapabilityMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
        }
    }
}

impl CapabilityMetadata {
    pub fn new(category: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            category: category.into(),
        }
    }
}

/// Factory handing out one shared instance regardless of config
struct SharedCapability {
    name: String,
    capability: Arc<dyn Capability>,
    metadata: CapabilityMetadata,
}

impl CapabilityFactory for SharedCapability {
    fn create(&self, _config: &HashMap<String, Value>) -> Result<Arc<dyn Capability>, StepError> {
        Ok(self.capability.clone())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn metadata(&self) -> CapabilityMetadata {
        self.metadata.clone()
    }
}

/// Registry of named capabilities, used to turn workflow documents into
/// executable definitions
pub struct CapabilityRegistry {
    factories: HashMap<String, Arc<dyn CapabilityFactory>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a capability factory
    pub fn register(&mut self, factory: Arc<dyn CapabilityFactory>) {
        let name = factory.name().to_string();
        tracing::info!("Registering capability: {}", name);
        self.factories.insert(name, factory);
    }

    /// Register a ready-made capability shared by every step that names it
    pub fn register_capability(
        &mut self,
        name: impl Into<String>,
        metadata: CapabilityMetadata,
        capability: Arc<dyn Capability>,
    ) {
        self.register(Arc::new(SharedCapability {
            name: name.into(),
            capability,
            metadata,
        }));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Create a handler from a capability reference
    pub fn create(&self, reference: &CapabilityRef) -> Result<Handler, WorkflowError> {
        let factory = self
            .factories
            .get(&reference.name)
            .ok_or_else(|| WorkflowError::UnknownCapability(reference.name.clone()))?;

        let capability = factory.create(&reference.config).map_err(|e| {
            WorkflowError::Invalid(format!(
                "Failed to create capability '{}': {}",
                reference.name, e
            ))
        })?;
        Ok(Handler::new(reference.name.clone(), capability))
    }

    /// All registered capability names, sorted
    pub fn list_capabilities(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn get_metadata(&self, name: &str) -> Option<CapabilityMetadata> {
        self.factories.get(name).map(|f| f.metadata())
    }

    /// Build an executable definition from a document. Fails on the first
    /// capability name that is not registered.
    pub fn build(&self, document: &WorkflowDocument) -> Result<WorkflowDefinition, WorkflowError> {
        let steps = document
            .steps
            .iter()
            .map(|step| self.build_step(step))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(WorkflowDefinition {
            id: document.id.clone(),
            name: document.name.clone().unwrap_or_else(|| document.id.clone()),
            description: document.description.clone(),
            steps,
            default_timeout: document.default_timeout_ms.map(Duration::from_millis),
            on_error: document.on_error,
            metadata: document.metadata.clone(),
        })
    }

    fn build_step(&self, doc: &StepDocument) -> Result<WorkflowStep, WorkflowError> {
        let kind = match &doc.kind {
            KindDocument::Transform { capability } => StepKind::Transform {
                handler: self.create(capability)?,
            },
            KindDocument::Route { routes } => StepKind::Route {
                routes: routes
                    .iter()
                    .map(|route| {
                        Ok(RouteArm {
                            when: route.when.clone(),
                            handler: self.create(&route.capability)?,
                        })
                    })
                    .collect::<Result<Vec<_>, WorkflowError>>()?,
            },
            KindDocument::Filter { predicate } => StepKind::Filter {
                predicate: predicate.clone(),
            },
            KindDocument::Aggregate { capability } => StepKind::Aggregate {
                handler: self.create(capability)?,
            },
            KindDocument::Split { capability } => StepKind::Split {
                handler: self.create(capability)?,
            },
            KindDocument::Enrich { capability } => StepKind::Enrich {
                handler: self.create(capability)?,
            },
            KindDocument::Validate { rule, message } => StepKind::Validate {
                rule: rule.clone(),
                message: message.clone(),
            },
            KindDocument::Call { capability } => StepKind::Call {
                capability: self.create(capability)?,
            },
            KindDocument::Parallel { steps } => StepKind::Parallel {
                steps: steps
                    .iter()
                    .map(|sub| self.build_step(sub))
                    .collect::<Result<Vec<_>, _>>()?,
            },
            KindDocument::Conditional {
                condition,
                then,
                otherwise,
            } => StepKind::Conditional {
                condition: condition.clone(),
                then_step: Box::new(self.build_step(then)?),
                else_step: match otherwise {
                    Some(sub) => Some(Box::new(self.build_step(sub)?)),
                    None => None,
                },
            },
            KindDocument::Loop {
                condition,
                body,
                max_iterations,
            } => StepKind::Loop {
                condition: condition.clone(),
                body: Box::new(self.build_step(body)?),
                max_iterations: *max_iterations,
            },
        };

        let on_error = match &doc.on_error {
            Some(reference) => Some(self.create(reference)?),
            None => None,
        };

        Ok(WorkflowStep {
            id: doc.id.clone(),
            kind,
            depends_on: doc.depends_on.clone(),
            condition: doc.condition.clone(),
            input: doc.input.clone(),
            output_var: doc.output_var.clone(),
            timeout: doc.timeout_ms.map(Duration::from_millis),
            retries: doc.retries,
            on_error,
            metadata: doc.metadata.clone(),
        })
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}
