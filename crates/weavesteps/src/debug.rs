use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use weavecore::{Capability, StepContext, StepError, Value};
use weaveruntime::{CapabilityFactory, CapabilityMetadata};

/// Logs its input as a step event and passes it through unchanged
pub struct DebugLog {
    label: Option<String>,
}

impl DebugLog {
    pub fn new(label: Option<String>) -> Self {
        Self { label }
    }
}

#[async_trait]
impl Capability for DebugLog {
    async fn invoke(&self, ctx: &StepContext<'_>, input: Value) -> Result<Value, StepError> {
        let label = self.label.as_deref().unwrap_or(ctx.step_id());
        let rendered = serde_json::to_string(&input).unwrap_or_else(|_| format!("{:?}", input));

        tracing::debug!("[{}] {}", label, rendered);
        ctx.events.info(format!("DEBUG {}: {}", label, rendered));

        Ok(input)
    }
}

pub struct DebugLogFactory;

impl CapabilityFactory for DebugLogFactory {
    fn create(&self, config: &HashMap<String, Value>) -> Result<Arc<dyn Capability>, StepError> {
        let label = config
            .get("label")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        Ok(Arc::new(DebugLog::new(label)))
    }

    fn name(&self) -> &str {
        "debug.log"
    }

    fn metadata(&self) -> CapabilityMetadata {
        CapabilityMetadata::new("debug", "Logs the input value for debugging")
    }
}
