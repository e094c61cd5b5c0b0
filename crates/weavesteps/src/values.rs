use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use weavecore::{Capability, StepContext, StepError, Value};
use weaveruntime::{CapabilityFactory, CapabilityMetadata};

/// Ignores its input and returns a configured value
pub struct Constant {
    value: Value,
}

#[async_trait]
impl Capability for Constant {
    async fn invoke(&self, _ctx: &StepContext<'_>, _input: Value) -> Result<Value, StepError> {
        Ok(self.value.clone())
    }
}

/// Stores its input in a run variable and passes it through
pub struct SetVariable {
    name: String,
}

#[async_trait]
impl Capability for SetVariable {
    async fn invoke(&self, ctx: &StepContext<'_>, input: Value) -> Result<Value, StepError> {
        if ctx.set_variable(self.name.clone(), input.clone()).is_some() {
            tracing::debug!("Step {} overwrote variable {}", ctx.step_id(), self.name);
        }
        Ok(input)
    }
}

pub struct ConstantFactory;

impl CapabilityFactory for ConstantFactory {
    fn create(&self, config: &HashMap<String, Value>) -> Result<Arc<dyn Capability>, StepError> {
        let value = config.get("value").cloned().unwrap_or_default();
        Ok(Arc::new(Constant { value }))
    }

    fn name(&self) -> &str {
        "value.constant"
    }

    fn metadata(&self) -> CapabilityMetadata {
        CapabilityMetadata::new("value", "Return the configured value")
    }
}

pub struct SetVariableFactory;

impl CapabilityFactory for SetVariableFactory {
    fn create(&self, config: &HashMap<String, Value>) -> Result<Arc<dyn Capability>, StepError> {
        let name = config
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| StepError::Configuration("vars.set requires a 'name'".to_string()))?;
        Ok(Arc::new(SetVariable {
            name: name.to_string(),
        }))
    }

    fn name(&self) -> &str {
        "vars.set"
    }

    fn metadata(&self) -> CapabilityMetadata {
        CapabilityMetadata::new("value", "Store the input in a run variable")
    }
}
