use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use weavecore::{Capability, StepContext, StepError, Value};
use weaveruntime::{CapabilityFactory, CapabilityMetadata};

/// Parse a JSON string into a value
pub struct JsonParse;

#[async_trait]
impl Capability for JsonParse {
    async fn invoke(&self, _ctx: &StepContext<'_>, input: Value) -> Result<Value, StepError> {
        let text = input
            .as_str()
            .ok_or_else(|| StepError::invalid_input("string", input.type_name()))?;

        let parsed: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| StepError::Capability(format!("JSON parse error: {}", e)))?;

        Ok(Value::from(parsed))
    }
}

pub struct JsonParseFactory;

impl CapabilityFactory for JsonParseFactory {
    fn create(&self, _config: &HashMap<String, Value>) -> Result<Arc<dyn Capability>, StepError> {
        Ok(Arc::new(JsonParse))
    }

    fn name(&self) -> &str {
        "json.parse"
    }

    fn metadata(&self) -> CapabilityMetadata {
        CapabilityMetadata::new("transform", "Parse a JSON string")
    }
}

/// Render a value as a JSON string
pub struct JsonStringify {
    pretty: bool,
}

impl JsonStringify {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }
}

#[async_trait]
impl Capability for JsonStringify {
    async fn invoke(&self, _ctx: &StepContext<'_>, input: Value) -> Result<Value, StepError> {
        let rendered = if self.pretty {
            serde_json::to_string_pretty(&input)
        } else {
            serde_json::to_string(&input)
        };

        rendered
            .map(Value::from)
            .map_err(|e| StepError::Capability(format!("JSON stringify error: {}", e)))
    }
}

pub struct JsonStringifyFactory;

impl CapabilityFactory for JsonStringifyFactory {
    fn create(&self, config: &HashMap<String, Value>) -> Result<Arc<dyn Capability>, StepError> {
        let pretty = config
            .get("pretty")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        Ok(Arc::new(JsonStringify::new(pretty)))
    }

    fn name(&self) -> &str {
        "json.stringify"
    }

    fn metadata(&self) -> CapabilityMetadata {
        CapabilityMetadata::new("transform", "Convert a value to a JSON string")
    }
}
