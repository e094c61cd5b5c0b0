use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use weavecore::{Capability, StepContext, StepError, Value};
use weaveruntime::{CapabilityFactory, CapabilityMetadata};

/// Number of elements in an array or entries in an object
pub struct Count;

#[async_trait]
impl Capability for Count {
    async fn invoke(&self, _ctx: &StepContext<'_>, input: Value) -> Result<Value, StepError> {
        match &input {
            Value::Array(items) => Ok(Value::from(items.len())),
            Value::Object(entries) => Ok(Value::from(entries.len())),
            other => Err(StepError::invalid_input("array or object", other.type_name())),
        }
    }
}

/// Flattens one level of nesting: `[[1, 2], 3]` becomes `[1, 2, 3]`
pub struct Flatten;

#[async_trait]
impl Capability for Flatten {
    async fn invoke(&self, _ctx: &StepContext<'_>, input: Value) -> Result<Value, StepError> {
        let Value::Array(items) = input else {
            return Err(StepError::invalid_input("array", input.type_name()));
        };

        let mut flat = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Value::Array(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        Ok(Value::Array(flat))
    }
}

pub struct CountFactory;

impl CapabilityFactory for CountFactory {
    fn create(&self, _config: &HashMap<String, Value>) -> Result<Arc<dyn Capability>, StepError> {
        Ok(Arc::new(Count))
    }

    fn name(&self) -> &str {
        "collection.count"
    }

    fn metadata(&self) -> CapabilityMetadata {
        CapabilityMetadata::new("collection", "Count array elements or object entries")
    }
}

pub struct FlattenFactory;

impl CapabilityFactory for FlattenFactory {
    fn create(&self, _config: &HashMap<String, Value>) -> Result<Arc<dyn Capability>, StepError> {
        Ok(Arc::new(Flatten))
    }

    fn name(&self) -> &str {
        "collection.flatten"
    }

    fn metadata(&self) -> CapabilityMetadata {
        CapabilityMetadata::new("collection", "Flatten nested arrays by one level")
    }
}
