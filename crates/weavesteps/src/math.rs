use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use weavecore::{Capability, StepContext, StepError, Value};
use weaveruntime::{CapabilityFactory, CapabilityMetadata};

/// Numbers of an array input; any non-numeric element is an input error
fn numbers(input: &Value) -> Result<Vec<f64>, StepError> {
    let items = input
        .as_array()
        .ok_or_else(|| StepError::invalid_input("array of numbers", input.type_name()))?;

    items
        .iter()
        .map(|item| {
            item.as_f64()
                .ok_or_else(|| StepError::invalid_input("number", item.type_name()))
        })
        .collect()
}

/// Sum of an array of numbers
pub struct Sum;

#[async_trait]
impl Capability for Sum {
    async fn invoke(&self, _ctx: &StepContext<'_>, input: Value) -> Result<Value, StepError> {
        Ok(Value::from(numbers(&input)?.iter().sum::<f64>()))
    }
}

/// Arithmetic mean of an array of numbers; `null` for an empty array
pub struct Average;

#[async_trait]
impl Capability for Average {
    async fn invoke(&self, _ctx: &StepContext<'_>, input: Value) -> Result<Value, StepError> {
        let values = numbers(&input)?;
        if values.is_empty() {
            return Ok(Value::Null);
        }
        Ok(Value::from(values.iter().sum::<f64>() / values.len() as f64))
    }
}

/// Adds a configured amount to a number
pub struct Increment {
    by: f64,
}

#[async_trait]
impl Capability for Increment {
    async fn invoke(&self, _ctx: &StepContext<'_>, input: Value) -> Result<Value, StepError> {
        let n = match &input {
            Value::Null => 0.0,
            other => other
                .as_f64()
                .ok_or_else(|| StepError::invalid_input("number", other.type_name()))?,
        };
        Ok(Value::from(n + self.by))
    }
}

pub struct SumFactory;

impl CapabilityFactory for SumFactory {
    fn create(&self, _config: &HashMap<String, Value>) -> Result<Arc<dyn Capability>, StepError> {
        Ok(Arc::new(Sum))
    }

    fn name(&self) -> &str {
        "math.sum"
    }

    fn metadata(&self) -> CapabilityMetadata {
        CapabilityMetadata::new("math", "Sum an array of numbers")
    }
}

pub struct AverageFactory;

impl CapabilityFactory for AverageFactory {
    fn create(&self, _config: &HashMap<String, Value>) -> Result<Arc<dyn Capability>, StepError> {
        Ok(Arc::new(Average))
    }

    fn name(&self) -> &str {
        "math.average"
    }

    fn metadata(&self) -> CapabilityMetadata {
        CapabilityMetadata::new("math", "Average an array of numbers")
    }
}

pub struct IncrementFactory;

impl CapabilityFactory for IncrementFactory {
    fn create(&self, config: &HashMap<String, Value>) -> Result<Arc<dyn Capability>, StepError> {
        let by = match config.get("by") {
            None => 1.0,
            Some(value) => value.as_f64().ok_or_else(|| {
                StepError::Configuration(format!("'by' must be a number, got {}", value.type_name()))
            })?,
        };
        Ok(Arc::new(Increment { by }))
    }

    fn name(&self) -> &str {
        "math.increment"
    }

    fn metadata(&self) -> CapabilityMetadata {
        CapabilityMetadata::new("math", "Add a configured amount (default 1) to a number")
    }
}
