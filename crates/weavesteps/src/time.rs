use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use weavecore::{Capability, StepContext, StepError, Value};
use weaveruntime::{CapabilityFactory, CapabilityMetadata};

/// Wait for a fixed duration, then pass the input through.
///
/// Stops early with `Cancelled` when the run is cancelled and fails with
/// `Timeout` when the step's timeout is shorter than the delay.
pub struct Delay {
    duration: Duration,
}

impl Delay {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

#[async_trait]
impl Capability for Delay {
    async fn invoke(&self, ctx: &StepContext<'_>, input: Value) -> Result<Value, StepError> {
        ctx.events
            .info(format!("Delaying for {}ms", self.duration.as_millis()));

        let cancellation = ctx.cancellation().clone();
        ctx.within_timeout(async move {
            tokio::select! {
                _ = sleep(self.duration) => Ok(()),
                _ = cancellation.cancelled() => Err(StepError::Cancelled),
            }
        })
        .await?;

        Ok(input)
    }
}

pub struct DelayFactory;

impl CapabilityFactory for DelayFactory {
    fn create(&self, config: &HashMap<String, Value>) -> Result<Arc<dyn Capability>, StepError> {
        let delay_ms = match config.get("delay_ms") {
            None => 1000.0,
            Some(value) => value
                .as_f64()
                .filter(|ms| *ms >= 0.0)
                .ok_or_else(|| {
                    StepError::Configuration("delay_ms must be a non-negative number".to_string())
                })?,
        };
        Ok(Arc::new(Delay::new(Duration::from_millis(delay_ms as u64))))
    }

    fn name(&self) -> &str {
        "time.delay"
    }

    fn metadata(&self) -> CapabilityMetadata {
        CapabilityMetadata::new("time", "Delay execution for the configured milliseconds")
    }
}
