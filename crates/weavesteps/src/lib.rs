//! Standard capability library
//!
//! Collection of built-in capabilities for common operations

mod collection;
mod debug;
mod http;
mod math;
mod time;
mod transform;
mod values;

pub use collection::{Count, CountFactory, Flatten, FlattenFactory};
pub use debug::{DebugLog, DebugLogFactory};
pub use http::{HttpRequest, HttpRequestFactory};
pub use math::{Average, AverageFactory, Increment, IncrementFactory, Sum, SumFactory};
pub use time::{Delay, DelayFactory};
pub use transform::{JsonParse, JsonParseFactory, JsonStringify, JsonStringifyFactory};
pub use values::{Constant, ConstantFactory, SetVariable, SetVariableFactory};
use weaveruntime::CapabilityRegistry;

use std::sync::Arc;

/// Register all standard capabilities with a registry
pub fn register_all(registry: &mut CapabilityRegistry) {
    registry.register(Arc::new(collection::CountFactory));
    registry.register(Arc::new(collection::FlattenFactory));
    registry.register(Arc::new(debug::DebugLogFactory));
    registry.register(Arc::new(http::HttpRequestFactory));
    registry.register(Arc::new(math::AverageFactory));
    registry.register(Arc::new(math::IncrementFactory));
    registry.register(Arc::new(math::SumFactory));
    registry.register(Arc::new(time::DelayFactory));
    registry.register(Arc::new(transform::JsonParseFactory));
    registry.register(Arc::new(transform::JsonStringifyFactory));
    registry.register(Arc::new(values::ConstantFactory));
    registry.register(Arc::new(values::SetVariableFactory));
}

/// A registry preloaded with the standard capabilities
pub fn standard_registry() -> CapabilityRegistry {
    let mut registry = CapabilityRegistry::new();
    register_all(&mut registry);
    registry
}
