//! Core abstractions for the weave workflow engine
//!
//! This crate provides the data model every other component depends on:
//! workflow definitions and step kinds, the capability contract, the run
//! context, result records and the event stream. It contains no scheduling
//! logic.

mod capability;
mod condition;
mod context;
pub mod document;
mod error;
pub mod events;
mod result;
mod value;
mod workflow;

pub use capability::{Capability, FnCapability, StepContext};
pub use condition::{Condition, Predicate};
pub use context::WorkflowContext;
pub use document::{CapabilityRef, KindDocument, RouteDocument, StepDocument, WorkflowDocument};
pub use error::{EngineError, StepError, WorkflowError};
pub use events::*;
pub use result::{RunStatus, StepExecutionResult, StepStatus, WorkflowExecutionResult};
pub use value::Value;
pub use workflow::{
    ErrorPolicy, Handler, InputSource, RouteArm, RunId, StepId, StepKind, WorkflowDefinition,
    WorkflowId, WorkflowStep,
};

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
