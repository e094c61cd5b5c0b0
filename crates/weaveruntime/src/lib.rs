//! Workflow execution runtime
//!
//! This crate provides the orchestrator that admits and drives workflow runs,
//! the step dispatcher, dependency resolution, statistics, and the capability
//! registry that turns workflow documents into executable definitions.

mod config;
mod dispatcher;
mod loader;
mod orchestrator;
mod registry;
pub mod resolver;
mod stats;

pub use config::OrchestratorConfig;
pub use dispatcher::{resolve_input, StepDispatcher};
pub use loader::WorkflowLoader;
pub use orchestrator::{Orchestrator, RunInfo};
pub use registry::{CapabilityFactory, CapabilityMetadata, CapabilityRegistry};
pub use resolver::DependencyGraph;
pub use stats::{OrchestratorStats, StatisticsTracker};
