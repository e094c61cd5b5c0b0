// crates/weavecore/src/events/mod.rs

mod base;

pub use base::{EventBus, EventEmitter, ExecutionEvent, StepEvent};
