//! # Natshift Workflow Engine
//!
//! A typed step-graph interpreter for orchestration workflows.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      WorkflowRuntime                        │
//! │  (registers definitions, starts/awaits/lists executions)    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Engine                             │
//! │  (drives a StepGraph over a typed context, snapshots steps) │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ExecutionStore                         │
//! │  (execution records: status, cursor, context snapshots)     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each execution runs as one logical task. Concurrency exists only
//! inside `Map` (bounded fan-out) and `Parallel` (fixed branches) steps.
//! Failures bubble to the nearest catch; cancellation is expressed only
//! as timeout expiry.

pub mod engine;
pub mod fault;
pub mod graph;
pub mod registry;
pub mod runtime;
pub mod step;
pub mod store;
pub mod trigger;

pub use engine::{Engine, EngineError};
pub use fault::{FailureCause, FailureKind};
pub use graph::{DefinitionError, StepGraph};
pub use registry::ExecutionRegistry;
pub use runtime::{GraphDefinition, RuntimeError, WorkflowDefinition, WorkflowRuntime};
pub use step::{
    no_change, patch, ChoiceStep, ContextPatch, FailStep, FanOutAction, ItemAction, MapOver,
    MapStep, ParallelStep, PassStep, Step, TaskAction, TaskStep, WaitStep, WorkflowContext,
};
pub use store::{
    ExecutionRecord, ExecutionStatus, ExecutionStore, InMemoryExecutionStore, StoreError,
};
pub use trigger::SyncTrigger;
