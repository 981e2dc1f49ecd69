//! # Natshift Workflows
//!
//! The four NAT orchestration workflows, wired over the step-graph
//! engine:
//!
//! | Workflow          | Trigger              | Effect                                      |
//! |-------------------|----------------------|---------------------------------------------|
//! | `nat-failover`    | health alarm, parent | all zone routes onto standby gateways       |
//! | `nat-replacement` | operator, parent     | fresh NAT fleet from the newest image       |
//! | `nat-fallback`    | operator, parent     | zone routes back onto running NAT instances |
//! | `nat-maintenance` | schedule             | image rebuild, then replacement + fallback  |
//!
//! [`Orchestrator`] loads the zone topology, registers all four
//! definitions on one runtime, and exposes the external entry points.

pub mod config;
pub mod failover;
pub mod fallback;
pub mod maintenance;
pub mod orchestrator;
pub mod replacement;

mod invoke;

pub use config::OrchestratorConfig;
pub use orchestrator::{Orchestrator, OrchestratorError, Providers};
