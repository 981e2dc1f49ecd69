//! Step graph definition and validation
//!
//! A [`StepGraph`] is the static shape of one workflow: named states, a
//! start state, and an optional whole-execution timeout. Definition
//! problems (dangling transitions, a Choice without a default) are
//! rejected by [`StepGraph::validate`] before any execution starts, never
//! discovered at runtime.

use std::collections::HashMap;
use std::time::Duration;

use crate::step::Step;

/// Errors in a workflow definition
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DefinitionError {
    /// The declared start state has no step
    #[error("start state is not defined: {0}")]
    UnknownStart(String),

    /// A transition points at a state that does not exist
    #[error("state {from} transitions to undefined state {to}")]
    DanglingTransition { from: String, to: String },

    /// A Choice state has no default branch
    #[error("choice state {0} has no default branch")]
    ChoiceWithoutDefault(String),

    /// A Map state was configured with a zero concurrency bound
    #[error("map state {0} has a zero concurrency bound")]
    ZeroConcurrency(String),
}

/// Directed graph of named steps over a typed context
pub struct StepGraph<C: Send + Sync> {
    start: String,
    states: HashMap<String, Step<C>>,
    execution_timeout: Option<Duration>,
}

impl<C: Send + Sync> StepGraph<C> {
    /// Create an empty graph with the given start state
    pub fn new(start: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            states: HashMap::new(),
            execution_timeout: None,
        }
    }

    /// Add a named state
    pub fn state(mut self, name: impl Into<String>, step: Step<C>) -> Self {
        self.states.insert(name.into(), step);
        self
    }

    /// Bound the whole execution, independent of per-step timeouts
    ///
    /// Guards against stuck polling loops: exceeding the deadline fails
    /// the execution with a Timeout cause.
    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = Some(timeout);
        self
    }

    /// Name of the start state
    pub fn start(&self) -> &str {
        &self.start
    }

    /// Look up a state by name
    pub fn step(&self, name: &str) -> Option<&Step<C>> {
        self.states.get(name)
    }

    /// Whole-execution deadline, if configured
    pub fn execution_timeout(&self) -> Option<Duration> {
        self.execution_timeout
    }

    /// Reject definition errors before execution
    pub fn validate(&self) -> Result<(), DefinitionError> {
        if !self.states.contains_key(&self.start) {
            return Err(DefinitionError::UnknownStart(self.start.clone()));
        }

        for (name, step) in &self.states {
            match step {
                Step::Task(task) => {
                    self.check_transition(name, &task.next)?;
                    if let Some(catch) = &task.catch {
                        self.check_transition(name, catch)?;
                    }
                }
                Step::Choice(choice) => {
                    for (_, next) in &choice.branches {
                        self.check_transition(name, next)?;
                    }
                    match &choice.default {
                        Some(default) => self.check_transition(name, default)?,
                        None => {
                            return Err(DefinitionError::ChoiceWithoutDefault(name.clone()));
                        }
                    }
                }
                Step::Wait(wait) => self.check_transition(name, &wait.next)?,
                Step::Pass(pass) => self.check_transition(name, &pass.next)?,
                Step::Map(map) => {
                    if map.max_concurrency == 0 {
                        return Err(DefinitionError::ZeroConcurrency(name.clone()));
                    }
                    self.check_transition(name, &map.next)?;
                    if let Some(catch) = &map.catch {
                        self.check_transition(name, catch)?;
                    }
                }
                Step::Parallel(parallel) => {
                    self.check_transition(name, &parallel.next)?;
                    if let Some(catch) = &parallel.catch {
                        self.check_transition(name, catch)?;
                    }
                }
                Step::Succeed | Step::Fail(_) => {}
            }
        }

        Ok(())
    }

    fn check_transition(&self, from: &str, to: &str) -> Result<(), DefinitionError> {
        if self.states.contains_key(to) {
            Ok(())
        } else {
            Err(DefinitionError::DanglingTransition {
                from: from.to_string(),
                to: to.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::FailureCause;
    use crate::step::{ChoiceStep, FailStep, MapOver, MapStep, TaskAction, TaskStep, WaitStep};
    use crate::step::{no_change, ContextPatch, ItemAction};
    use async_trait::async_trait;
    use std::sync::Arc;

    #[derive(serde::Serialize, serde::Deserialize)]
    struct Ctx {
        items: Vec<u32>,
    }

    struct Noop;

    #[async_trait]
    impl TaskAction<Ctx> for Noop {
        async fn run(&self, _ctx: &Ctx) -> Result<ContextPatch<Ctx>, FailureCause> {
            Ok(no_change())
        }
    }

    struct Identity;

    #[async_trait]
    impl ItemAction<u32, u32> for Identity {
        async fn run(&self, item: u32) -> Result<u32, FailureCause> {
            Ok(item)
        }
    }

    fn map_action() -> Arc<MapOver<Ctx, u32, u32>> {
        Arc::new(MapOver::new(
            |ctx: &Ctx| ctx.items.clone(),
            Arc::new(Identity),
            |ctx, outputs| ctx.items = outputs,
        ))
    }

    #[test]
    fn test_valid_graph() {
        let graph: StepGraph<Ctx> = StepGraph::new("first")
            .state("first", Step::Task(TaskStep::new(Arc::new(Noop), "pick")))
            .state(
                "pick",
                Step::Choice(
                    ChoiceStep::new()
                        .when(|ctx: &Ctx| ctx.items.is_empty(), "done")
                        .otherwise("spread"),
                ),
            )
            .state("spread", Step::Map(MapStep::new(map_action(), 6, "done")))
            .state("done", Step::Succeed);

        assert!(graph.validate().is_ok());
    }

    #[test]
    fn test_missing_start_state() {
        let graph: StepGraph<Ctx> = StepGraph::new("nowhere").state("done", Step::Succeed);

        assert_eq!(
            graph.validate(),
            Err(DefinitionError::UnknownStart("nowhere".to_string()))
        );
    }

    #[test]
    fn test_dangling_transition() {
        let graph: StepGraph<Ctx> = StepGraph::new("first").state(
            "first",
            Step::Task(TaskStep::new(Arc::new(Noop), "missing")),
        );

        assert_eq!(
            graph.validate(),
            Err(DefinitionError::DanglingTransition {
                from: "first".to_string(),
                to: "missing".to_string(),
            })
        );
    }

    #[test]
    fn test_choice_without_default_is_rejected() {
        let graph: StepGraph<Ctx> = StepGraph::new("pick")
            .state(
                "pick",
                Step::Choice(ChoiceStep::new().when(|_: &Ctx| true, "done")),
            )
            .state("done", Step::Succeed);

        assert_eq!(
            graph.validate(),
            Err(DefinitionError::ChoiceWithoutDefault("pick".to_string()))
        );
    }

    #[test]
    fn test_dangling_catch_is_rejected() {
        let graph: StepGraph<Ctx> = StepGraph::new("first")
            .state(
                "first",
                Step::Task(TaskStep::new(Arc::new(Noop), "done").with_catch("gone")),
            )
            .state("done", Step::Succeed);

        assert!(matches!(
            graph.validate(),
            Err(DefinitionError::DanglingTransition { .. })
        ));
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        let graph: StepGraph<Ctx> = StepGraph::new("spread")
            .state("spread", Step::Map(MapStep::new(map_action(), 0, "done")))
            .state("done", Step::Succeed);

        assert_eq!(
            graph.validate(),
            Err(DefinitionError::ZeroConcurrency("spread".to_string()))
        );
    }

    #[test]
    fn test_wait_and_fail_states_validate() {
        let graph: StepGraph<Ctx> = StepGraph::new("hold")
            .state(
                "hold",
                Step::Wait(WaitStep::new(Duration::from_secs(1), "stop")),
            )
            .state(
                "stop",
                Step::Fail(FailStep::new(FailureCause::internal("halt"))),
            );

        assert!(graph.validate().is_ok());
    }
}
