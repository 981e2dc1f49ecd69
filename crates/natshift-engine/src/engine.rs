//! Step-graph interpreter
//!
//! The [`Engine`] drives one execution through its graph: it runs steps,
//! applies their context patches, snapshots cursor and context to the
//! store after every transition, and writes the terminal status. Each
//! execution is one logical thread of control; concurrency only appears
//! inside Map and Parallel steps.

use std::sync::Arc;

use futures::future;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::fault::FailureCause;
use crate::graph::{DefinitionError, StepGraph};
use crate::step::{Step, WorkflowContext};
use crate::store::{ExecutionRecord, ExecutionStatus, ExecutionStore, StoreError};

/// Errors from engine operations
///
/// These are driver faults, not workflow failures: a workflow that
/// reaches a Fail state still returns `Ok` with a Failed record.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Context snapshot could not be serialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The graph failed validation
    #[error("definition error: {0}")]
    Definition(#[from] DefinitionError),

    /// A transition pointed at a state the graph does not contain
    #[error("unknown state: {0}")]
    UnknownState(String),
}

enum Outcome {
    Succeeded,
    Failed(FailureCause),
}

/// Drives step graphs against an execution store
pub struct Engine {
    store: Arc<dyn ExecutionStore>,
}

impl Engine {
    /// Create an engine backed by the given store
    pub fn new(store: Arc<dyn ExecutionStore>) -> Self {
        Self { store }
    }

    /// Run an execution from the graph's start state
    pub async fn run<C: WorkflowContext>(
        &self,
        execution_id: Uuid,
        graph: &StepGraph<C>,
        ctx: C,
    ) -> Result<ExecutionRecord, EngineError> {
        self.run_from(execution_id, graph, graph.start().to_string(), ctx)
            .await
    }

    /// Run an execution from an arbitrary state, e.g. a resumed cursor
    #[instrument(skip(self, graph, ctx), fields(%execution_id, start = %start_state))]
    pub async fn run_from<C: WorkflowContext>(
        &self,
        execution_id: Uuid,
        graph: &StepGraph<C>,
        start_state: String,
        mut ctx: C,
    ) -> Result<ExecutionRecord, EngineError> {
        graph.validate()?;

        let outcome = match graph.execution_timeout() {
            Some(limit) => {
                let driven = tokio::time::timeout(
                    limit,
                    self.drive(execution_id, graph, start_state, &mut ctx),
                )
                .await;
                match driven {
                    Ok(outcome) => outcome?,
                    Err(_) => Outcome::Failed(FailureCause::timeout(format!(
                        "execution exceeded {limit:?}"
                    ))),
                }
            }
            None => self.drive(execution_id, graph, start_state, &mut ctx).await?,
        };

        match outcome {
            Outcome::Succeeded => {
                info!(%execution_id, "execution succeeded");
                self.store
                    .finish(execution_id, ExecutionStatus::Succeeded, None)
                    .await?;
            }
            Outcome::Failed(cause) => {
                warn!(%execution_id, %cause, "execution failed");
                self.store
                    .finish(execution_id, ExecutionStatus::Failed, Some(cause))
                    .await?;
            }
        }

        self.store.get(execution_id).await.map_err(Into::into)
    }

    async fn drive<C: WorkflowContext>(
        &self,
        execution_id: Uuid,
        graph: &StepGraph<C>,
        mut state: String,
        ctx: &mut C,
    ) -> Result<Outcome, EngineError> {
        // Faults redirected by a catch are carried here so the terminal
        // Fail state surfaces the original cause.
        let mut last_fault: Option<FailureCause> = None;

        loop {
            // A redirected fault is meaningful only in the state the catch
            // points at; taking it here keeps a later, unrelated Fail
            // state from surfacing a stale cause.
            let carried_fault = last_fault.take();

            let step = graph
                .step(&state)
                .ok_or_else(|| EngineError::UnknownState(state.clone()))?;

            debug!(%execution_id, state = %state, "executing step");

            match step {
                Step::Task(task) => {
                    let result = match task.timeout {
                        Some(limit) => {
                            match tokio::time::timeout(limit, task.action.run(ctx)).await {
                                Ok(result) => result,
                                Err(_) => Err(FailureCause::timeout(format!(
                                    "task {state} exceeded {limit:?}"
                                ))),
                            }
                        }
                        None => task.action.run(ctx).await,
                    };

                    match result {
                        Ok(apply) => {
                            apply(ctx);
                            state = task.next.clone();
                        }
                        Err(cause) => {
                            match redirect(&state, &task.catch, cause, &mut last_fault) {
                                Ok(next) => state = next,
                                Err(cause) => return Ok(Outcome::Failed(cause)),
                            }
                        }
                    }
                }

                Step::Choice(choice) => {
                    let matched = choice
                        .branches
                        .iter()
                        .find(|(predicate, _)| predicate(ctx))
                        .map(|(_, next)| next.clone());

                    state = match matched {
                        Some(next) => next,
                        None => choice.default.clone().ok_or_else(|| {
                            EngineError::Definition(DefinitionError::ChoiceWithoutDefault(
                                state.clone(),
                            ))
                        })?,
                    };
                }

                Step::Wait(wait) => {
                    debug!(%execution_id, duration = ?wait.duration, "waiting");
                    tokio::time::sleep(wait.duration).await;
                    state = wait.next.clone();
                }

                Step::Pass(pass) => {
                    (pass.apply)(ctx);
                    state = pass.next.clone();
                }

                Step::Map(map) => {
                    match map.action.run(&*ctx, map.max_concurrency).await {
                        Ok(apply) => {
                            apply(ctx);
                            state = map.next.clone();
                        }
                        Err(cause) => {
                            match redirect(&state, &map.catch, cause, &mut last_fault) {
                                Ok(next) => state = next,
                                Err(cause) => return Ok(Outcome::Failed(cause)),
                            }
                        }
                    }
                }

                Step::Parallel(parallel) => {
                    let shared: &C = ctx;
                    let branches = parallel.branches.iter().map(|(name, action)| {
                        let action = Arc::clone(action);
                        let name = name.clone();
                        async move {
                            action.run(shared).await.map_err(|cause| {
                                warn!(branch = %name, %cause, "parallel branch failed");
                                cause
                            })
                        }
                    });

                    match future::try_join_all(branches).await {
                        Ok(patches) => {
                            for apply in patches {
                                apply(ctx);
                            }
                            state = parallel.next.clone();
                        }
                        Err(cause) => {
                            match redirect(&state, &parallel.catch, cause, &mut last_fault) {
                                Ok(next) => state = next,
                                Err(cause) => return Ok(Outcome::Failed(cause)),
                            }
                        }
                    }
                }

                Step::Succeed => return Ok(Outcome::Succeeded),

                Step::Fail(fail) => {
                    let cause = carried_fault.unwrap_or_else(|| fail.cause.clone());
                    return Ok(Outcome::Failed(cause));
                }
            }

            self.store
                .record_step(execution_id, &state, serde_json::to_value(&*ctx)?)
                .await?;
        }
    }
}

/// Resolve a step fault: transfer to the catch state or terminate
fn redirect(
    state: &str,
    catch: &Option<String>,
    cause: FailureCause,
    last_fault: &mut Option<FailureCause>,
) -> Result<String, FailureCause> {
    match catch {
        Some(target) => {
            warn!(state = %state, %cause, catch = %target, "step failed, transferring to catch state");
            *last_fault = Some(cause);
            Ok(target.clone())
        }
        None => Err(cause),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::{
        no_change, patch, ChoiceStep, ContextPatch, FailStep, ItemAction, MapOver, MapStep,
        ParallelStep, PassStep, TaskAction, TaskStep, WaitStep,
    };
    use crate::store::InMemoryExecutionStore;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, Default, Clone, Serialize, Deserialize)]
    struct Counter {
        value: u32,
        notes: Vec<String>,
    }

    struct Increment;

    #[async_trait]
    impl TaskAction<Counter> for Increment {
        async fn run(&self, _ctx: &Counter) -> Result<ContextPatch<Counter>, FailureCause> {
            Ok(patch(|ctx: &mut Counter| ctx.value += 1))
        }
    }

    struct Note(&'static str);

    #[async_trait]
    impl TaskAction<Counter> for Note {
        async fn run(&self, _ctx: &Counter) -> Result<ContextPatch<Counter>, FailureCause> {
            let note = self.0.to_string();
            Ok(patch(move |ctx: &mut Counter| ctx.notes.push(note)))
        }
    }

    struct Explode;

    #[async_trait]
    impl TaskAction<Counter> for Explode {
        async fn run(&self, _ctx: &Counter) -> Result<ContextPatch<Counter>, FailureCause> {
            Err(FailureCause::task("compute", "boom"))
        }
    }

    struct Stall;

    #[async_trait]
    impl TaskAction<Counter> for Stall {
        async fn run(&self, _ctx: &Counter) -> Result<ContextPatch<Counter>, FailureCause> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(no_change())
        }
    }

    fn engine() -> (Engine, Arc<InMemoryExecutionStore>) {
        let store = Arc::new(InMemoryExecutionStore::new());
        (Engine::new(Arc::clone(&store) as _), store)
    }

    async fn start(store: &Arc<InMemoryExecutionStore>, workflow: &str, cursor: &str) -> Uuid {
        let record = ExecutionRecord::new(Uuid::now_v7(), workflow, cursor);
        let id = record.execution_id;
        store.create(record).await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_linear_graph_succeeds() {
        let graph: StepGraph<Counter> = StepGraph::new("bump")
            .state("bump", Step::Task(TaskStep::new(Arc::new(Increment), "again")))
            .state("again", Step::Task(TaskStep::new(Arc::new(Increment), "done")))
            .state("done", Step::Succeed);

        let (engine, store) = engine();
        let id = start(&store, "test", "bump").await;

        let record = engine
            .run(id, &graph, Counter::default())
            .await
            .expect("should run");

        assert_eq!(record.status, ExecutionStatus::Succeeded);
        assert_eq!(record.context["value"], 2);
    }

    #[tokio::test]
    async fn test_choice_takes_first_matching_branch() {
        let graph: StepGraph<Counter> = StepGraph::new("bump")
            .state("bump", Step::Task(TaskStep::new(Arc::new(Increment), "pick")))
            .state(
                "pick",
                Step::Choice(
                    ChoiceStep::new()
                        .when(|ctx: &Counter| ctx.value >= 1, "tag")
                        .when(|ctx: &Counter| ctx.value >= 100, "done")
                        .otherwise("done"),
                ),
            )
            .state("tag", Step::Task(TaskStep::new(Arc::new(Note("matched")), "done")))
            .state("done", Step::Succeed);

        let (engine, store) = engine();
        let id = start(&store, "test", "bump").await;

        let record = engine.run(id, &graph, Counter::default()).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Succeeded);
        assert_eq!(record.context["notes"][0], "matched");
    }

    #[tokio::test]
    async fn test_choice_falls_through_to_default() {
        let graph: StepGraph<Counter> = StepGraph::new("pick")
            .state(
                "pick",
                Step::Choice(
                    ChoiceStep::new()
                        .when(|ctx: &Counter| ctx.value > 10, "tag")
                        .otherwise("done"),
                ),
            )
            .state("tag", Step::Task(TaskStep::new(Arc::new(Note("no")), "done")))
            .state("done", Step::Succeed);

        let (engine, store) = engine();
        let id = start(&store, "test", "pick").await;

        let record = engine.run(id, &graph, Counter::default()).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Succeeded);
        assert!(record.context["notes"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pass_reshapes_context() {
        let graph: StepGraph<Counter> = StepGraph::new("seed")
            .state(
                "seed",
                Step::Pass(PassStep::new(|ctx: &mut Counter| ctx.value = 42, "done")),
            )
            .state("done", Step::Succeed);

        let (engine, store) = engine();
        let id = start(&store, "test", "seed").await;

        let record = engine.run(id, &graph, Counter::default()).await.unwrap();
        assert_eq!(record.context["value"], 42);
    }

    #[tokio::test]
    async fn test_uncaught_task_failure_fails_execution() {
        let graph: StepGraph<Counter> = StepGraph::new("blow")
            .state("blow", Step::Task(TaskStep::new(Arc::new(Explode), "done")))
            .state("done", Step::Succeed);

        let (engine, store) = engine();
        let id = start(&store, "test", "blow").await;

        let record = engine.run(id, &graph, Counter::default()).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Failed);
        let failure = record.failure.expect("should carry cause");
        assert_eq!(failure.message, "boom");
    }

    #[tokio::test]
    async fn test_catch_redirects_and_fail_state_carries_cause() {
        let graph: StepGraph<Counter> = StepGraph::new("blow")
            .state(
                "blow",
                Step::Task(TaskStep::new(Arc::new(Explode), "done").with_catch("failed")),
            )
            .state("done", Step::Succeed)
            .state(
                "failed",
                Step::Fail(FailStep::new(FailureCause::internal("unreachable default"))),
            );

        let (engine, store) = engine();
        let id = start(&store, "test", "blow").await;

        let record = engine.run(id, &graph, Counter::default()).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Failed);
        // The redirected fault wins over the Fail state's static cause
        let failure = record.failure.unwrap();
        assert_eq!(failure.message, "boom");
    }

    #[tokio::test]
    async fn test_fault_does_not_leak_past_the_catch_target() {
        // The catch routes to a recovery state, not a Fail state; a Fail
        // state reached later must surface its own cause, not the fault
        // that was already handled.
        let graph: StepGraph<Counter> = StepGraph::new("blow")
            .state(
                "blow",
                Step::Task(TaskStep::new(Arc::new(Explode), "done").with_catch("cleanup")),
            )
            .state(
                "cleanup",
                Step::Pass(PassStep::new(|ctx: &mut Counter| ctx.value = 0, "stop")),
            )
            .state("done", Step::Succeed)
            .state(
                "stop",
                Step::Fail(FailStep::new(FailureCause::internal("cleanup exhausted"))),
            );

        let (engine, store) = engine();
        let id = start(&store, "test", "blow").await;

        let record = engine.run(id, &graph, Counter::default()).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Failed);
        let failure = record.failure.unwrap();
        assert_eq!(failure.message, "cleanup exhausted");
    }

    #[tokio::test]
    async fn test_fail_state_uses_static_cause_without_fault() {
        let graph: StepGraph<Counter> = StepGraph::new("stop")
            .state(
                "stop",
                Step::Fail(FailStep::new(FailureCause::pipeline("build failed"))),
            );

        let (engine, store) = engine();
        let id = start(&store, "test", "stop").await;

        let record = engine.run(id, &graph, Counter::default()).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert_eq!(
            record.failure.unwrap(),
            FailureCause::pipeline("build failed")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_timeout_produces_timeout_cause() {
        let graph: StepGraph<Counter> = StepGraph::new("stall")
            .state(
                "stall",
                Step::Task(
                    TaskStep::new(Arc::new(Stall), "done")
                        .with_timeout(Duration::from_millis(50)),
                ),
            )
            .state("done", Step::Succeed);

        let (engine, store) = engine();
        let id = start(&store, "test", "stall").await;

        let record = engine.run(id, &graph, Counter::default()).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert!(record.failure.unwrap().is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn test_execution_timeout_fails_stuck_loop() {
        // Wait loop that never reaches a terminal state on its own
        let graph: StepGraph<Counter> = StepGraph::new("hold")
            .state(
                "hold",
                Step::Wait(WaitStep::new(Duration::from_millis(10), "hold")),
            )
            .with_execution_timeout(Duration::from_millis(200));

        let (engine, store) = engine();
        let id = start(&store, "test", "hold").await;

        let record = engine.run(id, &graph, Counter::default()).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert!(record.failure.unwrap().is_timeout());
    }

    #[tokio::test]
    async fn test_parallel_applies_all_patches_in_branch_order() {
        let graph: StepGraph<Counter> = StepGraph::new("both")
            .state(
                "both",
                Step::Parallel(
                    ParallelStep::new("done")
                        .branch("left", Arc::new(Note("left")))
                        .branch("right", Arc::new(Note("right"))),
                ),
            )
            .state("done", Step::Succeed);

        let (engine, store) = engine();
        let id = start(&store, "test", "both").await;

        let record = engine.run(id, &graph, Counter::default()).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Succeeded);
        assert_eq!(record.context["notes"][0], "left");
        assert_eq!(record.context["notes"][1], "right");
    }

    #[tokio::test]
    async fn test_parallel_fails_when_any_branch_fails() {
        let graph: StepGraph<Counter> = StepGraph::new("both")
            .state(
                "both",
                Step::Parallel(
                    ParallelStep::new("done")
                        .branch("fine", Arc::new(Note("fine")))
                        .branch("broken", Arc::new(Explode))
                        .with_catch("failed"),
                ),
            )
            .state("done", Step::Succeed)
            .state(
                "failed",
                Step::Fail(FailStep::new(FailureCause::internal("parallel failed"))),
            );

        let (engine, store) = engine();
        let id = start(&store, "test", "both").await;

        let record = engine.run(id, &graph, Counter::default()).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert_eq!(record.failure.unwrap().message, "boom");
    }

    #[derive(Debug, Default, Clone, Serialize, Deserialize)]
    struct FanCtx {
        items: Vec<u32>,
        total: Vec<u32>,
    }

    struct Echo;

    #[async_trait]
    impl ItemAction<u32, u32> for Echo {
        async fn run(&self, item: u32) -> Result<u32, FailureCause> {
            Ok(item)
        }
    }

    #[tokio::test]
    async fn test_map_step_merges_outputs() {
        let action = Arc::new(MapOver::new(
            |ctx: &FanCtx| ctx.items.clone(),
            Arc::new(Echo),
            |ctx, outputs| ctx.total = outputs,
        ));
        let graph: StepGraph<FanCtx> = StepGraph::new("spread")
            .state("spread", Step::Map(MapStep::new(action, 2, "done")))
            .state("done", Step::Succeed);

        let (engine, store) = engine();
        let id = start(&store, "test", "spread").await;

        let ctx = FanCtx {
            items: vec![7, 8, 9],
            total: vec![],
        };
        let record = engine.run(id, &graph, ctx).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Succeeded);
        assert_eq!(record.context["total"], serde_json::json!([7, 8, 9]));
    }

    #[tokio::test]
    async fn test_run_from_resumes_mid_graph() {
        let graph: StepGraph<Counter> = StepGraph::new("bump")
            .state("bump", Step::Task(TaskStep::new(Arc::new(Increment), "tag")))
            .state("tag", Step::Task(TaskStep::new(Arc::new(Note("late")), "done")))
            .state("done", Step::Succeed);

        let (engine, store) = engine();
        let id = start(&store, "test", "tag").await;

        // Resume from "tag" with a context that already saw "bump"
        let resumed = Counter {
            value: 1,
            notes: vec![],
        };
        let record = engine
            .run_from(id, &graph, "tag".to_string(), resumed)
            .await
            .unwrap();

        assert_eq!(record.status, ExecutionStatus::Succeeded);
        assert_eq!(record.context["value"], 1);
        assert_eq!(record.context["notes"][0], "late");
    }

    #[tokio::test]
    async fn test_invalid_graph_is_rejected_before_execution() {
        let graph: StepGraph<Counter> = StepGraph::new("pick")
            .state(
                "pick",
                Step::Choice(ChoiceStep::new().when(|_: &Counter| true, "done")),
            )
            .state("done", Step::Succeed);

        let (engine, store) = engine();
        let id = start(&store, "test", "pick").await;

        let result = engine.run(id, &graph, Counter::default()).await;
        assert!(matches!(result, Err(EngineError::Definition(_))));

        // Rejected executions never reach a terminal store status
        let record = store.get(id).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Running);
    }
}
