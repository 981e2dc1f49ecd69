//! Workflow runtime
//!
//! The runtime owns the execution store and the registered workflow
//! definitions. External callers start executions, await them to a
//! terminal state (poll-based), list them, and resume in-flight
//! executions after a process restart.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::engine::{Engine, EngineError};
use crate::graph::{DefinitionError, StepGraph};
use crate::registry::ExecutionRegistry;
use crate::step::WorkflowContext;
use crate::store::{ExecutionRecord, ExecutionStatus, ExecutionStore, StoreError};

/// Errors from runtime operations
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// No definition registered under that name
    #[error("unknown workflow: {0}")]
    UnknownWorkflow(String),

    /// Store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Engine error
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// An awaited execution did not reach a terminal state in time
    #[error("execution {0} did not reach a terminal state within {1:?}")]
    AwaitTimeout(Uuid, Duration),
}

/// Type-erased workflow definition
///
/// A definition knows its name, its start state, and how to drive (or
/// resume) one execution against a store. The typed context stays an
/// implementation detail of the definition.
#[async_trait]
pub trait WorkflowDefinition: Send + Sync + 'static {
    /// Workflow name used for registration and registry queries
    fn name(&self) -> &str;

    /// Name of the graph's start state
    fn start_state(&self) -> &str;

    /// Drive a fresh execution to a terminal state
    async fn run(
        &self,
        execution_id: Uuid,
        store: Arc<dyn ExecutionStore>,
    ) -> Result<(), EngineError>;

    /// Re-drive an in-flight execution from its recorded cursor
    async fn resume(
        &self,
        record: ExecutionRecord,
        store: Arc<dyn ExecutionStore>,
    ) -> Result<(), EngineError>;
}

/// A workflow definition backed by a validated step graph
pub struct GraphDefinition<C: WorkflowContext> {
    name: String,
    graph: StepGraph<C>,
    initial: Box<dyn Fn() -> C + Send + Sync>,
}

impl<C: WorkflowContext> GraphDefinition<C> {
    /// Build a definition, rejecting invalid graphs up front
    pub fn new(
        name: impl Into<String>,
        graph: StepGraph<C>,
        initial: impl Fn() -> C + Send + Sync + 'static,
    ) -> Result<Self, DefinitionError> {
        graph.validate()?;
        Ok(Self {
            name: name.into(),
            graph,
            initial: Box::new(initial),
        })
    }
}

#[async_trait]
impl<C: WorkflowContext> WorkflowDefinition for GraphDefinition<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn start_state(&self) -> &str {
        self.graph.start()
    }

    async fn run(
        &self,
        execution_id: Uuid,
        store: Arc<dyn ExecutionStore>,
    ) -> Result<(), EngineError> {
        let engine = Engine::new(store);
        let ctx = (self.initial)();
        engine.run(execution_id, &self.graph, ctx).await.map(|_| ())
    }

    async fn resume(
        &self,
        record: ExecutionRecord,
        store: Arc<dyn ExecutionStore>,
    ) -> Result<(), EngineError> {
        let ctx: C = if record.context.is_null() {
            // Crashed before the first snapshot: start over from scratch
            (self.initial)()
        } else {
            serde_json::from_value(record.context.clone())?
        };

        let engine = Engine::new(store);
        engine
            .run_from(record.execution_id, &self.graph, record.cursor.clone(), ctx)
            .await
            .map(|_| ())
    }
}

/// Registers workflow definitions and manages their executions
pub struct WorkflowRuntime {
    store: Arc<dyn ExecutionStore>,
    definitions: RwLock<HashMap<String, Arc<dyn WorkflowDefinition>>>,
}

impl WorkflowRuntime {
    /// Create a runtime over the given store
    pub fn new(store: Arc<dyn ExecutionStore>) -> Arc<Self> {
        Arc::new(Self {
            store,
            definitions: RwLock::new(HashMap::new()),
        })
    }

    /// The underlying execution store
    pub fn store(&self) -> Arc<dyn ExecutionStore> {
        Arc::clone(&self.store)
    }

    /// Registry view over this runtime's executions
    pub fn registry(&self) -> ExecutionRegistry {
        ExecutionRegistry::new(Arc::clone(&self.store))
    }

    /// Register a workflow definition under its name
    pub fn register(&self, definition: Arc<dyn WorkflowDefinition>) {
        info!(workflow = definition.name(), "registered workflow");
        self.definitions
            .write()
            .insert(definition.name().to_string(), definition);
    }

    fn definition(&self, workflow: &str) -> Result<Arc<dyn WorkflowDefinition>, RuntimeError> {
        self.definitions
            .read()
            .get(workflow)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownWorkflow(workflow.to_string()))
    }

    /// Start an execution and return its id without waiting
    #[instrument(skip(self))]
    pub async fn start_execution(&self, workflow: &str) -> Result<Uuid, RuntimeError> {
        let definition = self.definition(workflow)?;
        let execution_id = Uuid::now_v7();

        self.store
            .create(ExecutionRecord::new(
                execution_id,
                workflow,
                definition.start_state(),
            ))
            .await?;

        info!(%execution_id, workflow, "starting execution");

        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            if let Err(error) = definition.run(execution_id, store).await {
                error!(%execution_id, %error, "execution driver failed");
            }
        });

        Ok(execution_id)
    }

    /// Poll an execution until it reaches a terminal state
    pub async fn await_terminal(
        &self,
        execution_id: Uuid,
        poll_interval: Duration,
        limit: Duration,
    ) -> Result<ExecutionRecord, RuntimeError> {
        let deadline = tokio::time::Instant::now() + limit;

        loop {
            let record = self.store.get(execution_id).await?;
            if record.status.is_terminal() {
                return Ok(record);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(RuntimeError::AwaitTimeout(execution_id, limit));
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Start an execution and block until it is terminal
    pub async fn run_to_terminal(
        &self,
        workflow: &str,
        poll_interval: Duration,
        limit: Duration,
    ) -> Result<ExecutionRecord, RuntimeError> {
        let execution_id = self.start_execution(workflow).await?;
        self.await_terminal(execution_id, poll_interval, limit).await
    }

    /// Fetch one execution
    pub async fn get_execution(&self, execution_id: Uuid) -> Result<ExecutionRecord, RuntimeError> {
        self.store.get(execution_id).await.map_err(Into::into)
    }

    /// List executions of a workflow, optionally filtered by status
    pub async fn list_executions(
        &self,
        workflow: &str,
        status: Option<ExecutionStatus>,
    ) -> Result<Vec<ExecutionRecord>, RuntimeError> {
        self.store.list(workflow, status).await.map_err(Into::into)
    }

    /// Resume an in-flight execution from its last recorded step
    ///
    /// Terminal executions are left untouched. The re-driven execution
    /// may repeat the step it crashed in; provider mutations are
    /// idempotent or independently safe, so repeats are tolerated.
    #[instrument(skip(self))]
    pub async fn resume_execution(&self, execution_id: Uuid) -> Result<(), RuntimeError> {
        let record = self.store.get(execution_id).await?;
        if record.status.is_terminal() {
            return Ok(());
        }

        let definition = self.definition(&record.workflow)?;
        info!(%execution_id, workflow = %record.workflow, cursor = %record.cursor, "resuming execution");

        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            if let Err(error) = definition.resume(record, store).await {
                error!(%execution_id, %error, "resumed execution driver failed");
            }
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::FailureCause;
    use crate::step::{patch, ContextPatch, Step, TaskAction, TaskStep};
    use crate::store::InMemoryExecutionStore;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Default, Clone, Serialize, Deserialize)]
    struct Trail {
        visited: Vec<String>,
    }

    struct Visit(&'static str);

    #[async_trait]
    impl TaskAction<Trail> for Visit {
        async fn run(&self, _ctx: &Trail) -> Result<ContextPatch<Trail>, FailureCause> {
            let mark = self.0.to_string();
            Ok(patch(move |ctx: &mut Trail| ctx.visited.push(mark)))
        }
    }

    fn two_step_definition(name: &str) -> Arc<dyn WorkflowDefinition> {
        let graph: StepGraph<Trail> = StepGraph::new("first")
            .state("first", Step::Task(TaskStep::new(Arc::new(Visit("first")), "second")))
            .state("second", Step::Task(TaskStep::new(Arc::new(Visit("second")), "done")))
            .state("done", Step::Succeed);

        Arc::new(
            GraphDefinition::new(name, graph, Trail::default).expect("graph should validate"),
        )
    }

    fn runtime_with(name: &str) -> Arc<WorkflowRuntime> {
        let store = Arc::new(InMemoryExecutionStore::new());
        let runtime = WorkflowRuntime::new(store);
        runtime.register(two_step_definition(name));
        runtime
    }

    #[tokio::test]
    async fn test_start_and_await_terminal() {
        let runtime = runtime_with("walk");

        let record = runtime
            .run_to_terminal("walk", Duration::from_millis(5), Duration::from_secs(5))
            .await
            .expect("should finish");

        assert_eq!(record.status, ExecutionStatus::Succeeded);
        assert_eq!(
            record.context["visited"],
            serde_json::json!(["first", "second"])
        );
    }

    #[tokio::test]
    async fn test_unknown_workflow() {
        let runtime = runtime_with("walk");
        let result = runtime.start_execution("sprint").await;
        assert!(matches!(result, Err(RuntimeError::UnknownWorkflow(_))));
    }

    #[tokio::test]
    async fn test_list_executions_with_status_filter() {
        let runtime = runtime_with("walk");

        runtime
            .run_to_terminal("walk", Duration::from_millis(5), Duration::from_secs(5))
            .await
            .unwrap();

        let succeeded = runtime
            .list_executions("walk", Some(ExecutionStatus::Succeeded))
            .await
            .unwrap();
        assert_eq!(succeeded.len(), 1);

        let running = runtime
            .list_executions("walk", Some(ExecutionStatus::Running))
            .await
            .unwrap();
        assert!(running.is_empty());
    }

    #[tokio::test]
    async fn test_resume_from_recorded_cursor() {
        let store = Arc::new(InMemoryExecutionStore::new());
        let runtime = WorkflowRuntime::new(Arc::clone(&store) as Arc<dyn ExecutionStore>);
        runtime.register(two_step_definition("walk"));

        // Simulate an execution that crashed after the first step: cursor
        // points at "second" with the first step's context recorded.
        let record = ExecutionRecord::new(Uuid::now_v7(), "walk", "first");
        let execution_id = record.execution_id;
        store.create(record).await.unwrap();
        store
            .record_step(
                execution_id,
                "second",
                serde_json::json!({ "visited": ["first"] }),
            )
            .await
            .unwrap();

        runtime
            .resume_execution(execution_id)
            .await
            .expect("should resume");

        let record = runtime
            .await_terminal(execution_id, Duration::from_millis(5), Duration::from_secs(5))
            .await
            .expect("should finish");

        assert_eq!(record.status, ExecutionStatus::Succeeded);
        // The first step was not repeated
        assert_eq!(
            record.context["visited"],
            serde_json::json!(["first", "second"])
        );
    }

    #[tokio::test]
    async fn test_resume_terminal_execution_is_noop() {
        let runtime = runtime_with("walk");
        let record = runtime
            .run_to_terminal("walk", Duration::from_millis(5), Duration::from_secs(5))
            .await
            .unwrap();

        runtime
            .resume_execution(record.execution_id)
            .await
            .expect("terminal resume is a no-op");
    }
}
