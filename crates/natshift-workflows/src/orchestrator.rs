//! Orchestrator wiring
//!
//! Loads the zone topology once, builds the workflow runtime, and
//! registers the four workflow definitions against it. The host process
//! constructs provider adapters and hands them in; everything after that
//! is driven through the runtime.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use natshift_core::{
    ComputeProvider, ImagePipelineProvider, ProviderError, RoutingProvider, ZoneConfigProvider,
    ZoneTopology,
};
use natshift_engine::{
    DefinitionError, ExecutionRecord, ExecutionRegistry, ExecutionStatus, ExecutionStore,
    InMemoryExecutionStore, RuntimeError, WorkflowRuntime,
};

use crate::config::OrchestratorConfig;
use crate::{failover, fallback, maintenance, replacement};

/// The four capability providers the workflows depend on
#[derive(Clone)]
pub struct Providers {
    pub zones: Arc<dyn ZoneConfigProvider>,
    pub compute: Arc<dyn ComputeProvider>,
    pub routing: Arc<dyn RoutingProvider>,
    pub pipeline: Arc<dyn ImagePipelineProvider>,
}

/// Errors from orchestrator construction and entry points
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// A workflow graph failed validation
    #[error("workflow definition error: {0}")]
    Definition(#[from] DefinitionError),

    /// Zone configuration could not be loaded
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Runtime operation failed
    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),
}

/// Fully wired NAT orchestrator
///
/// Owns the runtime with all four workflows registered. Entry points
/// mirror the external invokers: health-alarm failover, scheduled
/// maintenance, and manual replacement or fallback.
pub struct Orchestrator {
    runtime: Arc<WorkflowRuntime>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    /// Wire an orchestrator over an in-memory execution store
    pub async fn new(
        providers: Providers,
        config: OrchestratorConfig,
    ) -> Result<Self, OrchestratorError> {
        Self::with_store(providers, config, Arc::new(InMemoryExecutionStore::new())).await
    }

    /// Wire an orchestrator over the given execution store
    ///
    /// The zone topology is loaded here, once, and is fixed for the
    /// orchestrator's lifetime.
    pub async fn with_store(
        providers: Providers,
        config: OrchestratorConfig,
        store: Arc<dyn ExecutionStore>,
    ) -> Result<Self, OrchestratorError> {
        let topology = ZoneTopology::new(providers.zones.list_zones().await?);
        info!(zones = topology.len(), "loaded zone topology");

        let runtime = WorkflowRuntime::new(store);

        runtime.register(Arc::new(failover::definition(
            topology.clone(),
            Arc::clone(&providers.routing),
            &config,
        )?));
        runtime.register(Arc::new(fallback::definition(
            topology.clone(),
            Arc::clone(&providers.compute),
            Arc::clone(&providers.routing),
            &config,
        )?));
        runtime.register(Arc::new(replacement::definition(
            topology.clone(),
            Arc::clone(&providers.compute),
            Arc::clone(&providers.pipeline),
            &runtime,
            &config,
        )?));
        runtime.register(Arc::new(maintenance::definition(
            Arc::clone(&providers.pipeline),
            &runtime,
            &config,
        )?));

        Ok(Self { runtime, config })
    }

    /// The underlying workflow runtime
    pub fn runtime(&self) -> &Arc<WorkflowRuntime> {
        &self.runtime
    }

    /// Registry view over this orchestrator's executions
    pub fn registry(&self) -> ExecutionRegistry {
        self.runtime.registry()
    }

    /// Start a failover execution without waiting for it
    pub async fn start_failover(&self) -> Result<Uuid, RuntimeError> {
        self.runtime.start_execution(failover::NAME).await
    }

    /// Start a maintenance execution without waiting for it
    pub async fn start_maintenance(&self) -> Result<Uuid, RuntimeError> {
        self.runtime.start_execution(maintenance::NAME).await
    }

    /// Run a failover execution to its terminal state
    pub async fn run_failover(&self) -> Result<ExecutionRecord, RuntimeError> {
        self.runtime
            .run_to_terminal(
                failover::NAME,
                self.config.trigger_poll_interval,
                self.config.trigger_timeout,
            )
            .await
    }

    /// Run a replacement execution to its terminal state
    pub async fn run_replacement(&self) -> Result<ExecutionRecord, RuntimeError> {
        self.runtime
            .run_to_terminal(
                replacement::NAME,
                self.config.trigger_poll_interval,
                self.config.replacement_timeout + self.config.trigger_timeout,
            )
            .await
    }

    /// Run a fallback execution to its terminal state
    pub async fn run_fallback(&self) -> Result<ExecutionRecord, RuntimeError> {
        self.runtime
            .run_to_terminal(
                fallback::NAME,
                self.config.trigger_poll_interval,
                self.config.trigger_timeout,
            )
            .await
    }

    /// Run a maintenance execution to its terminal state
    pub async fn run_maintenance(&self) -> Result<ExecutionRecord, RuntimeError> {
        self.runtime
            .run_to_terminal(
                maintenance::NAME,
                self.config.trigger_poll_interval,
                self.config.maintenance_timeout + self.config.trigger_timeout,
            )
            .await
    }

    /// Resume every in-flight execution after a process restart
    pub async fn resume_in_flight(&self) -> Result<usize, RuntimeError> {
        let mut resumed = 0;
        for workflow in [
            failover::NAME,
            replacement::NAME,
            fallback::NAME,
            maintenance::NAME,
        ] {
            for record in self
                .runtime
                .list_executions(workflow, Some(ExecutionStatus::Running))
                .await?
            {
                self.runtime.resume_execution(record.execution_id).await?;
                resumed += 1;
            }
        }
        Ok(resumed)
    }
}
