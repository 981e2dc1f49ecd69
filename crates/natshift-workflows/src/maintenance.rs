//! Maintenance workflow
//!
//! Scheduled image refresh: trigger a pipeline build, poll it to a
//! settled status, then run replacement (new fleet from the new image)
//! followed by fallback (routes back onto the new fleet).
//!
//! The singleton guard here is the pipeline itself: a build already in
//! progress means another maintenance run is mid-flight, and starting a
//! second build would interleave two fleet swaps.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use natshift_core::{BuildToken, ImageBuildStatus, ImagePipelineProvider, PipelineRef};
use natshift_engine::{
    patch, ChoiceStep, ContextPatch, DefinitionError, FailStep, FailureCause, GraphDefinition,
    Step, StepGraph, SyncTrigger, TaskAction, TaskStep, WaitStep, WorkflowRuntime,
};

use crate::config::OrchestratorConfig;
use crate::invoke::InvokeWorkflow;
use crate::{fallback, replacement};

/// Workflow name used for registration and registry queries
pub const NAME: &str = "nat-maintenance";

/// Execution context for one maintenance run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaintenanceContext {
    build_token: Option<BuildToken>,
    build_status: Option<ImageBuildStatus>,
}

impl MaintenanceContext {
    fn build_available(&self) -> bool {
        self.build_status == Some(ImageBuildStatus::Available)
    }

    fn build_failed(&self) -> bool {
        self.build_status == Some(ImageBuildStatus::Failed)
    }

    /// Token of the build this run triggered
    pub fn build_token(&self) -> Option<&BuildToken> {
        self.build_token.as_ref()
    }
}

struct CheckPipelineIdle {
    pipeline: Arc<dyn ImagePipelineProvider>,
    pipeline_ref: PipelineRef,
}

#[async_trait]
impl TaskAction<MaintenanceContext> for CheckPipelineIdle {
    async fn run(
        &self,
        _ctx: &MaintenanceContext,
    ) -> Result<ContextPatch<MaintenanceContext>, FailureCause> {
        let status = self.pipeline.get_build_status(&self.pipeline_ref).await?;
        if !status.is_settled() {
            return Err(FailureCause::singleton(
                "an image build is already in progress",
            ));
        }
        Ok(patch(move |ctx: &mut MaintenanceContext| {
            ctx.build_status = Some(status);
        }))
    }
}

struct StartBuild {
    pipeline: Arc<dyn ImagePipelineProvider>,
    pipeline_ref: PipelineRef,
}

#[async_trait]
impl TaskAction<MaintenanceContext> for StartBuild {
    async fn run(
        &self,
        _ctx: &MaintenanceContext,
    ) -> Result<ContextPatch<MaintenanceContext>, FailureCause> {
        let token = self.pipeline.trigger_build(&self.pipeline_ref).await?;
        info!(build = %token, "triggered image build");
        Ok(patch(move |ctx: &mut MaintenanceContext| {
            ctx.build_token = Some(token);
            // Forget the pre-trigger status so the choice below reflects
            // only what the poll observes for the new build.
            ctx.build_status = None;
        }))
    }
}

struct PollBuild {
    pipeline: Arc<dyn ImagePipelineProvider>,
    pipeline_ref: PipelineRef,
}

#[async_trait]
impl TaskAction<MaintenanceContext> for PollBuild {
    async fn run(
        &self,
        _ctx: &MaintenanceContext,
    ) -> Result<ContextPatch<MaintenanceContext>, FailureCause> {
        let status = self.pipeline.get_build_status(&self.pipeline_ref).await?;
        info!(%status, "image build status");
        Ok(patch(move |ctx: &mut MaintenanceContext| {
            ctx.build_status = Some(status);
        }))
    }
}

/// Build the maintenance workflow definition
pub fn definition(
    pipeline: Arc<dyn ImagePipelineProvider>,
    runtime: &Arc<WorkflowRuntime>,
    config: &OrchestratorConfig,
) -> Result<GraphDefinition<MaintenanceContext>, DefinitionError> {
    let check = Arc::new(CheckPipelineIdle {
        pipeline: Arc::clone(&pipeline),
        pipeline_ref: config.pipeline.clone(),
    });
    let start = Arc::new(StartBuild {
        pipeline: Arc::clone(&pipeline),
        pipeline_ref: config.pipeline.clone(),
    });
    let poll = Arc::new(PollBuild {
        pipeline,
        pipeline_ref: config.pipeline.clone(),
    });
    let invoke_replacement = Arc::new(InvokeWorkflow::new(SyncTrigger::new(
        runtime,
        replacement::NAME,
        config.trigger_poll_interval,
        config.trigger_timeout,
    )));
    let invoke_fallback = Arc::new(InvokeWorkflow::new(SyncTrigger::new(
        runtime,
        fallback::NAME,
        config.trigger_poll_interval,
        config.trigger_timeout,
    )));

    let graph = StepGraph::new("check-pipeline")
        .with_execution_timeout(config.maintenance_timeout)
        .state(
            "check-pipeline",
            Step::Task(TaskStep::new(check, "start-build").with_catch("maintenance-failed")),
        )
        .state(
            "start-build",
            Step::Task(TaskStep::new(start, "poll-build").with_catch("maintenance-failed")),
        )
        .state(
            "poll-build",
            Step::Task(TaskStep::new(poll, "build-settled").with_catch("maintenance-failed")),
        )
        .state(
            "build-settled",
            Step::Choice(
                ChoiceStep::new()
                    .when(MaintenanceContext::build_available, "invoke-replacement")
                    .when(MaintenanceContext::build_failed, "build-failed")
                    .otherwise("hold"),
            ),
        )
        .state(
            "hold",
            Step::Wait(WaitStep::new(config.build_poll_interval, "poll-build")),
        )
        .state(
            "invoke-replacement",
            Step::Task(
                TaskStep::new(invoke_replacement, "invoke-fallback")
                    .with_catch("maintenance-failed"),
            ),
        )
        .state(
            "invoke-fallback",
            Step::Task(TaskStep::new(invoke_fallback, "done").with_catch("maintenance-failed")),
        )
        .state("done", Step::Succeed)
        .state(
            "build-failed",
            Step::Fail(FailStep::new(FailureCause::pipeline(
                "image build reported failure",
            ))),
        )
        .state(
            "maintenance-failed",
            Step::Fail(FailStep::new(FailureCause::internal(
                "maintenance did not complete",
            ))),
        );

    GraphDefinition::new(NAME, graph, MaintenanceContext::default)
}
