//! Replacement workflow
//!
//! Swaps the whole NAT fleet for fresh instances built from the newest
//! pipeline image. The sequence is:
//!
//! 1. singleton guard (concurrent replacements would double-launch)
//! 2. failover, so traffic rides the standby gateways during the swap
//! 3. inventory of the existing fleet
//! 4. in parallel: retire the old fleet and launch one replacement per
//!    zone, polling each until both status checks pass
//!
//! The whole execution runs under a deadline; instances that never become
//! healthy fail the run with a timeout rather than stalling forever.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::info;

use natshift_core::{
    ComputeProvider, ImagePipelineProvider, InstanceId, LaunchSpec, MetadataAccess, PipelineRef,
    RunningInstance, SecurityGroupId, TagFilter, ZoneConfiguration, ZoneTopology,
};
use natshift_engine::{
    no_change, patch, ContextPatch, DefinitionError, ExecutionRegistry, FailStep, FailureCause,
    GraphDefinition, ParallelStep, Step, StepGraph, SyncTrigger, TaskAction, TaskStep,
    WorkflowRuntime,
};

use crate::config::OrchestratorConfig;
use crate::failover;
use crate::invoke::InvokeWorkflow;

/// Workflow name used for registration and registry queries
pub const NAME: &str = "nat-replacement";

/// Execution context for one replacement run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplacementContext {
    zones: Vec<ZoneConfiguration>,
    existing: Vec<RunningInstance>,
    launched: Vec<InstanceId>,
    retired: Vec<InstanceId>,
}

impl ReplacementContext {
    fn new(topology: &ZoneTopology) -> Self {
        Self {
            zones: topology.zones().to_vec(),
            existing: Vec::new(),
            launched: Vec::new(),
            retired: Vec::new(),
        }
    }

    /// Replacement instances launched and brought to ready
    pub fn launched(&self) -> &[InstanceId] {
        &self.launched
    }

    /// Old instances terminated during the swap
    pub fn retired(&self) -> &[InstanceId] {
        &self.retired
    }
}

struct CheckSingleton {
    registry: ExecutionRegistry,
}

#[async_trait]
impl TaskAction<ReplacementContext> for CheckSingleton {
    async fn run(
        &self,
        _ctx: &ReplacementContext,
    ) -> Result<ContextPatch<ReplacementContext>, FailureCause> {
        self.registry.assert_sole_execution(NAME).await?;
        Ok(no_change())
    }
}

struct ListExisting {
    compute: Arc<dyn ComputeProvider>,
    filter: TagFilter,
}

#[async_trait]
impl TaskAction<ReplacementContext> for ListExisting {
    async fn run(
        &self,
        _ctx: &ReplacementContext,
    ) -> Result<ContextPatch<ReplacementContext>, FailureCause> {
        let existing = self.compute.list_running_instances(&self.filter).await?;
        info!(count = existing.len(), "inventoried existing NAT fleet");
        Ok(patch(move |ctx: &mut ReplacementContext| {
            ctx.existing = existing;
        }))
    }
}

/// Parallel branch: terminate every inventoried instance
///
/// Termination protection is cleared before each terminate call. The old
/// fleet is already off the traffic path at this point, so terminations
/// run sequentially.
struct RetireExisting {
    compute: Arc<dyn ComputeProvider>,
}

#[async_trait]
impl TaskAction<ReplacementContext> for RetireExisting {
    async fn run(
        &self,
        ctx: &ReplacementContext,
    ) -> Result<ContextPatch<ReplacementContext>, FailureCause> {
        let mut retired = Vec::with_capacity(ctx.existing.len());

        for instance in &ctx.existing {
            self.compute
                .disable_termination_protection(&instance.instance_id)
                .await?;
            self.compute
                .terminate_instance(&instance.instance_id)
                .await?;
            info!(instance = %instance.instance_id, "terminated old NAT instance");
            retired.push(instance.instance_id.clone());
        }

        Ok(patch(move |ctx: &mut ReplacementContext| {
            ctx.retired = retired;
        }))
    }
}

/// Parallel branch: launch one replacement per zone and poll to ready
struct LaunchReplacements {
    compute: Arc<dyn ComputeProvider>,
    pipeline: Arc<dyn ImagePipelineProvider>,
    pipeline_ref: PipelineRef,
    security_group: SecurityGroupId,
    status_poll_interval: Duration,
    bound: usize,
}

impl LaunchReplacements {
    async fn launch_one(&self, zone: ZoneConfiguration) -> Result<InstanceId, FailureCause> {
        let image_id = self.pipeline.latest_image_id(&self.pipeline_ref).await?;

        let spec = LaunchSpec {
            zone_id: zone.zone_id.clone(),
            subnet_id: zone.public_subnet_id.clone(),
            image_id,
            security_group: self.security_group.clone(),
            termination_protection: true,
            metadata_access: MetadataAccess::Disabled,
        };
        let instance_id = self.compute.launch_instance(&spec).await?;
        info!(instance = %instance_id, zone = %zone.zone_id, "launched replacement instance");

        // The first polls after launch may report no status at all.
        loop {
            match self.compute.describe_instance_status(&instance_id).await? {
                Some(health) if health.is_ready() => break,
                _ => tokio::time::sleep(self.status_poll_interval).await,
            }
        }

        self.compute.disable_source_dest_check(&instance_id).await?;
        info!(instance = %instance_id, zone = %zone.zone_id, "replacement instance ready");
        Ok(instance_id)
    }
}

#[async_trait]
impl TaskAction<ReplacementContext> for LaunchReplacements {
    async fn run(
        &self,
        ctx: &ReplacementContext,
    ) -> Result<ContextPatch<ReplacementContext>, FailureCause> {
        let zones = ctx.zones.clone();
        let total = zones.len();

        let mut outputs: Vec<Option<InstanceId>> = Vec::with_capacity(total);
        outputs.resize_with(total, || None);

        let mut inflight = stream::iter(
            zones
                .into_iter()
                .enumerate()
                .map(|(index, zone)| async move { (index, self.launch_one(zone).await) }),
        )
        .buffer_unordered(self.bound);

        while let Some((index, result)) = inflight.next().await {
            outputs[index] = Some(result?);
        }
        drop(inflight);

        let launched: Vec<InstanceId> = outputs.into_iter().flatten().collect();
        Ok(patch(move |ctx: &mut ReplacementContext| {
            ctx.launched = launched;
        }))
    }
}

/// Build the replacement workflow definition
///
/// Takes the runtime so the failover child can be triggered; the trigger
/// holds only a weak reference.
pub fn definition(
    topology: ZoneTopology,
    compute: Arc<dyn ComputeProvider>,
    pipeline: Arc<dyn ImagePipelineProvider>,
    runtime: &Arc<WorkflowRuntime>,
    config: &OrchestratorConfig,
) -> Result<GraphDefinition<ReplacementContext>, DefinitionError> {
    let guard = Arc::new(CheckSingleton {
        registry: runtime.registry(),
    });
    let invoke_failover = Arc::new(InvokeWorkflow::new(SyncTrigger::new(
        runtime,
        failover::NAME,
        config.trigger_poll_interval,
        config.trigger_timeout,
    )));
    let list = Arc::new(ListExisting {
        compute: Arc::clone(&compute),
        filter: config.instance_tag.clone(),
    });
    let retire = Arc::new(RetireExisting {
        compute: Arc::clone(&compute),
    });
    let launch = Arc::new(LaunchReplacements {
        compute,
        pipeline,
        pipeline_ref: config.pipeline.clone(),
        security_group: config.security_group.clone(),
        status_poll_interval: config.status_poll_interval,
        bound: config.fan_out_bound(topology.len()),
    });

    let graph = StepGraph::new("check-singleton")
        .with_execution_timeout(config.replacement_timeout)
        .state(
            "check-singleton",
            Step::Task(TaskStep::new(guard, "invoke-failover").with_catch("replacement-failed")),
        )
        .state(
            "invoke-failover",
            Step::Task(
                TaskStep::new(invoke_failover, "list-existing").with_catch("replacement-failed"),
            ),
        )
        .state(
            "list-existing",
            Step::Task(TaskStep::new(list, "replace-fleet").with_catch("replacement-failed")),
        )
        .state(
            "replace-fleet",
            Step::Parallel(
                ParallelStep::new("done")
                    .branch("retire-existing", retire)
                    .branch("launch-replacements", launch)
                    .with_catch("replacement-failed"),
            ),
        )
        .state("done", Step::Succeed)
        .state(
            "replacement-failed",
            Step::Fail(FailStep::new(FailureCause::internal(
                "replacement did not complete",
            ))),
        );

    GraphDefinition::new(NAME, graph, move || ReplacementContext::new(&topology))
}
