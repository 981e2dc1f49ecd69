//! Fallback workflow
//!
//! Restores the primary path: lists the orchestrator's running NAT
//! instances and points each instance's zone routes back at it. Zones
//! without a running instance keep their current (standby) route, so a
//! partial fleet gives a partial fallback. No instances running is a
//! successful no-op.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use natshift_core::{
    ComputeProvider, InstanceId, RouteTarget, RoutingProvider, RunningInstance, TagFilter,
    ZoneTopology,
};
use natshift_engine::{
    patch, ChoiceStep, ContextPatch, DefinitionError, FailStep, FailureCause, GraphDefinition,
    ItemAction, MapOver, MapStep, Step, StepGraph, TaskAction, TaskStep,
};

use crate::config::OrchestratorConfig;

/// Workflow name used for registration and registry queries
pub const NAME: &str = "nat-fallback";

/// Execution context for one fallback run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FallbackContext {
    instances: Vec<RunningInstance>,
    restored: Vec<InstanceId>,
}

impl FallbackContext {
    fn has_instances(&self) -> bool {
        !self.instances.is_empty()
    }

    /// Instances whose zones now route through them again
    pub fn restored(&self) -> &[InstanceId] {
        &self.restored
    }
}

struct ListNatInstances {
    compute: Arc<dyn ComputeProvider>,
    filter: TagFilter,
}

#[async_trait]
impl TaskAction<FallbackContext> for ListNatInstances {
    async fn run(&self, _ctx: &FallbackContext) -> Result<ContextPatch<FallbackContext>, FailureCause> {
        let instances = self.compute.list_running_instances(&self.filter).await?;
        info!(count = instances.len(), "listed running NAT instances");
        Ok(patch(move |ctx: &mut FallbackContext| {
            ctx.instances = instances;
        }))
    }
}

struct RestoreZoneRoute {
    routing: Arc<dyn RoutingProvider>,
    topology: ZoneTopology,
}

#[async_trait]
impl ItemAction<RunningInstance, InstanceId> for RestoreZoneRoute {
    async fn run(&self, instance: RunningInstance) -> Result<InstanceId, FailureCause> {
        // An instance maps to the zone whose public subnet it runs in;
        // instances in unconfigured subnets are a configuration fault.
        let zone = self
            .topology
            .zone_for_public_subnet(&instance.subnet_id)
            .ok_or_else(|| {
                FailureCause::task(
                    "routing",
                    format!("no zone configured for subnet {}", instance.subnet_id),
                )
            })?;

        let target = RouteTarget::Instance(instance.instance_id.clone());
        self.routing
            .replace_default_route(&zone.private_route_table_id, &target)
            .await?;

        info!(
            zone = %zone.zone_id,
            instance = %instance.instance_id,
            "default route moved back to NAT instance"
        );
        Ok(instance.instance_id)
    }
}

/// Build the fallback workflow definition
pub fn definition(
    topology: ZoneTopology,
    compute: Arc<dyn ComputeProvider>,
    routing: Arc<dyn RoutingProvider>,
    config: &OrchestratorConfig,
) -> Result<GraphDefinition<FallbackContext>, DefinitionError> {
    let bound = config.fan_out_bound(topology.len());
    let list = Arc::new(ListNatInstances {
        compute,
        filter: config.instance_tag.clone(),
    });
    let restore = Arc::new(MapOver::new(
        |ctx: &FallbackContext| ctx.instances.clone(),
        Arc::new(RestoreZoneRoute { routing, topology }),
        |ctx: &mut FallbackContext, restored| ctx.restored = restored,
    ));

    let graph = StepGraph::new("list-instances")
        .state(
            "list-instances",
            Step::Task(TaskStep::new(list, "any-instances").with_catch("fallback-failed")),
        )
        .state(
            "any-instances",
            Step::Choice(
                ChoiceStep::new()
                    .when(FallbackContext::has_instances, "restore-routes")
                    .otherwise("done"),
            ),
        )
        .state(
            "restore-routes",
            Step::Map(MapStep::new(restore, bound, "done").with_catch("fallback-failed")),
        )
        .state("done", Step::Succeed)
        .state(
            "fallback-failed",
            Step::Fail(FailStep::new(FailureCause::task(
                "routing",
                "fallback could not restore zone routes",
            ))),
        );

    GraphDefinition::new(NAME, graph, FallbackContext::default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_instances() {
        let empty = FallbackContext::default();
        assert!(!empty.has_instances());

        let one = FallbackContext {
            instances: vec![RunningInstance {
                instance_id: InstanceId::new("i-1"),
                subnet_id: natshift_core::SubnetId::new("subnet-pub-a"),
            }],
            restored: vec![],
        };
        assert!(one.has_instances());
    }
}
