//! Failover workflow
//!
//! Points every zone's private default route at the zone's standby
//! gateway. Zones are rerouted concurrently under the fan-out bound, and
//! the workflow is all-or-nothing: any zone failing fails the whole
//! execution so the caller knows traffic is not fully drained onto the
//! standby path.
//!
//! Rerouting is idempotent, so repeated failover runs (including resumed
//! ones) are safe.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use natshift_core::{RouteTarget, RoutingProvider, ZoneConfiguration, ZoneId, ZoneTopology};
use natshift_engine::{
    DefinitionError, FailStep, FailureCause, GraphDefinition, ItemAction, MapOver, MapStep, Step,
    StepGraph,
};

use crate::config::OrchestratorConfig;

/// Workflow name used for registration and registry queries
pub const NAME: &str = "nat-failover";

/// Execution context for one failover run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverContext {
    zones: Vec<ZoneConfiguration>,
    rerouted: Vec<ZoneId>,
}

impl FailoverContext {
    fn new(topology: &ZoneTopology) -> Self {
        Self {
            zones: topology.zones().to_vec(),
            rerouted: Vec::new(),
        }
    }

    /// Zones whose routes now point at their standby gateway
    pub fn rerouted(&self) -> &[ZoneId] {
        &self.rerouted
    }
}

struct RerouteToGateway {
    routing: Arc<dyn RoutingProvider>,
}

#[async_trait]
impl ItemAction<ZoneConfiguration, ZoneId> for RerouteToGateway {
    async fn run(&self, zone: ZoneConfiguration) -> Result<ZoneId, FailureCause> {
        let target = RouteTarget::Gateway(zone.standby_gateway_id.clone());
        self.routing
            .replace_default_route(&zone.private_route_table_id, &target)
            .await?;

        info!(
            zone = %zone.zone_id,
            route_table = %zone.private_route_table_id,
            gateway = %zone.standby_gateway_id,
            "default route moved to standby gateway"
        );
        Ok(zone.zone_id)
    }
}

/// Build the failover workflow definition
pub fn definition(
    topology: ZoneTopology,
    routing: Arc<dyn RoutingProvider>,
    config: &OrchestratorConfig,
) -> Result<GraphDefinition<FailoverContext>, DefinitionError> {
    let bound = config.fan_out_bound(topology.len());
    let reroute = Arc::new(MapOver::new(
        |ctx: &FailoverContext| ctx.zones.clone(),
        Arc::new(RerouteToGateway { routing }),
        |ctx: &mut FailoverContext, zones| ctx.rerouted = zones,
    ));

    let graph = StepGraph::new("reroute-zones")
        .state(
            "reroute-zones",
            Step::Map(MapStep::new(reroute, bound, "done").with_catch("failover-failed")),
        )
        .state("done", Step::Succeed)
        .state(
            "failover-failed",
            Step::Fail(FailStep::new(FailureCause::task(
                "routing",
                "failover could not reroute every zone",
            ))),
        );

    GraphDefinition::new(NAME, graph, move || FailoverContext::new(&topology))
}
