//! Per-availability-zone network topology
//!
//! A [`ZoneConfiguration`] is the static record of the subnets, standby
//! gateway, and private route table belonging to one availability zone.
//! The set is loaded once per orchestrator startup and is fixed for its
//! lifetime.

use serde::{Deserialize, Serialize};

use crate::ids::{GatewayId, RouteTableId, SubnetId, ZoneId};

/// Static network configuration for one availability zone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneConfiguration {
    /// Availability zone this configuration belongs to
    pub zone_id: ZoneId,

    /// Public subnet where NAT instances are launched
    pub public_subnet_id: SubnetId,

    /// Managed gateway used as the fallback route target
    pub standby_gateway_id: GatewayId,

    /// Private subnet whose egress is routed through NAT
    pub private_subnet_id: SubnetId,

    /// Route table of the private subnet holding the default route
    pub private_route_table_id: RouteTableId,
}

/// Ordered, immutable set of zone configurations
///
/// Lookups that the workflows need are expressed as explicit typed
/// helpers rather than generic queries over a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneTopology {
    zones: Vec<ZoneConfiguration>,
}

impl ZoneTopology {
    /// Build a topology from an ordered list of zone configurations
    pub fn new(zones: Vec<ZoneConfiguration>) -> Self {
        Self { zones }
    }

    /// All zones, in configuration order
    pub fn zones(&self) -> &[ZoneConfiguration] {
        &self.zones
    }

    /// Number of configured zones
    pub fn len(&self) -> usize {
        self.zones.len()
    }

    /// Whether no zones are configured
    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    /// Find the zone whose public subnet matches the given subnet id
    ///
    /// This is the equality-filter join the fallback workflow uses to map
    /// a running instance back to the zone whose routes it serves.
    pub fn zone_for_public_subnet(&self, subnet_id: &SubnetId) -> Option<&ZoneConfiguration> {
        self.zones.iter().find(|z| &z.public_subnet_id == subnet_id)
    }

    /// Find a zone by its availability zone id
    pub fn zone(&self, zone_id: &ZoneId) -> Option<&ZoneConfiguration> {
        self.zones.iter().find(|z| &z.zone_id == zone_id)
    }
}

impl IntoIterator for ZoneTopology {
    type Item = ZoneConfiguration;
    type IntoIter = std::vec::IntoIter<ZoneConfiguration>;

    fn into_iter(self) -> Self::IntoIter {
        self.zones.into_iter()
    }
}
