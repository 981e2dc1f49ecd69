//! Compute instance model
//!
//! Launch parameters, inventory records, and the two-signal health model
//! the replacement workflow polls before routing traffic at an instance.

use serde::{Deserialize, Serialize};

use crate::ids::{ImageId, InstanceId, SecurityGroupId, SubnetId, ZoneId};

/// Lifecycle of a NAT instance as observed through the compute provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    /// Launch requested, instance not yet reachable
    Launching,

    /// Instance up, waiting for both status checks to pass
    HealthChecking,

    /// Both status checks healthy and source/dest check disabled
    Ready,

    /// Termination requested
    Terminating,

    /// Instance is gone
    Terminated,
}

/// Result of one status-check signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Ok,
    Impaired,
    Initializing,
    InsufficientData,
}

/// The pair of status checks reported for a running instance
///
/// An instance is never considered ready until both signals are positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceHealth {
    /// Reachability of the instance itself
    pub instance_status: HealthState,

    /// Health of the underlying host system
    pub system_status: HealthState,
}

impl InstanceHealth {
    /// True only when both status checks report healthy
    pub fn is_ready(&self) -> bool {
        self.instance_status == HealthState::Ok && self.system_status == HealthState::Ok
    }
}

/// Inventory record for a running NAT instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningInstance {
    /// Instance identifier
    pub instance_id: InstanceId,

    /// Subnet the instance was launched into
    pub subnet_id: SubnetId,
}

/// Whether the instance metadata service is reachable from the instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataAccess {
    Enabled,
    Disabled,
}

/// Parameters for launching a replacement NAT instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchSpec {
    /// Zone the instance serves
    pub zone_id: ZoneId,

    /// Public subnet to launch into
    pub subnet_id: SubnetId,

    /// Machine image to boot from
    pub image_id: ImageId,

    /// Security group applied to the instance
    pub security_group: SecurityGroupId,

    /// Whether accidental termination is blocked
    pub termination_protection: bool,

    /// Metadata service exposure
    pub metadata_access: MetadataAccess,
}

/// Tag key/value filter used to list the orchestrator's own instances
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagFilter {
    pub key: String,
    pub value: String,
}

impl TagFilter {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}
