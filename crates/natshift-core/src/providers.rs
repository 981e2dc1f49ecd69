//! Capability provider contracts
//!
//! The orchestration core consumes four external capabilities: zone
//! configuration, compute, routing, and the image pipeline. Each is an
//! async trait so the host can inject real cloud adapters in production
//! and in-memory fakes in tests.
//!
//! Mutation calls must be independently safe to invoke concurrently from
//! different zones; `replace_default_route` must additionally be
//! idempotent (repeat calls with the same target are a no-op).

use async_trait::async_trait;

use crate::ids::{BuildToken, ImageId, InstanceId, PipelineRef, RouteTableId, RouteTarget};
use crate::image::ImageBuildStatus;
use crate::instance::{InstanceHealth, LaunchSpec, RunningInstance, TagFilter};
use crate::zone::ZoneConfiguration;

/// Error from any provider call
///
/// Carries the capability name so a workflow failure can say which
/// external dependency broke.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("{capability} provider error: {message}")]
pub struct ProviderError {
    /// Capability that failed (e.g. `routing`, `compute`)
    pub capability: String,

    /// Human-readable cause
    pub message: String,
}

impl ProviderError {
    pub fn new(capability: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
            message: message.into(),
        }
    }

    pub fn compute(message: impl Into<String>) -> Self {
        Self::new("compute", message)
    }

    pub fn routing(message: impl Into<String>) -> Self {
        Self::new("routing", message)
    }

    pub fn pipeline(message: impl Into<String>) -> Self {
        Self::new("image-pipeline", message)
    }
}

/// Read-only source of per-zone network configuration
///
/// Loaded once per orchestrator startup; the zone set is fixed for the
/// orchestrator's lifetime.
#[async_trait]
pub trait ZoneConfigProvider: Send + Sync {
    /// Ordered list of all configured availability zones
    async fn list_zones(&self) -> Result<Vec<ZoneConfiguration>, ProviderError>;
}

/// Compute instance lifecycle operations
#[async_trait]
pub trait ComputeProvider: Send + Sync {
    /// Launch a new instance and return its id
    async fn launch_instance(&self, spec: &LaunchSpec) -> Result<InstanceId, ProviderError>;

    /// Fetch the two status-check signals for an instance
    ///
    /// Returns `None` when no status has been reported yet, which callers
    /// must tolerate on the first poll after launch.
    async fn describe_instance_status(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Option<InstanceHealth>, ProviderError>;

    /// Terminate an instance
    async fn terminate_instance(&self, instance_id: &InstanceId) -> Result<(), ProviderError>;

    /// Clear termination protection so the instance can be terminated
    async fn disable_termination_protection(
        &self,
        instance_id: &InstanceId,
    ) -> Result<(), ProviderError>;

    /// Disable source/destination checking so the instance can forward
    /// traffic it did not originate
    async fn disable_source_dest_check(
        &self,
        instance_id: &InstanceId,
    ) -> Result<(), ProviderError>;

    /// List running instances matching a tag filter
    async fn list_running_instances(
        &self,
        filter: &TagFilter,
    ) -> Result<Vec<RunningInstance>, ProviderError>;
}

/// Route table mutation
#[async_trait]
pub trait RoutingProvider: Send + Sync {
    /// Point a route table's default route at the given target
    ///
    /// Idempotent: repeating the call with the same target succeeds
    /// without effect.
    async fn replace_default_route(
        &self,
        route_table_id: &RouteTableId,
        target: &RouteTarget,
    ) -> Result<(), ProviderError>;
}

/// Trigger and observe the external image build pipeline
#[async_trait]
pub trait ImagePipelineProvider: Send + Sync {
    /// Kick off a new image build
    async fn trigger_build(&self, pipeline: &PipelineRef) -> Result<BuildToken, ProviderError>;

    /// Current status of the pipeline's latest build
    async fn get_build_status(
        &self,
        pipeline: &PipelineRef,
    ) -> Result<ImageBuildStatus, ProviderError>;

    /// Newest distributed image id produced by the pipeline
    async fn latest_image_id(&self, pipeline: &PipelineRef) -> Result<ImageId, ProviderError>;
}
