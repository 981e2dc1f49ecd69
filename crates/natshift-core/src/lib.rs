//! # Natshift Core
//!
//! Shared abstractions for the NAT orchestration engine:
//!
//! - Typed identifiers for cloud resources ([`ids`])
//! - Per-zone network topology ([`zone`])
//! - Compute instance model ([`instance`])
//! - Machine image pipeline model ([`image`])
//! - Capability provider contracts ([`providers`])
//!
//! The orchestration core never talks to a cloud API directly. Everything
//! it needs from the environment is expressed as a provider trait here,
//! and concrete adapters are constructed and injected by the host process.

pub mod ids;
pub mod image;
pub mod instance;
pub mod providers;
pub mod zone;

pub use ids::{
    BuildToken, GatewayId, ImageId, InstanceId, PipelineRef, RouteTableId, RouteTarget,
    SecurityGroupId, SubnetId, ZoneId,
};
pub use image::ImageBuildStatus;
pub use instance::{
    HealthState, InstanceHealth, InstanceState, LaunchSpec, MetadataAccess, RunningInstance,
    TagFilter,
};
pub use providers::{
    ComputeProvider, ImagePipelineProvider, ProviderError, RoutingProvider, ZoneConfigProvider,
};
pub use zone::{ZoneConfiguration, ZoneTopology};
