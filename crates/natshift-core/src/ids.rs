//! Typed identifiers for cloud resources
//!
//! Every resource the orchestrator touches is addressed by an opaque
//! string handed out by the environment. Wrapping them in newtypes keeps
//! a route table id from ever being passed where a subnet id was meant.

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Create a new identifier from any string-like value
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// View the identifier as a string slice
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Availability zone identifier (e.g. `us-east-1a`)
    ZoneId
);
string_id!(
    /// Subnet identifier
    SubnetId
);
string_id!(
    /// Route table identifier
    RouteTableId
);
string_id!(
    /// Compute instance identifier
    InstanceId
);
string_id!(
    /// Standby (managed) gateway identifier
    GatewayId
);
string_id!(
    /// Machine image identifier
    ImageId
);
string_id!(
    /// Security group identifier applied to launched instances
    SecurityGroupId
);
string_id!(
    /// Reference to an image pipeline and its current version
    PipelineRef
);
string_id!(
    /// Token returned when an image build is triggered
    BuildToken
);

/// Next-hop target for a zone's default route
///
/// Exactly one of these is assigned per private route table at any
/// observed instant: the standby gateway during failover, a NAT
/// instance during normal operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum RouteTarget {
    /// Managed standby gateway
    Gateway(GatewayId),

    /// Self-managed NAT instance
    Instance(InstanceId),
}

impl std::fmt::Display for RouteTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gateway(id) => write!(f, "gateway:{id}"),
            Self::Instance(id) => write!(f, "instance:{id}"),
        }
    }
}
