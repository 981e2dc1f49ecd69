//! Machine image pipeline model
//!
//! The image build/test/distribute pipeline is an opaque external
//! service. The orchestrator only triggers builds and polls their status.

use serde::{Deserialize, Serialize};

/// Status of the most recent image build, polled not pushed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageBuildStatus {
    /// A build is actively running
    InProgress,

    /// The latest build finished and its image is distributed
    Available,

    /// The latest build failed
    Failed,
}

impl ImageBuildStatus {
    /// Whether the pipeline is settled (no build actively running)
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

impl std::fmt::Display for ImageBuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InProgress => write!(f, "in_progress"),
            Self::Available => write!(f, "available"),
            Self::Failed => write!(f, "failed"),
        }
    }
}
