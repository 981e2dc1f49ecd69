//! Structured failure causes
//!
//! Every failed execution terminates with a [`FailureCause`] that is
//! persisted on the execution record and queryable afterwards. The kind
//! taxonomy distinguishes provider faults, deadline expiry, singleton
//! conflicts, and external pipeline failures.

use serde::{Deserialize, Serialize};

use natshift_core::ProviderError;

/// Category of a workflow failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    /// A provider call failed; carries the capability that broke
    TaskFailure { capability: String },

    /// A step-level or whole-execution deadline was exceeded
    Timeout,

    /// Another execution of the same workflow (or an active pipeline
    /// build) is already in progress
    SingletonConflict,

    /// The external image build reported failure
    PipelineFailure,

    /// Engine or store fault not attributable to a capability
    Internal,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TaskFailure { capability } => write!(f, "task failure ({capability})"),
            Self::Timeout => write!(f, "timeout"),
            Self::SingletonConflict => write!(f, "singleton conflict"),
            Self::PipelineFailure => write!(f, "pipeline failure"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// Structured cause carried by a failed execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureCause {
    /// Failure category
    pub kind: FailureKind,

    /// Human-readable description
    pub message: String,
}

impl FailureCause {
    /// Provider call failure for a named capability
    pub fn task(capability: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self {
            kind: FailureKind::TaskFailure {
                capability: capability.into(),
            },
            message: message.to_string(),
        }
    }

    /// Deadline expiry
    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Timeout,
            message: message.into(),
        }
    }

    /// Concurrent-execution conflict
    pub fn singleton(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::SingletonConflict,
            message: message.into(),
        }
    }

    /// External image build failure
    pub fn pipeline(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::PipelineFailure,
            message: message.into(),
        }
    }

    /// Engine-internal fault
    pub fn internal(message: impl std::fmt::Display) -> Self {
        Self {
            kind: FailureKind::Internal,
            message: message.to_string(),
        }
    }

    /// Whether this cause is a singleton conflict
    pub fn is_singleton_conflict(&self) -> bool {
        matches!(self.kind, FailureKind::SingletonConflict)
    }

    /// Whether this cause is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, FailureKind::Timeout)
    }
}

impl std::fmt::Display for FailureCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for FailureCause {}

impl From<ProviderError> for FailureCause {
    fn from(error: ProviderError) -> Self {
        Self {
            kind: FailureKind::TaskFailure {
                capability: error.capability.clone(),
            },
            message: error.message,
        }
    }
}
