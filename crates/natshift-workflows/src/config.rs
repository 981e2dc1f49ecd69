//! Orchestrator configuration
//!
//! One config struct covers all four workflows: which instances are ours,
//! which pipeline builds the NAT image, and the polling cadences and
//! deadlines the workflows run under. Durations serialize as whole
//! seconds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use natshift_core::{PipelineRef, SecurityGroupId, TagFilter};

/// Configuration shared by the NAT orchestration workflows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Tag filter selecting the orchestrator's own NAT instances
    #[serde(default = "default_instance_tag")]
    pub instance_tag: TagFilter,

    /// Image pipeline that produces the NAT machine image
    pub pipeline: PipelineRef,

    /// Security group applied to launched NAT instances
    pub security_group: SecurityGroupId,

    /// Interval between instance status-check polls after a launch
    #[serde(with = "duration_secs", default = "default_status_poll_interval")]
    pub status_poll_interval: Duration,

    /// Interval between image build status polls
    #[serde(with = "duration_secs", default = "default_build_poll_interval")]
    pub build_poll_interval: Duration,

    /// Interval between child-execution status polls
    #[serde(with = "duration_secs", default = "default_trigger_poll_interval")]
    pub trigger_poll_interval: Duration,

    /// Upper bound on waiting for a triggered child execution
    #[serde(with = "duration_secs", default = "default_trigger_timeout")]
    pub trigger_timeout: Duration,

    /// Whole-execution deadline for the replacement workflow
    #[serde(with = "duration_secs", default = "default_replacement_timeout")]
    pub replacement_timeout: Duration,

    /// Whole-execution deadline for the maintenance workflow
    #[serde(with = "duration_secs", default = "default_maintenance_timeout")]
    pub maintenance_timeout: Duration,

    /// Concurrency bound for per-zone fan-outs
    #[serde(default = "default_max_map_concurrency")]
    pub max_map_concurrency: usize,
}

impl OrchestratorConfig {
    /// Config with defaults for everything but the two required handles
    pub fn new(pipeline: PipelineRef, security_group: SecurityGroupId) -> Self {
        Self {
            instance_tag: default_instance_tag(),
            pipeline,
            security_group,
            status_poll_interval: default_status_poll_interval(),
            build_poll_interval: default_build_poll_interval(),
            trigger_poll_interval: default_trigger_poll_interval(),
            trigger_timeout: default_trigger_timeout(),
            replacement_timeout: default_replacement_timeout(),
            maintenance_timeout: default_maintenance_timeout(),
            max_map_concurrency: default_max_map_concurrency(),
        }
    }

    pub fn with_instance_tag(mut self, filter: TagFilter) -> Self {
        self.instance_tag = filter;
        self
    }

    pub fn with_status_poll_interval(mut self, interval: Duration) -> Self {
        self.status_poll_interval = interval;
        self
    }

    pub fn with_build_poll_interval(mut self, interval: Duration) -> Self {
        self.build_poll_interval = interval;
        self
    }

    pub fn with_trigger_poll_interval(mut self, interval: Duration) -> Self {
        self.trigger_poll_interval = interval;
        self
    }

    pub fn with_trigger_timeout(mut self, timeout: Duration) -> Self {
        self.trigger_timeout = timeout;
        self
    }

    pub fn with_replacement_timeout(mut self, timeout: Duration) -> Self {
        self.replacement_timeout = timeout;
        self
    }

    pub fn with_maintenance_timeout(mut self, timeout: Duration) -> Self {
        self.maintenance_timeout = timeout;
        self
    }

    pub fn with_max_map_concurrency(mut self, bound: usize) -> Self {
        self.max_map_concurrency = bound;
        self
    }

    /// Fan-out bound for a sequence of the given length, never zero
    pub fn fan_out_bound(&self, items: usize) -> usize {
        items.clamp(1, self.max_map_concurrency.max(1))
    }
}

fn default_instance_tag() -> TagFilter {
    TagFilter::new("natshift:role", "nat")
}

fn default_status_poll_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_build_poll_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_trigger_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_trigger_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_replacement_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_maintenance_timeout() -> Duration {
    Duration::from_secs(1800)
}

fn default_max_map_concurrency() -> usize {
    6
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> OrchestratorConfig {
        OrchestratorConfig::new(
            PipelineRef::new("nat-image-pipeline"),
            SecurityGroupId::new("sg-123"),
        )
    }

    #[test]
    fn test_defaults() {
        let cfg = config();
        assert_eq!(cfg.instance_tag, TagFilter::new("natshift:role", "nat"));
        assert_eq!(cfg.status_poll_interval, Duration::from_secs(10));
        assert_eq!(cfg.replacement_timeout, Duration::from_secs(300));
        assert_eq!(cfg.maintenance_timeout, Duration::from_secs(1800));
        assert_eq!(cfg.max_map_concurrency, 6);
    }

    #[test]
    fn test_fan_out_bound_is_clamped() {
        let cfg = config();
        assert_eq!(cfg.fan_out_bound(0), 1);
        assert_eq!(cfg.fan_out_bound(3), 3);
        assert_eq!(cfg.fan_out_bound(100), 6);
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let cfg: OrchestratorConfig = serde_json::from_value(serde_json::json!({
            "pipeline": "nat-image-pipeline",
            "security_group": "sg-123",
            "build_poll_interval": 5,
        }))
        .expect("should deserialize");

        assert_eq!(cfg.build_poll_interval, Duration::from_secs(5));
        assert_eq!(cfg.status_poll_interval, Duration::from_secs(10));
        assert_eq!(cfg.pipeline.as_str(), "nat-image-pipeline");
    }

    #[test]
    fn test_serde_roundtrip() {
        let cfg = config().with_replacement_timeout(Duration::from_secs(120));
        let json = serde_json::to_value(&cfg).expect("should serialize");
        assert_eq!(json["replacement_timeout"], 120);

        let parsed: OrchestratorConfig =
            serde_json::from_value(json).expect("should deserialize back");
        assert_eq!(parsed.replacement_timeout, Duration::from_secs(120));
    }
}
