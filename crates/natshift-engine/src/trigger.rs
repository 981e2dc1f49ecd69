//! Synchronous nested-workflow triggers
//!
//! "Trigger and wait" starts a child execution and polls it to a
//! terminal state before returning. The child's failure surfaces to the
//! parent as an ordinary task failure, subject to the parent's catch
//! configuration. This is an explicit task-level construct, not engine
//! magic.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::fault::FailureCause;
use crate::runtime::{RuntimeError, WorkflowRuntime};
use crate::store::{ExecutionRecord, ExecutionStatus};

/// Starts a named child workflow and blocks until it is terminal
///
/// Holds a weak reference to the runtime: definitions are registered on
/// the runtime, so a strong reference would cycle.
pub struct SyncTrigger {
    runtime: Weak<WorkflowRuntime>,
    workflow: String,
    poll_interval: Duration,
    timeout: Duration,
}

impl SyncTrigger {
    /// Create a trigger for the given child workflow
    pub fn new(
        runtime: &Arc<WorkflowRuntime>,
        workflow: impl Into<String>,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            runtime: Arc::downgrade(runtime),
            workflow: workflow.into(),
            poll_interval,
            timeout,
        }
    }

    /// Name of the child workflow this trigger starts
    pub fn workflow(&self) -> &str {
        &self.workflow
    }

    /// Start the child and poll it to a terminal state
    #[instrument(skip(self), fields(child = %self.workflow))]
    pub async fn invoke(&self) -> Result<ExecutionRecord, FailureCause> {
        let runtime = self
            .runtime
            .upgrade()
            .ok_or_else(|| FailureCause::internal("workflow runtime has shut down"))?;

        info!("triggering child workflow");

        let record = runtime
            .run_to_terminal(&self.workflow, self.poll_interval, self.timeout)
            .await
            .map_err(|error| match error {
                RuntimeError::AwaitTimeout(execution_id, limit) => FailureCause::timeout(format!(
                    "child {} execution {execution_id} still running after {limit:?}",
                    self.workflow
                )),
                other => FailureCause::internal(other),
            })?;

        match record.status {
            ExecutionStatus::Succeeded => Ok(record),
            _ => {
                let child_cause = record
                    .failure
                    .as_ref()
                    .map(|f| f.to_string())
                    .unwrap_or_else(|| "no cause recorded".to_string());
                warn!(execution_id = %record.execution_id, %child_cause, "child workflow failed");
                Err(FailureCause::task(
                    self.workflow.clone(),
                    format!("child execution failed: {child_cause}"),
                ))
            }
        }
    }
}
