//! Execution registry and advisory singleton guard
//!
//! The registry answers "is another execution of workflow W already
//! running?". The calling execution is included in the listing by
//! construction (its record was created before its first step ran), so
//! the guard checks for more than one running record.
//!
//! This is a check-then-act pattern with an inherent race window between
//! the listing and the decision. The store offers no conditional-write
//! primitive, so the guard stays advisory rather than a true lock.

use std::sync::Arc;

use tracing::debug;

use crate::fault::FailureCause;
use crate::store::{ExecutionRecord, ExecutionStatus, ExecutionStore, StoreError};

/// Queries running executions and enforces the advisory singleton guard
#[derive(Clone)]
pub struct ExecutionRegistry {
    store: Arc<dyn ExecutionStore>,
}

impl ExecutionRegistry {
    /// Create a registry over the given store
    pub fn new(store: Arc<dyn ExecutionStore>) -> Self {
        Self { store }
    }

    /// All Running executions of a workflow, including the caller's own
    pub async fn running_executions(
        &self,
        workflow: &str,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        self.store
            .list(workflow, Some(ExecutionStatus::Running))
            .await
    }

    /// Fail with SingletonConflict when another execution is in flight
    ///
    /// Called from inside a running execution, so one running record
    /// (the caller itself) is expected; more than one is a conflict.
    pub async fn assert_sole_execution(&self, workflow: &str) -> Result<(), FailureCause> {
        let running = self
            .running_executions(workflow)
            .await
            .map_err(FailureCause::internal)?;

        debug!(workflow, running = running.len(), "singleton guard check");

        if running.len() > 1 {
            Err(FailureCause::singleton(format!(
                "another {workflow} execution is already running"
            )))
        } else {
            Ok(())
        }
    }
}
