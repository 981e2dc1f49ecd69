//! Execution store trait and in-memory implementation
//!
//! The store holds one record per execution: status, the step cursor
//! (the state about to execute), and the latest context snapshot. That
//! is enough to answer registry queries and to resume an in-flight
//! execution from its last recorded step after a process restart.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fault::FailureCause;

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Execution not found
    #[error("execution not found: {0}")]
    ExecutionNotFound(Uuid),

    /// Execution already reached a terminal status
    #[error("execution {0} is already terminal")]
    AlreadyTerminal(Uuid),

    /// Backend error
    #[error("storage error: {0}")]
    Storage(String),
}

/// Status of a workflow execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Execution is in flight
    Running,

    /// Execution reached its Succeed state
    Succeeded,

    /// Execution failed with a structured cause
    Failed,
}

impl ExecutionStatus {
    /// Whether the status is terminal
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Persistent record of one workflow execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Unique execution id
    pub execution_id: Uuid,

    /// Workflow name this execution belongs to
    pub workflow: String,

    /// Current status
    pub status: ExecutionStatus,

    /// When the execution started
    pub started_at: DateTime<Utc>,

    /// When the execution reached a terminal status
    pub finished_at: Option<DateTime<Utc>>,

    /// Name of the state about to execute
    pub cursor: String,

    /// Latest context snapshot (Null until the first step completes)
    pub context: serde_json::Value,

    /// Failure cause, set only for failed executions
    pub failure: Option<FailureCause>,
}

impl ExecutionRecord {
    /// Fresh running record positioned at a workflow's start state
    pub fn new(execution_id: Uuid, workflow: impl Into<String>, start_state: &str) -> Self {
        Self {
            execution_id,
            workflow: workflow.into(),
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            cursor: start_state.to_string(),
            context: serde_json::Value::Null,
            failure: None,
        }
    }
}

/// Store for execution records
///
/// Implementations must be thread-safe and support concurrent access
/// from the runtime, the engine, and registry queries.
#[async_trait]
pub trait ExecutionStore: Send + Sync + 'static {
    /// Persist a new execution record
    async fn create(&self, record: ExecutionRecord) -> Result<(), StoreError>;

    /// Record the cursor and context snapshot after a completed step
    async fn record_step(
        &self,
        execution_id: Uuid,
        cursor: &str,
        context: serde_json::Value,
    ) -> Result<(), StoreError>;

    /// Move an execution to a terminal status
    async fn finish(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
        failure: Option<FailureCause>,
    ) -> Result<(), StoreError>;

    /// Fetch one execution record
    async fn get(&self, execution_id: Uuid) -> Result<ExecutionRecord, StoreError>;

    /// List executions of a workflow, optionally filtered by status
    ///
    /// Results are ordered by start time.
    async fn list(
        &self,
        workflow: &str,
        status: Option<ExecutionStatus>,
    ) -> Result<Vec<ExecutionRecord>, StoreError>;
}

/// In-memory implementation of [`ExecutionStore`]
///
/// The default store for tests and single-process deployments. A
/// database-backed implementation can be swapped in without touching the
/// engine.
pub struct InMemoryExecutionStore {
    executions: RwLock<HashMap<Uuid, ExecutionRecord>>,
}

impl InMemoryExecutionStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self {
            executions: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored executions
    pub fn execution_count(&self) -> usize {
        self.executions.read().len()
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        self.executions.write().clear();
    }
}

impl Default for InMemoryExecutionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn create(&self, record: ExecutionRecord) -> Result<(), StoreError> {
        self.executions.write().insert(record.execution_id, record);
        Ok(())
    }

    async fn record_step(
        &self,
        execution_id: Uuid,
        cursor: &str,
        context: serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut executions = self.executions.write();
        let record = executions
            .get_mut(&execution_id)
            .ok_or(StoreError::ExecutionNotFound(execution_id))?;

        if record.status.is_terminal() {
            return Err(StoreError::AlreadyTerminal(execution_id));
        }

        record.cursor = cursor.to_string();
        record.context = context;
        Ok(())
    }

    async fn finish(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
        failure: Option<FailureCause>,
    ) -> Result<(), StoreError> {
        let mut executions = self.executions.write();
        let record = executions
            .get_mut(&execution_id)
            .ok_or(StoreError::ExecutionNotFound(execution_id))?;

        if record.status.is_terminal() {
            return Err(StoreError::AlreadyTerminal(execution_id));
        }

        record.status = status;
        record.failure = failure;
        record.finished_at = Some(Utc::now());
        Ok(())
    }

    async fn get(&self, execution_id: Uuid) -> Result<ExecutionRecord, StoreError> {
        self.executions
            .read()
            .get(&execution_id)
            .cloned()
            .ok_or(StoreError::ExecutionNotFound(execution_id))
    }

    async fn list(
        &self,
        workflow: &str,
        status: Option<ExecutionStatus>,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        let mut records: Vec<ExecutionRecord> = self
            .executions
            .read()
            .values()
            .filter(|r| r.workflow == workflow)
            .filter(|r| status.map_or(true, |s| r.status == s))
            .cloned()
            .collect();

        records.sort_by_key(|r| r.started_at);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(workflow: &str) -> ExecutionRecord {
        ExecutionRecord::new(Uuid::now_v7(), workflow, "start")
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = InMemoryExecutionStore::new();
        let rec = record("nat-failover");
        let id = rec.execution_id;

        store.create(rec).await.expect("should create");

        let loaded = store.get(id).await.expect("should get");
        assert_eq!(loaded.workflow, "nat-failover");
        assert_eq!(loaded.status, ExecutionStatus::Running);
        assert_eq!(loaded.cursor, "start");
        assert!(loaded.context.is_null());
    }

    #[tokio::test]
    async fn test_get_missing_execution() {
        let store = InMemoryExecutionStore::new();
        let result = store.get(Uuid::now_v7()).await;
        assert!(matches!(result, Err(StoreError::ExecutionNotFound(_))));
    }

    #[tokio::test]
    async fn test_record_step_updates_cursor_and_context() {
        let store = InMemoryExecutionStore::new();
        let rec = record("nat-replacement");
        let id = rec.execution_id;
        store.create(rec).await.unwrap();

        store
            .record_step(id, "list-existing", serde_json::json!({ "zones": 3 }))
            .await
            .expect("should record");

        let loaded = store.get(id).await.unwrap();
        assert_eq!(loaded.cursor, "list-existing");
        assert_eq!(loaded.context["zones"], 3);
    }

    #[tokio::test]
    async fn test_finish_is_terminal_once() {
        let store = InMemoryExecutionStore::new();
        let rec = record("nat-fallback");
        let id = rec.execution_id;
        store.create(rec).await.unwrap();

        store
            .finish(id, ExecutionStatus::Failed, Some(FailureCause::timeout("x")))
            .await
            .expect("should finish");

        let loaded = store.get(id).await.unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Failed);
        assert!(loaded.finished_at.is_some());
        assert!(loaded.failure.is_some_and(|f| f.is_timeout()));

        let again = store.finish(id, ExecutionStatus::Succeeded, None).await;
        assert!(matches!(again, Err(StoreError::AlreadyTerminal(_))));

        let step = store.record_step(id, "x", serde_json::Value::Null).await;
        assert!(matches!(step, Err(StoreError::AlreadyTerminal(_))));
    }

    #[tokio::test]
    async fn test_list_filters_by_workflow_and_status() {
        let store = InMemoryExecutionStore::new();

        let a = record("nat-replacement");
        let b = record("nat-replacement");
        let c = record("nat-failover");
        let finished = b.execution_id;
        store.create(a).await.unwrap();
        store.create(b).await.unwrap();
        store.create(c).await.unwrap();
        store
            .finish(finished, ExecutionStatus::Succeeded, None)
            .await
            .unwrap();

        let all = store.list("nat-replacement", None).await.unwrap();
        assert_eq!(all.len(), 2);

        let running = store
            .list("nat-replacement", Some(ExecutionStatus::Running))
            .await
            .unwrap();
        assert_eq!(running.len(), 1);

        let other = store.list("nat-maintenance", None).await.unwrap();
        assert!(other.is_empty());
    }
}
