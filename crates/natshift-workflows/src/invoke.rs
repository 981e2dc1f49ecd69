//! Child-workflow invocation task
//!
//! Wraps a [`SyncTrigger`] as a task action usable from any context type.
//! The child's terminal record is not merged into the parent context; a
//! failed child surfaces as a task failure subject to the parent's catch.

use async_trait::async_trait;

use natshift_engine::{no_change, ContextPatch, FailureCause, SyncTrigger, TaskAction};

pub(crate) struct InvokeWorkflow {
    trigger: SyncTrigger,
}

impl InvokeWorkflow {
    pub(crate) fn new(trigger: SyncTrigger) -> Self {
        Self { trigger }
    }
}

#[async_trait]
impl<C: Send + Sync> TaskAction<C> for InvokeWorkflow {
    async fn run(&self, _ctx: &C) -> Result<ContextPatch<C>, FailureCause> {
        self.trigger.invoke().await?;
        Ok(no_change())
    }
}
