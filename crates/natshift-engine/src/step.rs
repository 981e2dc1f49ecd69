//! Step kinds and their action traits
//!
//! A step reads the execution context immutably and, on success, returns
//! a [`ContextPatch`] the engine applies. A patch mutates only the fields
//! the step owns; unrelated context fields are never replaced wholesale.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::fault::FailureCause;

/// Bounds every workflow context type must satisfy
///
/// Contexts are snapshotted to the execution store after each step, so
/// they must serialize; resuming deserializes them back.
pub trait WorkflowContext: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> WorkflowContext for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Deferred mutation of the execution context produced by a step
pub type ContextPatch<C> = Box<dyn FnOnce(&mut C) + Send>;

/// Build a context patch from a closure
pub fn patch<C, F>(apply: F) -> ContextPatch<C>
where
    F: FnOnce(&mut C) + Send + 'static,
{
    Box::new(apply)
}

/// Patch that leaves the context untouched
pub fn no_change<C>() -> ContextPatch<C> {
    Box::new(|_| {})
}

/// One external side effect with a typed context
#[async_trait]
pub trait TaskAction<C: Send + Sync>: Send + Sync {
    /// Perform the effect and describe the resulting context change
    async fn run(&self, ctx: &C) -> Result<ContextPatch<C>, FailureCause>;
}

/// Per-item body of a Map step
#[async_trait]
pub trait ItemAction<I: Send, O: Send>: Send + Sync {
    async fn run(&self, item: I) -> Result<O, FailureCause>;
}

/// Erased fan-out executed by a Map step
#[async_trait]
pub trait FanOutAction<C: Send + Sync>: Send + Sync {
    /// Run all items under the given concurrency bound
    async fn run(&self, ctx: &C, limit: usize) -> Result<ContextPatch<C>, FailureCause>;
}

/// Typed Map body: extract items, run each, merge outputs
///
/// Items are indexed by input order and may complete in any order under
/// the concurrency bound; `merge` receives outputs back in input order.
/// The fan-out is all-or-nothing and fail-fast: the first item failure
/// abandons in-flight siblings and fails the whole step.
pub struct MapOver<C, I, O> {
    items: fn(&C) -> Vec<I>,
    each: Arc<dyn ItemAction<I, O>>,
    merge: fn(&mut C, Vec<O>),
}

impl<C, I, O> MapOver<C, I, O>
where
    C: Send + Sync + 'static,
    I: Send + 'static,
    O: Send + 'static,
{
    pub fn new(
        items: fn(&C) -> Vec<I>,
        each: Arc<dyn ItemAction<I, O>>,
        merge: fn(&mut C, Vec<O>),
    ) -> Self {
        Self { items, each, merge }
    }
}

#[async_trait]
impl<C, I, O> FanOutAction<C> for MapOver<C, I, O>
where
    C: Send + Sync + 'static,
    I: Send + 'static,
    O: Send + 'static,
{
    async fn run(&self, ctx: &C, limit: usize) -> Result<ContextPatch<C>, FailureCause> {
        let items = (self.items)(ctx);
        let total = items.len();

        let mut outputs: Vec<Option<O>> = Vec::with_capacity(total);
        outputs.resize_with(total, || None);

        let mut inflight = stream::iter(items.into_iter().enumerate().map(|(index, item)| {
            let each = Arc::clone(&self.each);
            async move { (index, each.run(item).await) }
        }))
        .buffer_unordered(limit.max(1));

        while let Some((index, result)) = inflight.next().await {
            match result {
                Ok(output) => outputs[index] = Some(output),
                // fail-fast: dropping the stream abandons in-flight siblings
                Err(cause) => return Err(cause),
            }
        }
        drop(inflight);

        let outputs: Vec<O> = outputs.into_iter().flatten().collect();
        let merge = self.merge;
        Ok(Box::new(move |ctx: &mut C| merge(ctx, outputs)))
    }
}

/// Task state: one provider call with bounded timeout
pub struct TaskStep<C: Send + Sync> {
    pub action: Arc<dyn TaskAction<C>>,
    pub timeout: Option<Duration>,
    pub catch: Option<String>,
    pub next: String,
}

impl<C: Send + Sync> TaskStep<C> {
    pub fn new(action: Arc<dyn TaskAction<C>>, next: impl Into<String>) -> Self {
        Self {
            action,
            timeout: None,
            catch: None,
            next: next.into(),
        }
    }

    /// Bound the task's own runtime
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Redirect failures to the named state instead of failing outright
    pub fn with_catch(mut self, state: impl Into<String>) -> Self {
        self.catch = Some(state.into());
        self
    }
}

/// Predicate over the context used by Choice branches
pub type ChoicePredicate<C> = Arc<dyn Fn(&C) -> bool + Send + Sync>;

/// Choice state: first true predicate wins; default is mandatory
pub struct ChoiceStep<C> {
    pub branches: Vec<(ChoicePredicate<C>, String)>,
    pub default: Option<String>,
}

impl<C> ChoiceStep<C> {
    pub fn new() -> Self {
        Self {
            branches: Vec::new(),
            default: None,
        }
    }

    pub fn when<F>(mut self, predicate: F, next: impl Into<String>) -> Self
    where
        F: Fn(&C) -> bool + Send + Sync + 'static,
    {
        self.branches.push((Arc::new(predicate), next.into()));
        self
    }

    /// Branch taken when no predicate matches
    ///
    /// A Choice without a default is rejected by graph validation.
    pub fn otherwise(mut self, next: impl Into<String>) -> Self {
        self.default = Some(next.into());
        self
    }
}

impl<C> Default for ChoiceStep<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait state: timed suspension, no side effect
pub struct WaitStep {
    pub duration: Duration,
    pub next: String,
}

impl WaitStep {
    pub fn new(duration: Duration, next: impl Into<String>) -> Self {
        Self {
            duration,
            next: next.into(),
        }
    }
}

/// Pass state: pure context reshaping
pub struct PassStep<C> {
    pub apply: Arc<dyn Fn(&mut C) + Send + Sync>,
    pub next: String,
}

impl<C> PassStep<C> {
    pub fn new<F>(apply: F, next: impl Into<String>) -> Self
    where
        F: Fn(&mut C) + Send + Sync + 'static,
    {
        Self {
            apply: Arc::new(apply),
            next: next.into(),
        }
    }
}

/// Map state: bounded fan-out over a context-derived sequence
pub struct MapStep<C: Send + Sync> {
    pub action: Arc<dyn FanOutAction<C>>,
    pub max_concurrency: usize,
    pub catch: Option<String>,
    pub next: String,
}

impl<C: Send + Sync> MapStep<C> {
    pub fn new(
        action: Arc<dyn FanOutAction<C>>,
        max_concurrency: usize,
        next: impl Into<String>,
    ) -> Self {
        Self {
            action,
            max_concurrency,
            catch: None,
            next: next.into(),
        }
    }

    pub fn with_catch(mut self, state: impl Into<String>) -> Self {
        self.catch = Some(state.into());
        self
    }
}

/// Parallel state: fixed named branches, all must succeed
pub struct ParallelStep<C: Send + Sync> {
    pub branches: Vec<(String, Arc<dyn TaskAction<C>>)>,
    pub catch: Option<String>,
    pub next: String,
}

impl<C: Send + Sync> ParallelStep<C> {
    pub fn new(next: impl Into<String>) -> Self {
        Self {
            branches: Vec::new(),
            catch: None,
            next: next.into(),
        }
    }

    pub fn branch(mut self, name: impl Into<String>, action: Arc<dyn TaskAction<C>>) -> Self {
        self.branches.push((name.into(), action));
        self
    }

    pub fn with_catch(mut self, state: impl Into<String>) -> Self {
        self.catch = Some(state.into());
        self
    }
}

/// Terminal Fail state with its structured cause
///
/// When a catch routed here, the recorded fault takes precedence over
/// the static cause.
pub struct FailStep {
    pub cause: FailureCause,
}

impl FailStep {
    pub fn new(cause: FailureCause) -> Self {
        Self { cause }
    }
}

/// One state in a step graph
pub enum Step<C: Send + Sync> {
    Task(TaskStep<C>),
    Choice(ChoiceStep<C>),
    Wait(WaitStep),
    Pass(PassStep<C>),
    Map(MapStep<C>),
    Parallel(ParallelStep<C>),
    Succeed,
    Fail(FailStep),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(serde::Serialize, serde::Deserialize)]
    struct Numbers {
        inputs: Vec<u32>,
        doubled: Vec<u32>,
    }

    struct Doubler {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ItemAction<u32, u32> for Doubler {
        async fn run(&self, item: u32) -> Result<u32, FailureCause> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(item * 2)
        }
    }

    struct FailOn {
        bad: u32,
    }

    #[async_trait]
    impl ItemAction<u32, u32> for FailOn {
        async fn run(&self, item: u32) -> Result<u32, FailureCause> {
            if item == self.bad {
                Err(FailureCause::task("compute", format!("item {item} broke")))
            } else {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(item)
            }
        }
    }

    #[tokio::test]
    async fn test_map_over_merges_in_input_order() {
        let ctx = Numbers {
            inputs: vec![3, 1, 4, 1, 5],
            doubled: vec![],
        };
        let map = MapOver::new(
            |ctx: &Numbers| ctx.inputs.clone(),
            Arc::new(Doubler {
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }),
            |ctx, outputs| ctx.doubled = outputs,
        );

        let apply = map.run(&ctx, 3).await.expect("should fan out");
        let mut ctx = ctx;
        apply(&mut ctx);

        assert_eq!(ctx.doubled, vec![6, 2, 8, 2, 10]);
    }

    #[tokio::test]
    async fn test_map_over_honors_concurrency_bound() {
        let doubler = Arc::new(Doubler {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let ctx = Numbers {
            inputs: (0..12).collect(),
            doubled: vec![],
        };
        let map = MapOver::new(
            |ctx: &Numbers| ctx.inputs.clone(),
            Arc::clone(&doubler) as Arc<dyn ItemAction<u32, u32>>,
            |ctx, outputs| ctx.doubled = outputs,
        );

        map.run(&ctx, 2).await.expect("should fan out");

        assert!(doubler.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_map_over_fails_fast_on_first_error() {
        let ctx = Numbers {
            inputs: vec![1, 2, 3],
            doubled: vec![],
        };
        let map = MapOver::new(
            |ctx: &Numbers| ctx.inputs.clone(),
            Arc::new(FailOn { bad: 2 }),
            |ctx, outputs| ctx.doubled = outputs,
        );

        let cause = map.run(&ctx, 3).await.err().expect("should fail");
        assert_eq!(cause.message, "item 2 broke");
    }

    #[tokio::test]
    async fn test_map_over_empty_input_is_noop_success() {
        let ctx = Numbers {
            inputs: vec![],
            doubled: vec![],
        };
        let map = MapOver::new(
            |ctx: &Numbers| ctx.inputs.clone(),
            Arc::new(FailOn { bad: 0 }),
            |ctx, outputs| ctx.doubled = outputs,
        );

        let apply = map.run(&ctx, 6).await.expect("empty fan-out succeeds");
        let mut ctx = ctx;
        apply(&mut ctx);
        assert!(ctx.doubled.is_empty());
    }
}
