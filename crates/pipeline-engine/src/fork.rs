//! Fork/join (scatter-gather)
//!
//! A [`ForkSequence`] splits one input into items, runs a node per item
//! and folds the results back into one output. Folding always follows the
//! split order, also in parallel mode where branches finish in any order,
//! so reducers need not be associative or commutative.
//!
//! Any branch failure fails the whole fork. In parallel mode the remaining
//! branches are aborted and their results discarded.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::try_join_all;
use tokio::sync::oneshot;

use crate::context::{ContextValue, NodeKey, SequenceContext};
use crate::error::{PipelineError, Result};
use crate::node::{Node, SharedNode};
use crate::shape::NodeShape;
use crate::spawn::{default_spawner, AbortOnDrop, TaskSpawner};

type SplitFn<I, FI> = Arc<dyn Fn(&I) -> Result<Vec<FI>> + Send + Sync>;
type InitFn<I, O> = Arc<dyn Fn(&I) -> Result<O> + Send + Sync>;
type ReduceFn<O, FO> = Arc<dyn Fn(O, FO) -> Result<O> + Send + Sync>;

/// How fork branches are scheduled
#[derive(Clone)]
pub enum ForkMode {
    /// One item at a time on the calling task
    Sequential,
    /// Every item on its own spawned task
    Parallel(Arc<dyn TaskSpawner>),
}

impl ForkMode {
    pub fn is_parallel(&self) -> bool {
        matches!(self, ForkMode::Parallel(_))
    }
}

impl std::fmt::Debug for ForkMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ForkMode::Sequential => f.write_str("Sequential"),
            ForkMode::Parallel(_) => f.write_str("Parallel"),
        }
    }
}

/// Scatter-gather node: split, run per item, reduce in split order
pub struct ForkSequence<I, FI, FO, O> {
    split: SplitFn<I, FI>,
    node: SharedNode<FI, FO>,
    init: InitFn<I, O>,
    reduce: ReduceFn<O, FO>,
    mode: ForkMode,
}

impl<I, FI, FO, O> ForkSequence<I, FI, FO, O>
where
    I: Send + 'static,
    FI: Send + 'static,
    FO: Send + 'static,
    O: Send + 'static,
{
    /// Start a fork from a split function and the per-item node
    ///
    /// A reducer must be supplied before the fork can be built.
    pub fn builder<S, N>(split: S, node: N) -> ForkBuilder<I, FI, FO, O>
    where
        S: Fn(&I) -> Result<Vec<FI>> + Send + Sync + 'static,
        N: Node<FI, FO> + 'static,
    {
        ForkBuilder {
            split: Arc::new(split),
            node: Arc::new(node),
            _output: PhantomData,
        }
    }

    pub fn mode(&self) -> &ForkMode {
        &self.mode
    }

    async fn run_sequential(&self, items: Vec<FI>, mut acc: O) -> Result<O> {
        for item in items {
            let out = self.node.apply(item).await?;
            acc = (self.reduce)(acc, out)?;
        }
        Ok(acc)
    }

    async fn run_parallel(&self, items: Vec<FI>, acc: O, spawner: &dyn TaskSpawner) -> Result<O> {
        let mut tasks = AbortOnDrop(Vec::with_capacity(items.len()));
        let mut receivers = Vec::with_capacity(items.len());

        for (index, item) in items.into_iter().enumerate() {
            let (tx, rx) = oneshot::channel();
            let node = Arc::clone(&self.node);
            tasks.0.push(spawner.spawn(Box::pin(async move {
                let _ = tx.send(node.apply(item).await);
            }))?);
            receivers.push(async move {
                match rx.await {
                    Ok(result) => result,
                    Err(_) => Err(PipelineError::BranchLost(format!("fork branch {index}"))),
                }
            });
        }

        // Completion order is irrelevant: results come back in split order.
        let outputs = try_join_all(receivers).await?;
        outputs
            .into_iter()
            .try_fold(acc, |acc, out| (self.reduce)(acc, out))
    }
}

#[async_trait]
impl<I, FI, FO, O> Node<I, O> for ForkSequence<I, FI, FO, O>
where
    I: Send + 'static,
    FI: Send + 'static,
    FO: Send + 'static,
    O: Send + 'static,
{
    async fn apply(&self, input: I) -> Result<O> {
        let items = (self.split)(&input)?;
        let acc = (self.init)(&input)?;
        drop(input);

        log::debug!(
            "Forking into {} branches ({:?})",
            items.len(),
            self.mode
        );

        match &self.mode {
            ForkMode::Parallel(spawner) if items.len() > 1 => {
                self.run_parallel(items, acc, spawner.as_ref()).await
            }
            _ => self.run_sequential(items, acc).await,
        }
    }

    fn shape(&self) -> NodeShape {
        NodeShape::Fork {
            branch: Box::new(self.node.shape()),
            parallel: self.mode.is_parallel(),
        }
    }
}

/// First builder stage: split and node are set, the reducer is not
pub struct ForkBuilder<I, FI, FO, O> {
    split: SplitFn<I, FI>,
    node: SharedNode<FI, FO>,
    _output: PhantomData<fn() -> O>,
}

impl<I, FI, FO, O> ForkBuilder<I, FI, FO, O>
where
    I: Send + 'static,
    FI: Send + 'static,
    FO: Send + 'static,
    O: Send + 'static,
{
    /// Fold branch outputs into a copy of `initial`
    pub fn reduce_with<R>(self, initial: O, reducer: R) -> ForkReduceBuilder<I, FI, FO, O>
    where
        O: Clone + Sync,
        R: Fn(O, FO) -> Result<O> + Send + Sync + 'static,
    {
        self.reduce_with_factory(move |_: &I| Ok(initial.clone()), reducer)
    }

    /// Fold branch outputs into a value derived from the original input
    pub fn reduce_with_factory<F, R>(self, init: F, reducer: R) -> ForkReduceBuilder<I, FI, FO, O>
    where
        F: Fn(&I) -> Result<O> + Send + Sync + 'static,
        R: Fn(O, FO) -> Result<O> + Send + Sync + 'static,
    {
        ForkReduceBuilder {
            split: self.split,
            node: self.node,
            init: Arc::new(init),
            reduce: Arc::new(reducer),
            mode: ForkMode::Sequential,
        }
    }
}

/// Final builder stage: choose the execution mode and build
pub struct ForkReduceBuilder<I, FI, FO, O> {
    split: SplitFn<I, FI>,
    node: SharedNode<FI, FO>,
    init: InitFn<I, O>,
    reduce: ReduceFn<O, FO>,
    mode: ForkMode,
}

impl<I, FI, FO, O> ForkReduceBuilder<I, FI, FO, O>
where
    I: Send + 'static,
    FI: Send + 'static,
    FO: Send + 'static,
    O: Send + 'static,
{
    /// Process items one at a time (the default)
    pub fn sequential(mut self) -> Self {
        self.mode = ForkMode::Sequential;
        self
    }

    /// Process items concurrently on the default spawner
    pub fn parallel(self) -> Self {
        self.parallel_on(default_spawner())
    }

    /// Process items concurrently on `spawner`
    pub fn parallel_on(mut self, spawner: Arc<dyn TaskSpawner>) -> Self {
        self.mode = ForkMode::Parallel(spawner);
        self
    }

    pub fn build(self) -> ForkSequence<I, FI, FO, O> {
        ForkSequence {
            split: self.split,
            node: self.node,
            init: self.init,
            reduce: self.reduce,
            mode: self.mode,
        }
    }
}

/// Fork over a list stored in a context
///
/// Each item is written under `item_key` into a child context derived
/// from the input, the fork node runs on that child, and whatever the
/// child wrote (minus the item itself) is merged back through the
/// context's combiners in split order.
pub struct ContextualForkSequence<T> {
    scatter_key: NodeKey<Vec<T>>,
    item_key: NodeKey<T>,
    fork: ForkSequence<SequenceContext, SequenceContext, SequenceContext, SequenceContext>,
}

impl<T> ContextualForkSequence<T>
where
    T: ContextValue,
{
    /// Fork over `scatter_key`, exposing each item under `item_key` (parallel by default)
    pub fn new<N>(scatter_key: NodeKey<Vec<T>>, item_key: NodeKey<T>, fork_node: N) -> Self
    where
        N: Node<SequenceContext, SequenceContext> + 'static,
    {
        let split_scatter = scatter_key.clone();
        let split_item = item_key.clone();
        let reduce_item = item_key.clone();

        let fork = ForkSequence::builder(
            move |ctx: &SequenceContext| {
                ctx.require(&split_scatter)?
                    .into_iter()
                    .enumerate()
                    .map(|(index, item)| ctx.create_child_context(index).put(&split_item, item))
                    .collect::<Result<Vec<_>>>()
            },
            fork_node,
        )
        .reduce_with_factory(
            |ctx: &SequenceContext| Ok(ctx.clone()),
            move |acc: SequenceContext, child: SequenceContext| {
                acc.merge(&child.contributions().remove(&reduce_item))
            },
        )
        .parallel()
        .build();

        Self {
            scatter_key,
            item_key,
            fork,
        }
    }

    /// Process items one at a time
    pub fn sequential(mut self) -> Self {
        self.fork.mode = ForkMode::Sequential;
        self
    }

    /// Process items concurrently on `spawner`
    pub fn with_spawner(mut self, spawner: Arc<dyn TaskSpawner>) -> Self {
        self.fork.mode = ForkMode::Parallel(spawner);
        self
    }

    pub fn scatter_key(&self) -> &NodeKey<Vec<T>> {
        &self.scatter_key
    }

    pub fn item_key(&self) -> &NodeKey<T> {
        &self.item_key
    }
}

#[async_trait]
impl<T> Node<SequenceContext, SequenceContext> for ContextualForkSequence<T>
where
    T: ContextValue,
{
    async fn apply(&self, ctx: SequenceContext) -> Result<SequenceContext> {
        self.fork.apply(ctx).await
    }

    fn shape(&self) -> NodeShape {
        self.fork.shape()
    }
}
