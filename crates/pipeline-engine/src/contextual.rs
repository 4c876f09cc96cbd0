//! Context-aware nodes and sequences
//!
//! A [`ContextualNode`] pulls its input out of a [`SequenceContext`], runs
//! a plain node and writes the result back under its own key. A
//! [`ContextualSequence`] seeds a context from its input and threads it
//! through a chain of such steps. Only nodes from context to context can
//! be appended, so a step that is not context-aware never compiles.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::context::{ContextValue, NodeKey, SequenceContext, SequenceKey, TypeCombinerFactory};
use crate::error::Result;
use crate::node::{node_fn, Node, SharedNode};
use crate::sequence::{Sequence, SequenceBuilder};
use crate::shape::NodeShape;

/// Pulls a node's input out of the current context
pub type Extractor<In> = Arc<dyn Fn(&SequenceContext) -> Result<In> + Send + Sync>;

/// Wraps a plain node so it reads from and writes to a context
pub struct ContextualNode<In, Out> {
    key: NodeKey<Out>,
    extract: Extractor<In>,
    node: SharedNode<In, Out>,
}

impl<In, Out> ContextualNode<In, Out>
where
    In: Send + 'static,
    Out: ContextValue,
{
    /// Store the output of `node` under `key`, feeding it whatever `extractor` returns
    pub fn new<F, N>(key: NodeKey<Out>, extractor: F, node: N) -> Self
    where
        F: Fn(&SequenceContext) -> Result<In> + Send + Sync + 'static,
        N: Node<In, Out> + 'static,
    {
        Self {
            key,
            extract: Arc::new(extractor),
            node: Arc::new(node),
        }
    }

    /// Read `input_key`, run `node`, store under `output_key`
    pub fn from_key<N>(input_key: NodeKey<In>, output_key: NodeKey<Out>, node: N) -> Self
    where
        In: DeserializeOwned,
        N: Node<In, Out> + 'static,
    {
        Self::new(output_key, move |ctx| ctx.require(&input_key), node)
    }

    /// Like [`new`](Self::new) with a generated output key
    pub fn with_random_key<F, N>(extractor: F, node: N) -> Self
    where
        F: Fn(&SequenceContext) -> Result<In> + Send + Sync + 'static,
        N: Node<In, Out> + 'static,
    {
        Self::new(NodeKey::random(), extractor, node)
    }

    /// Key the output is stored under
    pub fn key(&self) -> &NodeKey<Out> {
        &self.key
    }
}

#[async_trait]
impl<In, Out> Node<SequenceContext, SequenceContext> for ContextualNode<In, Out>
where
    In: Send + 'static,
    Out: ContextValue,
{
    async fn apply(&self, ctx: SequenceContext) -> Result<SequenceContext> {
        let input = (self.extract)(&ctx)?;
        let output = self.node.apply(input).await?;
        ctx.put(&self.key, output)
    }

    fn shape(&self) -> NodeShape {
        self.node.shape()
    }
}

/// A sequence of context-aware steps with its own registry identity
pub struct ContextualSequence<I> {
    key: SequenceKey<I, SequenceContext>,
    input_key: NodeKey<I>,
    steps: Sequence<SequenceContext, SequenceContext>,
    combiners: Arc<TypeCombinerFactory>,
}

impl<I> Clone for ContextualSequence<I> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            input_key: self.input_key.clone(),
            steps: self.steps.clone(),
            combiners: Arc::clone(&self.combiners),
        }
    }
}

impl<I> ContextualSequence<I>
where
    I: ContextValue,
{
    /// Start a sequence that stores its input under `input_key`
    pub fn builder(input_key: NodeKey<I>) -> ContextualSequenceBuilder<I> {
        ContextualSequenceBuilder {
            key: SequenceKey::new_random(),
            input_key,
            steps: SequenceBuilder::new(),
            combiners: None,
        }
    }

    /// Start a sequence that stores its input under the reserved initial key
    pub fn builder_initial() -> ContextualSequenceBuilder<I> {
        Self::builder(NodeKey::initial())
    }

    pub fn key(&self) -> &SequenceKey<I, SequenceContext> {
        &self.key
    }

    /// Key the starting input is stored under
    pub fn input_key(&self) -> &NodeKey<I> {
        &self.input_key
    }

    pub fn combiners(&self) -> &Arc<TypeCombinerFactory> {
        &self.combiners
    }

    /// Seed a new root context from `input` without running any step
    pub fn seed(&self, input: I) -> Result<SequenceContext> {
        SequenceContext::root(&self.input_key, input, Arc::clone(&self.combiners))
    }

    /// Run the steps over an existing context
    ///
    /// Collisions are resolved with this sequence's combiners whatever set
    /// the context arrived with, so a context rebuilt from a snapshot
    /// behaves as it did on its first run.
    pub async fn resume(&self, ctx: SequenceContext) -> Result<SequenceContext> {
        let ctx = ctx.with_combiners(Arc::clone(&self.combiners));
        self.steps.apply(ctx).await
    }
}

#[async_trait]
impl<I> Node<I, SequenceContext> for ContextualSequence<I>
where
    I: ContextValue,
{
    async fn apply(&self, input: I) -> Result<SequenceContext> {
        let ctx = self.seed(input)?;
        log::debug!(
            "Running contextual sequence {} as execution {}",
            self.key,
            ctx.execution_id()
        );
        self.resume(ctx).await
    }

    fn shape(&self) -> NodeShape {
        self.steps.shape()
    }
}

/// Builder for [`ContextualSequence`]
pub struct ContextualSequenceBuilder<I> {
    key: SequenceKey<I, SequenceContext>,
    input_key: NodeKey<I>,
    steps: SequenceBuilder<SequenceContext, SequenceContext>,
    combiners: Option<Arc<TypeCombinerFactory>>,
}

impl<I> ContextualSequenceBuilder<I>
where
    I: ContextValue,
{
    /// Append any context-to-context node
    pub fn then<N>(mut self, node: N) -> Self
    where
        N: Node<SequenceContext, SequenceContext> + 'static,
    {
        self.steps = self.steps.then(node);
        self
    }

    /// Run `node` over the whole context and store its output under `key`
    pub fn then_compute<Out, N>(self, key: NodeKey<Out>, node: N) -> Self
    where
        Out: ContextValue,
        N: Node<SequenceContext, Out> + 'static,
    {
        self.then(ContextualNode::new(key, |ctx| Ok(ctx.clone()), node))
    }

    /// Read `input_key`, run `node`, store under `output_key`
    pub fn then_map<In, Out, N>(self, input_key: NodeKey<In>, output_key: NodeKey<Out>, node: N) -> Self
    where
        In: DeserializeOwned + Send + 'static,
        Out: ContextValue,
        N: Node<In, Out> + 'static,
    {
        self.then(ContextualNode::from_key(input_key, output_key, node))
    }

    /// Store whatever `supplier` produces under `key`
    pub fn then_produce<Out, F>(self, key: NodeKey<Out>, supplier: F) -> Self
    where
        Out: ContextValue,
        F: Fn() -> Result<Out> + Send + Sync + 'static,
    {
        self.then(ContextualNode::new(
            key,
            |_| Ok(()),
            node_fn(move |()| supplier()),
        ))
    }

    /// Resolve collisions with `combiners` instead of the defaults
    pub fn with_combiners(mut self, combiners: impl Into<Arc<TypeCombinerFactory>>) -> Self {
        self.combiners = Some(combiners.into());
        self
    }

    /// Use a fixed registry id instead of a random one
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.key = SequenceKey::new(id);
        self
    }

    pub fn build(self) -> ContextualSequence<I> {
        ContextualSequence {
            key: self.key,
            input_key: self.input_key,
            steps: self.steps.build(),
            combiners: self
                .combiners
                .unwrap_or_else(|| Arc::new(TypeCombinerFactory::default())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;

    #[tokio::test]
    async fn test_input_is_stored_under_initial_key() {
        let seq = ContextualSequence::<String>::builder_initial().build();
        let ctx = seq.apply("hello".to_string()).await.unwrap();
        assert_eq!(ctx.get(&NodeKey::<String>::initial()).as_deref(), Some("hello"));
        assert!(ctx.execution_id().is_root());
    }

    #[tokio::test]
    async fn test_steps_read_and_write_keys() {
        let name: NodeKey<String> = NodeKey::new("name");
        let greeting: NodeKey<String> = NodeKey::new("greeting");
        let length: NodeKey<usize> = NodeKey::new("length");

        let seq = ContextualSequence::builder(name.clone())
            .then_map(
                name,
                greeting.clone(),
                node_fn(|n: String| Ok(format!("hello {n}"))),
            )
            .then_map(greeting.clone(), length.clone(), node_fn(|g: String| Ok(g.len())))
            .build();

        let ctx = seq.apply("ada".to_string()).await.unwrap();
        assert_eq!(ctx.get(&greeting).as_deref(), Some("hello ada"));
        assert_eq!(ctx.get(&length), Some(9));
        assert_eq!(ctx.last_key(), Some("length"));
    }

    #[tokio::test]
    async fn test_compute_produce_and_missing_input() {
        let total: NodeKey<i64> = NodeKey::new("total");
        let seed: NodeKey<i64> = NodeKey::new("seed");
        let absent: NodeKey<i64> = NodeKey::new("absent");

        let seq = ContextualSequence::<i64>::builder(NodeKey::new("n"))
            .then_produce(seed.clone(), || Ok(40))
            .then_compute(
                total.clone(),
                node_fn(move |ctx: SequenceContext| {
                    Ok(ctx.require(&NodeKey::<i64>::new("n"))? + ctx.require(&seed)?)
                }),
            )
            .build();
        let ctx = seq.apply(2).await.unwrap();
        assert_eq!(ctx.get(&total), Some(42));

        let broken = ContextualSequence::<i64>::builder_initial()
            .then_map(absent, total, node_fn(|x: i64| Ok(x)))
            .build();
        let err = broken.apply(1).await.unwrap_err();
        assert!(matches!(err, PipelineError::MissingValue(_)));
    }

    #[tokio::test]
    async fn test_resume_continues_existing_context() {
        let count: NodeKey<Vec<i64>> = NodeKey::new("count");
        let seq = ContextualSequence::<Vec<i64>>::builder(count.clone())
            .then_produce(count.clone(), || Ok(vec![1]))
            .build();

        let first = seq.apply(vec![0]).await.unwrap();
        let second = seq.resume(first.clone()).await.unwrap();
        assert_eq!(second.get(&count), Some(vec![0, 1, 1]));
        assert_eq!(second.execution_id(), first.execution_id());
    }

    #[tokio::test]
    async fn test_resume_uses_the_sequence_combiners() {
        let total: NodeKey<u64> = NodeKey::new("total");
        let seq = ContextualSequence::<u64>::builder(NodeKey::new("start"))
            .with_combiners(TypeCombinerFactory::default().with_key(&total, |a, b| a + b))
            .then_produce(total.clone(), || Ok(5))
            .build();

        // A context rebuilt from storage comes back with the plain defaults
        let stored = SequenceContext::empty().put(&total, 10_u64).unwrap();
        let restored = SequenceContext::from_snapshot(
            stored.snapshot(),
            Arc::new(TypeCombinerFactory::default()),
        );
        assert!(restored.put(&total, 5).is_err());

        let done = seq.resume(restored).await.unwrap();
        assert_eq!(done.get(&total), Some(15));
        assert_eq!(done.execution_id(), stored.execution_id());
    }

    #[tokio::test]
    async fn test_keys_and_ids() {
        let seq = ContextualSequence::<String>::builder_initial()
            .with_id("greeter")
            .build();
        assert_eq!(seq.key().id(), "greeter");
        assert_eq!(seq.clone().key(), seq.key());

        let node = ContextualNode::with_random_key(|_| Ok(1_i64), node_fn(|x: i64| Ok(x)));
        let ctx = node.apply(SequenceContext::empty()).await.unwrap();
        assert_eq!(ctx.get(node.key()), Some(1));
    }
}
