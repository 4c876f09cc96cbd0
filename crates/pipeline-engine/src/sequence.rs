//! Linear composition of nodes
//!
//! A [`Sequence`] applies its steps left to right, feeding each output
//! into the next step. The [`SequenceBuilder`] tracks the current output
//! type, so a step whose input does not match the previous output is a
//! compile error rather than a runtime surprise.

use std::any::{type_name, Any};
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{PipelineError, Result};
use crate::node::{node_fn, Node};
use crate::shape::NodeShape;

type AnyValue = Box<dyn Any + Send>;

/// A step with its input and output types erased
#[async_trait]
trait ErasedStep: Send + Sync {
    async fn apply_erased(&self, input: AnyValue) -> Result<AnyValue>;

    fn shape(&self) -> NodeShape;
}

struct TypedStep<N, I, O> {
    node: N,
    _types: PhantomData<fn(I) -> O>,
}

#[async_trait]
impl<N, I, O> ErasedStep for TypedStep<N, I, O>
where
    N: Node<I, O>,
    I: Send + 'static,
    O: Send + 'static,
{
    async fn apply_erased(&self, input: AnyValue) -> Result<AnyValue> {
        let input = downcast::<I>(input)?;
        let output = self.node.apply(input).await?;
        Ok(Box::new(output))
    }

    fn shape(&self) -> NodeShape {
        self.node.shape()
    }
}

fn downcast<T: 'static>(value: AnyValue) -> Result<T> {
    value.downcast::<T>().map(|boxed| *boxed).map_err(|_| {
        PipelineError::construction(format!(
            "sequence step expected a value of type {}",
            type_name::<T>()
        ))
    })
}

/// An immutable, ordered composition of nodes
///
/// Cloning is cheap; clones share the same steps.
pub struct Sequence<I, O> {
    steps: Arc<[Arc<dyn ErasedStep>]>,
    _types: PhantomData<fn(I) -> O>,
}

impl<I, O> Clone for Sequence<I, O> {
    fn clone(&self) -> Self {
        Self {
            steps: Arc::clone(&self.steps),
            _types: PhantomData,
        }
    }
}

impl<I> Sequence<I, I>
where
    I: Send + 'static,
{
    /// Start building a sequence that accepts `I`
    pub fn builder() -> SequenceBuilder<I, I> {
        SequenceBuilder::new()
    }
}

impl<I, O> Sequence<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Wrap a single pre-composed node
    pub fn from_node<N>(node: N) -> Self
    where
        N: Node<I, O> + 'static,
    {
        SequenceBuilder::<I, I>::new().then(node).build()
    }

    /// Number of steps
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether this sequence is the identity
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Shapes of the individual steps, in order
    pub fn steps(&self) -> Vec<NodeShape> {
        self.steps.iter().map(|step| step.shape()).collect()
    }
}

#[async_trait]
impl<I, O> Node<I, O> for Sequence<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    async fn apply(&self, input: I) -> Result<O> {
        let mut value: AnyValue = Box::new(input);
        for step in self.steps.iter() {
            value = step.apply_erased(value).await?;
        }
        downcast::<O>(value)
    }

    fn shape(&self) -> NodeShape {
        NodeShape::Sequence {
            steps: self.steps(),
        }
    }
}

/// Fluent, type-checked builder for [`Sequence`]
///
/// `C` is the output type of the last appended step.
pub struct SequenceBuilder<I, C> {
    steps: Vec<Arc<dyn ErasedStep>>,
    _types: PhantomData<fn(I) -> C>,
}

impl<I> SequenceBuilder<I, I>
where
    I: Send + 'static,
{
    /// Create an empty builder (the identity sequence)
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            _types: PhantomData,
        }
    }
}

impl<I> Default for SequenceBuilder<I, I>
where
    I: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<I, C> SequenceBuilder<I, C>
where
    I: Send + 'static,
    C: Send + 'static,
{
    /// Append a node consuming the current output
    pub fn then<N, O>(mut self, node: N) -> SequenceBuilder<I, O>
    where
        N: Node<C, O> + 'static,
        O: Send + 'static,
    {
        self.steps.push(Arc::new(TypedStep {
            node,
            _types: PhantomData::<fn(C) -> O>,
        }));
        SequenceBuilder {
            steps: self.steps,
            _types: PhantomData,
        }
    }

    /// Append a synchronous closure as a step
    pub fn then_fn<O, F>(self, f: F) -> SequenceBuilder<I, O>
    where
        F: Fn(C) -> Result<O> + Send + Sync + 'static,
        O: Send + 'static,
    {
        self.then(node_fn(f))
    }

    /// Finish the sequence
    pub fn build(self) -> Sequence<I, C> {
        Sequence {
            steps: self.steps.into(),
            _types: PhantomData,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::async_node_fn;

    #[tokio::test]
    async fn test_empty_sequence_is_identity() {
        let seq = Sequence::<String, String>::builder().build();
        assert!(seq.is_empty());
        assert_eq!(seq.apply("unchanged".to_string()).await.unwrap(), "unchanged");
    }

    #[tokio::test]
    async fn test_left_to_right_composition() {
        let seq = Sequence::builder()
            .then_fn(|x: i64| Ok(x + 3))
            .then_fn(|x: i64| Ok(x * 2))
            .then(async_node_fn(|x: i64| async move { Ok::<_, PipelineError>(format!("={x}")) }))
            .build();

        // (5 + 3) * 2, not 5 * 2 + 3
        assert_eq!(seq.apply(5).await.unwrap(), "=16");
        assert_eq!(seq.len(), 3);
    }

    #[tokio::test]
    async fn test_error_stops_the_chain() {
        let reached = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = Arc::clone(&reached);
        let seq = Sequence::builder()
            .then_fn(|_: i64| -> Result<i64> { Err(PipelineError::failed("first step")) })
            .then_fn(move |x: i64| {
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(x)
            })
            .build();

        let err = seq.apply(1).await.unwrap_err();
        assert!(matches!(err, PipelineError::NodeFailed(_)));
        assert!(!reached.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_nested_sequences_and_shape() {
        let inner = Sequence::builder().then_fn(|x: i64| Ok(x - 1)).build();
        let outer = Sequence::builder()
            .then(inner.clone())
            .then(inner)
            .build();
        assert_eq!(outer.apply(10).await.unwrap(), 8);

        match outer.shape() {
            NodeShape::Sequence { steps } => {
                assert_eq!(steps.len(), 2);
                assert!(matches!(steps[0], NodeShape::Sequence { .. }));
            }
            other => panic!("unexpected shape {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_from_node() {
        let seq = Sequence::from_node(node_fn(|x: u8| Ok(u32::from(x) * 100)));
        assert_eq!(seq.apply(3).await.unwrap(), 300);
    }
}
