//! The node abstraction
//!
//! A [`Node`] turns exactly one input into exactly one output, or fails.
//! Everything else in the engine (sequences, forks, branches, resilience
//! wrappers) is itself a node that composes other nodes.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::control::{FallbackNode, RetryNode, TapNode, TimeoutNode};
use crate::error::Result;
use crate::shape::{short_type_name, NodeShape};

/// A typed unit of computation
///
/// Nodes hold no engine-managed state; anything they own belongs to
/// whoever built them. They must be safe to apply concurrently because
/// composites share them across branches.
#[async_trait]
pub trait Node<I, O>: Send + Sync
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Apply this node to one input
    async fn apply(&self, input: I) -> Result<O>;

    /// Describe this node for inspection and rendering
    fn shape(&self) -> NodeShape {
        NodeShape::leaf(short_type_name::<Self>())
    }
}

/// A node shared between composites and worker tasks
pub type SharedNode<I, O> = Arc<dyn Node<I, O>>;

#[async_trait]
impl<I, O, N> Node<I, O> for Arc<N>
where
    N: Node<I, O> + ?Sized,
    I: Send + 'static,
    O: Send + 'static,
{
    async fn apply(&self, input: I) -> Result<O> {
        (**self).apply(input).await
    }

    fn shape(&self) -> NodeShape {
        (**self).shape()
    }
}

#[async_trait]
impl<I, O, N> Node<I, O> for Box<N>
where
    N: Node<I, O> + ?Sized,
    I: Send + 'static,
    O: Send + 'static,
{
    async fn apply(&self, input: I) -> Result<O> {
        (**self).apply(input).await
    }

    fn shape(&self) -> NodeShape {
        (**self).shape()
    }
}

/// A node backed by a synchronous closure
pub struct FnNode<F> {
    f: F,
    label: Option<String>,
}

impl<F> FnNode<F> {
    /// Set the label reported by [`Node::shape`]
    pub fn named(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

#[async_trait]
impl<I, O, F> Node<I, O> for FnNode<F>
where
    F: Fn(I) -> Result<O> + Send + Sync,
    I: Send + 'static,
    O: Send + 'static,
{
    async fn apply(&self, input: I) -> Result<O> {
        (self.f)(input)
    }

    fn shape(&self) -> NodeShape {
        NodeShape::leaf(self.label.as_deref().unwrap_or("fn"))
    }
}

/// A node backed by a closure returning a future
pub struct AsyncFnNode<F> {
    f: F,
    label: Option<String>,
}

impl<F> AsyncFnNode<F> {
    /// Set the label reported by [`Node::shape`]
    pub fn named(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

#[async_trait]
impl<I, O, F, Fut> Node<I, O> for AsyncFnNode<F>
where
    F: Fn(I) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O>> + Send,
    I: Send + 'static,
    O: Send + 'static,
{
    async fn apply(&self, input: I) -> Result<O> {
        (self.f)(input).await
    }

    fn shape(&self) -> NodeShape {
        NodeShape::leaf(self.label.as_deref().unwrap_or("async fn"))
    }
}

/// Wrap a synchronous closure as a node
pub fn node_fn<I, O, F>(f: F) -> FnNode<F>
where
    F: Fn(I) -> Result<O> + Send + Sync,
{
    FnNode { f, label: None }
}

/// Wrap an async closure as a node
pub fn async_node_fn<I, O, F, Fut>(f: F) -> AsyncFnNode<F>
where
    F: Fn(I) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O>> + Send,
{
    AsyncFnNode { f, label: None }
}

/// Fluent wrappers available on every sized node
pub trait NodeExt<I, O>: Node<I, O> + Sized + 'static
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Erase the concrete type behind an `Arc`
    fn shared(self) -> SharedNode<I, O> {
        Arc::new(self)
    }

    /// Retry up to `max_attempts` times on any error
    fn retry(self, max_attempts: u32) -> RetryNode<I, O>
    where
        I: Clone,
    {
        RetryNode::new(self, max_attempts)
    }

    /// Fail with a timeout error if not complete within `limit`
    fn timeout(self, limit: Duration) -> TimeoutNode<I, O> {
        TimeoutNode::new(self, limit)
    }

    /// Run `fallback` whenever this node fails
    fn or_else<N>(self, fallback: N) -> FallbackNode<I, O>
    where
        N: Node<I, O> + 'static,
        I: Clone,
    {
        FallbackNode::new(self, fallback)
    }

    /// Observe the output without changing it
    fn tap<F>(self, observer: F) -> crate::sequence::Sequence<I, O>
    where
        F: Fn(&O) + Send + Sync + 'static,
    {
        crate::sequence::Sequence::builder()
            .then(self)
            .then(TapNode::new(observer))
            .build()
    }
}

impl<I, O, N> NodeExt<I, O> for N
where
    N: Node<I, O> + 'static,
    I: Send + 'static,
    O: Send + 'static,
{
}
