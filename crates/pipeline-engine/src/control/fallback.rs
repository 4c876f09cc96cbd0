use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{PipelineError, Result};
use crate::node::{Node, SharedNode};
use crate::shape::NodeShape;

/// Runs a fallback node when the primary fails
///
/// Errors the predicate rejects propagate unchanged, as do errors raised
/// by the fallback itself.
pub struct FallbackNode<I, O> {
    primary: SharedNode<I, O>,
    fallback: SharedNode<I, O>,
    should_fallback: Arc<dyn Fn(&PipelineError) -> bool + Send + Sync>,
}

impl<I, O> FallbackNode<I, O>
where
    I: Clone + Send + 'static,
    O: Send + 'static,
{
    pub fn new<P, F>(primary: P, fallback: F) -> Self
    where
        P: Node<I, O> + 'static,
        F: Node<I, O> + 'static,
    {
        Self {
            primary: Arc::new(primary),
            fallback: Arc::new(fallback),
            should_fallback: Arc::new(|_: &PipelineError| true),
        }
    }

    /// Only fall back on errors matching `predicate`
    pub fn fallback_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&PipelineError) -> bool + Send + Sync + 'static,
    {
        self.should_fallback = Arc::new(predicate);
        self
    }
}

#[async_trait]
impl<I, O> Node<I, O> for FallbackNode<I, O>
where
    I: Clone + Send + 'static,
    O: Send + 'static,
{
    async fn apply(&self, input: I) -> Result<O> {
        match self.primary.apply(input.clone()).await {
            Ok(output) => Ok(output),
            Err(err) if (self.should_fallback)(&err) => {
                log::warn!("Primary node failed, using fallback: {}", err);
                self.fallback.apply(input).await
            }
            Err(err) => Err(err),
        }
    }

    fn shape(&self) -> NodeShape {
        NodeShape::wrapper(
            "fallback",
            vec![self.primary.shape(), self.fallback.shape()],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::node_fn;

    fn broken(msg: &'static str) -> impl Node<u32, u32> {
        node_fn(move |_: u32| -> Result<u32> { Err(PipelineError::failed(msg)) })
    }

    #[tokio::test]
    async fn test_primary_success_skips_fallback() {
        let node = FallbackNode::new(node_fn(|x: u32| Ok(x + 1)), broken("unused"));
        assert_eq!(node.apply(1).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_failure_runs_fallback_with_same_input() {
        let node = FallbackNode::new(broken("down"), node_fn(|x: u32| Ok(x * 10)));
        assert_eq!(node.apply(4).await.unwrap(), 40);
    }

    #[tokio::test]
    async fn test_rejected_errors_propagate() {
        let node = FallbackNode::new(broken("fatal"), node_fn(|x: u32| Ok(x)))
            .fallback_if(|err| !err.to_string().contains("fatal"));
        let err = node.apply(1).await.unwrap_err();
        assert!(err.to_string().contains("fatal"));
    }

    #[tokio::test]
    async fn test_fallback_errors_propagate() {
        let node = FallbackNode::new(broken("primary"), broken("secondary"));
        let err = node.apply(1).await.unwrap_err();
        assert!(err.to_string().contains("secondary"));
    }
}
