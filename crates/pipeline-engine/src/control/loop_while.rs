use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::node::{Node, SharedNode};
use crate::shape::NodeShape;

/// Bounded do-while over a node
///
/// The node always runs once. While `should_continue` holds for the latest
/// output and attempts remain, it runs again with the original input. The
/// latest output is returned. Errors from the node end the loop.
pub struct LoopWhileNode<I, O> {
    node: SharedNode<I, O>,
    should_continue: Arc<dyn Fn(&O) -> bool + Send + Sync>,
    max_attempts: u32,
}

impl<I, O> LoopWhileNode<I, O>
where
    I: Clone + Send + 'static,
    O: Send + 'static,
{
    /// A `max_attempts` of zero behaves like one
    pub fn new<N, P>(node: N, should_continue: P, max_attempts: u32) -> Self
    where
        N: Node<I, O> + 'static,
        P: Fn(&O) -> bool + Send + Sync + 'static,
    {
        Self {
            node: Arc::new(node),
            should_continue: Arc::new(should_continue),
            max_attempts: max_attempts.max(1),
        }
    }
}

#[async_trait]
impl<I, O> Node<I, O> for LoopWhileNode<I, O>
where
    I: Clone + Send + 'static,
    O: Send + 'static,
{
    async fn apply(&self, input: I) -> Result<O> {
        let mut attempt = 1;
        loop {
            let output = self.node.apply(input.clone()).await?;
            if attempt >= self.max_attempts || !(self.should_continue)(&output) {
                return Ok(output);
            }
            log::debug!("Loop condition holds after run {}, running again", attempt);
            attempt += 1;
        }
    }

    fn shape(&self) -> NodeShape {
        NodeShape::wrapper(
            format!("loop while x{}", self.max_attempts),
            vec![self.node.shape()],
        )
    }
}
