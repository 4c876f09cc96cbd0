use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{PipelineError, Result};
use crate::node::{Node, SharedNode};
use crate::shape::NodeShape;

type RetryPolicy = Arc<dyn Fn(&PipelineError) -> bool + Send + Sync>;

/// Re-runs a failing node with the same input, up to a fixed number of attempts
///
/// No delay is inserted between attempts. A failure the policy rejects
/// ends the loop immediately with [`PipelineError::RetryAborted`]; running
/// out of attempts ends it with [`PipelineError::RetriesExhausted`].
pub struct RetryNode<I, O> {
    node: SharedNode<I, O>,
    max_attempts: u32,
    should_retry: RetryPolicy,
}

impl<I, O> RetryNode<I, O>
where
    I: Clone + Send + 'static,
    O: Send + 'static,
{
    /// Retry on every error; at least one attempt is always made
    pub fn new<N>(node: N, max_attempts: u32) -> Self
    where
        N: Node<I, O> + 'static,
    {
        Self {
            node: Arc::new(node),
            max_attempts: max_attempts.max(1),
            should_retry: Arc::new(|_: &PipelineError| true),
        }
    }

    /// Only retry errors matching `policy`
    pub fn retry_if<P>(mut self, policy: P) -> Self
    where
        P: Fn(&PipelineError) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Arc::new(policy);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

#[async_trait]
impl<I, O> Node<I, O> for RetryNode<I, O>
where
    I: Clone + Send + 'static,
    O: Send + 'static,
{
    async fn apply(&self, input: I) -> Result<O> {
        let mut attempt = 1;
        loop {
            match self.node.apply(input.clone()).await {
                Ok(output) => return Ok(output),
                Err(err) if !(self.should_retry)(&err) => {
                    return Err(PipelineError::RetryAborted {
                        attempt,
                        source: Box::new(err),
                    });
                }
                Err(err) if attempt >= self.max_attempts => {
                    return Err(PipelineError::RetriesExhausted {
                        attempts: attempt,
                        source: Box::new(err),
                    });
                }
                Err(err) => {
                    log::warn!(
                        "Attempt {}/{} failed, retrying: {}",
                        attempt,
                        self.max_attempts,
                        err
                    );
                    attempt += 1;
                }
            }
        }
    }

    fn shape(&self) -> NodeShape {
        NodeShape::wrapper(
            format!("retry x{}", self.max_attempts),
            vec![self.node.shape()],
        )
    }
}
