use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::error::{PipelineError, Result};
use crate::node::{Node, SharedNode};
use crate::shape::NodeShape;
use crate::spawn::{default_spawner, AbortOnDrop, TaskSpawner};

/// Bounds how long a wrapped node may take
///
/// The node runs on its own spawned task. When the limit elapses the
/// caller gets [`PipelineError::Timeout`] and the task is aborted.
/// Aborting is cooperative: it lands at the task's next `.await`, so a
/// node stuck in blocking code keeps running detached until it returns,
/// and its result is discarded.
pub struct TimeoutNode<I, O> {
    node: SharedNode<I, O>,
    limit: Duration,
    spawner: Arc<dyn TaskSpawner>,
}

impl<I, O> TimeoutNode<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    pub fn new<N>(node: N, limit: Duration) -> Self
    where
        N: Node<I, O> + 'static,
    {
        Self {
            node: Arc::new(node),
            limit,
            spawner: default_spawner(),
        }
    }

    /// Run the wrapped node on `spawner` instead of the default
    pub fn with_spawner(mut self, spawner: Arc<dyn TaskSpawner>) -> Self {
        self.spawner = spawner;
        self
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }
}

#[async_trait]
impl<I, O> Node<I, O> for TimeoutNode<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    async fn apply(&self, input: I) -> Result<O> {
        let (tx, rx) = oneshot::channel();
        let node = Arc::clone(&self.node);
        let task = self.spawner.spawn(Box::pin(async move {
            let _ = tx.send(node.apply(input).await);
        }))?;
        // Also aborts the worker if this future is dropped mid-wait
        let _guard = AbortOnDrop(vec![task]);

        match tokio::time::timeout(self.limit, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(PipelineError::BranchLost("timed node".to_string())),
            Err(_) => {
                log::warn!("Node did not complete within {:?}, abandoning it", self.limit);
                Err(PipelineError::Timeout { limit: self.limit })
            }
        }
    }

    fn shape(&self) -> NodeShape {
        NodeShape::wrapper(
            format!("timeout {:?}", self.limit),
            vec![self.node.shape()],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::async_node_fn;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn test_fast_node_completes() {
        let node = TimeoutNode::new(
            async_node_fn(|x: u32| async move { Ok::<_, PipelineError>(x * 2) }),
            Duration::from_secs(1),
        );
        assert_eq!(node.apply(21).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_slow_node_times_out_and_is_abandoned() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        let node = TimeoutNode::new(
            async_node_fn(move |x: u32| {
                let flag = Arc::clone(&flag);
                async move {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    flag.store(true, Ordering::SeqCst);
                    Ok::<_, PipelineError>(x)
                }
            }),
            Duration::from_millis(20),
        );

        let err = node.apply(1).await.unwrap_err();
        assert!(matches!(err, PipelineError::Timeout { limit } if limit == Duration::from_millis(20)));

        // The aborted worker never reaches the end of its sleep
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_inner_errors_pass_through() {
        let node = TimeoutNode::new(
            async_node_fn(|_: u32| async move { Err::<u32, _>(PipelineError::failed("inner")) }),
            Duration::from_secs(1),
        );
        let err = node.apply(1).await.unwrap_err();
        assert!(matches!(err, PipelineError::NodeFailed(_)));
    }
}
