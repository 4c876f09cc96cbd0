use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::node::Node;
use crate::shape::NodeShape;

/// Passes its input through unchanged after showing it to an observer
pub struct TapNode<T> {
    observer: Arc<dyn Fn(&T) + Send + Sync>,
}

impl<T> TapNode<T> {
    pub fn new<F>(observer: F) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        Self {
            observer: Arc::new(observer),
        }
    }
}

#[async_trait]
impl<T> Node<T, T> for TapNode<T>
where
    T: Send + 'static,
{
    async fn apply(&self, input: T) -> Result<T> {
        (self.observer)(&input);
        Ok(input)
    }

    fn shape(&self) -> NodeShape {
        NodeShape::leaf("tap")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{node_fn, NodeExt};
    use parking_lot::Mutex;

    #[tokio::test]
    async fn test_observes_without_changing() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let node = node_fn(|x: u32| Ok(x + 1)).tap(move |x: &u32| sink.lock().push(*x));

        assert_eq!(node.apply(1).await.unwrap(), 2);
        assert_eq!(node.apply(5).await.unwrap(), 6);
        assert_eq!(*seen.lock(), vec![2, 6]);
    }
}
