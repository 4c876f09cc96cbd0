use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::node::{Node, SharedNode};
use crate::shape::NodeShape;

/// Binary branch: runs exactly one of two nodes depending on the input
pub struct PredicateNode<I, O> {
    predicate: Arc<dyn Fn(&I) -> bool + Send + Sync>,
    on_true: SharedNode<I, O>,
    on_false: SharedNode<I, O>,
}

impl<I, O> PredicateNode<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    pub fn new<P, T, F>(predicate: P, on_true: T, on_false: F) -> Self
    where
        P: Fn(&I) -> bool + Send + Sync + 'static,
        T: Node<I, O> + 'static,
        F: Node<I, O> + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
            on_true: Arc::new(on_true),
            on_false: Arc::new(on_false),
        }
    }
}

#[async_trait]
impl<I, O> Node<I, O> for PredicateNode<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    async fn apply(&self, input: I) -> Result<O> {
        if (self.predicate)(&input) {
            self.on_true.apply(input).await
        } else {
            self.on_false.apply(input).await
        }
    }

    fn shape(&self) -> NodeShape {
        NodeShape::Predicate {
            on_true: Box::new(self.on_true.shape()),
            on_false: Box::new(self.on_false.shape()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::node_fn;

    #[tokio::test]
    async fn test_dispatches_to_exactly_one_branch() {
        let node = PredicateNode::new(
            |x: &i64| *x >= 0,
            node_fn(|x: i64| Ok(format!("positive {x}"))),
            node_fn(|x: i64| Ok(format!("negative {x}"))),
        );
        assert_eq!(node.apply(3).await.unwrap(), "positive 3");
        assert_eq!(node.apply(-3).await.unwrap(), "negative -3");
    }

    #[test]
    fn test_shape() {
        let node = PredicateNode::new(
            |_: &u8| true,
            node_fn(|x: u8| Ok(x)).named("yes"),
            node_fn(|x: u8| Ok(x)).named("no"),
        );
        assert_eq!(
            node.shape(),
            NodeShape::Predicate {
                on_true: Box::new(NodeShape::leaf("yes")),
                on_false: Box::new(NodeShape::leaf("no")),
            }
        );
    }
}
