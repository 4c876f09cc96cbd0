use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;

use crate::error::Result;
use crate::node::{Node, SharedNode};
use crate::shape::NodeShape;

/// Multi-way dispatch on a classification of the input
///
/// The input is classified, the classification is turned into a string
/// key and the branch registered under that key runs. Unknown keys go to
/// the default branch. Exactly one branch runs per call.
pub struct SwitchNode<I, O> {
    route: Arc<dyn Fn(&I) -> String + Send + Sync>,
    branches: IndexMap<String, SharedNode<I, O>>,
    default: SharedNode<I, O>,
}

impl<I, O> SwitchNode<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Create a switch with no cases yet
    pub fn new<C, F, K, D>(classify: F, key_of: K, default: D) -> Self
    where
        F: Fn(&I) -> C + Send + Sync + 'static,
        K: Fn(&C) -> String + Send + Sync + 'static,
        D: Node<I, O> + 'static,
    {
        Self {
            route: Arc::new(move |input: &I| key_of(&classify(input))),
            branches: IndexMap::new(),
            default: Arc::new(default),
        }
    }

    /// Route inputs whose key is `key` to `node`, replacing any earlier case
    pub fn case<N>(mut self, key: impl Into<String>, node: N) -> Self
    where
        N: Node<I, O> + 'static,
    {
        self.branches.insert(key.into(), Arc::new(node));
        self
    }

    /// Keys with a dedicated branch, in registration order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.branches.keys().map(String::as_str)
    }
}

#[async_trait]
impl<I, O> Node<I, O> for SwitchNode<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    async fn apply(&self, input: I) -> Result<O> {
        let key = (self.route)(&input);
        match self.branches.get(&key) {
            Some(branch) => branch.apply(input).await,
            None => {
                log::debug!("No case for '{}', using default branch", key);
                self.default.apply(input).await
            }
        }
    }

    fn shape(&self) -> NodeShape {
        NodeShape::Switch {
            cases: self
                .branches
                .iter()
                .map(|(key, node)| (key.clone(), node.shape()))
                .collect(),
            default: Box::new(self.default.shape()),
        }
    }
}
