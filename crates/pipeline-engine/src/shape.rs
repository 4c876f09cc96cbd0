//! Structural description of composed nodes
//!
//! Every node reports a [`NodeShape`]. Composites nest the shapes of the
//! nodes they wrap, so a whole pipeline can be inspected (or rendered,
//! see [`crate::viz`]) without the execution types knowing anything about
//! the consumer.

use serde::{Deserialize, Serialize};

/// The structural kind of a node and its children
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeShape {
    /// An opaque unit of work
    Leaf { label: String },
    /// Ordered steps, output of one feeding the next
    Sequence { steps: Vec<NodeShape> },
    /// Binary branch
    Predicate {
        on_true: Box<NodeShape>,
        on_false: Box<NodeShape>,
    },
    /// Multi-way dispatch by classification key
    Switch {
        cases: Vec<(String, NodeShape)>,
        default: Box<NodeShape>,
    },
    /// Scatter-gather over a per-item node
    Fork { branch: Box<NodeShape>, parallel: bool },
    /// A resilience or observation wrapper (retry, fallback, timeout, loop, tap, wait)
    Wrapper { label: String, inner: Vec<NodeShape> },
}

impl NodeShape {
    /// Create a leaf shape
    pub fn leaf(label: impl Into<String>) -> Self {
        Self::Leaf {
            label: label.into(),
        }
    }

    /// Create a wrapper shape around the given children
    pub fn wrapper(label: impl Into<String>, inner: Vec<NodeShape>) -> Self {
        Self::Wrapper {
            label: label.into(),
            inner,
        }
    }

    /// Count every shape in this tree, including itself
    pub fn node_count(&self) -> usize {
        1 + match self {
            NodeShape::Leaf { .. } => 0,
            NodeShape::Sequence { steps } => steps.iter().map(NodeShape::node_count).sum(),
            NodeShape::Predicate { on_true, on_false } => {
                on_true.node_count() + on_false.node_count()
            }
            NodeShape::Switch { cases, default } => {
                cases.iter().map(|(_, s)| s.node_count()).sum::<usize>() + default.node_count()
            }
            NodeShape::Fork { branch, .. } => branch.node_count(),
            NodeShape::Wrapper { inner, .. } => inner.iter().map(NodeShape::node_count).sum(),
        }
    }
}

/// Readable label for a type: the last path segment without generics
pub fn short_type_name<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}
