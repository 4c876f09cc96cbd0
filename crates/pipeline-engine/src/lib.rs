//! Pipeline Engine - composable typed workflow execution
//!
//! This crate composes discrete async steps ("nodes") into pipelines:
//!
//! - Linear [`Sequence`]s with a type-checked builder
//! - An immutable, typed [`SequenceContext`] with pluggable collision
//!   handling ([`TypeCombinerFactory`])
//! - Scatter-gather via [`ForkSequence`] and [`ContextualForkSequence`],
//!   folded in split order in both sequential and parallel mode
//! - Control-flow and resilience wrappers: predicate, switch, retry,
//!   fallback, timeout, bounded loop and external event wait
//!
//! # Architecture
//!
//! - `Node`: async trait every building block implements
//! - `TaskSpawner`: injected executor behind parallel forks and timeouts
//! - `NodeShape`: structural description of a composed pipeline, rendered
//!   by [`viz::render_mermaid`]
//!
//! # Example
//!
//! ```ignore
//! use pipeline_engine::{node_fn, NodeKey, ContextualSequence, Node};
//!
//! let total: NodeKey<f64> = NodeKey::new("total");
//! let seq = ContextualSequence::builder(NodeKey::<f64>::new("price"))
//!     .then_map(NodeKey::new("price"), total.clone(), node_fn(|p: f64| Ok(p * 2.0)))
//!     .build();
//! let ctx = seq.apply(10.0).await?;
//! assert_eq!(ctx.get(&total), Some(20.0));
//! ```

pub mod context;
pub mod contextual;
pub mod control;
pub mod error;
pub mod event;
pub mod fork;
pub mod node;
pub mod sequence;
pub mod shape;
pub mod spawn;
pub mod viz;

// Re-export key types
pub use context::{
    ContextSnapshot, ContextValue, ExecutionId, NodeKey, SequenceContext, SequenceKey,
    TypeCombinerFactory, ValueKind,
};
pub use contextual::{ContextualNode, ContextualSequence, ContextualSequenceBuilder};
pub use control::{
    EventWaitNode, FallbackNode, LoopWhileNode, PredicateNode, RetryNode, SwitchNode, TapNode,
    TimeoutNode,
};
pub use error::{PipelineError, Result};
pub use event::{EventBus, EventSource, Subscription, SubscriptionId};
pub use fork::{ContextualForkSequence, ForkMode, ForkSequence};
pub use node::{async_node_fn, node_fn, AsyncFnNode, FnNode, Node, NodeExt, SharedNode};
pub use sequence::{Sequence, SequenceBuilder};
pub use shape::NodeShape;
pub use spawn::{default_spawner, BoundedSpawner, SpawnedTask, TaskSpawner, TokioSpawner};
