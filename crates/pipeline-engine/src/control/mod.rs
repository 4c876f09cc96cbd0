//! Control-flow and resilience wrappers
//!
//! Each wrapper is itself a node. It changes only when, whether or how
//! many times the wrapped nodes run, never what they compute.

mod event_wait;
mod fallback;
mod loop_while;
mod predicate;
mod retry;
mod switch;
mod tap;
mod timeout;

pub use event_wait::EventWaitNode;
pub use fallback::FallbackNode;
pub use loop_while::LoopWhileNode;
pub use predicate::PredicateNode;
pub use retry::RetryNode;
pub use switch::SwitchNode;
pub use tap::TapNode;
pub use timeout::TimeoutNode;
