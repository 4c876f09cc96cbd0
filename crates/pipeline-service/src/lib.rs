//! Pipeline Service - host-level registry, execution and checkpointing
//!
//! This crate wraps [`pipeline_engine`] sequences in a long-lived service:
//!
//! - A [`SequenceRegistry`] of named contextual sequences
//! - A [`SequenceService`] that runs them on worker tasks or inline and
//!   tracks every execution's latest context by [`ExecutionId`]
//! - [`ContextPersistence`] backends ([`FileContextStore`],
//!   [`InMemoryContextStore`]) for restore on start and flush on stop
//! - Lifecycle [`ServiceEvent`]s delivered through an [`EventSink`]
//!
//! [`ExecutionId`]: pipeline_engine::ExecutionId

mod active;
pub mod config;
pub mod error;
pub mod events;
pub mod file_store;
pub mod persistence;
pub mod registry;
pub mod service;

// Re-export key types
pub use active::{ActiveExecution, ExecutionStatus};
pub use config::ServiceConfig;
pub use error::{Result, ServiceError};
pub use events::{
    ChannelEventSink, EventError, EventSink, NullEventSink, ServiceEvent, VecEventSink,
};
pub use file_store::FileContextStore;
pub use persistence::{ContextPersistence, InMemoryContextStore};
pub use registry::SequenceRegistry;
pub use service::{ExecutionHandle, SequenceService, SequenceServiceBuilder};
