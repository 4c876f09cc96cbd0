//! Table of executions known to the service
//!
//! Tracks every execution started, resumed or restored by the service,
//! with its latest context and where it is in its lifecycle.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use pipeline_engine::{ContextSnapshot, ExecutionId, SequenceContext};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a tracked execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecutionStatus {
    /// Handed to a worker; the context is the one it started from
    Running,
    /// Finished; the context is the final one
    Completed,
    /// The sequence failed; the context is the one it started from
    Failed,
    /// The worker ended early (aborted or shut down)
    Interrupted,
    /// Loaded from persistence and not run since
    Restored,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Interrupted)
    }
}

/// State for a single tracked execution
#[derive(Debug, Clone)]
pub struct ActiveExecution {
    /// Sequence that ran it; unknown for restored executions
    pub sequence_id: Option<String>,
    pub context: SequenceContext,
    pub status: ExecutionStatus,
    /// When this execution was first tracked
    pub created_at: Instant,
    /// When its context or status last changed
    pub updated_at: Instant,
}

impl ActiveExecution {
    fn new(sequence_id: Option<String>, context: SequenceContext, status: ExecutionStatus) -> Self {
        let now = Instant::now();
        Self {
            sequence_id,
            context,
            status,
            created_at: now,
            updated_at: now,
        }
    }

    /// Time since the last change
    pub fn idle_for(&self) -> Duration {
        self.updated_at.elapsed()
    }
}

/// Concurrent map from execution id to its state
#[derive(Default)]
pub(crate) struct ActiveExecutions {
    executions: RwLock<HashMap<ExecutionId, ActiveExecution>>,
}

impl ActiveExecutions {
    /// Track a run of `sequence_id` starting from `context`
    ///
    /// Replaces any earlier record for the same id, which is how a resumed
    /// execution takes over from its restored state. Returns `false`, and
    /// changes nothing, while another run of the same id is still in flight.
    pub(crate) fn begin(&self, sequence_id: &str, context: SequenceContext) -> bool {
        let id = context.execution_id().clone();
        let mut executions = self.executions.write();
        let created_at = match executions.get(&id) {
            Some(existing) if existing.status == ExecutionStatus::Running => return false,
            Some(existing) => Some(existing.created_at),
            None => None,
        };
        let mut state = ActiveExecution::new(
            Some(sequence_id.to_string()),
            context,
            ExecutionStatus::Running,
        );
        if let Some(created_at) = created_at {
            state.created_at = created_at;
        }
        executions.insert(id, state);
        true
    }

    /// Record the final context of a run
    pub(crate) fn complete(&self, id: &ExecutionId, context: SequenceContext) {
        if let Some(state) = self.executions.write().get_mut(id) {
            state.context = context;
            state.status = ExecutionStatus::Completed;
            state.updated_at = Instant::now();
        }
    }

    pub(crate) fn set_status(&self, id: &ExecutionId, status: ExecutionStatus) {
        if let Some(state) = self.executions.write().get_mut(id) {
            state.status = status;
            state.updated_at = Instant::now();
        }
    }

    /// Track a context loaded from persistence unless the id is already known
    ///
    /// Returns whether the context was inserted.
    pub(crate) fn restore(&self, context: SequenceContext) -> bool {
        let id = context.execution_id().clone();
        let mut executions = self.executions.write();
        if executions.contains_key(&id) {
            return false;
        }
        executions.insert(
            id,
            ActiveExecution::new(None, context, ExecutionStatus::Restored),
        );
        true
    }

    pub(crate) fn get(&self, id: &ExecutionId) -> Option<ActiveExecution> {
        self.executions.read().get(id).cloned()
    }

    pub(crate) fn context(&self, id: &ExecutionId) -> Option<SequenceContext> {
        self.executions.read().get(id).map(|state| state.context.clone())
    }

    pub(crate) fn remove(&self, id: &ExecutionId) -> Option<ActiveExecution> {
        self.executions.write().remove(id)
    }

    /// Tracked ids, sorted
    pub(crate) fn ids(&self) -> Vec<ExecutionId> {
        let mut ids: Vec<ExecutionId> = self.executions.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Snapshots of every tracked context, sorted by id
    pub(crate) fn snapshots(&self) -> Vec<(ExecutionId, ContextSnapshot)> {
        let mut snapshots: Vec<(ExecutionId, ContextSnapshot)> = self
            .executions
            .read()
            .iter()
            .map(|(id, state)| (id.clone(), state.context.snapshot()))
            .collect();
        snapshots.sort_by(|a, b| a.0.cmp(&b.0));
        snapshots
    }

    /// Drop terminal executions idle for at least `max_idle`
    ///
    /// Returns the number removed.
    pub(crate) fn evict_idle(&self, max_idle: Duration) -> usize {
        let mut executions = self.executions.write();
        let before = executions.len();
        executions.retain(|id, state| {
            let stale = state.status.is_terminal() && state.idle_for() >= max_idle;
            if stale {
                log::debug!("Evicted idle execution: {}", id);
            }
            !stale
        });
        before - executions.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.executions.read().len()
    }
}
