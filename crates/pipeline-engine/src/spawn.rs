//! Task spawning abstraction
//!
//! Parallel forks, timeout isolation and asynchronous service executions
//! all hand work to a [`TaskSpawner`] injected at construction time. The
//! default spawns one tokio task per unit of work on the current runtime.
//!
//! A [`BoundedSpawner`] caps concurrency with a semaphore. Nested forks
//! sharing one bounded spawner can deadlock: outer branches hold every
//! permit while waiting on inner branches that cannot acquire one. Give
//! nested forks their own spawner (or the unbounded default) instead.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::AbortHandle;

use crate::error::{PipelineError, Result};

/// Handle to a task handed to a [`TaskSpawner`]
#[derive(Debug, Clone, Default)]
pub struct SpawnedTask {
    abort: Option<AbortHandle>,
}

impl SpawnedTask {
    /// Wrap a tokio abort handle
    pub fn new(abort: AbortHandle) -> Self {
        Self { abort: Some(abort) }
    }

    /// A task that cannot be aborted (it ran inline or was never spawned)
    pub fn detached() -> Self {
        Self { abort: None }
    }

    /// Request cancellation
    ///
    /// Cancellation takes effect at the task's next `.await`. Code that
    /// never yields keeps running to completion in the background.
    pub fn abort(&self) {
        if let Some(handle) = &self.abort {
            handle.abort();
        }
    }

    /// Whether the task has finished (or cannot be observed)
    pub fn is_finished(&self) -> bool {
        self.abort.as_ref().map_or(true, AbortHandle::is_finished)
    }
}

/// Aborts the held tasks that are still running when dropped
///
/// Keeps branches from outliving a join that failed or was abandoned.
pub(crate) struct AbortOnDrop(pub(crate) Vec<SpawnedTask>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for task in &self.0 {
            if !task.is_finished() {
                task.abort();
            }
        }
    }
}

/// Schedules fire-and-forget futures onto some executor
///
/// Results travel back over channels owned by the caller, so a spawner
/// only needs to drive the future to completion.
pub trait TaskSpawner: Send + Sync {
    fn spawn(&self, task: BoxFuture<'static, ()>) -> Result<SpawnedTask>;
}

/// Spawns every task onto the ambient tokio runtime
#[derive(Debug, Clone, Default)]
pub struct TokioSpawner {
    handle: Option<Handle>,
}

impl TokioSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn onto a specific runtime instead of the current one
    pub fn with_handle(handle: Handle) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    fn runtime(&self) -> Result<Handle> {
        match &self.handle {
            Some(handle) => Ok(handle.clone()),
            None => Handle::try_current().map_err(|e| PipelineError::NoRuntime(e.to_string())),
        }
    }
}

impl TaskSpawner for TokioSpawner {
    fn spawn(&self, task: BoxFuture<'static, ()>) -> Result<SpawnedTask> {
        let join = self.runtime()?.spawn(task);
        Ok(SpawnedTask::new(join.abort_handle()))
    }
}

/// Limits how many spawned tasks make progress at once
#[derive(Debug, Clone)]
pub struct BoundedSpawner {
    inner: TokioSpawner,
    permits: Arc<Semaphore>,
    limit: usize,
}

impl BoundedSpawner {
    /// Allow at most `limit` tasks to run concurrently (minimum 1)
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            inner: TokioSpawner::new(),
            permits: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Permits not currently held by a running task
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

impl TaskSpawner for BoundedSpawner {
    fn spawn(&self, task: BoxFuture<'static, ()>) -> Result<SpawnedTask> {
        let permits = Arc::clone(&self.permits);
        self.inner.spawn(Box::pin(async move {
            // The semaphore is never closed, so acquisition only fails on shutdown.
            let Ok(_permit) = permits.acquire_owned().await else {
                log::warn!("bounded spawner semaphore closed; dropping task");
                return;
            };
            task.await;
        }))
    }
}

/// The spawner used when none is supplied
pub fn default_spawner() -> Arc<dyn TaskSpawner> {
    Arc::new(TokioSpawner::new())
}
