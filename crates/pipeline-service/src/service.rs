//! Sequence service: registration, execution and checkpointing
//!
//! The service owns a [`SequenceRegistry`], a table of active executions
//! and an optional [`ContextPersistence`] backend. Executions run on the
//! injected [`TaskSpawner`]; `stop()` waits a bounded grace period for
//! them before aborting the rest.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pipeline_engine::{
    default_spawner, ContextValue, ContextualSequence, ExecutionId, SequenceContext, SequenceKey,
    SpawnedTask, TaskSpawner, TypeCombinerFactory,
};
use tokio::sync::{oneshot, Notify};

use crate::active::{ActiveExecution, ActiveExecutions, ExecutionStatus};
use crate::config::ServiceConfig;
use crate::error::{Result, ServiceError};
use crate::events::{EventSink, NullEventSink, ServiceEvent};
use crate::file_store::FileContextStore;
use crate::persistence::ContextPersistence;
use crate::registry::SequenceRegistry;

/// Host-level facade over registered contextual sequences
///
/// # Example
///
/// ```ignore
/// use pipeline_service::SequenceService;
///
/// let service = SequenceService::builder().build();
/// let key = service.register(my_sequence)?;
/// service.start().await?;
///
/// let handle = service.execute(&key, 42)?;
/// let ctx = handle.wait().await?;
///
/// service.stop().await;
/// ```
pub struct SequenceService {
    config: ServiceConfig,
    registry: Arc<SequenceRegistry>,
    persistence: Option<Arc<dyn ContextPersistence>>,
    spawner: Arc<dyn TaskSpawner>,
    combiners: Arc<TypeCombinerFactory>,
    event_sink: Arc<dyn EventSink>,
    running: AtomicBool,
    /// Serializes `start()` and `stop()`
    lifecycle: tokio::sync::Mutex<()>,
    active: Arc<ActiveExecutions>,
    in_flight: Arc<InFlight>,
}

impl SequenceService {
    /// A service with default configuration and no persistence
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> SequenceServiceBuilder {
        SequenceServiceBuilder::default()
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SequenceRegistry> {
        &self.registry
    }

    pub fn persistence(&self) -> Option<&Arc<dyn ContextPersistence>> {
        self.persistence.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start accepting executions
    ///
    /// With `restore_on_start`, every stored execution is loaded into the
    /// active table first. Any restore failure aborts the start and leaves
    /// the service stopped. Starting a running service is a no-op.
    pub async fn start(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.is_running() {
            log::debug!("Sequence service already running");
            return Ok(());
        }

        let restored = if self.config.restore_on_start {
            self.restore_all().await?
        } else {
            0
        };

        self.running.store(true, Ordering::SeqCst);
        log::info!("Sequence service started ({} executions restored)", restored);
        self.emit(ServiceEvent::Started { restored });
        Ok(())
    }

    async fn restore_all(&self) -> Result<usize> {
        let Some(persistence) = &self.persistence else {
            return Ok(0);
        };

        let mut restored = 0;
        for id in persistence.list_stored_execution_ids().await? {
            let Some(snapshot) = persistence.load_state(&id).await? else {
                log::warn!("Stored execution '{}' vanished during restore", id);
                continue;
            };
            let ctx = SequenceContext::from_snapshot(snapshot, Arc::clone(&self.combiners));
            let execution_id = ctx.execution_id().to_string();
            if self.active.restore(ctx) {
                restored += 1;
                self.emit(ServiceEvent::StateRestored { execution_id });
            }
        }
        Ok(restored)
    }

    /// Stop accepting executions and shut down
    ///
    /// Waits up to the configured grace period for in-flight executions,
    /// aborts whatever is still running, then (with `flush_on_stop`) saves
    /// every tracked execution. A failed save is logged and skipped.
    /// Stopping a stopped service is a no-op.
    pub async fn stop(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        if !self.running.swap(false, Ordering::SeqCst) {
            log::debug!("Sequence service already stopped");
            return;
        }

        let grace = self.config.shutdown_grace();
        let aborted = if self.in_flight.wait_idle(grace).await {
            0
        } else {
            let aborted = self.in_flight.abort_all();
            log::warn!(
                "Aborted {} executions still running after {:?}",
                aborted,
                grace
            );
            aborted
        };

        let flushed = if self.config.flush_on_stop {
            self.flush().await
        } else {
            0
        };

        log::info!(
            "Sequence service stopped ({} executions flushed, {} aborted)",
            flushed,
            aborted
        );
        self.emit(ServiceEvent::Stopped { flushed, aborted });
    }

    async fn flush(&self) -> usize {
        let Some(persistence) = &self.persistence else {
            log::debug!("No persistence configured; skipping flush");
            return 0;
        };

        let mut flushed = 0;
        for (id, snapshot) in self.active.snapshots() {
            match persistence.save_state(&id, &snapshot).await {
                Ok(()) => {
                    flushed += 1;
                    self.emit(ServiceEvent::StateSaved {
                        execution_id: id.to_string(),
                    });
                }
                Err(e) => log::error!("Failed to save execution '{}' during shutdown: {}", id, e),
            }
        }
        flushed
    }

    // =========================================================================
    // Registration and execution
    // =========================================================================

    /// Register a sequence under its key; duplicates are rejected
    pub fn register<I>(
        &self,
        sequence: ContextualSequence<I>,
    ) -> Result<SequenceKey<I, SequenceContext>>
    where
        I: ContextValue,
    {
        self.registry.register(sequence)
    }

    fn lookup<I>(
        &self,
        key: &SequenceKey<I, SequenceContext>,
    ) -> Result<Arc<ContextualSequence<I>>>
    where
        I: ContextValue,
    {
        if !self.is_running() {
            return Err(ServiceError::NotStarted);
        }
        self.registry.get_by_key(key)
    }

    /// Run a registered sequence on a worker task
    ///
    /// The execution is tracked as running as soon as this returns; its
    /// final context replaces the starting one when the worker finishes.
    pub fn execute<I>(
        &self,
        key: &SequenceKey<I, SequenceContext>,
        input: I,
    ) -> Result<ExecutionHandle>
    where
        I: ContextValue,
    {
        let sequence = self.lookup(key)?;
        let ctx = sequence.seed(input)?;
        self.spawn_execution(sequence, ctx)
    }

    /// Run a registered sequence on the calling task
    pub async fn execute_sync<I>(
        &self,
        key: &SequenceKey<I, SequenceContext>,
        input: I,
    ) -> Result<SequenceContext>
    where
        I: ContextValue,
    {
        let sequence = self.lookup(key)?;
        let ctx = sequence.seed(input)?;
        let run = self.begin_run(sequence.key().id(), &ctx)?;
        run.drive(&sequence, ctx).await
    }

    /// Continue a tracked or stored execution through a registered sequence
    ///
    /// The sequence's steps run over the execution's latest context, keeping
    /// its execution id. An execution that is still running is rejected
    /// with [`ServiceError::ExecutionRunning`].
    pub async fn resume<I>(
        &self,
        key: &SequenceKey<I, SequenceContext>,
        execution_id: &ExecutionId,
    ) -> Result<ExecutionHandle>
    where
        I: ContextValue,
    {
        let sequence = self.lookup(key)?;
        let ctx = self
            .load_state(execution_id)
            .await?
            .ok_or_else(|| ServiceError::UnknownExecution(execution_id.to_string()))?;
        self.spawn_execution(sequence, ctx)
    }

    fn begin_run(&self, sequence_id: &str, ctx: &SequenceContext) -> Result<RunGuard> {
        let execution_id = ctx.execution_id().clone();
        if !self.active.begin(sequence_id, ctx.clone()) {
            return Err(ServiceError::ExecutionRunning(execution_id.to_string()));
        }
        self.emit(ServiceEvent::ExecutionStarted {
            sequence_id: sequence_id.to_string(),
            execution_id: execution_id.to_string(),
        });
        Ok(RunGuard {
            sequence_id: sequence_id.to_string(),
            execution_id,
            active: Arc::clone(&self.active),
            event_sink: Arc::clone(&self.event_sink),
            _in_flight: self.in_flight.enter(),
            settled: false,
        })
    }

    fn spawn_execution<I>(
        &self,
        sequence: Arc<ContextualSequence<I>>,
        ctx: SequenceContext,
    ) -> Result<ExecutionHandle>
    where
        I: ContextValue,
    {
        let execution_id = ctx.execution_id().clone();
        let sequence_id = sequence.key().id().to_string();
        let run = self.begin_run(&sequence_id, &ctx)?;
        let (tx, rx) = oneshot::channel();

        let spawned = self.spawner.spawn(Box::pin(async move {
            let result = run.drive(&sequence, ctx).await;
            // The caller may have dropped its handle.
            let _ = tx.send(result);
        }));
        let task = match spawned {
            Ok(task) => task,
            Err(e) => {
                self.active.remove(&execution_id);
                return Err(e.into());
            }
        };
        self.in_flight.track(task.clone());

        log::debug!(
            "Execution {} of sequence '{}' handed to a worker",
            execution_id,
            sequence_id
        );
        Ok(ExecutionHandle {
            execution_id,
            sequence_id,
            result: rx,
            task,
        })
    }

    // =========================================================================
    // State
    // =========================================================================

    /// Write one tracked execution to persistence
    pub async fn save_state(&self, execution_id: &ExecutionId) -> Result<()> {
        let persistence = self.require_persistence()?;
        let ctx = self
            .active
            .context(execution_id)
            .ok_or_else(|| ServiceError::UnknownExecution(execution_id.to_string()))?;
        persistence.save_state(execution_id, &ctx.snapshot()).await?;
        log::debug!("Saved execution {}", execution_id);
        self.emit(ServiceEvent::StateSaved {
            execution_id: execution_id.to_string(),
        });
        Ok(())
    }

    /// Latest context of an execution
    ///
    /// The active table is consulted first. Otherwise the execution is
    /// loaded from persistence and tracked as restored. Returns `None` when
    /// neither knows the id.
    pub async fn load_state(&self, execution_id: &ExecutionId) -> Result<Option<SequenceContext>> {
        if let Some(ctx) = self.active.context(execution_id) {
            return Ok(Some(ctx));
        }
        let Some(persistence) = &self.persistence else {
            return Ok(None);
        };
        let Some(snapshot) = persistence.load_state(execution_id).await? else {
            return Ok(None);
        };

        let ctx = SequenceContext::from_snapshot(snapshot, Arc::clone(&self.combiners));
        if self.active.restore(ctx.clone()) {
            self.emit(ServiceEvent::StateRestored {
                execution_id: ctx.execution_id().to_string(),
            });
        }
        Ok(Some(ctx))
    }

    fn require_persistence(&self) -> Result<&Arc<dyn ContextPersistence>> {
        self.persistence
            .as_ref()
            .ok_or_else(|| ServiceError::persistence("no persistence backend configured"))
    }

    /// Ids of every tracked execution, sorted
    pub fn active_execution_ids(&self) -> Vec<ExecutionId> {
        self.active.ids()
    }

    /// Latest context of a tracked execution
    pub fn active_context(&self, execution_id: &ExecutionId) -> Option<SequenceContext> {
        self.active.context(execution_id)
    }

    /// Full tracking state of an execution
    pub fn execution(&self, execution_id: &ExecutionId) -> Option<ActiveExecution> {
        self.active.get(execution_id)
    }

    /// Stop tracking an execution; stored state is untouched
    pub fn forget(&self, execution_id: &ExecutionId) -> Option<SequenceContext> {
        self.active.remove(execution_id).map(|state| state.context)
    }

    /// Stop tracking finished executions idle for at least `max_idle`
    pub fn evict_finished(&self, max_idle: Duration) -> usize {
        self.active.evict_idle(max_idle)
    }

    /// Executions currently running on a worker or the calling task
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.count.load(Ordering::SeqCst)
    }

    fn emit(&self, event: ServiceEvent) {
        emit(self.event_sink.as_ref(), event);
    }
}

impl Default for SequenceService {
    fn default() -> Self {
        Self::new()
    }
}

fn emit(sink: &dyn EventSink, event: ServiceEvent) {
    if let Err(e) = sink.send(event) {
        log::debug!("Dropped service event: {}", e);
    }
}

/// Builder for [`SequenceService`]
#[derive(Default)]
pub struct SequenceServiceBuilder {
    config: ServiceConfig,
    registry: Option<Arc<SequenceRegistry>>,
    persistence: Option<Arc<dyn ContextPersistence>>,
    spawner: Option<Arc<dyn TaskSpawner>>,
    combiners: Option<Arc<TypeCombinerFactory>>,
    event_sink: Option<Arc<dyn EventSink>>,
}

impl SequenceServiceBuilder {
    pub fn with_config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `persistence` instead of a store derived from `state_dir`
    pub fn with_persistence(mut self, persistence: Arc<dyn ContextPersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Run executions on `spawner` instead of the ambient tokio runtime
    pub fn with_spawner(mut self, spawner: Arc<dyn TaskSpawner>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    /// Combiners attached to contexts restored from persistence
    pub fn with_combiners(mut self, combiners: impl Into<Arc<TypeCombinerFactory>>) -> Self {
        self.combiners = Some(combiners.into());
        self
    }

    /// Share a registry with other services
    pub fn with_registry(mut self, registry: Arc<SequenceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_event_sink(mut self, event_sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = Some(event_sink);
        self
    }

    pub fn build(self) -> SequenceService {
        let persistence = self.persistence.or_else(|| {
            self.config.state_dir.as_ref().map(|dir| {
                log::debug!("Persisting executions under {:?}", dir);
                Arc::new(FileContextStore::new(dir)) as Arc<dyn ContextPersistence>
            })
        });

        SequenceService {
            config: self.config,
            registry: self.registry.unwrap_or_default(),
            persistence,
            spawner: self.spawner.unwrap_or_else(default_spawner),
            combiners: self.combiners.unwrap_or_default(),
            event_sink: self.event_sink.unwrap_or_else(|| Arc::new(NullEventSink)),
            running: AtomicBool::new(false),
            lifecycle: tokio::sync::Mutex::new(()),
            active: Arc::new(ActiveExecutions::default()),
            in_flight: Arc::new(InFlight::default()),
        }
    }
}

/// Handle to an execution running on a worker task
#[derive(Debug)]
pub struct ExecutionHandle {
    execution_id: ExecutionId,
    sequence_id: String,
    result: oneshot::Receiver<Result<SequenceContext>>,
    task: SpawnedTask,
}

impl ExecutionHandle {
    pub fn execution_id(&self) -> &ExecutionId {
        &self.execution_id
    }

    pub fn sequence_id(&self) -> &str {
        &self.sequence_id
    }

    /// Wait for the final context
    pub async fn wait(self) -> Result<SequenceContext> {
        match self.result.await {
            Ok(result) => result,
            Err(_) => Err(ServiceError::ExecutionAborted(self.execution_id.to_string())),
        }
    }

    /// Request cancellation; takes effect at the worker's next `.await`
    pub fn abort(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Bookkeeping for one run, settled when the run reports a result
///
/// A run dropped before settling (aborted worker, cancelled caller) is
/// marked interrupted.
struct RunGuard {
    sequence_id: String,
    execution_id: ExecutionId,
    active: Arc<ActiveExecutions>,
    event_sink: Arc<dyn EventSink>,
    _in_flight: InFlightGuard,
    settled: bool,
}

impl RunGuard {
    async fn drive<I>(
        mut self,
        sequence: &ContextualSequence<I>,
        ctx: SequenceContext,
    ) -> Result<SequenceContext>
    where
        I: ContextValue,
    {
        let outcome = sequence.resume(ctx).await;
        self.settled = true;
        match outcome {
            Ok(done) => {
                self.active.complete(&self.execution_id, done.clone());
                log::debug!("Execution {} completed", self.execution_id);
                emit(
                    self.event_sink.as_ref(),
                    ServiceEvent::ExecutionCompleted {
                        sequence_id: self.sequence_id.clone(),
                        execution_id: self.execution_id.to_string(),
                    },
                );
                Ok(done)
            }
            Err(e) => {
                self.active
                    .set_status(&self.execution_id, ExecutionStatus::Failed);
                log::warn!("Execution {} failed: {}", self.execution_id, e);
                emit(
                    self.event_sink.as_ref(),
                    ServiceEvent::ExecutionFailed {
                        sequence_id: self.sequence_id.clone(),
                        execution_id: self.execution_id.to_string(),
                        error: e.to_string(),
                    },
                );
                Err(e.into())
            }
        }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if !self.settled {
            log::warn!("Execution {} ended before completing", self.execution_id);
            self.active
                .set_status(&self.execution_id, ExecutionStatus::Interrupted);
        }
    }
}

/// Counts running executions and keeps their abort handles
#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    drained: Notify,
    tasks: Mutex<Vec<SpawnedTask>>,
}

impl InFlight {
    fn enter(self: &Arc<Self>) -> InFlightGuard {
        self.count.fetch_add(1, Ordering::SeqCst);
        InFlightGuard(Arc::clone(self))
    }

    fn track(&self, task: SpawnedTask) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(task);
    }

    /// Wait until nothing is in flight; false if `grace` elapsed first
    async fn wait_idle(&self, grace: Duration) -> bool {
        let idle = async {
            loop {
                let notified = self.drained.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.count.load(Ordering::SeqCst) == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(grace, idle).await.is_ok()
    }

    /// Abort every tracked task still running; returns how many were aborted
    fn abort_all(&self) -> usize {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        let mut aborted = 0;
        for task in tasks {
            if !task.is_finished() {
                task.abort();
                aborted += 1;
            }
        }
        aborted
    }
}

struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.drained.notify_waiters();
        }
    }
}
