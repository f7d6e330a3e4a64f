//! Task Service - the engine facade
//!
//! Wires the registry, the worker pool and the sweeper together. Build one
//! per process at startup and share it behind an `Arc`.

use crate::observer::{NoopObserver, TaskObserver};
use crate::pool::WorkerPool;
use crate::registry::{StatusCounts, SweepReport, TaskRegistry};
use crate::task::{TaskId, TaskRequest, TaskSnapshot};
use insight_foundation::{EngineConfig, Error, Result};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Poll interval of [`TaskService::wait_for_result`]
const RESULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Engine health summary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStats {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub canceled: usize,
    /// Jobs waiting for a worker
    pub queued: usize,
    pub workers: usize,
    pub max_tasks: usize,
    pub accepting: bool,
}

/// In-process background task engine
pub struct TaskService {
    config: EngineConfig,
    registry: TaskRegistry,
    pool: WorkerPool,
    accepting: AtomicBool,
    sweeper_shutdown: watch::Sender<bool>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl TaskService {
    /// Start workers and the sweeper. Must be called inside a tokio runtime.
    pub fn start(config: EngineConfig) -> Result<Self> {
        Self::start_with_observer(config, Arc::new(NoopObserver))
    }

    /// Start with a telemetry observer
    pub fn start_with_observer(
        config: EngineConfig,
        observer: Arc<dyn TaskObserver>,
    ) -> Result<Self> {
        config.validate()?;

        let registry =
            TaskRegistry::new(config.max_tasks, config.retention).with_observer(observer);
        let pool = WorkerPool::start(config.max_workers, registry.clone());

        let (sweeper_shutdown, shutdown_rx) = watch::channel(false);
        let sweeper = registry.start_sweeper(config.cleanup_interval, shutdown_rx);

        info!(
            "Task service started (workers: {}, max tasks: {}, default timeout: {:?})",
            config.max_workers, config.max_tasks, config.default_timeout
        );

        Ok(Self {
            config,
            registry,
            pool,
            accepting: AtomicBool::new(true),
            sweeper_shutdown,
            sweeper: Mutex::new(Some(sweeper)),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Registry backing this service
    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    // ========== Submission ==========

    /// Register a task and queue it. Never blocks on a busy pool.
    pub fn submit(&self, request: TaskRequest) -> Result<TaskId> {
        if !self.is_accepting() {
            return Err(Error::ShuttingDown);
        }

        let priority = request.priority();
        let (record, job) = request.into_parts(self.config.default_timeout);
        let task_id = record.id();

        self.registry.create(record)?;

        if let Err(e) = self.pool.enqueue(priority, job) {
            // Shutdown raced the submission
            self.registry.cancel(task_id);
            return Err(e);
        }

        info!("Submitted task {} (priority: {})", task_id, priority);
        Ok(task_id)
    }

    // ========== Queries ==========

    pub fn get_status(&self, task_id: TaskId) -> Result<TaskSnapshot> {
        self.registry
            .get(task_id)
            .ok_or_else(|| Error::task_not_found(task_id))
    }

    /// Result of a finished task.
    ///
    /// `InvalidState` while it is still pending or running; the task's own
    /// error once it failed, timed out or was canceled.
    pub fn get_result(&self, task_id: TaskId) -> Result<Value> {
        self.registry.result(task_id)
    }

    /// Poll until the task is terminal, giving up with `Timeout` after
    /// `timeout`
    pub async fn wait_for_result(&self, task_id: TaskId, timeout: Duration) -> Result<Value> {
        let poll = async {
            loop {
                let snapshot = self.get_status(task_id)?;
                if snapshot.is_terminal() {
                    return self.get_result(task_id);
                }
                tokio::time::sleep(RESULT_POLL_INTERVAL).await;
            }
        };

        match tokio::time::timeout(timeout, poll).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "task {} still running after {:?}",
                task_id, timeout
            ))),
        }
    }

    /// Cancel a pending or running task. False if unknown or already terminal.
    pub fn cancel(&self, task_id: TaskId) -> bool {
        self.registry.cancel(task_id)
    }

    /// Pending and running tasks, oldest first
    pub fn list_active(&self) -> Vec<TaskSnapshot> {
        self.registry.list_active()
    }

    /// Every retained task, oldest first
    pub fn list_all(&self) -> Vec<TaskSnapshot> {
        self.registry.list_all()
    }

    pub fn stats(&self) -> EngineStats {
        let counts: StatusCounts = self.registry.counts();

        EngineStats {
            total: counts.total(),
            pending: counts.pending,
            running: counts.running,
            completed: counts.completed,
            failed: counts.failed,
            timed_out: counts.timed_out,
            canceled: counts.canceled,
            queued: self.pool.queued(),
            workers: self.pool.size(),
            max_tasks: self.registry.max_tasks(),
            accepting: self.is_accepting(),
        }
    }

    /// Run a timeout + eviction pass now instead of waiting for the sweeper
    pub fn sweep(&self) -> SweepReport {
        let report = self.registry.sweep();
        debug!(
            "Manual sweep: {} timed out, {} evicted, {} remaining",
            report.timed_out, report.evicted, report.remaining
        );
        report
    }

    // ========== Shutdown ==========

    /// Stop accepting work and wind down.
    ///
    /// `wait = true` runs every queued task and waits for the workers;
    /// `wait = false` cancels queued tasks and lets running ones finish in
    /// the background. Calling it again is a no-op.
    pub async fn shutdown(&self, wait: bool) {
        if !self.accepting.swap(false, Ordering::SeqCst) {
            debug!("Task service already shut down");
            return;
        }

        info!("Shutting down task service (wait: {})", wait);
        self.pool.shutdown(wait).await;

        self.sweeper_shutdown.send_replace(true);
        let sweeper = self.sweeper.lock().take();
        if let Some(handle) = sweeper {
            if let Err(e) = handle.await {
                error!("Task sweeper exited abnormally: {}", e);
            }
        }

        let active = self.registry.counts();
        if active.running > 0 {
            warn!(
                "{} tasks still running after shutdown; their results stay queryable",
                active.running
            );
        }
        info!("Task service stopped");
    }
}

impl std::fmt::Debug for TaskService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskService")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("pool", &self.pool)
            .field("accepting", &self.is_accepting())
            .finish()
    }
}
