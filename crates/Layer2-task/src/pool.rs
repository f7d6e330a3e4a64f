//! Worker Pool - fixed set of workers draining the priority queue
//!
//! Workers are tokio tasks. Each job body runs on the blocking thread pool so
//! a CPU-heavy callable never stalls the runtime, and a panic inside it is
//! caught and recorded as a failure of that task only.

use crate::progress::ProgressReporter;
use crate::queue::TaskQueue;
use crate::registry::{Finished, TaskOutcome, TaskRegistry};
use crate::state::TaskStatus;
use crate::task::{CompleteCallback, ErrorCallback, TaskJob, TaskPriority};
use futures::future::join_all;
use insight_foundation::{Error, Result};
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Lifecycle of the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// Accepting and running jobs
    Running,
    /// Not accepting; workers exit once the queue is empty
    Draining,
    /// Not accepting; workers exit after their current job
    Stopped,
}

/// Fixed-size pool of workers
pub struct WorkerPool {
    queue: Arc<Mutex<TaskQueue>>,
    notify: Arc<Notify>,
    state_tx: watch::Sender<PoolState>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
    registry: TaskRegistry,
}

impl WorkerPool {
    /// Spawn `size` workers on the current runtime
    pub fn start(size: usize, registry: TaskRegistry) -> Self {
        let queue = Arc::new(Mutex::new(TaskQueue::new()));
        let notify = Arc::new(Notify::new());
        let (state_tx, _) = watch::channel(PoolState::Running);

        let workers = (0..size)
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    Arc::clone(&queue),
                    Arc::clone(&notify),
                    state_tx.subscribe(),
                    registry.clone(),
                ))
            })
            .collect();

        info!("Worker pool started with {} workers", size);

        Self {
            queue,
            notify,
            state_tx,
            workers: Mutex::new(workers),
            size,
            registry,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn state(&self) -> PoolState {
        *self.state_tx.borrow()
    }

    /// Jobs waiting for a worker
    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    /// Queue a job. Never blocks; fails once shutdown has begun.
    pub(crate) fn enqueue(&self, priority: TaskPriority, job: TaskJob) -> Result<()> {
        {
            let mut queue = self.queue.lock();
            // State only changes under the queue lock, so no job can slip in
            // behind a shutdown drain
            if *self.state_tx.borrow() != PoolState::Running {
                return Err(Error::ShuttingDown);
            }
            queue.push(priority, job);
        }

        self.notify.notify_one();
        Ok(())
    }

    /// Stop the pool.
    ///
    /// With `wait`, queued jobs still run and this returns once every worker
    /// has exited. Without it, queued tasks are canceled and workers stop
    /// after their current job in the background.
    pub async fn shutdown(&self, wait: bool) {
        let drained = {
            let mut queue = self.queue.lock();
            if wait {
                if self.state() == PoolState::Running {
                    self.state_tx.send_replace(PoolState::Draining);
                }
                Vec::new()
            } else {
                self.state_tx.send_replace(PoolState::Stopped);
                queue.drain()
            }
        };

        if !drained.is_empty() {
            info!("Canceling {} queued tasks", drained.len());
        }
        for job in drained {
            self.registry.cancel(job.id);
        }

        let handles = std::mem::take(&mut *self.workers.lock());
        if !wait || handles.is_empty() {
            return;
        }

        debug!("Waiting for {} workers to finish", handles.len());
        for result in join_all(handles).await {
            if let Err(e) = result {
                error!("Worker exited abnormally: {}", e);
            }
        }
        info!("Worker pool stopped");
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.size)
            .field("state", &self.state())
            .field("queued", &self.queued())
            .finish()
    }
}

// ============================================================================
// Worker
// ============================================================================

async fn worker_loop(
    worker_id: usize,
    queue: Arc<Mutex<TaskQueue>>,
    notify: Arc<Notify>,
    mut state_rx: watch::Receiver<PoolState>,
    registry: TaskRegistry,
) {
    debug!("Worker {} started", worker_id);

    loop {
        let state = *state_rx.borrow_and_update();
        if state == PoolState::Stopped {
            break;
        }

        let job = queue.lock().pop();
        match job {
            Some(job) => run_job(&registry, job).await,
            None if state == PoolState::Draining => break,
            None => {
                tokio::select! {
                    _ = notify.notified() => {}
                    changed = state_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}

async fn run_job(registry: &TaskRegistry, job: TaskJob) {
    let task_id = job.id;
    let registry = registry.clone();

    if let Err(e) = tokio::task::spawn_blocking(move || execute(&registry, job)).await {
        error!("Execution thread of task {} died: {}", task_id.short(), e);
    }
}

/// Run one job to its terminal state, then fire its callback
fn execute(registry: &TaskRegistry, job: TaskJob) {
    let TaskJob {
        id,
        func,
        args,
        on_complete,
        on_error,
    } = job;

    if !registry.mark_running(id) {
        debug!("Skipping task {}: no longer pending", id.short());
        return;
    }

    let reporter = ProgressReporter::new(id, registry.clone());
    let outcome = match panic::catch_unwind(AssertUnwindSafe(|| func(&args, &reporter))) {
        Ok(Ok(value)) => TaskOutcome::Success(value),
        Ok(Err(e)) => TaskOutcome::Failure {
            message: e.to_string(),
            traceback: Some(format!("{:?}", e)),
        },
        Err(payload) => TaskOutcome::Failure {
            message: format!("task panicked: {}", panic_message(&*payload)),
            traceback: None,
        },
    };

    match registry.finish(id, outcome) {
        Some(finished) => dispatch_callbacks(finished, on_complete, on_error),
        None => debug!("Task {} is no longer registered", id.short()),
    }
}

/// Completed runs `on_complete`; failed and timed out run `on_error`;
/// canceled runs neither
fn dispatch_callbacks(
    finished: Finished,
    on_complete: Option<CompleteCallback>,
    on_error: Option<ErrorCallback>,
) {
    let Finished {
        snapshot, error, ..
    } = finished;

    let result = match (snapshot.status, error) {
        (TaskStatus::Completed, _) => on_complete
            .map(|callback| panic::catch_unwind(AssertUnwindSafe(|| callback(&snapshot)))),
        (TaskStatus::Failed | TaskStatus::Timeout, Some(error)) => on_error
            .map(|callback| panic::catch_unwind(AssertUnwindSafe(|| callback(&snapshot, &error)))),
        _ => None,
    };

    if let Some(Err(payload)) = result {
        warn!(
            "Callback of task {} panicked: {}",
            snapshot.task_id.short(),
            panic_message(&*payload)
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskId, TaskRequest};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    fn registry() -> TaskRegistry {
        TaskRegistry::new(100, Duration::from_secs(3600))
    }

    fn submit(pool: &WorkerPool, registry: &TaskRegistry, request: TaskRequest) -> TaskId {
        let priority = request.priority();
        let (record, job) = request.into_parts(Duration::from_secs(30));
        let id = record.id();
        registry.create(record).unwrap();
        pool.enqueue(priority, job).unwrap();
        id
    }

    async fn wait_for(registry: &TaskRegistry, id: TaskId, status: TaskStatus) {
        for _ in 0..200 {
            if registry.status(id) == Some(status) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {} never reached {}", id, status);
    }

    #[tokio::test]
    async fn test_runs_job_to_completion() {
        let registry = registry();
        let pool = WorkerPool::start(2, registry.clone());

        let id = submit(
            &pool,
            &registry,
            TaskRequest::new(|args, _| {
                let x: i64 = args.arg_as(0)?;
                let y: i64 = args.arg_as(1)?;
                Ok(json!(x + y))
            })
            .with_args([json!(2), json!(3)]),
        );

        wait_for(&registry, id, TaskStatus::Completed).await;
        assert_eq!(registry.result(id).unwrap(), json!(5));
        pool.shutdown(true).await;
    }

    #[tokio::test]
    async fn test_error_and_panic_become_failures() {
        let registry = registry();
        let pool = WorkerPool::start(2, registry.clone());

        let failing = submit(
            &pool,
            &registry,
            TaskRequest::new(|_, _| {
                Err(anyhow::anyhow!("disk unreadable").context("loading dataset"))
            }),
        );
        let panicking = submit(
            &pool,
            &registry,
            TaskRequest::new(|_, _| panic!("index out of range")),
        );
        let healthy = submit(&pool, &registry, TaskRequest::new(|_, _| Ok(json!("ok"))));

        wait_for(&registry, failing, TaskStatus::Failed).await;
        wait_for(&registry, panicking, TaskStatus::Failed).await;
        wait_for(&registry, healthy, TaskStatus::Completed).await;

        match registry.result(failing) {
            Err(Error::ExecutionFailed { message, traceback }) => {
                assert_eq!(message, "loading dataset");
                assert!(traceback.unwrap().contains("disk unreadable"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
        let snapshot = registry.get(panicking).unwrap();
        assert!(snapshot.error.unwrap().contains("index out of range"));

        pool.shutdown(true).await;
    }

    #[tokio::test]
    async fn test_priority_order_single_worker() {
        let registry = registry();
        let pool = WorkerPool::start(1, registry.clone());
        let order = Arc::new(Mutex::new(Vec::new()));
        let (release, gate) = mpsc::channel::<()>();

        let blocker = submit(
            &pool,
            &registry,
            TaskRequest::new(move |_, _| {
                gate.recv().ok();
                Ok(Value::Null)
            }),
        );
        wait_for(&registry, blocker, TaskStatus::Running).await;

        for (name, priority) in [
            ("low", TaskPriority::Low),
            ("urgent", TaskPriority::Urgent),
            ("normal", TaskPriority::Normal),
        ] {
            let order = Arc::clone(&order);
            submit(
                &pool,
                &registry,
                TaskRequest::new(move |_, _| {
                    order.lock().push(name);
                    Ok(Value::Null)
                })
                .with_priority(priority),
            );
        }

        release.send(()).unwrap();
        pool.shutdown(true).await;
        assert_eq!(*order.lock(), vec!["urgent", "normal", "low"]);
    }

    #[tokio::test]
    async fn test_callbacks_fire_once() {
        let registry = registry();
        let pool = WorkerPool::start(2, registry.clone());
        let completed = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));

        let ok = {
            let completed = Arc::clone(&completed);
            submit(
                &pool,
                &registry,
                TaskRequest::new(|_, _| Ok(json!(1))).on_complete(move |snapshot| {
                    assert_eq!(snapshot.status, TaskStatus::Completed);
                    completed.fetch_add(1, Ordering::SeqCst);
                }),
            )
        };
        let bad = {
            let failed = Arc::clone(&failed);
            submit(
                &pool,
                &registry,
                TaskRequest::new(|_, _| anyhow::bail!("nope")).on_error(move |_, error| {
                    assert!(matches!(error, Error::ExecutionFailed { .. }));
                    failed.fetch_add(1, Ordering::SeqCst);
                }),
            )
        };

        pool.shutdown(true).await;
        assert_eq!(registry.status(ok), Some(TaskStatus::Completed));
        assert_eq!(registry.status(bad), Some(TaskStatus::Failed));
        assert_eq!(completed.load(Ordering::SeqCst), 1);
        assert_eq!(failed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_callback_panic_contained() {
        let registry = registry();
        let pool = WorkerPool::start(1, registry.clone());

        let first = submit(
            &pool,
            &registry,
            TaskRequest::new(|_, _| Ok(json!(1))).on_complete(|_| panic!("callback bug")),
        );
        let second = submit(&pool, &registry, TaskRequest::new(|_, _| Ok(json!(2))));

        pool.shutdown(true).await;
        assert_eq!(registry.status(first), Some(TaskStatus::Completed));
        assert_eq!(registry.result(second).unwrap(), json!(2));
    }

    #[tokio::test]
    async fn test_shutdown_without_wait_cancels_queue() {
        let registry = registry();
        let pool = WorkerPool::start(1, registry.clone());
        let runs = Arc::new(AtomicUsize::new(0));
        let (release, gate) = mpsc::channel::<()>();

        let blocker = submit(
            &pool,
            &registry,
            TaskRequest::new(move |_, _| {
                gate.recv().ok();
                Ok(json!("done"))
            }),
        );
        wait_for(&registry, blocker, TaskStatus::Running).await;

        let queued = {
            let runs = Arc::clone(&runs);
            submit(
                &pool,
                &registry,
                TaskRequest::new(move |_, _| {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(Value::Null)
                }),
            )
        };

        pool.shutdown(false).await;
        assert_eq!(pool.state(), PoolState::Stopped);
        assert_eq!(pool.queued(), 0);
        assert_eq!(registry.status(queued), Some(TaskStatus::Canceled));

        let (_, job) = TaskRequest::new(|_, _| Ok(Value::Null)).into_parts(Duration::from_secs(1));
        assert!(matches!(
            pool.enqueue(TaskPriority::Normal, job),
            Err(Error::ShuttingDown)
        ));

        // The running job still finishes
        release.send(()).unwrap();
        wait_for(&registry, blocker, TaskStatus::Completed).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(&*payload), "static message");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(panic_message(&*payload), "owned message");

        let payload: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(&*payload), "unknown panic payload");
    }
}
