//! Task definition and types

use crate::progress::ProgressReporter;
use crate::state::TaskStatus;
use chrono::{DateTime, Utc};
use insight_foundation::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Message a task carries before a worker picks it up
pub const WAITING_MESSAGE: &str = "waiting to run";

/// Unique identifier for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Generate a new random TaskId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Short form for log lines
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(TaskId)
            .map_err(|e| Error::InvalidInput(format!("Invalid task id '{}': {}", s, e)))
    }
}

/// Scheduling priority. Only affects queue order, never preempts.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    Urgent = 3,
}

impl TaskPriority {
    pub fn value(&self) -> u8 {
        *self as u8
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Normal => "normal",
            TaskPriority::High => "high",
            TaskPriority::Urgent => "urgent",
        }
    }
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Work payload
// ============================================================================

/// Positional and keyword arguments handed to a task function
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskArgs {
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
}

impl TaskArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    pub fn kwarg(&self, name: &str) -> Option<&Value> {
        self.kwargs.get(name)
    }

    /// Deserialize positional argument `index`
    pub fn arg_as<T: DeserializeOwned>(&self, index: usize) -> anyhow::Result<T> {
        let value = self
            .arg(index)
            .ok_or_else(|| anyhow::anyhow!("missing positional argument {}", index))?;
        Ok(serde_json::from_value(value.clone())?)
    }

    /// Deserialize keyword argument `name`
    pub fn kwarg_as<T: DeserializeOwned>(&self, name: &str) -> anyhow::Result<T> {
        let value = self
            .kwarg(name)
            .ok_or_else(|| anyhow::anyhow!("missing keyword argument '{}'", name))?;
        Ok(serde_json::from_value(value.clone())?)
    }
}

/// The work a task runs on a worker thread
pub type TaskFn = Box<dyn FnOnce(&TaskArgs, &ProgressReporter) -> anyhow::Result<Value> + Send>;

/// Invoked once after the task completes
pub type CompleteCallback = Box<dyn FnOnce(&TaskSnapshot) + Send>;

/// Invoked once after the task fails or times out
pub type ErrorCallback = Box<dyn FnOnce(&TaskSnapshot, &Error) + Send>;

// ============================================================================
// TaskRequest (submission)
// ============================================================================

/// A unit of work to submit to the [`TaskService`](crate::TaskService)
pub struct TaskRequest {
    pub(crate) id: Option<TaskId>,
    pub(crate) func: TaskFn,
    pub(crate) args: TaskArgs,
    pub(crate) priority: TaskPriority,
    pub(crate) timeout: Option<Duration>,
    pub(crate) on_complete: Option<CompleteCallback>,
    pub(crate) on_error: Option<ErrorCallback>,
    pub(crate) metadata: Map<String, Value>,
}

impl TaskRequest {
    /// Create a request running `func`
    pub fn new<F>(func: F) -> Self
    where
        F: FnOnce(&TaskArgs, &ProgressReporter) -> anyhow::Result<Value> + Send + 'static,
    {
        Self {
            id: None,
            func: Box::new(func),
            args: TaskArgs::default(),
            priority: TaskPriority::default(),
            timeout: None,
            on_complete: None,
            on_error: None,
            metadata: Map::new(),
        }
    }

    /// Use a caller-chosen id instead of a generated one
    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = Some(id);
        self
    }

    /// Set positional arguments
    pub fn with_args(mut self, args: impl IntoIterator<Item = Value>) -> Self {
        self.args.args = args.into_iter().collect();
        self
    }

    /// Add a keyword argument
    pub fn with_kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.kwargs.insert(name.into(), value.into());
        self
    }

    /// Set priority
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Set timeout (falls back to the engine default otherwise)
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Add a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Callback run by the worker after a successful completion
    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&TaskSnapshot) + Send + 'static,
    {
        self.on_complete = Some(Box::new(callback));
        self
    }

    /// Callback run by the worker after a failure or timeout
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&TaskSnapshot, &Error) + Send + 'static,
    {
        self.on_error = Some(Box::new(callback));
        self
    }

    pub fn priority(&self) -> TaskPriority {
        self.priority
    }

    /// Split into the registry record and the job the pool runs
    pub(crate) fn into_parts(self, default_timeout: Duration) -> (TaskRecord, TaskJob) {
        let id = self.id.unwrap_or_default();
        let record = TaskRecord::new(
            id,
            self.priority,
            self.timeout.unwrap_or(default_timeout),
            self.metadata,
        );
        let job = TaskJob {
            id,
            func: self.func,
            args: self.args,
            on_complete: self.on_complete,
            on_error: self.on_error,
        };
        (record, job)
    }
}

impl std::fmt::Debug for TaskRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRequest")
            .field("id", &self.id)
            .field("args", &self.args)
            .field("priority", &self.priority)
            .field("timeout", &self.timeout)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// Executable half of a task, owned by the queue and then by one worker
pub(crate) struct TaskJob {
    pub id: TaskId,
    pub func: TaskFn,
    pub args: TaskArgs,
    pub on_complete: Option<CompleteCallback>,
    pub on_error: Option<ErrorCallback>,
}

// ============================================================================
// TaskRecord (state)
// ============================================================================

/// Mutable state of a task. Only ever touched under the registry lock.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    id: TaskId,
    priority: TaskPriority,
    timeout: Duration,
    status: TaskStatus,
    progress: u8,
    message: String,
    result: Option<Value>,
    error: Option<String>,
    traceback: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    metadata: Map<String, Value>,
    /// A worker is still executing the callable, even if the status is
    /// already terminal (canceled or timed out meanwhile)
    in_flight: bool,
}

impl TaskRecord {
    pub fn new(
        id: TaskId,
        priority: TaskPriority,
        timeout: Duration,
        metadata: Map<String, Value>,
    ) -> Self {
        Self {
            id,
            priority,
            timeout,
            status: TaskStatus::Pending,
            progress: 0,
            message: WAITING_MESSAGE.to_string(),
            result: None,
            error: None,
            traceback: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            metadata,
            in_flight: false,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn priority(&self) -> TaskPriority {
        self.priority
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    fn transition(&mut self, to: TaskStatus, message: impl Into<String>) -> bool {
        self.transition_at(to, message, Utc::now())
    }

    fn transition_at(
        &mut self,
        to: TaskStatus,
        message: impl Into<String>,
        at: DateTime<Utc>,
    ) -> bool {
        if !self.status.can_transition_to(to) {
            return false;
        }
        self.status = to;
        self.message = message.into();
        if to.is_terminal() {
            self.completed_at = Some(at);
        }
        true
    }

    /// Mark task as running
    pub fn start(&mut self) -> bool {
        if !self.transition(TaskStatus::Running, "running") {
            return false;
        }
        self.started_at = Some(Utc::now());
        self.in_flight = true;
        true
    }

    /// The worker returned from the callable
    pub fn release(&mut self) {
        self.in_flight = false;
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Mark task as completed successfully
    pub fn complete(&mut self, result: Value) -> bool {
        if !self.transition(TaskStatus::Completed, "completed") {
            return false;
        }
        self.result = Some(result);
        self.progress = 100;
        true
    }

    /// Mark task as failed
    pub fn fail(&mut self, error: impl Into<String>, traceback: Option<String>) -> bool {
        let error = error.into();
        if !self.transition(TaskStatus::Failed, format!("failed: {}", error)) {
            return false;
        }
        self.error = Some(error);
        self.traceback = traceback;
        true
    }

    /// Mark task as timed out, as observed by a sweep at `now`
    pub fn time_out(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> bool {
        if !self.transition_at(TaskStatus::Timeout, "timed out", now) {
            return false;
        }
        self.error = Some(error.into());
        true
    }

    /// Mark task as canceled
    pub fn cancel(&mut self) -> bool {
        self.transition(TaskStatus::Canceled, "canceled")
    }

    /// Record progress. Clamped to 0..=100; ignored once terminal.
    pub fn set_progress(&mut self, progress: f64, message: impl Into<String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        // NaN saturates to 0
        self.progress = progress.clamp(0.0, 100.0).round() as u8;
        self.message = message.into();
        true
    }

    /// Running longer than its timeout at `now`. A timeout too large for
    /// the clock (e.g. `Duration::MAX`) never expires.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        if !self.status.is_running() {
            return false;
        }
        let (Some(started_at), Ok(timeout)) =
            (self.started_at, chrono::Duration::from_std(self.timeout))
        else {
            return false;
        };
        now - started_at > timeout
    }

    /// Old enough to be evicted at `now`. Never true while a worker still
    /// holds the task.
    pub fn is_expired(&self, now: DateTime<Utc>, retention: Duration) -> Result<bool> {
        if self.in_flight {
            return Ok(false);
        }
        let retention = chrono::Duration::from_std(retention)
            .map_err(|e| Error::Internal(format!("retention out of range: {}", e)))?;
        let Some(cutoff) = now.checked_sub_signed(retention) else {
            return Ok(false);
        };

        if self.status.is_terminal() {
            return Ok(self.completed_at.map(|t| t < cutoff).unwrap_or(false));
        }
        Ok(self.status.is_pending() && self.started_at.is_none() && self.created_at < cutoff)
    }

    /// The outcome a caller gets when asking for the result
    pub fn outcome(&self) -> Result<Value> {
        match self.status {
            TaskStatus::Completed => Ok(self.result.clone().unwrap_or(Value::Null)),
            TaskStatus::Failed | TaskStatus::Timeout | TaskStatus::Canceled => {
                Err(self.failure().unwrap_or(Error::Cancelled))
            }
            TaskStatus::Pending | TaskStatus::Running => Err(Error::InvalidState {
                task_id: self.id.to_string(),
                status: self.status.to_string(),
            }),
        }
    }

    /// Error describing a failed, timed out or canceled task
    pub fn failure(&self) -> Option<Error> {
        let error = || self.error.clone().unwrap_or_default();
        match self.status {
            TaskStatus::Failed => Some(Error::execution_failed(error(), self.traceback.clone())),
            TaskStatus::Timeout => Some(Error::Timeout(error())),
            TaskStatus::Canceled => Some(Error::Cancelled),
            _ => None,
        }
    }

    /// Seconds between start and completion
    pub fn execution_time(&self) -> Option<f64> {
        let (start, end) = (self.started_at?, self.completed_at?);
        Some(seconds(end - start))
    }

    /// Seconds spent waiting in the queue (so far, if not started)
    pub fn wait_time(&self) -> f64 {
        let end = self.started_at.unwrap_or_else(Utc::now);
        seconds(end - self.created_at)
    }

    /// Immutable view for callers
    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            task_id: self.id,
            status: self.status,
            priority: self.priority,
            progress: self.progress,
            message: self.message.clone(),
            metadata: self.metadata.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            execution_time: self.execution_time(),
            wait_time: self.wait_time(),
            error: self.error.clone(),
        }
    }
}

fn seconds(delta: chrono::Duration) -> f64 {
    delta.num_microseconds().unwrap_or(i64::MAX) as f64 / 1_000_000.0
}

// ============================================================================
// TaskSnapshot (external view)
// ============================================================================

/// Point-in-time view of a task, taken under the registry lock
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub progress: u8,
    pub message: String,
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Seconds from start to completion
    pub execution_time: Option<f64>,
    /// Seconds from creation to start
    pub wait_time: f64,
    pub error: Option<String>,
}

impl TaskSnapshot {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Execution time as a `Duration`
    pub fn duration(&self) -> Option<Duration> {
        self.execution_time
            .map(|secs| Duration::from_secs_f64(secs.max(0.0)))
    }

    /// HTTP status the API layer answers a status poll with
    pub fn http_status(&self) -> u16 {
        match self.status {
            TaskStatus::Pending | TaskStatus::Running => 202,
            TaskStatus::Completed => 200,
            TaskStatus::Failed | TaskStatus::Timeout => 500,
            TaskStatus::Canceled => 410,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> TaskRecord {
        let mut metadata = Map::new();
        metadata.insert("desc".into(), json!("trend analysis"));
        TaskRecord::new(
            TaskId::new(),
            TaskPriority::Normal,
            Duration::from_secs(10),
            metadata,
        )
    }

    #[test]
    fn test_new_record() {
        let record = record();
        assert_eq!(record.status(), TaskStatus::Pending);
        assert_eq!(record.progress(), 0);
        assert_eq!(record.message(), WAITING_MESSAGE);
        assert!(record.started_at().is_none());
        assert!(record.completed_at().is_none());

        let snapshot = record.snapshot();
        assert_eq!(snapshot.metadata["desc"], json!("trend analysis"));
        assert!(snapshot.execution_time.is_none());
        assert!(snapshot.error.is_none());
        assert_eq!(snapshot.http_status(), 202);
    }

    #[test]
    fn test_complete_sets_result_and_timestamps() {
        let mut record = record();
        assert!(record.start());
        assert!(record.started_at().is_some());
        assert!(record.complete(json!(5)));

        assert_eq!(record.status(), TaskStatus::Completed);
        assert_eq!(record.progress(), 100);
        assert!(record.completed_at().is_some());
        assert_eq!(record.outcome().unwrap(), json!(5));
        assert!(record.snapshot().execution_time.is_some());
    }

    #[test]
    fn test_only_one_terminal_transition() {
        let mut record = record();
        record.start();
        assert!(record.time_out("execution exceeded timeout", Utc::now()));

        // Late result from the worker is discarded
        assert!(!record.complete(json!("late")));
        assert!(!record.fail("late", None));
        assert!(!record.cancel());
        assert_eq!(record.status(), TaskStatus::Timeout);
        assert!(matches!(record.outcome(), Err(Error::Timeout(_))));
    }

    #[test]
    fn test_complete_requires_running() {
        let mut record = record();
        assert!(!record.complete(json!(1)));
        assert_eq!(record.status(), TaskStatus::Pending);
        assert!(record.completed_at().is_none());
    }

    #[test]
    fn test_fail_keeps_traceback() {
        let mut record = record();
        record.start();
        record.fail("division by zero", Some("at step 3".into()));

        assert_eq!(record.message(), "failed: division by zero");
        match record.outcome() {
            Err(Error::ExecutionFailed { message, traceback }) => {
                assert_eq!(message, "division by zero");
                assert_eq!(traceback.as_deref(), Some("at step 3"));
            }
            other => panic!("expected ExecutionFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_outcome_before_terminal_is_invalid_state() {
        let mut record = record();
        assert!(matches!(record.outcome(), Err(Error::InvalidState { .. })));
        record.start();
        assert!(matches!(record.outcome(), Err(Error::InvalidState { .. })));
    }

    #[test]
    fn test_progress_clamped() {
        let mut record = record();
        record.start();

        record.set_progress(150.0, "too far");
        assert_eq!(record.progress(), 100);

        record.set_progress(-20.0, "backwards");
        assert_eq!(record.progress(), 0);
        assert_eq!(record.message(), "backwards");

        record.set_progress(f64::NAN, "nan");
        assert_eq!(record.progress(), 0);

        record.cancel();
        assert!(!record.set_progress(50.0, "after cancel"));
        assert_eq!(record.message(), "canceled");
    }

    #[test]
    fn test_overdue() {
        let mut record = record();
        let later = Utc::now() + chrono::Duration::seconds(11);
        assert!(!record.is_overdue(later));

        record.start();
        assert!(!record.is_overdue(Utc::now()));
        assert!(record.is_overdue(later));
    }

    #[test]
    fn test_unbounded_timeout_never_overdue() {
        let mut record = TaskRecord::new(
            TaskId::new(),
            TaskPriority::Normal,
            Duration::MAX,
            Map::new(),
        );
        record.start();
        assert!(!record.is_overdue(Utc::now() + chrono::Duration::days(365 * 100)));
    }

    #[test]
    fn test_expired() {
        let retention = Duration::from_secs(60);
        let mut record = record();
        let now = Utc::now();
        let later = now + chrono::Duration::seconds(61);

        // Stuck pending entries expire too
        assert!(!record.is_expired(now, retention).unwrap());
        assert!(record.is_expired(later, retention).unwrap());

        record.start();
        assert!(!record.is_expired(later, retention).unwrap());

        record.complete(json!(null));
        // Kept while the worker still holds it
        assert!(!record.is_expired(later, retention).unwrap());

        record.release();
        assert!(!record.is_expired(now, retention).unwrap());
        assert!(record.is_expired(later, retention).unwrap());
    }

    #[test]
    fn test_timed_out_record_kept_until_worker_returns() {
        let retention = Duration::from_secs(60);
        let mut record = record();
        record.start();
        let swept_at = Utc::now() + chrono::Duration::seconds(11);
        assert!(record.time_out("execution exceeded timeout", swept_at));
        assert!(record.is_in_flight());

        let much_later = swept_at + chrono::Duration::hours(1);
        assert!(!record.is_expired(much_later, retention).unwrap());

        record.release();
        assert!(record.is_expired(much_later, retention).unwrap());
    }

    #[test]
    fn test_task_id_parse() {
        let id = TaskId::new();
        let parsed: TaskId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert_eq!(id.short().len(), 8);
        assert!("not-a-uuid".parse::<TaskId>().is_err());
    }

    #[test]
    fn test_args_access() {
        let args = TaskArgs {
            args: vec![json!(2), json!(3)],
            kwargs: json!({"window": 7}).as_object().cloned().unwrap(),
        };
        assert_eq!(args.arg_as::<i64>(1).unwrap(), 3);
        assert_eq!(args.kwarg_as::<u32>("window").unwrap(), 7);
        assert!(args.arg_as::<i64>(2).is_err());
        assert!(args.kwarg_as::<String>("window").is_err());
    }

    #[test]
    fn test_priority_wire_format() {
        assert_eq!(TaskPriority::default(), TaskPriority::Normal);
        assert_eq!(TaskPriority::Urgent.value(), 3);
        assert_eq!(
            serde_json::to_value(TaskPriority::High).unwrap(),
            json!("high")
        );
        assert!(TaskPriority::Urgent > TaskPriority::Low);
    }
}
