//! Progress reporting from inside a running task

use crate::registry::TaskRegistry;
use crate::state::TaskStatus;
use crate::task::TaskId;

/// Handle passed to a task function while it runs.
///
/// Writes go through the registry lock, so a status poll never sees a
/// half-applied update. Updates after the task reached a terminal state
/// (canceled, timed out) are dropped.
#[derive(Clone)]
pub struct ProgressReporter {
    task_id: TaskId,
    registry: TaskRegistry,
}

impl ProgressReporter {
    pub(crate) fn new(task_id: TaskId, registry: TaskRegistry) -> Self {
        Self { task_id, registry }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Report progress (0-100, clamped) with a status message
    pub fn update(&self, progress: f64, message: impl Into<String>) {
        self.registry
            .update_progress(self.task_id, progress, message.into());
    }

    /// True once the task is no longer running (canceled, timed out or
    /// evicted). Long computations can poll this and return early.
    pub fn is_canceled(&self) -> bool {
        !matches!(
            self.registry.status(self.task_id),
            Some(TaskStatus::Running)
        )
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("task_id", &self.task_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskPriority, TaskRecord};
    use serde_json::Map;
    use std::time::Duration;

    fn running_task(registry: &TaskRegistry) -> TaskId {
        let record = TaskRecord::new(
            TaskId::new(),
            TaskPriority::Normal,
            Duration::from_secs(10),
            Map::new(),
        );
        let id = record.id();
        registry.create(record).unwrap();
        assert!(registry.mark_running(id));
        id
    }

    #[test]
    fn test_update() {
        let registry = TaskRegistry::new(10, Duration::from_secs(60));
        let id = running_task(&registry);
        let reporter = ProgressReporter::new(id, registry.clone());

        reporter.update(50.0, "halfway");
        let snapshot = registry.get(id).unwrap();
        assert_eq!(snapshot.progress, 50);
        assert_eq!(snapshot.message, "halfway");
    }

    #[test]
    fn test_update_clamps() {
        let registry = TaskRegistry::new(10, Duration::from_secs(60));
        let id = running_task(&registry);
        let reporter = ProgressReporter::new(id, registry.clone());

        reporter.update(150.0, "overshoot");
        assert_eq!(registry.get(id).unwrap().progress, 100);

        reporter.update(-20.0, "undershoot");
        assert_eq!(registry.get(id).unwrap().progress, 0);
    }

    #[test]
    fn test_update_after_cancel_dropped() {
        let registry = TaskRegistry::new(10, Duration::from_secs(60));
        let id = running_task(&registry);
        let reporter = ProgressReporter::new(id, registry.clone());

        reporter.update(30.0, "working");
        assert!(!reporter.is_canceled());

        assert!(registry.cancel(id));
        assert!(reporter.is_canceled());

        reporter.update(90.0, "still working");
        let snapshot = registry.get(id).unwrap();
        assert_eq!(snapshot.progress, 30);
        assert_eq!(snapshot.message, "canceled");
    }
}
