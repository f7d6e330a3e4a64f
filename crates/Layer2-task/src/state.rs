//! Task state machine

use serde::{Deserialize, Serialize};

/// Possible states of a task
///
/// ```text
/// Pending --> Running --> Completed | Failed | Timeout | Canceled
/// Pending --> Canceled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Task is waiting in the queue
    Pending,

    /// Task is currently running on a worker
    Running,

    /// Task completed successfully
    Completed,

    /// Task returned an error or panicked
    Failed,

    /// Task overran its timeout (detected by the sweeper)
    Timeout,

    /// Task was canceled
    Canceled,
}

impl TaskStatus {
    /// Check if this is a terminal state (cannot transition further)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Timeout | TaskStatus::Canceled
        )
    }

    /// Pending or running
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Check if task is currently running
    pub fn is_running(&self) -> bool {
        matches!(self, TaskStatus::Running)
    }

    /// Check if task is pending (not yet started)
    pub fn is_pending(&self) -> bool {
        matches!(self, TaskStatus::Pending)
    }

    /// Whether `self -> to` is a legal lifecycle transition
    pub fn can_transition_to(&self, to: TaskStatus) -> bool {
        match self {
            TaskStatus::Pending => matches!(to, TaskStatus::Running | TaskStatus::Canceled),
            TaskStatus::Running => to.is_terminal(),
            _ => false,
        }
    }

    /// Wire name, as reported in snapshots
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Timeout => "timeout",
            TaskStatus::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
