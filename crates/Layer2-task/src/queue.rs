//! Priority queue feeding the worker pool

use crate::task::{TaskJob, TaskPriority};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// Queue position of a job.
///
/// Sorts the way jobs are dequeued: higher priority first, then submission
/// order, so equal-priority tasks never starve each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueKey {
    pub priority: TaskPriority,
    pub seq: u64,
}

impl Ord for QueueKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for QueueKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct QueueEntry {
    key: QueueKey,
    job: TaskJob,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for QueueEntry {}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Pending jobs, smallest key first
#[derive(Default)]
pub(crate) struct TaskQueue {
    heap: BinaryHeap<Reverse<QueueEntry>>,
    next_seq: u64,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, priority: TaskPriority, job: TaskJob) {
        let key = QueueKey {
            priority,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.heap.push(Reverse(QueueEntry { key, job }));
    }

    pub fn pop(&mut self) -> Option<TaskJob> {
        self.heap.pop().map(|Reverse(entry)| entry.job)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Remove every queued job
    pub fn drain(&mut self) -> Vec<TaskJob> {
        std::iter::from_fn(|| self.pop()).collect()
    }
}
