//! Task Store — shared persistence and priority ordering for task records.
//!
//! Every worker coordinates through a [`TaskStore`]. The store owns two things:
//!
//! - the **records**, keyed by task id, and
//! - the **priority index** of pending ids, ordered highest priority first and
//!   FIFO (by `created_at`, then enqueue order) within a priority.
//!
//! [`TaskStore::claim_next`] is the only coordination primitive: it removes the
//! best pending id and marks the record `RUNNING` in one atomic step, so two
//! workers can never claim the same task. After a claim the owning worker is
//! the only writer of that record.
//!
//! [`MemoryStore`] is the in-process implementation.

use std::future::Future;

use serde::Serialize;
use thiserror::Error;

use crate::task::{Task, TaskStatus};

pub mod memory;

pub use memory::MemoryStore;

/// Errors produced by a task store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing service could not be reached.
    #[error("task store unavailable: {0}")]
    Unavailable(String),

    /// A record could not be encoded or decoded.
    #[error("task record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// `update` was called for an id the store has never seen.
    #[error("task not found: {0}")]
    NotFound(String),
}

/// Per-status task counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl QueueStats {
    /// Counts one task in the bucket for `status`.
    pub fn record(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Pending => self.pending += 1,
            TaskStatus::Running => self.running += 1,
            TaskStatus::Completed => self.completed += 1,
            TaskStatus::Failed => self.failed += 1,
            TaskStatus::Cancelled => self.cancelled += 1,
        }
    }

    /// Total number of tasks across all statuses.
    pub fn total(&self) -> usize {
        self.pending + self.running + self.completed + self.failed + self.cancelled
    }

    /// Number of tasks in a terminal status.
    pub fn finished(&self) -> usize {
        self.completed + self.failed + self.cancelled
    }
}

/// Durable, concurrency-safe storage for task records.
///
/// # Contract
///
/// - `claim_next` **must** be atomic: concurrent callers never receive the same id.
/// - Every successful write **must** be visible to the next `get` from any caller.
/// - `update` is only called by the worker that currently owns the task, so
///   implementations need no locking beyond what makes `claim_next` atomic.
pub trait TaskStore: Send + Sync + 'static {
    /// Persists `task` and inserts its id into the priority index.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the backing service cannot be
    /// reached. The task is not stored in that case.
    fn enqueue(&self, task: Task) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Atomically removes the highest-priority pending task from the index,
    /// marks it `RUNNING` (setting `started_at`), and returns it.
    ///
    /// Returns `Ok(None)` when no task is pending.
    fn claim_next(&self) -> impl Future<Output = Result<Option<Task>, StoreError>> + Send;

    /// Returns the current record for `id`, or `None` if it is unknown.
    fn get(&self, id: &str) -> impl Future<Output = Result<Option<Task>, StoreError>> + Send;

    /// Applies `mutator` to the record for `id`, persists it, and returns the
    /// updated record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown ids.
    fn update<F>(&self, id: &str, mutator: F) -> impl Future<Output = Result<Task, StoreError>> + Send
    where
        F: FnOnce(&mut Task) + Send;

    /// Moves a `PENDING` task to `CANCELLED` and drops it from the index.
    ///
    /// Returns `false` when the task is unknown or no longer pending.
    fn cancel(&self, id: &str) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Re-inserts a `PENDING` record into the priority index.
    ///
    /// Returns `false` when the record is unknown, not pending, or already indexed.
    fn requeue(&self, id: &str) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Returns task counts per status.
    fn stats(&self) -> impl Future<Output = Result<QueueStats, StoreError>> + Send;
}
