//! Worker pool / task manager — the public face of the crate.
//!
//! A [`TaskManager`] owns the shared store, the handler registry, and the
//! worker loops. Construct one at process start, share it by `Arc`, and drive
//! its lifecycle explicitly with [`start`](TaskManager::start) and
//! [`stop`](TaskManager::stop).
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use serde_json::json;
//! use taskpool::{Payload, Priority, SubmitOptions, TaskManager};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = TaskManager::new();
//!     manager.register_handler("send_email", |payload: Payload| async move {
//!         let mut result = Payload::new();
//!         result.insert("email_sent".into(), json!(payload.contains_key("to_email")));
//!         Ok(result)
//!     });
//!     manager.start(4).await?;
//!
//!     let mut payload = Payload::new();
//!     payload.insert("to_email".into(), json!("a@b.com"));
//!     let id = manager
//!         .submit_task("send_email", payload, SubmitOptions::new().priority(Priority::High))
//!         .await?;
//!
//!     tokio::time::sleep(Duration::from_secs(2)).await;
//!     println!("{:?}", manager.get_task_status(&id).await?);
//!
//!     manager.stop().await;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::PoolConfig;
use crate::handler::{Handler, HandlerRegistry};
use crate::store::{MemoryStore, QueueStats, StoreError, TaskStore};
use crate::task::{Payload, Priority, Task};
use crate::worker::Worker;

/// Errors produced by pool lifecycle calls.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("worker pool is already running with {0} workers")]
    AlreadyRunning(usize),

    #[error("worker count must be at least 1")]
    NoWorkers,
}

/// Per-task submission options.
///
/// Unset fields fall back to the manager's [`PoolConfig`] defaults
/// (`max_retries = 3`, `timeout = 300s` unless configured otherwise).
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use taskpool::{Priority, SubmitOptions};
///
/// let options = SubmitOptions::new()
///     .priority(Priority::Urgent)
///     .timeout(Duration::from_millis(500));
/// assert_eq!(options.priority, Priority::Urgent);
/// assert_eq!(options.max_retries, None);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitOptions {
    pub priority: Priority,
    pub max_retries: Option<u32>,
    pub timeout: Option<Duration>,
}

impl SubmitOptions {
    /// `NORMAL` priority with config defaults for everything else.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the claim priority.
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Overrides [`PoolConfig::default_max_retries`] for this task.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Overrides [`PoolConfig::default_timeout`] for this task.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

// Handles for a started pool.
struct RunningPool {
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

/// Owns N workers over one shared [`TaskStore`] and exposes the
/// submit / query / register API.
///
/// Dropping a running manager signals its workers to stop after their current
/// claim cycle, the same as [`stop`](Self::stop) without waiting.
pub struct TaskManager<S: TaskStore = MemoryStore> {
    store: Arc<S>,
    registry: Arc<HandlerRegistry>,
    config: Arc<PoolConfig>,
    running: Mutex<Option<RunningPool>>,
}

impl TaskManager<MemoryStore> {
    /// Creates a manager over a fresh [`MemoryStore`] with default settings.
    pub fn new() -> Self {
        Self::with_config(PoolConfig::default())
    }

    /// Creates a manager over a fresh [`MemoryStore`].
    pub fn with_config(config: PoolConfig) -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), config)
    }
}

impl Default for TaskManager<MemoryStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: TaskStore> TaskManager<S> {
    /// Creates a manager over an existing store.
    ///
    /// Several managers may share one store; the atomic claim keeps their
    /// workers from executing the same task twice.
    pub fn with_store(store: Arc<S>, config: PoolConfig) -> Self {
        Self {
            store,
            registry: Arc::new(HandlerRegistry::new()),
            config: Arc::new(config),
            running: Mutex::new(None),
        }
    }

    /// Returns the shared store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Returns the handler registry.
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Registers `handler` for tasks named `name`. Allowed at any time; the last
    /// registration for a name wins.
    pub fn register_handler(&self, name: impl Into<String>, handler: impl Handler) {
        self.registry.register(name, handler);
    }

    /// Spawns `worker_count` worker loops and returns once they are scheduled.
    ///
    /// # Errors
    ///
    /// - [`PoolError::NoWorkers`] if `worker_count` is zero.
    /// - [`PoolError::AlreadyRunning`] if the pool was started and not stopped.
    pub async fn start(&self, worker_count: usize) -> Result<(), PoolError> {
        if worker_count == 0 {
            return Err(PoolError::NoWorkers);
        }

        let mut running = self.running.lock().await;
        if let Some(pool) = running.as_ref() {
            return Err(PoolError::AlreadyRunning(pool.workers.len()));
        }

        let (shutdown, rx) = watch::channel(false);
        let workers = (0..worker_count)
            .map(|id| {
                let worker = Worker::new(
                    id,
                    Arc::clone(&self.store),
                    Arc::clone(&self.registry),
                    Arc::clone(&self.config),
                    rx.clone(),
                );
                tokio::spawn(worker.run())
            })
            .collect();

        *running = Some(RunningPool { shutdown, workers });
        info!(workers = worker_count, "task pool started");
        Ok(())
    }

    /// Signals every worker to exit after its current claim cycle and waits
    /// for them to finish.
    ///
    /// In-flight handlers are not aborted; `stop` returns once they complete.
    /// Stopping an idle pool is a no-op. The pool can be started again.
    pub async fn stop(&self) {
        let Some(pool) = self.running.lock().await.take() else {
            debug!("stop called on a pool that is not running");
            return;
        };

        info!(workers = pool.workers.len(), "stopping task pool");
        // Receivers also treat a dropped sender as shutdown.
        let _ = pool.shutdown.send(true);

        for handle in pool.workers {
            if let Err(e) = handle.await {
                error!(error = %e, "worker exited abnormally");
            }
        }
        info!("task pool stopped");
    }

    /// Returns `true` between `start` and `stop`.
    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Returns the number of workers in the running pool (0 when stopped).
    pub async fn worker_count(&self) -> usize {
        self.running
            .lock()
            .await
            .as_ref()
            .map_or(0, |pool| pool.workers.len())
    }

    /// Creates a `PENDING` task and enqueues it.
    ///
    /// # Returns
    ///
    /// The new task's id.
    ///
    /// # Errors
    ///
    /// Returns the store's error, [`StoreError::Unavailable`] when the store
    /// cannot be reached. The task is not queued in that case.
    pub async fn submit_task(
        &self,
        name: impl Into<String>,
        payload: Payload,
        options: SubmitOptions,
    ) -> Result<String, StoreError> {
        let task = Task::new(
            name,
            payload,
            options.priority,
            options.max_retries.unwrap_or(self.config.default_max_retries),
            options.timeout.unwrap_or(self.config.default_timeout),
        );
        let id = task.id.clone();
        let name = task.name.clone();

        self.store.enqueue(task).await?;
        info!(task_id = %id, name = %name, priority = %options.priority, "task submitted");
        Ok(id)
    }

    /// Returns the current record for `task_id`, or `None` if it was never submitted.
    pub async fn get_task_status(&self, task_id: &str) -> Result<Option<Task>, StoreError> {
        self.store.get(task_id).await
    }

    /// Cancels a task that no worker has claimed yet.
    ///
    /// Returns `false` when the task is unknown, running, or already terminal.
    pub async fn cancel_task(&self, task_id: &str) -> Result<bool, StoreError> {
        let cancelled = self.store.cancel(task_id).await?;
        if cancelled {
            info!(task_id, "task cancelled");
        }
        Ok(cancelled)
    }

    /// Returns task counts per status.
    pub async fn stats(&self) -> Result<QueueStats, StoreError> {
        self.store.stats().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskStatus;

    fn fast_config() -> PoolConfig {
        PoolConfig::new().poll_interval(Duration::from_millis(10))
    }

    #[test]
    fn submit_options_defaults() {
        let options = SubmitOptions::default();
        assert_eq!(options.priority, Priority::Normal);
        assert_eq!(options.max_retries, None);
        assert_eq!(options.timeout, None);
    }

    #[tokio::test]
    async fn submit_applies_config_defaults() {
        let manager = TaskManager::with_config(
            fast_config()
                .default_timeout(Duration::from_secs(42))
                .default_max_retries(7),
        );
        let id = manager
            .submit_task("job", Payload::new(), SubmitOptions::new())
            .await
            .unwrap();

        let task = manager.get_task_status(&id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.priority, Priority::Normal);
        assert_eq!(task.timeout, Duration::from_secs(42));
        assert_eq!(task.max_retries, 7);
    }

    #[tokio::test]
    async fn default_submission_uses_documented_defaults() {
        let manager = TaskManager::new();
        let id = manager
            .submit_task("job", Payload::new(), SubmitOptions::new())
            .await
            .unwrap();
        let task = manager.get_task_status(&id).await.unwrap().unwrap();
        assert_eq!(task.max_retries, 3);
        assert_eq!(task.timeout, Duration::from_secs(300));
    }

    #[tokio::test]
    async fn start_rejects_zero_workers() {
        let manager = TaskManager::with_config(fast_config());
        assert_eq!(manager.start(0).await, Err(PoolError::NoWorkers));
        assert!(!manager.is_running().await);
    }

    #[tokio::test]
    async fn start_twice_is_an_error() {
        let manager = TaskManager::with_config(fast_config());
        manager.start(2).await.unwrap();
        assert_eq!(manager.start(1).await, Err(PoolError::AlreadyRunning(2)));
        assert_eq!(manager.worker_count().await, 2);
        manager.stop().await;
    }

    #[tokio::test]
    async fn stop_then_restart() {
        let manager = TaskManager::with_config(fast_config());
        manager.start(1).await.unwrap();
        manager.stop().await;
        assert!(!manager.is_running().await);
        assert_eq!(manager.worker_count().await, 0);

        manager.start(3).await.unwrap();
        assert_eq!(manager.worker_count().await, 3);
        manager.stop().await;
    }

    #[tokio::test]
    async fn stop_on_idle_pool_is_noop() {
        let manager = TaskManager::with_config(fast_config());
        manager.stop().await;
        assert!(!manager.is_running().await);
    }

    #[tokio::test]
    async fn cancel_pending_task() {
        let manager = TaskManager::with_config(fast_config());
        let id = manager
            .submit_task("job", Payload::new(), SubmitOptions::new())
            .await
            .unwrap();

        assert!(manager.cancel_task(&id).await.unwrap());
        let task = manager.get_task_status(&id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert!(!manager.cancel_task("unknown").await.unwrap());
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let manager = TaskManager::with_config(fast_config());
        assert!(manager.get_task_status("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stats_reflect_submissions() {
        let manager = TaskManager::with_config(fast_config());
        for _ in 0..3 {
            manager
                .submit_task("job", Payload::new(), SubmitOptions::new())
                .await
                .unwrap();
        }
        let stats = manager.stats().await.unwrap();
        assert_eq!(stats.pending, 3);
        assert_eq!(stats.total(), 3);
    }
}
