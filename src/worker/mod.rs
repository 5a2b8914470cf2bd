//! Worker — claims tasks from the store and drives them to a terminal status.
//!
//! Each worker runs one loop:
//!
//! 1. [`TaskStore::claim_next`]; when the queue is empty, idle for
//!    `poll_interval` (woken early by shutdown) and try again.
//! 2. The claim itself moves the task to `RUNNING`.
//! 3. Resolve the handler by task name; a miss fails the task.
//! 4. Run the handler on its own Tokio task under `task.timeout`.
//! 5. Write `COMPLETED` or `FAILED` (or schedule a retry) and go back to 1.
//!
//! Nothing that happens to one task stops the loop. Store errors while
//! claiming back off exponentially. Once a task is claimed, every write for it
//! is retried with the same backoff while the store is unavailable.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::config::PoolConfig;
use crate::handler::HandlerRegistry;
use crate::store::{StoreError, TaskStore};
use crate::task::{Payload, Task};

/// Error recorded when a handler exceeds its deadline.
pub const TIMEOUT_ERROR: &str = "Task timed out";

// Why a handler invocation did not produce a result.
#[derive(Debug)]
enum Failure {
    MissingHandler,
    Handler(String),
    TimedOut,
}

impl Failure {
    // Error text stored on the task.
    fn message(&self, task_name: &str) -> String {
        match self {
            Self::MissingHandler => format!("No handler found for task {task_name}"),
            Self::Handler(message) => format!("Task failed: {message}"),
            Self::TimedOut => TIMEOUT_ERROR.to_owned(),
        }
    }

    // Missing handlers are a configuration problem; another attempt cannot help.
    fn is_retryable(&self) -> bool {
        !matches!(self, Self::MissingHandler)
    }
}

/// One worker loop bound to a shared store and handler registry.
pub(crate) struct Worker<S> {
    id: usize,
    store: Arc<S>,
    registry: Arc<HandlerRegistry>,
    config: Arc<PoolConfig>,
    shutdown: watch::Receiver<bool>,
}

impl<S: TaskStore> Worker<S> {
    pub(crate) fn new(
        id: usize,
        store: Arc<S>,
        registry: Arc<HandlerRegistry>,
        config: Arc<PoolConfig>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            id,
            store,
            registry,
            config,
            shutdown,
        }
    }

    /// Runs until shutdown is signalled (or the signalling side is dropped).
    ///
    /// Shutdown is checked between claim cycles only; a task that has been
    /// claimed always runs to its outcome.
    pub(crate) async fn run(mut self) {
        info!(worker = self.id, "worker started");
        let mut backoff = self.config.store_backoff;

        while !self.is_shutting_down() {
            match self.store.claim_next().await {
                Ok(Some(task)) => {
                    backoff = self.config.store_backoff;
                    self.process(task).await;
                }
                Ok(None) => {
                    trace!(worker = self.id, "queue empty");
                    self.idle(self.config.poll_interval).await;
                }
                Err(e) => {
                    warn!(
                        worker = self.id,
                        error = %e,
                        backoff_ms = backoff.as_millis() as u64,
                        "failed to claim task, backing off"
                    );
                    self.idle(backoff).await;
                    backoff = self.config.next_store_backoff(backoff);
                }
            }
        }

        info!(worker = self.id, "worker stopped");
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow() || self.shutdown.has_changed().is_err()
    }

    async fn idle(&mut self, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.shutdown.changed() => {}
        }
    }

    async fn process(&self, task: Task) {
        let started = Instant::now();
        debug!(
            worker = self.id,
            task_id = %task.id,
            name = %task.name,
            priority = %task.priority,
            "task claimed"
        );

        let failure = match self.execute(&task).await {
            Ok(result) => {
                info!(
                    worker = self.id,
                    task_id = %task.id,
                    name = %task.name,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "task completed"
                );
                self.write_outcome(&task.id, |t| t.complete(result.clone())).await;
                return;
            }
            Err(failure) => failure,
        };

        let error = failure.message(&task.name);
        let retry_delay = if failure.is_retryable() && task.can_retry() {
            self.config.retry.delay(task.retry_count + 1)
        } else {
            None
        };

        match retry_delay {
            Some(delay) => self.schedule_retry(&task, &error, delay).await,
            None => {
                warn!(
                    worker = self.id,
                    task_id = %task.id,
                    name = %task.name,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    error = %error,
                    "task failed"
                );
                self.write_outcome(&task.id, |t| t.fail(error.as_str())).await;
            }
        }
    }

    async fn execute(&self, task: &Task) -> Result<Payload, Failure> {
        let Some(handler) = self.registry.get(&task.name) else {
            return Err(Failure::MissingHandler);
        };

        // Spawned so that a panic surfaces as a JoinError and a timeout can abort it.
        let mut invocation = tokio::spawn(handler.call(task.payload.clone()));

        match tokio::time::timeout(task.timeout, &mut invocation).await {
            Ok(Ok(result)) => result.map_err(|e| Failure::Handler(e.to_string())),
            Ok(Err(join_error)) if join_error.is_panic() => {
                Err(Failure::Handler("handler panicked".to_owned()))
            }
            Ok(Err(join_error)) => Err(Failure::Handler(join_error.to_string())),
            Err(_elapsed) => {
                invocation.abort();
                Err(Failure::TimedOut)
            }
        }
    }

    // Records the outcome of a claimed task. The task already left the index,
    // so an unavailable store is waited out rather than given up on.
    async fn write_outcome<F>(&self, task_id: &str, mutator: F)
    where
        F: Fn(&mut Task) + Send + Sync,
    {
        let store = &*self.store;
        let mutator = &mutator;
        let written = retry_unavailable(&self.config, task_id, "record outcome", move || {
            store.update(task_id, mutator)
        })
        .await;

        if let Err(e) = written {
            error!(worker = self.id, task_id, error = %e, "failed to record task outcome");
        }
    }

    // Puts the task back to PENDING now and re-indexes it once `delay` has passed.
    async fn schedule_retry(&self, task: &Task, error: &str, delay: Duration) {
        let store = &*self.store;
        let task_id = task.id.as_str();
        let reset = retry_unavailable(&self.config, task_id, "reset for retry", move || {
            store.update(task_id, Task::reset_for_retry)
        })
        .await;

        let task = match reset {
            Ok(task) => task,
            Err(e) => {
                error!(worker = self.id, task_id, error = %e, "failed to reset task for retry");
                return;
            }
        };

        warn!(
            worker = self.id,
            task_id = %task.id,
            name = %task.name,
            attempt = task.retry_count,
            max_retries = task.max_retries,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "task failed, retry scheduled"
        );

        let store = Arc::clone(&self.store);
        let config = Arc::clone(&self.config);
        let task_id = task.id;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let store = &*store;
            let id = task_id.as_str();
            match retry_unavailable(&config, id, "requeue", move || store.requeue(id)).await {
                Ok(true) => debug!(task_id = %task_id, "task requeued"),
                Ok(false) => debug!(task_id = %task_id, "task no longer pending, not requeued"),
                Err(e) => error!(task_id = %task_id, error = %e, "failed to requeue task"),
            }
        });
    }
}

// Runs `op` until the store answers with anything but `Unavailable`, sleeping
// with the capped store backoff in between. Shutdown does not interrupt it.
async fn retry_unavailable<T, Op, Fut>(
    config: &PoolConfig,
    task_id: &str,
    action: &'static str,
    mut op: Op,
) -> Result<T, StoreError>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut backoff = config.store_backoff;
    loop {
        match op().await {
            Err(StoreError::Unavailable(reason)) => {
                warn!(
                    task_id,
                    action,
                    error = %reason,
                    backoff_ms = backoff.as_millis() as u64,
                    "task store unavailable, retrying write"
                );
                tokio::time::sleep(backoff).await;
                backoff = config.next_store_backoff(backoff);
            }
            other => return other,
        }
    }
}
