//! In-process task store modelled on a sorted-set + hash-map service.
//!
//! Records are kept serialized as JSON strings (the "hash map") and pending ids
//! live in an ordered set (the "sorted set"). A single async mutex guards both,
//! which is what makes [`TaskStore::claim_next`] atomic.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error, trace};

use super::{QueueStats, StoreError, TaskStore};
use crate::task::{Task, TaskStatus};

// Sort key for the priority index. Field order is the claim order:
// highest priority first, then oldest `created_at`, then enqueue sequence.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct IndexKey {
    priority: Reverse<u8>,
    created_at: DateTime<Utc>,
    seq: u64,
    id: String,
}

#[derive(Default)]
struct Inner {
    records: HashMap<String, String>,
    index: BTreeSet<IndexKey>,
    // id -> its key in `index`, for O(log n) removal on cancel.
    indexed: HashMap<String, IndexKey>,
    next_seq: u64,
}

impl Inner {
    fn load(&self, id: &str) -> Result<Option<Task>, StoreError> {
        self.records
            .get(id)
            .map(|raw| serde_json::from_str(raw))
            .transpose()
            .map_err(StoreError::from)
    }

    fn save(&mut self, task: &Task) -> Result<(), StoreError> {
        let raw = serde_json::to_string(task)?;
        self.records.insert(task.id.clone(), raw);
        Ok(())
    }

    fn index(&mut self, task: &Task) {
        let key = IndexKey {
            priority: Reverse(task.priority.value()),
            created_at: task.created_at,
            seq: self.next_seq,
            id: task.id.clone(),
        };
        self.next_seq += 1;
        self.index.insert(key.clone());
        self.indexed.insert(task.id.clone(), key);
    }

    // Rewrites an undecodable record as FAILED in place, as far as its JSON
    // still allows, so it stops looking claimable.
    fn fail_corrupt(&mut self, id: &str, err: &StoreError) {
        let Some(raw) = self.records.get_mut(id) else {
            return;
        };
        let Ok(Value::Object(mut fields)) = serde_json::from_str::<Value>(raw.as_str()) else {
            return;
        };
        fields.insert("status".into(), TaskStatus::Failed.as_str().into());
        fields.insert("error".into(), format!("Task failed: corrupt record: {err}").into());
        fields.insert("completed_at".into(), Utc::now().to_rfc3339().into());
        *raw = Value::Object(fields).to_string();
    }

    fn unindex(&mut self, id: &str) -> bool {
        match self.indexed.remove(id) {
            Some(key) => self.index.remove(&key),
            None => false,
        }
    }
}

/// Shared in-memory [`TaskStore`].
///
/// Wrap it in an [`Arc`](std::sync::Arc) (the pool does this for you) to share
/// one instance between the manager and all workers.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use taskpool::store::{MemoryStore, TaskStore};
/// use taskpool::task::{Payload, Priority, Task, TaskStatus};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), taskpool::store::StoreError> {
/// let store = MemoryStore::new();
/// let low = Task::new("report", Payload::new(), Priority::Low, 0, Duration::from_secs(5));
/// let urgent = Task::new("alert", Payload::new(), Priority::Urgent, 0, Duration::from_secs(5));
/// store.enqueue(low).await?;
/// store.enqueue(urgent).await?;
///
/// let claimed = store.claim_next().await?.unwrap();
/// assert_eq!(claimed.name, "alert");
/// assert_eq!(claimed.status, TaskStatus::Running);
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of ids currently waiting in the priority index.
    pub async fn pending_len(&self) -> usize {
        self.inner.lock().await.index.len()
    }
}

impl TaskStore for MemoryStore {
    async fn enqueue(&self, task: Task) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.save(&task)?;
        inner.unindex(&task.id);
        inner.index(&task);
        debug!(task_id = %task.id, priority = %task.priority, "task enqueued");
        Ok(())
    }

    async fn claim_next(&self) -> Result<Option<Task>, StoreError> {
        let mut inner = self.inner.lock().await;

        while let Some(key) = inner.index.pop_first() {
            inner.indexed.remove(&key.id);

            let mut task = match inner.load(&key.id) {
                Ok(Some(task)) => task,
                // An index entry without a record is stale; drop it.
                Ok(None) => continue,
                Err(e) => {
                    error!(task_id = %key.id, error = %e, "pending record is unreadable, failing it");
                    inner.fail_corrupt(&key.id, &e);
                    continue;
                }
            };
            if task.status != TaskStatus::Pending {
                trace!(task_id = %key.id, status = %task.status, "skipping stale index entry");
                continue;
            }

            task.mark_running();
            inner.save(&task)?;
            return Ok(Some(task));
        }

        Ok(None)
    }

    async fn get(&self, id: &str) -> Result<Option<Task>, StoreError> {
        self.inner.lock().await.load(id)
    }

    async fn update<F>(&self, id: &str, mutator: F) -> Result<Task, StoreError>
    where
        F: FnOnce(&mut Task) + Send,
    {
        let mut inner = self.inner.lock().await;
        let mut task = inner
            .load(id)?
            .ok_or_else(|| StoreError::NotFound(id.to_owned()))?;
        mutator(&mut task);
        inner.save(&task)?;
        Ok(task)
    }

    async fn cancel(&self, id: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        let Some(mut task) = inner.load(id)? else {
            return Ok(false);
        };
        if !task.cancel() {
            return Ok(false);
        }
        inner.unindex(id);
        inner.save(&task)?;
        Ok(true)
    }

    async fn requeue(&self, id: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.indexed.contains_key(id) {
            return Ok(false);
        }
        match inner.load(id)? {
            Some(task) if task.status == TaskStatus::Pending => {
                inner.index(&task);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn stats(&self) -> Result<QueueStats, StoreError> {
        let inner = self.inner.lock().await;
        let mut stats = QueueStats::default();
        for id in inner.records.keys() {
            if let Some(task) = inner.load(id)? {
                stats.record(task.status);
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::task::{Payload, Priority};

    fn task(name: &str, priority: Priority) -> Task {
        Task::new(name, Payload::new(), priority, 3, Duration::from_secs(5))
    }

    async fn drain(store: &MemoryStore) -> Vec<String> {
        let mut names = Vec::new();
        while let Some(task) = store.claim_next().await.unwrap() {
            names.push(task.name);
        }
        names
    }

    #[tokio::test]
    async fn claim_on_empty_store_returns_none() {
        let store = MemoryStore::new();
        assert!(store.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claims_highest_priority_first() {
        let store = MemoryStore::new();
        store.enqueue(task("a", Priority::Low)).await.unwrap();
        store.enqueue(task("b", Priority::Urgent)).await.unwrap();
        store.enqueue(task("c", Priority::Normal)).await.unwrap();
        store.enqueue(task("d", Priority::High)).await.unwrap();
        assert_eq!(drain(&store).await, vec!["b", "d", "c", "a"]);
    }

    #[tokio::test]
    async fn equal_priority_is_fifo() {
        let store = MemoryStore::new();
        for name in ["first", "second", "third"] {
            store.enqueue(task(name, Priority::High)).await.unwrap();
        }
        assert_eq!(drain(&store).await, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn same_created_at_falls_back_to_enqueue_order() {
        let store = MemoryStore::new();
        let first = task("first", Priority::Normal);
        let mut second = task("second", Priority::Normal);
        second.created_at = first.created_at;
        store.enqueue(first).await.unwrap();
        store.enqueue(second).await.unwrap();
        assert_eq!(drain(&store).await, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn claim_marks_running_and_persists() {
        let store = MemoryStore::new();
        let t = task("a", Priority::Normal);
        let id = t.id.clone();
        store.enqueue(t).await.unwrap();

        let claimed = store.claim_next().await.unwrap().unwrap();
        assert_eq!(claimed.status, TaskStatus::Running);
        assert!(claimed.started_at.is_some());

        let stored = store.get(&id).await.unwrap().unwrap();
        assert_eq!(stored, claimed);
        assert_eq!(store.pending_len().await, 0);
    }

    #[tokio::test]
    async fn unreadable_record_is_failed_and_skipped() {
        let store = MemoryStore::new();
        let broken = task("broken", Priority::Urgent);
        let broken_id = broken.id.clone();
        store.enqueue(broken).await.unwrap();
        store.enqueue(task("fine", Priority::Low)).await.unwrap();

        {
            let mut inner = store.inner.lock().await;
            let raw = inner.records.get_mut(&broken_id).unwrap();
            let mut fields: Value = serde_json::from_str(raw).unwrap();
            fields["timeout"] = serde_json::json!(-1.0);
            *raw = fields.to_string();
        }

        let claimed = store.claim_next().await.unwrap().unwrap();
        assert_eq!(claimed.name, "fine");
        assert_eq!(store.pending_len().await, 0);

        let raw = store.inner.lock().await.records[&broken_id].clone();
        let fields: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(fields["status"], "FAILED");
        assert!(
            fields["error"]
                .as_str()
                .unwrap()
                .starts_with("Task failed: corrupt record:")
        );
    }

    #[tokio::test]
    async fn get_unknown_is_none() {
        let store = MemoryStore::new();
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_applies_and_persists() {
        let store = MemoryStore::new();
        let t = task("a", Priority::Normal);
        let id = t.id.clone();
        store.enqueue(t).await.unwrap();
        store.claim_next().await.unwrap();

        let updated = store
            .update(&id, |t| t.fail("Task failed: boom"))
            .await
            .unwrap();
        assert_eq!(updated.status, TaskStatus::Failed);
        let stored = store.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.error.as_deref(), Some("Task failed: boom"));
    }

    #[tokio::test]
    async fn update_unknown_is_not_found() {
        let store = MemoryStore::new();
        let err = store.update("missing", |_| {}).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(id) if id == "missing"));
    }

    #[tokio::test]
    async fn cancel_pending_removes_from_index() {
        let store = MemoryStore::new();
        let t = task("a", Priority::Normal);
        let id = t.id.clone();
        store.enqueue(t).await.unwrap();

        assert!(store.cancel(&id).await.unwrap());
        assert!(store.claim_next().await.unwrap().is_none());
        let stored = store.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Cancelled);
        // second cancel is a no-op
        assert!(!store.cancel(&id).await.unwrap());
    }

    #[tokio::test]
    async fn cancel_after_claim_is_refused() {
        let store = MemoryStore::new();
        let t = task("a", Priority::Normal);
        let id = t.id.clone();
        store.enqueue(t).await.unwrap();
        store.claim_next().await.unwrap();

        assert!(!store.cancel(&id).await.unwrap());
        assert!(!store.cancel("missing").await.unwrap());
    }

    #[tokio::test]
    async fn requeue_only_indexes_pending_records_once() {
        let store = MemoryStore::new();
        let t = task("a", Priority::Normal);
        let id = t.id.clone();
        store.enqueue(t).await.unwrap();

        // already indexed
        assert!(!store.requeue(&id).await.unwrap());

        store.claim_next().await.unwrap();
        // running, not pending
        assert!(!store.requeue(&id).await.unwrap());

        store.update(&id, Task::reset_for_retry).await.unwrap();
        assert!(store.requeue(&id).await.unwrap());
        let again = store.claim_next().await.unwrap().unwrap();
        assert_eq!(again.id, id);
        assert_eq!(again.retry_count, 1);
    }

    #[tokio::test]
    async fn stats_counts_by_status() {
        let store = MemoryStore::new();
        for _ in 0..3 {
            store.enqueue(task("a", Priority::Normal)).await.unwrap();
        }
        let claimed = store.claim_next().await.unwrap().unwrap();
        store
            .update(&claimed.id, |t| t.complete(Payload::new()))
            .await
            .unwrap();
        store.claim_next().await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.running, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.total(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_never_share_an_id() {
        let store = Arc::new(MemoryStore::new());
        for _ in 0..200 {
            store.enqueue(task("a", Priority::Normal)).await.unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let mut ids = Vec::new();
                while let Some(task) = store.claim_next().await.unwrap() {
                    ids.push(task.id);
                }
                ids
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        let unique: std::collections::HashSet<_> = all.iter().collect();
        assert_eq!(all.len(), 200);
        assert_eq!(unique.len(), 200);
    }
}
