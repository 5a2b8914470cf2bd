//! # taskpool
//!
//! A priority background-task queue consumed by a pool of async workers.
//!
//! Producers submit named tasks with a JSON payload and a priority; workers
//! atomically claim the highest-priority pending task from a shared store,
//! run the registered handler under the task's timeout, and record the
//! outcome. Callers poll the task's status to observe it.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use serde_json::json;
//! use taskpool::{Payload, SubmitOptions, TaskManager};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = TaskManager::new();
//!     manager.register_handler("generate_report", |_payload: Payload| async {
//!         let mut result = Payload::new();
//!         result.insert("rows".into(), json!(128));
//!         Ok(result)
//!     });
//!     manager.start(4).await?;
//!
//!     let id = manager
//!         .submit_task("generate_report", Payload::new(), SubmitOptions::new())
//!         .await?;
//!     println!("submitted {id}");
//!
//!     manager.stop().await;
//!     Ok(())
//! }
//! ```

// ── Core data model ───────────────────────────────────────────────────────────
pub mod task;

// ── Storage, handlers, execution ─────────────────────────────────────────────
pub mod handler;
pub mod store;
mod worker;

// ── Public facade and settings ───────────────────────────────────────────────
pub mod config;
pub mod pool;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use config::{PoolConfig, RetryPolicy};
pub use handler::{Handler, HandlerError, HandlerRegistry};
pub use pool::{PoolError, SubmitOptions, TaskManager};
pub use store::{MemoryStore, QueueStats, StoreError, TaskStore};
pub use task::{Payload, Priority, Task, TaskStatus};
pub use worker::TIMEOUT_ERROR;
