//! Task handlers, looked up by task name at claim time.
//!
//! A [`Handler`] receives the task's [`Payload`] and resolves to either a result
//! payload or a [`HandlerError`]. Any async closure with that shape is a handler
//! through the blanket impl below, so registration never needs boxing at the
//! call site:
//!
//! ```rust
//! use serde_json::json;
//! use taskpool::handler::HandlerRegistry;
//! use taskpool::task::Payload;
//!
//! let registry = HandlerRegistry::new();
//! registry.register("send_email", |payload: Payload| async move {
//!     let mut result = Payload::new();
//!     result.insert("email_sent".into(), json!(payload.contains_key("to_email")));
//!     Ok(result)
//! });
//! assert!(registry.contains("send_email"));
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tracing::info;

use crate::task::Payload;

/// Error raised by a handler while executing a task.
///
/// Its message ends up in the task's `error` field as `"Task failed: <message>"`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HandlerError(String);

impl HandlerError {
    /// Creates an error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self(message.to_owned())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self(err.to_string())
    }
}

impl From<std::io::Error> for HandlerError {
    fn from(err: std::io::Error) -> Self {
        Self(err.to_string())
    }
}

/// Boxed future returned by [`Handler::call`].
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Payload, HandlerError>> + Send>>;

/// The capability to execute one kind of task.
///
/// # Contract
///
/// - Implementations **must** be `Send + Sync` because a handler is shared by
///   every worker.
/// - The returned future **must** be `Send + 'static`; it is run on its own
///   Tokio task so that a timeout can abandon it and a panic stays contained.
pub trait Handler: Send + Sync + 'static {
    /// Execute the task with `payload`, boxing the returned future.
    fn call(&self, payload: Payload) -> HandlerFuture;
}

impl<T, F> Handler for T
where
    T: Fn(Payload) -> F + Send + Sync + 'static,
    F: Future<Output = Result<Payload, HandlerError>> + Send + 'static,
{
    fn call(&self, payload: Payload) -> HandlerFuture {
        Box::pin((self)(payload))
    }
}

/// Name → handler map shared by the manager and its workers.
///
/// Registration is allowed before and during operation; the last
/// registration for a name wins. Workers resolve handlers at claim time, so a
/// newly registered handler is picked up by the next claimed task.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `name`, replacing any earlier registration.
    pub fn register(&self, name: impl Into<String>, handler: impl Handler) {
        let name = name.into();
        let replaced = self
            .handlers
            .insert(name.clone(), Arc::new(handler))
            .is_some();
        info!(handler = %name, replaced, "task handler registered");
    }

    /// Returns the handler for `name`, if one is registered.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Returns `true` if a handler is registered for `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Returns the registered handler names, in no particular order.
    pub fn names(&self) -> Vec<String> {
        self.handlers.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Returns the number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns `true` if no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
