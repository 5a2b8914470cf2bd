//! Task records and their lifecycle.
//!
//! This module provides the data model shared by every other part of the crate:
//! [`Task`], [`TaskStatus`], [`Priority`], and the [`Payload`] alias.
//!
//! A [`Task`] only changes state through its transition methods
//! ([`Task::mark_running`], [`Task::complete`], [`Task::fail`], [`Task::cancel`],
//! [`Task::reset_for_retry`]), which keep the timestamp and result/error fields
//! consistent with the status.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque key-value map handed to a handler and returned as its result.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Lifecycle state of a task.
///
/// `Pending` is the only initial state; `Completed`, `Failed`, and `Cancelled`
/// are terminal.
///
/// # Examples
///
/// ```
/// use taskpool::task::TaskStatus;
///
/// let status: TaskStatus = "RUNNING".parse().unwrap();
/// assert_eq!(status, TaskStatus::Running);
/// assert!(!status.is_terminal());
/// assert!(TaskStatus::Failed.is_terminal());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Submitted and waiting in the priority index.
    Pending,
    /// Claimed by a worker; the handler is executing.
    Running,
    /// The handler returned a result.
    Completed,
    /// The handler errored, timed out, or could not be resolved.
    Failed,
    /// Withdrawn before any worker claimed it.
    Cancelled,
}

impl TaskStatus {
    /// Returns the symbolic name used in persisted records.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Returns `true` for statuses with no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown status or priority name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseNameError {
    kind: &'static str,
    value: String,
}

impl FromStr for TaskStatus {
    type Err = ParseNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "RUNNING" => Ok(Self::Running),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(ParseNameError {
                kind: "task status",
                value: other.to_owned(),
            }),
        }
    }
}

/// Scheduling priority. Higher values are claimed first.
///
/// # Examples
///
/// ```
/// use taskpool::task::Priority;
///
/// assert_eq!(Priority::Urgent.value(), 4);
/// assert!(Priority::High > Priority::Normal);
/// assert_eq!(Priority::default(), Priority::Normal);
/// ```
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum Priority {
    Low = 1,
    #[default]
    Normal = 2,
    High = 3,
    Urgent = 4,
}

impl Priority {
    /// Returns the ordinal value (`LOW=1` … `URGENT=4`).
    pub fn value(self) -> u8 {
        self as u8
    }

    /// Returns the symbolic name used in persisted records.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Normal => "NORMAL",
            Self::High => "HIGH",
            Self::Urgent => "URGENT",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = ParseNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOW" => Ok(Self::Low),
            "NORMAL" => Ok(Self::Normal),
            "HIGH" => Ok(Self::High),
            "URGENT" => Ok(Self::Urgent),
            other => Err(ParseNameError {
                kind: "priority",
                value: other.to_owned(),
            }),
        }
    }
}

impl TryFrom<u8> for Priority {
    type Error = ParseNameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Low),
            2 => Ok(Self::Normal),
            3 => Ok(Self::High),
            4 => Ok(Self::Urgent),
            other => Err(ParseNameError {
                kind: "priority",
                value: other.to_string(),
            }),
        }
    }
}

/// One unit of schedulable work and its lifecycle bookkeeping.
///
/// Serialized with serde as a flat JSON object; timestamps are RFC 3339
/// strings and `timeout` is fractional seconds.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use taskpool::task::{Payload, Priority, Task, TaskStatus};
///
/// let mut task = Task::new("send_email", Payload::new(), Priority::High, 3, Duration::from_secs(30));
/// assert_eq!(task.status, TaskStatus::Pending);
/// assert!(task.started_at.is_none());
///
/// task.mark_running();
/// task.complete(Payload::new());
/// assert_eq!(task.status, TaskStatus::Completed);
/// assert!(task.completed_at.is_some());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub payload: Payload,
    pub status: TaskStatus,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub result: Option<Payload>,
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(with = "seconds")]
    pub timeout: Duration,
}

impl Task {
    /// Creates a new `PENDING` task with a fresh UUID and `created_at = now`.
    pub fn new(
        name: impl Into<String>,
        payload: Payload,
        priority: Priority,
        max_retries: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            payload,
            status: TaskStatus::Pending,
            priority,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            result: None,
            retry_count: 0,
            max_retries,
            timeout,
        }
    }

    /// Returns `true` once the task can no longer change state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// `PENDING → RUNNING`: records `started_at`.
    pub fn mark_running(&mut self) {
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// `RUNNING → COMPLETED` with the handler's result.
    pub fn complete(&mut self, result: Payload) {
        self.status = TaskStatus::Completed;
        self.result = Some(result);
        self.error = None;
        self.completed_at = Some(Utc::now());
    }

    /// `RUNNING → FAILED` with a human-readable reason.
    ///
    /// Sets `started_at` as well if the task never ran.
    pub fn fail(&mut self, error: impl Into<String>) {
        let now = Utc::now();
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        self.result = None;
        self.started_at.get_or_insert(now);
        self.completed_at = Some(now);
    }

    /// `PENDING → CANCELLED`. Returns `false` and leaves the task untouched
    /// when it is not pending.
    pub fn cancel(&mut self) -> bool {
        if self.status != TaskStatus::Pending {
            return false;
        }
        self.status = TaskStatus::Cancelled;
        true
    }

    /// Puts a failed or running task back to `PENDING` for another attempt
    /// and bumps `retry_count`.
    pub fn reset_for_retry(&mut self) {
        self.status = TaskStatus::Pending;
        self.retry_count += 1;
        self.started_at = None;
        self.completed_at = None;
        self.error = None;
        self.result = None;
    }

    /// Returns `true` while another attempt is allowed by `max_retries`.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

// Durations travel as fractional seconds, matching the `timeout` field shape.
mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}
