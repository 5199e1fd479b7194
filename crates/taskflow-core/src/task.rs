//! Task records and their status lifecycle.
//!
//! A [`TaskRecord`] is the persisted description of one unit of work. The
//! queue owns the canonical copy; a worker holds a transient copy while the
//! task runs and writes it back through [`Queue::update`].
//!
//! [`Queue::update`]: crate::queue::Queue::update

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// Execution state of a task.
///
/// Transitions are strictly `Pending -> Running -> {Completed, Failed}`.
/// There is no way back to `Pending` and `Running` cannot be skipped.
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
/// Dequeue precedence, ordinal 0-3. Higher values dequeue first.
pub enum Priority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl From<Priority> for u8 {
    fn from(value: Priority) -> Self {
        value as u8
    }
}

impl TryFrom<u8> for Priority {
    type Error = InvalidPriority;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Priority::Low),
            1 => Ok(Priority::Normal),
            2 => Ok(Priority::High),
            3 => Ok(Priority::Critical),
            other => Err(InvalidPriority(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// A priority value outside the 0-3 range.
pub struct InvalidPriority(pub u8);

impl std::fmt::Display for InvalidPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "priority must be 0-3, got {}", self.0)
    }
}

impl std::error::Error for InvalidPriority {}

#[derive(Debug)]
/// An illegal status change was attempted.
pub struct InvalidTransition {
    from: TaskStatus,
    to: TaskStatus,
}

impl InvalidTransition {
    /// Status the task held when the transition was attempted.
    pub fn from_status(&self) -> TaskStatus {
        self.from
    }

    /// Status the transition tried to reach.
    pub fn to_status(&self) -> TaskStatus {
        self.to
    }
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid status transition {:?} -> {:?}", self.from, self.to)
    }
}

impl std::error::Error for InvalidTransition {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// The persisted description and status of one unit of work.
///
/// `id` is assigned once at creation and never reassigned. `payload` is
/// opaque to the queue and round-trips through serialization unchanged,
/// including nested structure.
pub struct TaskRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub payload: serde_json::Value,
    pub status: TaskStatus,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    /// Create a new pending task with both timestamps set to now.
    pub fn new(
        task_type: impl Into<String>,
        payload: serde_json::Value,
        priority: Priority,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task_type: task_type.into(),
            payload,
            status: TaskStatus::Pending,
            priority,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move the task to `next`, validated against the state machine.
    ///
    /// Refreshes `updated_at` on success.
    pub fn transition(&mut self, next: TaskStatus) -> Result<(), InvalidTransition> {
        use TaskStatus::*;
        let legal = matches!(
            (self.status, next),
            (Pending, Running) | (Running, Completed) | (Running, Failed)
        );
        if !legal {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.touch();
        Ok(())
    }

    /// Refresh `updated_at`, keeping it monotonically non-decreasing.
    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now().max(self.updated_at);
    }
}

#[derive(Debug)]
/// Creation input was malformed.
pub struct ValidationError {
    message: &'static str,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Producer-side input for creating a task.
///
/// Validation happens here, above the queue: an empty type tag is rejected
/// before a record ever exists.
pub struct NewTask {
    task_type: String,
    payload: serde_json::Value,
    priority: Priority,
}

impl NewTask {
    /// Create a task description with [`Priority::Normal`].
    pub fn new(
        task_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Result<Self, ValidationError> {
        let task_type = task_type.into();
        if task_type.is_empty() {
            return Err(ValidationError {
                message: "task type must not be empty",
            });
        }
        Ok(Self {
            task_type,
            payload,
            priority: Priority::default(),
        })
    }

    /// Override the dequeue precedence.
    pub fn priority(self, priority: Priority) -> Self {
        Self { priority, ..self }
    }

    /// Build the pending record this description stands for.
    pub fn into_record(self) -> TaskRecord {
        TaskRecord::new(self.task_type, self.payload, self.priority)
    }
}
