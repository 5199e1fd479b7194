//! Priority queue built on the store contract.
//!
//! The queue keeps two things in the store: the full record under a
//! per-task key with a retention TTL, and the task id in an ordered index
//! whose score folds priority and submission time into a single number.
//! The two writes are separate operations, so a crash between them can
//! orphan either side; dequeue surfaces the record-missing half of that
//! gap as [`ErrorKind::NotFound`].

use std::borrow::Cow;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::store::{Store, StoreError};
use crate::task::{NewTask, TaskRecord};

/// Head start one priority tier buys over the next, in seconds of
/// submission time (about 11.6 days). Must exceed the longest a task can
/// realistically sit queued, or an old low-priority entry overtakes a
/// newer high-priority one.
pub const PRIORITY_WEIGHT: f64 = 1_000_000.0;

const DEFAULT_QUEUE_KEY: &str = "taskflow:queue:pending";
const DEFAULT_RECORD_PREFIX: &str = "taskflow:task:";
const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Sort key for the ordered index: priority-major, time-minor, one
/// comparison. Lower scores dequeue first.
pub fn score(priority: crate::task::Priority, enqueued_at: DateTime<Utc>) -> f64 {
    enqueued_at.timestamp() as f64 - f64::from(u8::from(priority)) * PRIORITY_WEIGHT
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
/// Categorization of queue failures.
pub enum ErrorKind {
    /// The ordered index is empty. Expected and transient; drives the
    /// worker's poll backoff, never surfaced to producers as a failure.
    Empty,
    /// A record is missing for a resolved id: either the id is unknown, or
    /// the record expired while still indexed. The id is already gone from
    /// the index, so it will not be re-delivered.
    NotFound,
    /// Transport or I/O failure against the backing store.
    Store,
    /// A persisted record could not be decoded.
    Decode,
}

#[derive(Debug)]
/// Error type returned by [`Queue`] operations.
pub struct QueueError {
    kind: ErrorKind,
    inner: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl QueueError {
    fn empty() -> Self {
        Self {
            kind: ErrorKind::Empty,
            inner: None,
        }
    }

    fn not_found(id: &str) -> Self {
        Self {
            kind: ErrorKind::NotFound,
            inner: Some(format!("no record for task {id}").into()),
        }
    }

    /// Return the category of this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl From<StoreError> for QueueError {
    fn from(value: StoreError) -> Self {
        Self {
            kind: ErrorKind::Store,
            inner: Some(Box::new(value)),
        }
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(value: serde_json::Error) -> Self {
        Self {
            kind: ErrorKind::Decode,
            inner: Some(Box::new(value)),
        }
    }
}

impl std::fmt::Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.inner, self.kind) {
            (Some(inner), _) => inner.fmt(f),
            (None, ErrorKind::Empty) => f.write_str("queue is empty"),
            (None, kind) => write!(f, "{kind:?}"),
        }
    }
}

impl std::error::Error for QueueError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner
            .as_ref()
            .map(|inner| inner.as_ref() as &(dyn std::error::Error + 'static))
    }
}

mod tmp {
    use super::{QueueError, TaskRecord};

    /// Queue behavior as a capability.
    ///
    /// Workers and producers hold this trait, not a concrete queue, so
    /// tests can substitute an in-memory implementation.
    #[trait_variant::make(Queue: Send)]
    pub trait LocalQueue {
        /// Persist the record and index its id for dequeue.
        async fn enqueue(&self, task: &TaskRecord) -> Result<(), QueueError>;

        /// Remove and return the highest-precedence task.
        async fn dequeue(&self) -> Result<TaskRecord, QueueError>;

        /// Direct record lookup, independent of queue position.
        async fn get(&self, id: &str) -> Result<TaskRecord, QueueError>;

        /// Re-persist the record with a refreshed `updated_at` and renewed
        /// retention. Never touches the ordered index: a task's position is
        /// fixed at enqueue time.
        async fn update(&self, task: &mut TaskRecord) -> Result<(), QueueError>;
    }
}

pub use tmp::Queue;

#[derive(Debug, Clone)]
/// Store-backed [`Queue`] implementation.
pub struct PriorityQueue<S> {
    store: S,
    queue_key: Cow<'static, str>,
    record_prefix: Cow<'static, str>,
    retention: Duration,
}

impl<S> PriorityQueue<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            queue_key: Cow::Borrowed(DEFAULT_QUEUE_KEY),
            record_prefix: Cow::Borrowed(DEFAULT_RECORD_PREFIX),
            retention: DEFAULT_RETENTION,
        }
    }

    /// Override the ordered-index key.
    pub fn queue_key(self, queue_key: impl Into<Cow<'static, str>>) -> Self {
        Self {
            queue_key: queue_key.into(),
            ..self
        }
    }

    /// Override the record key prefix.
    pub fn record_prefix(self, record_prefix: impl Into<Cow<'static, str>>) -> Self {
        Self {
            record_prefix: record_prefix.into(),
            ..self
        }
    }

    /// Override how long records are retained after their last write.
    pub fn retention(self, retention: Duration) -> Self {
        Self { retention, ..self }
    }

    fn record_key(&self, id: &str) -> String {
        format!("{}{}", self.record_prefix, id)
    }
}

impl<S> PriorityQueue<S>
where
    S: Store + Sync,
{
    /// Producer entry point: build the record and enqueue it.
    pub async fn create(&self, new_task: NewTask) -> Result<TaskRecord, QueueError> {
        let task = new_task.into_record();
        self.enqueue(&task).await?;
        Ok(task)
    }
}

impl<S> Queue for PriorityQueue<S>
where
    S: Store + Sync,
{
    async fn enqueue(&self, task: &TaskRecord) -> Result<(), QueueError> {
        let encoded = serde_json::to_string(task)?;
        self.store
            .put(&self.record_key(&task.id), &encoded, self.retention)
            .await?;
        // Second, separate write. A crash here leaves the record without an
        // index entry; the reverse gap shows up later as NotFound.
        self.store
            .ordered_insert(&self.queue_key, &task.id, score(task.priority, Utc::now()))
            .await?;
        Ok(())
    }

    async fn dequeue(&self) -> Result<TaskRecord, QueueError> {
        let popped = self.store.ordered_pop_min(&self.queue_key, 1).await?;
        let Some((id, _score)) = popped.into_iter().next() else {
            return Err(QueueError::empty());
        };

        match self.store.get(&self.record_key(&id)).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Err(QueueError::not_found(&id)),
        }
    }

    async fn get(&self, id: &str) -> Result<TaskRecord, QueueError> {
        match self.store.get(&self.record_key(id)).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Err(QueueError::not_found(id)),
        }
    }

    async fn update(&self, task: &mut TaskRecord) -> Result<(), QueueError> {
        task.touch();
        let encoded = serde_json::to_string(task)?;
        self.store
            .put(&self.record_key(&task.id), &encoded, self.retention)
            .await?;
        Ok(())
    }
}
