//! Core contract of a priority-ordered task queue.
//!
//! Producers enqueue task records; a fixed pool of workers dequeues them
//! in priority-major, time-minor order and drives each record through its
//! status lifecycle. Storage stays behind the [`Store`] trait, queue
//! behavior behind the [`Queue`] trait, and the work a task performs
//! behind the [`ExecuteTask`] hook, so each seam can be substituted
//! independently (the bundled [`MemoryStore`] backs the tests).

pub mod queue;
pub mod store;
pub mod task;
pub mod worker;

pub use queue::{ErrorKind, PRIORITY_WEIGHT, PriorityQueue, Queue, QueueError};
pub use store::{MemoryStore, Store, StoreError};
pub use task::{
    InvalidPriority, InvalidTransition, NewTask, Priority, TaskRecord, TaskStatus, ValidationError,
};
pub use worker::{ExecuteTask, TaskOutcome, Worker, WorkerPool, WorkerPoolBuilder, fixed_delay};
