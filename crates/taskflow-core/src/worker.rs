//! Worker loop and pool supervision.
//!
//! A [`Worker`] polls the shared queue, drives one task at a time through
//! its status lifecycle, and hands the actual work to an injectable
//! [`ExecuteTask`] hook. A [`WorkerPool`] spawns a fixed number of workers
//! against one queue handle and joins them on shutdown.
//!
//! Cancellation is cooperative and one-shot: each worker checks the token
//! at the top of its loop, so a worker mid-execution finishes that task
//! before stopping. Shutdown latency is bounded by one poll interval plus
//! the remaining execution time of any in-flight task.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::queue::{ErrorKind, Queue};
use crate::task::{TaskRecord, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Outcome reported by an execution hook.
///
/// The envelope persists the matching terminal status and nothing more:
/// no retry, no dead-letter routing. A hook that wants those must build
/// them itself.
pub enum TaskOutcome {
    /// Persist the task as successfully completed.
    Completed,
    /// Persist the task as failed.
    Failed,
}

/// Trait implemented by functions that perform a task's actual work.
///
/// The `M` type parameter distinguishes the argument shapes a hook may
/// take, so both no-argument and record-taking closures implement the
/// trait without overlapping.
pub trait ExecuteTask<M>: Send + Sync + Clone + 'static {
    /// Future returned by the hook.
    type Future: Future<Output = TaskOutcome> + Send;

    /// Perform the work described by `task`.
    fn execute(self, task: TaskRecord) -> Self::Future;
}

impl<F, Fut> ExecuteTask<()> for F
where
    F: FnOnce() -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = TaskOutcome> + Send,
{
    type Future = Fut;

    fn execute(self, _task: TaskRecord) -> Self::Future {
        self()
    }
}

impl<F, Fut> ExecuteTask<TaskRecord> for F
where
    F: FnOnce(TaskRecord) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = TaskOutcome> + Send,
{
    type Future = Fut;

    fn execute(self, task: TaskRecord) -> Self::Future {
        self(task)
    }
}

/// Reference execution hook: wait a fixed duration, then report success.
///
/// Stands in for real task logic, which is out of scope for the
/// scheduling envelope.
pub fn fixed_delay(delay: Duration) -> impl ExecuteTask<TaskRecord> {
    move |_task: TaskRecord| async move {
        tokio::time::sleep(delay).await;
        TaskOutcome::Completed
    }
}

/// One polling execution loop against the shared queue.
pub struct Worker<Q, F, M> {
    id: usize,
    queue: Arc<Q>,
    handler: F,
    poll_interval: Duration,
    marker: std::marker::PhantomData<fn() -> M>,
}

impl<Q, F, M> Worker<Q, F, M>
where
    Q: Queue + Sync,
    F: ExecuteTask<M>,
{
    pub fn new(id: usize, queue: Arc<Q>, handler: F, poll_interval: Duration) -> Self {
        Self {
            id,
            queue,
            handler,
            poll_interval,
            marker: std::marker::PhantomData,
        }
    }

    /// Run until `token` is cancelled.
    ///
    /// The token is observed only at the top of each iteration; neither
    /// the empty-queue sleep nor task execution is interrupted.
    pub async fn run(self, token: CancellationToken) {
        tracing::debug!(worker = self.id, "worker started");
        loop {
            if token.is_cancelled() {
                break;
            }

            match self.queue.dequeue().await {
                Ok(task) => self.process(task).await,
                Err(error) => match error.kind() {
                    ErrorKind::Empty => {
                        tokio::time::sleep(self.poll_interval).await;
                    }
                    ErrorKind::NotFound => {
                        // Index/record divergence: the id is already gone
                        // from the index, nothing to redeliver.
                        tracing::warn!(worker = self.id, error = %error, "dequeued id without record");
                    }
                    _ => {
                        tracing::error!(worker = self.id, error = %error, "dequeue failed");
                    }
                },
            }
        }
        tracing::debug!(worker = self.id, "worker stopping");
    }

    async fn process(&self, mut task: TaskRecord) {
        tracing::info!(worker = self.id, task_id = %task.id, task_type = %task.task_type, "processing task");

        if let Err(error) = task.transition(TaskStatus::Running) {
            tracing::error!(worker = self.id, task_id = %task.id, error = %error, "dequeued task in unexpected state");
            return;
        }
        // Make the in-progress state visible before doing the work.
        if let Err(error) = self.queue.update(&mut task).await {
            tracing::error!(worker = self.id, task_id = %task.id, error = %error, "failed to mark task running");
        }

        let outcome = self.handler.clone().execute(task.clone()).await;
        let next = match outcome {
            TaskOutcome::Completed => TaskStatus::Completed,
            TaskOutcome::Failed => TaskStatus::Failed,
        };

        if let Err(error) = task.transition(next) {
            tracing::error!(worker = self.id, task_id = %task.id, error = %error, "invalid terminal transition");
            return;
        }
        if let Err(error) = self.queue.update(&mut task).await {
            tracing::error!(worker = self.id, task_id = %task.id, error = %error, "failed to persist task outcome");
        }

        tracing::info!(worker = self.id, task_id = %task.id, status = ?task.status, "task finished");
    }
}

/// Configures and starts a [`WorkerPool`].
pub struct WorkerPoolBuilder {
    poll_interval: Duration,
}

impl WorkerPoolBuilder {
    /// How long workers sleep after finding the queue empty.
    pub fn poll_interval(self, poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    /// Spawn `size` workers sharing `queue` and one cancellation token.
    pub fn start<Q, F, M>(self, size: usize, queue: Arc<Q>, handler: F) -> WorkerPool
    where
        Q: Queue + Sync + 'static,
        F: ExecuteTask<M>,
        M: 'static,
    {
        let token = CancellationToken::new();
        let handles = (1..=size)
            .map(|id| {
                let worker = Worker::new(id, Arc::clone(&queue), handler.clone(), self.poll_interval);
                tokio::spawn(worker.run(token.clone()))
            })
            .collect();
        tracing::info!(workers = size, "worker pool started");
        WorkerPool { token, handles }
    }
}

/// Fixed-size set of concurrently running workers with joint shutdown.
///
/// Size is set at construction; a worker that terminates unexpectedly is
/// not replaced.
pub struct WorkerPool {
    token: CancellationToken,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl WorkerPool {
    pub fn builder() -> WorkerPoolBuilder {
        WorkerPoolBuilder {
            poll_interval: Duration::from_secs(1),
        }
    }

    /// Raise the cancellation signal once and wait for every worker to
    /// observe it and return.
    pub async fn shutdown(self) {
        self.token.cancel();
        for handle in self.handles {
            // A worker that died early still joins here; only a panic is
            // worth reporting.
            if let Err(error) = handle.await {
                if error.is_panic() {
                    tracing::error!(error = %error, "worker task panicked");
                }
            }
        }
        tracing::info!("all workers stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::PriorityQueue;
    use crate::store::{MemoryStore, Store, StoreError};
    use crate::task::Priority;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone)]
    /// Store whose pops fail a set number of times before recovering,
    /// standing in for a transient outage of the backing service.
    struct FlakyStore {
        inner: MemoryStore,
        pop_failures_left: Arc<AtomicUsize>,
    }

    impl FlakyStore {
        fn new(pop_failures: usize) -> Self {
            Self {
                inner: MemoryStore::new(),
                pop_failures_left: Arc::new(AtomicUsize::new(pop_failures)),
            }
        }
    }

    impl Store for FlakyStore {
        async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
            self.inner.put(key, value, ttl).await
        }

        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.inner.get(key).await
        }

        async fn ordered_insert(
            &self,
            set_key: &str,
            member: &str,
            score: f64,
        ) -> Result<(), StoreError> {
            self.inner.ordered_insert(set_key, member, score).await
        }

        async fn ordered_pop_min(
            &self,
            set_key: &str,
            count: usize,
        ) -> Result<Vec<(String, f64)>, StoreError> {
            if self.pop_failures_left.load(Ordering::SeqCst) > 0 {
                self.pop_failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(StoreError::message("simulated connection reset"));
            }
            self.inner.ordered_pop_min(set_key, count).await
        }
    }

    fn queue() -> Arc<PriorityQueue<MemoryStore>> {
        Arc::new(PriorityQueue::new(MemoryStore::new()))
    }

    fn counting_handler(
        delay: Duration,
        counter: Arc<AtomicUsize>,
    ) -> impl ExecuteTask<TaskRecord> {
        move |_task: TaskRecord| {
            let counter = Arc::clone(&counter);
            async move {
                tokio::time::sleep(delay).await;
                counter.fetch_add(1, Ordering::SeqCst);
                TaskOutcome::Completed
            }
        }
    }

    async fn wait_for(counter: &AtomicUsize, expected: usize) {
        while counter.load(Ordering::SeqCst) < expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn worker_drives_a_task_to_completed() {
        let queue = queue();
        let task = TaskRecord::new("email", json!({"to": "a@b.c"}), Priority::Normal);
        queue.enqueue(&task).await.unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();
        let worker = Worker::new(
            1,
            Arc::clone(&queue),
            counting_handler(Duration::from_millis(50), Arc::clone(&counter)),
            Duration::from_secs(1),
        );
        let handle = tokio::spawn(worker.run(token.clone()));

        wait_for(&counter, 1).await;
        token.cancel();
        handle.await.unwrap();

        let stored = queue.get(&task.id).await.unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
        assert!(stored.updated_at >= stored.created_at);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_outcome_is_persisted_as_failed() {
        let queue = queue();
        let task = TaskRecord::new("email", json!({}), Priority::Normal);
        queue.enqueue(&task).await.unwrap();

        let token = CancellationToken::new();
        let handler = move |_task: TaskRecord| async move { TaskOutcome::Failed };
        let worker = Worker::new(1, Arc::clone(&queue), handler, Duration::from_secs(1));
        let handle = tokio::spawn(worker.run(token.clone()));

        while queue.get(&task.id).await.unwrap().status != TaskStatus::Failed {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn pool_consumes_everything_and_shuts_down_within_one_backoff() {
        let queue = queue();
        let mut ids = Vec::new();
        for i in 0..5 {
            let task = TaskRecord::new("email", json!({"n": i}), Priority::Normal);
            queue.enqueue(&task).await.unwrap();
            ids.push(task.id);
        }

        let counter = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::builder()
            .poll_interval(Duration::from_secs(1))
            .start(
                3,
                Arc::clone(&queue),
                counting_handler(Duration::from_millis(100), Arc::clone(&counter)),
            );

        wait_for(&counter, 5).await;

        let before = tokio::time::Instant::now();
        pool.shutdown().await;
        // One backoff interval, no task in flight.
        assert!(before.elapsed() <= Duration::from_secs(2));

        for id in &ids {
            assert_eq!(queue.get(id).await.unwrap().status, TaskStatus::Completed);
        }
        assert_eq!(
            queue.dequeue().await.unwrap_err().kind(),
            ErrorKind::Empty
        );
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_task_finishes_before_shutdown_completes() {
        let queue = queue();
        let task = TaskRecord::new("slow", json!({}), Priority::Normal);
        queue.enqueue(&task).await.unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::builder().start(
            1,
            Arc::clone(&queue),
            counting_handler(Duration::from_secs(5), Arc::clone(&counter)),
        );

        // Wait until the worker has marked the task running.
        while queue.get(&task.id).await.unwrap().status != TaskStatus::Running {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // Cancellation is not honored mid-execution.
        pool.shutdown().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(
            queue.get(&task.id).await.unwrap().status,
            TaskStatus::Completed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn idle_pool_shuts_down_promptly() {
        let queue = queue();
        let pool = WorkerPool::builder()
            .poll_interval(Duration::from_secs(1))
            .start(3, queue, fixed_delay(Duration::from_secs(2)));

        let before = tokio::time::Instant::now();
        pool.shutdown().await;
        assert!(before.elapsed() <= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn worker_survives_store_failures_and_keeps_polling() {
        let store = FlakyStore::new(3);
        let queue = Arc::new(PriorityQueue::new(store.clone()));
        let task = TaskRecord::new("email", json!({}), Priority::Normal);
        queue.enqueue(&task).await.unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();
        let worker = Worker::new(
            1,
            Arc::clone(&queue),
            counting_handler(Duration::from_millis(10), Arc::clone(&counter)),
            Duration::from_secs(1),
        );
        let handle = tokio::spawn(worker.run(token.clone()));

        // Every injected failure is retried without killing the loop, and
        // the task is still delivered once the store recovers.
        wait_for(&counter, 1).await;
        assert_eq!(store.pop_failures_left.load(Ordering::SeqCst), 0);

        token.cancel();
        handle.await.unwrap();
        assert_eq!(
            queue.get(&task.id).await.unwrap().status,
            TaskStatus::Completed
        );
    }

    async fn exploding_handler(_task: TaskRecord) -> TaskOutcome {
        panic!("task handler exploded")
    }

    #[tokio::test(start_paused = true)]
    async fn panicked_worker_does_not_block_shutdown() {
        let queue = queue();
        let task = TaskRecord::new("email", json!({}), Priority::Normal);
        queue.enqueue(&task).await.unwrap();

        let pool = WorkerPool::builder().start(1, Arc::clone(&queue), exploding_handler);

        // The panic kills the worker mid-task; it is not replaced.
        while queue.get(&task.id).await.unwrap().status != TaskStatus::Running {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // Joining a panicked worker must not wedge or re-panic shutdown.
        pool.shutdown().await;
        assert_eq!(
            queue.get(&task.id).await.unwrap().status,
            TaskStatus::Running
        );
    }

    #[tokio::test(start_paused = true)]
    async fn missing_record_does_not_stall_the_worker() {
        let store = MemoryStore::new();
        let queue = Arc::new(PriorityQueue::new(store.clone()));

        let orphan = TaskRecord::new("email", json!({}), Priority::Critical);
        queue.enqueue(&orphan).await.unwrap();
        store.remove(&format!("taskflow:task:{}", orphan.id));

        let healthy = TaskRecord::new("email", json!({}), Priority::Normal);
        queue.enqueue(&healthy).await.unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::builder().start(
            1,
            Arc::clone(&queue),
            counting_handler(Duration::from_millis(10), Arc::clone(&counter)),
        );

        // The orphaned id is dropped; the healthy task still completes.
        wait_for(&counter, 1).await;
        pool.shutdown().await;
        assert_eq!(
            queue.get(&healthy.id).await.unwrap().status,
            TaskStatus::Completed
        );
    }
}
