use serde_json::json;
use taskflow_core::{NewTask, Priority, PriorityQueue, Queue};
use taskflow_redis::RedisStore;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().compact().init();

    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_owned());
    let store = RedisStore::connect(&redis_url)
        .await
        .expect("failed to connect to redis");
    let queue = PriorityQueue::new(store);

    let email = queue
        .create(NewTask::new("email", json!({"to": "user@example.com"})).expect("valid task type"))
        .await
        .expect("failed to enqueue task");
    tracing::info!(id = %email.id, priority = ?email.priority, "enqueued");

    let report = queue
        .create(
            NewTask::new("report", json!({"range": {"from": "2026-08-01", "to": "2026-08-27"}}))
                .expect("valid task type")
                .priority(Priority::Critical),
        )
        .await
        .expect("failed to enqueue task");
    tracing::info!(id = %report.id, priority = ?report.priority, "enqueued");

    // The critical task will be picked up first even though it was
    // submitted second.
    let fetched = queue.get(&report.id).await.expect("task should exist");
    tracing::info!(id = %fetched.id, status = ?fetched.status, "fetched task");
}
