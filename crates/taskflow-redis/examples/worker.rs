use std::sync::Arc;
use std::time::Duration;

use taskflow_core::{PriorityQueue, WorkerPool, fixed_delay};
use taskflow_redis::RedisStore;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .compact()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_owned());
    let worker_count = std::env::var("WORKER_COUNT")
        .ok()
        .and_then(|count| count.parse::<usize>().ok())
        .filter(|&count| count > 0)
        .unwrap_or(5);

    // An unreachable store at startup is fatal; after this point the
    // worker loop retries store failures forever.
    let store = RedisStore::connect(&redis_url)
        .await
        .expect("failed to connect to redis");
    let queue = Arc::new(PriorityQueue::new(store));

    let pool = WorkerPool::builder()
        .poll_interval(Duration::from_secs(1))
        .start(worker_count, queue, fixed_delay(Duration::from_secs(2)));
    tracing::info!(workers = worker_count, "started workers");

    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutting down workers");
    pool.shutdown().await;
}
