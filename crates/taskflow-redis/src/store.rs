use std::time::Duration;

use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;

use taskflow_core::store::{Store, StoreError};

#[derive(Debug, Clone)]
/// [`Store`] backed by a Redis server.
///
/// Holds one multiplexed connection shared by every clone; each operation
/// works on a cheap clone of it. Equal-score members pop in Redis's
/// native order, ascending lexicographic by member.
pub struct RedisStore {
    conn: MultiplexedConnection,
}

impl RedisStore {
    /// Connect to `url` and verify the server responds to PING.
    ///
    /// An unreachable server here is the one failure callers should treat
    /// as fatal; everything after startup is retried by the worker loop.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(StoreError::new)?;
        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(StoreError::new)?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(StoreError::new)?;
        Ok(Self { conn })
    }
}

impl Store for RedisStore {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        // EX 0 is a Redis error; clamp to the smallest legal retention.
        let _: () = conn
            .set_ex(key, value, ttl.as_secs().max(1))
            .await
            .map_err(StoreError::new)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(StoreError::new)
    }

    async fn ordered_insert(
        &self,
        set_key: &str,
        member: &str,
        score: f64,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .zadd(set_key, member, score)
            .await
            .map_err(StoreError::new)?;
        Ok(())
    }

    async fn ordered_pop_min(
        &self,
        set_key: &str,
        count: usize,
    ) -> Result<Vec<(String, f64)>, StoreError> {
        let mut conn = self.conn.clone();
        conn.zpopmin(set_key, count as isize)
            .await
            .map_err(StoreError::new)
    }
}
