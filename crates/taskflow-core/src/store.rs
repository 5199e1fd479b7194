//! Store contract: the durable primitives the queue is built on.
//!
//! The backing service is a key/value store with one extra structure, an
//! ordered index supporting insertion with a score and extraction of the
//! minimum-score entry. Exclusivity of delivery rests entirely on
//! `ordered_pop_min` being atomic: one pop call hands a member to at most
//! one caller.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug)]
/// Transport or I/O failure against the backing service.
///
/// Absence of a key is not an error; `get` reports it as `None`.
pub struct StoreError {
    inner: Box<dyn std::error::Error + Send + Sync + 'static>,
}

impl StoreError {
    /// Wrap an underlying error from a store driver.
    pub fn new<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            inner: Box::new(error),
        }
    }

    /// Build an error from a plain message.
    pub fn message(message: &'static str) -> Self {
        Self {
            inner: message.into(),
        }
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.inner.fmt(f)
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.inner.as_ref())
    }
}

mod tmp {
    use super::{Duration, StoreError};

    /// Durable key/value + ordered-index backing service.
    #[trait_variant::make(Store: Send)]
    pub trait LocalStore {
        /// Persist `value` under `key` with the given retention.
        async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

        /// Look up `key`. `None` means the key does not exist (or expired).
        async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

        /// Insert `member` into the ordered index under `set_key`.
        async fn ordered_insert(
            &self,
            set_key: &str,
            member: &str,
            score: f64,
        ) -> Result<(), StoreError>;

        /// Remove and return up to `count` lowest-score members.
        ///
        /// Equal scores break ties by ascending member order.
        async fn ordered_pop_min(
            &self,
            set_key: &str,
            count: usize,
        ) -> Result<Vec<(String, f64)>, StoreError>;
    }
}

pub use tmp::Store;

#[derive(Debug, Default)]
struct Shared {
    records: HashMap<String, String>,
    indexes: HashMap<String, Vec<(String, f64)>>,
}

#[derive(Debug, Clone, Default)]
/// In-process [`Store`] for tests and local development.
///
/// Retention is accepted but not enforced; tests simulate expiry with
/// [`MemoryStore::remove`]. Pop-min ordering matches Redis: ascending
/// score, ties broken by ascending member.
pub struct MemoryStore {
    shared: Arc<Mutex<Shared>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop a record key, simulating TTL expiry independent of the index.
    pub fn remove(&self, key: &str) {
        if let Ok(mut shared) = self.shared.lock() {
            shared.records.remove(key);
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Shared>, StoreError> {
        self.shared
            .lock()
            .map_err(|_| StoreError::message("memory store mutex poisoned"))
    }
}

impl Store for MemoryStore {
    async fn put(&self, key: &str, value: &str, _ttl: Duration) -> Result<(), StoreError> {
        let mut shared = self.lock()?;
        shared.records.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let shared = self.lock()?;
        Ok(shared.records.get(key).cloned())
    }

    async fn ordered_insert(
        &self,
        set_key: &str,
        member: &str,
        score: f64,
    ) -> Result<(), StoreError> {
        let mut shared = self.lock()?;
        let index = shared.indexes.entry(set_key.to_owned()).or_default();
        // Sorted-set semantics: re-inserting a member replaces its score.
        index.retain(|(existing, _)| existing != member);
        index.push((member.to_owned(), score));
        Ok(())
    }

    async fn ordered_pop_min(
        &self,
        set_key: &str,
        count: usize,
    ) -> Result<Vec<(String, f64)>, StoreError> {
        let mut shared = self.lock()?;
        let Some(index) = shared.indexes.get_mut(set_key) else {
            return Ok(Vec::new());
        };

        let mut popped = Vec::new();
        for _ in 0..count {
            let min = index
                .iter()
                .enumerate()
                .min_by(|(_, (am, a)), (_, (bm, b))| {
                    a.total_cmp(b).then_with(|| am.cmp(bm))
                })
                .map(|(i, _)| i);
            match min {
                Some(i) => popped.push(index.swap_remove(i)),
                None => break,
            }
        }
        Ok(popped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pop_min_returns_lowest_score_first() {
        let store = MemoryStore::new();
        store.ordered_insert("q", "b", 2.0).await.unwrap();
        store.ordered_insert("q", "a", 1.0).await.unwrap();
        store.ordered_insert("q", "c", 3.0).await.unwrap();

        let popped = store.ordered_pop_min("q", 2).await.unwrap();
        let members: Vec<_> = popped.iter().map(|(m, _)| m.as_str()).collect();
        assert_eq!(members, ["a", "b"]);
    }

    #[tokio::test]
    async fn pop_min_breaks_score_ties_by_member() {
        let store = MemoryStore::new();
        store.ordered_insert("q", "zz", 5.0).await.unwrap();
        store.ordered_insert("q", "aa", 5.0).await.unwrap();

        let popped = store.ordered_pop_min("q", 2).await.unwrap();
        let members: Vec<_> = popped.iter().map(|(m, _)| m.as_str()).collect();
        assert_eq!(members, ["aa", "zz"]);
    }

    #[tokio::test]
    async fn pop_min_on_missing_index_is_empty_not_an_error() {
        let store = MemoryStore::new();
        assert!(store.ordered_pop_min("q", 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reinsert_replaces_the_member_score() {
        let store = MemoryStore::new();
        store.ordered_insert("q", "a", 9.0).await.unwrap();
        store.ordered_insert("q", "a", 1.0).await.unwrap();

        let popped = store.ordered_pop_min("q", 2).await.unwrap();
        assert_eq!(popped.len(), 1);
        assert_eq!(popped[0], ("a".to_owned(), 1.0));
    }

    #[tokio::test]
    async fn get_after_remove_is_none() {
        let store = MemoryStore::new();
        store
            .put("k", "v", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        store.remove("k");
        assert_eq!(store.get("k").await.unwrap(), None);
    }
}
