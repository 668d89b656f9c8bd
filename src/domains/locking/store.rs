//! Key-value store abstraction over a remote cache: set-if-absent with
//! TTL, delete, exists, prefix-scan, atomic multi-delete.
//!
//! Grounded on the reference's `NatsPublisher`/`TestNats` split
//! (`kernel/nats.rs`) and `intelligent_crawler::traits::CrawlerStorage`:
//! a thin async trait with a production client behind it and an
//! in-memory fake for tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::Result;

/// A fixed namespace prefix all lock keys live under.
pub const LOCK_NAMESPACE: &str = "LOCK_";

#[async_trait]
pub trait RangeLockStore: Send + Sync {
    /// Set-if-absent with an expiry. Returns `true` if the key was set,
    /// `false` if it was already present (still live).
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Delete a key. Returns `true` if a key was actually deleted.
    async fn release(&self, key: &str) -> Result<bool>;

    /// Whether a key currently exists (and has not expired).
    async fn exists(&self, key: &str) -> Result<bool>;

    /// All currently-live keys starting with `prefix`.
    async fn scan(&self, prefix: &str) -> Result<Vec<String>>;

    /// Delete every currently-live key starting with `prefix`, atomically.
    /// Returns the count deleted.
    async fn release_all(&self, prefix: &str) -> Result<usize>;
}

/// Redis-backed implementation using `SET key val NX EX ttl` for
/// `acquire`, matching the compare-and-set contract in the spec.
pub struct RedisRangeLockStore {
    manager: redis::aio::ConnectionManager,
}

impl RedisRangeLockStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let manager = client.get_connection_manager().await?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl RangeLockStore for RedisRangeLockStore {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.manager.clone();
        let value = serde_json::json!({ "timestamp": chrono::Utc::now().timestamp_millis() });
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value.to_string())
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await?;
        Ok(result.is_some())
    }

    async fn release(&self, key: &str) -> Result<bool> {
        let mut conn = self.manager.clone();
        let deleted: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(deleted > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.manager.clone();
        let exists: bool = redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut conn)
            .await?;
        Ok(exists)
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<String>> {
        let mut conn = self.manager.clone();
        let pattern = format!("{prefix}*");
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(&pattern)
            .query_async(&mut conn)
            .await?;
        Ok(keys)
    }

    async fn release_all(&self, prefix: &str) -> Result<usize> {
        let keys = self.scan(prefix).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.manager.clone();
        let deleted: i64 = redis::cmd("DEL").arg(&keys).query_async(&mut conn).await?;
        Ok(deleted as usize)
    }
}

struct Entry {
    expires_at: Instant,
}

/// In-memory fake backing unit and integration tests. Expiry is
/// evaluated lazily on access, matching Redis's lazy-expire semantics
/// closely enough for the mutual-exclusion properties under test.
#[derive(Default)]
pub struct InMemoryRangeLockStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryRangeLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_live(entry: &Entry) -> bool {
        entry.expires_at > Instant::now()
    }
}

#[async_trait]
impl RangeLockStore for InMemoryRangeLockStore {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(existing) = entries.get(key) {
            if Self::is_live(existing) {
                return Ok(false);
            }
        }
        entries.insert(
            key.to_string(),
            Entry {
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(true)
    }

    async fn release(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries.lock().unwrap();
        Ok(entries.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let entries = self.entries.lock().unwrap();
        Ok(entries.get(key).map(Self::is_live).unwrap_or(false))
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<String>> {
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .iter()
            .filter(|(k, v)| k.starts_with(prefix) && Self::is_live(v))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn release_all(&self, prefix: &str) -> Result<usize> {
        let mut entries = self.entries.lock().unwrap();
        let to_remove: Vec<String> = entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        for key in &to_remove {
            entries.remove(key);
        }
        Ok(to_remove.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_is_set_if_absent() {
        let store = InMemoryRangeLockStore::new();
        assert!(store.acquire("k", Duration::from_secs(60)).await.unwrap());
        assert!(!store.acquire("k", Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn release_then_reacquire_succeeds() {
        let store = InMemoryRangeLockStore::new();
        store.acquire("k", Duration::from_secs(60)).await.unwrap();
        assert!(store.release("k").await.unwrap());
        assert!(store.acquire("k", Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn release_nonexistent_key_returns_false() {
        let store = InMemoryRangeLockStore::new();
        assert!(!store.release("nope").await.unwrap());
    }

    #[tokio::test]
    async fn scan_returns_only_matching_prefix() {
        let store = InMemoryRangeLockStore::new();
        store.acquire("LOCK_a:1:2", Duration::from_secs(60)).await.unwrap();
        store.acquire("LOCK_b:1:2", Duration::from_secs(60)).await.unwrap();
        store.acquire("OTHER_c", Duration::from_secs(60)).await.unwrap();
        let mut found = store.scan("LOCK_").await.unwrap();
        found.sort();
        assert_eq!(found, vec!["LOCK_a:1:2".to_string(), "LOCK_b:1:2".to_string()]);
    }

    #[tokio::test]
    async fn release_all_deletes_atomically() {
        let store = InMemoryRangeLockStore::new();
        store.acquire("LOCK_a:1:2", Duration::from_secs(60)).await.unwrap();
        store.acquire("LOCK_a:3:4", Duration::from_secs(60)).await.unwrap();
        store.acquire("LOCK_b:1:2", Duration::from_secs(60)).await.unwrap();
        let deleted = store.release_all("LOCK_a").await.unwrap();
        assert_eq!(deleted, 2);
        assert!(store.exists("LOCK_b:1:2").await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_acquire_exactly_one_winner() {
        use std::sync::Arc;
        let store = Arc::new(InMemoryRangeLockStore::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.acquire("contended", Duration::from_secs(60)).await.unwrap()
            }));
        }
        let mut wins = 0;
        for h in handles {
            if h.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }
}
