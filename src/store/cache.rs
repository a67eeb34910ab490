//! Hot-cache backend seam.
//!
//! The transcript and keyword stores speak to the cache through
//! [`CacheBackend`] so the relay can run against Redis in deployment and
//! against [`MemoryCache`] in single-process mode and in tests. The ordered
//! operations mirror the Redis sorted-set commands the transcript list is
//! built on.

use crate::error::{RelayError, Result};
use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Key-value + sorted-set operations the stores need.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Read a string key.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a string key with a TTL.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Delete a key (string or sorted set).
    async fn del(&self, key: &str) -> Result<()>;

    /// Add `member` to the sorted set at `key` with `score`, refreshing the
    /// set's TTL.
    async fn zadd_ex(&self, key: &str, score: f64, member: &str, ttl: Duration) -> Result<()>;

    /// Remove every member whose score equals `score` exactly.
    async fn zrem_by_score(&self, key: &str, score: f64) -> Result<()>;

    /// All members ascending by score.
    async fn zrange_all(&self, key: &str) -> Result<Vec<String>>;

    /// The member with the greatest score.
    async fn zlast(&self, key: &str) -> Result<Option<String>>;
}

/// Redis-backed cache using a shared connection manager.
pub struct RedisCache {
    manager: redis::aio::ConnectionManager,
}

impl RedisCache {
    /// Connect to `url` and build the shared connection manager.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the initial connection
    /// cannot be established.
    pub async fn connect(url: &str) -> Result<Self> {
        let client =
            redis::Client::open(url).map_err(|e| RelayError::Cache(format!("open: {e}")))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| RelayError::Cache(format!("connect: {e}")))?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        conn.get(key)
            .await
            .map_err(|e| RelayError::Cache(format!("GET {key}: {e}")))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs())
            .await
            .map_err(|e| RelayError::Cache(format!("SETEX {key}: {e}")))
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.del::<_, ()>(key)
            .await
            .map_err(|e| RelayError::Cache(format!("DEL {key}: {e}")))
    }

    async fn zadd_ex(&self, key: &str, score: f64, member: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.manager.clone();
        let () = redis::pipe()
            .atomic()
            .zadd(key, member, score)
            .ignore()
            .expire(key, ttl.as_secs() as i64)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| RelayError::Cache(format!("ZADD {key}: {e}")))?;
        Ok(())
    }

    async fn zrem_by_score(&self, key: &str, score: f64) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.zrembyscore::<_, _, _, ()>(key, score, score)
            .await
            .map_err(|e| RelayError::Cache(format!("ZREMRANGEBYSCORE {key}: {e}")))
    }

    async fn zrange_all(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.manager.clone();
        conn.zrange(key, 0, -1)
            .await
            .map_err(|e| RelayError::Cache(format!("ZRANGE {key}: {e}")))
    }

    async fn zlast(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        let members: Vec<String> = conn
            .zrange(key, -1, -1)
            .await
            .map_err(|e| RelayError::Cache(format!("ZRANGE {key}: {e}")))?;
        Ok(members.into_iter().next())
    }
}

enum Entry {
    Str(String),
    ZSet(Vec<(f64, String)>),
}

struct Slot {
    entry: Entry,
    expires_at: Instant,
}

/// In-process cache with the same TTL semantics as the Redis backend.
///
/// Used when no `REDIS_URL` is configured, and throughout the test suite.
#[derive(Default)]
pub struct MemoryCache {
    slots: Mutex<HashMap<String, Slot>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop `key` if its TTL has elapsed, mirroring Redis expiry.
    fn purge_expired(slots: &mut HashMap<String, Slot>, key: &str) {
        if slots.get(key).is_some_and(|s| s.expires_at <= Instant::now()) {
            slots.remove(key);
        }
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        Self::purge_expired(&mut slots, key);
        match slots.get(key) {
            Some(Slot {
                entry: Entry::Str(value),
                ..
            }) => Ok(Some(value.clone())),
            _ => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        slots.insert(
            key.to_owned(),
            Slot {
                entry: Entry::Str(value.to_owned()),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        slots.remove(key);
        Ok(())
    }

    async fn zadd_ex(&self, key: &str, score: f64, member: &str, ttl: Duration) -> Result<()> {
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        Self::purge_expired(&mut slots, key);
        let expires_at = Instant::now() + ttl;
        let slot = slots.entry(key.to_owned()).or_insert_with(|| Slot {
            entry: Entry::ZSet(Vec::new()),
            expires_at,
        });
        slot.expires_at = expires_at;
        if let Entry::ZSet(members) = &mut slot.entry {
            members.retain(|(_, m)| m != member);
            members.push((score, member.to_owned()));
            members.sort_by(|a, b| a.0.total_cmp(&b.0));
        }
        Ok(())
    }

    async fn zrem_by_score(&self, key: &str, score: f64) -> Result<()> {
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        Self::purge_expired(&mut slots, key);
        if let Some(Slot {
            entry: Entry::ZSet(members),
            ..
        }) = slots.get_mut(key)
        {
            members.retain(|(s, _)| *s != score);
        }
        Ok(())
    }

    async fn zrange_all(&self, key: &str) -> Result<Vec<String>> {
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        Self::purge_expired(&mut slots, key);
        match slots.get(key) {
            Some(Slot {
                entry: Entry::ZSet(members),
                ..
            }) => Ok(members.iter().map(|(_, m)| m.clone()).collect()),
            _ => Ok(Vec::new()),
        }
    }

    async fn zlast(&self, key: &str) -> Result<Option<String>> {
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        Self::purge_expired(&mut slots, key);
        match slots.get(key) {
            Some(Slot {
                entry: Entry::ZSet(members),
                ..
            }) => Ok(members.last().map(|(_, m)| m.clone())),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_cache_orders_members_by_score() {
        let cache = MemoryCache::new();
        let ttl = Duration::from_secs(60);
        cache.zadd_ex("k", 3.0, "c", ttl).await.unwrap();
        cache.zadd_ex("k", 1.0, "a", ttl).await.unwrap();
        cache.zadd_ex("k", 2.0, "b", ttl).await.unwrap();
        assert_eq!(cache.zrange_all("k").await.unwrap(), vec!["a", "b", "c"]);
        assert_eq!(cache.zlast("k").await.unwrap().as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn memory_cache_replaces_same_member() {
        let cache = MemoryCache::new();
        let ttl = Duration::from_secs(60);
        cache.zadd_ex("k", 1.0, "a", ttl).await.unwrap();
        cache.zadd_ex("k", 5.0, "a", ttl).await.unwrap();
        assert_eq!(cache.zrange_all("k").await.unwrap(), vec!["a"]);
    }

    #[tokio::test]
    async fn memory_cache_zrem_by_score_removes_exact_score() {
        let cache = MemoryCache::new();
        let ttl = Duration::from_secs(60);
        cache.zadd_ex("k", 1.0, "a", ttl).await.unwrap();
        cache.zadd_ex("k", 2.0, "b", ttl).await.unwrap();
        cache.zrem_by_score("k", 1.0).await.unwrap();
        assert_eq!(cache.zrange_all("k").await.unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn memory_cache_expires_entries() {
        let cache = MemoryCache::new();
        cache
            .set_ex("k", "v", Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }
}
