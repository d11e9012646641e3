//! Response cache for the `/api/*` browser proxy.
//!
//! Purpose-built rather than `moka`: the cache must support substring prefix
//! invalidation and "evict lowest insertion index" eviction, neither of which
//! `moka::future::Cache` exposes. `moka` stays in the dependency stack for the
//! upstream HTTP client's own short-lived response cache (`upstream.rs`),
//! which needs neither property.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

/// A single cached response.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    inserted_at: Instant,
    insertion_index: u64,
}

struct Inner {
    entries: HashMap<String, CacheEntry>,
    next_index: u64,
}

/// Per-user keyed, LRU-by-insertion-index, TTL response cache guarded by a
/// single `RwLock`.
pub struct ResponseCache {
    inner: RwLock<Inner>,
    ttl: Duration,
    max_entries: usize,
    body_cap: usize,
}

impl ResponseCache {
    #[must_use]
    pub fn new(ttl: Duration, max_entries: usize, body_cap: usize) -> Self {
        Self {
            inner: RwLock::new(Inner { entries: HashMap::new(), next_index: 0 }),
            ttl,
            max_entries,
            body_cap,
        }
    }

    /// Build the `"<user_id>:<method>:<request_uri>"` cache key.
    #[must_use]
    pub fn key(user_id: &str, method: &str, request_uri: &str) -> String {
        format!("{user_id}:{method}:{request_uri}")
    }

    /// Look up a cached response. Lazily expires: an entry past its TTL behaves
    /// as a miss and is removed rather than returned stale.
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        {
            let inner = self.inner.read().await;
            if let Some(entry) = inner.entries.get(key) {
                if entry.inserted_at.elapsed() <= self.ttl {
                    return Some(entry.clone());
                }
            } else {
                return None;
            }
        }
        // Expired: drop it under a write lock.
        let mut inner = self.inner.write().await;
        inner.entries.remove(key);
        None
    }

    /// Insert a response. Only `GET` 2xx responses within the body cap should be
    /// passed here by the caller — non-2xx or oversized responses bypass
    /// caching entirely.
    pub async fn insert(&self, key: String, status: u16, headers: Vec<(String, String)>, body: Vec<u8>) {
        if body.len() > self.body_cap {
            return;
        }
        let mut inner = self.inner.write().await;
        let index = inner.next_index;
        inner.next_index += 1;
        inner
            .entries
            .insert(key, CacheEntry { status, headers, body, inserted_at: Instant::now(), insertion_index: index });

        if inner.entries.len() > self.max_entries {
            // Evict the entry with the lowest insertion index (oldest inserted),
            // not necessarily the lowest TTL remaining — an explicit LRU-by-insertion
            // policy, distinct from LRU-by-access.
            if let Some(victim) = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.insertion_index)
                .map(|(k, _)| k.clone())
            {
                inner.entries.remove(&victim);
            }
        }
    }

    /// Invalidate every entry whose key *contains* `path` as a substring: any
    /// non-`GET` request for path `P` invalidates every matching entry —
    /// known to over-invalidate across users, an accepted trade-off.
    pub async fn invalidate_prefix(&self, path: &str) {
        let mut inner = self.inner.write().await;
        inner.entries.retain(|key, _| !key.contains(path));
    }

    /// Current entry count (for tests / observability).
    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> ResponseCache {
        ResponseCache::new(Duration::from_secs(30), 3, 1024)
    }

    #[tokio::test]
    async fn insert_and_get_roundtrip() {
        let cache = cache();
        let key = ResponseCache::key("u1", "GET", "/api/portfolios");
        cache.insert(key.clone(), 200, vec![], b"[]".to_vec()).await;
        let entry = cache.get(&key).await.expect("entry present");
        assert_eq!(entry.status, 200);
        assert_eq!(entry.body, b"[]");
    }

    #[tokio::test]
    async fn eviction_removes_lowest_insertion_index() {
        let cache = cache();
        for i in 0..4 {
            let key = ResponseCache::key("u1", "GET", &format!("/api/item/{i}"));
            cache.insert(key, 200, vec![], b"x".to_vec()).await;
        }
        assert_eq!(cache.len().await, 3);
        // The first-inserted key should be gone.
        let first_key = ResponseCache::key("u1", "GET", "/api/item/0");
        assert!(cache.get(&first_key).await.is_none());
        let last_key = ResponseCache::key("u1", "GET", "/api/item/3");
        assert!(cache.get(&last_key).await.is_some());
    }

    #[tokio::test]
    async fn expired_entry_reads_as_miss() {
        let cache = ResponseCache::new(Duration::from_millis(10), 10, 1024);
        let key = ResponseCache::key("u1", "GET", "/api/portfolios");
        cache.insert(key.clone(), 200, vec![], b"[]".to_vec()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn invalidate_prefix_removes_substring_matches_across_users() {
        let cache = cache();
        let k1 = ResponseCache::key("u1", "GET", "/api/portfolios/default");
        let k2 = ResponseCache::key("u2", "GET", "/api/portfolios/default");
        let k3 = ResponseCache::key("u1", "GET", "/api/unrelated");
        cache.insert(k1.clone(), 200, vec![], b"a".to_vec()).await;
        cache.insert(k2.clone(), 200, vec![], b"b".to_vec()).await;
        cache.insert(k3.clone(), 200, vec![], b"c".to_vec()).await;

        cache.invalidate_prefix("/api/portfolios/default").await;

        assert!(cache.get(&k1).await.is_none());
        assert!(cache.get(&k2).await.is_none());
        assert!(cache.get(&k3).await.is_some());
    }

    #[tokio::test]
    async fn oversized_body_bypasses_caching() {
        let cache = ResponseCache::new(Duration::from_secs(30), 10, 4);
        let key = ResponseCache::key("u1", "GET", "/api/big");
        cache.insert(key.clone(), 200, vec![], b"way too big".to_vec()).await;
        assert!(cache.get(&key).await.is_none());
    }
}
