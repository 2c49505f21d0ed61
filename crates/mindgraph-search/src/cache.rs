//! TTL cache of backend hits, keyed by normalized query.

use dashmap::DashMap;
use mindgraph_core::SearchHit;
use std::time::Duration;
use tokio::time::Instant;

struct CacheEntry {
    hits: Vec<SearchHit>,
    stored_at: Instant,
}

pub struct ResultCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl ResultCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Stored hits if present and younger than the TTL. Expired entries are evicted.
    pub fn get(&self, key: &str) -> Option<Vec<SearchHit>> {
        if let Some(entry) = self.entries.get(key) {
            if entry.stored_at.elapsed() < self.ttl {
                return Some(entry.hits.clone());
            }
        } else {
            return None;
        }
        self.entries.remove(key);
        None
    }

    pub fn insert(&self, key: impl Into<String>, hits: Vec<SearchHit>) {
        self.entries.insert(
            key.into(),
            CacheEntry {
                hits,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit() -> SearchHit {
        SearchHit {
            title: "t".into(),
            url: "https://example.com".into(),
            snippet: "s".into(),
            source_backend: "duckduckgo".into(),
            fetched_at: chrono::Utc::now(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = ResultCache::new(Duration::from_secs(10));
        let hits = vec![hit()];
        cache.insert("weather nyc", hits.clone());
        assert_eq!(cache.get("weather nyc"), Some(hits));
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(cache.get("weather nyc").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn missing_key_is_none() {
        let cache = ResultCache::new(Duration::from_secs(10));
        assert!(cache.get("nothing").is_none());
    }
}
