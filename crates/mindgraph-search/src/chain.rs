//! Backend chain: cache → real backends in priority order → synthetic.
//!
//! `search` never fails. A non-empty query always yields at least one hit;
//! the only empty answer is for a query that normalizes to nothing.

use crate::backend::{
    normalize_query, BackendHealth, SearchBackend, SearchError, SearchRequest,
};
use crate::breaker::{BreakerStatus, CircuitBreaker, CircuitState};
use crate::cache::ResultCache;
use crate::synthetic::SyntheticBackend;
use dashmap::DashMap;
use mindgraph_core::{SearchConfig, SearchHit};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct BackendSlot {
    backend: Arc<dyn SearchBackend>,
    breaker: Mutex<CircuitBreaker>,
}

pub struct BackendChain {
    slots: Vec<BackendSlot>,
    cache: ResultCache,
    /// One lock per query currently being resolved against real backends.
    inflight: DashMap<String, Arc<Mutex<()>>>,
    backend_timeout: Duration,
    failure_threshold: u32,
    cooldown: Duration,
}

impl BackendChain {
    /// Empty chain (synthetic only) with the given tuning.
    pub fn new(config: &SearchConfig) -> Self {
        Self {
            slots: Vec::new(),
            cache: ResultCache::new(config.cache_ttl()),
            inflight: DashMap::new(),
            backend_timeout: config.backend_timeout(),
            failure_threshold: config.failure_threshold,
            cooldown: config.cooldown(),
        }
    }

    /// Append a backend at the lowest priority.
    pub fn with_backend(mut self, backend: Arc<dyn SearchBackend>) -> Self {
        self.push(backend);
        self
    }

    pub fn push(&mut self, backend: Arc<dyn SearchBackend>) {
        info!(backend = backend.name(), priority = self.slots.len(), "search backend registered");
        self.slots.push(BackendSlot {
            backend,
            breaker: Mutex::new(CircuitBreaker::new(self.failure_threshold, self.cooldown)),
        });
    }

    pub fn backend_names(&self) -> Vec<String> {
        self.slots.iter().map(|s| s.backend.name().to_string()).collect()
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub async fn search(&self, request: &SearchRequest, cancel: &CancellationToken) -> Vec<SearchHit> {
        let key = normalize_query(&request.query);
        if key.is_empty() {
            debug!("empty query, nothing to search");
            return Vec::new();
        }
        let limit = request.max_results.max(1);
        if let Some(hits) = self.cached(&key, limit) {
            return hits;
        }

        // Identical queries in flight at the same time share one backend
        // call: later callers wait here and then read the cache.
        let lock = self
            .inflight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            guard = lock.lock() => Some(guard),
        };
        let Some(_guard) = guard else {
            debug!(query = %key, "search cancelled while waiting on identical query");
            return SyntheticBackend::generate(&request.query, limit);
        };
        if let Some(hits) = self.cached(&key, limit) {
            return hits;
        }

        let hits = self.resolve(&key, request, limit, cancel).await;
        self.inflight.remove(&key);
        hits
    }

    fn cached(&self, key: &str, limit: usize) -> Option<Vec<SearchHit>> {
        let mut hits = self.cache.get(key)?;
        hits.truncate(limit);
        debug!(query = %key, hits = hits.len(), "cache hit");
        Some(hits)
    }

    async fn resolve(
        &self,
        key: &str,
        request: &SearchRequest,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Vec<SearchHit> {
        for slot in &self.slots {
            if cancel.is_cancelled() {
                break;
            }
            let name = slot.backend.name();
            if slot.backend.health() == BackendHealth::Unavailable {
                debug!(backend = name, "backend unavailable, skipping");
                continue;
            }
            if !slot.breaker.lock().await.try_acquire() {
                debug!(backend = name, "circuit open, skipping");
                continue;
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(SearchError::Cancelled),
                r = tokio::time::timeout(self.backend_timeout, slot.backend.search(request)) => {
                    r.unwrap_or_else(|_| Err(SearchError::Timeout(self.backend_timeout.as_millis() as u64)))
                }
            };

            let mut breaker = slot.breaker.lock().await;
            match outcome {
                Ok(hits) if !hits.is_empty() => {
                    breaker.record_success();
                    let hits = dedupe_by_url(hits, limit);
                    debug!(backend = name, query = %key, hits = hits.len(), "backend answered");
                    self.cache.insert(key.to_string(), hits.clone());
                    return hits;
                }
                Ok(_) => {
                    breaker.record_failure();
                    warn!(backend = name, query = %key, strikes = breaker.strikes(), "backend returned no hits");
                }
                Err(SearchError::Cancelled) => {
                    breaker.release();
                    debug!(backend = name, "search cancelled");
                    break;
                }
                Err(e) => {
                    breaker.record_failure();
                    warn!(backend = name, query = %key, strikes = breaker.strikes(), "backend failed: {}", e);
                }
            }
        }

        info!(query = %key, "no real backend answered, using synthetic results");
        SyntheticBackend::generate(&request.query, limit)
    }

    /// Breaker state and strike count for each real backend, in priority order.
    pub async fn status(&self) -> Vec<BreakerStatus> {
        let mut out = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            let breaker = slot.breaker.lock().await;
            // An open circuit past its cool-down admits the next probe.
            let state = match breaker.state() {
                CircuitState::Open { .. } if !breaker.is_open() => "half_open",
                s => s.label(),
            };
            out.push(BreakerStatus {
                backend: slot.backend.name().to_string(),
                state,
                strikes: breaker.strikes(),
            });
        }
        out
    }

    /// Close every breaker and drop all cached results.
    pub async fn reset(&self) {
        for slot in &self.slots {
            slot.breaker.lock().await.reset();
        }
        self.cache.clear();
        info!("search chain reset");
    }
}

fn dedupe_by_url(hits: Vec<SearchHit>, limit: usize) -> Vec<SearchHit> {
    let mut seen = HashSet::new();
    hits.into_iter()
        .filter(|h| h.url.is_empty() || seen.insert(h.url.clone()))
        .take(limit)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(url: &str) -> SearchHit {
        SearchHit {
            title: "t".into(),
            url: url.into(),
            snippet: String::new(),
            source_backend: "duckduckgo".into(),
            fetched_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn dedupe_keeps_first_and_truncates() {
        let hits = vec![hit("a"), hit("b"), hit("a"), hit("c")];
        let out = dedupe_by_url(hits, 2);
        let urls: Vec<_> = out.iter().map(|h| h.url.as_str()).collect();
        assert_eq!(urls, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn empty_chain_falls_back_to_synthetic() {
        let chain = BackendChain::new(&SearchConfig::default());
        let hits = chain
            .search(&SearchRequest::new("rust async"), &CancellationToken::new())
            .await;
        assert!(!hits.is_empty());
        assert!(hits.iter().all(SearchHit::is_synthetic));
        assert!(chain.cache().is_empty());
    }
}
