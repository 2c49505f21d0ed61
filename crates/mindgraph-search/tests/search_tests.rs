//! Tests for mindgraph-search: chain resolution, cache, circuit breaker, fallback

use mindgraph_core::{SearchConfig, SearchHit};
use mindgraph_search::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ===========================================================================
// Mock backends
// ===========================================================================

fn hit(backend: &str, url: &str) -> SearchHit {
    SearchHit {
        title: format!("{} result", backend),
        url: url.to_string(),
        snippet: "snippet".into(),
        source_backend: backend.to_string(),
        fetched_at: chrono::Utc::now(),
    }
}

/// Always errors.
struct FailingBackend {
    calls: AtomicUsize,
}

impl FailingBackend {
    fn new() -> Arc<Self> {
        Arc::new(Self { calls: AtomicUsize::new(0) })
    }
}

#[async_trait::async_trait]
impl SearchBackend for FailingBackend {
    fn name(&self) -> &str {
        "failing"
    }

    async fn search(&self, _request: &SearchRequest) -> SearchOutcome<Vec<SearchHit>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(SearchError::RequestFailed("503: upstream down".into()))
    }
}

/// Answers with fixed hits and counts calls.
struct CountingBackend {
    calls: AtomicUsize,
    hits: Vec<SearchHit>,
}

impl CountingBackend {
    fn new(hits: Vec<SearchHit>) -> Arc<Self> {
        Arc::new(Self { calls: AtomicUsize::new(0), hits })
    }
}

#[async_trait::async_trait]
impl SearchBackend for CountingBackend {
    fn name(&self) -> &str {
        "counting"
    }

    async fn search(&self, _request: &SearchRequest) -> SearchOutcome<Vec<SearchHit>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.hits.clone())
    }
}

/// Sleeps before answering.
struct DelayedBackend {
    delay: Duration,
}

#[async_trait::async_trait]
impl SearchBackend for DelayedBackend {
    fn name(&self) -> &str {
        "delayed"
    }

    async fn search(&self, _request: &SearchRequest) -> SearchOutcome<Vec<SearchHit>> {
        tokio::time::sleep(self.delay).await;
        Ok(vec![hit("delayed", "https://slow.example")])
    }
}

/// Sleeps, then answers with hits that name the call number.
struct SlowCountingBackend {
    calls: AtomicUsize,
    delay: Duration,
}

impl SlowCountingBackend {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self { calls: AtomicUsize::new(0), delay })
    }
}

#[async_trait::async_trait]
impl SearchBackend for SlowCountingBackend {
    fn name(&self) -> &str {
        "slow-counting"
    }

    async fn search(&self, _request: &SearchRequest) -> SearchOutcome<Vec<SearchHit>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok((0..3)
            .map(|i| hit("slow-counting", &format!("https://call{}.example/{}", call, i)))
            .collect())
    }
}

/// Reports itself unavailable; must never be called.
struct OfflineBackend {
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl SearchBackend for OfflineBackend {
    fn name(&self) -> &str {
        "offline"
    }

    fn health(&self) -> BackendHealth {
        BackendHealth::Unavailable
    }

    async fn search(&self, _request: &SearchRequest) -> SearchOutcome<Vec<SearchHit>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![hit("offline", "https://offline.example")])
    }
}

fn config() -> SearchConfig {
    SearchConfig {
        backend_priority_order: Vec::new(),
        backend_cache_ttl_secs: 10,
        backend_timeout_ms: 100,
        failure_threshold: 3,
        cooldown_secs: 60,
        ..SearchConfig::default()
    }
}

fn token() -> CancellationToken {
    CancellationToken::new()
}

// ===========================================================================
// Fallback
// ===========================================================================

#[tokio::test]
async fn all_backends_failing_yields_synthetic_hits() {
    let a = FailingBackend::new();
    let b = FailingBackend::new();
    let chain = BackendChain::new(&config()).with_backend(a.clone()).with_backend(b.clone());

    let hits = chain.search(&SearchRequest::new("weather NYC"), &token()).await;

    assert!(!hits.is_empty());
    assert!(hits.iter().all(|h| h.source_backend == "synthetic"));
    assert_eq!(a.calls.load(Ordering::SeqCst), 1);
    assert_eq!(b.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn synthetic_hits_are_deterministic_and_not_cached() {
    let chain = BackendChain::new(&config()).with_backend(FailingBackend::new());
    let first = chain.search(&SearchRequest::new("weather NYC"), &token()).await;
    let second = chain.search(&SearchRequest::new("weather NYC"), &token()).await;
    assert_eq!(first, second);
    assert!(chain.cache().is_empty());
}

#[tokio::test]
async fn empty_query_returns_nothing_without_calling_backends() {
    let backend = CountingBackend::new(vec![hit("counting", "https://a.example")]);
    let chain = BackendChain::new(&config()).with_backend(backend.clone());
    let hits = chain.search(&SearchRequest::new("   \t "), &token()).await;
    assert!(hits.is_empty());
    assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
}

// ===========================================================================
// Priority order
// ===========================================================================

#[tokio::test]
async fn falls_through_to_next_backend() {
    let failing = FailingBackend::new();
    let good = CountingBackend::new(vec![hit("counting", "https://a.example")]);
    let chain = BackendChain::new(&config()).with_backend(failing.clone()).with_backend(good.clone());

    let hits = chain.search(&SearchRequest::new("rust"), &token()).await;

    assert_eq!(hits[0].source_backend, "counting");
    let status = chain.status().await;
    assert_eq!(status[0].backend, "failing");
    assert_eq!(status[0].strikes, 1);
    assert_eq!(status[1].strikes, 0);
}

#[tokio::test]
async fn unavailable_backend_is_skipped() {
    let offline = Arc::new(OfflineBackend { calls: AtomicUsize::new(0) });
    let chain = BackendChain::new(&config()).with_backend(offline.clone());
    let hits = chain.search(&SearchRequest::new("rust"), &token()).await;
    assert!(hits.iter().all(SearchHit::is_synthetic));
    assert_eq!(offline.calls.load(Ordering::SeqCst), 0);
    assert_eq!(chain.status().await[0].strikes, 0);
}

#[tokio::test]
async fn hits_are_deduplicated_and_truncated() {
    let backend = CountingBackend::new(vec![
        hit("counting", "https://a.example"),
        hit("counting", "https://a.example"),
        hit("counting", "https://b.example"),
        hit("counting", "https://c.example"),
    ]);
    let chain = BackendChain::new(&config()).with_backend(backend);
    let hits = chain
        .search(&SearchRequest::new("rust").with_max_results(2), &token())
        .await;
    let urls: Vec<_> = hits.iter().map(|h| h.url.as_str()).collect();
    assert_eq!(urls, vec!["https://a.example", "https://b.example"]);
}

#[tokio::test(start_paused = true)]
async fn slow_backend_times_out_and_strikes() {
    let chain = BackendChain::new(&config()).with_backend(Arc::new(DelayedBackend {
        delay: Duration::from_secs(5),
    }));
    let hits = chain.search(&SearchRequest::new("rust"), &token()).await;
    assert!(hits.iter().all(SearchHit::is_synthetic));
    assert_eq!(chain.status().await[0].strikes, 1);
}

#[tokio::test]
async fn cancelled_search_skips_backends() {
    let backend = CountingBackend::new(vec![hit("counting", "https://a.example")]);
    let chain = BackendChain::new(&config()).with_backend(backend.clone());
    let cancel = token();
    cancel.cancel();
    let hits = chain.search(&SearchRequest::new("rust"), &cancel).await;
    assert!(!hits.is_empty());
    assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
}

// ===========================================================================
// Cache
// ===========================================================================

#[tokio::test(start_paused = true)]
async fn cache_hit_within_ttl_skips_backend() {
    let backend = CountingBackend::new(vec![hit("counting", "https://a.example")]);
    let chain = BackendChain::new(&config()).with_backend(backend.clone());

    let first = chain.search(&SearchRequest::new("Weather NYC"), &token()).await;
    tokio::time::advance(Duration::from_secs(5)).await;
    let second = chain.search(&SearchRequest::new("  weather   nyc"), &token()).await;

    assert_eq!(first, second);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn cache_expiry_triggers_fresh_call() {
    let backend = CountingBackend::new(vec![hit("counting", "https://a.example")]);
    let chain = BackendChain::new(&config()).with_backend(backend.clone());

    chain.search(&SearchRequest::new("weather NYC"), &token()).await;
    tokio::time::advance(Duration::from_secs(11)).await;
    chain.search(&SearchRequest::new("weather NYC"), &token()).await;

    assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn concurrent_identical_queries_share_one_backend_call() {
    let backend = SlowCountingBackend::new(Duration::from_millis(50));
    let chain = Arc::new(BackendChain::new(&config()).with_backend(backend.clone()));
    let cancel = token();
    let searches = (0..4).map(|_| {
        let chain = chain.clone();
        let cancel = cancel.clone();
        async move { chain.search(&SearchRequest::new("weather NYC"), &cancel).await }
    });
    let results = futures::future::join_all(searches).await;

    assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    assert!(results.iter().all(|hits| hits == &results[0]));
    assert_eq!(results[0][0].url, "https://call0.example/0");
    assert_eq!(chain.cache().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn different_queries_do_not_wait_on_each_other() {
    let backend = SlowCountingBackend::new(Duration::from_millis(50));
    let chain = BackendChain::new(&config()).with_backend(backend.clone());
    let cancel = token();
    let req_nyc = SearchRequest::new("weather NYC");
    let req_la = SearchRequest::new("weather LA");
    let (a, b) = tokio::join!(
        chain.search(&req_nyc, &cancel),
        chain.search(&req_la, &cancel),
    );
    assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    assert_ne!(a, b);
}

#[tokio::test(start_paused = true)]
async fn cache_hit_respects_smaller_max_results() {
    let backend = SlowCountingBackend::new(Duration::from_millis(1));
    let chain = BackendChain::new(&config()).with_backend(backend.clone());

    let full = chain.search(&SearchRequest::new("rust"), &token()).await;
    let short = chain
        .search(&SearchRequest::new("rust").with_max_results(2), &token())
        .await;

    assert_eq!(full.len(), 3);
    assert_eq!(short.len(), 2);
    assert_eq!(short[..], full[..2]);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
}

// ===========================================================================
// Circuit breaker
// ===========================================================================

#[tokio::test(start_paused = true)]
async fn breaker_opens_after_threshold_and_half_opens_after_cooldown() {
    let failing = FailingBackend::new();
    let chain = BackendChain::new(&config()).with_backend(failing.clone());

    for i in 0..4 {
        chain
            .search(&SearchRequest::new(format!("query {}", i)), &token())
            .await;
    }
    // Fourth search skipped the open circuit.
    assert_eq!(failing.calls.load(Ordering::SeqCst), 3);
    assert_eq!(chain.status().await[0].state, "open");

    tokio::time::advance(Duration::from_secs(61)).await;
    assert_eq!(chain.status().await[0].state, "half_open");

    chain.search(&SearchRequest::new("probe"), &token()).await;
    assert_eq!(failing.calls.load(Ordering::SeqCst), 4);
    assert_eq!(chain.status().await[0].state, "open");
}

#[tokio::test]
async fn reset_closes_breakers_and_clears_cache() {
    let failing = FailingBackend::new();
    let good = CountingBackend::new(vec![hit("counting", "https://a.example")]);
    let chain = BackendChain::new(&config()).with_backend(failing.clone()).with_backend(good);

    for i in 0..3 {
        chain
            .search(&SearchRequest::new(format!("query {}", i)), &token())
            .await;
    }
    assert_eq!(chain.status().await[0].state, "open");
    assert_eq!(chain.cache().len(), 3);

    chain.reset().await;

    let status = chain.status().await;
    assert_eq!(status[0].state, "closed");
    assert_eq!(status[0].strikes, 0);
    assert!(chain.cache().is_empty());
}

// ===========================================================================
// Assembly
// ===========================================================================

#[test]
fn build_chain_from_default_config() {
    let chain = build_chain(&SearchConfig::default());
    assert_eq!(chain.backend_names(), vec!["duckduckgo"]);
}
