//! Tavily search API

use crate::backend::{BackendHealth, SearchBackend, SearchError, SearchOutcome, SearchRequest};
use chrono::Utc;
use mindgraph_core::{SearchConfig, SearchHit};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, warn};

const TAVILY_API_URL: &str = "https://api.tavily.com/search";

pub struct TavilyBackend {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    /// Set once the API refuses the key; the backend stays unavailable.
    auth_rejected: AtomicBool,
}

impl TavilyBackend {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            base_url: TAVILY_API_URL.to_string(),
            auth_rejected: AtomicBool::new(false),
        }
    }

    /// Key from config, else `TAVILY_API_KEY`.
    pub fn from_config(config: &SearchConfig) -> Self {
        let key = config
            .tavily_api_key
            .clone()
            .or_else(|| std::env::var("TAVILY_API_KEY").ok());
        Self::new(key)
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[derive(Serialize)]
struct TavilyRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: usize,
    search_depth: &'static str,
}

#[derive(Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: String,
    url: String,
    #[serde(default)]
    content: String,
}

#[async_trait::async_trait]
impl SearchBackend for TavilyBackend {
    fn name(&self) -> &str {
        "tavily"
    }

    fn health(&self) -> BackendHealth {
        if self.api_key.is_some() && !self.auth_rejected.load(Ordering::Relaxed) {
            BackendHealth::Healthy
        } else {
            BackendHealth::Unavailable
        }
    }

    async fn search(&self, request: &SearchRequest) -> SearchOutcome<Vec<SearchHit>> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| SearchError::Unavailable("no Tavily API key".into()))?;

        debug!("Tavily request: query={:?}", request.query);

        let body = TavilyRequest {
            api_key,
            query: &request.query,
            max_results: request.max_results,
            search_depth: "basic",
        };
        let response = self.client.post(&self.base_url).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Tavily error {}: {}", status, error_text);
            if status.as_u16() == 401 || status.as_u16() == 403 {
                warn!("Tavily rejected the API key, backend marked unavailable");
                self.auth_rejected.store(true, Ordering::Relaxed);
                return Err(SearchError::Unavailable(format!("auth failed: {}", error_text)));
            }
            return Err(SearchError::RequestFailed(format!("{}: {}", status, error_text)));
        }

        let parsed: TavilyResponse = response
            .json()
            .await
            .map_err(|e| SearchError::InvalidResponse(e.to_string()))?;
        let now = Utc::now();
        Ok(parsed
            .results
            .into_iter()
            .take(request.max_results)
            .map(|r| SearchHit {
                title: if r.title.is_empty() { r.url.clone() } else { r.title },
                url: r.url,
                snippet: r.content,
                source_backend: "tavily".into(),
                fetched_at: now,
            })
            .collect())
    }
}
