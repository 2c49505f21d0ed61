//! DuckDuckGo instant-answer API

use crate::backend::{SearchBackend, SearchError, SearchOutcome, SearchRequest};
use chrono::Utc;
use mindgraph_core::SearchHit;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, error};

const DUCKDUCKGO_API_URL: &str = "https://api.duckduckgo.com/";

pub struct DuckDuckGoBackend {
    client: Client,
    base_url: String,
}

impl DuckDuckGoBackend {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            base_url: DUCKDUCKGO_API_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

impl Default for DuckDuckGoBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstantAnswer {
    #[serde(default)]
    heading: String,
    #[serde(default)]
    abstract_text: String,
    #[serde(default, rename = "AbstractURL")]
    abstract_url: String,
    #[serde(default)]
    related_topics: Vec<RelatedTopic>,
}

/// Related topics are either plain entries or named groups of entries.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RelatedTopic {
    Entry {
        #[serde(rename = "Text")]
        text: String,
        #[serde(rename = "FirstURL", default)]
        first_url: String,
    },
    Group {
        #[serde(rename = "Topics", default)]
        topics: Vec<RelatedTopic>,
    },
}

impl RelatedTopic {
    fn flatten_into<'a>(&'a self, out: &mut Vec<(&'a str, &'a str)>) {
        match self {
            Self::Entry { text, first_url } => out.push((text.as_str(), first_url.as_str())),
            Self::Group { topics } => topics.iter().for_each(|t| t.flatten_into(out)),
        }
    }
}

fn parse_answer(answer: &InstantAnswer, max_results: usize) -> Vec<SearchHit> {
    let now = Utc::now();
    let mut hits = Vec::new();

    if !answer.abstract_text.is_empty() {
        let title = if answer.heading.is_empty() {
            "DuckDuckGo Result".to_string()
        } else {
            answer.heading.clone()
        };
        hits.push(SearchHit {
            title,
            url: answer.abstract_url.clone(),
            snippet: answer.abstract_text.clone(),
            source_backend: "duckduckgo".into(),
            fetched_at: now,
        });
    }

    let mut topics = Vec::new();
    answer.related_topics.iter().for_each(|t| t.flatten_into(&mut topics));
    for (text, url) in topics {
        if hits.len() >= max_results {
            break;
        }
        if text.is_empty() {
            continue;
        }
        let title: String = text.split(" - ").next().unwrap_or(text).chars().take(100).collect();
        hits.push(SearchHit {
            title,
            url: url.to_string(),
            snippet: text.to_string(),
            source_backend: "duckduckgo".into(),
            fetched_at: now,
        });
    }

    hits.truncate(max_results);
    hits
}

#[async_trait::async_trait]
impl SearchBackend for DuckDuckGoBackend {
    fn name(&self) -> &str {
        "duckduckgo"
    }

    async fn search(&self, request: &SearchRequest) -> SearchOutcome<Vec<SearchHit>> {
        debug!("DuckDuckGo request: query={:?}", request.query);

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("q", request.query.as_str()),
                ("format", "json"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("DuckDuckGo error {}: {}", status, error_text);
            return Err(SearchError::RequestFailed(format!("{}: {}", status, error_text)));
        }

        // The API serves JSON with a javascript content type, so parse by hand.
        let body = response.text().await?;
        let answer: InstantAnswer = serde_json::from_str(&body)
            .map_err(|e| SearchError::InvalidResponse(e.to_string()))?;
        Ok(parse_answer(&answer, request.max_results))
    }
}
