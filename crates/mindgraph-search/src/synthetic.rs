//! Deterministic last-resort backend.
//!
//! Hits are derived only from the query's keywords, so identical queries
//! always produce identical hits (`fetched_at` included).

use crate::backend::{normalize_query, SearchBackend, SearchOutcome, SearchRequest};
use chrono::{DateTime, Utc};
use mindgraph_core::{SearchHit, SYNTHETIC_SOURCE};

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "at", "for", "how", "in", "is", "of", "on", "or", "the", "to",
    "what", "when", "where", "which", "who", "why", "with",
];

/// Topic hints keyed by keyword. First match wins.
const TOPICS: &[(&str, &str)] = &[
    ("weather", "Current conditions and forecast"),
    ("forecast", "Current conditions and forecast"),
    ("news", "Latest headlines and coverage"),
    ("price", "Recent pricing overview"),
    ("history", "Background and timeline"),
    ("define", "Definition and usage"),
];

const MAX_SYNTHETIC_HITS: usize = 3;

pub struct SyntheticBackend;

impl SyntheticBackend {
    pub fn keywords(query: &str) -> Vec<String> {
        normalize_query(query)
            .split(' ')
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
            .filter(|w| !w.is_empty() && !STOPWORDS.contains(w))
            .map(str::to_string)
            .collect()
    }

    fn topic(keywords: &[String]) -> &'static str {
        keywords
            .iter()
            .find_map(|k| TOPICS.iter().find(|(key, _)| key == k).map(|(_, t)| *t))
            .unwrap_or("Overview")
    }

    /// Pure function of the query and hit budget.
    pub fn generate(query: &str, max_results: usize) -> Vec<SearchHit> {
        let normalized = normalize_query(query);
        if normalized.is_empty() {
            return Vec::new();
        }
        let mut keywords = Self::keywords(&normalized);
        if keywords.is_empty() {
            keywords = normalized.split(' ').map(str::to_string).collect();
        }
        let topic = Self::topic(&keywords);
        let slug = keywords.join("-");
        let subject = keywords.join(" ");
        let fetched_at = DateTime::<Utc>::UNIX_EPOCH;

        (0..max_results.clamp(1, MAX_SYNTHETIC_HITS))
            .map(|i| {
                let focus = &keywords[i % keywords.len()];
                SearchHit {
                    title: format!("{}: {} ({})", topic, subject, focus),
                    url: format!("https://synthetic.invalid/{}/{}", slug, i + 1),
                    snippet: format!(
                        "No live source answered for \"{}\". Placeholder entry {} about {}.",
                        normalized,
                        i + 1,
                        focus
                    ),
                    source_backend: SYNTHETIC_SOURCE.to_string(),
                    fetched_at,
                }
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl SearchBackend for SyntheticBackend {
    fn name(&self) -> &str {
        SYNTHETIC_SOURCE
    }

    async fn search(&self, request: &SearchRequest) -> SearchOutcome<Vec<SearchHit>> {
        Ok(Self::generate(&request.query, request.max_results))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_queries_give_identical_hits() {
        let a = SyntheticBackend::generate("Weather NYC", 5);
        let b = SyntheticBackend::generate("  weather   nyc ", 5);
        assert_eq!(a, b);
        assert_eq!(a.len(), 3);
        assert!(a.iter().all(SearchHit::is_synthetic));
        assert!(a[0].title.starts_with("Current conditions"));
    }

    #[test]
    fn stopword_only_query_still_yields_hits() {
        let hits = SyntheticBackend::generate("what is the", 2);
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn empty_query_yields_nothing() {
        assert!(SyntheticBackend::generate("   ", 5).is_empty());
    }

    #[test]
    fn keywords_drop_stopwords_and_punctuation() {
        assert_eq!(
            SyntheticBackend::keywords("What is the weather in NYC?"),
            vec!["weather", "nyc"]
        );
    }
}
