//! Engine configuration
//!
//! All tunable parameters in one place. Loaded from TOML by the host,
//! falls back to defaults if no config file exists. The core consumes this
//! struct; it never reads files or the environment on its own.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Loop governor and worker pool.
    pub scheduler: SchedulerConfig,
    /// Backend chain, cache and circuit breakers.
    pub search: SearchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Dispatch attempts allowed per node before it is forced TERMINATED_LOOP.
    pub max_node_visits: u32,
    /// Global deadline for one run.
    pub execution_timeout_ms: u64,
    /// How long in-flight dispatches may keep running after the deadline.
    pub grace_period_ms: u64,
    /// Max concurrent dispatches.
    pub worker_pool_size: usize,
    /// Opt-in cycle detection over the last N dispatch attempts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loop_detection_window: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchConfig {
    /// Real backends, tried in this order. Known ids: "duckduckgo", "tavily".
    pub backend_priority_order: Vec<String>,
    pub backend_cache_ttl_secs: u64,
    /// Per-call bound on a single backend request.
    pub backend_timeout_ms: u64,
    /// Hits kept per query.
    pub max_results: usize,
    /// Consecutive strikes before a backend's circuit opens.
    pub failure_threshold: u32,
    /// How long an open circuit stays open.
    pub cooldown_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tavily_api_key: Option<String>,
}

// ============================================================
// Defaults
// ============================================================

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_node_visits: 3,
            execution_timeout_ms: 30_000,
            grace_period_ms: 2_000,
            worker_pool_size: 8,
            loop_detection_window: None,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            backend_priority_order: vec!["duckduckgo".into()],
            backend_cache_ttl_secs: 3_600,
            backend_timeout_ms: 10_000,
            max_results: 5,
            failure_threshold: 3,
            cooldown_secs: 60,
            tavily_api_key: None,
        }
    }
}

impl SchedulerConfig {
    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

impl SearchConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.backend_cache_ttl_secs)
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

// ============================================================
// Loading
// ============================================================

impl EngineConfig {
    /// Load config from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match Self::from_toml(&content) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {} — using defaults", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!("No config at {} — using defaults", path.display());
                Self::default()
            }
        }
    }

    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Write the current config as TOML (for generating a default config file).
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// Human-readable problems; empty when the config is usable.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let s = &self.scheduler;
        if s.worker_pool_size == 0 {
            problems.push("scheduler.worker_pool_size must be at least 1".to_string());
        }
        if s.execution_timeout_ms == 0 {
            problems.push("scheduler.execution_timeout_ms must be positive".to_string());
        }
        if let Some(w) = s.loop_detection_window {
            if w < 4 {
                problems.push(format!(
                    "scheduler.loop_detection_window must be at least 4 (got {})",
                    w
                ));
            }
        }
        let q = &self.search;
        if q.max_results == 0 {
            problems.push("search.max_results must be at least 1".to_string());
        }
        if q.failure_threshold == 0 {
            problems.push("search.failure_threshold must be at least 1".to_string());
        }
        if q.backend_timeout_ms == 0 {
            problems.push("search.backend_timeout_ms must be positive".to_string());
        }
        problems
    }
}
