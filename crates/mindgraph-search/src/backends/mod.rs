//! Real search backends and chain assembly from config

pub mod duckduckgo;
pub mod tavily;

pub use duckduckgo::DuckDuckGoBackend;
pub use tavily::TavilyBackend;

use crate::chain::BackendChain;
use mindgraph_core::SearchConfig;
use std::sync::Arc;
use tracing::warn;

/// Build a chain from `backend_priority_order`. Unknown ids are skipped.
pub fn build_chain(config: &SearchConfig) -> BackendChain {
    let mut chain = BackendChain::new(config);
    for id in &config.backend_priority_order {
        match id.as_str() {
            "duckduckgo" => chain.push(Arc::new(DuckDuckGoBackend::new())),
            "tavily" => chain.push(Arc::new(TavilyBackend::from_config(config))),
            other => warn!(backend = other, "unknown search backend in priority order, skipping"),
        }
    }
    chain
}
