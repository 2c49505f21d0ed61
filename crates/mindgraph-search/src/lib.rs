//! Mindgraph Search - Backend chain with caching, circuit breaking, and synthetic fallback

pub mod backend;
pub mod backends;
pub mod breaker;
pub mod cache;
pub mod chain;
pub mod synthetic;

pub use backend::{
    normalize_query, BackendHealth, SearchBackend, SearchError, SearchOutcome, SearchRequest,
};
pub use backends::{build_chain, DuckDuckGoBackend, TavilyBackend};
pub use breaker::{BreakerStatus, CircuitBreaker, CircuitState};
pub use cache::ResultCache;
pub use chain::BackendChain;
pub use synthetic::SyntheticBackend;
pub use tokio_util::sync::CancellationToken;
