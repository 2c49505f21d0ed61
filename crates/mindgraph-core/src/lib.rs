//! Mindgraph Core - Types, protocol, configuration, and snapshot validation

pub mod adapter;
pub mod config;
pub mod error;
pub mod protocol;
pub mod types;
pub mod validator;

pub use adapter::{adapter_for, AdjacencyAdapter, JsonAdapter, SnapshotAdapter, YamlAdapter};
pub use config::{EngineConfig, SchedulerConfig, SearchConfig};
pub use error::{Error, Result};
pub use protocol::*;
pub use types::*;
pub use validator::{revalidate, validate_and_correct, Correction};
