//! Change-risk intelligence engine: deterministic, rule-based.
//!
//! Scores commits from their structural features blended with learned
//! pattern/incident memory, summarizes log windows into typed anomalies and
//! trace batches into latency percentiles, and watches deployments through a
//! monitoring window that recommends rollbacks.
//!
//! Backends (commits, logs, metrics) are optional and injected; memory
//! persistence goes through [`memory::MemoryStore`].

pub mod anomaly;
pub mod capability;
pub mod config;
pub mod correlation;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod logs;
pub mod memory;
pub mod monitor;
pub mod normalize;
pub mod scorer;
pub mod sources;
pub mod traces;
pub mod types;

pub use capability::{Backends, Capabilities};
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use memory::{InMemoryStore, Memory, MemoryStore};
pub use normalize::ErrorCategory;
pub use sources::{CommitSource, LogSource, MetricSource};
pub use types::*;
