//! Backend Availability Model.
//!
//! Probes the optional backends and keeps the current capability set. Every
//! probe and query is bounded by a timeout; a timeout or error is treated
//! exactly like an absent backend and drops the capability until the next
//! successful probe.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use feature_engine::{AuthorStats, CommitInput};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::config::BackendConfig;
use crate::error::{EngineError, Result};
use crate::sources::{CommitSource, LogSource, MetricSource};
use crate::types::{Capability, CapabilitySet, LogFilter, LogLine, TimeRange, TimeSeries};

/// The optional backends wired into an engine. Any of them may be absent.
#[derive(Clone, Default)]
pub struct Backends {
  pub commits: Option<Arc<dyn CommitSource>>,
  pub logs: Option<Arc<dyn LogSource>>,
  pub metrics: Option<Arc<dyn MetricSource>>,
}

impl Backends {
  pub fn none() -> Self {
    Self::default()
  }
}

pub struct Capabilities {
  backends: Backends,
  config: BackendConfig,
  current: RwLock<CapabilitySet>,
}

/// Run `fut` under `limit`; errors and timeouts come back as `Unavailable`.
/// `NotFound` passes through: the backend answered, the item just is not there.
async fn bounded<T>(
  backend: &str,
  limit: Duration,
  fut: impl Future<Output = Result<T>>,
) -> Result<T> {
  match tokio::time::timeout(limit, fut).await {
    Ok(Ok(v)) => Ok(v),
    Ok(Err(e @ EngineError::NotFound(_))) => Err(e),
    Ok(Err(EngineError::Unavailable { reason, .. })) => Err(EngineError::unavailable(backend, reason)),
    Ok(Err(e)) => Err(EngineError::unavailable(backend, e)),
    Err(_) => Err(EngineError::unavailable(
      backend,
      format!("timed out after {}ms", limit.as_millis()),
    )),
  }
}

impl Capabilities {
  /// Starts with an empty set; call [`Capabilities::probe`] to populate it.
  pub fn new(backends: Backends, config: BackendConfig) -> Self {
    Self {
      backends,
      config,
      current: RwLock::new(CapabilitySet::empty()),
    }
  }

  fn probe_timeout(&self) -> Duration {
    Duration::from_millis(self.config.probe_timeout_ms)
  }

  fn query_timeout(&self) -> Duration {
    Duration::from_millis(self.config.query_timeout_ms)
  }

  /// Probe every configured backend concurrently. Never fails.
  pub async fn probe(&self) -> CapabilitySet {
    let limit = self.probe_timeout();
    let commits = async {
      match &self.backends.commits {
        Some(src) => Some(bounded(Capability::Commits.as_str(), limit, src.health()).await),
        None => None,
      }
    };
    let logs = async {
      match &self.backends.logs {
        Some(src) => Some(bounded(Capability::Logs.as_str(), limit, src.health()).await),
        None => None,
      }
    };
    let metrics = async {
      match &self.backends.metrics {
        Some(src) => Some(bounded(Capability::Metrics.as_str(), limit, src.health()).await),
        None => None,
      }
    };
    let (commits, logs, metrics) = tokio::join!(commits, logs, metrics);

    let mut next = CapabilitySet::empty();
    for (cap, result) in [
      (Capability::Commits, commits),
      (Capability::Logs, logs),
      (Capability::Metrics, metrics),
    ] {
      match result {
        Some(Ok(())) => next.insert(cap),
        Some(Err(e)) => warn!(backend = cap.as_str(), error = %e, "capability probe failed"),
        None => debug!(backend = cap.as_str(), "backend not configured"),
      }
    }

    let mut current = self.current.write();
    if *current != next {
      info!(
        capabilities = ?next.iter().map(Capability::as_str).collect::<Vec<_>>(),
        "capability set changed"
      );
    }
    *current = next.clone();
    next
  }

  pub fn status(&self) -> CapabilitySet {
    self.current.read().clone()
  }

  pub fn has(&self, cap: Capability) -> bool {
    self.current.read().has(cap)
  }

  fn mark_lost(&self, cap: Capability, err: &EngineError) {
    warn!(backend = cap.as_str(), error = %err, "backend query failed; capability dropped");
    self.current.write().remove(cap);
  }

  /// Commit metadata from the commit source, or None when it is unavailable.
  pub async fn fetch_commit(&self, repository: &str, commit_hash: &str) -> Option<CommitInput> {
    let src = self.backends.commits.as_ref().filter(|_| self.has(Capability::Commits))?;
    let fut = src.fetch_commit(repository, commit_hash);
    match bounded(src.name(), self.query_timeout(), fut).await {
      Ok(input) => Some(input),
      Err(EngineError::NotFound(what)) => {
        debug!(backend = src.name(), %what, "commit not found");
        None
      }
      Err(e) => {
        self.mark_lost(Capability::Commits, &e);
        None
      }
    }
  }

  pub async fn author_stats(&self, author: &str) -> Option<AuthorStats> {
    let src = self.backends.commits.as_ref().filter(|_| self.has(Capability::Commits))?;
    match bounded(src.name(), self.query_timeout(), src.author_stats(author)).await {
      Ok(stats) => Some(stats),
      Err(EngineError::NotFound(_)) => None,
      Err(e) => {
        self.mark_lost(Capability::Commits, &e);
        None
      }
    }
  }

  /// Newest commit hashes from the commit source, or None when it is unavailable.
  pub async fn recent_commits(&self, limit: usize) -> Option<Vec<String>> {
    let src = self.backends.commits.as_ref().filter(|_| self.has(Capability::Commits))?;
    match bounded(src.name(), self.query_timeout(), src.recent_commits(limit)).await {
      Ok(hashes) => Some(hashes),
      Err(EngineError::NotFound(_)) => Some(Vec::new()),
      Err(e) => {
        self.mark_lost(Capability::Commits, &e);
        None
      }
    }
  }

  pub async fn query_logs(&self, range: &TimeRange, filter: &LogFilter) -> Option<Vec<LogLine>> {
    let src = self.backends.logs.as_ref().filter(|_| self.has(Capability::Logs))?;
    match bounded(src.name(), self.query_timeout(), src.query(range, filter)).await {
      Ok(lines) => Some(lines),
      Err(e) => {
        self.mark_lost(Capability::Logs, &e);
        None
      }
    }
  }

  pub async fn query_metric(&self, expression: &str, range: &TimeRange) -> Option<TimeSeries> {
    let src = self.backends.metrics.as_ref().filter(|_| self.has(Capability::Metrics))?;
    match bounded(src.name(), self.query_timeout(), src.query(expression, range)).await {
      Ok(series) => Some(series),
      Err(e) => {
        self.mark_lost(Capability::Metrics, &e);
        None
      }
    }
  }
}
