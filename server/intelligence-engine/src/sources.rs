//! External telemetry collaborators. Concrete implementations live in the
//! service crate; tests use in-file fakes.

use async_trait::async_trait;
use feature_engine::{AuthorStats, CommitInput};

use crate::error::Result;
use crate::types::{LogFilter, LogLine, TimeRange, TimeSeries};

#[async_trait]
pub trait CommitSource: Send + Sync {
  fn name(&self) -> &str;

  /// Cheap reachability check used by capability probing.
  async fn health(&self) -> Result<()>;

  /// Commit metadata with per-file stats.
  async fn fetch_commit(&self, repository: &str, commit_hash: &str) -> Result<CommitInput>;

  /// Rolling stats for an author over the trailing 90 days.
  async fn author_stats(&self, author: &str) -> Result<AuthorStats>;

  /// Hashes of the newest commits, newest first. Sources that cannot list
  /// history report none.
  async fn recent_commits(&self, limit: usize) -> Result<Vec<String>> {
    let _ = limit;
    Ok(Vec::new())
  }
}

#[async_trait]
pub trait LogSource: Send + Sync {
  fn name(&self) -> &str;

  async fn health(&self) -> Result<()>;

  async fn query(&self, range: &TimeRange, filter: &LogFilter) -> Result<Vec<LogLine>>;
}

#[async_trait]
pub trait MetricSource: Send + Sync {
  fn name(&self) -> &str;

  async fn health(&self) -> Result<()>;

  async fn query(&self, expression: &str, range: &TimeRange) -> Result<TimeSeries>;
}
