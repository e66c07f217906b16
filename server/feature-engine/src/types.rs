//! Input/output types for the feature engine (JSON contract with the intelligence engine).

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-file change statistics as reported by a detailed commit source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
  pub path: String,
  #[serde(default)]
  pub additions: u32,
  #[serde(default)]
  pub deletions: u32,
}

impl FileStat {
  pub fn new(path: impl Into<String>, additions: u32, deletions: u32) -> Self {
    Self {
      path: path.into(),
      additions,
      deletions,
    }
  }
}

/// Author activity over the trailing 90 days.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthorStats {
  pub commits_90d: u32,
  pub avg_files: f64,
}

/// Input: one commit description. `files` comes from a healthy commit source;
/// `diff_text` is the degraded path when only a plain diff is available.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommitInput {
  pub repository: String,
  pub commit_hash: String,
  #[serde(default)]
  pub message: String,
  #[serde(default)]
  pub author: Option<String>,
  #[serde(default)]
  pub timestamp: Option<DateTime<Utc>>,
  #[serde(default)]
  pub files: Option<Vec<FileStat>>,
  #[serde(default)]
  pub diff_text: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitType {
  Bugfix,
  Feature,
  Refactor,
  Test,
  Doc,
  Other,
}

impl CommitType {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Bugfix => "bugfix",
      Self::Feature => "feature",
      Self::Refactor => "refactor",
      Self::Test => "test",
      Self::Doc => "doc",
      Self::Other => "other",
    }
  }
}

/// Where the numbers in a [`CommitFeatures`] record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
  /// Per-file stats from the commit source.
  Detailed,
  /// Estimated from a plain diff string, or from nothing at all.
  Heuristic,
}

/// Immutable feature record for one (repository, commit) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitFeatures {
  pub repository: String,
  pub commit_hash: String,
  pub files: Vec<String>,
  pub files_changed: u32,
  pub lines_added: u32,
  pub lines_deleted: u32,
  pub blast_radius: u32,
  pub test_ratio: f64,
  pub commit_type: CommitType,
  pub risky_tags: BTreeSet<String>,
  pub author: Option<String>,
  pub author_stats: Option<AuthorStats>,
  pub committed_at: Option<DateTime<Utc>>,
  pub provenance: Provenance,
}

impl CommitFeatures {
  /// Lines added plus lines deleted.
  pub fn churn(&self) -> u32 {
    self.lines_added.saturating_add(self.lines_deleted)
  }

  pub fn is_heuristic(&self) -> bool {
    self.provenance == Provenance::Heuristic
  }
}

/// Output: one JSON object to stdout for the CLI.
#[derive(Debug, Serialize)]
pub struct Output {
  pub features: CommitFeatures,
  pub structural_score: f64,
  pub complexity: f64,
  pub explanations: Vec<String>,
}
