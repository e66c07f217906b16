//! Pattern / Incident Memory.
//!
//! `Memory` wraps an injected [`MemoryStore`]: writes are atomic per
//! observation and surface `Unavailable` on failure; reads never fail the
//! caller (errors are logged and an empty result is returned).

mod in_memory;

pub use in_memory::InMemoryStore;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::config::ScoringConfig;
use crate::error::{EngineError, Result};
use crate::types::{
  AuthorHistory, CommitFeatures, CommitOutcome, CommitRecord, CommitRef, DeploymentWindow,
  Incident, Observation, Pattern, PatternCounts, SimilarIncident,
};

/// Persistence collaborator for memory and window durability.
///
/// `append` must apply the observation and every counter update it implies
/// all-or-nothing, and return the counters as they stand after the write.
#[async_trait]
pub trait MemoryStore: Send + Sync {
  /// Append one observation; returns the updated counters for its tags.
  /// An incident whose id is already stored is ignored (empty result).
  async fn append(&self, obs: &Observation) -> Result<Vec<PatternCounts>>;

  async fn pattern(&self, tag: &str) -> Result<Option<PatternCounts>>;

  async fn patterns(&self) -> Result<Vec<PatternCounts>>;

  /// The full observation log in append order. Only replayed by reconcile.
  async fn observations(&self) -> Result<Vec<Observation>>;

  async fn observation_count(&self) -> Result<u64>;

  /// Incidents sharing at least one of `tags`, ordered by [`rank_similar`],
  /// at most `limit`.
  async fn incidents_sharing(
    &self,
    tags: &BTreeSet<String>,
    limit: usize,
  ) -> Result<Vec<SimilarIncident>>;

  /// `(observations, incidents)` attributed to `author` within `[since, until]`.
  async fn author_counts(
    &self,
    author: &str,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
  ) -> Result<(u64, u64)>;

  /// Overwrite the counter table (used by reconcile).
  async fn replace_patterns(&self, patterns: &[PatternCounts]) -> Result<()>;

  async fn get_commit(&self, commit: &CommitRef) -> Result<Option<CommitRecord>>;

  /// Cache a commit record. Features are written once: when the commit is
  /// already cached only the verdict numbers and `analyzed_at` are refreshed.
  async fn put_commit(&self, record: &CommitRecord) -> Result<()>;

  async fn commits_since(&self, since: DateTime<Utc>) -> Result<Vec<CommitRecord>>;

  async fn save_window(&self, window: &DeploymentWindow) -> Result<()>;

  async fn get_window(&self, window_id: &str) -> Result<Option<DeploymentWindow>>;

  /// Windows still `OPEN`; closed ones are only read back by id.
  async fn load_open_windows(&self) -> Result<Vec<DeploymentWindow>>;

  /// Flush to durable storage, if the store has any.
  async fn checkpoint(&self) -> Result<()>;
}

/// Rebuild the counter table from an observation log.
pub fn tally(observations: &[Observation]) -> BTreeMap<String, PatternCounts> {
  let mut out: BTreeMap<String, PatternCounts> = BTreeMap::new();
  let mut seen_incidents: BTreeSet<&str> = BTreeSet::new();
  for obs in observations {
    if let Observation::Incident(i) = obs {
      if !seen_incidents.insert(i.id.as_str()) {
        continue;
      }
    }
    for tag in obs.tags() {
      out
        .entry(tag.clone())
        .or_insert_with(|| PatternCounts::new(tag.clone()))
        .record(obs);
    }
  }
  out
}

/// Overlap (desc), then recency (desc), then id; duplicates dropped, cut to `limit`.
pub fn rank_similar(mut found: Vec<SimilarIncident>, limit: usize) -> Vec<SimilarIncident> {
  found.sort_by(|a, b| {
    b.shared_tags
      .len()
      .cmp(&a.shared_tags.len())
      .then_with(|| b.occurred_at.cmp(&a.occurred_at))
      .then_with(|| a.incident_id.cmp(&b.incident_id))
  });
  found.dedup_by(|a, b| a.incident_id == b.incident_id);
  found.truncate(limit);
  found
}

pub struct Memory {
  store: Arc<dyn MemoryStore>,
  config: ScoringConfig,
}

impl Memory {
  /// Open memory over a store and reconcile pattern statistics with the log.
  pub async fn open(store: Arc<dyn MemoryStore>, config: ScoringConfig) -> Result<Self> {
    let memory = Self { store, config };
    let fixed = memory.reconcile().await?;
    if fixed > 0 {
      warn!(fixed, "memory: pattern statistics rebuilt from observation log");
    }
    Ok(memory)
  }

  /// Replay the observation log; rewrite the counter table when it disagrees.
  /// Returns the number of tags whose counters changed.
  pub async fn reconcile(&self) -> Result<usize> {
    let observations = self.store.observations().await.map_err(as_unavailable)?;
    let rebuilt = tally(&observations);
    let stored: BTreeMap<String, PatternCounts> = self
      .store
      .patterns()
      .await
      .map_err(as_unavailable)?
      .into_iter()
      .map(|p| (p.tag.clone(), p))
      .collect();

    let mut fixed = rebuilt
      .iter()
      .filter(|(tag, counts)| stored.get(*tag) != Some(*counts))
      .count();
    fixed += stored.keys().filter(|t| !rebuilt.contains_key(*t)).count();

    if fixed > 0 {
      let table: Vec<PatternCounts> = rebuilt.into_values().collect();
      self.store.replace_patterns(&table).await.map_err(as_unavailable)?;
    }
    info!(observations = observations.len(), fixed, "memory: reconciled");
    Ok(fixed)
  }

  pub fn confidence(&self, counts: &PatternCounts) -> f64 {
    let alpha = self.config.laplace_alpha.max(0.0);
    let beta = self.config.laplace_beta.max(0.0);
    let denom = counts.occurrence_count as f64 + alpha + beta;
    if denom <= 0.0 {
      return 0.0;
    }
    ((counts.incident_count as f64 + alpha) / denom).clamp(0.0, 1.0)
  }

  fn to_pattern(&self, counts: PatternCounts) -> Pattern {
    Pattern {
      confidence: self.confidence(&counts),
      tag: counts.tag,
      occurrence_count: counts.occurrence_count,
      incident_count: counts.incident_count,
      typical_impact: counts.typical_impact,
    }
  }

  /// Append an incident and bump occurrence + incident counters for its tags.
  pub async fn record_incident(&self, incident: &Incident) -> Result<Vec<Pattern>> {
    let updated = self
      .store
      .append(&Observation::Incident(incident.clone()))
      .await
      .map_err(as_unavailable)?;
    if updated.is_empty() && !incident.tags.is_empty() {
      debug!(incident_id = %incident.id, "memory: duplicate incident ignored");
    }
    Ok(updated.into_iter().map(|c| self.to_pattern(c)).collect())
  }

  /// Bump occurrence counters for every tag of the commit (incident counters
  /// only when an incident occurred).
  pub async fn record_commit_outcome(
    &self,
    features: &CommitFeatures,
    incident_occurred: bool,
    observed_at: DateTime<Utc>,
  ) -> Result<Vec<Pattern>> {
    let outcome = CommitOutcome {
      commit: CommitRef::new(&features.repository, &features.commit_hash),
      author: features.author.clone(),
      tags: features.risky_tags.clone(),
      incident_occurred,
      observed_at,
    };
    let updated = self
      .store
      .append(&Observation::Outcome(outcome))
      .await
      .map_err(as_unavailable)?;
    Ok(updated.into_iter().map(|c| self.to_pattern(c)).collect())
  }

  pub async fn pattern(&self, tag: &str) -> Option<Pattern> {
    match self.store.pattern(tag).await {
      Ok(counts) => counts.map(|c| self.to_pattern(c)),
      Err(e) => {
        warn!(tag, error = %e, "memory: pattern lookup failed");
        None
      }
    }
  }

  pub async fn patterns(&self) -> Vec<Pattern> {
    match self.store.patterns().await {
      Ok(all) => all.into_iter().map(|c| self.to_pattern(c)).collect(),
      Err(e) => {
        warn!(error = %e, "memory: pattern listing failed");
        Vec::new()
      }
    }
  }

  /// Number of observations recorded so far.
  pub async fn size(&self) -> usize {
    match self.store.observation_count().await {
      Ok(n) => usize::try_from(n).unwrap_or(usize::MAX),
      Err(e) => {
        warn!(error = %e, "memory: observation count failed");
        0
      }
    }
  }

  /// Incidents ranked by tag overlap (desc), then recency (desc). Incidents
  /// sharing no tag are not returned.
  pub async fn similar_incidents(
    &self,
    tags: &BTreeSet<String>,
    limit: usize,
  ) -> Vec<SimilarIncident> {
    if tags.is_empty() || limit == 0 {
      return Vec::new();
    }
    match self.store.incidents_sharing(tags, limit).await {
      Ok(found) => found,
      Err(e) => {
        warn!(error = %e, "memory: similar incident lookup failed");
        Vec::new()
      }
    }
  }

  /// Commits and incident rate for an author over the trailing window.
  pub async fn author_history(
    &self,
    author: &str,
    window_days: i64,
    now: DateTime<Utc>,
  ) -> AuthorHistory {
    let since = now - Duration::days(window_days);
    let (commits, incidents) = match self.store.author_counts(author, since, now).await {
      Ok(counts) => counts,
      Err(e) => {
        warn!(author, error = %e, "memory: author history lookup failed");
        (0, 0)
      }
    };
    AuthorHistory {
      commits,
      incidents,
      incident_rate: if commits == 0 {
        0.0
      } else {
        incidents as f64 / commits as f64
      },
    }
  }

  pub async fn cached_commit(&self, commit: &CommitRef) -> Option<CommitRecord> {
    match self.store.get_commit(commit).await {
      Ok(r) => r,
      Err(e) => {
        warn!(commit = %commit, error = %e, "memory: commit cache read failed");
        None
      }
    }
  }

  pub async fn cache_commit(&self, record: &CommitRecord) {
    if let Err(e) = self.store.put_commit(record).await {
      warn!(commit = %record.commit_ref(), error = %e, "memory: commit cache write failed");
    }
  }

  pub async fn commits_since(&self, since: DateTime<Utc>) -> Vec<CommitRecord> {
    match self.store.commits_since(since).await {
      Ok(r) => r,
      Err(e) => {
        warn!(error = %e, "memory: commit listing failed");
        Vec::new()
      }
    }
  }

  pub async fn save_window(&self, window: &DeploymentWindow) {
    if let Err(e) = self.store.save_window(window).await {
      warn!(window_id = %window.window_id, error = %e, "memory: window write failed");
    }
  }

  pub async fn window(&self, window_id: &str) -> Option<DeploymentWindow> {
    match self.store.get_window(window_id).await {
      Ok(w) => w,
      Err(e) => {
        warn!(window_id, error = %e, "memory: window read failed");
        None
      }
    }
  }

  pub async fn load_open_windows(&self) -> Vec<DeploymentWindow> {
    match self.store.load_open_windows().await {
      Ok(w) => w,
      Err(e) => {
        warn!(error = %e, "memory: window load failed");
        Vec::new()
      }
    }
  }

  pub async fn checkpoint(&self) -> Result<()> {
    self.store.checkpoint().await.map_err(as_unavailable)
  }
}

/// Store failures on the write path surface as the memory backend being unavailable.
fn as_unavailable(e: EngineError) -> EngineError {
  match e {
    EngineError::Unavailable { .. } | EngineError::InvalidState(_) => e,
    other => EngineError::unavailable("memory", other),
  }
}
