//! In-memory store with an optional JSON snapshot file.
//!
//! All state sits behind one lock, so an observation and its counter updates
//! land together. Tag and author indexes over the log are kept in step with
//! every append and rebuilt on load. `checkpoint` writes the snapshot
//! atomically (temp file + rename); `open` loads it back.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{rank_similar, MemoryStore};
use crate::error::{EngineError, Result};
use crate::types::{
  CommitRecord, CommitRef, DeploymentWindow, Observation, PatternCounts, SimilarIncident,
  WindowStatus,
};

#[derive(Debug, Default, Serialize, Deserialize)]
struct State {
  observations: Vec<Observation>,
  patterns: BTreeMap<String, PatternCounts>,
  #[serde(default)]
  commits: BTreeMap<String, CommitRecord>,
  #[serde(default)]
  windows: BTreeMap<String, DeploymentWindow>,
  #[serde(skip)]
  incident_ids: BTreeSet<String>,
  /// tag -> positions of incidents carrying it
  #[serde(skip)]
  incidents_by_tag: BTreeMap<String, Vec<usize>>,
  /// author -> positions of their observations
  #[serde(skip)]
  by_author: BTreeMap<String, Vec<usize>>,
}

impl State {
  fn reindex(&mut self) {
    self.incident_ids.clear();
    self.incidents_by_tag.clear();
    self.by_author.clear();
    for idx in 0..self.observations.len() {
      self.index(idx);
    }
  }

  fn index(&mut self, idx: usize) {
    let Self {
      observations,
      incident_ids,
      incidents_by_tag,
      by_author,
      ..
    } = self;
    let obs = &observations[idx];
    if let Observation::Incident(i) = obs {
      incident_ids.insert(i.id.clone());
      for tag in &i.tags {
        incidents_by_tag.entry(tag.clone()).or_default().push(idx);
      }
    }
    if let Some(author) = obs.author() {
      by_author.entry(author.to_string()).or_default().push(idx);
    }
  }
}

fn commit_key(commit: &CommitRef) -> String {
  format!("{}\n{}", commit.repository, commit.commit_hash)
}

pub struct InMemoryStore {
  state: Mutex<State>,
  snapshot_path: Option<PathBuf>,
}

impl InMemoryStore {
  /// Volatile store; nothing survives the process.
  pub fn new() -> Self {
    Self {
      state: Mutex::new(State::default()),
      snapshot_path: None,
    }
  }

  /// Store backed by a snapshot file; loads it when present.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref().to_path_buf();
    let state = match tokio::fs::read(&path).await {
      Ok(bytes) => {
        let mut state: State = serde_json::from_slice(&bytes)?;
        state.reindex();
        info!(
          path = %path.display(),
          observations = state.observations.len(),
          "memory snapshot loaded"
        );
        state
      }
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => State::default(),
      Err(e) => return Err(EngineError::unavailable("memory", e)),
    };
    Ok(Self {
      state: Mutex::new(state),
      snapshot_path: Some(path),
    })
  }
}

impl Default for InMemoryStore {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
  async fn append(&self, obs: &Observation) -> Result<Vec<PatternCounts>> {
    let mut state = self.state.lock();
    if let Observation::Incident(i) = obs {
      if state.incident_ids.contains(&i.id) {
        return Ok(Vec::new());
      }
    }
    state.observations.push(obs.clone());
    let idx = state.observations.len() - 1;
    state.index(idx);
    let mut updated = Vec::with_capacity(obs.tags().len());
    for tag in obs.tags() {
      let counts = state
        .patterns
        .entry(tag.clone())
        .or_insert_with(|| PatternCounts::new(tag.clone()));
      counts.record(obs);
      updated.push(counts.clone());
    }
    Ok(updated)
  }

  async fn pattern(&self, tag: &str) -> Result<Option<PatternCounts>> {
    Ok(self.state.lock().patterns.get(tag).cloned())
  }

  async fn patterns(&self) -> Result<Vec<PatternCounts>> {
    Ok(self.state.lock().patterns.values().cloned().collect())
  }

  async fn observations(&self) -> Result<Vec<Observation>> {
    Ok(self.state.lock().observations.clone())
  }

  async fn observation_count(&self) -> Result<u64> {
    Ok(self.state.lock().observations.len() as u64)
  }

  async fn incidents_sharing(
    &self,
    tags: &BTreeSet<String>,
    limit: usize,
  ) -> Result<Vec<SimilarIncident>> {
    let state = self.state.lock();
    let mut shared: BTreeMap<usize, Vec<String>> = BTreeMap::new();
    for tag in tags {
      for &idx in state.incidents_by_tag.get(tag).into_iter().flatten() {
        shared.entry(idx).or_default().push(tag.clone());
      }
    }
    let found = shared
      .into_iter()
      .filter_map(|(idx, shared_tags)| match &state.observations[idx] {
        Observation::Incident(i) => Some(SimilarIncident {
          incident_id: i.id.clone(),
          severity: i.severity,
          description: i.description.clone(),
          shared_tags,
          occurred_at: i.occurred_at,
        }),
        Observation::Outcome(_) => None,
      })
      .collect();
    Ok(rank_similar(found, limit))
  }

  async fn author_counts(
    &self,
    author: &str,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
  ) -> Result<(u64, u64)> {
    let state = self.state.lock();
    Ok(
      state
        .by_author
        .get(author)
        .into_iter()
        .flatten()
        .map(|&idx| &state.observations[idx])
        .filter(|o| o.at() >= since && o.at() <= until)
        .fold((0, 0), |(c, i), o| (c + 1, i + u64::from(o.is_incident()))),
    )
  }

  async fn replace_patterns(&self, patterns: &[PatternCounts]) -> Result<()> {
    let mut state = self.state.lock();
    state.patterns = patterns
      .iter()
      .map(|p| (p.tag.clone(), p.clone()))
      .collect();
    Ok(())
  }

  async fn get_commit(&self, commit: &CommitRef) -> Result<Option<CommitRecord>> {
    Ok(self.state.lock().commits.get(&commit_key(commit)).cloned())
  }

  async fn put_commit(&self, record: &CommitRecord) -> Result<()> {
    let key = commit_key(&record.commit_ref());
    self
      .state
      .lock()
      .commits
      .entry(key)
      .and_modify(|stored| {
        stored.risk_score = record.risk_score;
        stored.incident_probability = record.incident_probability;
        stored.analyzed_at = record.analyzed_at;
      })
      .or_insert_with(|| record.clone());
    Ok(())
  }

  async fn commits_since(&self, since: DateTime<Utc>) -> Result<Vec<CommitRecord>> {
    Ok(
      self
        .state
        .lock()
        .commits
        .values()
        .filter(|r| r.analyzed_at >= since)
        .cloned()
        .collect(),
    )
  }

  async fn save_window(&self, window: &DeploymentWindow) -> Result<()> {
    self
      .state
      .lock()
      .windows
      .insert(window.window_id.clone(), window.clone());
    Ok(())
  }

  async fn get_window(&self, window_id: &str) -> Result<Option<DeploymentWindow>> {
    Ok(self.state.lock().windows.get(window_id).cloned())
  }

  async fn load_open_windows(&self) -> Result<Vec<DeploymentWindow>> {
    Ok(
      self
        .state
        .lock()
        .windows
        .values()
        .filter(|w| w.status == WindowStatus::Open)
        .cloned()
        .collect(),
    )
  }

  async fn checkpoint(&self) -> Result<()> {
    let Some(path) = &self.snapshot_path else {
      return Ok(());
    };
    let bytes = {
      let state = self.state.lock();
      serde_json::to_vec(&*state)?
    };
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, &bytes)
      .await
      .map_err(|e| EngineError::unavailable("memory", e))?;
    tokio::fs::rename(&tmp, path)
      .await
      .map_err(|e| EngineError::unavailable("memory", e))?;
    debug!(path = %path.display(), bytes = bytes.len(), "memory snapshot written");
    Ok(())
  }
}
