//! Core engine: ties features, memory, scoring, log analysis and the
//! deployment monitor together behind one shared handle.
//!
//! Every entry point takes `&self`; share the engine through an `Arc`. Windows
//! are serialized per window by the monitor's async mutexes, memory writes are
//! serialized by the store.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use feature_engine::CommitInput;
use tracing::{debug, info, instrument, warn};

use crate::anomaly;
use crate::capability::{Backends, Capabilities};
use crate::config::{AnomalyThresholds, EngineConfig};
use crate::correlation;
use crate::error::{EngineError, Result};
use crate::fingerprint;
use crate::logs;
use crate::memory::{Memory, MemoryStore};
use crate::monitor::{self, Decision, Monitor, PollFacts, WindowHandle};
use crate::normalize::{self, ErrorCategory};
use crate::scorer::{self, ScoreContext};
use crate::traces;
use crate::types::*;

pub struct Engine {
  config: EngineConfig,
  memory: Memory,
  capabilities: Capabilities,
  monitor: Monitor,
}

impl Engine {
  /// Open memory over `store`, restore persisted open windows and probe backends.
  pub async fn open(
    config: EngineConfig,
    store: Arc<dyn MemoryStore>,
    backends: Backends,
  ) -> Result<Self> {
    let memory = Memory::open(store, config.scoring.clone()).await?;
    let capabilities = Capabilities::new(backends, config.backends.clone());
    let monitor = Monitor::new();

    let mut restored = 0usize;
    for window in memory.load_open_windows().await {
      let window_id = window.window_id.clone();
      match monitor.insert(window) {
        Ok(_) => restored += 1,
        Err(e) => warn!(window_id = %window_id, error = %e, "skipping persisted window"),
      }
    }

    let caps = capabilities.probe().await;
    info!(
      restored_windows = restored,
      capabilities = ?caps.iter().map(Capability::as_str).collect::<Vec<_>>(),
      "engine ready"
    );

    Ok(Self {
      config,
      memory,
      capabilities,
      monitor,
    })
  }

  pub fn config(&self) -> &EngineConfig {
    &self.config
  }

  pub fn memory(&self) -> &Memory {
    &self.memory
  }

  /// Re-probe every backend and return the new capability set.
  pub async fn probe(&self) -> CapabilitySet {
    self.capabilities.probe().await
  }

  pub fn capability_status(&self) -> CapabilitySet {
    self.capabilities.status()
  }

  pub async fn checkpoint(&self) -> Result<()> {
    self.memory.checkpoint().await
  }

  // -------------------------------------------------------------------------
  // Commits
  // -------------------------------------------------------------------------

  /// Risk verdict for a commit. Uses cached features when the commit has been
  /// analyzed before, then the commit source, then `diff` as a heuristic.
  pub async fn analyze_commit(
    &self,
    repository: &str,
    commit_hash: &str,
    diff: Option<String>,
  ) -> Result<RiskVerdict> {
    self.analyze_commit_at(repository, commit_hash, diff, Utc::now()).await
  }

  #[instrument(skip(self, diff), fields(has_diff = diff.is_some()))]
  pub async fn analyze_commit_at(
    &self,
    repository: &str,
    commit_hash: &str,
    diff: Option<String>,
    now: DateTime<Utc>,
  ) -> Result<RiskVerdict> {
    if repository.trim().is_empty() {
      return Err(EngineError::validation("repository", "must not be empty"));
    }
    if commit_hash.trim().is_empty() {
      return Err(EngineError::validation("commit_hash", "must not be empty"));
    }
    let commit = CommitRef::new(repository, commit_hash);

    let features = match self.memory.cached_commit(&commit).await {
      Some(record) => {
        debug!(commit = %commit, "using cached features");
        record.features
      }
      None => self.extract_features(&commit, diff).await,
    };
    Ok(self.score_features(features, now).await)
  }

  /// Risk verdict for a caller-supplied commit record (per-file stats or diff).
  /// A commit analyzed before keeps its cached features; the supplied record
  /// is only used the first time.
  #[instrument(skip(self, input), fields(commit = %input.commit_hash))]
  pub async fn analyze_input(&self, input: CommitInput, now: DateTime<Utc>) -> Result<RiskVerdict> {
    if input.repository.trim().is_empty() {
      return Err(EngineError::validation("repository", "must not be empty"));
    }
    if input.commit_hash.trim().is_empty() {
      return Err(EngineError::validation("commit_hash", "must not be empty"));
    }
    let commit = CommitRef::new(&input.repository, &input.commit_hash);
    if let Some(record) = self.memory.cached_commit(&commit).await {
      debug!(commit = %commit, "using cached features; supplied record ignored");
      return Ok(self.score_features(record.features, now).await);
    }
    let author_stats = match &input.author {
      Some(author) => self.capabilities.author_stats(author).await,
      None => None,
    };
    let features = feature_engine::extract(&input, author_stats);
    Ok(self.score_features(features, now).await)
  }

  /// Analyze commits the commit source reports as newer than `last_seen`,
  /// oldest first. At most `limit` commits are listed per call.
  #[instrument(skip(self))]
  pub async fn analyze_new_commits(
    &self,
    repository: &str,
    last_seen: Option<&str>,
    limit: usize,
  ) -> Result<Vec<RiskVerdict>> {
    let Some(recent) = self.capabilities.recent_commits(limit).await else {
      return Ok(Vec::new());
    };
    let mut fresh: Vec<String> = recent
      .into_iter()
      .take_while(|hash| Some(hash.as_str()) != last_seen)
      .collect();
    fresh.reverse();

    let mut verdicts = Vec::with_capacity(fresh.len());
    for hash in &fresh {
      verdicts.push(self.analyze_commit(repository, hash, None).await?);
    }
    if !verdicts.is_empty() {
      info!(repository, analyzed = verdicts.len(), "new commits analyzed");
    }
    Ok(verdicts)
  }

  async fn extract_features(&self, commit: &CommitRef, diff: Option<String>) -> CommitFeatures {
    let input = match self
      .capabilities
      .fetch_commit(&commit.repository, &commit.commit_hash)
      .await
    {
      Some(mut input) => {
        input.repository = commit.repository.clone();
        input.commit_hash = commit.commit_hash.clone();
        if input.diff_text.is_none() {
          input.diff_text = diff;
        }
        input
      }
      None => CommitInput {
        repository: commit.repository.clone(),
        commit_hash: commit.commit_hash.clone(),
        diff_text: diff,
        ..Default::default()
      },
    };
    let author_stats = match &input.author {
      Some(author) => self.capabilities.author_stats(author).await,
      None => None,
    };
    feature_engine::extract(&input, author_stats)
  }

  /// Gather memory context, score, and cache the record.
  async fn score_features(&self, features: CommitFeatures, now: DateTime<Utc>) -> RiskVerdict {
    let cfg = &self.config.scoring;
    let mut patterns = Vec::with_capacity(features.risky_tags.len());
    for tag in &features.risky_tags {
      patterns.push((tag.clone(), self.memory.pattern(tag).await));
    }
    let author = match &features.author {
      Some(a) => Some(self.memory.author_history(a, cfg.author_window_days, now).await),
      None => None,
    };
    let ctx = ScoreContext {
      patterns,
      author,
      similar: self
        .memory
        .similar_incidents(&features.risky_tags, cfg.similar_incident_limit)
        .await,
      memory_size: self.memory.size().await,
    };
    let verdict = scorer::score(&features, &ctx, cfg);

    // Records with no data at all are recomputed next time instead of cached.
    if features.files_changed > 0 {
      self
        .memory
        .cache_commit(&CommitRecord {
          features,
          risk_score: verdict.risk_score,
          incident_probability: verdict.incident_probability,
          analyzed_at: now,
        })
        .await;
    }
    info!(
      commit = %verdict.commit_hash,
      risk_score = verdict.risk_score,
      incident_probability = verdict.incident_probability,
      action = ?verdict.recommended_action,
      "commit analyzed"
    );
    verdict
  }

  // -------------------------------------------------------------------------
  // Logs
  // -------------------------------------------------------------------------

  /// Summarize and analyze a batch of log lines, optionally against a baseline batch.
  pub fn analyze_logs(&self, lines: &[LogLine], baseline_lines: Option<&[LogLine]>) -> LogAnalysis {
    let eps = self.config.monitor.epsilon;
    let summary = logs::summarize(lines, None);
    let baseline = baseline_lines.map(|b| snapshot_from(&logs::summarize(b, None), None));
    let anomalies = anomaly::analyze(&summary, baseline.as_ref(), &self.config.anomaly, eps);
    let spike_score = match (summary.error_rate(), baseline.as_ref().and_then(|b| b.error_rate)) {
      (Some(c), Some(b)) => Some(logs::spike_score(
        c,
        b,
        self.config.anomaly.spike_saturation_ratio,
        eps,
      )),
      _ => None,
    };
    LogAnalysis {
      error_rate: summary.error_rate(),
      summary,
      anomalies,
      spike_score,
    }
  }

  /// Latency percentiles, slow traces and bottleneck operations for a batch of traces.
  pub fn analyze_traces(&self, spans: &[TraceSpan], service: Option<&str>) -> Result<TraceAnalysis> {
    if let Some(bad) = spans
      .iter()
      .find(|s| !s.duration_ms.is_finite() || s.duration_ms < 0.0)
    {
      return Err(EngineError::validation(
        "duration_ms",
        &format!("trace {} has duration {}", bad.trace_id, bad.duration_ms),
      ));
    }
    let analysis = traces::analyze(spans, service, &self.config.traces);
    debug!(
      traces = analysis.trace_count,
      p95_ms = analysis.p95_latency_ms,
      bottlenecks = analysis.bottlenecks.len(),
      "traces analyzed"
    );
    Ok(analysis)
  }

  /// Query logs and metrics for `range` (or use `provided` lines) and build a snapshot.
  async fn observe(
    &self,
    range: TimeRange,
    filter: &LogFilter,
    provided: Option<Vec<LogLine>>,
    baseline: Option<&HealthSnapshot>,
    thresholds: &AnomalyThresholds,
    now: DateTime<Utc>,
  ) -> HealthSnapshot {
    let eps = self.config.monitor.epsilon;
    let lines = match provided {
      Some(lines) => Some(lines),
      None => self.capabilities.query_logs(&range, filter).await,
    };
    let summary = lines.map(|l| logs::summarize(&l, None));
    if summary.as_ref().is_some_and(|s| s.total == 0) {
      debug!(error = %EngineError::DataQuality("no log lines in range".into()), "empty log window");
    }

    let mut snapshot = match &summary {
      Some(s) => snapshot_from(s, Some(now)),
      None => HealthSnapshot {
        taken_at: Some(now),
        ..HealthSnapshot::default()
      },
    };
    if let Some(s) = &summary {
      snapshot.anomalies = anomaly::analyze(s, baseline, thresholds, eps);
      snapshot.spike_score = match (s.error_rate(), baseline.and_then(|b| b.error_rate)) {
        (Some(c), Some(b)) => Some(logs::spike_score(c, b, thresholds.spike_saturation_ratio, eps)),
        _ => None,
      };
    }

    let mcfg = &self.config.monitor;
    snapshot.metric_error_rate = self
      .capabilities
      .query_metric(&mcfg.metric_error_rate_query, &range)
      .await
      .and_then(|ts| ts.mean());
    snapshot.metric_latency_p95 = self
      .capabilities
      .query_metric(&mcfg.metric_latency_query, &range)
      .await
      .and_then(|ts| ts.latest());
    snapshot
  }

  // -------------------------------------------------------------------------
  // Incidents
  // -------------------------------------------------------------------------

  pub async fn record_incident(&self, incident: Incident) -> Result<IncidentAck> {
    self.record_incident_at(incident, Utc::now()).await
  }

  /// Record an incident. The root-cause commit's features are computed lazily
  /// and their tags and author merged into the incident before it is stored.
  #[instrument(skip(self, incident), fields(incident_id = %incident.id))]
  pub async fn record_incident_at(
    &self,
    mut incident: Incident,
    now: DateTime<Utc>,
  ) -> Result<IncidentAck> {
    if incident.id.trim().is_empty() {
      return Err(EngineError::validation("id", "must not be empty"));
    }
    if let Some(root) = incident.root_cause.clone() {
      let features = match self.memory.cached_commit(&root).await {
        Some(record) => record.features,
        None => {
          let features = self.extract_features(&root, None).await;
          self.score_features(features.clone(), now).await;
          features
        }
      };
      incident.tags.extend(features.risky_tags.iter().cloned());
      if incident.author.is_none() {
        incident.author = features.author.clone();
      }
    }

    let patterns = self.memory.record_incident(&incident).await?;
    let recorded = !patterns.is_empty() || incident.tags.is_empty();
    info!(
      severity = ?incident.severity,
      tags = incident.tags.len(),
      recorded,
      "incident recorded"
    );
    Ok(IncidentAck {
      incident_id: incident.id,
      recorded,
      tags: incident.tags,
      patterns,
    })
  }

  /// Recently analyzed commits ranked as suspects for an incident at `incident_time`.
  #[instrument(skip(self, error_logs), fields(lines = error_logs.len()))]
  pub async fn suspect_commits(
    &self,
    incident_time: DateTime<Utc>,
    error_logs: &[LogLine],
  ) -> Vec<SuspectedCause> {
    let cfg = &self.config.correlation;
    let mut categories: BTreeMap<ErrorCategory, u64> = BTreeMap::new();
    for line in error_logs.iter().filter(|l| l.level.is_error()) {
      if let Some(cat) = normalize::categorize(&line.message) {
        *categories.entry(cat).or_default() += 1;
      }
    }

    let lookback = Duration::minutes((cfg.lookback_hours * 60.0).round() as i64);
    let commits = self.memory.commits_since(incident_time - lookback).await;
    let tag_confidence: BTreeMap<String, f64> = self
      .memory
      .patterns()
      .await
      .into_iter()
      .filter(|p| p.occurrence_count > 0)
      .map(|p| (p.tag, p.confidence))
      .collect();

    let suspects =
      correlation::rank_suspects(&commits, &incident_time, &categories, &tag_confidence, cfg);
    debug!(candidates = commits.len(), suspects = suspects.len(), "suspects ranked");
    suspects
  }

  // -------------------------------------------------------------------------
  // Deployment monitoring
  // -------------------------------------------------------------------------

  pub async fn start_monitoring(
    &self,
    deployment_id: &str,
    commit: Option<CommitRef>,
    duration_secs: Option<i64>,
    filter: LogFilter,
  ) -> Result<String> {
    self
      .start_monitoring_at(deployment_id, commit, duration_secs, filter, Utc::now())
      .await
  }

  /// Open a monitoring window for a deployment and capture its baseline.
  #[instrument(skip(self, filter))]
  pub async fn start_monitoring_at(
    &self,
    deployment_id: &str,
    commit: Option<CommitRef>,
    duration_secs: Option<i64>,
    filter: LogFilter,
    now: DateTime<Utc>,
  ) -> Result<String> {
    let mcfg = &self.config.monitor;
    if deployment_id.trim().is_empty() {
      return Err(EngineError::validation("deployment_id", "must not be empty"));
    }
    let duration_secs = duration_secs.unwrap_or(mcfg.default_duration_secs);
    if duration_secs <= 0 {
      return Err(EngineError::validation("duration", "must be positive"));
    }

    let (features, incident_probability) = match &commit {
      Some(c) => match self.memory.cached_commit(c).await {
        Some(record) => (Some(record.features), Some(record.incident_probability)),
        None => {
          let features = self.extract_features(c, None).await;
          let verdict = self.score_features(features.clone(), now).await;
          (Some(features), Some(verdict.incident_probability))
        }
      },
      None => (None, None),
    };

    let (thresholds, degradation_threshold) = monitor::tighten(
      &self.config.anomaly,
      mcfg.degradation_threshold_percent,
      incident_probability,
      mcfg,
    );

    let baseline_range = TimeRange::new(now - Duration::seconds(mcfg.baseline_lookback_secs), now);
    let baseline = self
      .observe(baseline_range, &filter, None, None, &thresholds, now)
      .await;
    if !baseline.has_log_data() && baseline.metric_error_rate.is_none() {
      warn!(deployment_id, "no baseline data; degradation checks disabled for this window");
    }

    let window = DeploymentWindow {
      window_id: fingerprint::window_id(deployment_id, &now),
      deployment_id: deployment_id.to_string(),
      commit,
      features,
      incident_probability,
      baseline,
      started_at: now,
      duration_secs,
      snapshots: Vec::new(),
      status: WindowStatus::Open,
      closed_at: None,
      error_rate_threshold: thresholds.error_rate,
      degradation_threshold_percent: degradation_threshold,
      pending_rollback: None,
      filter,
    };
    let handle = self.monitor.insert(window)?;
    let window = handle.lock().await;
    self.memory.save_window(&window).await;
    info!(
      window_id = %window.window_id,
      baseline_error_rate = ?window.baseline.error_rate,
      error_rate_threshold = window.error_rate_threshold,
      degradation_threshold_percent = window.degradation_threshold_percent,
      "monitoring started"
    );
    Ok(window.window_id.clone())
  }

  pub async fn poll_monitoring(
    &self,
    window_id: &str,
    logs: Option<Vec<LogLine>>,
  ) -> Result<MonitoringStatus> {
    self.poll_monitoring_at(window_id, logs, Utc::now()).await
  }

  /// Take one health snapshot for an open window and run the rollback decision table.
  #[instrument(skip(self, logs), fields(provided_lines = logs.as_ref().map(Vec::len)))]
  pub async fn poll_monitoring_at(
    &self,
    window_id: &str,
    logs: Option<Vec<LogLine>>,
    now: DateTime<Utc>,
  ) -> Result<MonitoringStatus> {
    let eps = self.config.monitor.epsilon;
    let handle = self.live_window(window_id).await?;
    let mut window = handle.lock().await;
    if window.status.is_terminal() {
      return Err(EngineError::invalid_state(format!(
        "window {} is {:?}",
        window_id, window.status
      )));
    }

    let thresholds = AnomalyThresholds {
      error_rate: window.error_rate_threshold,
      ..self.config.anomaly.clone()
    };
    let start = window
      .started_at
      .max(now - Duration::seconds(self.config.monitor.poll_lookback_secs));
    let range = TimeRange::new(start, now);
    let filter = window.filter.clone();
    let snapshot = self
      .observe(range, &filter, logs, Some(&window.baseline), &thresholds, now)
      .await;

    let decision = monitor::decide(&PollFacts {
      snapshot: &snapshot,
      degradation_percent: monitor::degradation_percent(
        window.baseline.error_rate,
        snapshot.error_rate,
        eps,
      ),
      metric_degradation_percent: monitor::degradation_percent(
        window.baseline.metric_error_rate,
        snapshot.metric_error_rate,
        eps,
      ),
      threshold_percent: window.degradation_threshold_percent,
      elapsed: window.is_elapsed(now),
    });

    if decision == Decision::CloseHealthy {
      if let Some(features) = &window.features {
        self.memory.record_commit_outcome(features, false, now).await?;
      }
    }

    window.snapshots.push(snapshot);
    match decision {
      Decision::Continue => window.pending_rollback = None,
      Decision::Rollback(rec) => {
        if window.pending_rollback.as_ref() != Some(&rec) {
          warn!(urgency = ?rec.urgency, reason = %rec.reason, "rollback recommended");
        }
        window.pending_rollback = Some(rec);
      }
      Decision::CloseHealthy | Decision::CloseInconclusive => {
        if decision == Decision::CloseInconclusive {
          info!("window elapsed without usable data; closing inconclusive");
        }
        self.close(&mut window, WindowStatus::ClosedHealthy, now);
      }
    }

    self.memory.save_window(&window).await;
    Ok(monitor::status_of(&window, now, eps))
  }

  pub async fn accept_rollback(
    &self,
    window_id: &str,
    incident: Option<Incident>,
  ) -> Result<MonitoringStatus> {
    self.accept_rollback_at(window_id, incident, Utc::now()).await
  }

  /// Record the rollback of a deployment: store the incident (synthesized from
  /// the pending recommendation when none is given) and close the window.
  #[instrument(skip(self, incident))]
  pub async fn accept_rollback_at(
    &self,
    window_id: &str,
    incident: Option<Incident>,
    now: DateTime<Utc>,
  ) -> Result<MonitoringStatus> {
    let handle = self.live_window(window_id).await?;
    let mut window = handle.lock().await;
    if window.status.is_terminal() {
      return Err(EngineError::invalid_state(format!(
        "window {} is {:?}",
        window_id, window.status
      )));
    }

    let incident = match incident {
      Some(mut i) => {
        if i.root_cause.is_none() {
          i.root_cause = window.commit.clone();
        }
        i.tags.extend(window.tags());
        i
      }
      None => synthesize_incident(&window, now),
    };
    self.record_incident_at(incident, now).await?;

    self.close(&mut window, WindowStatus::ClosedRolledBack, now);
    self.memory.save_window(&window).await;
    Ok(monitor::status_of(&window, now, self.config.monitor.epsilon))
  }

  /// Cancel monitoring. Stopping a closed window is a no-op.
  #[instrument(skip(self))]
  pub async fn stop_monitoring(&self, window_id: &str) -> Result<MonitoringStatus> {
    let now = Utc::now();
    let eps = self.config.monitor.epsilon;
    let Ok(handle) = self.monitor.get(window_id) else {
      return self.stored_status(window_id, now).await;
    };
    let mut window = handle.lock().await;
    if window.status == WindowStatus::Open {
      self.close(&mut window, WindowStatus::Cancelled, now);
      self.memory.save_window(&window).await;
    }
    Ok(monitor::status_of(&window, now, eps))
  }

  /// Status of a live window, or of a closed one already dropped from the registry.
  pub async fn window_status(&self, window_id: &str) -> Result<MonitoringStatus> {
    let now = Utc::now();
    match self.monitor.get(window_id) {
      Ok(handle) => {
        let window = handle.lock().await;
        Ok(monitor::status_of(&window, now, self.config.monitor.epsilon))
      }
      Err(_) => self.stored_status(window_id, now).await,
    }
  }

  async fn stored_status(&self, window_id: &str, now: DateTime<Utc>) -> Result<MonitoringStatus> {
    match self.memory.window(window_id).await {
      Some(window) => Ok(monitor::status_of(&window, now, self.config.monitor.epsilon)),
      None => Err(EngineError::not_found(format!("window {}", window_id))),
    }
  }

  /// Registry handle for a window that can still change. A window that was
  /// dropped from the registry after closing is `InvalidState`, an unknown id
  /// `NotFound`.
  async fn live_window(&self, window_id: &str) -> Result<WindowHandle> {
    let missing = match self.monitor.get(window_id) {
      Ok(handle) => return Ok(handle),
      Err(e) => e,
    };
    match self.memory.window(window_id).await {
      Some(window) => Err(EngineError::invalid_state(format!(
        "window {} is {:?}",
        window_id, window.status
      ))),
      None => Err(missing),
    }
  }

  pub fn open_window_ids(&self) -> Vec<String> {
    self.monitor.open_window_ids()
  }

  /// Windows held in the live registry, open or recently closed.
  pub fn tracked_windows(&self) -> usize {
    self.monitor.len()
  }

  /// Close every elapsed open window without a pending rollback, then drop
  /// windows closed longer than the retention period from the registry.
  /// Returns the ids that were closed.
  pub async fn expire_windows(&self, now: DateTime<Utc>) -> Vec<String> {
    let mut closed = Vec::new();
    for window_id in self.monitor.open_window_ids() {
      let Ok(handle) = self.monitor.get(&window_id) else {
        continue;
      };
      let mut window = handle.lock().await;
      if window.status != WindowStatus::Open
        || !window.is_elapsed(now)
        || window.pending_rollback.is_some()
      {
        continue;
      }
      let had_data = window
        .snapshots
        .iter()
        .any(|s| s.has_log_data() || s.metric_error_rate.is_some());
      if had_data {
        if let Some(features) = &window.features {
          if let Err(e) = self.memory.record_commit_outcome(features, false, now).await {
            warn!(window_id = %window_id, error = %e, "outcome not recorded; window stays open");
            continue;
          }
        }
      }
      self.close(&mut window, WindowStatus::ClosedHealthy, now);
      self.memory.save_window(&window).await;
      closed.push(window_id);
    }

    let cutoff = now - Duration::seconds(self.config.monitor.closed_retention_secs.max(0));
    let evicted = self.monitor.evict_closed(cutoff);
    if evicted > 0 {
      debug!(evicted, live = self.monitor.len(), "closed windows dropped from registry");
    }
    closed
  }

  fn close(&self, window: &mut DeploymentWindow, status: WindowStatus, now: DateTime<Utc>) {
    window.status = status;
    window.closed_at = Some(now);
    window.pending_rollback = None;
    self.monitor.release(&window.deployment_id, &window.window_id);
    info!(
      window_id = %window.window_id,
      deployment_id = %window.deployment_id,
      status = ?status,
      snapshots = window.snapshots.len(),
      "monitoring window closed"
    );
  }
}

/// Snapshot fields derivable from a log summary alone.
fn snapshot_from(summary: &LogSummary, taken_at: Option<DateTime<Utc>>) -> HealthSnapshot {
  HealthSnapshot {
    taken_at,
    error_rate: summary.error_rate(),
    error_count: summary.error_count,
    total_logs: summary.total,
    error_patterns: summary.error_patterns.keys().cloned().collect::<BTreeSet<_>>(),
    categories: summary.categories.clone(),
    ..HealthSnapshot::default()
  }
}

/// Incident for an accepted rollback that came without one.
fn synthesize_incident(window: &DeploymentWindow, now: DateTime<Utc>) -> Incident {
  let severity = match window.pending_rollback.as_ref().map(|r| r.urgency) {
    Some(Urgency::Immediate) => IncidentSeverity::P1,
    Some(Urgency::Scheduled) => IncidentSeverity::P2,
    None => IncidentSeverity::P3,
  };
  let mut description = match &window.pending_rollback {
    Some(rec) => format!("Rollback of deployment {}: {}", window.deployment_id, rec.reason),
    None => format!("Rollback of deployment {}", window.deployment_id),
  };
  if let Some(latest) = window.snapshots.last() {
    let cats: Vec<String> = latest
      .categories
      .iter()
      .map(|(cat, n)| format!("{cat} ({n})"))
      .collect();
    if !cats.is_empty() {
      description.push_str(&format!("; errors: {}", cats.join(", ")));
    }
  }
  Incident {
    id: fingerprint::synthesized_incident_id(&window.window_id),
    severity,
    description,
    root_cause: window.commit.clone(),
    tags: window.tags(),
    author: window.features.as_ref().and_then(|f| f.author.clone()),
    occurred_at: now,
  }
}
