//! Core types for the intelligence engine (JSON contracts + internal models).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub use feature_engine::{CommitFeatures, Provenance};

// ---------------------------------------------------------------------------
// Commits
// ---------------------------------------------------------------------------

/// Reference to one commit in one repository.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CommitRef {
  pub repository: String,
  pub commit_hash: String,
}

impl CommitRef {
  pub fn new(repository: impl Into<String>, commit_hash: impl Into<String>) -> Self {
    Self {
      repository: repository.into(),
      commit_hash: commit_hash.into(),
    }
  }
}

impl std::fmt::Display for CommitRef {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}@{}", self.repository, self.commit_hash)
  }
}

/// Cached analysis of one commit: the immutable features plus the latest verdict numbers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitRecord {
  pub features: CommitFeatures,
  pub risk_score: f64,
  pub incident_probability: f64,
  pub analyzed_at: DateTime<Utc>,
}

impl CommitRecord {
  pub fn commit_ref(&self) -> CommitRef {
    CommitRef::new(&self.features.repository, &self.features.commit_hash)
  }
}

// ---------------------------------------------------------------------------
// Incidents, outcomes, patterns
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IncidentSeverity {
  P1,
  P2,
  P3,
  P4,
}

impl IncidentSeverity {
  pub fn from_str_loose(s: &str) -> Option<Self> {
    match s.to_ascii_lowercase().as_str() {
      "p1" | "sev1" | "critical" => Some(Self::P1),
      "p2" | "sev2" | "high" => Some(Self::P2),
      "p3" | "sev3" | "medium" => Some(Self::P3),
      "p4" | "sev4" | "low" => Some(Self::P4),
      _ => None,
    }
  }

  /// Most severe of two (P1 wins).
  pub fn worst(self, other: Self) -> Self {
    self.min(other)
  }
}

/// Immutable incident record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
  pub id: String,
  pub severity: IncidentSeverity,
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub root_cause: Option<CommitRef>,
  #[serde(default)]
  pub tags: BTreeSet<String>,
  /// Author of the root-cause commit, filled in from its features when known.
  #[serde(default)]
  pub author: Option<String>,
  pub occurred_at: DateTime<Utc>,
}

/// Observed result of shipping one commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitOutcome {
  pub commit: CommitRef,
  pub author: Option<String>,
  pub tags: BTreeSet<String>,
  pub incident_occurred: bool,
  pub observed_at: DateTime<Utc>,
}

/// One entry of the append-only observation log. Pattern statistics are a pure
/// function of this log and can be rebuilt by replaying it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Observation {
  Incident(Incident),
  Outcome(CommitOutcome),
}

impl Observation {
  pub fn tags(&self) -> &BTreeSet<String> {
    match self {
      Self::Incident(i) => &i.tags,
      Self::Outcome(o) => &o.tags,
    }
  }

  pub fn is_incident(&self) -> bool {
    match self {
      Self::Incident(_) => true,
      Self::Outcome(o) => o.incident_occurred,
    }
  }

  pub fn author(&self) -> Option<&str> {
    match self {
      Self::Incident(i) => i.author.as_deref(),
      Self::Outcome(o) => o.author.as_deref(),
    }
  }

  pub fn at(&self) -> DateTime<Utc> {
    match self {
      Self::Incident(i) => i.occurred_at,
      Self::Outcome(o) => o.observed_at,
    }
  }

  pub fn severity(&self) -> Option<IncidentSeverity> {
    match self {
      Self::Incident(i) => Some(i.severity),
      Self::Outcome(_) => None,
    }
  }
}

/// Raw per-tag counters as persisted by a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternCounts {
  pub tag: String,
  pub occurrence_count: u64,
  pub incident_count: u64,
  pub typical_impact: Option<IncidentSeverity>,
  pub last_seen: Option<DateTime<Utc>>,
}

impl PatternCounts {
  pub fn new(tag: impl Into<String>) -> Self {
    Self {
      tag: tag.into(),
      occurrence_count: 0,
      incident_count: 0,
      typical_impact: None,
      last_seen: None,
    }
  }

  /// Fold one observation into the counters.
  pub fn record(&mut self, obs: &Observation) {
    self.occurrence_count += 1;
    if obs.is_incident() {
      self.incident_count += 1;
    }
    if let Some(sev) = obs.severity() {
      self.typical_impact = Some(match self.typical_impact {
        Some(prev) => prev.worst(sev),
        None => sev,
      });
    }
    let at = obs.at();
    if self.last_seen.map_or(true, |prev| at > prev) {
      self.last_seen = Some(at);
    }
  }
}

/// Pattern statistics with the derived confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
  pub tag: String,
  pub occurrence_count: u64,
  pub incident_count: u64,
  /// Laplace-smoothed incident_count / occurrence_count, always in [0,1].
  pub confidence: f64,
  pub typical_impact: Option<IncidentSeverity>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarIncident {
  pub incident_id: String,
  pub severity: IncidentSeverity,
  pub description: String,
  pub shared_tags: Vec<String>,
  pub occurred_at: DateTime<Utc>,
}

/// Author track record over a trailing window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthorHistory {
  pub commits: u64,
  pub incidents: u64,
  pub incident_rate: f64,
}

// ---------------------------------------------------------------------------
// Risk verdict
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExpectedImpact {
  Low,
  Medium,
  High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecommendedAction {
  Proceed,
  ProceedWithCaution,
  StagedRollout,
  Block,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternMatch {
  pub tag: String,
  /// Learned confidence; the prior (0.5) when the tag has never been seen.
  pub confidence: f64,
  pub occurrence_count: u64,
  pub incident_count: u64,
  pub seen: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskVerdict {
  pub repository: String,
  pub commit_hash: String,
  pub risk_score: f64,
  pub structural_score: f64,
  pub confidence: f64,
  pub complexity: f64,
  pub blast_radius: u32,
  pub incident_probability: f64,
  pub expected_impact: ExpectedImpact,
  pub likely_failure_mode: Option<String>,
  pub similar_incidents: Vec<SimilarIncident>,
  pub pattern_matches: Vec<PatternMatch>,
  pub recommended_action: RecommendedAction,
  pub recommendations: Vec<String>,
  pub watch_metrics: Vec<String>,
  pub monitoring_window_minutes: u32,
  /// True when neither tag nor author history informed the score.
  pub structural_only: bool,
  pub provenance: Provenance,
  pub features: CommitFeatures,
}

// ---------------------------------------------------------------------------
// Logs and metrics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
  Debug,
  Info,
  Warn,
  Error,
  Unknown,
}

impl LogLevel {
  pub fn from_str_loose(s: &str) -> Self {
    match s.trim().to_ascii_lowercase().as_str() {
      "error" | "err" | "critical" | "crit" | "fatal" | "panic" | "alert" | "emerg" => Self::Error,
      "warn" | "warning" => Self::Warn,
      "info" | "notice" | "information" => Self::Info,
      "debug" | "trace" => Self::Debug,
      _ => Self::Unknown,
    }
  }

  pub fn is_error(self) -> bool {
    self == Self::Error
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogLine {
  pub timestamp: DateTime<Utc>,
  pub level: LogLevel,
  pub message: String,
  #[serde(default)]
  pub service: Option<String>,
}

impl LogLine {
  pub fn new(timestamp: DateTime<Utc>, level: LogLevel, message: impl Into<String>) -> Self {
    Self {
      timestamp,
      level,
      message: message.into(),
      service: None,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
  pub start: DateTime<Utc>,
  pub end: DateTime<Utc>,
}

impl TimeRange {
  pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
    Self { start, end }
  }

  pub fn contains(&self, ts: &DateTime<Utc>) -> bool {
    *ts >= self.start && *ts <= self.end
  }
}

/// Log query narrowing; all fields optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogFilter {
  #[serde(default)]
  pub service: Option<String>,
  /// Backend-native selector (e.g. a LogQL stream selector).
  #[serde(default)]
  pub query: Option<String>,
  #[serde(default)]
  pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
  pub points: Vec<(DateTime<Utc>, f64)>,
}

impl TimeSeries {
  pub fn mean(&self) -> Option<f64> {
    let finite: Vec<f64> = self.points.iter().map(|(_, v)| *v).filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
      return None;
    }
    Some(finite.iter().sum::<f64>() / finite.len() as f64)
  }

  pub fn latest(&self) -> Option<f64> {
    self
      .points
      .iter()
      .filter(|(_, v)| v.is_finite())
      .max_by_key(|(ts, _)| *ts)
      .map(|(_, v)| *v)
  }
}

/// Repeated occurrences of one normalized error message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPattern {
  pub fingerprint: String,
  pub normalized: String,
  pub sample: String,
  pub count: u64,
  pub category: Option<String>,
}

/// Log Aggregator output for one window of log lines.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogSummary {
  pub total: u64,
  pub error_count: u64,
  pub warn_count: u64,
  pub level_counts: BTreeMap<LogLevel, u64>,
  /// Error patterns keyed by fingerprint.
  pub error_patterns: BTreeMap<String, ErrorPattern>,
  /// Error counts per category.
  pub categories: BTreeMap<String, u64>,
  pub range: Option<TimeRange>,
}

impl LogSummary {
  /// None when the window holds no lines at all.
  pub fn error_rate(&self) -> Option<f64> {
    if self.total == 0 {
      None
    } else {
      Some(self.error_count as f64 / self.total as f64)
    }
  }
}

// ---------------------------------------------------------------------------
// Anomalies and health
// ---------------------------------------------------------------------------

/// Declaration order is the output priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
  HighErrorRate,
  RepeatedError,
  NewErrorPattern,
  Spike,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalySeverity {
  Medium,
  High,
  Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
  #[serde(rename = "type", alias = "kind")]
  pub kind: AnomalyKind,
  pub severity: AnomalySeverity,
  pub message: String,
  /// Stable key within a kind (fingerprint, or the metric name).
  pub key: String,
  pub value: f64,
  pub threshold: f64,
}

/// Point-in-time health of a deployment. Unavailable readings are None, never zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
  pub taken_at: Option<DateTime<Utc>>,
  pub error_rate: Option<f64>,
  pub error_count: u64,
  pub total_logs: u64,
  pub anomalies: Vec<Anomaly>,
  pub spike_score: Option<f64>,
  pub metric_error_rate: Option<f64>,
  pub metric_latency_p95: Option<f64>,
  /// Fingerprints of error patterns seen in this window.
  pub error_patterns: BTreeSet<String>,
  pub categories: BTreeMap<String, u64>,
}

impl HealthSnapshot {
  pub fn has_log_data(&self) -> bool {
    self.error_rate.is_some()
  }

  pub fn has_critical(&self) -> bool {
    self
      .anomalies
      .iter()
      .any(|a| a.severity == AnomalySeverity::Critical)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
  Healthy,
  Degraded,
  Unhealthy,
  Critical,
  Unknown,
}

// ---------------------------------------------------------------------------
// Deployment windows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WindowStatus {
  Open,
  ClosedHealthy,
  ClosedRolledBack,
  Cancelled,
}

impl WindowStatus {
  pub fn is_terminal(self) -> bool {
    self != Self::Open
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Urgency {
  Scheduled,
  Immediate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackRecommendation {
  pub urgency: Urgency,
  pub reason: String,
}

/// One monitored deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentWindow {
  pub window_id: String,
  pub deployment_id: String,
  pub commit: Option<CommitRef>,
  /// Features of the deployed commit, captured when the window opened.
  pub features: Option<CommitFeatures>,
  pub incident_probability: Option<f64>,
  pub baseline: HealthSnapshot,
  pub started_at: DateTime<Utc>,
  pub duration_secs: i64,
  pub snapshots: Vec<HealthSnapshot>,
  pub status: WindowStatus,
  pub closed_at: Option<DateTime<Utc>>,
  /// Risk-tightened error-rate threshold for this window.
  pub error_rate_threshold: f64,
  pub degradation_threshold_percent: f64,
  pub pending_rollback: Option<RollbackRecommendation>,
  #[serde(default)]
  pub filter: LogFilter,
}

impl DeploymentWindow {
  pub fn ends_at(&self) -> DateTime<Utc> {
    self.started_at + chrono::Duration::seconds(self.duration_secs)
  }

  pub fn is_elapsed(&self, now: DateTime<Utc>) -> bool {
    now >= self.ends_at()
  }

  pub fn tags(&self) -> BTreeSet<String> {
    self
      .features
      .as_ref()
      .map(|f| f.risky_tags.clone())
      .unwrap_or_default()
  }
}

/// Result of a poll (or of any query about a window).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringStatus {
  pub window_id: String,
  pub deployment_id: String,
  pub status: WindowStatus,
  pub health: HealthStatus,
  pub snapshot: Option<HealthSnapshot>,
  pub baseline_error_rate: Option<f64>,
  pub degradation_percent: Option<f64>,
  pub metric_degradation_percent: Option<f64>,
  pub rollback_recommended: bool,
  pub urgency: Option<Urgency>,
  pub reasons: Vec<String>,
  pub elapsed_secs: i64,
  pub remaining_secs: i64,
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
  Commits,
  Logs,
  Metrics,
}

impl Capability {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Commits => "commits",
      Self::Logs => "logs",
      Self::Metrics => "metrics",
    }
  }
}

/// Subset of {commits, logs, metrics} currently reachable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
  pub fn empty() -> Self {
    Self::default()
  }

  pub fn has(&self, cap: Capability) -> bool {
    self.0.contains(&cap)
  }

  pub fn insert(&mut self, cap: Capability) {
    self.0.insert(cap);
  }

  pub fn remove(&mut self, cap: Capability) -> bool {
    self.0.remove(&cap)
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
    self.0.iter().copied()
  }
}

impl FromIterator<Capability> for CapabilitySet {
  fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
    Self(iter.into_iter().collect())
  }
}

// ---------------------------------------------------------------------------
// Correlation output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspectedCause {
  pub repository: String,
  pub commit_hash: String,
  pub score: f64,
  pub evidence: Vec<String>,
}

// ---------------------------------------------------------------------------
// Entry-point results
// ---------------------------------------------------------------------------

/// Acknowledgement of a recorded incident with the pattern counters it touched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentAck {
  pub incident_id: String,
  /// False when an incident with this id was already recorded.
  pub recorded: bool,
  pub tags: BTreeSet<String>,
  pub patterns: Vec<Pattern>,
}

/// Ad-hoc log analysis (no deployment window involved).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogAnalysis {
  pub summary: LogSummary,
  pub error_rate: Option<f64>,
  pub anomalies: Vec<Anomaly>,
  pub spike_score: Option<f64>,
}

// ---------------------------------------------------------------------------
// Traces
// ---------------------------------------------------------------------------

/// One finished trace (or root span) as reported by a tracing backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceSpan {
  pub trace_id: String,
  #[serde(default)]
  pub service: Option<String>,
  #[serde(default)]
  pub operation: Option<String>,
  pub duration_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlowTrace {
  pub trace_id: String,
  pub service: Option<String>,
  pub operation: Option<String>,
  pub duration_ms: f64,
}

/// An operation whose mean latency sits close to the batch's tail latency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bottleneck {
  pub operation: String,
  pub avg_duration_ms: f64,
  pub count: u64,
}

/// Latency summary of a batch of traces.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceAnalysis {
  pub trace_count: u64,
  pub p50_latency_ms: f64,
  pub p95_latency_ms: f64,
  /// Slowest traces above the p95 latency, slowest first.
  pub slow_traces: Vec<SlowTrace>,
  /// Slowest operations first.
  pub bottlenecks: Vec<Bottleneck>,
}

// ---------------------------------------------------------------------------
// Error wrapper
// ---------------------------------------------------------------------------

/// Structured error body for rejected requests.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorOutput {
  pub error: bool,
  pub message: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub field: Option<String>,
}

impl ErrorOutput {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      error: true,
      message: message.into(),
      field: None,
    }
  }

  pub fn with_field(mut self, field: impl Into<String>) -> Self {
    self.field = Some(field.into());
    self
  }
}
