//! Integration tests for the intelligence engine: fake backends, in-memory store.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use feature_engine::{AuthorStats, CommitInput, FileStat};
use intelligence_engine::{
  Backends, Capability, CommitRef, CommitSource, EngineConfig, EngineError, Engine, InMemoryStore,
  Incident, IncidentSeverity, LogFilter, LogLevel, LogLine, LogSource, MetricSource, Result,
  TimeRange, TimeSeries, TraceSpan, Urgency, WindowStatus,
};
use parking_lot::Mutex;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeCommits {
  commits: HashMap<String, CommitInput>,
  /// Hashes newest first; later inputs are newer.
  history: Mutex<Vec<String>>,
}

impl FakeCommits {
  fn with(inputs: Vec<CommitInput>) -> Self {
    let history = inputs.iter().rev().map(|c| c.commit_hash.clone()).collect();
    Self {
      commits: inputs.into_iter().map(|c| (c.commit_hash.clone(), c)).collect(),
      history: Mutex::new(history),
    }
  }

  fn push(&mut self, input: CommitInput) {
    self.history.lock().insert(0, input.commit_hash.clone());
    self.commits.insert(input.commit_hash.clone(), input);
  }
}

#[async_trait]
impl CommitSource for FakeCommits {
  fn name(&self) -> &str {
    "fake-git"
  }
  async fn health(&self) -> Result<()> {
    Ok(())
  }
  async fn fetch_commit(&self, _repository: &str, commit_hash: &str) -> Result<CommitInput> {
    self
      .commits
      .get(commit_hash)
      .cloned()
      .ok_or_else(|| EngineError::not_found(format!("commit {commit_hash}")))
  }
  async fn author_stats(&self, _author: &str) -> Result<AuthorStats> {
    Ok(AuthorStats {
      commits_90d: 40,
      avg_files: 4.0,
    })
  }
  async fn recent_commits(&self, limit: usize) -> Result<Vec<String>> {
    Ok(self.history.lock().iter().take(limit).cloned().collect())
  }
}

/// Serves whatever lines were last set, regardless of range.
#[derive(Default)]
struct FakeLogs {
  lines: Mutex<Vec<LogLine>>,
}

impl FakeLogs {
  fn set(&self, lines: Vec<LogLine>) {
    *self.lines.lock() = lines;
  }
}

#[async_trait]
impl LogSource for FakeLogs {
  fn name(&self) -> &str {
    "fake-logs"
  }
  async fn health(&self) -> Result<()> {
    Ok(())
  }
  async fn query(&self, _range: &TimeRange, _filter: &LogFilter) -> Result<Vec<LogLine>> {
    Ok(self.lines.lock().clone())
  }
}

struct Down;

#[async_trait]
impl CommitSource for Down {
  fn name(&self) -> &str {
    "down"
  }
  async fn health(&self) -> Result<()> {
    Err(EngineError::unavailable("down", "connection refused"))
  }
  async fn fetch_commit(&self, _: &str, _: &str) -> Result<CommitInput> {
    Err(EngineError::unavailable("down", "connection refused"))
  }
  async fn author_stats(&self, _: &str) -> Result<AuthorStats> {
    Err(EngineError::unavailable("down", "connection refused"))
  }
}

#[async_trait]
impl LogSource for Down {
  fn name(&self) -> &str {
    "down"
  }
  async fn health(&self) -> Result<()> {
    Err(EngineError::unavailable("down", "connection refused"))
  }
  async fn query(&self, _: &TimeRange, _: &LogFilter) -> Result<Vec<LogLine>> {
    Err(EngineError::unavailable("down", "connection refused"))
  }
}

#[async_trait]
impl MetricSource for Down {
  fn name(&self) -> &str {
    "down"
  }
  async fn health(&self) -> Result<()> {
    Err(EngineError::unavailable("down", "connection refused"))
  }
  async fn query(&self, _: &str, _: &TimeRange) -> Result<TimeSeries> {
    Err(EngineError::unavailable("down", "connection refused"))
  }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn t0() -> DateTime<Utc> {
  Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap()
}

fn detailed(hash: &str, paths: &[&str], added: u32, deleted: u32) -> CommitInput {
  let n = paths.len() as u32;
  CommitInput {
    repository: "acme/api".into(),
    commit_hash: hash.into(),
    message: "feat: add login throttling".into(),
    author: Some("dev@example.com".into()),
    timestamp: Some(t0() - Duration::hours(1)),
    files: Some(
      paths
        .iter()
        .enumerate()
        .map(|(i, p)| {
          let extra_a = if i == 0 { added % n } else { 0 };
          let extra_d = if i == 0 { deleted % n } else { 0 };
          FileStat::new(*p, added / n + extra_a, deleted / n + extra_d)
        })
        .collect(),
    ),
    diff_text: None,
  }
}

fn risky_commit() -> CommitInput {
  detailed(
    "risky01",
    &[
      "auth/login.py",
      "db/migrate_001.sql",
      "src/app/a.py",
      "src/app/b.py",
      "src/app/c.py",
      "src/app/d.py",
      "src/core/e.py",
      "src/core/f.py",
      "lib/g.py",
      "lib/h.py",
      "lib/i.py",
      "lib/j.py",
    ],
    456,
    78,
  )
}

fn safe_commit() -> CommitInput {
  let paths: Vec<String> = (0..12).map(|i| format!("tests/test_mod_{i}.py")).collect();
  let refs: Vec<&str> = paths.iter().map(String::as_str).collect();
  detailed("safe01", &refs, 456, 78)
}

/// `total` lines of which `errors` are errors with `message`; the rest are info.
fn lines(total: usize, errors: usize, message: &str, at: DateTime<Utc>) -> Vec<LogLine> {
  (0..total)
    .map(|i| {
      if i < errors {
        LogLine::new(at, LogLevel::Error, message)
      } else {
        LogLine::new(at, LogLevel::Info, format!("GET /health 200 in {i}ms"))
      }
    })
    .collect()
}

async fn engine_with(backends: Backends) -> Engine {
  Engine::open(EngineConfig::default(), Arc::new(InMemoryStore::new()), backends)
    .await
    .unwrap()
}

async fn monitored_engine() -> (Engine, Arc<FakeLogs>) {
  let logs = Arc::new(FakeLogs::default());
  logs.set(lines(100, 2, "upstream timeout after 30s", t0()));
  let engine = engine_with(Backends {
    commits: Some(Arc::new(FakeCommits::with(vec![risky_commit(), safe_commit()]))),
    logs: Some(logs.clone()),
    metrics: None,
  })
  .await;
  (engine, logs)
}

fn risky_ref() -> CommitRef {
  CommitRef::new("acme/api", "risky01")
}

// ---------------------------------------------------------------------------
// Commit analysis
// ---------------------------------------------------------------------------

#[tokio::test]
async fn risky_commit_outranks_tested_commit() {
  let (engine, _) = monitored_engine().await;
  let risky = engine.analyze_commit_at("acme/api", "risky01", None, t0()).await.unwrap();
  let safe = engine.analyze_commit_at("acme/api", "safe01", None, t0()).await.unwrap();

  let tags: Vec<&str> = risky.features.risky_tags.iter().map(String::as_str).collect();
  assert_eq!(tags, vec!["auth_logic", "db_migration"]);
  assert_eq!(risky.features.test_ratio, 0.0);
  assert_eq!(safe.features.test_ratio, 1.0);
  assert!(safe.features.risky_tags.is_empty());
  assert!(
    risky.risk_score >= safe.risk_score + 2.0,
    "risky {} vs safe {}",
    risky.risk_score,
    safe.risk_score
  );
}

#[tokio::test]
async fn all_backends_down_still_scores() {
  let engine = engine_with(Backends {
    commits: Some(Arc::new(Down)),
    logs: Some(Arc::new(Down)),
    metrics: Some(Arc::new(Down)),
  })
  .await;
  assert!(engine.capability_status().is_empty());

  let verdict = engine.analyze_commit("acme/api", "deadbeef", None).await.unwrap();
  assert!(verdict.structural_only);
  assert!(verdict.confidence <= EngineConfig::default().scoring.cold_start_confidence);
  assert!(verdict.features.is_heuristic());
}

#[tokio::test]
async fn diff_fallback_when_commit_unknown() {
  let (engine, _) = monitored_engine().await;
  let diff = "diff --git a/billing/charge.py b/billing/charge.py\n+++ b/billing/charge.py\n+amount = 1\n";
  let verdict = engine
    .analyze_commit_at("acme/api", "unknown", Some(diff.to_string()), t0())
    .await
    .unwrap();
  assert!(verdict.features.is_heuristic());
  assert!(verdict.features.risky_tags.contains("payment"));
  // An unknown commit does not take the commit source offline.
  assert!(engine.capability_status().has(Capability::Commits));
}

#[tokio::test]
async fn analysis_is_idempotent() {
  let (engine, _) = monitored_engine().await;
  let first = engine.analyze_commit_at("acme/api", "risky01", None, t0()).await.unwrap();
  let second = engine.analyze_commit_at("acme/api", "risky01", None, t0()).await.unwrap();
  assert_eq!(
    serde_json::to_value(&first).unwrap(),
    serde_json::to_value(&second).unwrap()
  );
}

#[tokio::test]
async fn cached_features_survive_a_conflicting_record() {
  let (engine, _) = monitored_engine().await;
  let first = engine.analyze_commit_at("acme/api", "risky01", None, t0()).await.unwrap();

  let mut docs_only = detailed("risky01", &["docs/readme.md"], 3, 0);
  docs_only.message = "docs: typo".into();
  let replayed = engine
    .analyze_input(docs_only, t0() + Duration::minutes(5))
    .await
    .unwrap();
  assert_eq!(replayed.features, first.features);

  let again = engine
    .analyze_commit_at("acme/api", "risky01", None, t0() + Duration::minutes(10))
    .await
    .unwrap();
  assert_eq!(again.features, first.features);
  assert_eq!(again.features.files_changed, 12);
  assert!(again.features.risky_tags.contains("auth_logic"));
}

#[tokio::test]
async fn commit_poll_analyzes_only_new_commits() {
  let mut source = FakeCommits::with(vec![safe_commit(), risky_commit()]);
  source.push(detailed("hotfix01", &["billing/charge.py"], 4, 1));
  let engine = engine_with(Backends {
    commits: Some(Arc::new(source)),
    logs: None,
    metrics: None,
  })
  .await;

  let first = engine.analyze_new_commits("acme/api", None, 10).await.unwrap();
  let hashes: Vec<&str> = first.iter().map(|v| v.commit_hash.as_str()).collect();
  assert_eq!(hashes, vec!["safe01", "risky01", "hotfix01"]);

  let again = engine
    .analyze_new_commits("acme/api", Some("hotfix01"), 10)
    .await
    .unwrap();
  assert!(again.is_empty());
  let since_risky = engine
    .analyze_new_commits("acme/api", Some("risky01"), 10)
    .await
    .unwrap();
  assert_eq!(since_risky.len(), 1);
  assert_eq!(since_risky[0].commit_hash, "hotfix01");
  assert!(since_risky[0].features.risky_tags.contains("payment"));
}

#[tokio::test]
async fn commit_poll_without_a_source_is_a_no_op() {
  let engine = engine_with(Backends::none()).await;
  assert!(engine.analyze_new_commits("acme/api", None, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn empty_commit_hash_is_rejected() {
  let (engine, _) = monitored_engine().await;
  let err = engine.analyze_commit("acme/api", "  ", None).await.unwrap_err();
  assert!(matches!(err, EngineError::Validation { .. }));
}

// ---------------------------------------------------------------------------
// Incidents and memory
// ---------------------------------------------------------------------------

fn incident(id: &str, tags: &[&str], root: Option<CommitRef>) -> Incident {
  Incident {
    id: id.into(),
    severity: IncidentSeverity::P2,
    description: "login failures".into(),
    root_cause: root,
    tags: tags.iter().map(|t| t.to_string()).collect(),
    author: None,
    occurred_at: t0(),
  }
}

#[tokio::test]
async fn first_incident_confidence_is_smoothed() {
  let engine = engine_with(Backends::none()).await;
  let ack = engine.record_incident(incident("inc-1", &["auth_logic"], None)).await.unwrap();
  assert!(ack.recorded);
  let p = &ack.patterns[0];
  assert_eq!(p.tag, "auth_logic");
  assert_eq!((p.occurrence_count, p.incident_count), (1, 1));
  assert!(p.confidence < 1.0);
  assert!((p.confidence - 2.0 / 3.0).abs() < 1e-9);
}

#[tokio::test]
async fn duplicate_incident_is_acknowledged_once() {
  let engine = engine_with(Backends::none()).await;
  engine.record_incident(incident("inc-1", &["payment"], None)).await.unwrap();
  let again = engine.record_incident(incident("inc-1", &["payment"], None)).await.unwrap();
  assert!(!again.recorded);
  let p = engine.memory().pattern("payment").await.unwrap();
  assert_eq!(p.occurrence_count, 1);
}

#[tokio::test]
async fn root_cause_tags_flow_into_the_incident() {
  let (engine, _) = monitored_engine().await;
  let ack = engine
    .record_incident_at(incident("inc-2", &[], Some(risky_ref())), t0())
    .await
    .unwrap();
  let expected: BTreeSet<String> = ["auth_logic", "db_migration"].iter().map(|s| s.to_string()).collect();
  assert_eq!(ack.tags, expected);

  let verdict = engine.analyze_commit_at("acme/api", "risky01", None, t0()).await.unwrap();
  assert!(verdict.pattern_matches.iter().all(|m| m.seen));
  assert_eq!(verdict.similar_incidents[0].incident_id, "inc-2");
  assert!(!verdict.structural_only);
}

#[tokio::test]
async fn empty_incident_id_is_rejected() {
  let engine = engine_with(Backends::none()).await;
  let err = engine.record_incident(incident("", &["payment"], None)).await.unwrap_err();
  assert!(matches!(err, EngineError::Validation { .. }));
}

// ---------------------------------------------------------------------------
// Deployment monitoring
// ---------------------------------------------------------------------------

#[tokio::test]
async fn critical_errors_recommend_immediate_rollback_and_learn() {
  let (engine, _) = monitored_engine().await;
  let id = engine
    .start_monitoring_at("deploy-1", Some(risky_ref()), Some(600), LogFilter::default(), t0())
    .await
    .unwrap();

  let bad = lines(100, 67, "connection refused: database pool exhausted", t0());
  let status = engine
    .poll_monitoring_at(&id, Some(bad), t0() + Duration::seconds(60))
    .await
    .unwrap();
  assert_eq!(status.status, WindowStatus::Open);
  assert!(status.rollback_recommended);
  assert_eq!(status.urgency, Some(Urgency::Immediate));
  assert_eq!(status.baseline_error_rate, Some(0.02));
  assert_eq!(status.degradation_percent, Some(3250.0));

  let closed = engine
    .accept_rollback_at(&id, None, t0() + Duration::seconds(90))
    .await
    .unwrap();
  assert_eq!(closed.status, WindowStatus::ClosedRolledBack);
  assert!(!closed.rollback_recommended);

  let p = engine.memory().pattern("auth_logic").await.unwrap();
  assert_eq!((p.occurrence_count, p.incident_count), (1, 1));
  assert_eq!(p.typical_impact, Some(IncidentSeverity::P1));

  let err = engine
    .poll_monitoring_at(&id, None, t0() + Duration::seconds(120))
    .await
    .unwrap_err();
  assert!(matches!(err, EngineError::InvalidState(_)));
  assert!(engine.open_window_ids().is_empty());
}

#[tokio::test]
async fn repeat_rollbacks_of_one_deployment_each_count() {
  let (engine, _) = monitored_engine().await;
  let bad = || lines(100, 67, "connection refused: database pool exhausted", t0());

  for (i, start) in [t0(), t0() + Duration::minutes(30)].into_iter().enumerate() {
    let id = engine
      .start_monitoring_at("deploy-9", Some(risky_ref()), Some(600), LogFilter::default(), start)
      .await
      .unwrap();
    let status = engine
      .poll_monitoring_at(&id, Some(bad()), start + Duration::seconds(60))
      .await
      .unwrap();
    assert!(status.rollback_recommended, "cycle {i}");
    engine
      .accept_rollback_at(&id, None, start + Duration::seconds(90))
      .await
      .unwrap();
  }

  let p = engine.memory().pattern("auth_logic").await.unwrap();
  assert_eq!((p.occurrence_count, p.incident_count), (2, 2));
  let similar = engine
    .memory()
    .similar_incidents(&BTreeSet::from(["auth_logic".to_string()]), 5)
    .await;
  assert_eq!(similar.len(), 2);
  assert_ne!(similar[0].incident_id, similar[1].incident_id);
}

#[tokio::test]
async fn quiet_window_closes_healthy_and_records_outcome() {
  let (engine, logs) = monitored_engine().await;
  let id = engine
    .start_monitoring_at("deploy-2", Some(risky_ref()), Some(60), LogFilter::default(), t0())
    .await
    .unwrap();

  logs.set(lines(100, 2, "upstream timeout after 30s", t0()));
  let early = engine
    .poll_monitoring_at(&id, None, t0() + Duration::seconds(30))
    .await
    .unwrap();
  assert_eq!(early.status, WindowStatus::Open);
  assert!(!early.rollback_recommended);

  let done = engine
    .poll_monitoring_at(&id, None, t0() + Duration::seconds(61))
    .await
    .unwrap();
  assert_eq!(done.status, WindowStatus::ClosedHealthy);
  assert_eq!(done.remaining_secs, 0);

  let p = engine.memory().pattern("db_migration").await.unwrap();
  assert_eq!((p.occurrence_count, p.incident_count), (1, 0));
}

#[tokio::test]
async fn one_open_window_per_deployment() {
  let (engine, _) = monitored_engine().await;
  let first = engine
    .start_monitoring_at("deploy-3", None, None, LogFilter::default(), t0())
    .await
    .unwrap();
  let err = engine
    .start_monitoring_at("deploy-3", None, None, LogFilter::default(), t0() + Duration::seconds(5))
    .await
    .unwrap_err();
  assert!(matches!(err, EngineError::InvalidState(_)));

  engine.stop_monitoring(&first).await.unwrap();
  let second = engine
    .start_monitoring_at("deploy-3", None, None, LogFilter::default(), t0() + Duration::seconds(10))
    .await
    .unwrap();
  assert_ne!(first, second);
}

#[tokio::test]
async fn stop_is_idempotent() {
  let (engine, _) = monitored_engine().await;
  let id = engine
    .start_monitoring_at("deploy-4", None, Some(600), LogFilter::default(), t0())
    .await
    .unwrap();
  let a = engine.stop_monitoring(&id).await.unwrap();
  let b = engine.stop_monitoring(&id).await.unwrap();
  assert_eq!(a.status, WindowStatus::Cancelled);
  assert_eq!(b.status, WindowStatus::Cancelled);

  let err = engine.accept_rollback(&id, None).await.unwrap_err();
  assert!(matches!(err, EngineError::InvalidState(_)));
}

#[tokio::test]
async fn unknown_window_is_not_found() {
  let (engine, _) = monitored_engine().await;
  let err = engine.window_status("win-missing").await.unwrap_err();
  assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn concurrent_polls_are_serialized() {
  let (engine, _) = monitored_engine().await;
  let engine = Arc::new(engine);
  let id = engine
    .start_monitoring_at("deploy-5", None, Some(3600), LogFilter::default(), t0())
    .await
    .unwrap();

  let mut handles = Vec::new();
  for i in 0..8 {
    let engine = engine.clone();
    let id = id.clone();
    handles.push(tokio::spawn(async move {
      let quiet = lines(50, 1, "upstream timeout after 30s", t0());
      engine
        .poll_monitoring_at(&id, Some(quiet), t0() + Duration::seconds(10 + i))
        .await
    }));
  }
  for h in handles {
    let status = h.await.unwrap().unwrap();
    assert_eq!(status.status, WindowStatus::Open);
  }
  assert_eq!(engine.open_window_ids(), vec![id]);
}

#[tokio::test]
async fn expired_windows_are_closed_by_sweep() {
  let (engine, _) = monitored_engine().await;
  let id = engine
    .start_monitoring_at("deploy-6", Some(risky_ref()), Some(60), LogFilter::default(), t0())
    .await
    .unwrap();
  assert!(engine.expire_windows(t0() + Duration::seconds(30)).await.is_empty());
  let closed = engine.expire_windows(t0() + Duration::seconds(120)).await;
  assert_eq!(closed, vec![id.clone()]);
  let status = engine.window_status(&id).await.unwrap();
  assert_eq!(status.status, WindowStatus::ClosedHealthy);
  // No snapshot was ever taken, so nothing was learned.
  assert!(engine.memory().pattern("auth_logic").await.is_none());
}

#[tokio::test]
async fn closed_windows_are_dropped_after_retention() {
  let (engine, _) = monitored_engine().await;
  let id = engine
    .start_monitoring_at("deploy-10", Some(risky_ref()), Some(600), LogFilter::default(), t0())
    .await
    .unwrap();
  engine
    .accept_rollback_at(&id, None, t0() + Duration::seconds(90))
    .await
    .unwrap();
  assert_eq!(engine.tracked_windows(), 1);

  let retention = EngineConfig::default().monitor.closed_retention_secs;
  engine.expire_windows(t0() + Duration::seconds(90 + retention - 1)).await;
  assert_eq!(engine.tracked_windows(), 1);
  engine.expire_windows(t0() + Duration::seconds(90 + retention)).await;
  assert_eq!(engine.tracked_windows(), 0);

  // Still answerable from the store, and still closed to writes.
  let status = engine.window_status(&id).await.unwrap();
  assert_eq!(status.status, WindowStatus::ClosedRolledBack);
  let err = engine
    .poll_monitoring_at(&id, None, t0() + Duration::hours(3))
    .await
    .unwrap_err();
  assert!(matches!(err, EngineError::InvalidState(_)));
  let err = engine.accept_rollback(&id, None).await.unwrap_err();
  assert!(matches!(err, EngineError::InvalidState(_)));
  let stopped = engine.stop_monitoring(&id).await.unwrap();
  assert_eq!(stopped.status, WindowStatus::ClosedRolledBack);
}

#[tokio::test]
async fn manual_rollback_incident_keeps_supplied_details() {
  let (engine, _) = monitored_engine().await;
  let id = engine
    .start_monitoring_at("deploy-7", Some(risky_ref()), Some(600), LogFilter::default(), t0())
    .await
    .unwrap();
  let mut supplied = incident("inc-manual", &["config_change"], None);
  supplied.severity = IncidentSeverity::P3;
  engine
    .accept_rollback_at(&id, Some(supplied), t0() + Duration::seconds(30))
    .await
    .unwrap();

  for tag in ["auth_logic", "db_migration", "config_change"] {
    let p = engine.memory().pattern(tag).await.unwrap();
    assert_eq!(p.incident_count, 1, "{tag}");
  }
}

// ---------------------------------------------------------------------------
// Logs and correlation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ad_hoc_log_analysis() {
  let engine = engine_with(Backends::none()).await;
  let mut batch = lines(100, 2, "upstream timeout after 30s", t0());
  batch[50] = LogLine::new(t0(), LogLevel::Warn, "slow query");
  let analysis = engine.analyze_logs(&batch, None);
  assert_eq!(analysis.error_rate, Some(0.02));
  assert_eq!(analysis.summary.warn_count, 1);
  assert!(analysis.anomalies.is_empty());

  let bad = lines(100, 67, "upstream timeout after 30s", t0());
  let analysis = engine.analyze_logs(&bad, Some(&batch));
  assert!(analysis.spike_score.is_some());
  assert!(!analysis.anomalies.is_empty());
}

#[tokio::test]
async fn trace_batches_are_summarized() {
  let engine = engine_with(Backends::none()).await;
  let mut spans: Vec<TraceSpan> = (0..19)
    .map(|i| TraceSpan {
      trace_id: format!("t{i}"),
      service: Some("checkout".into()),
      operation: Some("GET /cart".into()),
      duration_ms: 40.0,
    })
    .collect();
  spans.push(TraceSpan {
    trace_id: "t-slow".into(),
    service: Some("checkout".into()),
    operation: Some("charge card".into()),
    duration_ms: 2_400.0,
  });
  let analysis = engine.analyze_traces(&spans, Some("checkout")).unwrap();
  assert_eq!(analysis.trace_count, 20);
  assert_eq!(analysis.p50_latency_ms, 40.0);
  assert_eq!(analysis.slow_traces[0].trace_id, "t-slow");
  assert_eq!(analysis.bottlenecks[0].operation, "charge card");

  spans[3].duration_ms = f64::NAN;
  let err = engine.analyze_traces(&spans, None).unwrap_err();
  assert!(matches!(err, EngineError::Validation { .. }));
}

#[tokio::test]
async fn suspects_follow_error_categories() {
  let (engine, _) = monitored_engine().await;
  engine.analyze_commit_at("acme/api", "risky01", None, t0()).await.unwrap();
  engine.analyze_commit_at("acme/api", "safe01", None, t0()).await.unwrap();

  let errors = lines(20, 20, "401 Unauthorized: invalid token for user 42", t0());
  let suspects = engine.suspect_commits(t0() + Duration::hours(1), &errors).await;
  assert_eq!(suspects[0].commit_hash, "risky01");
}

#[tokio::test]
async fn memory_and_windows_survive_restart() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("memory.json");

  let store = Arc::new(InMemoryStore::open(&path).await.unwrap());
  let engine = Engine::open(EngineConfig::default(), store, Backends::none())
    .await
    .unwrap();
  engine.record_incident(incident("inc-1", &["secrets"], None)).await.unwrap();
  let id = engine
    .start_monitoring_at("deploy-8", None, Some(600), LogFilter::default(), t0())
    .await
    .unwrap();
  let cancelled = engine
    .start_monitoring_at("deploy-11", None, Some(600), LogFilter::default(), t0())
    .await
    .unwrap();
  engine.stop_monitoring(&cancelled).await.unwrap();
  engine.checkpoint().await.unwrap();
  drop(engine);

  let store = Arc::new(InMemoryStore::open(&path).await.unwrap());
  let engine = Engine::open(EngineConfig::default(), store, Backends::none())
    .await
    .unwrap();
  assert_eq!(engine.open_window_ids(), vec![id]);
  // Only the open window is restored into the registry.
  assert_eq!(engine.tracked_windows(), 1);
  let status = engine.window_status(&cancelled).await.unwrap();
  assert_eq!(status.status, WindowStatus::Cancelled);
  let p = engine.memory().pattern("secrets").await.unwrap();
  assert_eq!(p.incident_count, 1);
}
