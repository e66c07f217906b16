//! Deployment Monitor: window registry, health assessment and the rollback
//! decision table.
//!
//! Windows live behind a per-window async mutex so polls for the same
//! deployment are serialized while different deployments proceed in parallel.
//! I/O (log and metric queries, memory writes) is driven by the engine; this
//! module only holds state and decides.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::config::{AnomalyThresholds, MonitorConfig};
use crate::error::{EngineError, Result};
use crate::types::{
  AnomalyKind, AnomalySeverity, DeploymentWindow, HealthSnapshot, HealthStatus, MonitoringStatus,
  RollbackRecommendation, Urgency, WindowStatus,
};

pub type WindowHandle = Arc<Mutex<DeploymentWindow>>;

/// Relative increase of `current` over `baseline`, in percent. None when either
/// reading is unavailable.
pub fn degradation_percent(
  baseline: Option<f64>,
  current: Option<f64>,
  epsilon: f64,
) -> Option<f64> {
  let (b, c) = (baseline?, current?);
  let pct = (c - b) / b.max(epsilon) * 100.0;
  Some((pct * 10.0).round() / 10.0)
}

/// Facts one poll feeds into the decision table.
#[derive(Debug, Clone)]
pub struct PollFacts<'a> {
  pub snapshot: &'a HealthSnapshot,
  pub degradation_percent: Option<f64>,
  pub metric_degradation_percent: Option<f64>,
  pub threshold_percent: f64,
  pub elapsed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
  /// Keep the window open, no recommendation.
  Continue,
  /// Keep the window open and recommend a rollback.
  Rollback(RollbackRecommendation),
  /// Duration elapsed with usable data and no recommendation.
  CloseHealthy,
  /// Duration elapsed but no usable data was ever collected.
  CloseInconclusive,
}

type Predicate = fn(&PollFacts<'_>) -> bool;
type Outcome = fn(&PollFacts<'_>) -> Decision;

fn critical_anomaly(f: &PollFacts<'_>) -> bool {
  f.snapshot.has_critical()
}

fn rollback_immediate(f: &PollFacts<'_>) -> Decision {
  let reasons: Vec<&str> = f
    .snapshot
    .anomalies
    .iter()
    .filter(|a| a.severity == AnomalySeverity::Critical)
    .map(|a| a.message.as_str())
    .collect();
  Decision::Rollback(RollbackRecommendation {
    urgency: Urgency::Immediate,
    reason: format!("Critical anomaly: {}", reasons.join("; ")),
  })
}

fn log_degradation(f: &PollFacts<'_>) -> bool {
  f.degradation_percent.is_some_and(|d| d > f.threshold_percent)
}

fn rollback_scheduled_logs(f: &PollFacts<'_>) -> Decision {
  Decision::Rollback(RollbackRecommendation {
    urgency: Urgency::Scheduled,
    reason: format!(
      "Error rate degraded {:.1}% over baseline (threshold {:.0}%)",
      f.degradation_percent.unwrap_or_default(),
      f.threshold_percent
    ),
  })
}

fn metric_degradation(f: &PollFacts<'_>) -> bool {
  f.metric_degradation_percent.is_some_and(|d| d > f.threshold_percent)
}

fn rollback_scheduled_metrics(f: &PollFacts<'_>) -> Decision {
  Decision::Rollback(RollbackRecommendation {
    urgency: Urgency::Scheduled,
    reason: format!(
      "Metric error rate degraded {:.1}% over baseline (threshold {:.0}%)",
      f.metric_degradation_percent.unwrap_or_default(),
      f.threshold_percent
    ),
  })
}

fn elapsed_with_data(f: &PollFacts<'_>) -> bool {
  f.elapsed && (f.snapshot.has_log_data() || f.snapshot.metric_error_rate.is_some())
}

fn elapsed(f: &PollFacts<'_>) -> bool {
  f.elapsed
}

fn close_healthy(_: &PollFacts<'_>) -> Decision {
  Decision::CloseHealthy
}

fn close_inconclusive(_: &PollFacts<'_>) -> Decision {
  Decision::CloseInconclusive
}

/// Ordered rollback decision table; the first matching row wins.
const DECISION_TABLE: &[(Predicate, Outcome)] = &[
  (critical_anomaly, rollback_immediate),
  (log_degradation, rollback_scheduled_logs),
  (metric_degradation, rollback_scheduled_metrics),
  (elapsed_with_data, close_healthy),
  (elapsed, close_inconclusive),
];

pub fn decide(facts: &PollFacts<'_>) -> Decision {
  DECISION_TABLE
    .iter()
    .find(|(predicate, _)| predicate(facts))
    .map(|(_, outcome)| outcome(facts))
    .unwrap_or(Decision::Continue)
}

/// Health classification of one snapshot against its baseline.
pub fn assess_health(
  baseline: &HealthSnapshot,
  current: &HealthSnapshot,
  threshold_percent: f64,
) -> HealthStatus {
  let Some(rate) = current.error_rate.or(current.metric_error_rate) else {
    return HealthStatus::Unknown;
  };
  let base = if current.error_rate.is_some() {
    baseline.error_rate
  } else {
    baseline.metric_error_rate
  };
  let increase = base.map(|b| rate - b).unwrap_or(0.0);
  let new_patterns = current
    .anomalies
    .iter()
    .filter(|a| a.kind == AnomalyKind::NewErrorPattern)
    .count();
  let degradation = degradation_percent(base, Some(rate), 0.01).unwrap_or(0.0);

  if current.has_critical() || increase > 0.2 || new_patterns >= 3 {
    HealthStatus::Critical
  } else if increase > 0.1 || degradation > threshold_percent {
    HealthStatus::Unhealthy
  } else if increase > 0.05 || !current.anomalies.is_empty() {
    HealthStatus::Degraded
  } else {
    HealthStatus::Healthy
  }
}

/// Scale thresholds down for commits with a high incident probability.
pub fn tighten(
  thresholds: &AnomalyThresholds,
  degradation_percent: f64,
  incident_probability: Option<f64>,
  config: &MonitorConfig,
) -> (AnomalyThresholds, f64) {
  let factor = match incident_probability {
    Some(p) if p >= config.high_risk_probability => 0.5,
    Some(p) if p >= config.elevated_risk_probability => 0.75,
    _ => 1.0,
  };
  let tightened = AnomalyThresholds {
    error_rate: thresholds.error_rate * factor,
    ..thresholds.clone()
  };
  (tightened, degradation_percent * factor)
}

/// Build the externally visible status of a window.
pub fn status_of(window: &DeploymentWindow, now: DateTime<Utc>, epsilon: f64) -> MonitoringStatus {
  let snapshot = window.snapshots.last().cloned();
  let (health, degradation, metric_degradation) = match &snapshot {
    Some(s) => (
      assess_health(&window.baseline, s, window.degradation_threshold_percent),
      degradation_percent(window.baseline.error_rate, s.error_rate, epsilon),
      degradation_percent(window.baseline.metric_error_rate, s.metric_error_rate, epsilon),
    ),
    None => (HealthStatus::Unknown, None, None),
  };
  let end = window.closed_at.unwrap_or(now);
  let elapsed_secs = (end - window.started_at).num_seconds().max(0);
  let remaining_secs = if window.status.is_terminal() {
    0
  } else {
    (window.duration_secs - elapsed_secs).max(0)
  };

  let mut reasons = Vec::new();
  if let Some(rec) = &window.pending_rollback {
    reasons.push(rec.reason.clone());
  }
  if let Some(s) = &snapshot {
    reasons.extend(s.anomalies.iter().map(|a| a.message.clone()));
  }

  MonitoringStatus {
    window_id: window.window_id.clone(),
    deployment_id: window.deployment_id.clone(),
    status: window.status,
    health,
    snapshot,
    baseline_error_rate: window.baseline.error_rate,
    degradation_percent: degradation,
    metric_degradation_percent: metric_degradation,
    rollback_recommended: window.pending_rollback.is_some(),
    urgency: window.pending_rollback.as_ref().map(|r| r.urgency),
    reasons,
    elapsed_secs,
    remaining_secs,
  }
}

/// Registry of deployment windows.
#[derive(Default)]
pub struct Monitor {
  windows: DashMap<String, WindowHandle>,
  /// deployment id -> id of its OPEN window
  open_by_deployment: DashMap<String, String>,
}

impl Monitor {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a new window; a deployment may have only one open window.
  pub fn insert(&self, window: DeploymentWindow) -> Result<WindowHandle> {
    if window.status == WindowStatus::Open {
      match self.open_by_deployment.entry(window.deployment_id.clone()) {
        Entry::Occupied(e) => {
          return Err(EngineError::invalid_state(format!(
            "deployment {} already monitored by {}",
            window.deployment_id,
            e.get()
          )));
        }
        Entry::Vacant(e) => {
          e.insert(window.window_id.clone());
        }
      }
    }
    let window_id = window.window_id.clone();
    let handle = Arc::new(Mutex::new(window));
    self.windows.insert(window_id, handle.clone());
    Ok(handle)
  }

  pub fn get(&self, window_id: &str) -> Result<WindowHandle> {
    self
      .windows
      .get(window_id)
      .map(|h| h.value().clone())
      .ok_or_else(|| EngineError::not_found(format!("window {}", window_id)))
  }

  /// Forget the open-window claim of a deployment once its window closes.
  pub fn release(&self, deployment_id: &str, window_id: &str) {
    self
      .open_by_deployment
      .remove_if(deployment_id, |_, id| id == window_id);
  }

  /// Drop windows that closed at or before `cutoff`. Windows locked by an
  /// in-flight call are kept for the next sweep. Returns how many were dropped.
  pub fn evict_closed(&self, cutoff: DateTime<Utc>) -> usize {
    let before = self.windows.len();
    self.windows.retain(|_, handle| match handle.try_lock() {
      Ok(w) => !(w.status.is_terminal() && w.closed_at.is_some_and(|at| at <= cutoff)),
      Err(_) => true,
    });
    before.saturating_sub(self.windows.len())
  }

  pub fn len(&self) -> usize {
    self.windows.len()
  }

  pub fn is_empty(&self) -> bool {
    self.windows.is_empty()
  }

  /// Ids of windows whose deployments still hold an open claim.
  pub fn open_window_ids(&self) -> Vec<String> {
    let mut ids: Vec<String> = self
      .open_by_deployment
      .iter()
      .map(|e| e.value().clone())
      .collect();
    ids.sort();
    ids
  }
}
