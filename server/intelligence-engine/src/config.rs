//! Engine configuration with sane defaults. Every group deserializes with
//! `#[serde(default)]`, so a config file only needs the keys it overrides.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  pub scoring: ScoringConfig,
  pub anomaly: AnomalyThresholds,
  pub monitor: MonitorConfig,
  pub backends: BackendConfig,
  pub correlation: CorrelationConfig,
  pub traces: TraceConfig,
}

/// Risk scorer tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
  /// Blend weight of memory-derived incident probability vs structural score (0..1).
  pub memory_weight: f64,
  /// Multiplier applied to the author's incident rate delta.
  pub author_weight: f64,
  /// Largest author nudge, as a fraction of the 0..10 scale.
  pub author_max_swing: f64,
  /// Confidence ceiling when neither tags nor author have history.
  pub cold_start_confidence: f64,
  /// Confidence multiplier for `Heuristic` feature records.
  pub heuristic_confidence_factor: f64,
  /// Laplace prior added to the incident count.
  pub laplace_alpha: f64,
  /// Laplace prior added to the non-incident count.
  pub laplace_beta: f64,
  pub similar_incident_limit: usize,
  pub author_window_days: i64,
}

impl Default for ScoringConfig {
  fn default() -> Self {
    Self {
      memory_weight: 0.35,
      author_weight: 0.5,
      author_max_swing: 0.1,
      cold_start_confidence: 0.3,
      heuristic_confidence_factor: 0.6,
      laplace_alpha: 1.0,
      laplace_beta: 1.0,
      similar_incident_limit: 5,
      author_window_days: 90,
    }
  }
}

/// Anomaly detector thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyThresholds {
  /// Error rate above which `high_error_rate` fires; twice this is `critical`.
  pub error_rate: f64,
  /// Occurrences of one normalized error before `repeated_error` fires.
  pub repeated_count: u64,
  /// Current/baseline error-rate ratio at which the spike score saturates to 1.0.
  pub spike_saturation_ratio: f64,
  /// Spike score at or above which a `spike` anomaly is emitted.
  pub spike_threshold: f64,
}

impl Default for AnomalyThresholds {
  fn default() -> Self {
    Self {
      error_rate: 0.30,
      repeated_count: 3,
      spike_saturation_ratio: 5.0,
      spike_threshold: 0.8,
    }
  }
}

/// Deployment monitor tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
  /// Error-rate degradation (percent over baseline) that recommends a scheduled rollback.
  pub degradation_threshold_percent: f64,
  /// Floor for the baseline in the degradation ratio.
  pub epsilon: f64,
  /// How far before the deployment the baseline log query reaches.
  pub baseline_lookback_secs: i64,
  /// Log window used by polls that are not handed logs.
  pub poll_lookback_secs: i64,
  pub default_duration_secs: i64,
  /// How long a closed window stays in the live registry before the sweep
  /// drops it; afterwards its status is read back from the store.
  pub closed_retention_secs: i64,
  /// Incident probability at or above which thresholds are halved.
  pub high_risk_probability: f64,
  /// Incident probability at or above which thresholds are cut by a quarter.
  pub elevated_risk_probability: f64,
  /// PromQL expression yielding the service error ratio.
  pub metric_error_rate_query: String,
  /// PromQL expression yielding p95 latency in seconds.
  pub metric_latency_query: String,
}

impl Default for MonitorConfig {
  fn default() -> Self {
    Self {
      degradation_threshold_percent: 100.0,
      epsilon: 0.01,
      baseline_lookback_secs: 900,
      poll_lookback_secs: 300,
      default_duration_secs: 1800,
      closed_retention_secs: 3600,
      high_risk_probability: 0.7,
      elevated_risk_probability: 0.4,
      metric_error_rate_query:
        r#"sum(rate(http_requests_total{status=~"5.."}[5m])) / sum(rate(http_requests_total[5m]))"#
          .to_string(),
      metric_latency_query:
        "histogram_quantile(0.95, sum(rate(http_request_duration_seconds_bucket[5m])) by (le))"
          .to_string(),
    }
  }
}

/// Backend probing and query limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
  pub probe_timeout_ms: u64,
  pub query_timeout_ms: u64,
  pub probe_interval_secs: u64,
}

impl Default for BackendConfig {
  fn default() -> Self {
    Self {
      probe_timeout_ms: 2_000,
      query_timeout_ms: 5_000,
      probe_interval_secs: 60,
    }
  }
}

/// Suspect-commit ranking weights (sum to 1.0 by default).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
  /// Max hours before the incident to consider a commit.
  pub lookback_hours: f64,
  pub category_weight: f64,
  pub risk_weight: f64,
  pub time_weight: f64,
  pub history_weight: f64,
}

impl Default for CorrelationConfig {
  fn default() -> Self {
    Self {
      lookback_hours: 24.0,
      category_weight: 0.4,
      risk_weight: 0.25,
      time_weight: 0.2,
      history_weight: 0.15,
    }
  }
}

/// Trace latency analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
  /// Operations averaging more than this fraction of the p95 latency are bottlenecks.
  pub bottleneck_ratio: f64,
  pub max_slow_traces: usize,
  pub max_bottlenecks: usize,
}

impl Default for TraceConfig {
  fn default() -> Self {
    Self {
      bottleneck_ratio: 0.8,
      max_slow_traces: 10,
      max_bottlenecks: 5,
    }
  }
}
