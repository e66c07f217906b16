//! Anomaly Detector: log summary + thresholds -> typed anomalies.
//!
//! Rules are independent of each other. Output order is fixed by anomaly kind,
//! then severity (highest first), then key, so identical input always yields an
//! identical list.

use crate::config::AnomalyThresholds;
use crate::logs::spike_score;
use crate::types::{Anomaly, AnomalyKind, AnomalySeverity, HealthSnapshot, LogSummary};

/// Run every rule against `current`. `baseline` enables the rules that compare
/// against the pre-deployment window (new patterns, spike).
pub fn analyze(
  current: &LogSummary,
  baseline: Option<&HealthSnapshot>,
  thresholds: &AnomalyThresholds,
  epsilon: f64,
) -> Vec<Anomaly> {
  let mut out = Vec::new();
  let Some(rate) = current.error_rate() else {
    return out;
  };

  if rate > thresholds.error_rate {
    let severity = if rate > 2.0 * thresholds.error_rate {
      AnomalySeverity::Critical
    } else {
      AnomalySeverity::High
    };
    out.push(Anomaly {
      kind: AnomalyKind::HighErrorRate,
      severity,
      message: format!(
        "Error rate is {:.1}% ({} of {} lines; threshold {:.1}%)",
        rate * 100.0,
        current.error_count,
        current.total,
        thresholds.error_rate * 100.0
      ),
      key: "error_rate".into(),
      value: rate,
      threshold: thresholds.error_rate,
    });
  }

  for pattern in current.error_patterns.values() {
    if pattern.count >= thresholds.repeated_count {
      let severity = if pattern.count >= 2 * thresholds.repeated_count {
        AnomalySeverity::High
      } else {
        AnomalySeverity::Medium
      };
      out.push(Anomaly {
        kind: AnomalyKind::RepeatedError,
        severity,
        message: format!("Error repeated {} times: {}", pattern.count, pattern.sample),
        key: pattern.fingerprint.clone(),
        value: pattern.count as f64,
        threshold: thresholds.repeated_count as f64,
      });
    }
  }

  if let Some(base) = baseline.filter(|b| b.has_log_data()) {
    for pattern in current.error_patterns.values() {
      if !base.error_patterns.contains(&pattern.fingerprint) {
        out.push(Anomaly {
          kind: AnomalyKind::NewErrorPattern,
          severity: AnomalySeverity::Medium,
          message: format!(
            "New error pattern ({} occurrences): {}",
            pattern.count, pattern.sample
          ),
          key: pattern.fingerprint.clone(),
          value: pattern.count as f64,
          threshold: 0.0,
        });
      }
    }

    if let Some(base_rate) = base.error_rate {
      let score = spike_score(rate, base_rate, thresholds.spike_saturation_ratio, epsilon);
      if score >= thresholds.spike_threshold {
        let severity = if score >= 1.0 {
          AnomalySeverity::High
        } else {
          AnomalySeverity::Medium
        };
        out.push(Anomaly {
          kind: AnomalyKind::Spike,
          severity,
          message: format!(
            "Error rate {:.1}% vs baseline {:.1}% (spike score {:.2})",
            rate * 100.0,
            base_rate * 100.0,
            score
          ),
          key: "spike".into(),
          value: score,
          threshold: thresholds.spike_threshold,
        });
      }
    }
  }

  out.sort_by(|a, b| {
    a.kind
      .cmp(&b.kind)
      .then_with(|| b.severity.cmp(&a.severity))
      .then_with(|| a.key.cmp(&b.key))
  });
  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::logs::summarize;
  use crate::types::{LogLevel, LogLine};
  use chrono::{TimeZone, Utc};

  fn window(errors: &[&str], total: usize) -> Vec<LogLine> {
    let t = Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap();
    let mut out: Vec<LogLine> = errors
      .iter()
      .map(|m| LogLine::new(t, LogLevel::Error, *m))
      .collect();
    while out.len() < total {
      out.push(LogLine::new(t, LogLevel::Info, "ok"));
    }
    out
  }

  fn baseline_from(lines: &[LogLine]) -> HealthSnapshot {
    let s = summarize(lines, None);
    HealthSnapshot {
      error_rate: s.error_rate(),
      error_patterns: s.error_patterns.keys().cloned().collect(),
      ..HealthSnapshot::default()
    }
  }

  #[test]
  fn low_error_rate_is_quiet() {
    let mut lines = window(&["db timeout a", "cache miss b"], 99);
    lines.push(LogLine::new(lines[0].timestamp, LogLevel::Warn, "slow"));
    let s = summarize(&lines, None);
    assert_eq!(s.error_rate(), Some(0.02));
    let out = analyze(&s, None, &AnomalyThresholds::default(), 0.01);
    assert!(out.iter().all(|a| a.kind != AnomalyKind::HighErrorRate));
  }

  #[test]
  fn two_thirds_errors_is_critical() {
    let errors: Vec<String> = (0..67).map(|i| format!("failure kind {}", (b'a' + (i % 26) as u8) as char)).collect();
    let refs: Vec<&str> = errors.iter().map(String::as_str).collect();
    let s = summarize(&window(&refs, 100), None);
    let out = analyze(&s, None, &AnomalyThresholds::default(), 0.01);
    assert_eq!(out[0].kind, AnomalyKind::HighErrorRate);
    assert_eq!(out[0].severity, AnomalySeverity::Critical);
    assert!(out[0].message.contains("67.0%"));
  }

  #[test]
  fn moderate_rate_is_high() {
    let errors = vec!["e1", "e2", "e3", "e4"];
    let s = summarize(&window(&errors, 10), None);
    let out = analyze(&s, None, &AnomalyThresholds::default(), 0.01);
    assert_eq!(out[0].kind, AnomalyKind::HighErrorRate);
    assert_eq!(out[0].severity, AnomalySeverity::High);
  }

  #[test]
  fn repeated_error_at_threshold() {
    let s = summarize(&window(&["boom 1", "boom 2", "boom 3"], 100), None);
    let out = analyze(&s, None, &AnomalyThresholds::default(), 0.01);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].kind, AnomalyKind::RepeatedError);
    assert_eq!(out[0].severity, AnomalySeverity::Medium);
    assert_eq!(out[0].value, 3.0);
  }

  #[test]
  fn new_pattern_needs_baseline() {
    let base = baseline_from(&window(&["known failure"], 100));
    let s = summarize(&window(&["known failure", "fresh failure"], 100), None);
    let without = analyze(&s, None, &AnomalyThresholds::default(), 0.01);
    assert!(without.is_empty());
    let with = analyze(&s, Some(&base), &AnomalyThresholds::default(), 0.01);
    let new: Vec<_> = with.iter().filter(|a| a.kind == AnomalyKind::NewErrorPattern).collect();
    assert_eq!(new.len(), 1);
    assert!(new[0].message.contains("fresh failure"));
  }

  #[test]
  fn spike_against_baseline() {
    let base = baseline_from(&window(&["a", "b"], 100));
    let errors: Vec<String> = (0..18).map(|_| "b".to_string()).collect();
    let refs: Vec<&str> = errors.iter().map(String::as_str).collect();
    let s = summarize(&window(&refs, 100), None);
    let out = analyze(&s, Some(&base), &AnomalyThresholds::default(), 0.01);
    let spike = out.iter().find(|a| a.kind == AnomalyKind::Spike).unwrap();
    assert_eq!(spike.severity, AnomalySeverity::High);
    assert_eq!(spike.value, 1.0);
    // Type priority: repeated_error precedes spike.
    assert_eq!(out.first().map(|a| a.kind), Some(AnomalyKind::RepeatedError));
  }

  #[test]
  fn output_is_deterministic() {
    let errors = ["x 1", "x 2", "x 3", "y", "y", "y", "y", "y", "y", "z"];
    let s = summarize(&window(&errors, 12), None);
    let a = analyze(&s, None, &AnomalyThresholds::default(), 0.01);
    let b = analyze(&s, None, &AnomalyThresholds::default(), 0.01);
    assert_eq!(a, b);
    assert_eq!(a[0].kind, AnomalyKind::HighErrorRate);
    assert_eq!(a[1].kind, AnomalyKind::RepeatedError);
    assert_eq!(a[1].severity, AnomalySeverity::High);
  }
}
