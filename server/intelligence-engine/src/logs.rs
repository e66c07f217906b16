//! Log Aggregator: a window of raw log lines -> summary statistics.

use crate::fingerprint::message_fingerprint;
use crate::normalize::{categorize, normalize_message};
use crate::types::{ErrorPattern, LogLevel, LogLine, LogSummary, TimeRange};

/// Summarize a window of log lines. Error lines are grouped by normalized text.
pub fn summarize(lines: &[LogLine], range: Option<TimeRange>) -> LogSummary {
  let mut summary = LogSummary {
    range,
    ..LogSummary::default()
  };

  for line in lines {
    summary.total += 1;
    *summary.level_counts.entry(line.level).or_insert(0) += 1;
    match line.level {
      LogLevel::Warn => summary.warn_count += 1,
      LogLevel::Error => {
        summary.error_count += 1;
        record_error(&mut summary, &line.message);
      }
      _ => {}
    }
  }
  summary
}

fn record_error(summary: &mut LogSummary, message: &str) {
  let normalized = normalize_message(message);
  let fingerprint = message_fingerprint(&normalized);
  let category = categorize(message).map(|c| c.as_str().to_string());
  if let Some(cat) = &category {
    *summary.categories.entry(cat.clone()).or_insert(0) += 1;
  }
  summary
    .error_patterns
    .entry(fingerprint.clone())
    .and_modify(|p| p.count += 1)
    .or_insert_with(|| ErrorPattern {
      fingerprint,
      normalized,
      sample: message.chars().take(200).collect(),
      count: 1,
      category,
    });
}

/// Spike score in [0,1] from the current/baseline error-rate ratio.
///
/// 0 at or below the baseline, 1 at `saturation_ratio` times the baseline or
/// more. The baseline is floored at `epsilon`.
pub fn spike_score(current: f64, baseline: f64, saturation_ratio: f64, epsilon: f64) -> f64 {
  let ratio = current / baseline.max(epsilon);
  let span = (saturation_ratio - 1.0).max(f64::EPSILON);
  ((ratio - 1.0) / span).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::{TimeZone, Utc};

  fn lines(errors: usize, warns: usize, total: usize) -> Vec<LogLine> {
    let t = Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap();
    (0..total)
      .map(|i| {
        let level = if i < errors {
          LogLevel::Error
        } else if i < errors + warns {
          LogLevel::Warn
        } else {
          LogLevel::Info
        };
        LogLine::new(t, level, format!("request {i} handled"))
      })
      .collect()
  }

  #[test]
  fn counts_and_rate() {
    let s = summarize(&lines(2, 1, 100), None);
    assert_eq!(s.total, 100);
    assert_eq!(s.error_count, 2);
    assert_eq!(s.warn_count, 1);
    assert_eq!(s.level_counts.get(&LogLevel::Info), Some(&97));
    assert_eq!(s.error_rate(), Some(0.02));
  }

  #[test]
  fn empty_window_has_no_rate() {
    let s = summarize(&[], None);
    assert_eq!(s.total, 0);
    assert_eq!(s.error_rate(), None);
  }

  #[test]
  fn errors_group_by_normalized_text() {
    // "request N handled" normalizes to one pattern.
    let s = summarize(&lines(5, 0, 5), None);
    assert_eq!(s.error_patterns.len(), 1);
    let p = s.error_patterns.values().next().unwrap();
    assert_eq!(p.count, 5);
    assert_eq!(p.normalized, "request # handled");
  }

  #[test]
  fn spike_score_saturates() {
    assert_eq!(spike_score(0.02, 0.02, 5.0, 0.01), 0.0);
    assert_eq!(spike_score(0.01, 0.02, 5.0, 0.01), 0.0);
    assert!((spike_score(0.06, 0.02, 5.0, 0.01) - 0.5).abs() < 1e-9);
    assert_eq!(spike_score(0.18, 0.02, 5.0, 0.01), 1.0);
    // Zero baseline is floored at epsilon.
    assert_eq!(spike_score(0.5, 0.0, 5.0, 0.01), 1.0);
  }
}
