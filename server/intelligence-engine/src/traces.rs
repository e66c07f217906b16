//! Trace latency analysis: percentiles, slow traces and bottleneck operations.

use std::collections::BTreeMap;

use crate::config::TraceConfig;
use crate::types::{Bottleneck, SlowTrace, TraceAnalysis, TraceSpan};

const UNKNOWN_OPERATION: &str = "unknown";

/// Linear-interpolated percentile (`q` in 0..=100) of an ascending slice.
pub fn percentile(sorted: &[f64], q: f64) -> Option<f64> {
  let last = sorted.len().checked_sub(1)?;
  let rank = (q.clamp(0.0, 100.0) / 100.0) * last as f64;
  let lo = rank.floor() as usize;
  let hi = rank.ceil() as usize;
  Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64))
}

fn round2(v: f64) -> f64 {
  (v * 100.0).round() / 100.0
}

/// Summarize `spans`, keeping only `service` when given.
pub fn analyze(spans: &[TraceSpan], service: Option<&str>, config: &TraceConfig) -> TraceAnalysis {
  let spans: Vec<&TraceSpan> = spans
    .iter()
    .filter(|s| match service {
      Some(svc) => s.service.as_deref() == Some(svc),
      None => true,
    })
    .collect();

  let mut durations: Vec<f64> = spans.iter().map(|s| s.duration_ms).collect();
  durations.sort_by(f64::total_cmp);
  let (Some(p50), Some(p95)) = (percentile(&durations, 50.0), percentile(&durations, 95.0)) else {
    return TraceAnalysis::default();
  };

  let mut slow: Vec<&TraceSpan> = spans.iter().copied().filter(|s| s.duration_ms > p95).collect();
  slow.sort_by(|a, b| {
    b.duration_ms
      .total_cmp(&a.duration_ms)
      .then_with(|| a.trace_id.cmp(&b.trace_id))
  });
  let slow_traces = slow
    .into_iter()
    .take(config.max_slow_traces)
    .map(|s| SlowTrace {
      trace_id: s.trace_id.clone(),
      service: s.service.clone(),
      operation: s.operation.clone(),
      duration_ms: s.duration_ms,
    })
    .collect();

  let mut by_operation: BTreeMap<&str, (f64, u64)> = BTreeMap::new();
  for s in &spans {
    let op = s.operation.as_deref().unwrap_or(UNKNOWN_OPERATION);
    let entry = by_operation.entry(op).or_default();
    entry.0 += s.duration_ms;
    entry.1 += 1;
  }
  let mut bottlenecks: Vec<Bottleneck> = by_operation
    .into_iter()
    .map(|(op, (total, count))| (op, total / count as f64, count))
    .filter(|(_, avg, _)| *avg > p95 * config.bottleneck_ratio)
    .map(|(op, avg, count)| Bottleneck {
      operation: op.to_string(),
      avg_duration_ms: round2(avg),
      count,
    })
    .collect();
  bottlenecks.sort_by(|a, b| {
    b.avg_duration_ms
      .total_cmp(&a.avg_duration_ms)
      .then_with(|| a.operation.cmp(&b.operation))
  });
  bottlenecks.truncate(config.max_bottlenecks);

  TraceAnalysis {
    trace_count: spans.len() as u64,
    p50_latency_ms: round2(p50),
    p95_latency_ms: round2(p95),
    slow_traces,
    bottlenecks,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn span(id: &str, op: &str, ms: f64) -> TraceSpan {
    TraceSpan {
      trace_id: id.into(),
      service: Some("checkout".into()),
      operation: Some(op.into()),
      duration_ms: ms,
    }
  }

  #[test]
  fn percentiles_interpolate() {
    let xs: Vec<f64> = (1..=10).map(f64::from).collect();
    assert_eq!(percentile(&xs, 50.0), Some(5.5));
    assert!((percentile(&xs, 95.0).unwrap() - 9.55).abs() < 1e-9);
    assert_eq!(percentile(&[42.0], 95.0), Some(42.0));
    assert_eq!(percentile(&[], 50.0), None);
  }

  #[test]
  fn slow_database_calls_are_the_bottleneck() {
    let mut spans: Vec<TraceSpan> = (0..18)
      .map(|i| span(&format!("t{i}"), "GET /cart", 20.0 + i as f64))
      .collect();
    spans.push(span("t-db1", "SELECT orders", 900.0));
    spans.push(span("t-db2", "SELECT orders", 1_100.0));

    let a = analyze(&spans, None, &TraceConfig::default());
    assert_eq!(a.trace_count, 20);
    assert_eq!(a.p50_latency_ms, 29.5);
    assert!(a.p95_latency_ms > 900.0 && a.p95_latency_ms < 1_100.0);
    let slow: Vec<&str> = a.slow_traces.iter().map(|t| t.trace_id.as_str()).collect();
    assert_eq!(slow, vec!["t-db2"]);
    assert_eq!(a.bottlenecks.len(), 1);
    assert_eq!(a.bottlenecks[0].operation, "SELECT orders");
    assert_eq!(a.bottlenecks[0].avg_duration_ms, 1_000.0);
    assert_eq!(a.bottlenecks[0].count, 2);
  }

  #[test]
  fn service_filter_and_empty_batches() {
    let mut other = span("x", "GET /", 5_000.0);
    other.service = Some("search".into());
    let spans = vec![span("a", "GET /cart", 10.0), other];
    let a = analyze(&spans, Some("checkout"), &TraceConfig::default());
    assert_eq!(a.trace_count, 1);
    assert_eq!(a.p95_latency_ms, 10.0);
    assert!(a.slow_traces.is_empty());

    let none = analyze(&spans, Some("billing"), &TraceConfig::default());
    assert_eq!(none, TraceAnalysis::default());
  }

  #[test]
  fn missing_operation_groups_as_unknown() {
    let mut s = span("a", "", 50.0);
    s.operation = None;
    let a = analyze(&[s], None, &TraceConfig::default());
    assert_eq!(a.bottlenecks[0].operation, "unknown");
  }
}
