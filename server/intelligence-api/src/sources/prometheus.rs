//! Prometheus metric source (`/api/v1/query_range`).

use async_trait::async_trait;
use chrono::DateTime;
use intelligence_engine::{EngineError, MetricSource, Result, TimeRange, TimeSeries};
use serde::Deserialize;

const MIN_STEP_SECS: i64 = 15;
/// Aim for about this many points per range.
const TARGET_POINTS: i64 = 100;

pub struct PrometheusSource {
  client: reqwest::Client,
  base: String,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
  status: String,
  #[serde(default)]
  error: Option<String>,
  #[serde(default)]
  data: Option<QueryData>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
  #[serde(default)]
  result: Vec<Series>,
}

#[derive(Debug, Deserialize)]
struct Series {
  /// `[unix_seconds, "value"]` pairs.
  #[serde(default)]
  values: Vec<(f64, String)>,
}

fn http_err(e: reqwest::Error) -> EngineError {
  EngineError::unavailable("prometheus", e)
}

fn step_secs(range: &TimeRange) -> i64 {
  ((range.end - range.start).num_seconds() / TARGET_POINTS).max(MIN_STEP_SECS)
}

/// First series only; NaN and unparseable samples are skipped.
fn to_series(resp: QueryResponse) -> Result<TimeSeries> {
  if resp.status != "success" {
    return Err(EngineError::unavailable(
      "prometheus",
      resp.error.unwrap_or(resp.status),
    ));
  }
  let points = resp
    .data
    .and_then(|d| d.result.into_iter().next())
    .map(|s| s.values)
    .unwrap_or_default()
    .into_iter()
    .filter_map(|(ts, v)| {
      let value: f64 = v.parse().ok().filter(|v: &f64| v.is_finite())?;
      let at = DateTime::from_timestamp_millis((ts * 1000.0) as i64)?;
      Some((at, value))
    })
    .collect();
  Ok(TimeSeries { points })
}

impl PrometheusSource {
  pub fn new(client: reqwest::Client, base: &str) -> Self {
    Self {
      client,
      base: base.trim_end_matches('/').to_string(),
    }
  }
}

#[async_trait]
impl MetricSource for PrometheusSource {
  fn name(&self) -> &str {
    "prometheus"
  }

  async fn health(&self) -> Result<()> {
    self
      .client
      .get(format!("{}/-/healthy", self.base))
      .send()
      .await
      .and_then(reqwest::Response::error_for_status)
      .map_err(http_err)?;
    Ok(())
  }

  async fn query(&self, expression: &str, range: &TimeRange) -> Result<TimeSeries> {
    let resp: QueryResponse = self
      .client
      .get(format!("{}/api/v1/query_range", self.base))
      .query(&[
        ("query", expression.to_string()),
        ("start", range.start.timestamp().to_string()),
        ("end", range.end.timestamp().to_string()),
        ("step", format!("{}s", step_secs(range))),
      ])
      .send()
      .await
      .and_then(reqwest::Response::error_for_status)
      .map_err(http_err)?
      .json()
      .await
      .map_err(http_err)?;
    to_series(resp)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::{Duration, TimeZone, Utc};

  #[test]
  fn step_has_a_floor() {
    let t0 = Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap();
    assert_eq!(step_secs(&TimeRange::new(t0, t0 + Duration::minutes(5))), 15);
    assert_eq!(step_secs(&TimeRange::new(t0, t0 + Duration::hours(10))), 360);
  }

  #[test]
  fn first_series_without_nan() {
    let body = r#"{"status":"success","data":{"resultType":"matrix","result":[
      {"metric":{},"values":[[1736935200,"0.02"],[1736935215,"NaN"],[1736935230,"0.05"]]},
      {"metric":{},"values":[[1736935200,"9"]]}
    ]}}"#;
    let series = to_series(serde_json::from_str(body).unwrap()).unwrap();
    assert_eq!(series.points.len(), 2);
    assert_eq!(series.points[1].1, 0.05);
  }

  #[test]
  fn error_status_is_unavailable() {
    let body = r#"{"status":"error","errorType":"bad_data","error":"parse error"}"#;
    let err = to_series(serde_json::from_str(body).unwrap()).unwrap_err();
    assert!(matches!(err, EngineError::Unavailable { .. }));
  }
}
