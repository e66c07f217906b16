//! Loki log source (`/loki/api/v1/query_range`).

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::DateTime;
use intelligence_engine::{
  EngineError, LogFilter, LogLevel, LogLine, LogSource, Result, TimeRange,
};
use serde::Deserialize;
use tracing::debug;

use super::detect_level;

const DEFAULT_LIMIT: usize = 1000;

pub struct LokiSource {
  client: reqwest::Client,
  base: String,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
  data: QueryData,
}

#[derive(Debug, Deserialize)]
struct QueryData {
  #[serde(default)]
  result: Vec<Stream>,
}

#[derive(Debug, Deserialize)]
struct Stream {
  #[serde(default)]
  stream: HashMap<String, String>,
  /// `[ns_timestamp, line]` pairs.
  #[serde(default)]
  values: Vec<(String, String)>,
}

fn http_err(e: reqwest::Error) -> EngineError {
  EngineError::unavailable("loki", e)
}

/// LogQL selector: explicit query, else one service, else every job.
pub(crate) fn selector(filter: &LogFilter) -> String {
  if let Some(q) = filter.query.as_deref().filter(|q| !q.trim().is_empty()) {
    return q.to_string();
  }
  match filter.service.as_deref() {
    Some(service) => format!("{{service=\"{}\"}}", service.replace('"', "\\\"")),
    None => "{job=~\".+\"}".to_string(),
  }
}

fn to_lines(streams: Vec<Stream>) -> Vec<LogLine> {
  let mut lines = Vec::new();
  for stream in streams {
    let level = ["level", "severity", "detected_level"]
      .iter()
      .find_map(|k| stream.stream.get(*k))
      .map(|l| LogLevel::from_str_loose(l))
      .filter(|l| *l != LogLevel::Unknown);
    let service = ["service", "service_name", "app", "job"]
      .iter()
      .find_map(|k| stream.stream.get(*k))
      .cloned();
    for (ts, message) in stream.values {
      let Some(timestamp) = ts.parse::<i64>().ok().map(DateTime::from_timestamp_nanos) else {
        continue;
      };
      lines.push(LogLine {
        timestamp,
        level: level.unwrap_or_else(|| detect_level(&message)),
        message,
        service: service.clone(),
      });
    }
  }
  lines.sort_by_key(|l| l.timestamp);
  lines
}

impl LokiSource {
  pub fn new(client: reqwest::Client, base: &str) -> Self {
    Self {
      client,
      base: base.trim_end_matches('/').to_string(),
    }
  }
}

#[async_trait]
impl LogSource for LokiSource {
  fn name(&self) -> &str {
    "loki"
  }

  async fn health(&self) -> Result<()> {
    self
      .client
      .get(format!("{}/ready", self.base))
      .send()
      .await
      .and_then(reqwest::Response::error_for_status)
      .map_err(http_err)?;
    Ok(())
  }

  async fn query(&self, range: &TimeRange, filter: &LogFilter) -> Result<Vec<LogLine>> {
    let start = range.start.timestamp_nanos_opt().unwrap_or_default();
    let end = range.end.timestamp_nanos_opt().unwrap_or(i64::MAX);
    let limit = filter.limit.unwrap_or(DEFAULT_LIMIT);
    let query = selector(filter);
    debug!(%query, limit, "loki query_range");

    let resp: QueryResponse = self
      .client
      .get(format!("{}/loki/api/v1/query_range", self.base))
      .query(&[
        ("query", query),
        ("start", start.to_string()),
        ("end", end.to_string()),
        ("limit", limit.to_string()),
        ("direction", "forward".to_string()),
      ])
      .send()
      .await
      .and_then(reqwest::Response::error_for_status)
      .map_err(http_err)?
      .json()
      .await
      .map_err(http_err)?;
    Ok(to_lines(resp.data.result))
  }
}
