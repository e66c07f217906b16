//! Concrete telemetry backends and their wiring from [`Settings`].

mod git;
mod logdir;
mod loki;
mod prometheus;

pub use git::GitCommitSource;
pub use logdir::LogDirSource;
pub use loki::LokiSource;
pub use prometheus::PrometheusSource;

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use anyhow::{Context, Result};
use intelligence_engine::{Backends, LogLevel};
use regex::Regex;
use tracing::info;

use crate::config::Settings;

/// Build the configured backends. Loki wins over the log directory.
pub fn from_settings(settings: &Settings, query_timeout: Duration) -> Result<Backends> {
  let client = reqwest::Client::builder()
    .timeout(query_timeout)
    .build()
    .context("building http client")?;

  let mut backends = Backends::none();
  if let Some(path) = &settings.git_repo_path {
    info!(path = %path.display(), "commit source: git");
    backends.commits = Some(Arc::new(GitCommitSource::new(path.clone())));
  }
  if let Some(url) = &settings.loki_url {
    info!(%url, "log source: loki");
    backends.logs = Some(Arc::new(LokiSource::new(client.clone(), url)));
  } else if let Some(dir) = &settings.log_path {
    info!(dir = %dir.display(), "log source: log directory");
    backends.logs = Some(Arc::new(LogDirSource::new(dir.clone())));
  }
  if let Some(url) = &settings.prometheus_url {
    info!(%url, "metric source: prometheus");
    backends.metrics = Some(Arc::new(PrometheusSource::new(client, url)));
  }
  Ok(backends)
}

static JSON_LEVEL: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r#""(?:level|severity|lvl)"\s*:\s*"(\w+)""#).expect("valid regex")
});

/// Level of a raw log line: a JSON `"level"` field if present, else keywords.
pub fn detect_level(line: &str) -> LogLevel {
  if let Some(level) = JSON_LEVEL.captures(line).and_then(|c| c.get(1)) {
    let parsed = LogLevel::from_str_loose(level.as_str());
    if parsed != LogLevel::Unknown {
      return parsed;
    }
  }
  let lower = line.to_lowercase();
  if ["error", "fatal", "panic", "exception", "traceback"]
    .iter()
    .any(|k| lower.contains(k))
  {
    LogLevel::Error
  } else if lower.contains("warn") {
    LogLevel::Warn
  } else if lower.contains("debug") {
    LogLevel::Debug
  } else {
    LogLevel::Info
  }
}
