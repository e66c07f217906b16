//! Log source over a directory of `*.log` files, for hosts without a log
//! aggregator. Files touched in the last day are ranked (error/app-looking
//! names first, then newest) and their tails read on the blocking pool.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use intelligence_engine::{EngineError, LogFilter, LogLine, LogSource, Result, TimeRange};
use regex::Regex;
use tracing::debug;

use super::detect_level;
use crate::date::leading_timestamp;

const MAX_DEPTH: usize = 3;
const MAX_FILES: usize = 50;
const TAIL_LINES: usize = 500;
/// Files below this size are read whole.
const SMALL_FILE_BYTES: u64 = 50_000;
const TAIL_BYTES_PER_LINE: u64 = 150;
const DEFAULT_LIMIT: usize = 1000;
const RECENT: Duration = Duration::from_secs(24 * 3600);
const PRIORITY_KEYWORDS: &[&str] = &["error", "err", "exception", "fatal", "app", "service"];

static SERVICE_SUFFIX: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"[-_](error|access|out|prod|dev|staging)").expect("valid regex"));

pub struct LogDirSource {
  root: PathBuf,
}

impl LogDirSource {
  pub fn new(root: PathBuf) -> Self {
    Self { root }
  }
}

/// `api-error.log` -> `api`.
fn service_name(path: &Path) -> String {
  let stem = path
    .file_name()
    .and_then(|n| n.to_str())
    .unwrap_or_default()
    .trim_end_matches(".log");
  SERVICE_SUFFIX.replace_all(stem, "").into_owned()
}

fn collect_logs(dir: &Path, depth: usize, out: &mut Vec<(PathBuf, SystemTime)>) {
  let Ok(entries) = std::fs::read_dir(dir) else {
    return;
  };
  for entry in entries.flatten() {
    let path = entry.path();
    let Ok(meta) = entry.metadata() else {
      continue;
    };
    if meta.is_dir() {
      if depth < MAX_DEPTH {
        collect_logs(&path, depth + 1, out);
      }
    } else if path.extension().is_some_and(|e| e == "log") {
      if let Ok(modified) = meta.modified() {
        out.push((path, modified));
      }
    }
  }
}

/// Recently modified log files, most relevant first.
fn ranked_files(root: &Path, now: SystemTime) -> Vec<(PathBuf, SystemTime)> {
  let mut files = Vec::new();
  collect_logs(root, 0, &mut files);
  let cutoff = now.checked_sub(RECENT).unwrap_or(SystemTime::UNIX_EPOCH);
  files.retain(|(_, modified)| *modified >= cutoff);
  files.sort_by_key(|(path, modified)| {
    let name = path
      .file_name()
      .and_then(|n| n.to_str())
      .unwrap_or_default()
      .to_lowercase();
    let priority = PRIORITY_KEYWORDS.iter().any(|k| name.contains(k));
    std::cmp::Reverse((priority, *modified))
  });
  files.truncate(MAX_FILES);
  files
}

fn read_tail(path: &Path, n_lines: usize) -> std::io::Result<Vec<String>> {
  let mut file = File::open(path)?;
  let size = file.metadata()?.len();
  let window = n_lines as u64 * TAIL_BYTES_PER_LINE;
  let seeked = size >= SMALL_FILE_BYTES && size > window;
  if seeked {
    file.seek(SeekFrom::Start(size - window))?;
  }
  let mut buf = Vec::new();
  file.read_to_end(&mut buf)?;
  let text = String::from_utf8_lossy(&buf);
  let mut lines: Vec<String> = text.lines().map(str::to_string).collect();
  if seeked && !lines.is_empty() {
    // First line is partial.
    lines.remove(0);
  }
  let skip = lines.len().saturating_sub(n_lines);
  Ok(lines.split_off(skip))
}

fn scan(root: &Path, range: &TimeRange, filter: &LogFilter) -> Vec<LogLine> {
  let mut out = Vec::new();
  for (path, modified) in ranked_files(root, SystemTime::now()) {
    let service = service_name(&path);
    if filter.service.as_deref().is_some_and(|s| !service.contains(s)) {
      continue;
    }
    let lines = match read_tail(&path, TAIL_LINES) {
      Ok(lines) => lines,
      Err(e) => {
        debug!(path = %path.display(), error = %e, "skipping log file");
        continue;
      }
    };
    let fallback: DateTime<Utc> = modified.into();
    for raw in lines {
      if raw.trim().is_empty() {
        continue;
      }
      let timestamp = leading_timestamp(&raw).unwrap_or(fallback);
      if !range.contains(&timestamp) {
        continue;
      }
      out.push(LogLine {
        timestamp,
        level: detect_level(&raw),
        message: raw,
        service: Some(service.clone()),
      });
    }
  }
  out.sort_by_key(|l| l.timestamp);
  let limit = filter.limit.unwrap_or(DEFAULT_LIMIT);
  let skip = out.len().saturating_sub(limit);
  out.split_off(skip)
}

#[async_trait]
impl LogSource for LogDirSource {
  fn name(&self) -> &str {
    "logfile"
  }

  async fn health(&self) -> Result<()> {
    if self.root.is_dir() {
      Ok(())
    } else {
      Err(EngineError::unavailable(
        "logfile",
        format!("{} is not a directory", self.root.display()),
      ))
    }
  }

  async fn query(&self, range: &TimeRange, filter: &LogFilter) -> Result<Vec<LogLine>> {
    let root = self.root.clone();
    let range = *range;
    let filter = filter.clone();
    let lines = tokio::task::spawn_blocking(move || scan(&root, &range, &filter))
      .await
      .map_err(|e| EngineError::unavailable("logfile", e))?;
    debug!(lines = lines.len(), "log directory scan");
    Ok(lines)
  }
}
