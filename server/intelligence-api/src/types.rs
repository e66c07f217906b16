//! Request/response types for the HTTP API.

use chrono::{DateTime, Utc};
use feature_engine::{CommitInput, FileStat};
use intelligence_engine::{
  CommitRef, Incident, IncidentSeverity, LogFilter, LogLevel, LogLine, MonitoringStatus, TraceSpan,
};
use serde::{Deserialize, Serialize};

use crate::date;
use crate::error::{ApiError, ApiResult};

#[derive(Debug, Deserialize)]
pub struct AnalyzeCommitRequest {
  pub repository: String,
  pub commit_hash: String,
  /// Plain unified diff, used when the commit source cannot provide stats.
  #[serde(default)]
  pub diff: Option<String>,
  /// Per-file stats supplied by the caller; bypasses the commit source.
  #[serde(default)]
  pub files: Option<Vec<FileStat>>,
  #[serde(default)]
  pub message: Option<String>,
  #[serde(default)]
  pub author: Option<String>,
  #[serde(default)]
  pub timestamp: Option<String>,
}

impl AnalyzeCommitRequest {
  /// Caller-supplied commit record, when the request carries file stats.
  pub fn to_input(&self) -> ApiResult<Option<CommitInput>> {
    let Some(files) = &self.files else {
      return Ok(None);
    };
    Ok(Some(CommitInput {
      repository: self.repository.clone(),
      commit_hash: self.commit_hash.clone(),
      message: self.message.clone().unwrap_or_default(),
      author: self.author.clone(),
      timestamp: parse_optional("timestamp", self.timestamp.as_deref())?,
      files: Some(files.clone()),
      diff_text: self.diff.clone(),
    }))
  }
}

/// One log line as sent by callers; level and timestamp are parsed loosely.
#[derive(Debug, Clone, Deserialize)]
pub struct LogLineBody {
  #[serde(default)]
  pub timestamp: Option<String>,
  #[serde(default)]
  pub level: Option<String>,
  pub message: String,
  #[serde(default)]
  pub service: Option<String>,
}

impl LogLineBody {
  pub fn into_line(self, default_time: DateTime<Utc>) -> LogLine {
    LogLine {
      timestamp: self
        .timestamp
        .as_deref()
        .and_then(date::parse_timestamp)
        .unwrap_or(default_time),
      level: self
        .level
        .as_deref()
        .map(LogLevel::from_str_loose)
        .unwrap_or(LogLevel::Unknown),
      message: self.message,
      service: self.service,
    }
  }
}

pub fn into_lines(bodies: Vec<LogLineBody>, now: DateTime<Utc>) -> Vec<LogLine> {
  bodies.into_iter().map(|b| b.into_line(now)).collect()
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeLogsRequest {
  pub logs: Vec<LogLineBody>,
  #[serde(default)]
  pub baseline: Option<Vec<LogLineBody>>,
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeTracesRequest {
  pub traces: Vec<TraceSpan>,
  /// Only traces reported by this service are analyzed.
  #[serde(default)]
  pub service_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncidentRequest {
  pub id: String,
  pub severity: String,
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub root_cause: Option<CommitRef>,
  #[serde(default)]
  pub tags: Vec<String>,
  #[serde(default)]
  pub occurred_at: Option<String>,
}

impl IncidentRequest {
  pub fn into_incident(self, now: DateTime<Utc>) -> ApiResult<Incident> {
    let severity = IncidentSeverity::from_str_loose(&self.severity)
      .ok_or_else(|| ApiError::bad_request("severity", format!("expected P1..P4, got {:?}", self.severity)))?;
    Ok(Incident {
      id: self.id,
      severity,
      description: self.description,
      root_cause: self.root_cause,
      tags: self.tags.into_iter().collect(),
      author: None,
      occurred_at: parse_optional("occurred_at", self.occurred_at.as_deref())?.unwrap_or(now),
    })
  }
}

#[derive(Debug, Deserialize)]
pub struct SuspectsRequest {
  #[serde(default)]
  pub incident_time: Option<String>,
  #[serde(default)]
  pub logs: Vec<LogLineBody>,
}

#[derive(Debug, Deserialize)]
pub struct StartMonitoringRequest {
  pub deployment_id: String,
  #[serde(default)]
  pub commit: Option<CommitRef>,
  #[serde(default)]
  pub duration_secs: Option<i64>,
  #[serde(default)]
  pub service: Option<String>,
  /// Backend-specific log selector (LogQL for Loki).
  #[serde(default)]
  pub query: Option<String>,
}

impl StartMonitoringRequest {
  pub fn filter(&self) -> LogFilter {
    LogFilter {
      service: self.service.clone(),
      query: self.query.clone(),
      ..LogFilter::default()
    }
  }
}

#[derive(Debug, Serialize)]
pub struct StartMonitoringResponse {
  pub window_id: String,
  pub status: MonitoringStatus,
}

#[derive(Debug, Default, Deserialize)]
pub struct PollRequest {
  /// Lines to evaluate instead of querying the log source.
  #[serde(default)]
  pub logs: Option<Vec<LogLineBody>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RollbackRequest {
  #[serde(default)]
  pub incident: Option<IncidentRequest>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CapabilitiesQuery {
  /// Re-probe every backend before answering.
  #[serde(default)]
  pub refresh: bool,
}

fn parse_optional(field: &str, value: Option<&str>) -> ApiResult<Option<DateTime<Utc>>> {
  match value {
    None => Ok(None),
    Some(v) => date::parse_timestamp(v)
      .map(Some)
      .ok_or_else(|| ApiError::bad_request(field, format!("unparseable timestamp {v:?}"))),
  }
}
