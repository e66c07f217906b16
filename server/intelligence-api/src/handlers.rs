//! HTTP handlers for the intelligence service.

use std::sync::Arc;

use axum::{
  extract::{Path, Query, State},
  http::StatusCode,
  Json,
};
use chrono::Utc;
use intelligence_engine::{
  CapabilitySet, IncidentAck, LogAnalysis, MonitoringStatus, RiskVerdict, SuspectedCause,
  TraceAnalysis,
};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::types::{
  into_lines, AnalyzeCommitRequest, AnalyzeLogsRequest, AnalyzeTracesRequest, CapabilitiesQuery,
  IncidentRequest, PollRequest, RollbackRequest, StartMonitoringRequest, StartMonitoringResponse,
  SuspectsRequest,
};

pub async fn health() -> &'static str {
  "ok"
}

pub async fn capabilities(
  State(state): State<Arc<AppState>>,
  Query(query): Query<CapabilitiesQuery>,
) -> Json<CapabilitySet> {
  if query.refresh {
    Json(state.engine.probe().await)
  } else {
    Json(state.engine.capability_status())
  }
}

pub async fn analyze_commit(
  State(state): State<Arc<AppState>>,
  Json(req): Json<AnalyzeCommitRequest>,
) -> ApiResult<Json<RiskVerdict>> {
  let verdict = match req.to_input()? {
    Some(input) => state.engine.analyze_input(input, Utc::now()).await?,
    None => {
      state
        .engine
        .analyze_commit(&req.repository, &req.commit_hash, req.diff)
        .await?
    }
  };
  Ok(Json(verdict))
}

pub async fn analyze_logs(
  State(state): State<Arc<AppState>>,
  Json(req): Json<AnalyzeLogsRequest>,
) -> ApiResult<Json<LogAnalysis>> {
  if req.logs.is_empty() {
    return Err(ApiError::bad_request("logs", "must not be empty"));
  }
  let now = Utc::now();
  let lines = into_lines(req.logs, now);
  let baseline = req.baseline.map(|b| into_lines(b, now));
  Ok(Json(state.engine.analyze_logs(&lines, baseline.as_deref())))
}

pub async fn analyze_traces(
  State(state): State<Arc<AppState>>,
  Json(req): Json<AnalyzeTracesRequest>,
) -> ApiResult<Json<TraceAnalysis>> {
  let analysis = state
    .engine
    .analyze_traces(&req.traces, req.service_name.as_deref())?;
  Ok(Json(analysis))
}

pub async fn record_incident(
  State(state): State<Arc<AppState>>,
  Json(req): Json<IncidentRequest>,
) -> ApiResult<(StatusCode, Json<IncidentAck>)> {
  let incident = req.into_incident(Utc::now())?;
  let ack = state.engine.record_incident(incident).await?;
  let status = if ack.recorded {
    StatusCode::CREATED
  } else {
    StatusCode::OK
  };
  Ok((status, Json(ack)))
}

pub async fn suspects(
  State(state): State<Arc<AppState>>,
  Json(req): Json<SuspectsRequest>,
) -> ApiResult<Json<Vec<SuspectedCause>>> {
  let now = Utc::now();
  let incident_time = match req.incident_time.as_deref() {
    Some(t) => crate::date::parse_timestamp(t)
      .ok_or_else(|| ApiError::bad_request("incident_time", format!("unparseable timestamp {t:?}")))?,
    None => now,
  };
  let lines = into_lines(req.logs, incident_time);
  Ok(Json(state.engine.suspect_commits(incident_time, &lines).await))
}

pub async fn start_monitoring(
  State(state): State<Arc<AppState>>,
  Json(req): Json<StartMonitoringRequest>,
) -> ApiResult<(StatusCode, Json<StartMonitoringResponse>)> {
  let window_id = state
    .engine
    .start_monitoring(&req.deployment_id, req.commit.clone(), req.duration_secs, req.filter())
    .await?;
  let status = state.engine.window_status(&window_id).await?;
  Ok((
    StatusCode::CREATED,
    Json(StartMonitoringResponse { window_id, status }),
  ))
}

pub async fn poll_monitoring(
  State(state): State<Arc<AppState>>,
  Path(window_id): Path<String>,
  body: Option<Json<PollRequest>>,
) -> ApiResult<Json<MonitoringStatus>> {
  let req = body.map(|Json(b)| b).unwrap_or_default();
  let logs = req.logs.map(|l| into_lines(l, Utc::now()));
  Ok(Json(state.engine.poll_monitoring(&window_id, logs).await?))
}

pub async fn accept_rollback(
  State(state): State<Arc<AppState>>,
  Path(window_id): Path<String>,
  body: Option<Json<RollbackRequest>>,
) -> ApiResult<Json<MonitoringStatus>> {
  let req = body.map(|Json(b)| b).unwrap_or_default();
  let incident = match req.incident {
    Some(i) => Some(i.into_incident(Utc::now())?),
    None => None,
  };
  Ok(Json(state.engine.accept_rollback(&window_id, incident).await?))
}

pub async fn stop_monitoring(
  State(state): State<Arc<AppState>>,
  Path(window_id): Path<String>,
) -> ApiResult<Json<MonitoringStatus>> {
  Ok(Json(state.engine.stop_monitoring(&window_id).await?))
}

pub async fn window_status(
  State(state): State<Arc<AppState>>,
  Path(window_id): Path<String>,
) -> ApiResult<Json<MonitoringStatus>> {
  Ok(Json(state.engine.window_status(&window_id).await?))
}
