//! HTTP error mapping.

use axum::{
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use intelligence_engine::{EngineError, ErrorOutput};
use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum ApiError {
  #[error(transparent)]
  Engine(#[from] EngineError),

  #[error("Invalid {field}: {reason}")]
  BadRequest { field: String, reason: String },
}

impl ApiError {
  pub fn bad_request(field: &str, reason: impl Into<String>) -> Self {
    Self::BadRequest {
      field: field.to_string(),
      reason: reason.into(),
    }
  }

  pub fn status(&self) -> StatusCode {
    match self {
      ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
      ApiError::Engine(e) => match e {
        EngineError::Validation { .. } => StatusCode::BAD_REQUEST,
        EngineError::NotFound(_) => StatusCode::NOT_FOUND,
        EngineError::InvalidState(_) => StatusCode::CONFLICT,
        EngineError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::DataQuality(_) | EngineError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
      },
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = self.status();
    let mut body = ErrorOutput::new(self.to_string());
    match &self {
      ApiError::BadRequest { field, .. } => body = body.with_field(field.as_str()),
      ApiError::Engine(EngineError::Validation { field, .. }) => body = body.with_field(field.as_str()),
      _ => {}
    }
    if status.is_server_error() {
      error!(status = status.as_u16(), error = %self, "request failed");
    } else {
      warn!(status = status.as_u16(), error = %self, "request rejected");
    }
    (status, Json(body)).into_response()
  }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn engine_errors_map_to_statuses() {
    let cases = [
      (EngineError::validation("id", "must not be empty"), StatusCode::BAD_REQUEST),
      (EngineError::not_found("window x"), StatusCode::NOT_FOUND),
      (EngineError::invalid_state("closed"), StatusCode::CONFLICT),
      (EngineError::unavailable("memory", "down"), StatusCode::SERVICE_UNAVAILABLE),
    ];
    for (err, status) in cases {
      assert_eq!(ApiError::from(err).into_response().status(), status);
    }
  }

  #[test]
  fn bad_request_is_400() {
    let resp = ApiError::bad_request("severity", "expected P1..P4").into_response();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
  }
}
