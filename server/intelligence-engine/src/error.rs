//! Structured error types for the intelligence engine.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
  /// A collaborator did not answer within its timeout or refused the call.
  #[error("unavailable: {backend}: {reason}")]
  Unavailable { backend: String, reason: String },

  /// Operation on a terminal window, or a record that cannot be applied.
  #[error("invalid state: {0}")]
  InvalidState(String),

  /// Structurally valid but empty input (e.g. zero log lines).
  #[error("data quality: {0}")]
  DataQuality(String),

  #[error("validation: {field}: {reason}")]
  Validation { field: String, reason: String },

  #[error("not found: {0}")]
  NotFound(String),

  #[error("json: {0}")]
  Json(#[from] serde_json::Error),
}

impl EngineError {
  pub fn unavailable(backend: &str, reason: impl std::fmt::Display) -> Self {
    Self::Unavailable {
      backend: backend.to_string(),
      reason: reason.to_string(),
    }
  }

  pub fn invalid_state(msg: impl Into<String>) -> Self {
    Self::InvalidState(msg.into())
  }

  pub fn validation(field: &str, reason: &str) -> Self {
    Self::Validation {
      field: field.to_string(),
      reason: reason.to_string(),
    }
  }

  pub fn not_found(what: impl Into<String>) -> Self {
    Self::NotFound(what.into())
  }
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
