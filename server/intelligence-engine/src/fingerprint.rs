//! Stable identifiers: error-pattern fingerprints and window ids.

use chrono::{DateTime, Utc};

/// Fingerprint of a normalized error message.
///
/// Uses blake3 for a fast, deterministic hash; the first 16 bytes (32 hex
/// chars) are compact but collision-resistant.
pub fn message_fingerprint(normalized: &str) -> String {
  let hash = blake3::hash(normalized.as_bytes());
  hash.to_hex()[..32].to_string()
}

/// Stable window id: hash of deployment id + start minute.
pub fn window_id(deployment_id: &str, started_at: &DateTime<Utc>) -> String {
  let mut hasher = blake3::Hasher::new();
  hasher.update(deployment_id.as_bytes());
  hasher.update(b"|");
  hasher.update(started_at.format("%Y-%m-%dT%H:%M:%S").to_string().as_bytes());
  let hex = hasher.finalize().to_hex();
  format!("win-{}", &hex[..16])
}

/// Id of the incident synthesized when a rollback is accepted without one.
/// Keyed by window, so every rolled-back window of a deployment is its own incident.
pub fn synthesized_incident_id(window_id: &str) -> String {
  format!("auto-{}", window_id)
}
