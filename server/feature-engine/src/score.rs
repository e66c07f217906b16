//! Structural measures: blast radius, test ratio, complexity, structural risk, explanations.

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};

use crate::change_type::is_test_path;
use crate::risk;
use crate::types::CommitFeatures;

/// Distinct top-level directories touched. Files at the repository root count
/// as one module together.
pub fn compute_blast_radius(files: &[String]) -> u32 {
  let modules: BTreeSet<&str> = files
    .iter()
    .map(|p| {
      let p = p.trim_start_matches("./").trim_start_matches('/');
      match p.split_once('/') {
        Some((top, _)) => top,
        None => "",
      }
    })
    .collect();
  modules.len() as u32
}

/// Test files / total files, 0 when nothing changed.
pub fn compute_test_ratio(files: &[String]) -> f64 {
  if files.is_empty() {
    return 0.0;
  }
  let tests = files.iter().filter(|p| is_test_path(p)).count();
  tests as f64 / files.len() as f64
}

/// Weekend, or before 06:00 / from 22:00 UTC.
pub fn is_risky_time(ts: &DateTime<Utc>) -> bool {
  matches!(ts.weekday(), Weekday::Sat | Weekday::Sun) || ts.hour() < 6 || ts.hour() >= 22
}

/// Complexity 0–10 from file count, language spread, churn and directory depth.
pub fn compute_complexity(features: &CommitFeatures) -> f64 {
  let files = &features.files;
  let extensions: BTreeSet<&str> = files
    .iter()
    .filter_map(|f| f.rsplit_once('.').map(|(_, ext)| ext))
    .collect();
  let avg_depth = if files.is_empty() {
    0
  } else {
    files.iter().map(|f| f.matches('/').count()).sum::<usize>() / files.len()
  };

  let raw = features.files_changed as f64 * 0.5
    + extensions.len() as f64 * 0.3
    + features.churn() as f64 / 100.0
    + avg_depth as f64 * 0.2;
  raw.min(10.0)
}

/// Structural risk 0–10: weighted sum over file count, churn, blast radius,
/// missing tests, risky time, and risky-tag bumps.
pub fn compute_structural_score(features: &CommitFeatures) -> f64 {
  let file_factor = (features.files_changed as f64 / 10.0).min(3.0);
  let churn_factor = (features.churn() as f64 / 200.0).min(3.0);
  let blast_factor = (features.blast_radius as f64 / 3.0).min(1.0);
  let test_factor = if features.files_changed == 0 {
    0.0
  } else {
    (1.0 - features.test_ratio) * 1.5
  };
  let time_factor = match &features.committed_at {
    Some(ts) if is_risky_time(ts) => 1.5,
    _ => 0.0,
  };
  let tag_factor: f64 = features.risky_tags.iter().map(|t| risk::tag_weight(t)).sum();

  let score = file_factor + churn_factor + blast_factor + test_factor + time_factor + tag_factor;
  score.clamp(0.0, 10.0)
}

/// Short human-readable reasons.
pub fn compute_explanations(features: &CommitFeatures) -> Vec<String> {
  let mut out: Vec<String> = features
    .risky_tags
    .iter()
    .filter_map(|t| risk::tag_explanation(t))
    .map(str::to_string)
    .collect();

  if features.files_changed > 0 && features.test_ratio < 0.2 {
    out.push("Low test coverage in this change".to_string());
  }
  if features.blast_radius >= 3 {
    out.push(format!("Touches {} top-level modules", features.blast_radius));
  }
  if features.committed_at.as_ref().is_some_and(is_risky_time) {
    out.push("Committed off-hours or on a weekend".to_string());
  }
  if features.is_heuristic() {
    out.push("Estimated from a plain diff; per-file stats unavailable".to_string());
  }
  out
}
