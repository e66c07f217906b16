//! Rank recently analyzed commits as suspects for an incident.
//!
//! Scoring: weighted combination of error-category overlap with the commit's
//! risky tags, the commit's own risk score, time proximity and the incident
//! history of its tags; docs/tests-only commits are downweighted.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use feature_engine::CommitType;

use crate::config::CorrelationConfig;
use crate::normalize::ErrorCategory;
use crate::types::{CommitRecord, SuspectedCause};

/// Penalty applied to commits that only touch tests or docs.
const LOW_PRIORITY_PENALTY: f64 = 0.2;

/// Rank `commits` against an incident at `incident_time` whose error logs fell
/// into `categories`. `tag_confidence` holds learned confidence per tag.
///
/// Returns suspects sorted by score descending, then commit hash for determinism.
pub fn rank_suspects(
  commits: &[CommitRecord],
  incident_time: &DateTime<Utc>,
  categories: &BTreeMap<ErrorCategory, u64>,
  tag_confidence: &BTreeMap<String, f64>,
  config: &CorrelationConfig,
) -> Vec<SuspectedCause> {
  let mut suspects: Vec<SuspectedCause> = commits
    .iter()
    .filter_map(|record| {
      let f = &record.features;
      let mut evidence = Vec::new();

      let shipped_at = f.committed_at.unwrap_or(record.analyzed_at);
      let hours_before = (*incident_time - shipped_at).num_minutes() as f64 / 60.0;
      if hours_before < 0.0 || hours_before > config.lookback_hours {
        return None;
      }
      let time_score = 1.0 - hours_before / config.lookback_hours.max(f64::EPSILON);
      evidence.push(format!("{:.1}h before incident", hours_before));

      // Category overlap: share of observed error categories this commit's tags explain.
      let total_errors: u64 = categories.values().sum();
      let explained: u64 = categories
        .iter()
        .filter(|(cat, _)| cat.related_tags().iter().any(|t| f.risky_tags.contains(*t)))
        .map(|(cat, n)| {
          evidence.push(format!("{} errors match {}", n, cat.as_str()));
          *n
        })
        .sum();
      let category_score = if total_errors == 0 {
        0.0
      } else {
        explained as f64 / total_errors as f64
      };

      let risk_score = (record.risk_score / 10.0).clamp(0.0, 1.0);
      if record.risk_score >= 6.0 {
        evidence.push(format!("risk score {:.1}", record.risk_score));
      }

      let history_score = f
        .risky_tags
        .iter()
        .filter_map(|t| tag_confidence.get(t).map(|c| (t, *c)))
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(tag, conf)| {
          evidence.push(format!("{} changes preceded incidents ({:.2})", tag, conf));
          conf
        })
        .unwrap_or(0.0);

      let low_priority = matches!(f.commit_type, CommitType::Test | CommitType::Doc);
      if low_priority {
        evidence.push("docs/tests only".into());
      }

      let total = (config.category_weight * category_score
        + config.risk_weight * risk_score
        + config.time_weight * time_score
        + config.history_weight * history_score
        - if low_priority { LOW_PRIORITY_PENALTY } else { 0.0 })
      .max(0.0);

      if total > 0.0 {
        Some(SuspectedCause {
          repository: f.repository.clone(),
          commit_hash: f.commit_hash.clone(),
          score: (total * 1000.0).round() / 1000.0,
          evidence,
        })
      } else {
        None
      }
    })
    .collect();

  // Deterministic sort: score desc, then commit hash asc.
  suspects.sort_by(|a, b| {
    b.score
      .partial_cmp(&a.score)
      .unwrap_or(std::cmp::Ordering::Equal)
      .then_with(|| a.commit_hash.cmp(&b.commit_hash))
  });

  suspects
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::{Duration, TimeZone};
  use feature_engine::{CommitInput, FileStat};

  fn record(hash: &str, message: &str, paths: &[&str], risk: f64, hours_before: i64) -> CommitRecord {
    let incident = incident_time();
    let mut features = feature_engine::extract(
      &CommitInput {
        repository: "acme/api".into(),
        commit_hash: hash.into(),
        message: message.into(),
        files: Some(paths.iter().map(|p| FileStat::new(*p, 10, 2)).collect()),
        ..Default::default()
      },
      None,
    );
    features.committed_at = Some(incident - Duration::hours(hours_before));
    CommitRecord {
      features,
      risk_score: risk,
      incident_probability: risk / 10.0,
      analyzed_at: incident - Duration::hours(hours_before),
    }
  }

  fn incident_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap()
  }

  #[test]
  fn category_overlap_ranks_higher() {
    let commits = vec![
      record("aaa", "feat: sessions", &["auth/session.py"], 4.0, 2),
      record("bbb", "feat: widgets", &["src/widgets.py"], 4.0, 2),
    ];
    let cats = BTreeMap::from([(ErrorCategory::AuthFailure, 12)]);
    let suspects = rank_suspects(&commits, &incident_time(), &cats, &BTreeMap::new(), &CorrelationConfig::default());
    assert_eq!(suspects[0].commit_hash, "aaa");
    assert!(suspects[0].score > suspects[1].score);
    assert!(suspects[0].evidence.iter().any(|e| e.contains("auth_failure")));
  }

  #[test]
  fn commits_outside_lookback_are_ignored() {
    let commits = vec![
      record("old", "feat: x", &["src/x.py"], 9.0, 30),
      record("future", "feat: y", &["src/y.py"], 9.0, -1),
    ];
    let suspects = rank_suspects(
      &commits,
      &incident_time(),
      &BTreeMap::new(),
      &BTreeMap::new(),
      &CorrelationConfig::default(),
    );
    assert!(suspects.is_empty());
  }

  #[test]
  fn deterministic_ordering_by_commit_hash() {
    let commits = vec![
      record("zzz", "feat: x", &["src/x.py"], 5.0, 3),
      record("aaa", "feat: x", &["src/x.py"], 5.0, 3),
    ];
    let suspects = rank_suspects(
      &commits,
      &incident_time(),
      &BTreeMap::new(),
      &BTreeMap::new(),
      &CorrelationConfig::default(),
    );
    assert_eq!(suspects.len(), 2);
    assert_eq!(suspects[0].commit_hash, "aaa");
    assert_eq!(suspects[1].commit_hash, "zzz");
  }

  #[test]
  fn prior_incidents_boost() {
    let commits = vec![
      record("pay", "feat: billing", &["billing/charge.py"], 3.0, 5),
      record("cfg", "feat: tune", &["src/tune.py"], 3.0, 5),
    ];
    let conf = BTreeMap::from([("payment".to_string(), 0.8)]);
    let suspects =
      rank_suspects(&commits, &incident_time(), &BTreeMap::new(), &conf, &CorrelationConfig::default());
    assert_eq!(suspects[0].commit_hash, "pay");
  }

  #[test]
  fn docs_only_downweighted() {
    let commits = vec![
      record("docs", "docs: update guide", &["docs/guide.md"], 1.0, 20),
    ];
    let suspects = rank_suspects(
      &commits,
      &incident_time(),
      &BTreeMap::new(),
      &BTreeMap::new(),
      &CorrelationConfig::default(),
    );
    assert!(suspects.is_empty());
  }
}
