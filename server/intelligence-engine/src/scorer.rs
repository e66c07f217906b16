//! Risk Scorer: feature record + memory lookups -> risk verdict.
//!
//! Pure: the engine gathers a [`ScoreContext`] from memory and hands it in.
//!
//! - structural score from the feature engine (0..10)
//! - incident probability: noisy-OR over the confidences of tags memory has
//!   seen; structural/10 when no tag has been seen
//! - blend `(1-w)*structural + w*10*p`, then a bounded author nudge
//! - confidence from memory size, seen-tag fraction and provenance

use std::collections::BTreeSet;

use feature_engine::{compute_complexity, compute_explanations, compute_structural_score, risk};

use crate::config::ScoringConfig;
use crate::types::{
  AuthorHistory, CommitFeatures, ExpectedImpact, IncidentSeverity, Pattern, PatternMatch,
  RecommendedAction, RiskVerdict, SimilarIncident,
};

/// Confidence reported for a tag memory has never seen.
const UNSEEN_TAG_PRIOR: f64 = 0.5;
/// Author rate treated as neutral by the nudge.
const NEUTRAL_AUTHOR_RATE: f64 = 0.1;

/// Memory-derived inputs to one verdict.
#[derive(Debug, Clone, Default)]
pub struct ScoreContext {
  /// One entry per risky tag of the commit; None when memory has not seen it.
  pub patterns: Vec<(String, Option<Pattern>)>,
  pub author: Option<AuthorHistory>,
  pub similar: Vec<SimilarIncident>,
  /// Total observations in memory.
  pub memory_size: usize,
}

pub fn score(features: &CommitFeatures, ctx: &ScoreContext, config: &ScoringConfig) -> RiskVerdict {
  let structural = compute_structural_score(features);

  let seen: Vec<&Pattern> = ctx
    .patterns
    .iter()
    .filter_map(|(_, p)| p.as_ref())
    .filter(|p| p.occurrence_count > 0)
    .collect();
  let author = ctx.author.filter(|a| a.commits > 0);
  let structural_only = seen.is_empty() && author.is_none();

  let incident_probability = if seen.is_empty() {
    structural / 10.0
  } else {
    1.0 - seen.iter().map(|p| 1.0 - p.confidence).product::<f64>()
  };
  let incident_probability = incident_probability.clamp(0.0, 1.0);

  let w = config.memory_weight.clamp(0.0, 1.0);
  let mut risk = if seen.is_empty() {
    structural
  } else {
    (1.0 - w) * structural + w * 10.0 * incident_probability
  };
  if let Some(a) = author {
    let swing = config.author_max_swing.abs() * 10.0;
    let delta = ((a.incident_rate - NEUTRAL_AUTHOR_RATE) * 10.0 * config.author_weight).clamp(-swing, swing);
    risk += delta;
  }
  let risk_score = round3(risk.clamp(0.0, 10.0));

  let confidence = confidence(features, seen.len(), ctx.memory_size, structural_only, config);

  let pattern_matches: Vec<PatternMatch> = ctx
    .patterns
    .iter()
    .map(|(tag, p)| match p {
      Some(p) if p.occurrence_count > 0 => PatternMatch {
        tag: tag.clone(),
        confidence: round3(p.confidence),
        occurrence_count: p.occurrence_count,
        incident_count: p.incident_count,
        seen: true,
      },
      _ => PatternMatch {
        tag: tag.clone(),
        confidence: UNSEEN_TAG_PRIOR,
        occurrence_count: 0,
        incident_count: 0,
        seen: false,
      },
    })
    .collect();

  let typical = seen.iter().filter_map(|p| p.typical_impact).min();
  let expected_impact = expected_impact(risk_score, typical);

  RiskVerdict {
    repository: features.repository.clone(),
    commit_hash: features.commit_hash.clone(),
    risk_score,
    structural_score: round3(structural),
    confidence: round3(confidence),
    complexity: round3(compute_complexity(features)),
    blast_radius: features.blast_radius,
    incident_probability: round3(incident_probability),
    expected_impact,
    likely_failure_mode: likely_failure_mode(&seen, &features.risky_tags),
    similar_incidents: ctx.similar.clone(),
    recommended_action: recommended_action(incident_probability),
    recommendations: recommendations(features, &seen, &ctx.similar, author),
    watch_metrics: watch_metrics(&features.risky_tags),
    monitoring_window_minutes: monitoring_window_minutes(risk_score),
    pattern_matches,
    structural_only,
    provenance: features.provenance,
    features: features.clone(),
  }
}

fn confidence(
  features: &CommitFeatures,
  seen_tags: usize,
  memory_size: usize,
  structural_only: bool,
  config: &ScoringConfig,
) -> f64 {
  let tier = match memory_size {
    0..=9 => 0.3,
    10..=49 => 0.6,
    50..=199 => 0.8,
    _ => 0.95,
  };
  let total_tags = features.risky_tags.len();
  let coverage = if total_tags == 0 {
    1.0
  } else {
    0.5 + 0.5 * seen_tags as f64 / total_tags as f64
  };
  let provenance = if features.is_heuristic() {
    config.heuristic_confidence_factor
  } else {
    1.0
  };
  let mut c = tier * coverage * provenance;
  if structural_only {
    c = c.min(config.cold_start_confidence);
  }
  c.clamp(0.0, 1.0)
}

pub fn recommended_action(incident_probability: f64) -> RecommendedAction {
  if incident_probability >= 0.8 {
    RecommendedAction::Block
  } else if incident_probability >= 0.6 {
    RecommendedAction::StagedRollout
  } else if incident_probability >= 0.4 {
    RecommendedAction::ProceedWithCaution
  } else {
    RecommendedAction::Proceed
  }
}

fn expected_impact(risk_score: f64, typical: Option<IncidentSeverity>) -> ExpectedImpact {
  match typical {
    Some(IncidentSeverity::P1) => return ExpectedImpact::High,
    Some(IncidentSeverity::P2) if risk_score >= 4.0 => return ExpectedImpact::High,
    _ => {}
  }
  if risk_score >= 7.0 {
    ExpectedImpact::High
  } else if risk_score >= 4.0 || typical == Some(IncidentSeverity::P2) {
    ExpectedImpact::Medium
  } else {
    ExpectedImpact::Low
  }
}

fn failure_mode_for(tag: &str) -> Option<&'static str> {
  let s = match tag {
    risk::AUTH_LOGIC => "authentication or session failures",
    risk::DB_MIGRATION => "database errors or schema mismatch",
    risk::CONFIG_CHANGE => "misconfiguration at startup",
    risk::DEPENDENCY_VERSION => "dependency incompatibility",
    risk::API_CONTRACT => "client contract breakage",
    risk::SECRETS => "credential or secret misuse",
    risk::PAYMENT => "payment processing failures",
    _ => return None,
  };
  Some(s)
}

/// Failure mode of the most incident-prone seen tag, else of the first tag.
fn likely_failure_mode(seen: &[&Pattern], tags: &BTreeSet<String>) -> Option<String> {
  let strongest = seen
    .iter()
    .max_by(|a, b| {
      a.confidence
        .partial_cmp(&b.confidence)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then_with(|| b.tag.cmp(&a.tag))
    })
    .map(|p| p.tag.as_str());
  strongest
    .or_else(|| tags.iter().next().map(String::as_str))
    .and_then(failure_mode_for)
    .map(str::to_string)
}

fn recommendations(
  features: &CommitFeatures,
  seen: &[&Pattern],
  similar: &[SimilarIncident],
  author: Option<AuthorHistory>,
) -> Vec<String> {
  let mut out = compute_explanations(features);
  for p in seen.iter().filter(|p| p.incident_count > 0) {
    out.push(format!(
      "`{}` changes preceded incidents {} of {} times",
      p.tag, p.incident_count, p.occurrence_count
    ));
  }
  if let Some(top) = similar.first() {
    out.push(format!(
      "Similar to incident {} ({:?}; shared: {})",
      top.incident_id,
      top.severity,
      top.shared_tags.join(", ")
    ));
  }
  if let Some(a) = author.filter(|a| a.incident_rate > NEUTRAL_AUTHOR_RATE) {
    out.push(format!(
      "Author linked to {} incidents in {} recent changes",
      a.incidents, a.commits
    ));
  }
  out
}

fn watch_metrics(tags: &BTreeSet<String>) -> Vec<String> {
  let mut out = vec!["error_rate".to_string(), "latency_p95".to_string()];
  for tag in tags {
    let extra: &[&str] = match tag.as_str() {
      risk::AUTH_LOGIC | risk::SECRETS => &["auth_failure_rate"],
      risk::DB_MIGRATION => &["db_query_latency", "db_connection_errors"],
      risk::CONFIG_CHANGE | risk::DEPENDENCY_VERSION => &["startup_errors"],
      risk::API_CONTRACT => &["http_4xx_rate"],
      risk::PAYMENT => &["payment_success_rate"],
      _ => &[],
    };
    for m in extra {
      if !out.iter().any(|x| x == m) {
        out.push(m.to_string());
      }
    }
  }
  out
}

fn monitoring_window_minutes(risk_score: f64) -> u32 {
  if risk_score >= 7.0 {
    60
  } else if risk_score >= 4.0 {
    30
  } else {
    15
  }
}

fn round3(x: f64) -> f64 {
  (x * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
  use super::*;
  use feature_engine::{CommitInput, FileStat};

  fn features(paths: &[&str], added: u32) -> CommitFeatures {
    feature_engine::extract(
      &CommitInput {
        repository: "acme/api".into(),
        commit_hash: "abc".into(),
        message: "feat: change".into(),
        files: Some(paths.iter().map(|p| FileStat::new(*p, added, 0)).collect()),
        ..Default::default()
      },
      None,
    )
  }

  fn seen(tag: &str, occ: u64, inc: u64) -> (String, Option<Pattern>) {
    (
      tag.to_string(),
      Some(Pattern {
        tag: tag.to_string(),
        occurrence_count: occ,
        incident_count: inc,
        confidence: (inc as f64 + 1.0) / (occ as f64 + 2.0),
        typical_impact: if inc > 0 { Some(IncidentSeverity::P2) } else { None },
      }),
    )
  }

  #[test]
  fn cold_start_is_structural_only() {
    let f = features(&["auth/login.py", "src/a.py"], 40);
    let ctx = ScoreContext {
      patterns: vec![("auth_logic".into(), None)],
      ..ScoreContext::default()
    };
    let v = score(&f, &ctx, &ScoringConfig::default());
    assert!(v.structural_only);
    assert_eq!(v.risk_score, v.structural_score);
    assert!(v.confidence <= 0.3);
    assert!(!v.pattern_matches[0].seen);
    assert_eq!(v.pattern_matches[0].confidence, 0.5);
  }

  #[test]
  fn learned_incidents_raise_risk() {
    let f = features(&["auth/login.py"], 10);
    let cold = score(
      &f,
      &ScoreContext {
        patterns: vec![("auth_logic".into(), None)],
        ..Default::default()
      },
      &ScoringConfig::default(),
    );
    let warm = score(
      &f,
      &ScoreContext {
        patterns: vec![seen("auth_logic", 10, 9)],
        memory_size: 60,
        ..Default::default()
      },
      &ScoringConfig::default(),
    );
    assert!(!warm.structural_only);
    assert!(warm.risk_score > cold.risk_score);
    assert!(warm.incident_probability > 0.8);
    assert_eq!(warm.recommended_action, RecommendedAction::Block);
    assert!(warm.confidence > cold.confidence);
  }

  #[test]
  fn noisy_or_combines_tags() {
    let f = features(&["auth/login.py", "db/migrate_1.sql"], 10);
    let ctx = ScoreContext {
      patterns: vec![seen("auth_logic", 2, 0), seen("db_migration", 2, 0)],
      memory_size: 4,
      ..Default::default()
    };
    let v = score(&f, &ctx, &ScoringConfig::default());
    // 1 - (1-0.25)^2
    assert!((v.incident_probability - 0.438).abs() < 1e-3);
    assert_eq!(v.recommended_action, RecommendedAction::ProceedWithCaution);
  }

  #[test]
  fn author_nudge_is_bounded() {
    let f = features(&["src/a.py"], 10);
    let base = score(&f, &ScoreContext::default(), &ScoringConfig::default());
    let bad_author = ScoreContext {
      author: Some(AuthorHistory {
        commits: 10,
        incidents: 10,
        incident_rate: 1.0,
      }),
      ..Default::default()
    };
    let v = score(&f, &bad_author, &ScoringConfig::default());
    assert!(!v.structural_only);
    // max swing 0.1 on a 0..10 scale
    assert!((v.risk_score - base.risk_score - 1.0).abs() < 1e-9);
  }

  #[test]
  fn heuristic_records_lower_confidence() {
    let detailed = features(&["src/a.py"], 10);
    let mut heuristic = detailed.clone();
    heuristic.provenance = feature_engine::Provenance::Heuristic;
    let ctx = ScoreContext {
      memory_size: 300,
      author: Some(AuthorHistory {
        commits: 5,
        incidents: 0,
        incident_rate: 0.0,
      }),
      ..Default::default()
    };
    let a = score(&detailed, &ctx, &ScoringConfig::default());
    let b = score(&heuristic, &ctx, &ScoringConfig::default());
    assert!(b.confidence < a.confidence);
  }

  #[test]
  fn watch_metrics_follow_tags() {
    let tags: BTreeSet<String> = ["db_migration".to_string(), "payment".to_string()].into();
    let m = watch_metrics(&tags);
    assert_eq!(&m[..2], &["error_rate".to_string(), "latency_p95".to_string()]);
    assert!(m.contains(&"db_connection_errors".to_string()));
    assert!(m.contains(&"payment_success_rate".to_string()));
  }
}
