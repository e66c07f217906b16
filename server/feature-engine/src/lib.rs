//! Change-risk feature engine: rule-based commit feature extraction; no DB, no network.
//! Used by the intelligence engine as a library and by the binary for stdin/stdout.

mod change_type;
mod diff;
pub mod risk;
mod score;
mod types;

pub use change_type::{classify_commit_type, is_test_path};
pub use diff::estimate_file_stats;
pub use score::{
  compute_blast_radius, compute_complexity, compute_explanations, compute_structural_score,
  compute_test_ratio, is_risky_time,
};
pub use types::{
  AuthorStats, CommitFeatures, CommitInput, CommitType, FileStat, Output, Provenance,
};

/// Placeholder path for diff hunks that carry no file header.
const UNNAMED_FILE: &str = "unknown";

/// Extract the feature record for one commit (pure; author stats are passed in).
///
/// Per-file stats make the record `Detailed`; otherwise the diff (if any) is
/// parsed heuristically and the record is `Heuristic`.
pub fn extract(input: &CommitInput, author_stats: Option<AuthorStats>) -> CommitFeatures {
  let (stats, provenance) = match (&input.files, &input.diff_text) {
    (Some(files), _) => (files.clone(), Provenance::Detailed),
    (None, Some(diff)) => (estimate_file_stats(diff), Provenance::Heuristic),
    (None, None) => (Vec::new(), Provenance::Heuristic),
  };

  let files: Vec<String> = stats
    .iter()
    .map(|f| {
      if f.path.is_empty() {
        UNNAMED_FILE.to_string()
      } else {
        f.path.clone()
      }
    })
    .collect();
  let lines_added = stats.iter().fold(0u32, |n, f| n.saturating_add(f.additions));
  let lines_deleted = stats.iter().fold(0u32, |n, f| n.saturating_add(f.deletions));

  CommitFeatures {
    repository: input.repository.clone(),
    commit_hash: input.commit_hash.clone(),
    files_changed: files.len() as u32,
    lines_added,
    lines_deleted,
    blast_radius: compute_blast_radius(&files),
    test_ratio: compute_test_ratio(&files),
    commit_type: classify_commit_type(&input.message, &files),
    risky_tags: risk::compute_risky_tags(&files, input.diff_text.as_deref()),
    author: input.author.clone(),
    author_stats,
    committed_at: input.timestamp,
    provenance,
    files,
  }
}

/// Run the engine on parsed input and return the CLI output (no I/O).
pub fn run(input: &CommitInput) -> Output {
  let features = extract(input, None);
  Output {
    structural_score: compute_structural_score(&features),
    complexity: compute_complexity(&features),
    explanations: compute_explanations(&features),
    features,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn detailed(paths: &[&str], added: u32, deleted: u32) -> CommitInput {
    let n = paths.len() as u32;
    CommitInput {
      repository: "acme/api".to_string(),
      commit_hash: "abc123".to_string(),
      message: "feat: add login throttling".to_string(),
      author: Some("dev@example.com".to_string()),
      timestamp: None,
      files: Some(
        paths
          .iter()
          .enumerate()
          .map(|(i, p)| {
            // Spread the totals across files; the remainder lands on the first file.
            let extra_a = if i == 0 { added % n } else { 0 };
            let extra_d = if i == 0 { deleted % n } else { 0 };
            FileStat::new(*p, added / n + extra_a, deleted / n + extra_d)
          })
          .collect(),
      ),
      diff_text: None,
    }
  }

  fn risky_commit() -> CommitInput {
    let mut paths = vec!["auth/login.py", "db/migrate_001.sql"];
    let rest = [
      "src/app/a.py",
      "src/app/b.py",
      "src/app/c.py",
      "src/app/d.py",
      "src/core/e.py",
      "src/core/f.py",
      "lib/g.py",
      "lib/h.py",
      "lib/i.py",
      "lib/j.py",
    ];
    paths.extend(rest);
    detailed(&paths, 456, 78)
  }

  #[test]
  fn risky_commit_features() {
    let f = extract(&risky_commit(), None);
    assert_eq!(f.files_changed, 12);
    assert_eq!(f.lines_added, 456);
    assert_eq!(f.lines_deleted, 78);
    assert_eq!(f.test_ratio, 0.0);
    assert_eq!(f.provenance, Provenance::Detailed);
    let tags: Vec<&str> = f.risky_tags.iter().map(String::as_str).collect();
    assert_eq!(tags, vec![risk::AUTH_LOGIC, risk::DB_MIGRATION]);
    assert_eq!(f.blast_radius, 4);
  }

  #[test]
  fn tested_untagged_commit_scores_lower() {
    let risky = extract(&risky_commit(), None);
    let test_paths: Vec<String> = (0..12).map(|i| format!("tests/test_mod_{i}.py")).collect();
    let refs: Vec<&str> = test_paths.iter().map(String::as_str).collect();
    let safe = extract(&detailed(&refs, 456, 78), None);
    assert_eq!(safe.test_ratio, 1.0);
    assert!(safe.risky_tags.is_empty());

    let risky_score = compute_structural_score(&risky);
    let safe_score = compute_structural_score(&safe);
    assert!(
      risky_score >= safe_score + 2.0,
      "risky {risky_score} should clearly exceed safe {safe_score}"
    );
  }

  #[test]
  fn diff_fallback_is_heuristic() {
    let input = CommitInput {
      repository: "acme/api".into(),
      commit_hash: "def456".into(),
      message: "fix session expiry".into(),
      diff_text: Some("diff --git a/src/session.rs b/src/session.rs\n+++ b/src/session.rs\n+x\n-y\n".into()),
      ..CommitInput::default()
    };
    let f = extract(&input, None);
    assert!(f.is_heuristic());
    assert_eq!(f.files, vec!["src/session.rs".to_string()]);
    assert_eq!(f.commit_type, CommitType::Bugfix);
    assert!(f.risky_tags.contains(risk::AUTH_LOGIC));
  }

  #[test]
  fn no_data_yields_empty_heuristic_record() {
    let input = CommitInput {
      repository: "acme/api".into(),
      commit_hash: "000".into(),
      ..CommitInput::default()
    };
    let f = extract(&input, None);
    assert!(f.is_heuristic());
    assert_eq!(f.files_changed, 0);
    assert_eq!(compute_structural_score(&f), 0.0);
  }

  #[test]
  fn extraction_is_deterministic() {
    let a = serde_json::to_string(&extract(&risky_commit(), None)).unwrap();
    let b = serde_json::to_string(&extract(&risky_commit(), None)).unwrap();
    assert_eq!(a, b);
  }

  #[test]
  fn line_totals_saturate_instead_of_wrapping() {
    let mut input = detailed(&["vendor/a.js", "vendor/b.js"], 0, 0);
    input.files = Some(vec![
      FileStat::new("vendor/a.js", u32::MAX - 1, 7),
      FileStat::new("vendor/b.js", 5, u32::MAX),
    ]);
    let f = extract(&input, None);
    assert_eq!(f.lines_added, u32::MAX);
    assert_eq!(f.lines_deleted, u32::MAX);
    assert!(compute_structural_score(&f) <= 10.0);
  }
}
