//! Commit type derived from the commit message, with a file-path fallback.

use crate::types::CommitType;

/// Keyword sets in priority order; the first set with a matching word wins.
const PRIORITY: &[(CommitType, &[&str])] = &[
  (
    CommitType::Bugfix,
    &["fix", "fixes", "fixed", "bug", "bugfix", "hotfix", "patch"],
  ),
  (
    CommitType::Feature,
    &["feat", "feature", "add", "adds", "added", "implement"],
  ),
  (
    CommitType::Refactor,
    &["refactor", "cleanup", "improve", "restructure"],
  ),
  (CommitType::Test, &["test", "tests", "spec"]),
  (CommitType::Doc, &["doc", "docs", "readme", "documentation"]),
];

/// Commit type from message words, falling back to the changed paths when the
/// message says nothing (all tests → Test, all docs → Doc).
pub fn classify_commit_type(commit_message: &str, files: &[String]) -> CommitType {
  let msg = commit_message.to_lowercase();
  let words: Vec<&str> = msg
    .split(|c: char| !c.is_ascii_alphanumeric())
    .filter(|w| !w.is_empty())
    .collect();

  for (kind, keywords) in PRIORITY {
    if words.iter().any(|w| keywords.contains(w)) {
      return *kind;
    }
  }

  if !files.is_empty() {
    if files.iter().all(|p| is_test_path(p)) {
      return CommitType::Test;
    }
    if files.iter().all(|p| is_doc_path(p)) {
      return CommitType::Doc;
    }
  }
  CommitType::Other
}

/// Path looks like a test file or lives under a test directory.
pub fn is_test_path(path: &str) -> bool {
  let p = path.to_lowercase();
  p.starts_with("test")
    || p.starts_with("spec/")
    || p.contains("/test")
    || p.contains("_test.")
    || p.contains(".test.")
    || p.contains(".spec.")
    || p.contains("/spec/")
    || p.contains("__tests__")
}

pub fn is_doc_path(path: &str) -> bool {
  let p = path.to_lowercase();
  p.starts_with("doc") || p.contains("/doc") || p.contains("readme") || p.ends_with(".md")
}
