//! Risky-pattern tags derived from file paths and diff content.

use std::collections::BTreeSet;

pub const AUTH_LOGIC: &str = "auth_logic";
pub const DB_MIGRATION: &str = "db_migration";
pub const CONFIG_CHANGE: &str = "config_change";
pub const DEPENDENCY_VERSION: &str = "dependency_version";
pub const API_CONTRACT: &str = "api_contract";
pub const SECRETS: &str = "secrets";
pub const PAYMENT: &str = "payment";

/// One row of the tag table: a tag fires when any path signal appears in a
/// lowercased path, or any diff signal appears in the lowercased diff.
struct TagSignals {
  tag: &'static str,
  paths: &'static [&'static str],
  diff: &'static [&'static str],
}

const TAG_TABLE: &[TagSignals] = &[
  TagSignals {
    tag: AUTH_LOGIC,
    paths: &["auth", "session", "login", "jwt", "oauth", "permission", "/acl"],
    diff: &["authenticate(", "authorize(", "set_session", "verify_token"],
  },
  TagSignals {
    tag: DB_MIGRATION,
    paths: &["migrate", "migration", "schema", "prisma"],
    diff: &["alter table", "create table", "drop table", "add column"],
  },
  TagSignals {
    tag: CONFIG_CHANGE,
    paths: &["config", "settings", ".env", "dockerfile", "docker-compose"],
    diff: &[],
  },
  TagSignals {
    tag: DEPENDENCY_VERSION,
    paths: &[
      "package.json",
      "package-lock.json",
      "yarn.lock",
      "pnpm-lock",
      "cargo.toml",
      "cargo.lock",
      "go.mod",
      "go.sum",
      "requirements.txt",
      "pom.xml",
      "gemfile",
    ],
    diff: &[],
  },
  TagSignals {
    tag: API_CONTRACT,
    paths: &["/api/", "api/", ".proto", "openapi", "swagger", ".graphql"],
    diff: &[],
  },
  TagSignals {
    tag: SECRETS,
    paths: &["secret", "credential", "api_key", "apikey", ".pem"],
    diff: &["api_key", "secret_key", "private key", "password ="],
  },
  TagSignals {
    tag: PAYMENT,
    paths: &["payment", "stripe", "billing", "invoice"],
    diff: &[],
  },
];

/// Risky tags for a set of paths and an optional diff (deduplicated, ordered).
pub fn compute_risky_tags(paths: &[String], diff_text: Option<&str>) -> BTreeSet<String> {
  let mut tags = BTreeSet::new();
  let lowered: Vec<String> = paths.iter().map(|p| p.to_lowercase()).collect();
  let diff = diff_text.map(str::to_lowercase);

  for row in TAG_TABLE {
    let path_hit = lowered
      .iter()
      .any(|p| row.paths.iter().any(|signal| p.contains(signal)));
    let diff_hit = diff
      .as_deref()
      .is_some_and(|d| row.diff.iter().any(|signal| d.contains(signal)));
    if path_hit || diff_hit {
      tags.insert(row.tag.to_string());
    }
  }
  tags
}

/// Additive structural weight for a tag (0 for unknown tags).
pub fn tag_weight(tag: &str) -> f64 {
  match tag {
    AUTH_LOGIC | SECRETS | PAYMENT => 1.0,
    DB_MIGRATION | CONFIG_CHANGE => 0.75,
    DEPENDENCY_VERSION | API_CONTRACT => 0.5,
    _ => 0.0,
  }
}

/// Short human-readable reason for a tag.
pub fn tag_explanation(tag: &str) -> Option<&'static str> {
  let s = match tag {
    AUTH_LOGIC => "Auth, session or permission code changed",
    DB_MIGRATION => "Schema or migration changes",
    CONFIG_CHANGE => "Config or environment files changed",
    DEPENDENCY_VERSION => "Touched dependency manifests or lockfiles",
    API_CONTRACT => "API surface or contract files changed",
    SECRETS => "Possible secrets or credentials area",
    PAYMENT => "Payment or billing code changed",
    _ => return None,
  };
  Some(s)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn paths(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
  }

  #[test]
  fn auth_and_migration_paths() {
    let tags = compute_risky_tags(&paths(&["auth/login.py", "db/migrate_001.sql"]), None);
    let got: Vec<&str> = tags.iter().map(String::as_str).collect();
    assert_eq!(got, vec![AUTH_LOGIC, DB_MIGRATION]);
  }

  #[test]
  fn plain_source_files_have_no_tags() {
    let tags = compute_risky_tags(&paths(&["src/utils/format.rs", "tests/test_format.py"]), None);
    assert!(tags.is_empty());
  }

  #[test]
  fn diff_content_can_add_tags() {
    let diff = "+++ b/src/store.rs\n+    conn.execute(\"ALTER TABLE users ADD COLUMN age INT\")";
    let tags = compute_risky_tags(&paths(&["src/store.rs"]), Some(diff));
    assert!(tags.contains(DB_MIGRATION));
  }

  #[test]
  fn lockfile_is_dependency_change() {
    let tags = compute_risky_tags(&paths(&["Cargo.lock"]), None);
    assert!(tags.contains(DEPENDENCY_VERSION));
  }
}
