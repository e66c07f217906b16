//! Commit source over one local git repository (libgit2 on the blocking pool).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use feature_engine::{AuthorStats, CommitInput, FileStat};
use git2::{Commit, ErrorCode, Repository, Sort};
use intelligence_engine::{CommitSource, EngineError, Result};

/// Walk at most this many commits when computing author stats.
const AUTHOR_SCAN_LIMIT: usize = 5_000;
const AUTHOR_WINDOW_DAYS: i64 = 90;

pub struct GitCommitSource {
  path: PathBuf,
}

impl GitCommitSource {
  pub fn new(path: PathBuf) -> Self {
    Self { path }
  }

  async fn blocking<T, F>(&self, f: F) -> Result<std::result::Result<T, git2::Error>>
  where
    T: Send + 'static,
    F: FnOnce(&Path) -> std::result::Result<T, git2::Error> + Send + 'static,
  {
    let path = self.path.clone();
    tokio::task::spawn_blocking(move || f(&path))
      .await
      .map_err(|e| EngineError::unavailable("git", e))
  }
}

/// A missing object is `NotFound`; anything else means the repository is unusable.
fn git_err(e: git2::Error) -> EngineError {
  if e.code() == ErrorCode::NotFound {
    EngineError::not_found(e.message().to_string())
  } else {
    EngineError::unavailable("git", e)
  }
}

fn commit_time(commit: &Commit<'_>) -> Option<DateTime<Utc>> {
  DateTime::from_timestamp(commit.time().seconds(), 0)
}

fn author_of(commit: &Commit<'_>) -> Option<String> {
  let sig = commit.author();
  sig
    .email()
    .filter(|e| !e.is_empty())
    .or_else(|| sig.name())
    .map(str::to_string)
}

fn parent_diff<'r>(repo: &'r Repository, commit: &Commit<'_>) -> std::result::Result<git2::Diff<'r>, git2::Error> {
  let parent_tree = if commit.parent_count() > 0 {
    Some(commit.parent(0)?.tree()?)
  } else {
    None
  };
  let tree = commit.tree()?;
  repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None)
}

fn read_commit(path: &Path, repository: &str, rev: &str) -> std::result::Result<CommitInput, git2::Error> {
  let repo = Repository::open(path)?;
  let commit = repo.revparse_single(rev)?.peel_to_commit()?;
  let diff = parent_diff(&repo, &commit)?;

  let mut files = Vec::new();
  for idx in 0..diff.deltas().count() {
    let Some(delta) = diff.get_delta(idx) else {
      continue;
    };
    let file_path = delta
      .new_file()
      .path()
      .or_else(|| delta.old_file().path())
      .and_then(|p| p.to_str())
      .unwrap_or_default()
      .to_string();
    let (additions, deletions) = match git2::Patch::from_diff(&diff, idx)? {
      Some(patch) => {
        let (_, adds, dels) = patch.line_stats()?;
        (adds, dels)
      }
      None => (0, 0),
    };
    files.push(FileStat::new(file_path, additions as u32, deletions as u32));
  }

  Ok(CommitInput {
    repository: repository.to_string(),
    commit_hash: commit.id().to_string(),
    message: commit.message().unwrap_or_default().to_string(),
    author: author_of(&commit),
    timestamp: commit_time(&commit),
    files: Some(files),
    diff_text: None,
  })
}

fn read_author_stats(path: &Path, author: &str) -> std::result::Result<AuthorStats, git2::Error> {
  let repo = Repository::open(path)?;
  let mut walk = repo.revwalk()?;
  walk.push_head()?;
  walk.set_sorting(Sort::TIME)?;
  let cutoff = (Utc::now() - Duration::days(AUTHOR_WINDOW_DAYS)).timestamp();

  let mut commits = 0u32;
  let mut files = 0usize;
  for oid in walk.take(AUTHOR_SCAN_LIMIT) {
    let commit = repo.find_commit(oid?)?;
    if commit.time().seconds() < cutoff {
      break;
    }
    let sig = commit.author();
    if sig.email() == Some(author) || sig.name() == Some(author) {
      commits += 1;
      files += parent_diff(&repo, &commit)?.deltas().count();
    }
  }
  Ok(AuthorStats {
    commits_90d: commits,
    avg_files: if commits == 0 {
      0.0
    } else {
      files as f64 / commits as f64
    },
  })
}

fn read_recent(path: &Path, limit: usize) -> std::result::Result<Vec<String>, git2::Error> {
  let repo = Repository::open(path)?;
  // A fresh repository has no history yet.
  if let Err(e) = repo.head() {
    return match e.code() {
      ErrorCode::UnbornBranch | ErrorCode::NotFound => Ok(Vec::new()),
      _ => Err(e),
    };
  }
  let mut walk = repo.revwalk()?;
  walk.push_head()?;
  walk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;
  walk
    .take(limit)
    .map(|oid| oid.map(|o| o.to_string()))
    .collect()
}

#[async_trait]
impl CommitSource for GitCommitSource {
  fn name(&self) -> &str {
    "git"
  }

  async fn health(&self) -> Result<()> {
    self
      .blocking(|p| Repository::open(p).map(|_| ()))
      .await?
      .map_err(|e| EngineError::unavailable("git", e))
  }

  async fn fetch_commit(&self, repository: &str, commit_hash: &str) -> Result<CommitInput> {
    let repository = repository.to_string();
    let rev = commit_hash.to_string();
    self
      .blocking(move |p| read_commit(p, &repository, &rev))
      .await?
      .map_err(git_err)
  }

  async fn author_stats(&self, author: &str) -> Result<AuthorStats> {
    let author = author.to_string();
    self
      .blocking(move |p| read_author_stats(p, &author))
      .await?
      .map_err(git_err)
  }

  async fn recent_commits(&self, limit: usize) -> Result<Vec<String>> {
    self
      .blocking(move |p| read_recent(p, limit))
      .await?
      .map_err(git_err)
  }
}
