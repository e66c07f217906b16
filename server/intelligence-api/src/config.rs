//! Service settings from the environment (`.env` honored) and the optional
//! engine TOML file.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use intelligence_engine::EngineConfig;

#[derive(Debug, Clone)]
pub struct Settings {
  pub bind_addr: SocketAddr,
  /// PostgreSQL memory store; the in-memory store is used when unset.
  pub database_url: Option<String>,
  /// JSON snapshot for the in-memory store.
  pub memory_snapshot_path: Option<PathBuf>,
  pub git_repo_path: Option<PathBuf>,
  /// Repository name recorded for polled commits; defaults to the git directory name.
  pub repository: String,
  pub loki_url: Option<String>,
  /// Directory of `*.log` files, used when Loki is not configured.
  pub log_path: Option<PathBuf>,
  pub prometheus_url: Option<String>,
  /// TOML file overriding [`EngineConfig`] defaults.
  pub engine_config: Option<PathBuf>,
  /// Automatic poll of open monitoring windows.
  pub poll_interval: Duration,
  /// Sweep closing elapsed windows.
  pub sweep_interval: Duration,
  /// Poll of the git repository for new commits.
  pub commit_poll_interval: Duration,
}

impl Settings {
  pub fn from_env() -> Result<Self> {
    // A missing .env is fine; real environment variables win either way.
    let _ = dotenvy::dotenv();
    Self::from_lookup(|key| std::env::var(key).ok())
  }

  pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
    let non_empty = |key: &str| get(key).filter(|v| !v.trim().is_empty());
    let secs = |key: &str, default: u64| -> Result<Duration> {
      match non_empty(key) {
        Some(v) => v
          .parse::<u64>()
          .map(Duration::from_secs)
          .with_context(|| format!("{key} must be a whole number of seconds, got {v:?}")),
        None => Ok(Duration::from_secs(default)),
      }
    };

    let bind_addr = match non_empty("BIND_ADDR") {
      Some(v) => v
        .parse()
        .with_context(|| format!("BIND_ADDR must be host:port, got {v:?}"))?,
      None => SocketAddr::from(([127, 0, 0, 1], 5005)),
    };

    let git_repo_path = non_empty("GIT_REPO_PATH").map(PathBuf::from);
    let repository = non_empty("REPOSITORY").unwrap_or_else(|| {
      git_repo_path
        .as_deref()
        .and_then(Path::file_name)
        .and_then(|n| n.to_str())
        .unwrap_or("local")
        .to_string()
    });

    Ok(Self {
      bind_addr,
      database_url: non_empty("DATABASE_URL"),
      memory_snapshot_path: non_empty("MEMORY_SNAPSHOT_PATH").map(PathBuf::from),
      git_repo_path,
      repository,
      loki_url: non_empty("LOKI_URL"),
      log_path: non_empty("LOG_PATH").map(PathBuf::from),
      prometheus_url: non_empty("PROMETHEUS_URL"),
      engine_config: non_empty("ENGINE_CONFIG").map(PathBuf::from),
      poll_interval: secs("POLL_INTERVAL_SECS", 60)?,
      sweep_interval: secs("SWEEP_INTERVAL_SECS", 30)?,
      commit_poll_interval: secs("COMMIT_POLL_INTERVAL_SECS", 300)?,
    })
  }
}

/// Engine configuration from `path`, or defaults when no file is configured.
pub fn load_engine_config(path: Option<&Path>) -> Result<EngineConfig> {
  let Some(path) = path else {
    return Ok(EngineConfig::default());
  };
  let text = std::fs::read_to_string(path)
    .with_context(|| format!("reading engine config {}", path.display()))?;
  toml::from_str(&text).with_context(|| format!("parsing engine config {}", path.display()))
}
