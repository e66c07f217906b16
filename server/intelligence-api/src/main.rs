//! Binary entrypoint for the change-risk intelligence service.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use intelligence_api::{load_engine_config, poller::Scheduler, sources, store::PgStore, AppState, Settings};
use intelligence_engine::{Engine, InMemoryStore, MemoryStore};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let settings = Settings::from_env()?;
  let config = load_engine_config(settings.engine_config.as_deref())?;

  let store: Arc<dyn MemoryStore> = match (&settings.database_url, &settings.memory_snapshot_path) {
    (Some(url), _) => Arc::new(PgStore::connect(url).await.context("connecting to postgres")?),
    (None, Some(path)) => Arc::new(
      InMemoryStore::open(path)
        .await
        .with_context(|| format!("opening memory snapshot {}", path.display()))?,
    ),
    (None, None) => {
      warn!("no DATABASE_URL or MEMORY_SNAPSHOT_PATH; memory is not persisted");
      Arc::new(InMemoryStore::new())
    }
  };

  let query_timeout = Duration::from_millis(config.backends.query_timeout_ms);
  let backends = sources::from_settings(&settings, query_timeout)?;
  let engine = Arc::new(Engine::open(config, store, backends).await?);

  let mut scheduler = Scheduler::new(engine.clone(), settings.poll_interval, settings.sweep_interval);
  if settings.git_repo_path.is_some() {
    scheduler = scheduler.with_commit_poll(settings.repository.clone(), settings.commit_poll_interval);
  }
  scheduler.start();

  let app = intelligence_api::router(Arc::new(AppState {
    engine: engine.clone(),
  }));
  let listener = tokio::net::TcpListener::bind(settings.bind_addr).await?;
  info!(addr = %settings.bind_addr, "intelligence-api listening");

  axum::serve(listener, app)
    .with_graceful_shutdown(async {
      let _ = tokio::signal::ctrl_c().await;
      info!("shutdown requested");
    })
    .await?;

  scheduler.shutdown();
  engine.checkpoint().await?;
  Ok(())
}
