//! Background tasks: capability re-probe, window auto-poll, the expiry sweep
//! and the optional commit poll.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use intelligence_engine::{Engine, EngineError};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

/// Commits listed per commit-poll tick.
const COMMIT_POLL_BATCH: usize = 10;

pub struct Scheduler {
  engine: Arc<Engine>,
  poll_interval: Duration,
  sweep_interval: Duration,
  /// Repository name and period of the commit poll, when a commit source is wired.
  commit_poll: Option<(String, Duration)>,
  handles: Vec<JoinHandle<()>>,
}

fn ticker(period: Duration) -> time::Interval {
  let mut interval = time::interval(period.max(Duration::from_secs(1)));
  interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
  interval
}

impl Scheduler {
  pub fn new(engine: Arc<Engine>, poll_interval: Duration, sweep_interval: Duration) -> Self {
    Self {
      engine,
      poll_interval,
      sweep_interval,
      commit_poll: None,
      handles: Vec::new(),
    }
  }

  /// Also poll the commit source for new commits of `repository` every `period`.
  pub fn with_commit_poll(mut self, repository: impl Into<String>, period: Duration) -> Self {
    self.commit_poll = Some((repository.into(), period));
    self
  }

  pub fn start(&mut self) {
    let probe_every = Duration::from_secs(self.engine.config().backends.probe_interval_secs);
    self.handles.push(self.spawn_prober(probe_every));
    self.handles.push(self.spawn_auto_poll());
    self.handles.push(self.spawn_sweeper());
    if let Some((repository, period)) = self.commit_poll.clone() {
      self.handles.push(self.spawn_commit_poll(repository, period));
    }
    info!(tasks = self.handles.len(), "background tasks started");
  }

  pub fn shutdown(&mut self) {
    for handle in self.handles.drain(..) {
      handle.abort();
    }
  }

  fn spawn_prober(&self, period: Duration) -> JoinHandle<()> {
    let engine = self.engine.clone();
    tokio::spawn(async move {
      let mut interval = ticker(period);
      // First tick is immediate; the engine probed on open.
      interval.tick().await;
      loop {
        interval.tick().await;
        let caps = engine.probe().await;
        debug!(capabilities = caps.iter().count(), "capabilities re-probed");
      }
    })
  }

  fn spawn_auto_poll(&self) -> JoinHandle<()> {
    let engine = self.engine.clone();
    let period = self.poll_interval;
    tokio::spawn(async move {
      let mut interval = ticker(period);
      loop {
        interval.tick().await;
        for window_id in engine.open_window_ids() {
          match engine.poll_monitoring(&window_id, None).await {
            Ok(status) if status.rollback_recommended => {
              info!(%window_id, urgency = ?status.urgency, "rollback recommended")
            }
            Ok(_) => {}
            // Closed or removed between listing and polling.
            Err(EngineError::InvalidState(_) | EngineError::NotFound(_)) => {}
            Err(e) => warn!(%window_id, error = %e, "auto-poll failed"),
          }
        }
      }
    })
  }

  fn spawn_sweeper(&self) -> JoinHandle<()> {
    let engine = self.engine.clone();
    let period = self.sweep_interval;
    tokio::spawn(async move {
      let mut interval = ticker(period);
      loop {
        interval.tick().await;
        let closed = engine.expire_windows(Utc::now()).await;
        if !closed.is_empty() {
          info!(windows = ?closed, "closed elapsed monitoring windows");
        }
      }
    })
  }
}

impl Scheduler {
  fn spawn_commit_poll(&self, repository: String, period: Duration) -> JoinHandle<()> {
    let engine = self.engine.clone();
    let high_risk = engine.config().monitor.high_risk_probability;
    tokio::spawn(async move {
      let mut interval = ticker(period);
      let mut last_seen: Option<String> = None;
      loop {
        interval.tick().await;
        match engine
          .analyze_new_commits(&repository, last_seen.as_deref(), COMMIT_POLL_BATCH)
          .await
        {
          Ok(verdicts) => {
            if let Some(newest) = verdicts.last() {
              last_seen = Some(newest.commit_hash.clone());
            }
            debug!(%repository, analyzed = verdicts.len(), "commit poll");
            for v in verdicts.iter().filter(|v| v.incident_probability >= high_risk) {
              info!(
                commit = %v.commit_hash,
                risk_score = v.risk_score,
                incident_probability = v.incident_probability,
                "high-risk commit"
              );
            }
          }
          Err(e) => warn!(%repository, error = %e, "commit poll failed"),
        }
      }
    })
  }
}

impl Drop for Scheduler {
  fn drop(&mut self) {
    self.shutdown();
  }
}
