//! Change-Risk Intelligence Service
//!
//! HTTP wrapper around `intelligence-engine`: commit risk verdicts, ad-hoc log
//! and trace analysis, incident memory and post-deploy monitoring windows.
//! Bind to 127.0.0.1 by default (internal only).

pub mod config;
mod date;
mod error;
mod handlers;
pub mod poller;
pub mod sources;
mod state;
pub mod store;
mod types;

use std::sync::Arc;

use axum::{
  routing::{get, post},
  Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use config::{load_engine_config, Settings};
pub use error::{ApiError, ApiResult};
pub use state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
  Router::new()
    .route("/health", get(handlers::health))
    .route("/capabilities", get(handlers::capabilities))
    .route("/analyze/commit", post(handlers::analyze_commit))
    .route("/analyze/logs", post(handlers::analyze_logs))
    .route("/analyze/traces", post(handlers::analyze_traces))
    .route("/incidents", post(handlers::record_incident))
    .route("/incidents/suspects", post(handlers::suspects))
    .route("/monitor", post(handlers::start_monitoring))
    .route(
      "/monitor/:window_id",
      get(handlers::window_status).delete(handlers::stop_monitoring),
    )
    .route("/monitor/:window_id/poll", post(handlers::poll_monitoring))
    .route("/monitor/:window_id/rollback", post(handlers::accept_rollback))
    .layer(TraceLayer::new_for_http())
    .layer(CorsLayer::permissive())
    .with_state(state)
}
