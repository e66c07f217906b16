//! Shared application state.

use std::sync::Arc;

use intelligence_engine::Engine;

pub struct AppState {
  pub engine: Arc<Engine>,
}
