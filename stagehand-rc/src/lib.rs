//! stagehand-rc library - navigation-aware reconciliation engine
//!
//! Keeps injected marketplace fragments in place on a single-page host
//! application: classifies every route change, runs the matching injection
//! tasks with bounded retry, and re-runs them when the host re-renders.

use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod cycle;
pub mod dom;
pub mod engine;
pub mod error;
pub mod features;
pub mod metadata;
pub mod navigation;
pub mod observer;
pub mod orchestrator;
pub mod retry;
pub mod scenario;
pub mod task;

pub use engine::Engine;
pub use orchestrator::Orchestrator;

use navigation::Navigator;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
    /// Target of `POST /navigate`
    pub navigator: Arc<dyn Navigator>,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator, navigator: Arc<dyn Navigator>) -> Self {
        Self {
            orchestrator,
            navigator,
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .route("/events", get(api::event_stream))
        .merge(api::health_routes())
        .merge(api::control_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
