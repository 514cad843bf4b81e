//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use stagehand_common::events::CycleState;
use stagehand_common::PageType;

use crate::AppState;

/// Health check response
///
/// Service identity plus where the orchestrator currently stands.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
    pub page_type: Option<PageType>,
    pub cycle_state: CycleState,
    pub location: String,
    pub generation: u64,
    pub running_tasks: usize,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = state.orchestrator.status();
    Json(HealthResponse {
        status: "ok".to_string(),
        module: "stagehand-rc".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        page_type: status.page_type,
        cycle_state: status.cycle_state,
        location: status.location,
        generation: status.generation,
        running_tasks: status.running_tasks,
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
