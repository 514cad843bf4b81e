//! Control endpoints
//!
//! - `POST /reinitialize` `{"force": bool}`: rescan, or start a fresh cycle
//! - `POST /navigate` `{"path": "/..."}`: synthetic navigation

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::orchestrator::OrchestratorStatus;
use crate::AppState;

/// Error returned by API handlers
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ReinitializeRequest {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize)]
pub struct NavigateRequest {
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct ControlResponse {
    pub accepted: bool,
    pub status: OrchestratorStatus,
}

/// POST /reinitialize
///
/// An empty body is a plain rescan.
pub async fn reinitialize(
    State(state): State<AppState>,
    body: Option<Json<ReinitializeRequest>>,
) -> Json<ControlResponse> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    info!(force = request.force, "Reinitialize requested");
    state.orchestrator.reinitialize(request.force);

    Json(ControlResponse {
        accepted: true,
        status: state.orchestrator.status(),
    })
}

/// POST /navigate
///
/// The navigation event is dispatched asynchronously, so the returned status
/// may still show the previous location.
pub async fn navigate(
    State(state): State<AppState>,
    Json(request): Json<NavigateRequest>,
) -> Result<(StatusCode, Json<ControlResponse>), ApiError> {
    let path = request.path.trim();
    if !path.starts_with('/') {
        return Err(ApiError::BadRequest(format!(
            "path must start with '/': {:?}",
            request.path
        )));
    }

    info!(path, "Synthetic navigation requested");
    state.navigator.navigate_synthetic(path);

    Ok((
        StatusCode::ACCEPTED,
        Json(ControlResponse {
            accepted: true,
            status: state.orchestrator.status(),
        }),
    ))
}

/// Build control routes
pub fn control_routes() -> Router<AppState> {
    Router::new()
        .route("/reinitialize", post(reinitialize))
        .route("/navigate", post(navigate))
}
