//! Health and status handlers.

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::rotation::EngineStatus;
use crate::server::error::ApiResult;
use crate::server::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// GET /health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Library and rotation status.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub total_photos: u64,
    pub converted_photos: u64,
    pub last_display: Option<DateTime<Utc>>,
    /// Photos still waiting for conversion.
    pub queue_size: u64,
    pub engine: Option<EngineStatus>,
}

/// GET /photos/status
pub async fn get_status(State(state): State<AppState>) -> ApiResult<Json<StatusResponse>> {
    let status = state.library.status()?;

    Ok(Json(StatusResponse {
        total_photos: status.stats.total,
        converted_photos: status.stats.converted,
        last_display: status.stats.last_display,
        queue_size: status.pending_conversions,
        engine: state.engine_status(),
    }))
}
