//! API route handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use tracing::{debug, error};

use crate::error::{ApiError, Result};
use crate::models::{HealthResponse, ModerateRequest, ModerateResponse};
use crate::state::AppState;

/// POST /api/moderate - Classify text as safe or unsafe.
///
/// Classifier failures are reported inside a 200 response with
/// `status: "error"`; only a failed worker task yields a 500.
pub async fn moderate(
    State(state): State<AppState>,
    payload: std::result::Result<Json<ModerateRequest>, JsonRejection>,
) -> Result<Json<ModerateResponse>> {
    let Json(req) = payload?;
    debug!(text_len = req.text.len(), "Moderating text");

    // Generation is CPU-bound and takes seconds; keep it off the async workers.
    let service = state.service.clone();
    let result = tokio::task::spawn_blocking(move || service.moderate(&req.text))
        .await
        .map_err(|e| {
            error!("Moderation task failed: {}", e);
            ApiError::Internal("moderation task failed".to_string())
        })?;

    Ok(Json(result))
}

/// GET /api/health - Liveness check.
///
/// Always reports healthy; it does not probe the model.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy" })
}
