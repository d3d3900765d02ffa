//! Pin endpoints.

use super::common::parse_reference;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use trove_storage::pins::Pin;

/// POST /pins/{reference} - Pin content whose root chunk is stored locally.
pub async fn create_pin(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> ApiResult<StatusCode> {
    let reference = parse_reference(&reference)?;
    state.pins.create_pin(reference).await?;
    tracing::info!(reference = %reference, "pinned");
    Ok(StatusCode::CREATED)
}

/// GET /pins/{reference}
pub async fn get_pin(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> ApiResult<Json<Pin>> {
    let reference = parse_reference(&reference)?;
    state
        .pins
        .get(&reference)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("pin {reference}")))
}

/// DELETE /pins/{reference}
pub async fn delete_pin(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> ApiResult<StatusCode> {
    let reference = parse_reference(&reference)?;
    state.pins.remove(&reference)?;
    tracing::info!(reference = %reference, "unpinned");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /pins
pub async fn list_pins(State(state): State<AppState>) -> Json<Vec<Pin>> {
    Json(state.pins.list())
}
