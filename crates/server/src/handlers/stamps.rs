//! Postage batch endpoints.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Deserialize;
use trove_core::BatchId;
use trove_storage::postage::BatchInfo;

#[derive(Debug, Deserialize)]
pub struct CreateBatchRequest {
    /// Number of chunks the batch may stamp.
    pub capacity: u64,
}

/// POST /stamps - Create a usable batch.
pub async fn create_batch(
    State(state): State<AppState>,
    Json(request): Json<CreateBatchRequest>,
) -> ApiResult<(StatusCode, Json<BatchInfo>)> {
    let capacity = request.capacity;
    if capacity == 0 {
        return Err(ApiError::BadRequest(
            "batch capacity must be positive".to_string(),
        ));
    }
    let batch = state.batches.create(capacity);
    tracing::info!(batch_id = %batch.id(), capacity, "postage batch created");
    Ok((StatusCode::CREATED, Json(batch.info())))
}

/// GET /stamps
pub async fn list_batches(State(state): State<AppState>) -> Json<Vec<BatchInfo>> {
    Json(state.batches.list())
}

/// GET /stamps/{batch_id}
pub async fn get_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> ApiResult<Json<BatchInfo>> {
    let id = BatchId::from_hex(&batch_id)?;
    let batch = state
        .batches
        .get(&id)
        .ok_or_else(|| ApiError::NotFound(format!("batch {batch_id}")))?;
    Ok(Json(batch.info()))
}
