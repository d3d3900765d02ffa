//! Upload tag endpoints.

use crate::error::ApiResult;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use trove_core::{TagId, TagSnapshot};

/// POST /tags - Create an empty tag that later uploads can report into.
pub async fn create_tag(State(state): State<AppState>) -> (StatusCode, Json<TagSnapshot>) {
    let tag = state.tags.create();
    tracing::debug!(tag = %tag.id(), "tag created");
    (StatusCode::CREATED, Json(tag.snapshot()))
}

/// GET /tags
pub async fn list_tags(State(state): State<AppState>) -> Json<Vec<TagSnapshot>> {
    Json(state.tags.list())
}

/// GET /tags/{id}
pub async fn get_tag(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<TagSnapshot>> {
    let id: TagId = id.parse()?;
    Ok(Json(state.tags.get(id)?.snapshot()))
}

/// DELETE /tags/{id}
pub async fn delete_tag(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id: TagId = id.parse()?;
    state.tags.remove(id)?;
    Ok(StatusCode::NO_CONTENT)
}
