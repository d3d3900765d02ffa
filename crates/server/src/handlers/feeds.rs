//! Feed endpoints.
//!
//! A feed manifest is an ordinary manifest whose root entry names a feed
//! identity. Downloading it through `/bzz` follows the feed's latest update.

use super::common::{finish_upload, upload_options};
use crate::error::{ApiError, ApiResult};
use crate::headers;
use crate::state::AppState;
use crate::upload::UploadError;
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::header::ACCESS_CONTROL_EXPOSE_HEADERS;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use time::OffsetDateTime;
use trove_core::{Feed, FeedIndex, FeedType, FeedUpdate, Reference};

#[derive(Debug, Default, Deserialize)]
pub struct FeedQuery {
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

impl FeedQuery {
    fn feed(&self, owner: &str, topic: &str) -> ApiResult<Feed> {
        let kind = match &self.kind {
            Some(kind) => kind.parse()?,
            None => FeedType::default(),
        };
        Ok(Feed::from_hex(owner, topic, kind)?)
    }
}

#[derive(Debug, Deserialize)]
pub struct FeedUpdateRequest {
    pub reference: Reference,
}

#[derive(Debug, Serialize)]
pub struct FeedUpdateResponse {
    pub index: FeedIndex,
}

#[derive(Debug, Serialize)]
pub struct FeedLatestResponse {
    pub reference: Reference,
    pub index: FeedIndex,
    pub timestamp: i64,
}

/// POST /feeds/{owner}/{topic} - Store a manifest pointing at the feed.
pub async fn create_feed_manifest(
    State(state): State<AppState>,
    Path((owner, topic)): Path<(String, String)>,
    Query(query): Query<FeedQuery>,
    request_headers: HeaderMap,
) -> ApiResult<Response> {
    let started = Instant::now();
    let feed = query.feed(&owner, &topic)?;
    let result = state
        .uploads()
        .upload_root_manifest(upload_options(&request_headers), feed.to_metadata())
        .await
        .map_err(ApiError::from);
    finish_upload("feed", started, result)
}

/// POST /feeds/{owner}/{topic}/updates - Publish a new target for a sequence feed.
pub async fn publish_feed_update(
    State(state): State<AppState>,
    Path((owner, topic)): Path<(String, String)>,
    Query(query): Query<FeedQuery>,
    request_headers: HeaderMap,
    Json(request): Json<FeedUpdateRequest>,
) -> ApiResult<Response> {
    let feed = query.feed(&owner, &topic)?;
    let options = upload_options(&request_headers);
    let (putter, waiter) = state.admission.new_putter(options.batch.as_deref())?;

    let update = FeedUpdate::new(OffsetDateTime::now_utc().unix_timestamp(), request.reference);
    let index = state.publisher.publish(&putter, &feed, update).await?;
    waiter.wait().await.map_err(UploadError::from)?;

    tracing::info!(
        owner = %feed.owner_hex(),
        topic = %feed.topic_hex(),
        index = %index,
        target = %request.reference,
        "feed update published"
    );
    Ok(with_feed_index(
        (StatusCode::CREATED, Json(FeedUpdateResponse { index })).into_response(),
        index,
    ))
}

/// GET /feeds/{owner}/{topic} - The feed's latest update.
pub async fn get_feed(
    State(state): State<AppState>,
    Path((owner, topic)): Path<(String, String)>,
    Query(query): Query<FeedQuery>,
) -> ApiResult<Response> {
    let feed = query.feed(&owner, &topic)?;
    let lookup = state.feeds.new_lookup(&feed)?;
    let now = OffsetDateTime::now_utc().unix_timestamp();

    let Some((chunk, index)) = lookup.at(now, 0).await? else {
        return Err(ApiError::NotFound(format!(
            "feed {}/{} has no updates",
            feed.owner_hex(),
            feed.topic_hex()
        )));
    };
    let update = FeedUpdate::from_chunk(&chunk)
        .map_err(|e| ApiError::Internal(format!("malformed feed update: {e}")))?;

    Ok(with_feed_index(
        Json(FeedLatestResponse {
            reference: update.target,
            index,
            timestamp: update.timestamp,
        })
        .into_response(),
        index,
    ))
}

fn with_feed_index(mut response: Response, index: FeedIndex) -> Response {
    let response_headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&index.to_hex()) {
        response_headers.insert(headers::FEED_INDEX, value);
    }
    response_headers.insert(
        ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static(headers::EXPOSED),
    );
    response
}
