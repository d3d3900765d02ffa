//! Shared handler helpers.

use crate::error::{ApiError, ApiResult};
use crate::headers;
use crate::metrics;
use crate::upload::{UploadOptions, UploadOutcome};
use axum::Json;
use axum::http::header::{ACCESS_CONTROL_EXPOSE_HEADERS, ETAG};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::time::Instant;
use trove_core::Reference;

/// Body of a successful upload.
#[derive(Debug, Serialize)]
pub struct ReferenceResponse {
    pub reference: Reference,
}

pub fn parse_reference(raw: &str) -> ApiResult<Reference> {
    Reference::from_hex(raw).map_err(|e| ApiError::BadRequest(format!("invalid reference: {e}")))
}

/// Upload options carried by request headers.
pub fn upload_options(request: &HeaderMap) -> UploadOptions {
    UploadOptions {
        batch: headers::string(request, &headers::POSTAGE_BATCH_ID),
        tag: headers::string(request, &headers::TAG),
        pin: headers::flag(request, &headers::PIN),
        size_hint: None,
    }
}

/// Record the outcome of an upload and build the 201 response.
pub fn finish_upload(
    kind: &str,
    started: Instant,
    result: Result<UploadOutcome, ApiError>,
) -> ApiResult<Response> {
    match result {
        Ok(outcome) => {
            metrics::UPLOADS.with_label_values(&[kind]).inc();
            metrics::UPLOAD_DURATION.observe(started.elapsed().as_secs_f64());
            metrics::CHUNKS_STORED.inc_by(outcome.stored);
            tracing::info!(
                kind,
                reference = %outcome.reference,
                tag = %outcome.tag,
                stored = outcome.stored,
                "upload complete"
            );
            Ok(created(outcome))
        }
        Err(e) => {
            metrics::record_upload_error(e.code());
            Err(e)
        }
    }
}

fn created(outcome: UploadOutcome) -> Response {
    let mut response = (
        StatusCode::CREATED,
        Json(ReferenceResponse {
            reference: outcome.reference,
        }),
    )
        .into_response();

    let response_headers = response.headers_mut();
    if let Ok(etag) = HeaderValue::from_str(&format!("\"{}\"", outcome.reference.to_hex())) {
        response_headers.insert(ETAG, etag);
    }
    response_headers.insert(headers::TAG, HeaderValue::from(outcome.tag.0));
    response_headers.insert(
        ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static(headers::EXPOSED),
    );
    response
}
