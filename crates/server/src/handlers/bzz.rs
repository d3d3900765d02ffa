//! Upload and download of files and collections.

use super::common::{finish_upload, parse_reference, upload_options};
use crate::error::{ApiError, ApiResult};
use crate::headers;
use crate::metrics;
use crate::resolve::{EntryKind, PathResolver, ResolveError};
use crate::state::AppState;
use crate::upload::{UploadError, UploadOutcome};
use axum::extract::{FromRequest, Multipart, Path, Query, Request, State};
use axum::http::header::{ACCESS_CONTROL_EXPOSE_HEADERS, CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use axum::http::{HeaderMap, HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use futures::TryStreamExt;
use serde::Deserialize;
use std::io;
use std::time::Instant;
use tokio_util::io::StreamReader;
use tracing::{debug, instrument};
use trove_core::manifest::{self, PATH_SEPARATOR};
use trove_core::{ManifestEntry, WebsiteConfig};
use trove_storage::ManifestWriter;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Default, Deserialize)]
pub struct UploadQuery {
    /// Entry name of a single-file upload.
    pub name: Option<String>,
}

/// POST /bzz - Upload a single file, or a multipart collection.
#[instrument(skip_all)]
pub async fn upload(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    req: Request,
) -> ApiResult<Response> {
    let started = Instant::now();
    let request_headers = req.headers().clone();
    let options = upload_options(&request_headers);
    let content_type = request_headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    if content_type.as_deref().is_some_and(is_multipart) {
        let form = Multipart::from_request(req, &state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        let result = upload_collection(&state, &request_headers, options, form).await;
        return finish_upload("collection", started, result);
    }

    if headers::flag(&request_headers, &headers::COLLECTION) {
        return Err(ApiError::BadRequest(
            "collection uploads must be multipart/form-data".to_string(),
        ));
    }
    let Some(content_type) = content_type else {
        return Err(ApiError::BadRequest(
            "content-type header is required".to_string(),
        ));
    };

    let mut options = options;
    options.size_hint = request_headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok());

    let body = req.into_body().into_data_stream().map_err(io::Error::other);
    let reader = StreamReader::new(Box::pin(body));
    let result = state
        .uploads()
        .upload_file(options, query.name, &content_type, reader)
        .await
        .map_err(ApiError::from);
    finish_upload("file", started, result)
}

/// Store every form part that carries a filename as an entry at that path.
async fn upload_collection(
    state: &AppState,
    request_headers: &HeaderMap,
    options: crate::upload::UploadOptions,
    mut form: Multipart,
) -> Result<UploadOutcome, ApiError> {
    let website = WebsiteConfig {
        index_document: headers::string(request_headers, &headers::INDEX_DOCUMENT),
        error_document: headers::string(request_headers, &headers::ERROR_DOCUMENT),
    };

    let session = state.uploads().begin(options)?;
    let mut writer = ManifestWriter::new();

    while let Some(field) = form
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        let Some(path) = field.file_name().map(str::to_string) else {
            continue;
        };
        manifest::validate_entry_path(&path)
            .map_err(|e| UploadError::InvalidName(e.to_string()))?;
        let content_type = field
            .content_type()
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();

        let reader = StreamReader::new(Box::pin(field.map_err(io::Error::other)));
        let reference = session.store(reader).await?;
        debug!(path = %path, reference = %reference, "stored collection entry");

        writer
            .add(ManifestEntry::file(path, reference, &content_type))
            .map_err(UploadError::Manifest)?;
    }

    if writer.is_empty() {
        return Err(ApiError::BadRequest(
            "collection contains no files".to_string(),
        ));
    }
    if !website.is_empty() {
        writer
            .add(ManifestEntry::root(website.to_metadata()))
            .map_err(UploadError::Manifest)?;
    }

    Ok(session.finish(writer).await?)
}

fn is_multipart(content_type: &str) -> bool {
    content_type
        .get(..19)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("multipart/form-data"))
}

/// GET /bzz/{address} and /bzz/{address}/ - Serve the manifest's index document.
pub async fn download_root(
    State(state): State<AppState>,
    Path(address): Path<String>,
    uri: Uri,
    request_headers: HeaderMap,
) -> ApiResult<Response> {
    serve(&state, &address, "", &uri, &request_headers).await
}

/// GET /bzz/{address}/{*path} - Serve a path inside a manifest.
pub async fn download(
    State(state): State<AppState>,
    Path((address, path)): Path<(String, String)>,
    uri: Uri,
    request_headers: HeaderMap,
) -> ApiResult<Response> {
    let path = collapse_trailing_separators(&path);
    serve(&state, &address, &path, &uri, &request_headers).await
}

#[instrument(skip(state, uri, request_headers))]
async fn serve(
    state: &AppState,
    address: &str,
    path: &str,
    uri: &Uri,
    request_headers: &HeaderMap,
) -> ApiResult<Response> {
    let root = parse_reference(address)?;
    let cancel = state.shutdown.child_token();

    let resolved = match state.resolver().resolve(root, &cancel).await {
        Ok(resolved) => resolved,
        Err(e) => {
            metrics::record_download_error(e.kind());
            return Err(e.into());
        }
    };

    let found = match PathResolver::new(&resolved, &cancel).lookup(path).await {
        Ok(found) => found,
        Err(ResolveError::RedirectToDirectory(_)) => {
            metrics::DIRECTORY_REDIRECTS.inc();
            return Ok(redirect_to_directory(uri));
        }
        Err(e) => {
            metrics::record_download_error(e.kind());
            return Err(e.into());
        }
    };

    let status = match found.kind {
        EntryKind::ErrorDocument => StatusCode::NOT_FOUND,
        EntryKind::Exact | EntryKind::IndexDocument => StatusCode::OK,
    };
    debug!(entry = %found.entry.path, kind = ?found.kind, "resolved entry");

    let mut response = state
        .streamer()
        .stream(
            found.entry.target,
            &found.entry.metadata,
            resolved.feed_dereferenced(),
            request_headers,
            status,
        )
        .await?;

    metrics::DOWNLOADS.inc();
    let response_headers = response.headers_mut();
    if let Some(index) = resolved.feed_index {
        metrics::FEED_DEREFERENCES.inc();
        if let Ok(value) = HeaderValue::from_str(&index.to_hex()) {
            response_headers.insert(headers::FEED_INDEX, value);
        }
    }
    response_headers.insert(
        ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static(headers::EXPOSED),
    );
    Ok(response)
}

/// Same URI with a trailing separator appended to the path.
fn redirect_to_directory(uri: &Uri) -> Response {
    let mut location = format!("{}{PATH_SEPARATOR}", uri.path());
    if let Some(query) = uri.query() {
        location.push('?');
        location.push_str(query);
    }
    match HeaderValue::from_str(&location) {
        Ok(location) => (StatusCode::PERMANENT_REDIRECT, [(LOCATION, location)]).into_response(),
        Err(_) => StatusCode::BAD_REQUEST.into_response(),
    }
}

/// `a/b///` becomes `a/b/`. A path of only separators becomes empty.
fn collapse_trailing_separators(path: &str) -> String {
    let trimmed = path.trim_end_matches(PATH_SEPARATOR);
    if trimmed.len() == path.len() {
        path.to_string()
    } else if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}{PATH_SEPARATOR}")
    }
}
