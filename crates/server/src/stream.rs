//! Serving content references over HTTP.
//!
//! Bodies are read from the joiner in fixed segments with a bounded number
//! of reads in flight, so sequential and ranged reads overlap the latency of
//! the underlying chunk fetches.

use axum::body::Body;
use axum::http::header::{
    ACCEPT_RANGES, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, ETAG,
    IF_NONE_MATCH, IF_RANGE, LAST_MODIFIED, RANGE,
};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::Response;
use futures::StreamExt;
use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;
use time::macros::format_description;
use trove_core::manifest::{CONTENT_TYPE_KEY, FILENAME_KEY, Metadata, base_name};
use trove_core::Reference;
use trove_storage::{ChunkStore, Joiner, StorageError, file};

/// Content up to this size gets the small look-ahead window.
pub const LOOKAHEAD_THRESHOLD: u64 = 10_000_000;
pub const SMALL_LOOKAHEAD: usize = 256 * 1024;
pub const LARGE_LOOKAHEAD: usize = 512 * 1024;
/// Size of each read issued against the joiner.
pub const SEGMENT_SIZE: usize = 32 * 1024;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("content not found: {0}")]
    NotFound(Reference),

    #[error("opening content failed: {0}")]
    Storage(StorageError),
}

/// Look-ahead window for content of `size` bytes.
pub fn lookahead_buffer_size(size: u64) -> usize {
    if size <= LOOKAHEAD_THRESHOLD {
        SMALL_LOOKAHEAD
    } else {
        LARGE_LOOKAHEAD
    }
}

/// Outcome of interpreting a `Range` header against a body of known size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ByteRange {
    Full,
    /// Inclusive bounds.
    Partial { start: u64, end: u64 },
    Unsatisfiable,
}

/// Parse a `Range` header. Multiple ranges are ignored and the whole body is served.
pub fn parse_range(header: Option<&str>, size: u64) -> ByteRange {
    let Some(header) = header else {
        return ByteRange::Full;
    };
    let Some(ranges) = header
        .get(..6)
        .filter(|unit| unit.eq_ignore_ascii_case("bytes="))
        .map(|_| header[6..].trim())
    else {
        return ByteRange::Unsatisfiable;
    };
    if ranges.contains(',') {
        return ByteRange::Full;
    }
    let Some((first, last)) = ranges.split_once('-') else {
        return ByteRange::Unsatisfiable;
    };
    let (first, last) = (first.trim(), last.trim());

    if first.is_empty() {
        // Suffix range: the final `n` bytes.
        return match last.parse::<u64>() {
            Ok(n) if n > 0 && size > 0 => ByteRange::Partial {
                start: size - n.min(size),
                end: size - 1,
            },
            _ => ByteRange::Unsatisfiable,
        };
    }

    let Ok(start) = first.parse::<u64>() else {
        return ByteRange::Unsatisfiable;
    };
    if start >= size {
        return ByteRange::Unsatisfiable;
    }
    let end = if last.is_empty() {
        size - 1
    } else {
        match last.parse::<u64>() {
            Ok(end) if end >= start => end.min(size - 1),
            _ => return ByteRange::Unsatisfiable,
        }
    };
    ByteRange::Partial { start, end }
}

/// Turns content references into streamed HTTP responses.
#[derive(Clone)]
pub struct ContentStreamer {
    storage: Arc<dyn ChunkStore>,
}

impl ContentStreamer {
    pub fn new(storage: Arc<dyn ChunkStore>) -> Self {
        Self { storage }
    }

    /// Serve the content at `reference`.
    ///
    /// `status` other than 200 (an error document) disables ranges and
    /// conditional handling. The ETag is only set for content that was not
    /// reached through a feed.
    pub async fn stream(
        &self,
        reference: Reference,
        metadata: &Metadata,
        feed_dereferenced: bool,
        request: &HeaderMap,
        status: StatusCode,
    ) -> Result<Response, StreamError> {
        let (joiner, size) = file::open(self.storage.clone(), reference)
            .await
            .map_err(|e| match e {
                e if e.is_not_found() => StreamError::NotFound(reference),
                e => StreamError::Storage(e),
            })?;

        let mut headers = HeaderMap::new();
        let content_type = metadata
            .get(CONTENT_TYPE_KEY)
            .and_then(|value| HeaderValue::from_str(value).ok());
        if let Some(content_type) = content_type {
            headers.insert(CONTENT_TYPE, content_type);
        }
        if let Some(disposition) = metadata.get(FILENAME_KEY).and_then(|f| content_disposition(f)) {
            headers.insert(CONTENT_DISPOSITION, disposition);
        }
        let etag = (!feed_dereferenced).then(|| format!("\"{}\"", reference.to_hex()));
        if let Some(etag) = &etag
            && let Ok(value) = HeaderValue::from_str(etag)
        {
            headers.insert(ETAG, value);
        }
        if let Some(now) = http_date(OffsetDateTime::now_utc())
            && let Ok(value) = HeaderValue::from_str(&now)
        {
            headers.insert(LAST_MODIFIED, value);
        }

        let conditional = status == StatusCode::OK;
        if conditional {
            headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
            if let Some(etag) = &etag
                && if_none_match(request, etag)
            {
                return Ok(build(StatusCode::NOT_MODIFIED, headers, Body::empty()));
            }
        }

        let range = if conditional && if_range_allows(request, etag.as_deref()) {
            parse_range(header_str(request, RANGE), size)
        } else {
            ByteRange::Full
        };

        let (status, start, len) = match range {
            ByteRange::Full => (status, 0, size),
            ByteRange::Partial { start, end } => {
                let value = format!("bytes {start}-{end}/{size}");
                if let Ok(value) = HeaderValue::from_str(&value) {
                    headers.insert(CONTENT_RANGE, value);
                }
                (StatusCode::PARTIAL_CONTENT, start, end - start + 1)
            }
            ByteRange::Unsatisfiable => {
                if let Ok(value) = HeaderValue::from_str(&format!("bytes */{size}")) {
                    headers.insert(CONTENT_RANGE, value);
                }
                headers.remove(CONTENT_TYPE);
                headers.remove(CONTENT_DISPOSITION);
                return Ok(build(StatusCode::RANGE_NOT_SATISFIABLE, headers, Body::empty()));
            }
        };

        headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
        let body = lookahead_body(joiner, start, len, lookahead_buffer_size(size));
        Ok(build(status, headers, body))
    }
}

/// IMF-fixdate, as used by `Last-Modified`.
fn http_date(at: OffsetDateTime) -> Option<String> {
    at.format(format_description!(
        "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
    ))
    .ok()
}

fn build(status: StatusCode, headers: HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Stream `len` bytes from `start`, keeping up to `buffer` bytes of reads in flight.
fn lookahead_body(joiner: Joiner, start: u64, len: u64, buffer: usize) -> Body {
    let end = start + len;
    let window = (buffer / SEGMENT_SIZE).max(1);
    let reference = joiner.reference();

    let reads = futures::stream::iter((start..end).step_by(SEGMENT_SIZE))
        .map(move |offset| {
            let joiner = joiner.clone();
            let want = (end - offset).min(SEGMENT_SIZE as u64) as usize;
            async move { joiner.read_at(offset, want).await }
        })
        .buffered(window)
        .map(move |result| {
            result.map_err(|e| {
                tracing::error!(
                    reference = %reference,
                    error = %e,
                    "content streaming failed mid-transfer"
                );
                std::io::Error::other(e)
            })
        });
    Body::from_stream(reads)
}

/// `Content-Disposition` naming only the base name of `filename`.
fn content_disposition(filename: &str) -> Option<HeaderValue> {
    let name: String = base_name(filename)
        .chars()
        .filter(|c| !c.is_control() && *c != '"' && *c != '\\')
        .collect();
    if name.is_empty() {
        return None;
    }
    HeaderValue::from_str(&format!("inline; filename=\"{name}\"")).ok()
}

fn header_str(headers: &HeaderMap, name: axum::http::HeaderName) -> Option<&str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn if_none_match(request: &HeaderMap, etag: &str) -> bool {
    let Some(value) = header_str(request, IF_NONE_MATCH) else {
        return false;
    };
    value.split(',').map(str::trim).any(|candidate| {
        candidate == "*" || candidate.trim_start_matches("W/") == etag
    })
}

/// A range applies unless `If-Range` is present and does not name the current ETag.
fn if_range_allows(request: &HeaderMap, etag: Option<&str>) -> bool {
    match header_str(request, IF_RANGE) {
        None => true,
        Some(value) => etag.is_some_and(|etag| value.trim() == etag),
    }
}
