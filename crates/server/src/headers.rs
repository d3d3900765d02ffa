//! Gateway-specific HTTP headers.

use axum::http::{HeaderMap, HeaderName};

pub const TAG: HeaderName = HeaderName::from_static("trove-tag");
pub const PIN: HeaderName = HeaderName::from_static("trove-pin");
pub const POSTAGE_BATCH_ID: HeaderName = HeaderName::from_static("trove-postage-batch-id");
pub const COLLECTION: HeaderName = HeaderName::from_static("trove-collection");
pub const INDEX_DOCUMENT: HeaderName = HeaderName::from_static("trove-index-document");
pub const ERROR_DOCUMENT: HeaderName = HeaderName::from_static("trove-error-document");
pub const FEED_INDEX: HeaderName = HeaderName::from_static("trove-feed-index");

/// Headers browsers may read from cross-origin responses.
pub const EXPOSED: &str = "trove-tag, trove-feed-index, etag, content-disposition, content-range, x-trace-id";

/// Header value as a trimmed string, if present and valid.
pub fn string(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Boolean header: `true` or `1`, case-insensitive.
pub fn flag(headers: &HeaderMap, name: &HeaderName) -> bool {
    string(headers, name).is_some_and(|value| value.eq_ignore_ascii_case("true") || value == "1")
}
