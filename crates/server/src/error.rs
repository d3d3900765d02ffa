//! API error types.

use crate::resolve::ResolveError;
use crate::stream::StreamError;
use crate::upload::UploadError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use trove_core::TagError;
use trove_storage::{AdmissionError, StorageError};

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Tag(#[from] TagError),

    #[error(transparent)]
    Admission(#[from] AdmissionError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] trove_core::Error),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Unavailable(_) => "unavailable",
            Self::Internal(_) => "internal_error",
            Self::Upload(e) => upload_code(e),
            Self::Resolve(e) => resolve_code(e),
            Self::Stream(e) => match e {
                StreamError::NotFound(_) => "content_not_found",
                StreamError::Storage(_) => "stream_failed",
            },
            Self::Tag(e) => tag_code(e),
            Self::Admission(e) => admission_code(e),
            Self::Storage(e) => storage_code(e),
            Self::Core(_) => "invalid_input",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Upload(e) => upload_status(e),
            Self::Resolve(e) => resolve_status(e),
            Self::Stream(e) => match e {
                StreamError::NotFound(_) => StatusCode::NOT_FOUND,
                StreamError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Tag(e) => tag_status(e),
            Self::Admission(e) => admission_status(e),
            Self::Storage(e) => storage_status(e),
            Self::Core(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Message returned to the client. Server-side failures keep their
    /// details in the log.
    fn public_message(&self, status: StatusCode) -> String {
        if status.is_server_error() {
            self.code().replace('_', " ")
        } else {
            self.to_string()
        }
    }
}

fn upload_code(e: &UploadError) -> &'static str {
    match e {
        UploadError::Admission(e) => admission_code(e),
        UploadError::TagResolution(e) => tag_code(e),
        UploadError::TagIncrement(_) => "tag_increment_failed",
        UploadError::QuotaExceeded(_) => "quota_exceeded",
        UploadError::InvalidName(_) => "invalid_name",
        UploadError::Store(_) => "store_failed",
        UploadError::Manifest(_) => "manifest_failed",
        UploadError::DoneSplit(_) => "done_split_failed",
        UploadError::Pin(_) => "pin_failed",
        UploadError::Sync(_) => "sync_failed",
    }
}

fn upload_status(e: &UploadError) -> StatusCode {
    match e {
        UploadError::Admission(e) => admission_status(e),
        UploadError::TagResolution(e) => tag_status(e),
        UploadError::QuotaExceeded(_) => StatusCode::PAYMENT_REQUIRED,
        UploadError::InvalidName(_) => StatusCode::BAD_REQUEST,
        UploadError::TagIncrement(_)
        | UploadError::Store(_)
        | UploadError::Manifest(_)
        | UploadError::DoneSplit(_)
        | UploadError::Pin(_)
        | UploadError::Sync(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn resolve_code(e: &ResolveError) -> &'static str {
    match e {
        ResolveError::NotAManifest { .. } => "not_a_manifest",
        ResolveError::FeedNotFound { .. } => "feed_not_found",
        ResolveError::FeedLookup(_) => "feed_lookup_failed",
        ResolveError::FeedUpdateMalformed(_) => "feed_update_malformed",
        ResolveError::AddressNotFound => "address_not_found",
        ResolveError::PathNotFound(_) => "path_not_found",
        ResolveError::RedirectToDirectory(_) => "redirect_to_directory",
        ResolveError::Cancelled => "cancelled",
    }
}

fn resolve_status(e: &ResolveError) -> StatusCode {
    match e {
        ResolveError::NotAManifest { .. }
        | ResolveError::FeedNotFound { .. }
        | ResolveError::AddressNotFound
        | ResolveError::PathNotFound(_)
        | ResolveError::RedirectToDirectory(_) => StatusCode::NOT_FOUND,
        ResolveError::FeedLookup(_) | ResolveError::FeedUpdateMalformed(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        ResolveError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn tag_code(e: &TagError) -> &'static str {
    match e {
        TagError::NotFound(_) => "tag_not_found",
        TagError::InvalidId(_) => "invalid_tag",
        TagError::AlreadyDone(_) => "tag_done",
        TagError::Overflow { .. } => "tag_overflow",
    }
}

fn tag_status(e: &TagError) -> StatusCode {
    match e {
        TagError::NotFound(_) => StatusCode::NOT_FOUND,
        TagError::InvalidId(_) => StatusCode::BAD_REQUEST,
        TagError::AlreadyDone(_) => StatusCode::CONFLICT,
        TagError::Overflow { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn admission_code(e: &AdmissionError) -> &'static str {
    match e {
        AdmissionError::Unusable(_) => "batch_unusable",
        AdmissionError::NotFound(_) => "batch_not_found",
        AdmissionError::Invalid(_) => "invalid_batch",
    }
}

fn admission_status(e: &AdmissionError) -> StatusCode {
    match e {
        AdmissionError::Unusable(_) => StatusCode::PAYMENT_REQUIRED,
        AdmissionError::NotFound(_) => StatusCode::NOT_FOUND,
        AdmissionError::Invalid(_) => StatusCode::BAD_REQUEST,
    }
}

fn storage_code(e: &StorageError) -> &'static str {
    match e {
        StorageError::NotFound(_) => "not_found",
        StorageError::QuotaExceeded(_) => "quota_exceeded",
        StorageError::Unsupported(_) => "unsupported",
        StorageError::Tag(e) => tag_code(e),
        _ => "storage_error",
    }
}

fn storage_status(e: &StorageError) -> StatusCode {
    match e {
        StorageError::NotFound(_) => StatusCode::NOT_FOUND,
        StorageError::QuotaExceeded(_) => StatusCode::PAYMENT_REQUIRED,
        StorageError::Unsupported(_) => StatusCode::BAD_REQUEST,
        StorageError::Tag(e) => tag_status(e),
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "request failed");
        } else {
            tracing::debug!(code = self.code(), error = %self, "request rejected");
        }
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.public_message(status),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
