//! HTTP gateway for the trove content-addressed storage network.
//!
//! This crate provides:
//! - Upload of files and multipart collections, bound to postage batches
//! - Manifest and feed resolution for downloads
//! - Path fallback through index and error documents
//! - Range and conditional streaming of file content
//! - Tag, postage batch, pin and feed endpoints

pub mod error;
pub mod handlers;
pub mod headers;
pub mod metrics;
pub mod resolve;
pub mod routes;
pub mod state;
pub mod stream;
pub mod trace;
pub mod upload;

pub use error::ApiError;
pub use resolve::{ManifestResolver, PathResolver, ResolveError};
pub use routes::create_router;
pub use state::AppState;
pub use stream::ContentStreamer;
pub use trace::TraceId;
pub use upload::{UploadCoordinator, UploadError};
