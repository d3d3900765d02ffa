//! Prometheus metrics for the trove gateway.
//!
//! Exposes counters for uploads and downloads, resolution outcomes and
//! upload latency. Labels carry operation kinds only, never references or paths.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Upload metrics
pub static UPLOADS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("trove_uploads_total", "Completed uploads by kind"),
        &["kind"],
    )
    .expect("metric creation failed")
});

pub static UPLOAD_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("trove_upload_errors_total", "Failed uploads by error kind"),
        &["error_type"],
    )
    .expect("metric creation failed")
});

pub static UPLOAD_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "trove_upload_duration_seconds",
            "Time from admission until the upload is synced",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
    )
    .expect("metric creation failed")
});

pub static CHUNKS_STORED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "trove_chunks_stored_total",
        "Chunks newly written by uploads",
    )
    .expect("metric creation failed")
});

// Download metrics
pub static DOWNLOADS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("trove_downloads_total", "Downloads that started streaming")
        .expect("metric creation failed")
});

pub static DOWNLOAD_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "trove_download_errors_total",
            "Failed downloads by resolution error kind",
        ),
        &["error_type"],
    )
    .expect("metric creation failed")
});

pub static FEED_DEREFERENCES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "trove_feed_dereferences_total",
        "Downloads resolved through a feed update",
    )
    .expect("metric creation failed")
});

pub static DIRECTORY_REDIRECTS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "trove_directory_redirects_total",
        "Downloads redirected to a trailing-slash directory path",
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Idempotent, so tests can build several routers in one process.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(UPLOADS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOAD_ERRORS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOAD_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CHUNKS_STORED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(DOWNLOADS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(DOWNLOAD_ERRORS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(FEED_DEREFERENCES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(DIRECTORY_REDIRECTS.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

pub fn record_upload_error(error_type: &str) {
    UPLOAD_ERRORS.with_label_values(&[error_type]).inc();
}

pub fn record_download_error(error_type: &str) {
    DOWNLOAD_ERRORS.with_label_values(&[error_type]).inc();
}
