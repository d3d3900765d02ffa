//! Route configuration.

use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use crate::trace::trace_middleware;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let content_routes = Router::new()
        .route("/bzz", post(handlers::upload))
        .route("/bzz/{address}", get(handlers::download_root))
        .route("/bzz/{address}/", get(handlers::download_root))
        .route("/bzz/{address}/{*path}", get(handlers::download))
        .layer(DefaultBodyLimit::max(body_limit(
            state.config.server.max_upload_size,
        )));

    let api_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/tags", post(handlers::create_tag).get(handlers::list_tags))
        .route(
            "/tags/{id}",
            get(handlers::get_tag).delete(handlers::delete_tag),
        )
        .route(
            "/stamps",
            post(handlers::create_batch).get(handlers::list_batches),
        )
        .route("/stamps/{batch_id}", get(handlers::get_batch))
        .route("/pins", get(handlers::list_pins))
        .route(
            "/pins/{reference}",
            post(handlers::create_pin)
                .get(handlers::get_pin)
                .delete(handlers::delete_pin),
        )
        .route(
            "/feeds/{owner}/{topic}",
            post(handlers::create_feed_manifest).get(handlers::get_feed),
        )
        .route(
            "/feeds/{owner}/{topic}/updates",
            post(handlers::publish_feed_update),
        );

    let mut router = Router::new().merge(content_routes).merge(api_routes);

    // When enabled, restrict this endpoint to the scraper's network.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    // Layers run outermost first: TraceLayer, then trace ids, then the handler.
    router
        .layer(middleware::from_fn(trace_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn body_limit(max_upload_size: u64) -> usize {
    usize::try_from(max_upload_size).unwrap_or(usize::MAX)
}
