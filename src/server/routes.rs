//! Route configuration.

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::state::AppState;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let upload_limit = state.config.server.max_upload_bytes;

    Router::new()
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health_check))
        .route(
            "/upload",
            post(handlers::upload_photo).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/photos/list", get(handlers::list_photos))
        .route("/photos/status", get(handlers::get_status))
        .route("/photos/delete/{filename}", delete(handlers::delete_photo))
        .route("/photos/originals/{filename}", get(handlers::serve_original))
        .route("/photos/convert/{filename}", post(handlers::convert_photo))
        .route("/photos/display/{filename}", post(handlers::display_photo))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
