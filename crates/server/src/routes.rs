//! Route configuration.

use crate::auth::auth_middleware;
use crate::handlers;
use crate::state::AppState;
use axum::Router;
use axum::middleware;
use axum::routing::{delete, get, post, put};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let router = Router::new()
        // Health check (intentionally unauthenticated for probes)
        .route("/v1/health", get(handlers::health_check))
        // Auth discovery
        .route("/v1/auth/whoami", get(handlers::whoami))
        // Sync control plane
        .route("/v1/sync/events", post(handlers::push_event))
        .route("/v1/sync/changes", get(handlers::get_changes))
        .route("/v1/sync/heartbeat", post(handlers::heartbeat))
        // Push channel
        .route("/v1/sync/ws", get(handlers::ws_handler))
        // Whole-blob content transfer
        .route("/v1/content", put(handlers::put_content))
        .route("/v1/content/{hash}", get(handlers::get_content))
        // Chunked uploads
        .route("/v1/uploads", post(handlers::create_upload))
        .route(
            "/v1/uploads/{upload_id}/chunks/{chunk_number}",
            put(handlers::upload_chunk),
        )
        .route(
            "/v1/uploads/{upload_id}/finalize",
            post(handlers::finalize_upload),
        )
        .route("/v1/uploads/{upload_id}", delete(handlers::abandon_upload));

    // Middleware layers are applied in reverse order (outermost first):
    // TraceLayer -> Auth -> Handler
    router
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
