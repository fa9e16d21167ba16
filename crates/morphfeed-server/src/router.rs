//! Axum router construction.
//!
//! Assembles the feed `WebSocket` route and the REST endpoints into a
//! single [`Router`] with CORS and request tracing enabled.

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;
use crate::ws;

/// Build the complete router.
///
/// The router includes:
/// - `GET {pathname}/{feed}` -- `WebSocket` feed stream
/// - `GET /health` -- liveness and running feeds
/// - `GET /admin/feeds` -- known feeds and subscriber counts
/// - `GET /admin/feeds/{feed}` -- latest tree of a running feed
/// - `GET /admin/rules` -- registered rule ids
/// - `POST /admin/reload` -- reload documents and rules from disk
///
/// CORS allows any origin.
pub fn build_router(state: Arc<AppState>, pathname: &str) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let feed_route = format!("{}/{{feed}}", pathname.trim_end_matches('/'));

    Router::new()
        // WebSocket
        .route(&feed_route, get(ws::ws_feed))
        // REST API
        .route("/health", get(handlers::health))
        .route("/admin/feeds", get(handlers::list_feeds))
        .route("/admin/feeds/{feed}", get(handlers::get_feed))
        .route("/admin/rules", get(handlers::list_rules))
        .route("/admin/reload", post(handlers::reload))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
