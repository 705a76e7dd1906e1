pub mod admin;
pub mod guard;
pub mod mcp;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Builds the full HTTP surface: the admin API (each handler gates itself via
/// the [`guard::AdminGuard`] extractor) plus the downstream MCP bindings for
/// the streamable-HTTP and SSE transports.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(admin::index).post(mcp::post_mcp))
        .route("/health", get(admin::health))
        .route("/api/config", get(admin::config_get).put(admin::config_put))
        .route("/api/config/validate", post(admin::config_validate))
        .route("/api/reload", post(admin::reload))
        .route("/api/logs/stream", get(admin::logs_stream))
        .route("/api/status", get(admin::status))
        .route("/api/status/:upstream_id", get(admin::status_one))
        .route("/mcp", get(mcp::get_mcp).post(mcp::post_mcp))
        .route("/sse", get(mcp::get_sse))
        .route("/messages", post(mcp::post_messages))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
