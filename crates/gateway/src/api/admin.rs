//! Admin HTTP surface (§6): health/status probes, config get/put/validate,
//! reload, and the live log stream. Every route but `/` and `/health` is
//! gated behind [`AdminGuard`].

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json};
use futures_util::stream::Stream;
use mcpx_domain::config::Config;
use mcpx_upstream::SessionState;

use crate::state::AppState;

use super::guard::AdminGuard;

fn session_state_label(state: SessionState) -> &'static str {
    match state {
        SessionState::Initial => "initial",
        SessionState::Connecting => "connecting",
        SessionState::Connected => "connected",
        SessionState::Disconnected => "disconnected",
        SessionState::Terminal => "terminal",
    }
}

async fn upstream_statuses(state: &AppState) -> Vec<serde_json::Value> {
    let aggregator = match state.supervisor.aggregator() {
        Some(a) => a,
        None => return Vec::new(),
    };
    let mut statuses = Vec::new();
    for session in state.supervisor.sessions() {
        let (tools, resources, prompts) = aggregator.get_upstream_counts(&session.id).await;
        statuses.push(serde_json::json!({
            "id": session.id,
            "state": session_state_label(session.state().await),
            "tools": tools,
            "resources": resources,
            "prompts": prompts,
        }));
    }
    statuses
}

pub async fn index() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": "mcproxy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// `GET /health` — public, no auth.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": if state.supervisor.is_running() { "ok" } else { "starting" },
        "upstreams": upstream_statuses(&state).await,
    }))
}

/// `GET /api/status`
pub async fn status(_guard: AdminGuard, State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": if state.supervisor.is_running() { "ok" } else { "starting" },
        "upstreams": upstream_statuses(&state).await,
    }))
}

/// `GET /api/status/:upstreamId`
pub async fn status_one(_guard: AdminGuard, State(state): State<AppState>, Path(upstream_id): Path<String>) -> impl IntoResponse {
    let Some(aggregator) = state.supervisor.aggregator() else {
        return (StatusCode::SERVICE_UNAVAILABLE, Json(serde_json::json!({ "error": "proxy not running" }))).into_response();
    };
    let session = state.supervisor.sessions().into_iter().find(|s| s.id == upstream_id);
    let Some(session) = session else {
        return (StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": format!("unknown upstream '{upstream_id}'") }))).into_response();
    };

    let (tools, resources, prompts) = aggregator.get_upstream_details(&upstream_id).await;
    Json(serde_json::json!({
        "id": session.id,
        "state": session_state_label(session.state().await),
        "tools": tools.iter().map(|t| t.namespaced_name.clone()).collect::<Vec<_>>(),
        "resources": resources.iter().map(|r| r.namespaced_uri.clone()).collect::<Vec<_>>(),
        "prompts": prompts.iter().map(|p| p.namespaced_name.clone()).collect::<Vec<_>>(),
    }))
    .into_response()
}

/// `GET /api/config` — returns the raw file content on disk alongside its path.
pub async fn config_get(_guard: AdminGuard, State(state): State<AppState>) -> impl IntoResponse {
    match tokio::fs::read_to_string(&state.config_path).await {
        Ok(content) => Json(serde_json::json!({ "path": state.config_path.display().to_string(), "content": content })).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({ "error": format!("reading config: {e}") }))).into_response(),
    }
}

fn validate_body(body: &str) -> Result<Config, Vec<mcpx_domain::config::ConfigIssue>> {
    let config = match Config::from_json_str(body) {
        Ok(c) => c,
        Err(e) => return Err(vec![mcpx_domain::config::ConfigIssue::error("$", &e.to_string())]),
    };
    let issues = config.validate();
    if issues.iter().any(|i| i.is_error()) {
        return Err(issues);
    }
    Ok(config)
}

/// `POST /api/config/validate` — parse + validate without writing anything.
pub async fn config_validate(_guard: AdminGuard, body: String) -> impl IntoResponse {
    match validate_body(&body) {
        Ok(_) => Json(serde_json::json!({ "valid": true })),
        Err(issues) => Json(serde_json::json!({ "valid": false, "issues": issues })),
    }
}

/// `PUT /api/config` — validates, writes atomically (tmp file + rename), and
/// leaves the running proxy untouched until `/api/reload` is called.
pub async fn config_put(_guard: AdminGuard, State(state): State<AppState>, body: String) -> impl IntoResponse {
    if let Err(issues) = validate_body(&body) {
        return (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "success": false, "error": "config validation failed", "issues": issues }))).into_response();
    }

    let tmp_path = state.config_path.with_extension("json.tmp");
    if let Err(e) = tokio::fs::write(&tmp_path, &body).await {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({ "success": false, "error": format!("write failed: {e}") }))).into_response();
    }
    if let Err(e) = tokio::fs::rename(&tmp_path, &state.config_path).await {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({ "success": false, "error": format!("rename failed: {e}") }))).into_response();
    }

    tracing::info!(path = %state.config_path.display(), "config written via API");
    Json(serde_json::json!({
        "success": true,
        "path": state.config_path.display().to_string(),
        "note": "call /api/reload to apply",
    }))
    .into_response()
}

/// `POST /api/reload` — reads the config from disk and hot-swaps the proxy
/// onto it (§4.L `reload()`).
pub async fn reload(_guard: AdminGuard, State(state): State<AppState>) -> impl IntoResponse {
    let raw = match tokio::fs::read_to_string(&state.config_path).await {
        Ok(r) => r,
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({ "success": false, "error": format!("reading config: {e}") }))).into_response(),
    };
    let config = match validate_body(&raw) {
        Ok(c) => c,
        Err(issues) => return (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "success": false, "error": "config validation failed", "issues": issues }))).into_response(),
    };

    state.supervisor.reload(config).await;
    Json(serde_json::json!({ "success": true, "upstreams": upstream_statuses(&state).await })).into_response()
}

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// `GET /api/logs/stream` — history backfill, then live entries; the
/// `KeepAlive` layer emits the 30s idle heartbeat as a bare SSE comment.
pub async fn logs_stream(_guard: AdminGuard, State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let history = state.log_sink.recent(Some(100));
    let mut receiver = state.log_sink.subscribe();

    let stream = async_stream::stream! {
        let payload = serde_json::json!({ "type": "history", "logs": history });
        yield Ok(Event::default().data(payload.to_string()));

        loop {
            match receiver.recv().await {
                Ok(entry) => {
                    let payload = serde_json::json!({ "type": "log", "entry": entry });
                    yield Ok(Event::default().data(payload.to_string()));
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(HEARTBEAT_INTERVAL).text(""))
}
