//! The downstream-facing MCP surface: JSON-RPC method dispatch shared by all
//! three downstream transports (stdio, streamable-HTTP, SSE), plus the HTTP
//! bindings for the latter two (§6).

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json};
use futures_util::stream::Stream;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::downstream::DownstreamHandler;
use crate::state::AppState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    fn invalid_params(message: impl Into<String>) -> Self {
        RpcError { code: -32602, message: message.into() }
    }

    fn method_not_found(method: &str) -> Self {
        RpcError { code: -32601, message: format!("method not found: {method}") }
    }
}

fn domain_error_to_rpc(e: mcpx_domain::Error) -> RpcError {
    let code = match &e {
        mcpx_domain::Error::NotFound(_) => -32001,
        _ => -32000,
    };
    RpcError { code, message: e.to_string() }
}

/// Dispatches one already-decoded JSON-RPC method/params pair onto the
/// downstream handler. Shared verbatim by stdio, streamable-HTTP, and SSE.
pub async fn dispatch(handler: &DownstreamHandler, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
    match method {
        "initialize" => Ok(serde_json::json!({
            "protocolVersion": mcpx_upstream::protocol::MCP_PROTOCOL_VERSION,
            "capabilities": {"tools": {}, "resources": {}, "prompts": {}},
            "serverInfo": {"name": "mcproxy", "version": env!("CARGO_PKG_VERSION")},
        })),
        "notifications/initialized" | "ping" => Ok(Value::Null),
        "tools/list" => {
            let tools = handler.list_tools().await;
            Ok(serde_json::json!({
                "tools": tools.iter().map(|t| serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "inputSchema": t.input_schema,
                })).collect::<Vec<_>>(),
            }))
        }
        "tools/call" => {
            let name = params.as_ref().and_then(|p| p.get("name")).and_then(Value::as_str).ok_or_else(|| RpcError::invalid_params("missing 'name'"))?;
            let args = params.as_ref().and_then(|p| p.get("arguments")).cloned().unwrap_or_else(|| serde_json::json!({}));
            handler.call_tool(name, args).await.map(|r| serde_json::to_value(r).unwrap_or(Value::Null)).map_err(domain_error_to_rpc)
        }
        "resources/list" => {
            let resources = handler.list_resources().await;
            Ok(serde_json::json!({
                "resources": resources.iter().map(|r| serde_json::json!({
                    "uri": r.namespaced_uri,
                    "name": r.name,
                    "description": r.description,
                    "mimeType": r.mime_type,
                })).collect::<Vec<_>>(),
            }))
        }
        "resources/read" => {
            let uri = params.as_ref().and_then(|p| p.get("uri")).and_then(Value::as_str).ok_or_else(|| RpcError::invalid_params("missing 'uri'"))?;
            handler
                .read_resource(uri)
                .await
                .map(|r| {
                    serde_json::json!({
                        "contents": r.contents.iter().map(|c| serde_json::json!({
                            "uri": c.uri,
                            "mimeType": c.mime_type,
                            "text": c.text,
                            "blob": c.blob,
                        })).collect::<Vec<_>>(),
                    })
                })
                .map_err(domain_error_to_rpc)
        }
        "prompts/list" => {
            let prompts = handler.list_prompts().await;
            Ok(serde_json::json!({
                "prompts": prompts.iter().map(|p| serde_json::json!({
                    "name": p.namespaced_name,
                    "description": p.description,
                    "arguments": p.arguments,
                })).collect::<Vec<_>>(),
            }))
        }
        "prompts/get" => {
            let name = params.as_ref().and_then(|p| p.get("name")).and_then(Value::as_str).ok_or_else(|| RpcError::invalid_params("missing 'name'"))?;
            let args = params.as_ref().and_then(|p| p.get("arguments")).cloned();
            handler
                .get_prompt(name, args)
                .await
                .map(|r| serde_json::json!({ "description": r.description, "messages": r.messages }))
                .map_err(domain_error_to_rpc)
        }
        other => Err(RpcError::method_not_found(other)),
    }
}

#[derive(serde::Deserialize)]
struct InboundMessage {
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Option<Value>,
}

fn ok_response(id: Value, result: Value) -> Value {
    serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn err_response(id: Value, err: RpcError) -> Value {
    serde_json::json!({ "jsonrpc": "2.0", "id": id, "error": { "code": err.code, "message": err.message } })
}

/// Decodes and dispatches one inbound JSON-RPC message. Returns `None` for
/// notifications (no `id`), since those get no response per the spec.
pub(crate) async fn handle_message(handler: &DownstreamHandler, body: Value) -> Option<Value> {
    let msg: InboundMessage = match serde_json::from_value(body) {
        Ok(m) => m,
        Err(e) => return Some(err_response(Value::Null, RpcError { code: -32700, message: format!("parse error: {e}") })),
    };
    let id = msg.id;
    match dispatch(handler, &msg.method, msg.params).await {
        Ok(result) => id.map(|id| ok_response(id, result)),
        Err(e) => id.map(|id| err_response(id, e)),
    }
}

fn handler_or_unavailable(state: &AppState) -> Result<Arc<DownstreamHandler>, axum::response::Response> {
    state
        .supervisor
        .handler()
        .ok_or_else(|| (StatusCode::SERVICE_UNAVAILABLE, Json(serde_json::json!({ "error": "proxy not running" }))).into_response())
}

/// `POST /mcp` (and the bare `POST /` fallback): one request, one response.
pub async fn post_mcp(State(state): State<AppState>, Json(body): Json<Value>) -> impl IntoResponse {
    let handler = match handler_or_unavailable(&state) {
        Ok(h) => h,
        Err(resp) => return resp,
    };
    match handle_message(&handler, body).await {
        Some(resp) => Json(resp).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

/// `GET /mcp`: this proxy never pushes server-initiated messages over the
/// streamable-HTTP transport, so the upgrade has nothing to offer.
pub async fn get_mcp() -> impl IntoResponse {
    StatusCode::METHOD_NOT_ALLOWED
}

/// Registry of live SSE sessions, keyed by a server-generated session id, so
/// a `POST /messages` carrying that id can be routed back onto the matching
/// event stream.
#[derive(Default)]
pub struct SseSessionRegistry {
    senders: Mutex<HashMap<String, mpsc::UnboundedSender<String>>>,
}

impl SseSessionRegistry {
    pub fn new() -> Self {
        SseSessionRegistry::default()
    }

    fn register(&self, id: String, tx: mpsc::UnboundedSender<String>) {
        self.senders.lock().insert(id, tx);
    }

    fn remove(&self, id: &str) {
        self.senders.lock().remove(id);
    }

    fn send(&self, id: &str, payload: String) -> bool {
        match self.senders.lock().get(id) {
            Some(tx) => tx.send(payload).is_ok(),
            None => false,
        }
    }
}

/// `GET /sse`: opens the event stream and announces the `POST /messages`
/// endpoint the client should use, per the MCP SSE transport convention.
pub async fn get_sse(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let session_id = uuid::Uuid::new_v4().to_string();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    state.sse_sessions.register(session_id.clone(), tx);
    let registry = state.sse_sessions.clone();

    let stream = async_stream::stream! {
        yield Ok(Event::default().event("endpoint").data(format!("/messages?sessionId={session_id}")));
        while let Some(payload) = rx.recv().await {
            yield Ok(Event::default().data(payload));
        }
        registry.remove(&session_id);
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(HEARTBEAT_INTERVAL).text(""))
}

#[derive(serde::Deserialize)]
pub struct SseSessionQuery {
    #[serde(rename = "sessionId")]
    session_id: String,
}

/// `POST /messages?sessionId=...`: dispatches the request and pushes the
/// response onto the matching `/sse` stream instead of the HTTP response body.
pub async fn post_messages(State(state): State<AppState>, Query(query): Query<SseSessionQuery>, Json(body): Json<Value>) -> impl IntoResponse {
    let handler = match handler_or_unavailable(&state) {
        Ok(h) => h,
        Err(resp) => return resp,
    };
    if let Some(resp) = handle_message(&handler, body).await {
        if !state.sse_sessions.send(&query.session_id, resp.to_string()) {
            return (StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "unknown sessionId" }))).into_response();
        }
    }
    StatusCode::ACCEPTED.into_response()
}
