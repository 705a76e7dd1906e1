//! Shared state handed to every HTTP handler: the live object graph (via
//! [`Supervisor`]), the log ring buffer, and the admin auth material. One
//! instance is built in `main.rs` and cloned (cheaply, `Arc` all the way
//! down) into the `axum::Router`.

use std::path::PathBuf;
use std::sync::Arc;

use crate::api::mcp::SseSessionRegistry;
use crate::logsink::LogSink;
use crate::supervisor::Supervisor;

#[derive(Clone)]
pub struct AppState {
    pub supervisor: Arc<Supervisor>,
    pub log_sink: Arc<LogSink>,
    pub config_path: PathBuf,
    pub admin_token_hash: Option<Vec<u8>>,
    pub sse_sessions: Arc<SseSessionRegistry>,
}
