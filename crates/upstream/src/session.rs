use std::collections::HashMap;
use std::sync::Arc;

use mcpx_domain::config::{TransportKind, UpstreamSpec};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::{SessionError, SessionResult};
use crate::protocol::{self, InitializeResult, McpPromptDef, McpResourceDef, McpToolDef, ServerCapabilities, ToolCallResult};
use crate::transport::{SseTransport, StdioTransport, StreamableHttpTransport, UpstreamTransport};

/// State machine for one upstream connection (§4.E).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initial,
    Connecting,
    Connected,
    Disconnected,
    Terminal,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ReadResourceContent {
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default, rename = "mimeType")]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub blob: Option<String>,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ReadResourceResult {
    #[serde(default)]
    pub contents: Vec<ReadResourceContent>,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct GetPromptResult {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub messages: Vec<Value>,
}

/// Wraps a single MCP client against one upstream; the same operation set is
/// exposed regardless of which of the three transports backs it.
pub struct UpstreamSession {
    pub id: String,
    transport: RwLock<Option<Arc<dyn UpstreamTransport>>>,
    state: RwLock<SessionState>,
    capabilities: RwLock<ServerCapabilities>,
    spec: UpstreamSpec,
}

impl UpstreamSession {
    pub fn new(spec: UpstreamSpec) -> Self {
        UpstreamSession {
            id: spec.id.clone(),
            transport: RwLock::new(None),
            state: RwLock::new(SessionState::Initial),
            capabilities: RwLock::new(ServerCapabilities::default()),
            spec,
        }
    }

    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    async fn build_transport(&self) -> SessionResult<Arc<dyn UpstreamTransport>> {
        match self.spec.transport {
            TransportKind::Stdio => {
                let command = self.spec.command.as_deref().filter(|c| !c.is_empty()).ok_or(SessionError::MissingField("command"))?;
                let env: HashMap<String, String> = self.spec.env.clone();
                let t = StdioTransport::spawn(command, &self.spec.args, &env).await?;
                Ok(Arc::new(t))
            }
            TransportKind::StreamableHttp => {
                let url = self.spec.url.as_deref().filter(|u| !u.is_empty()).ok_or(SessionError::MissingField("url"))?;
                Ok(Arc::new(StreamableHttpTransport::new(url)?))
            }
            TransportKind::Sse => {
                let url = self.spec.url.as_deref().filter(|u| !u.is_empty()).ok_or(SessionError::MissingField("url"))?;
                Ok(Arc::new(SseTransport::connect(url).await?))
            }
        }
    }

    /// `connect()` from `Initial`/`Disconnected`. A no-op (with a warning)
    /// when already `Connected`; failure lands in `Disconnected`.
    pub async fn connect(&self) -> SessionResult<()> {
        {
            let state = self.state.read().await;
            if *state == SessionState::Connected {
                tracing::warn!(upstream = %self.id, "connect() called while already connected");
                return Ok(());
            }
        }
        *self.state.write().await = SessionState::Connecting;

        let result = async {
            let transport = self.build_transport().await?;
            let params = protocol::initialize_params();
            let raw = transport
                .send_request("initialize", Some(serde_json::to_value(&params).map_err(|e| SessionError::CallFailed(e.to_string()))?))
                .await?;
            let init: InitializeResult = serde_json::from_value(raw).map_err(|e| SessionError::CallFailed(e.to_string()))?;
            transport.send_notification("notifications/initialized", None).await?;
            SessionResult::Ok((transport, init.capabilities))
        }
        .await;

        match result {
            Ok((transport, capabilities)) => {
                *self.transport.write().await = Some(transport);
                *self.capabilities.write().await = capabilities;
                *self.state.write().await = SessionState::Connected;
                Ok(())
            }
            Err(e) => {
                *self.state.write().await = SessionState::Disconnected;
                tracing::warn!(upstream = %self.id, error = %e, "upstream connect failed");
                Err(e)
            }
        }
    }

    /// Idempotent from any state; lands in `Disconnected`.
    pub async fn disconnect(&self) {
        if let Some(t) = self.transport.write().await.take() {
            t.shutdown().await;
        }
        *self.state.write().await = SessionState::Disconnected;
    }

    async fn require_connected(&self) -> SessionResult<Arc<dyn UpstreamTransport>> {
        if *self.state.read().await != SessionState::Connected {
            return Err(SessionError::NotConnected);
        }
        self.transport.read().await.clone().ok_or(SessionError::NotConnected)
    }

    pub async fn list_tools(&self) -> SessionResult<Vec<McpToolDef>> {
        let transport = self.require_connected().await?;
        let raw = transport.send_request("tools/list", None).await?;
        let result: protocol::ToolsListResult = serde_json::from_value(raw).unwrap_or_default();
        Ok(result.tools)
    }

    pub async fn list_resources(&self) -> SessionResult<Vec<McpResourceDef>> {
        if self.capabilities.read().await.resources.is_none() {
            return Ok(Vec::new());
        }
        let transport = self.require_connected().await?;
        let raw = transport.send_request("resources/list", None).await?;
        let result: protocol::ResourcesListResult = serde_json::from_value(raw).unwrap_or_default();
        Ok(result.resources)
    }

    pub async fn list_prompts(&self) -> SessionResult<Vec<McpPromptDef>> {
        if self.capabilities.read().await.prompts.is_none() {
            return Ok(Vec::new());
        }
        let transport = self.require_connected().await?;
        let raw = transport.send_request("prompts/list", None).await?;
        let result: protocol::PromptsListResult = serde_json::from_value(raw).unwrap_or_default();
        Ok(result.prompts)
    }

    pub async fn call_tool(&self, name: &str, args: Value) -> SessionResult<ToolCallResult> {
        let transport = self.require_connected().await?;
        let raw = transport
            .send_request("tools/call", Some(serde_json::json!({"name": name, "arguments": args})))
            .await?;
        Ok(protocol::parse_tool_call_result(raw))
    }

    pub async fn read_resource(&self, uri: &str) -> SessionResult<ReadResourceResult> {
        let transport = self.require_connected().await?;
        let raw = transport.send_request("resources/read", Some(serde_json::json!({"uri": uri}))).await?;
        serde_json::from_value(raw).map_err(|e| SessionError::CallFailed(e.to_string()))
    }

    pub async fn get_prompt(&self, name: &str, args: Option<Value>) -> SessionResult<GetPromptResult> {
        let transport = self.require_connected().await?;
        let mut params = serde_json::json!({"name": name});
        if let Some(args) = args {
            params["arguments"] = args;
        }
        let raw = transport.send_request("prompts/get", Some(params)).await?;
        serde_json::from_value(raw).map_err(|e| SessionError::CallFailed(e.to_string()))
    }
}
