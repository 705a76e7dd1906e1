use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio as StdStdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex};

use crate::error::{TransportError, TransportResult};
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_SKIP_LINES: u32 = 1000;

/// Capability-based session polymorphism (§9): every transport presents the
/// same request/notification surface regardless of wire format.
#[async_trait]
pub trait UpstreamTransport: Send + Sync {
    async fn send_request(&self, method: &str, params: Option<Value>) -> TransportResult<Value>;
    async fn send_notification(&self, method: &str, params: Option<Value>) -> TransportResult<()>;
    fn is_alive(&self) -> bool;
    async fn shutdown(&self);
}

fn next_id(counter: &AtomicU64) -> u64 {
    counter.fetch_add(1, Ordering::SeqCst)
}

fn to_response(value: Value) -> TransportResult<Value> {
    let resp: JsonRpcResponse = serde_json::from_value(value)
        .map_err(|e| TransportError::Protocol(format!("malformed JSON-RPC response: {e}")))?;
    resp.into_result().map_err(|e| TransportError::Protocol(e.to_string()))
}

/// Spawns `command args...` and communicates newline-delimited JSON-RPC over
/// its stdin/stdout, one request in flight at a time (the session and the
/// spec both assume stdio is non-multiplexing).
pub struct StdioTransport {
    child: Mutex<Child>,
    stdin: Mutex<tokio::process::ChildStdin>,
    stdout: Mutex<BufReader<tokio::process::ChildStdout>>,
    request_lock: Mutex<()>,
    next_id: AtomicU64,
    alive: AtomicBool,
}

impl StdioTransport {
    pub async fn spawn(command: &str, args: &[String], env: &HashMap<String, String>) -> TransportResult<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(StdStdio::piped())
            .stdout(StdStdio::piped())
            .stderr(StdStdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| TransportError::Connect(e.to_string()))?;
        let stdin = child.stdin.take().ok_or_else(|| TransportError::Connect("no stdin".into()))?;
        let stdout = child.stdout.take().ok_or_else(|| TransportError::Connect("no stdout".into()))?;

        Ok(StdioTransport {
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(BufReader::new(stdout)),
            request_lock: Mutex::new(()),
            next_id: AtomicU64::new(1),
            alive: AtomicBool::new(true),
        })
    }

    async fn write_line(&self, line: &str) -> TransportResult<()> {
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(line.as_bytes()).await.map_err(|e| TransportError::Io(e.to_string()))?;
        stdin.write_all(b"\n").await.map_err(|e| TransportError::Io(e.to_string()))?;
        stdin.flush().await.map_err(|e| TransportError::Io(e.to_string()))?;
        Ok(())
    }

    async fn read_matching_response(&self, id: u64) -> TransportResult<Value> {
        let mut stdout = self.stdout.lock().await;
        let mut skipped = 0;
        loop {
            let mut line = String::new();
            let n = stdout.read_line(&mut line).await.map_err(|e| TransportError::Io(e.to_string()))?;
            if n == 0 {
                self.alive.store(false, Ordering::SeqCst);
                return Err(TransportError::Closed);
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let value: Value = match serde_json::from_str(trimmed) {
                Ok(v) => v,
                Err(_) => {
                    skipped += 1;
                    if skipped > MAX_SKIP_LINES {
                        return Err(TransportError::Protocol("too many non-JSON stdout lines".into()));
                    }
                    continue;
                }
            };
            if value.get("id").and_then(Value::as_u64) == Some(id) {
                return Ok(value);
            }
            // Response for a stale/unrelated id (shouldn't happen given the
            // request lock, but tolerate it rather than wedge the session).
        }
    }
}

#[async_trait]
impl UpstreamTransport for StdioTransport {
    async fn send_request(&self, method: &str, params: Option<Value>) -> TransportResult<Value> {
        if !self.is_alive() {
            return Err(TransportError::Closed);
        }
        let _guard = self.request_lock.lock().await;
        let id = next_id(&self.next_id);
        let req = JsonRpcRequest::new(id, method, params);
        let line = serde_json::to_string(&req).map_err(|e| TransportError::Protocol(e.to_string()))?;
        self.write_line(&line).await?;
        let raw = tokio::time::timeout(REQUEST_TIMEOUT, self.read_matching_response(id))
            .await
            .map_err(|_| TransportError::Timeout)??;
        to_response(raw)
    }

    async fn send_notification(&self, method: &str, params: Option<Value>) -> TransportResult<()> {
        if !self.is_alive() {
            return Err(TransportError::Closed);
        }
        let notif = JsonRpcNotification::new(method, params);
        let line = serde_json::to_string(&notif).map_err(|e| TransportError::Protocol(e.to_string()))?;
        self.write_line(&line).await
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) {
        self.alive.store(false, Ordering::SeqCst);
        {
            let mut stdin = self.stdin.lock().await;
            let _ = stdin.shutdown().await;
        }
        let mut child = self.child.lock().await;
        let wait = tokio::time::timeout(Duration::from_secs(5), child.wait()).await;
        if wait.is_err() {
            let _ = child.kill().await;
        }
    }
}

/// One JSON-RPC request per HTTP POST to `url`; no persistent connection
/// state beyond the shared HTTP client.
pub struct StreamableHttpTransport {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
    alive: AtomicBool,
}

impl StreamableHttpTransport {
    pub fn new(url: &str) -> TransportResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        Ok(StreamableHttpTransport { client, url: url.to_string(), next_id: AtomicU64::new(1), alive: AtomicBool::new(true) })
    }
}

#[async_trait]
impl UpstreamTransport for StreamableHttpTransport {
    async fn send_request(&self, method: &str, params: Option<Value>) -> TransportResult<Value> {
        let id = next_id(&self.next_id);
        let req = JsonRpcRequest::new(id, method, params);
        let resp = self
            .client
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(TransportError::Io(format!("HTTP {}", resp.status())));
        }
        let raw: Value = resp.json().await.map_err(|e| TransportError::Protocol(e.to_string()))?;
        to_response(raw)
    }

    async fn send_notification(&self, method: &str, params: Option<Value>) -> TransportResult<()> {
        let notif = JsonRpcNotification::new(method, params);
        self.client.post(&self.url).json(&notif).send().await.map_err(|e| TransportError::Io(e.to_string()))?;
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;

/// SSE upstream transport: a long-lived `GET` event stream delivers
/// responses, client requests go out as `POST`s to the endpoint the server
/// names in its first `endpoint` event, per the MCP SSE transport
/// convention.
pub struct SseTransport {
    client: reqwest::Client,
    post_url: Mutex<Option<String>>,
    pending: PendingMap,
    next_id: AtomicU64,
    alive: AtomicBool,
    _reader: tokio::task::JoinHandle<()>,
}

impl SseTransport {
    pub async fn connect(url: &str) -> TransportResult<Self> {
        use futures_util::StreamExt;
        use reqwest_eventsource::{Event, EventSource};

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let mut es = EventSource::get(url);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (endpoint_tx, endpoint_rx) = oneshot::channel::<String>();
        let mut endpoint_tx = Some(endpoint_tx);
        let base_url = url.to_string();
        let pending_for_task = pending.clone();

        let reader = tokio::spawn(async move {
            while let Some(event) = es.next().await {
                match event {
                    Ok(Event::Open) => {}
                    Ok(Event::Message(msg)) => match msg.event.as_str() {
                        "endpoint" => {
                            if let Some(tx) = endpoint_tx.take() {
                                let resolved = resolve_endpoint(&base_url, &msg.data);
                                let _ = tx.send(resolved);
                            }
                        }
                        _ => {
                            if let Ok(value) = serde_json::from_str::<Value>(&msg.data) {
                                if let Some(id) = value.get("id").and_then(Value::as_u64) {
                                    if let Some(tx) = pending_for_task.lock().await.remove(&id) {
                                        let _ = tx.send(value);
                                    }
                                }
                            }
                        }
                    },
                    Err(_) => break,
                }
            }
        });

        let post_url = tokio::time::timeout(REQUEST_TIMEOUT, endpoint_rx)
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|_| TransportError::Connect("SSE stream closed before endpoint event".into()))?;

        Ok(SseTransport {
            client,
            post_url: Mutex::new(Some(post_url)),
            pending,
            next_id: AtomicU64::new(1),
            alive: AtomicBool::new(true),
            _reader: reader,
        })
    }
}

fn resolve_endpoint(base_url: &str, data: &str) -> String {
    if data.starts_with("http://") || data.starts_with("https://") {
        return data.to_string();
    }
    match url::Url::parse(base_url).and_then(|b| b.join(data)) {
        Ok(joined) => joined.to_string(),
        Err(_) => data.to_string(),
    }
}

#[async_trait]
impl UpstreamTransport for SseTransport {
    async fn send_request(&self, method: &str, params: Option<Value>) -> TransportResult<Value> {
        let id = next_id(&self.next_id);
        let req = JsonRpcRequest::new(id, method, params);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let post_url = self.post_url.lock().await.clone().ok_or(TransportError::Closed)?;
        self.client
            .post(&post_url)
            .json(&req)
            .send()
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;

        let raw = tokio::time::timeout(REQUEST_TIMEOUT, rx)
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|_| TransportError::Closed)?;
        to_response(raw)
    }

    async fn send_notification(&self, method: &str, params: Option<Value>) -> TransportResult<()> {
        let notif = JsonRpcNotification::new(method, params);
        let post_url = self.post_url.lock().await.clone().ok_or(TransportError::Closed)?;
        self.client.post(&post_url).json(&notif).send().await.map_err(|e| TransportError::Io(e.to_string()))?;
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self._reader.abort();
    }
}
