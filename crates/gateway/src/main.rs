//! `mcproxy`: aggregates N downstream MCP servers behind one endpoint,
//! applying response compression, PII masking, and caching in between (§1).

mod aggregator;
mod api;
mod cache;
mod downstream;
mod logsink;
mod mask;
mod policy;
mod resolver;
mod retry;
mod router;
mod schema;
mod slot;
mod state;
mod supervisor;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::http::{HeaderValue, Method};
use clap::Parser;
use mcpx_domain::config::{Config, ConfigSeverity, DownstreamTransport, LogLevel};
use sha2::{Digest, Sha256};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use api::mcp::SseSessionRegistry;
use logsink::{LogSink, LogSinkLayer};
use state::AppState;
use supervisor::Supervisor;

const DEFAULT_CONFIG_PATH: &str = "./mcproxy.config.json";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3333;

const EXAMPLE_CONFIG: &str = include_str!("../mcproxy.example.config.json");

#[derive(Debug, Parser)]
#[command(name = "mcproxy", version, about = "An aggregating proxy for multiple MCP servers")]
struct Cli {
    /// Path to the proxy configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Write an example configuration to `--config` and exit.
    #[arg(long)]
    init: bool,
}

/// Honors `RUST_LOG` when set; otherwise derives the filter from the
/// configured `logLevel` (default `info`), matching §6's "env-filter style,
/// defaulting to info."
fn init_tracing(log_sink: Arc<LogSink>, level: LogLevel) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json())
        .with(LogSinkLayer::new(log_sink))
        .init();
}

fn write_example_config(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, EXAMPLE_CONFIG)
}

/// Grounded on the teacher's `build_cors_layer`: special-cases a literal
/// `"*"`, otherwise partitions configured origins into exact matches and
/// `:*`-suffixed wildcard-port prefixes (port digits validated to block
/// prefix-bypass).
fn build_cors_layer(allowed_origins: Option<&[String]>) -> CorsLayer {
    use axum::http::header;

    let origins = allowed_origins.unwrap_or(&[]);

    if origins.iter().any(|o| o == "*") {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    }

    let mut exact: Vec<HeaderValue> = Vec::new();
    let mut wildcard_prefixes: Vec<String> = Vec::new();

    for origin in origins {
        if let Some(prefix) = origin.strip_suffix('*') {
            wildcard_prefixes.push(prefix.to_string());
        } else if let Ok(hv) = origin.parse::<HeaderValue>() {
            exact.push(hv);
        } else {
            tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
        }
    }

    let allow_origin = if wildcard_prefixes.is_empty() {
        AllowOrigin::list(exact)
    } else {
        AllowOrigin::predicate(move |origin, _| {
            let origin_str = origin.to_str().unwrap_or("");
            if exact.iter().any(|e| e.as_bytes() == origin.as_bytes()) {
                return true;
            }
            wildcard_prefixes.iter().any(|prefix| {
                origin_str
                    .strip_prefix(prefix.as_str())
                    .map(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
                    .unwrap_or(false)
            })
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}

/// `ADMIN_TOKEN` takes precedence over `admin.token` when both are set.
fn admin_token_hash(config: &Config) -> Option<Vec<u8>> {
    let token = std::env::var("ADMIN_TOKEN").ok().filter(|t| !t.is_empty()).or_else(|| {
        config.admin.as_ref().and_then(|a| a.token.clone()).filter(|t| !t.is_empty())
    })?;
    Some(Sha256::digest(token.as_bytes()).to_vec())
}

async fn run_stdio(supervisor: Arc<Supervisor>) {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!(error = %e, "stdio read failed");
                break;
            }
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let Some(handler) = supervisor.handler() else {
            tracing::warn!("stdio request received before the proxy finished starting");
            continue;
        };
        let body: serde_json::Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "malformed stdio request, skipping");
                continue;
            }
        };

        if let Some(response) = api::mcp::handle_message(&handler, body).await {
            match serde_json::to_string(&response) {
                Ok(mut text) => {
                    text.push('\n');
                    if stdout.write_all(text.as_bytes()).await.is_err() || stdout.flush().await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::error!(error = %e, "failed to encode stdio response"),
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.init {
        write_example_config(&cli.config)?;
        println!("wrote example configuration to {}", cli.config.display());
        return Ok(());
    }

    run(cli.config).await
}

async fn run(config_path: PathBuf) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(&config_path).map_err(|e| anyhow::anyhow!("reading {}: {e}", config_path.display()))?;
    let config = Config::from_json_str(&raw).map_err(|e| anyhow::anyhow!("parsing {}: {e}", config_path.display()))?;

    let log_sink = Arc::new(LogSink::new());
    init_tracing(log_sink.clone(), config.log_level.unwrap_or_default());
    tracing::info!("mcproxy starting");

    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("{issue}"),
            ConfigSeverity::Error => tracing::error!("{issue}"),
        }
    }
    if issues.iter().any(|i| i.is_error()) {
        anyhow::bail!("config validation failed with {} error(s)", issues.iter().filter(|i| i.is_error()).count());
    }

    let admin_token_hash = admin_token_hash(&config);
    let downstream_transport = config.downstream.transport;
    let host = config.downstream.host.clone().unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = config.downstream.port.unwrap_or(DEFAULT_PORT);
    let cors_layer = build_cors_layer(config.downstream.allowed_origins.as_deref());

    let supervisor = Arc::new(Supervisor::new(log_sink.clone()));
    supervisor.start(config).await;

    let state = AppState {
        supervisor: supervisor.clone(),
        log_sink,
        config_path,
        admin_token_hash,
        sse_sessions: Arc::new(SseSessionRegistry::new()),
    };

    match downstream_transport {
        DownstreamTransport::Stdio => {
            run_stdio(supervisor.clone()).await;
            supervisor.stop().await;
            Ok(())
        }
        DownstreamTransport::Sse | DownstreamTransport::StreamableHttp => {
            let app = api::router().layer(cors_layer).with_state(state);
            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| anyhow::anyhow!("binding to {addr}: {e}"))?;
            tracing::info!(addr = %addr, "mcproxy listening");

            let shutdown_supervisor = supervisor.clone();
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = tokio::signal::ctrl_c().await;
                    tracing::info!("shutting down");
                    shutdown_supervisor.stop().await;
                })
                .await
                .map_err(|e| anyhow::anyhow!("server error: {e}"))?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_example_config_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("mcproxy.config.json");
        write_example_config(&path).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("\"upstreams\""));
    }

    #[test]
    fn admin_token_hash_prefers_env_over_config() {
        std::env::set_var("ADMIN_TOKEN", "env-secret");
        let mut config = Config::default();
        config.admin = Some(mcpx_domain::config::AdminConfig { token: Some("config-secret".to_string()) });
        let hash = admin_token_hash(&config).unwrap();
        assert_eq!(hash, Sha256::digest(b"env-secret").to_vec());
        std::env::remove_var("ADMIN_TOKEN");
    }

    #[test]
    fn admin_token_hash_falls_back_to_config() {
        std::env::remove_var("ADMIN_TOKEN");
        let mut config = Config::default();
        config.admin = Some(mcpx_domain::config::AdminConfig { token: Some("config-secret".to_string()) });
        let hash = admin_token_hash(&config).unwrap();
        assert_eq!(hash, Sha256::digest(b"config-secret").to_vec());
    }

    #[test]
    fn admin_token_hash_none_when_unset() {
        std::env::remove_var("ADMIN_TOKEN");
        let config = Config::default();
        assert!(admin_token_hash(&config).is_none());
    }

    #[test]
    fn cors_wildcard_port_prefix_requires_digits() {
        let origins = vec!["http://localhost:*".to_string()];
        let layer = build_cors_layer(Some(&origins));
        // Smoke test: building the layer doesn't panic on a wildcard-port entry.
        let _ = layer;
    }
}
