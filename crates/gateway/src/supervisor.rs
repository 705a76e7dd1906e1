//! Component L: owns the full object graph, wiring every other component
//! together and driving start/stop/reload (§4.L).

use std::sync::Arc;
use std::time::Duration;

use mcpx_compress::Compressor;
use mcpx_domain::config::Config;
use mcpx_upstream::UpstreamSession;
use parking_lot::RwLock;
use tokio::task::JoinHandle;

use crate::aggregator::Aggregator;
use crate::cache::Cache;
use crate::downstream::DownstreamHandler;
use crate::logsink::LogSink;
use crate::mask::Masker;
use crate::resolver::Resolver;
use crate::retry::RetryEscalation;
use crate::router::Router;
use crate::slot::Slot;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// The live object graph. Constructed once by [`Supervisor::start`] and torn
/// down by [`Supervisor::stop`]; `reload` replaces the pieces that are
/// config-derived without disturbing the downstream session/listener.
struct Graph {
    resolver: Arc<Slot<Resolver>>,
    compressor: Arc<Slot<Compressor>>,
    masker: Arc<Masker>,
    aggregator: Arc<Aggregator>,
    router: Arc<Router>,
    cache: Arc<Cache>,
    retry: Arc<RetryEscalation>,
    handler: Arc<DownstreamHandler>,
    sessions: Vec<Arc<UpstreamSession>>,
    cleanup_task: Option<JoinHandle<()>>,
}

pub struct Supervisor {
    log_sink: Arc<LogSink>,
    graph: RwLock<Option<Graph>>,
}

async fn build_sessions(config: &Config, aggregator: &Aggregator) -> Vec<Arc<UpstreamSession>> {
    let mut sessions = Vec::new();
    for spec in &config.upstreams {
        if !spec.enabled {
            continue;
        }
        let session = Arc::new(UpstreamSession::new(spec.clone()));
        aggregator.register_client(session.clone());
        sessions.push(session);
    }
    sessions
}

/// Connects every session concurrently; a failed connect is logged, not fatal.
async fn connect_all(sessions: &[Arc<UpstreamSession>]) {
    let connects = sessions.iter().map(|session| async move {
        if let Err(e) = session.connect().await {
            tracing::warn!(upstream = %session.id, error = %e, "upstream failed to connect");
        }
    });
    futures_util::future::join_all(connects).await;
}

/// Disconnects every session concurrently with all-settled semantics.
async fn disconnect_all(sessions: &[Arc<UpstreamSession>]) {
    let disconnects = sessions.iter().map(|session| async move {
        session.disconnect().await;
    });
    futures_util::future::join_all(disconnects).await;
}

impl Supervisor {
    pub fn new(log_sink: Arc<LogSink>) -> Self {
        Supervisor { log_sink, graph: RwLock::new(None) }
    }

    pub fn log_sink(&self) -> Arc<LogSink> {
        self.log_sink.clone()
    }

    /// §4.L `start()` steps 2-8 (step 1, logger init, is the caller's
    /// responsibility since it governs the whole process, not just this
    /// supervisor — see `main.rs`).
    pub async fn start(&self, config: Config) {
        let resolver = Arc::new(Slot::new(Resolver::new(config.clone())));
        let compressor = Arc::new(Slot::new(Compressor::new(&config.compression)));
        let masker = Arc::new(Masker::new());
        let aggregator = Arc::new(Aggregator::new(resolver.clone()));
        let cache = Arc::new(Cache::new(config.cache.max_entries));
        let retry_config = config.compression.retry_escalation.clone().unwrap_or_default();
        let retry = Arc::new(RetryEscalation::new(retry_config));

        let sessions = build_sessions(&config, &aggregator).await;

        let router = Arc::new(Router::new(aggregator.clone(), masker.clone(), resolver.clone()));
        let handler = Arc::new(DownstreamHandler::new(
            aggregator.clone(),
            router.clone(),
            compressor.clone(),
            cache.clone(),
            resolver.clone(),
            retry.clone(),
        ));

        connect_all(&sessions).await;
        aggregator.refresh().await;

        let cache_for_cleanup = cache.clone();
        let retry_for_cleanup = retry.clone();
        let cleanup_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
            loop {
                ticker.tick().await;
                cache_for_cleanup.cleanup();
                retry_for_cleanup.prune();
            }
        });

        *self.graph.write() = Some(Graph {
            resolver,
            compressor,
            masker,
            aggregator,
            router,
            cache,
            retry,
            handler,
            sessions,
            cleanup_task: Some(cleanup_task),
        });
    }

    pub fn handler(&self) -> Option<Arc<DownstreamHandler>> {
        self.graph.read().as_ref().map(|g| g.handler.clone())
    }

    pub fn resolver_slot(&self) -> Option<Arc<Slot<Resolver>>> {
        self.graph.read().as_ref().map(|g| g.resolver.clone())
    }

    pub fn aggregator(&self) -> Option<Arc<Aggregator>> {
        self.graph.read().as_ref().map(|g| g.aggregator.clone())
    }

    pub fn cache(&self) -> Option<Arc<Cache>> {
        self.graph.read().as_ref().map(|g| g.cache.clone())
    }

    pub fn masker(&self) -> Option<Arc<Masker>> {
        self.graph.read().as_ref().map(|g| g.masker.clone())
    }

    pub fn retry_escalation(&self) -> Option<Arc<RetryEscalation>> {
        self.graph.read().as_ref().map(|g| g.retry.clone())
    }

    pub fn sessions(&self) -> Vec<Arc<UpstreamSession>> {
        self.graph.read().as_ref().map(|g| g.sessions.clone()).unwrap_or_default()
    }

    pub fn is_running(&self) -> bool {
        self.graph.read().is_some()
    }

    /// §4.L `stop()` steps 1-4. Leaves the listener/HTTP shutdown to the
    /// caller (`main.rs`), which owns the `axum::serve` future.
    pub async fn stop(&self) {
        let graph = self.graph.write().take();
        if let Some(mut graph) = graph {
            if let Some(task) = graph.cleanup_task.take() {
                task.abort();
            }
            disconnect_all(&graph.sessions).await;
            graph.cache.clear();
        }
    }

    /// §4.L `reload()`: disconnects/unregisters old sessions, swaps the
    /// config-derived slots, updates the cache bound, builds and connects new
    /// sessions, refreshes the aggregator. The downstream handler/listener
    /// are never rebuilt, only their dependencies' `Arc` targets change.
    pub async fn reload(&self, new_config: Config) {
        let (old_sessions, aggregator, resolver, compressor, cache) = {
            let graph = self.graph.read();
            match graph.as_ref() {
                Some(g) => (g.sessions.clone(), g.aggregator.clone(), g.resolver.clone(), g.compressor.clone(), g.cache.clone()),
                None => {
                    tracing::warn!("reload() called before start()");
                    return;
                }
            }
        };

        disconnect_all(&old_sessions).await;
        for session in &old_sessions {
            aggregator.unregister_client(&session.id);
        }

        resolver.set(Resolver::new(new_config.clone()));
        compressor.set(Compressor::new(&new_config.compression));
        cache.update_config(new_config.cache.max_entries);

        let new_sessions = build_sessions(&new_config, &aggregator).await;
        connect_all(&new_sessions).await;
        aggregator.refresh().await;

        if let Some(graph) = self.graph.write().as_mut() {
            graph.sessions = new_sessions;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_with_no_upstreams_leaves_empty_catalog() {
        let supervisor = Supervisor::new(Arc::new(LogSink::new()));
        supervisor.start(Config::default()).await;
        let aggregator = supervisor.aggregator().unwrap();
        assert!(aggregator.list_tools().await.is_empty());
        supervisor.stop().await;
    }

    #[tokio::test]
    async fn stop_clears_graph() {
        let supervisor = Supervisor::new(Arc::new(LogSink::new()));
        supervisor.start(Config::default()).await;
        supervisor.stop().await;
        assert!(supervisor.handler().is_none());
    }
}
