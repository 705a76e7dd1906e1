//! Component F: the namespaced catalog over every connected upstream.
//! Holds the session registry and three lazily (re)computed lists, replaced
//! atomically as one unit on `refresh()` (§4.F).

use std::collections::HashMap;
use std::sync::Arc;

use mcpx_upstream::session::{GetPromptResult, ReadResourceResult};
use mcpx_upstream::{SessionState, UpstreamSession};
use parking_lot::RwLock;

use crate::resolver::Resolver;
use crate::schema::{transform_tool, ExposedTool};
use crate::slot::Slot;

#[derive(Debug, Clone)]
pub struct AggregatedTool {
    pub namespaced_name: String,
    pub original_name: String,
    pub upstream_id: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct AggregatedResource {
    pub namespaced_uri: String,
    pub original_uri: String,
    pub upstream_id: String,
    pub name: String,
    pub description: Option<String>,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AggregatedPrompt {
    pub namespaced_name: String,
    pub original_name: String,
    pub upstream_id: String,
    pub description: Option<String>,
    pub arguments: Vec<serde_json::Value>,
}

#[derive(Default, Clone)]
struct Catalog {
    tools: Vec<AggregatedTool>,
    resources: Vec<AggregatedResource>,
    prompts: Vec<AggregatedPrompt>,
}

pub struct Aggregator {
    sessions: RwLock<HashMap<String, Arc<UpstreamSession>>>,
    resolver: Arc<Slot<Resolver>>,
    catalog: RwLock<Option<Catalog>>,
}

pub fn namespace_tool(upstream_id: &str, original_name: &str) -> String {
    format!("{upstream_id}__{original_name}")
}

pub fn namespace_resource(upstream_id: &str, original_uri: &str) -> String {
    format!("{upstream_id}://{original_uri}")
}

impl Aggregator {
    pub fn new(resolver: Arc<Slot<Resolver>>) -> Self {
        Aggregator { sessions: RwLock::new(HashMap::new()), resolver, catalog: RwLock::new(None) }
    }

    pub fn register_client(&self, session: Arc<UpstreamSession>) {
        self.sessions.write().insert(session.id.clone(), session);
        self.invalidate();
    }

    pub fn unregister_client(&self, upstream_id: &str) {
        self.sessions.write().remove(upstream_id);
        self.invalidate();
    }

    pub fn invalidate(&self) {
        *self.catalog.write() = None;
    }

    fn is_valid(&self) -> bool {
        self.catalog.read().is_some()
    }

    /// Fans out `listTools`/`listResources`/`listPrompts` across every
    /// *connected* session concurrently; a session whose list call fails
    /// contributes an empty slice rather than failing the whole refresh.
    pub async fn refresh(&self) {
        let sessions: Vec<Arc<UpstreamSession>> = self.sessions.read().values().cloned().collect();

        let fetches = sessions.into_iter().map(|session| async move {
            if session.state().await != SessionState::Connected {
                tracing::warn!(upstream = %session.id, "skipping disconnected session during refresh");
                return (session.id.clone(), Vec::new(), Vec::new(), Vec::new());
            }
            let (tools, resources, prompts) = tokio::join!(session.list_tools(), session.list_resources(), session.list_prompts());
            let tools = tools.unwrap_or_else(|e| {
                tracing::warn!(upstream = %session.id, error = %e, "listTools failed");
                Vec::new()
            });
            let resources = resources.unwrap_or_else(|e| {
                tracing::warn!(upstream = %session.id, error = %e, "listResources failed");
                Vec::new()
            });
            let prompts = prompts.unwrap_or_else(|e| {
                tracing::warn!(upstream = %session.id, error = %e, "listPrompts failed");
                Vec::new()
            });
            (session.id.clone(), tools, resources, prompts)
        });

        let results = futures_util::future::join_all(fetches).await;

        let mut catalog = Catalog::default();
        for (upstream_id, tools, resources, prompts) in results {
            for t in tools {
                catalog.tools.push(AggregatedTool {
                    namespaced_name: namespace_tool(&upstream_id, &t.name),
                    original_name: t.name,
                    upstream_id: upstream_id.clone(),
                    description: t.description,
                    input_schema: t.input_schema,
                });
            }
            for r in resources {
                catalog.resources.push(AggregatedResource {
                    namespaced_uri: namespace_resource(&upstream_id, &r.uri),
                    original_uri: r.uri,
                    upstream_id: upstream_id.clone(),
                    name: r.name,
                    description: r.description,
                    mime_type: r.mime_type,
                });
            }
            for p in prompts {
                catalog.prompts.push(AggregatedPrompt {
                    namespaced_name: namespace_tool(&upstream_id, &p.name),
                    original_name: p.name,
                    upstream_id: upstream_id.clone(),
                    description: p.description,
                    arguments: p.arguments,
                });
            }
        }

        *self.catalog.write() = Some(catalog);
    }

    async fn ensure_fresh(&self) {
        if !self.is_valid() {
            self.refresh().await;
        }
    }

    pub async fn list_tools(&self) -> Vec<ExposedTool> {
        self.ensure_fresh().await;
        let resolver = self.resolver.get();
        let tools = self.catalog.read().clone().unwrap_or_default().tools;
        tools
            .iter()
            .filter(|t| !resolver.resolved_policy(&t.namespaced_name).hidden)
            .map(|t| transform_tool(t, &resolver))
            .collect()
    }

    pub async fn list_resources(&self) -> Vec<AggregatedResource> {
        self.ensure_fresh().await;
        self.catalog.read().clone().unwrap_or_default().resources
    }

    pub async fn list_prompts(&self) -> Vec<AggregatedPrompt> {
        self.ensure_fresh().await;
        self.catalog.read().clone().unwrap_or_default().prompts
    }

    fn session_for(&self, upstream_id: &str) -> Option<Arc<UpstreamSession>> {
        self.sessions.read().get(upstream_id).cloned()
    }

    pub async fn find_tool(&self, namespaced_name: &str) -> Option<(Arc<UpstreamSession>, String)> {
        self.ensure_fresh().await;
        let tool = self.catalog.read().clone()?.tools.into_iter().find(|t| t.namespaced_name == namespaced_name)?;
        let session = self.session_for(&tool.upstream_id)?;
        Some((session, tool.original_name))
    }

    pub async fn find_resource(&self, namespaced_uri: &str) -> Option<(Arc<UpstreamSession>, String)> {
        self.ensure_fresh().await;
        let resource = self.catalog.read().clone()?.resources.into_iter().find(|r| r.namespaced_uri == namespaced_uri)?;
        let session = self.session_for(&resource.upstream_id)?;
        Some((session, resource.original_uri))
    }

    pub async fn find_prompt(&self, namespaced_name: &str) -> Option<(Arc<UpstreamSession>, String)> {
        self.ensure_fresh().await;
        let prompt = self.catalog.read().clone()?.prompts.into_iter().find(|p| p.namespaced_name == namespaced_name)?;
        let session = self.session_for(&prompt.upstream_id)?;
        Some((session, prompt.original_name))
    }

    pub async fn get_upstream_counts(&self, upstream_id: &str) -> (usize, usize, usize) {
        self.ensure_fresh().await;
        let catalog = self.catalog.read().clone().unwrap_or_default();
        (
            catalog.tools.iter().filter(|t| t.upstream_id == upstream_id).count(),
            catalog.resources.iter().filter(|r| r.upstream_id == upstream_id).count(),
            catalog.prompts.iter().filter(|p| p.upstream_id == upstream_id).count(),
        )
    }

    pub async fn get_upstream_details(&self, upstream_id: &str) -> (Vec<AggregatedTool>, Vec<AggregatedResource>, Vec<AggregatedPrompt>) {
        self.ensure_fresh().await;
        let catalog = self.catalog.read().clone().unwrap_or_default();
        (
            catalog.tools.into_iter().filter(|t| t.upstream_id == upstream_id).collect(),
            catalog.resources.into_iter().filter(|r| r.upstream_id == upstream_id).collect(),
            catalog.prompts.into_iter().filter(|p| p.upstream_id == upstream_id).collect(),
        )
    }

    pub async fn read_resource(&self, namespaced_uri: &str) -> mcpx_domain::Result<ReadResourceResult> {
        let (session, original) = self.find_resource(namespaced_uri).await.ok_or_else(|| mcpx_domain::Error::NotFound(namespaced_uri.to_string()))?;
        session.read_resource(&original).await.map_err(|e| mcpx_domain::Error::UpstreamCallFailed { upstream: session.id.clone(), message: e.to_string() })
    }

    pub async fn get_prompt(&self, namespaced_name: &str, args: Option<serde_json::Value>) -> mcpx_domain::Result<GetPromptResult> {
        let (session, original) = self.find_prompt(namespaced_name).await.ok_or_else(|| mcpx_domain::Error::NotFound(namespaced_name.to_string()))?;
        session.get_prompt(&original, args).await.map_err(|e| mcpx_domain::Error::UpstreamCallFailed { upstream: session.id.clone(), message: e.to_string() })
    }

    pub fn upstream_ids(&self) -> Vec<String> {
        self.sessions.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpx_domain::config::Config;

    #[tokio::test]
    async fn empty_aggregator_lists_nothing() {
        let resolver = Arc::new(Slot::new(Resolver::new(Config::default())));
        let aggregator = Aggregator::new(resolver);
        assert!(aggregator.list_tools().await.is_empty());
        assert!(aggregator.list_resources().await.is_empty());
        assert!(aggregator.list_prompts().await.is_empty());
    }

    #[tokio::test]
    async fn find_tool_on_unregistered_upstream_is_none() {
        let resolver = Arc::new(Slot::new(Resolver::new(Config::default())));
        let aggregator = Aggregator::new(resolver);
        assert!(aggregator.find_tool("ghost__read").await.is_none());
    }

    #[test]
    fn namespacing_round_trips() {
        let n = namespace_tool("fs", "read");
        assert_eq!(n, "fs__read");
        assert_eq!(n.split_once("__"), Some(("fs", "read")));

        let r = namespace_resource("fs", "file:///a");
        assert_eq!(r, "fs://file:///a");
    }

    #[test]
    fn register_and_unregister_invalidate_catalog() {
        let resolver = Arc::new(Slot::new(Resolver::new(Config::default())));
        let aggregator = Aggregator::new(resolver);
        *aggregator.catalog.write() = Some(Catalog::default());
        assert!(aggregator.is_valid());
        aggregator.unregister_client("nonexistent");
        assert!(!aggregator.is_valid());
    }
}
