//! Component K: MCP request handlers (`tools/list`, `tools/call`,
//! `resources/list`, `resources/read`, `prompts/list`, `prompts/get`) and the
//! busy `tools/call` cache/compress/restore pipeline (§4.K).

use std::sync::Arc;
use std::time::Duration;

use mcpx_compress::Compressor;
use mcpx_domain::Result;
use mcpx_upstream::protocol::{ToolCallContent, ToolCallResult};
use mcpx_upstream::session::{GetPromptResult, ReadResourceResult};
use serde_json::Value;

use crate::aggregator::Aggregator;
use crate::cache::{self, Cache};
use crate::mask;
use crate::resolver::Resolver;
use crate::retry::RetryEscalation;
use crate::router::Router;
use crate::schema::ExposedTool;
use crate::slot::Slot;

/// Cached payload: the tool result alongside the restoration map that was in
/// effect when it was produced, so a cache hit can still satisfy the
/// mask→restore round-trip invariant for *this* call without re-masking.
#[derive(serde::Serialize, serde::Deserialize)]
struct CachedCall {
    result: ToolCallResult,
    restoration_map: std::collections::HashMap<String, String>,
}

pub struct DownstreamHandler {
    aggregator: Arc<Aggregator>,
    router: Arc<Router>,
    compressor: Arc<Slot<Compressor>>,
    cache: Arc<Cache>,
    resolver: Arc<Slot<Resolver>>,
    retry: Arc<RetryEscalation>,
}

impl DownstreamHandler {
    pub fn new(
        aggregator: Arc<Aggregator>,
        router: Arc<Router>,
        compressor: Arc<Slot<Compressor>>,
        cache: Arc<Cache>,
        resolver: Arc<Slot<Resolver>>,
        retry: Arc<RetryEscalation>,
    ) -> Self {
        DownstreamHandler { aggregator, router, compressor, cache, resolver, retry }
    }

    pub async fn list_tools(&self) -> Vec<ExposedTool> {
        self.aggregator.list_tools().await
    }

    pub async fn list_resources(&self) -> Vec<crate::aggregator::AggregatedResource> {
        self.aggregator.list_resources().await
    }

    pub async fn list_prompts(&self) -> Vec<crate::aggregator::AggregatedPrompt> {
        self.aggregator.list_prompts().await
    }

    pub async fn read_resource(&self, namespaced_uri: &str) -> Result<ReadResourceResult> {
        let resolver = self.resolver.get();
        let policy = resolver.resolved_policy(namespaced_uri);
        let cache_key = cache::resource_cache_key(namespaced_uri);

        if policy.cache.enabled {
            if let Some((value, _is_error)) = self.cache.get(&cache_key) {
                if let Ok(cached) = serde_json::from_value::<ReadResourceResult>(value) {
                    return Ok(cached);
                }
            }
        }

        let result = self.router.read_resource(namespaced_uri).await?;
        let compressed = self.compressor.get().compress_resource_result(result, &policy.compression).await;

        if policy.cache.enabled {
            if let Ok(value) = serde_json::to_value(&compressed) {
                self.cache.set(cache_key, value, false, Duration::from_secs(policy.cache.ttl_seconds));
            }
        }

        Ok(compressed)
    }

    pub async fn get_prompt(&self, namespaced_name: &str, args: Option<Value>) -> Result<GetPromptResult> {
        self.router.get_prompt(namespaced_name, args).await
    }

    /// The busy path: §4.K steps 1-7.
    pub async fn call_tool(&self, namespaced_name: &str, args: Value) -> Result<ToolCallResult> {
        let resolver = self.resolver.get();
        let policy = resolver.resolved_policy(namespaced_name);

        let goal_field = resolver.goal_field_name();
        let bypass_field = resolver.bypass_field_name();
        let mut cache_probe_args = args.clone();
        let mut goal = None;
        let mut bypass = false;
        if let Some(obj) = cache_probe_args.as_object_mut() {
            if let Some(Value::String(g)) = obj.remove(&goal_field) {
                goal = Some(g);
            }
            if let Some(Value::Bool(b)) = obj.remove(&bypass_field) {
                bypass = b;
            }
        }

        let cache_key = cache::tool_cache_key(namespaced_name, &cache_probe_args, goal.as_deref());

        // Step 1: cache lookup.
        if !bypass && policy.cache.enabled {
            if let Some((value, _is_error)) = self.cache.get(&cache_key) {
                if let Ok(cached) = serde_json::from_value::<CachedCall>(value) {
                    return Ok(restore_result(cached.result, &cached.restoration_map));
                }
            }
        }

        // Step 2: dispatch via the router.
        let routed = self.router.call_tool(namespaced_name, args).await?;

        // Step 3: bypass skips compression and caching entirely.
        if routed.bypass {
            return Ok(restore_result(routed.result, routed.restoration_map.as_ref().unwrap_or(&Default::default())));
        }

        // Step 4: compress, with the retry-escalation multiplier if enabled.
        let multiplier = self.retry.record_and_multiplier(namespaced_name);
        let compressed = self
            .compressor
            .get()
            .compress_tool_result(routed.result, routed.goal.as_deref(), multiplier, &policy.compression)
            .await;

        // Step 5-6: cache unless it's an error the policy says not to cache.
        let should_cache = !(compressed.is_error && !policy.cache.cache_errors);
        let restoration_map = routed.restoration_map.unwrap_or_default();
        if should_cache {
            let cached = CachedCall { result: compressed.clone(), restoration_map: restoration_map.clone() };
            if let Ok(value) = serde_json::to_value(&cached) {
                self.cache.set(cache_key, value, compressed.is_error, Duration::from_secs(policy.cache.ttl_seconds));
            }
        }

        // Step 7: restore the client's own PII into the text it receives back.
        Ok(restore_result(compressed, &restoration_map))
    }
}

fn restore_result(mut result: ToolCallResult, restoration_map: &std::collections::HashMap<String, String>) -> ToolCallResult {
    if restoration_map.is_empty() {
        return result;
    }
    for content in &mut result.content {
        if let Some(text) = &content.text {
            content.text = Some(mask::restore(text, restoration_map));
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::Masker;
    use mcpx_domain::config::{CompressionEndpointConfig, Config};

    fn handler() -> DownstreamHandler {
        let resolver = Arc::new(Slot::new(Resolver::new(Config::default())));
        let aggregator = Arc::new(Aggregator::new(resolver.clone()));
        let masker = Arc::new(Masker::new());
        let router = Arc::new(Router::new(aggregator.clone(), masker, resolver.clone()));
        let compressor = Arc::new(Slot::new(Compressor::new(&CompressionEndpointConfig::default())));
        let cache = Arc::new(Cache::new(100));
        let retry = Arc::new(RetryEscalation::new(Default::default()));
        DownstreamHandler::new(aggregator, router, compressor, cache, resolver, retry)
    }

    #[tokio::test]
    async fn unknown_tool_fails() {
        let h = handler();
        let result = h.call_tool("ghost__tool", serde_json::json!({})).await;
        assert!(result.is_err());
    }

    #[test]
    fn restore_is_a_no_op_with_empty_map() {
        let result = ToolCallResult { content: vec![ToolCallContent::text("hello".into())], is_error: false };
        let restored = restore_result(result.clone(), &Default::default());
        assert_eq!(restored.content[0].text.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn read_resource_serves_from_cache_without_hitting_the_router() {
        let h = handler();
        let uri = "fs__missing";
        let cached = ReadResourceResult {
            contents: vec![mcpx_upstream::session::ReadResourceContent {
                uri: Some(uri.into()),
                mime_type: Some("text/plain".into()),
                text: Some("cached body".into()),
                blob: None,
            }],
        };
        let key = cache::resource_cache_key(uri);
        h.cache.set(key, serde_json::to_value(&cached).unwrap(), false, Duration::from_secs(60));

        // No upstream session is registered, so a cache miss would surface
        // as `NotFound` from the aggregator; a hit must short-circuit before that.
        let result = h.read_resource(uri).await.unwrap();
        assert_eq!(result.contents[0].text.as_deref(), Some("cached body"));
    }

    #[tokio::test]
    async fn read_resource_unknown_uri_without_cache_fails() {
        let h = handler();
        let result = h.read_resource("fs__missing").await;
        assert!(result.is_err());
    }
}
