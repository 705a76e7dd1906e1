//! Component J: `callTool`/`readResource`/`getPrompt` dispatch — virtual
//! field stripping, masking, parameter overrides, then the upstream call
//! (§4.J).

use std::collections::HashMap;
use std::sync::Arc;

use mcpx_domain::Result;
use mcpx_upstream::protocol::ToolCallResult;
use mcpx_upstream::session::GetPromptResult;
use serde_json::Value;

use crate::aggregator::Aggregator;
use crate::mask::Masker;
use crate::resolver::Resolver;
use crate::slot::Slot;

/// What the downstream handler needs from a routed `callTool`: the upstream
/// result plus the bits the busy `tools/call` pipeline (§4.K) consumes.
pub struct RoutedCall {
    pub result: ToolCallResult,
    pub goal: Option<String>,
    pub bypass: bool,
    pub restoration_map: Option<HashMap<String, String>>,
}

pub struct Router {
    aggregator: Arc<Aggregator>,
    masker: Arc<Masker>,
    resolver: Arc<Slot<Resolver>>,
}

impl Router {
    pub fn new(aggregator: Arc<Aggregator>, masker: Arc<Masker>, resolver: Arc<Slot<Resolver>>) -> Self {
        Router { aggregator, masker, resolver }
    }

    pub async fn call_tool(&self, namespaced_name: &str, mut args: Value) -> Result<RoutedCall> {
        let (session, original_name) = self
            .aggregator
            .find_tool(namespaced_name)
            .await
            .ok_or_else(|| mcpx_domain::Error::NotFound(namespaced_name.to_string()))?;

        let resolver = self.resolver.get();
        let goal_field = resolver.goal_field_name();
        let bypass_field = resolver.bypass_field_name();

        let mut goal = None;
        let mut bypass = false;
        if let Some(obj) = args.as_object_mut() {
            if let Some(Value::String(g)) = obj.remove(&goal_field) {
                goal = Some(g);
            }
            if let Some(Value::Bool(b)) = obj.remove(&bypass_field) {
                bypass = b;
            }
        }

        let policy = resolver.resolved_policy(namespaced_name);

        let restoration_map = if policy.masking.enabled {
            let llm_config = resolver.config().masking.as_ref().and_then(|m| m.llm_config.as_ref());
            let artifact = self.masker.mask(&args, &policy.masking, llm_config).await;
            args = artifact.transformed;
            Some(artifact.restoration_map)
        } else {
            None
        };

        for (key, value) in resolver.parameter_overrides(namespaced_name) {
            if let Some(obj) = args.as_object_mut() {
                obj.insert(key, value);
            }
        }

        let result = session
            .call_tool(&original_name, args)
            .await
            .map_err(|e| mcpx_domain::Error::UpstreamCallFailed { upstream: session.id.clone(), message: e.to_string() })?;

        Ok(RoutedCall { result, goal, bypass, restoration_map })
    }

    pub async fn read_resource(&self, namespaced_uri: &str) -> Result<mcpx_upstream::session::ReadResourceResult> {
        self.aggregator.read_resource(namespaced_uri).await
    }

    pub async fn get_prompt(&self, namespaced_name: &str, args: Option<Value>) -> Result<GetPromptResult> {
        self.aggregator.get_prompt(namespaced_name, args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpx_domain::config::Config;

    #[tokio::test]
    async fn unknown_tool_fails() {
        let resolver = Arc::new(Slot::new(Resolver::new(Config::default())));
        let aggregator = Arc::new(Aggregator::new(resolver.clone()));
        let router = Router::new(aggregator, Arc::new(Masker::new()), resolver);
        let result = router.call_tool("ghost__tool", serde_json::json!({})).await;
        assert!(result.is_err());
    }
}
