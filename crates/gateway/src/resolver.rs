//! Wraps a [`Config`] snapshot with the accessor surface the aggregator,
//! schema transformer, and router need beyond the three resolved policies
//! (§4.D): description overrides, hidden-parameter sets, parameter override
//! maps, and the goal-aware/bypass virtual-parameter prefix.
//!
//! One instance is frozen per config load/reload; the supervisor swaps the
//! `Arc` held by dependent components rather than mutating this struct in
//! place (§9 "Hot reload without cyclic references").

use std::collections::HashMap;

use mcpx_domain::config::{Config, ResolvedPolicy};
use serde_json::Value;

use crate::policy::{find_tool_config, resolved_policy};

/// Fixed vendor tag for injected virtual parameters (`_mcp_goal`, `_mcp_bypass`).
/// Chosen once for the whole deployment, not user-configurable (§4.G, §9).
pub const VIRTUAL_PARAM_PREFIX: &str = "mcp";

pub struct Resolver {
    config: Config,
}

impl Resolver {
    pub fn new(config: Config) -> Self {
        Resolver { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn resolved_policy(&self, namespaced_tool_name: &str) -> ResolvedPolicy {
        resolved_policy(&self.config, namespaced_tool_name)
    }

    pub fn description_override(&self, namespaced_tool_name: &str) -> Option<String> {
        find_tool_config(&self.config, namespaced_tool_name)?.description.clone()
    }

    pub fn hidden_parameters(&self, namespaced_tool_name: &str) -> Vec<String> {
        find_tool_config(&self.config, namespaced_tool_name).map(|t| t.hide_parameters.clone()).unwrap_or_default()
    }

    pub fn parameter_overrides(&self, namespaced_tool_name: &str) -> HashMap<String, Value> {
        find_tool_config(&self.config, namespaced_tool_name).map(|t| t.parameter_overrides.clone()).unwrap_or_default()
    }

    pub fn goal_field_name(&self) -> String {
        format!("_{VIRTUAL_PARAM_PREFIX}_goal")
    }

    pub fn bypass_field_name(&self) -> String {
        format!("_{VIRTUAL_PARAM_PREFIX}_bypass")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpx_domain::config::{TransportKind, ToolConfig, UpstreamSpec};
    use std::collections::HashMap as Map;

    fn config_with_tool(tool: ToolConfig) -> Config {
        let upstream = UpstreamSpec {
            id: "fs".into(),
            name: None,
            transport: TransportKind::Stdio,
            command: Some("echo".into()),
            args: vec![],
            env: Map::new(),
            url: None,
            enabled: true,
            tools: [("read".to_string(), tool)].into_iter().collect(),
            defaults: None,
        };
        Config { upstreams: vec![upstream], ..Default::default() }
    }

    #[test]
    fn description_override_reads_tool_config() {
        let config = config_with_tool(ToolConfig { description: Some("Greet.".into()), ..Default::default() });
        let resolver = Resolver::new(config);
        assert_eq!(resolver.description_override("fs__read").as_deref(), Some("Greet."));
    }

    #[test]
    fn hidden_parameters_default_empty() {
        let config = config_with_tool(ToolConfig::default());
        let resolver = Resolver::new(config);
        assert!(resolver.hidden_parameters("fs__read").is_empty());
        assert!(resolver.hidden_parameters("ghost__nope").is_empty());
    }

    #[test]
    fn virtual_field_names_use_fixed_prefix() {
        let resolver = Resolver::new(Config::default());
        assert_eq!(resolver.goal_field_name(), "_mcp_goal");
        assert_eq!(resolver.bypass_field_name(), "_mcp_bypass");
    }
}
