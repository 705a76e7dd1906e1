use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::policy::PolicyDefaults;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    Stdio,
    Sse,
    StreamableHttp,
}

impl Default for TransportKind {
    fn default() -> Self {
        TransportKind::Stdio
    }
}

/// Immutable record describing one upstream MCP server. See §3 of the spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamSpec {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub transport: TransportKind,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Keyed by *original* (un-namespaced) tool name.
    #[serde(default)]
    pub tools: HashMap<String, ToolConfig>,
    #[serde(default)]
    pub defaults: Option<PolicyDefaults>,
}

fn default_true() -> bool {
    true
}

/// Per-tool overrides layered on top of upstream and global defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolConfig {
    #[serde(default)]
    pub hidden: Option<bool>,
    #[serde(default)]
    pub compression: Option<super::policy::CompressionPolicyOverride>,
    #[serde(default)]
    pub masking: Option<super::policy::MaskingPolicyOverride>,
    #[serde(default)]
    pub cache: Option<super::policy::CachePolicyOverride>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub hide_parameters: Vec<String>,
    #[serde(default)]
    pub parameter_overrides: HashMap<String, serde_json::Value>,
    /// Legacy (version <= 1) field, migrated into `cache` at load time.
    #[serde(default, skip_serializing)]
    pub cache_ttl: Option<i64>,
}
