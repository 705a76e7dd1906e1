pub mod policy;
pub mod upstream;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

pub use policy::{
    CachePolicyOverride, CompressionPolicyOverride, MaskingPolicyOverride, PolicyDefaults,
    ResolvedCachePolicy, ResolvedCompressionPolicy, ResolvedMaskingPolicy, ResolvedPolicy,
};
pub use upstream::{ToolConfig, TransportKind, UpstreamSpec};

pub const CURRENT_CONFIG_VERSION: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DownstreamTransport {
    Stdio,
    Sse,
    StreamableHttp,
}

impl Default for DownstreamTransport {
    fn default() -> Self {
        DownstreamTransport::StreamableHttp
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownstreamConfig {
    #[serde(default)]
    pub transport: DownstreamTransport,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub allowed_origins: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryEscalationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    #[serde(default = "default_token_multiplier")]
    pub token_multiplier: f64,
}

fn default_window_seconds() -> u64 {
    60
}

fn default_token_multiplier() -> f64 {
    0.5
}

impl Default for RetryEscalationConfig {
    fn default() -> Self {
        RetryEscalationConfig {
            enabled: false,
            window_seconds: default_window_seconds(),
            token_multiplier: default_token_multiplier(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionEndpointConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub bypass_enabled: Option<bool>,
    #[serde(default)]
    pub retry_escalation: Option<RetryEscalationConfig>,
}

impl Default for CompressionEndpointConfig {
    fn default() -> Self {
        CompressionEndpointConfig {
            base_url: String::new(),
            api_key: None,
            model: String::new(),
            bypass_enabled: Some(true),
            retry_escalation: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    #[serde(default)]
    pub cache_errors: Option<bool>,
}

fn default_max_entries() -> usize {
    1000
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            max_entries: default_max_entries(),
            cache_errors: Some(false),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaskingLlmConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub model: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaskingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub llm_config: Option<MaskingLlmConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminConfig {
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub downstream: DownstreamConfig,
    pub upstreams: Vec<UpstreamSpec>,
    #[serde(default)]
    pub defaults: PolicyDefaults,
    #[serde(default)]
    pub compression: CompressionEndpointConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub masking: Option<MaskingConfig>,
    #[serde(default)]
    pub log_level: Option<LogLevel>,
    #[serde(default)]
    pub admin: Option<AdminConfig>,
}

fn default_version() -> u32 {
    CURRENT_CONFIG_VERSION
}

impl Default for Config {
    fn default() -> Self {
        Config {
            version: CURRENT_CONFIG_VERSION,
            downstream: DownstreamConfig::default(),
            upstreams: Vec::new(),
            defaults: PolicyDefaults::default(),
            compression: CompressionEndpointConfig::default(),
            cache: CacheConfig::default(),
            masking: None,
            log_level: None,
            admin: None,
        }
    }
}

impl Config {
    /// Parses a JSON document and applies the version <= 1 migration (§6) in
    /// place, so every other component only ever sees a version-2 shape.
    ///
    /// Legacy fields live at their natural v1 positions (inline under the
    /// real `compression`/`cache` objects), not in any dedicated v1-only
    /// shape, and the v2 `CompressionEndpointConfig`/`CacheConfig` structs
    /// have no fields to receive them — they'd be silently dropped as
    /// unknown fields by a plain typed deserialize. So the raw JSON is kept
    /// alongside the typed parse purely to recover those positions.
    pub fn from_json_str(raw: &str) -> crate::Result<Config> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        let mut cfg: Config = serde_json::from_value(value.clone())?;
        cfg.migrate_legacy(&value);
        Ok(cfg)
    }

    fn migrate_legacy(&mut self, raw: &serde_json::Value) {
        if self.version > 1 {
            return;
        }
        if let Some(compression) = raw.get("compression") {
            if let Some(default_policy) = compression.get("defaultPolicy") {
                if let Ok(over) = serde_json::from_value::<CompressionPolicyOverride>(default_policy.clone()) {
                    self.defaults.compression = Some(over);
                }
            }
            if let Some(goal_aware) = compression.get("goalAware").and_then(|v| v.as_bool()) {
                self.defaults
                    .compression
                    .get_or_insert_with(Default::default)
                    .goal_aware = Some(goal_aware);
            }
        }
        if let Some(cache) = raw.get("cache") {
            let enabled = cache.get("enabled").and_then(|v| v.as_bool());
            let ttl_seconds = cache.get("ttlSeconds").and_then(|v| v.as_u64());
            if enabled.is_some() || ttl_seconds.is_some() {
                self.defaults.cache = Some(CachePolicyOverride {
                    enabled,
                    ttl_seconds,
                    ..Default::default()
                });
            }
        }
        for upstream in &mut self.upstreams {
            for tool in upstream.tools.values_mut() {
                if let Some(ttl) = tool.cache_ttl.take() {
                    tool.cache = Some(if ttl <= 0 {
                        CachePolicyOverride {
                            enabled: Some(false),
                            ..Default::default()
                        }
                    } else {
                        CachePolicyOverride {
                            ttl_seconds: Some(ttl as u64),
                            ..Default::default()
                        }
                    });
                }
            }
        }
        self.version = CURRENT_CONFIG_VERSION;
    }

    /// Validates the configuration record (§7 ambient). Returns every issue
    /// found; callers decide whether any `Error`-severity issue is fatal.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.upstreams.is_empty() {
            issues.push(ConfigIssue::error("upstreams", "at least one upstream must be configured"));
        }

        let mut seen_ids = HashSet::new();
        for (i, upstream) in self.upstreams.iter().enumerate() {
            let field = format!("upstreams[{i}]");
            if upstream.id.is_empty() {
                issues.push(ConfigIssue::error(&format!("{field}.id"), "upstream id must not be empty"));
            } else if upstream.id.contains("__") {
                issues.push(ConfigIssue::error(
                    &format!("{field}.id"),
                    "upstream id must not contain '__' (reserved as the namespace separator)",
                ));
            } else if !seen_ids.insert(upstream.id.clone()) {
                issues.push(ConfigIssue::error(&field, &format!("duplicate upstream id '{}'", upstream.id)));
            }

            match upstream.transport {
                TransportKind::Stdio => {
                    if upstream.command.as_deref().unwrap_or("").is_empty() {
                        issues.push(ConfigIssue::error(
                            &format!("{field}.command"),
                            "stdio upstream requires a non-empty command",
                        ));
                    }
                }
                TransportKind::Sse | TransportKind::StreamableHttp => {
                    if upstream.url.as_deref().unwrap_or("").is_empty() {
                        issues.push(ConfigIssue::error(
                            &format!("{field}.url"),
                            "http/sse upstream requires a non-empty url",
                        ));
                    }
                }
            }

            for (tool_name, tool) in &upstream.tools {
                let tool_field = format!("{field}.tools.{tool_name}");
                for hidden in &tool.hide_parameters {
                    if !tool.parameter_overrides.contains_key(hidden) {
                        issues.push(ConfigIssue::error(
                            &format!("{tool_field}.hideParameters"),
                            &format!(
                                "parameter '{hidden}' is hidden but has no entry in parameterOverrides"
                            ),
                        ));
                    }
                }
                if let Some(masking) = &tool.masking {
                    if let Some(custom) = &masking.custom_patterns {
                        for c in custom {
                            if let Err(e) = regex::Regex::new(&c.pattern) {
                                issues.push(ConfigIssue::error(
                                    &format!("{tool_field}.masking.customPatterns"),
                                    &format!("invalid regex '{}': {e}", c.pattern),
                                ));
                            }
                        }
                    }
                }
            }
        }

        if self.cache.max_entries == 0 {
            issues.push(ConfigIssue::error("cache.maxEntries", "must be greater than zero"));
        }

        let compression_used = self.defaults.compression.as_ref().map(|c| c.enabled).unwrap_or(Some(true))
            != Some(false)
            || self
                .upstreams
                .iter()
                .any(|u| u.tools.values().any(|t| t.compression.as_ref().and_then(|c| c.enabled).unwrap_or(false)));
        if compression_used {
            if self.compression.base_url.is_empty() {
                issues.push(ConfigIssue::warning(
                    "compression.baseUrl",
                    "empty; compression calls will fail until set",
                ));
            }
            if self.compression.model.is_empty() {
                issues.push(ConfigIssue::warning(
                    "compression.model",
                    "empty; compression calls will fail until set",
                ));
            }
        }

        if let Some(masking) = &self.masking {
            if masking.enabled {
                if let Some(llm) = &masking.llm_config {
                    if llm.base_url.is_empty() || llm.model.is_empty() {
                        issues.push(ConfigIssue::warning(
                            "masking.llmConfig",
                            "llm fallback configured with an incomplete endpoint",
                        ));
                    }
                }
            }
        }

        issues
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl ConfigIssue {
    pub fn error(field: &str, message: &str) -> Self {
        ConfigIssue {
            severity: ConfigSeverity::Error,
            field: field.to_string(),
            message: message.to_string(),
        }
    }

    pub fn warning(field: &str, message: &str) -> Self {
        ConfigIssue {
            severity: ConfigSeverity::Warning,
            field: field.to_string(),
            message: message.to_string(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == ConfigSeverity::Error
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            upstreams: vec![UpstreamSpec {
                id: "us".into(),
                name: None,
                transport: TransportKind::Stdio,
                command: Some("echo".into()),
                args: vec![],
                env: Default::default(),
                url: None,
                enabled: true,
                tools: Default::default(),
                defaults: None,
            }],
            compression: CompressionEndpointConfig {
                base_url: "https://api.example.com".into(),
                model: "gpt-4o-mini".into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn find_issue<'a>(issues: &'a [ConfigIssue], field_substr: &str) -> Option<&'a ConfigIssue> {
        issues.iter().find(|i| i.field.contains(field_substr))
    }

    #[test]
    fn valid_config_has_no_errors() {
        let issues = valid_config().validate();
        assert!(issues.iter().all(|i| !i.is_error()), "{issues:?}");
    }

    #[test]
    fn empty_upstreams_is_error() {
        let mut cfg = valid_config();
        cfg.upstreams.clear();
        let issues = cfg.validate();
        let issue = find_issue(&issues, "upstreams").expect("expected an issue");
        assert!(issue.is_error());
    }

    #[test]
    fn duplicate_upstream_id_is_error() {
        let mut cfg = valid_config();
        let dup = cfg.upstreams[0].clone();
        cfg.upstreams.push(dup);
        let issues = cfg.validate();
        assert!(find_issue(&issues, "upstreams[1]").unwrap().is_error());
    }

    #[test]
    fn stdio_without_command_is_error() {
        let mut cfg = valid_config();
        cfg.upstreams[0].command = None;
        let issues = cfg.validate();
        assert!(find_issue(&issues, "command").unwrap().is_error());
    }

    #[test]
    fn sse_without_url_is_error() {
        let mut cfg = valid_config();
        cfg.upstreams[0].transport = TransportKind::Sse;
        cfg.upstreams[0].command = None;
        let issues = cfg.validate();
        assert!(find_issue(&issues, "url").unwrap().is_error());
    }

    #[test]
    fn hidden_parameter_without_override_is_error() {
        let mut cfg = valid_config();
        cfg.upstreams[0].tools.insert(
            "hello".into(),
            ToolConfig {
                hide_parameters: vec!["who".into()],
                ..Default::default()
            },
        );
        let issues = cfg.validate();
        assert!(find_issue(&issues, "hideParameters").unwrap().is_error());
    }

    #[test]
    fn hidden_parameter_with_override_is_ok() {
        let mut cfg = valid_config();
        let mut overrides = std::collections::HashMap::new();
        overrides.insert("who".to_string(), serde_json::json!("world"));
        cfg.upstreams[0].tools.insert(
            "hello".into(),
            ToolConfig {
                hide_parameters: vec!["who".into()],
                parameter_overrides: overrides,
                ..Default::default()
            },
        );
        let issues = cfg.validate();
        assert!(issues.iter().all(|i| !i.is_error()), "{issues:?}");
    }

    #[test]
    fn upstream_id_with_separator_is_error() {
        let mut cfg = valid_config();
        cfg.upstreams[0].id = "a__b".into();
        let issues = cfg.validate();
        assert!(find_issue(&issues, ".id").unwrap().is_error());
    }

    #[test]
    fn zero_max_entries_is_error() {
        let mut cfg = valid_config();
        cfg.cache.max_entries = 0;
        let issues = cfg.validate();
        assert!(find_issue(&issues, "maxEntries").unwrap().is_error());
    }

    #[test]
    fn missing_compression_base_url_is_warning_not_error() {
        let mut cfg = valid_config();
        cfg.compression.base_url.clear();
        let issues = cfg.validate();
        let issue = find_issue(&issues, "baseUrl").unwrap();
        assert!(!issue.is_error());
    }

    #[test]
    fn legacy_version1_migrates_cache_ttl() {
        let raw = r#"{
            "version": 1,
            "upstreams": [{"id": "us", "transport": "stdio", "command": "echo", "tools": {"t": {"cacheTtl": 0}}}],
            "compression": {"baseUrl": "x", "model": "y"}
        }"#;
        let cfg = Config::from_json_str(raw).unwrap();
        assert_eq!(cfg.version, CURRENT_CONFIG_VERSION);
        let tool = &cfg.upstreams[0].tools["t"];
        assert_eq!(tool.cache.as_ref().unwrap().enabled, Some(false));
    }

    #[test]
    fn legacy_version1_migrates_compression_defaults() {
        let raw = r#"{
            "version": 1,
            "upstreams": [{"id": "us", "transport": "stdio", "command": "echo"}],
            "compression": {
                "baseUrl": "x",
                "model": "y",
                "goalAware": true,
                "defaultPolicy": {"tokenThreshold": 500}
            }
        }"#;
        let cfg = Config::from_json_str(raw).unwrap();
        let compression = cfg.defaults.compression.unwrap();
        assert_eq!(compression.goal_aware, Some(true));
        assert_eq!(compression.token_threshold, Some(500));
        // The legacy-only keys must not leak into the v2 endpoint config.
        assert_eq!(cfg.compression.base_url, "x");
        assert_eq!(cfg.compression.model, "y");
    }

    #[test]
    fn legacy_version1_migrates_cache_defaults() {
        let raw = r#"{
            "version": 1,
            "upstreams": [{"id": "us", "transport": "stdio", "command": "echo"}],
            "compression": {"baseUrl": "x", "model": "y"},
            "cache": {"enabled": false, "ttlSeconds": 120, "maxEntries": 50}
        }"#;
        let cfg = Config::from_json_str(raw).unwrap();
        let cache = cfg.defaults.cache.unwrap();
        assert_eq!(cache.enabled, Some(false));
        assert_eq!(cache.ttl_seconds, Some(120));
        // Top-level cache.maxEntries is unmigrated and stays where it is.
        assert_eq!(cfg.cache.max_entries, 50);
    }

    #[test]
    fn version2_document_does_not_migrate_compression_or_cache() {
        let raw = r#"{
            "version": 2,
            "upstreams": [{"id": "us", "transport": "stdio", "command": "echo"}],
            "compression": {"baseUrl": "x", "model": "y", "goalAware": true},
            "cache": {"enabled": false}
        }"#;
        let cfg = Config::from_json_str(raw).unwrap();
        assert!(cfg.defaults.compression.is_none());
        assert!(cfg.defaults.cache.is_none());
    }
}
