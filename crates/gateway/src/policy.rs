//! Component D: resolves the four-level policy hierarchy (built-in →
//! global `defaults.<kind>` → upstream `defaults.<kind>` → tool
//! `tools[name].<kind>`) into one frozen [`ResolvedPolicy`] per call.

use mcpx_domain::config::{
    CachePolicyOverride, CompressionPolicyOverride, Config, MaskingPolicyOverride, ResolvedCachePolicy,
    ResolvedCompressionPolicy, ResolvedMaskingPolicy, ResolvedPolicy,
};

fn merge_compression(base: ResolvedCompressionPolicy, over: &CompressionPolicyOverride) -> ResolvedCompressionPolicy {
    ResolvedCompressionPolicy {
        enabled: over.enabled.unwrap_or(base.enabled),
        token_threshold: over.token_threshold.unwrap_or(base.token_threshold),
        max_output_tokens: over.max_output_tokens.unwrap_or(base.max_output_tokens),
        custom_instructions: over.custom_instructions.clone().or(base.custom_instructions),
        goal_aware: over.goal_aware.unwrap_or(base.goal_aware),
    }
}

fn merge_masking(mut base: ResolvedMaskingPolicy, over: &MaskingPolicyOverride) -> ResolvedMaskingPolicy {
    if let Some(kinds) = &over.kinds {
        base.kinds = kinds.clone();
    }
    // Union, not override: every level's custom patterns remain active.
    if let Some(custom) = &over.custom_patterns {
        base.custom_patterns.extend(custom.iter().cloned());
    }
    base.enabled = over.enabled.unwrap_or(base.enabled);
    base.llm_fallback = over.llm_fallback.unwrap_or(base.llm_fallback);
    base.llm_fallback_threshold = over.llm_fallback_threshold.unwrap_or(base.llm_fallback_threshold);
    base
}

fn merge_cache(base: ResolvedCachePolicy, over: &CachePolicyOverride) -> ResolvedCachePolicy {
    ResolvedCachePolicy {
        enabled: over.enabled.unwrap_or(base.enabled),
        ttl_seconds: over.ttl_seconds.unwrap_or(base.ttl_seconds),
        cache_errors: over.cache_errors.unwrap_or(base.cache_errors),
    }
}

/// Splits `"<upstreamId>__<originalName>"` into its parts. Returns `None`
/// when there is no `__` separator (malformed namespacing), in which case the
/// caller skips the upstream/tool levels of the hierarchy entirely.
pub fn split_namespaced(namespaced: &str) -> Option<(&str, &str)> {
    namespaced.split_once("__")
}

/// Looks up the `tools[originalName]` entry for a namespaced tool, if the
/// name parses and the upstream exists (§4.D edge cases).
pub fn find_tool_config<'a>(config: &'a Config, namespaced_tool_name: &str) -> Option<&'a mcpx_domain::config::ToolConfig> {
    let (upstream_id, tool_name) = split_namespaced(namespaced_tool_name)?;
    config.upstreams.iter().find(|u| u.id == upstream_id)?.tools.get(tool_name)
}

/// Resolves the full policy for a namespaced tool. An unknown upstream id or
/// a name with no `__` separator degrades gracefully to built-in + global
/// defaults only (§4.D edge case), never panics or errors.
pub fn resolved_policy(config: &Config, namespaced_tool_name: &str) -> ResolvedPolicy {
    let mut compression = ResolvedCompressionPolicy::default();
    let mut masking = ResolvedMaskingPolicy::default();
    let mut cache = ResolvedCachePolicy::default();
    let mut hidden = false;

    if let Some(c) = &config.defaults.compression {
        compression = merge_compression(compression, c);
    }
    if let Some(m) = &config.defaults.masking {
        masking = merge_masking(masking, m);
    }
    if let Some(c) = &config.defaults.cache {
        cache = merge_cache(cache, c);
    }

    if let Some((upstream_id, tool_name)) = split_namespaced(namespaced_tool_name) {
        if let Some(upstream) = config.upstreams.iter().find(|u| u.id == upstream_id) {
            if let Some(defaults) = &upstream.defaults {
                if let Some(c) = &defaults.compression {
                    compression = merge_compression(compression, c);
                }
                if let Some(m) = &defaults.masking {
                    masking = merge_masking(masking, m);
                }
                if let Some(c) = &defaults.cache {
                    cache = merge_cache(cache, c);
                }
            }
            if let Some(tool) = upstream.tools.get(tool_name) {
                hidden = tool.hidden.unwrap_or(false);
                if let Some(c) = &tool.compression {
                    compression = merge_compression(compression, c);
                }
                if let Some(m) = &tool.masking {
                    masking = merge_masking(masking, m);
                }
                if let Some(c) = &tool.cache {
                    cache = merge_cache(cache, c);
                }
            }
        }
    }

    // §4.D step 5: the global `masking.enabled` master switch is AND-ed into
    // the resolved value. Absent `config.masking` means masking was never
    // turned on anywhere, so the master switch defaults to off.
    let master_masking_enabled = config.masking.as_ref().map(|m| m.enabled).unwrap_or(false);
    masking.enabled = masking.enabled && master_masking_enabled;

    let bypass_enabled = config.compression.bypass_enabled.unwrap_or(true);
    let goal_aware_enabled = compression.goal_aware;

    ResolvedPolicy { compression, masking, cache, hidden, goal_aware_enabled, bypass_enabled }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpx_domain::config::{CompressionPolicyOverride, PolicyDefaults, ToolConfig, TransportKind, UpstreamSpec};
    use mcpx_domain::pii::CustomPattern;
    use std::collections::HashMap;

    fn config_with(upstreams: Vec<UpstreamSpec>, defaults: PolicyDefaults) -> Config {
        Config { upstreams, defaults, ..Default::default() }
    }

    fn upstream(id: &str) -> UpstreamSpec {
        UpstreamSpec {
            id: id.to_string(),
            name: None,
            transport: TransportKind::Stdio,
            command: Some("echo".into()),
            args: vec![],
            env: HashMap::new(),
            url: None,
            enabled: true,
            tools: HashMap::new(),
            defaults: None,
        }
    }

    #[test]
    fn built_in_defaults_apply_with_no_overrides() {
        let config = config_with(vec![upstream("fs")], PolicyDefaults::default());
        let resolved = resolved_policy(&config, "fs__read");
        assert_eq!(resolved.compression.token_threshold, ResolvedCompressionPolicy::default().token_threshold);
    }

    #[test]
    fn global_default_overrides_built_in() {
        let defaults = PolicyDefaults {
            compression: Some(CompressionPolicyOverride { token_threshold: Some(500), ..Default::default() }),
            ..Default::default()
        };
        let config = config_with(vec![upstream("fs")], defaults);
        let resolved = resolved_policy(&config, "fs__read");
        assert_eq!(resolved.compression.token_threshold, 500);
    }

    #[test]
    fn tool_level_overrides_global() {
        let defaults = PolicyDefaults {
            compression: Some(CompressionPolicyOverride { token_threshold: Some(500), ..Default::default() }),
            ..Default::default()
        };
        let mut fs = upstream("fs");
        fs.tools.insert(
            "read".into(),
            ToolConfig {
                compression: Some(CompressionPolicyOverride { token_threshold: Some(100), ..Default::default() }),
                ..Default::default()
            },
        );
        let config = config_with(vec![fs], defaults);
        let resolved = resolved_policy(&config, "fs__read");
        assert_eq!(resolved.compression.token_threshold, 100);
    }

    #[test]
    fn malformed_namespace_uses_defaults_only() {
        let config = config_with(vec![upstream("fs")], PolicyDefaults::default());
        let resolved = resolved_policy(&config, "not-namespaced");
        assert_eq!(resolved.compression.token_threshold, ResolvedCompressionPolicy::default().token_threshold);
        assert!(!resolved.hidden);
    }

    #[test]
    fn unknown_upstream_uses_defaults_only() {
        let config = config_with(vec![upstream("fs")], PolicyDefaults::default());
        let resolved = resolved_policy(&config, "ghost__read");
        assert_eq!(resolved.compression.token_threshold, ResolvedCompressionPolicy::default().token_threshold);
    }

    #[test]
    fn masking_custom_patterns_union_across_levels() {
        let defaults = PolicyDefaults {
            masking: Some(MaskingPolicyOverride {
                custom_patterns: Some(vec![CustomPattern { pattern: "GLOBAL-\\d+".into(), replacement: "g".into() }]),
                ..Default::default()
            }),
            ..Default::default()
        };
        let mut fs = upstream("fs");
        fs.tools.insert(
            "read".into(),
            ToolConfig {
                masking: Some(MaskingPolicyOverride {
                    custom_patterns: Some(vec![CustomPattern { pattern: "TOOL-\\d+".into(), replacement: "t".into() }]),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );
        let config = config_with(vec![fs], defaults);
        let resolved = resolved_policy(&config, "fs__read");
        assert_eq!(resolved.masking.custom_patterns.len(), 2);
    }

    #[test]
    fn master_masking_switch_overrides_tool_level_enable() {
        use mcpx_domain::config::MaskingConfig;
        let defaults = PolicyDefaults {
            masking: Some(MaskingPolicyOverride { enabled: Some(true), ..Default::default() }),
            ..Default::default()
        };
        let mut config = config_with(vec![upstream("fs")], defaults);
        assert!(!resolved_policy(&config, "fs__read").masking.enabled);

        config.masking = Some(MaskingConfig { enabled: true, llm_config: None });
        assert!(resolved_policy(&config, "fs__read").masking.enabled);
    }

    #[test]
    fn tool_hidden_flag_propagates() {
        let mut fs = upstream("fs");
        fs.tools.insert("secret".into(), ToolConfig { hidden: Some(true), ..Default::default() });
        let config = config_with(vec![fs], PolicyDefaults::default());
        let resolved = resolved_policy(&config, "fs__secret");
        assert!(resolved.hidden);
    }
}
