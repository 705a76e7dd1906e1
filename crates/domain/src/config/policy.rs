use crate::pii::{Confidence, CustomPattern, PiiKind};
use serde::{Deserialize, Serialize};

/// The `defaults.<kind>` trio, settable at the global level or per-upstream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDefaults {
    #[serde(default)]
    pub compression: Option<CompressionPolicyOverride>,
    #[serde(default)]
    pub masking: Option<MaskingPolicyOverride>,
    #[serde(default)]
    pub cache: Option<CachePolicyOverride>,
}

/// A sparse override: every field `None` means "inherit from the next level
/// down the hierarchy." Shallow-merged by the policy resolver.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionPolicyOverride {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub token_threshold: Option<usize>,
    #[serde(default)]
    pub max_output_tokens: Option<usize>,
    #[serde(default)]
    pub custom_instructions: Option<String>,
    #[serde(default)]
    pub goal_aware: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaskingPolicyOverride {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub kinds: Option<Vec<PiiKind>>,
    /// Union (not override) across hierarchy levels.
    #[serde(default)]
    pub custom_patterns: Option<Vec<CustomPattern>>,
    #[serde(default)]
    pub llm_fallback: Option<bool>,
    #[serde(default)]
    pub llm_fallback_threshold: Option<Confidence>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachePolicyOverride {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
    #[serde(default)]
    pub cache_errors: Option<bool>,
}

/// Frozen per-call snapshot after merging all four hierarchy levels (§3
/// "Resolved policy").
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedCompressionPolicy {
    pub enabled: bool,
    pub token_threshold: usize,
    pub max_output_tokens: usize,
    pub custom_instructions: Option<String>,
    pub goal_aware: bool,
}

impl Default for ResolvedCompressionPolicy {
    fn default() -> Self {
        ResolvedCompressionPolicy {
            enabled: true,
            token_threshold: 2000,
            max_output_tokens: 1000,
            custom_instructions: None,
            goal_aware: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedMaskingPolicy {
    pub enabled: bool,
    pub kinds: Vec<PiiKind>,
    pub custom_patterns: Vec<CustomPattern>,
    pub llm_fallback: bool,
    pub llm_fallback_threshold: Confidence,
}

impl Default for ResolvedMaskingPolicy {
    fn default() -> Self {
        ResolvedMaskingPolicy {
            enabled: false,
            kinds: Vec::new(),
            custom_patterns: Vec::new(),
            llm_fallback: false,
            llm_fallback_threshold: Confidence::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedCachePolicy {
    pub enabled: bool,
    pub ttl_seconds: u64,
    pub cache_errors: bool,
}

impl Default for ResolvedCachePolicy {
    fn default() -> Self {
        ResolvedCachePolicy {
            enabled: true,
            ttl_seconds: 300,
            cache_errors: false,
        }
    }
}

/// The three resolved policies plus the convenience booleans the resolver
/// exposes for a given namespaced tool (§4.D).
#[derive(Debug, Clone)]
pub struct ResolvedPolicy {
    pub compression: ResolvedCompressionPolicy,
    pub masking: ResolvedMaskingPolicy,
    pub cache: ResolvedCachePolicy,
    pub hidden: bool,
    pub goal_aware_enabled: bool,
    pub bypass_enabled: bool,
}
