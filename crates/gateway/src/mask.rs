//! Component H: walks an argument tree, replacing PII substrings with
//! numbered placeholders and recording a restoration map, with an optional
//! LLM fallback for weak regex confidence (§4.H).
//!
//! Kept in the gateway crate rather than split out like `mcpx-compress`: it
//! leans entirely on `mcpx_domain::pii` for detection and only needs an LLM
//! client for the fallback path, which is a small enough surface not to
//! warrant its own crate (recorded in DESIGN.md).

use std::collections::HashMap;
use std::time::Duration;

use mcpx_domain::config::{MaskingLlmConfig, ResolvedMaskingPolicy};
use mcpx_domain::pii::{applicable_patterns, CompiledPattern, PiiKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const LLM_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionMethod {
    Regex,
    Llm,
}

#[derive(Debug, Clone)]
pub struct MaskedField {
    pub path: String,
    pub kind: PiiKind,
    pub method: DetectionMethod,
}

/// The masking artifact (§3): the transformed tree, the masked-field list,
/// and the placeholder→original restoration map.
#[derive(Debug, Clone)]
pub struct MaskArtifact {
    pub transformed: Value,
    pub fields: Vec<MaskedField>,
    pub restoration_map: HashMap<String, String>,
}

/// Static operation: substitutes every placeholder occurrence in `text` with
/// its original. Placeholder shapes (`[KIND_N]`) cannot be substrings of one
/// another, so map iteration order does not matter.
pub fn restore(text: &str, map: &HashMap<String, String>) -> String {
    let mut out = text.to_string();
    for (placeholder, original) in map {
        if out.contains(placeholder.as_str()) {
            out = out.replace(placeholder.as_str(), original);
        }
    }
    out
}

struct PlaceholderAllocator {
    counters: HashMap<PiiKind, u32>,
}

impl PlaceholderAllocator {
    fn new() -> Self {
        PlaceholderAllocator { counters: HashMap::new() }
    }

    fn next(&mut self, kind: PiiKind) -> String {
        let n = self.counters.entry(kind).or_insert(0);
        *n += 1;
        format!("[{}_{}]", kind.tag(), n)
    }
}

/// Applies every compiled pattern, in order, to `input`, replacing matches
/// with freshly allocated placeholders and recording them. Patterns are
/// applied sequentially against the progressively-masked string, so an
/// earlier pattern's replacement can never be re-matched by a later one.
fn mask_string(
    input: &str,
    patterns: &[CompiledPattern],
    path: &str,
    alloc: &mut PlaceholderAllocator,
    restoration_map: &mut HashMap<String, String>,
    fields: &mut Vec<MaskedField>,
) -> (String, Option<mcpx_domain::pii::Confidence>) {
    let mut current = input.to_string();
    let mut lowest_confidence = None;

    for pattern in patterns {
        if !pattern.regex.is_match(&current) {
            continue;
        }
        let matches: Vec<(usize, usize)> = pattern.regex.find_iter(&current).map(|m| (m.start(), m.end())).collect();
        if matches.is_empty() {
            continue;
        }
        lowest_confidence = Some(lowest_confidence.map_or(pattern.confidence, |c: mcpx_domain::pii::Confidence| c.min(pattern.confidence)));

        let mut rebuilt = String::with_capacity(current.len());
        let mut last_end = 0;
        for (start, end) in matches {
            rebuilt.push_str(&current[last_end..start]);
            let placeholder = alloc.next(pattern.kind);
            restoration_map.insert(placeholder.clone(), current[start..end].to_string());
            fields.push(MaskedField { path: path.to_string(), kind: pattern.kind, method: DetectionMethod::Regex });
            rebuilt.push_str(&placeholder);
            last_end = end;
        }
        rebuilt.push_str(&current[last_end..]);
        current = rebuilt;
    }

    (current, lowest_confidence)
}

#[derive(Serialize)]
struct DetectRequest<'a> {
    model: &'a str,
    messages: Vec<DetectMessage<'a>>,
    max_tokens: usize,
}

#[derive(Serialize)]
struct DetectMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct DetectResponse {
    #[serde(default)]
    choices: Vec<DetectChoice>,
}

#[derive(Deserialize)]
struct DetectChoice {
    message: DetectChoiceMessage,
}

#[derive(Deserialize)]
struct DetectChoiceMessage {
    #[serde(default)]
    content: String,
}

/// Masks argument trees under a resolved policy, with an optional LLM
/// fallback for low-confidence strings.
pub struct Masker {
    client: reqwest::Client,
}

impl Default for Masker {
    fn default() -> Self {
        Masker::new()
    }
}

impl Masker {
    pub fn new() -> Self {
        Masker {
            client: reqwest::Client::builder().timeout(LLM_TIMEOUT).build().expect("reqwest client with static config always builds"),
        }
    }

    /// §4.H LLM fallback: sends the original string to the configured
    /// detector, which returns a masked copy using generic placeholders
    /// (`[EMAIL_REDACTED]`, ...). Each generic placeholder is substituted
    /// with a freshly numbered one.
    ///
    /// Open question (§9): the detector does not report back the substrings
    /// it redacted, so these placeholders cannot be bound to a real
    /// original. This implementation accepts that asymmetry (option (a)):
    /// the restoration map entry is the synthetic marker
    /// `"<LLM_DETECTED_<kind>>"` rather than a recoverable original: a
    /// client restoring text will see that marker in place of whatever the
    /// LLM caught that regex missed.
    async fn llm_fallback(&self, text: &str, llm_config: &MaskingLlmConfig) -> Result<String, String> {
        let url = format!("{}/chat/completions", llm_config.base_url.trim_end_matches('/'));
        let system = "You detect personally identifiable information in the text the user provides. \
             Return the text unchanged except every PII span replaced with a generic placeholder of the \
             form [EMAIL_REDACTED], [SSN_REDACTED], [PHONE_REDACTED], [CREDIT_CARD_REDACTED], \
             [IP_ADDRESS_REDACTED], [DATE_OF_BIRTH_REDACTED], [PASSPORT_REDACTED], [DRIVER_LICENSE_REDACTED], \
             or [CUSTOM_REDACTED]. Respond with the resulting text only, no preamble.";
        let body = DetectRequest {
            model: &llm_config.model,
            messages: vec![DetectMessage { role: "system", content: system }, DetectMessage { role: "user", content: text }],
            max_tokens: (text.len() / 2 + 64).max(64),
        };
        let mut req = self.client.post(&url).json(&body);
        if let Some(key) = &llm_config.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await.map_err(|e| e.to_string())?;
        if !resp.status().is_success() {
            return Err(format!("masking LLM endpoint returned HTTP {}", resp.status()));
        }
        let parsed: DetectResponse = resp.json().await.map_err(|e| e.to_string())?;
        parsed.choices.into_iter().next().map(|c| c.message.content).ok_or_else(|| "masking LLM endpoint returned no choices".to_string())
    }

    fn substitute_llm_placeholders(
        &self,
        text: &str,
        path: &str,
        alloc: &mut PlaceholderAllocator,
        restoration_map: &mut HashMap<String, String>,
        fields: &mut Vec<MaskedField>,
    ) -> String {
        let mut out = text.to_string();
        for kind in PiiKind::ALL {
            if kind == PiiKind::Custom {
                continue;
            }
            let generic = format!("[{}_REDACTED]", kind.tag());
            while out.contains(&generic) {
                let placeholder = alloc.next(kind);
                restoration_map.insert(placeholder.clone(), format!("<LLM_DETECTED_{}>", kind.tag()));
                fields.push(MaskedField { path: path.to_string(), kind, method: DetectionMethod::Llm });
                out = out.replacen(&generic, &placeholder, 1);
            }
        }
        out
    }

    async fn mask_leaf_string(
        &self,
        input: &str,
        policy: &ResolvedMaskingPolicy,
        llm_config: Option<&MaskingLlmConfig>,
        patterns: &[CompiledPattern],
        path: &str,
        alloc: &mut PlaceholderAllocator,
        restoration_map: &mut HashMap<String, String>,
        fields: &mut Vec<MaskedField>,
    ) -> String {
        let (masked, lowest_confidence) = mask_string(input, patterns, path, alloc, restoration_map, fields);

        let should_fallback = policy.llm_fallback
            && llm_config.is_some()
            && lowest_confidence.map(|c| c <= policy.llm_fallback_threshold).unwrap_or(false);

        if !should_fallback {
            return masked;
        }

        match self.llm_fallback(input, llm_config.expect("checked above")).await {
            Ok(detected) => self.substitute_llm_placeholders(&detected, path, alloc, restoration_map, fields),
            Err(e) => {
                tracing::warn!(error = %e, "masking LLM fallback failed, using regex-only output");
                masked
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn mask_value<'a>(
        &'a self,
        value: &'a Value,
        policy: &'a ResolvedMaskingPolicy,
        llm_config: Option<&'a MaskingLlmConfig>,
        patterns: &'a [CompiledPattern],
        path: String,
        alloc: &'a mut PlaceholderAllocator,
        restoration_map: &'a mut HashMap<String, String>,
        fields: &'a mut Vec<MaskedField>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Value> + 'a>> {
        Box::pin(async move {
            match value {
                Value::String(s) => {
                    let masked = self.mask_leaf_string(s, policy, llm_config, patterns, &path, alloc, restoration_map, fields).await;
                    Value::String(masked)
                }
                Value::Array(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    for (i, item) in items.iter().enumerate() {
                        let child_path = format!("{path}[{i}]");
                        out.push(self.mask_value(item, policy, llm_config, patterns, child_path, alloc, restoration_map, fields).await);
                    }
                    Value::Array(out)
                }
                Value::Object(map) => {
                    let mut out = serde_json::Map::with_capacity(map.len());
                    for (key, val) in map {
                        let child_path = if path.is_empty() { key.clone() } else { format!("{path}.{key}") };
                        out.insert(key.clone(), self.mask_value(val, policy, llm_config, patterns, child_path, alloc, restoration_map, fields).await);
                    }
                    Value::Object(out)
                }
                other => other.clone(),
            }
        })
    }

    /// Masks `input` per the resolved policy; returns the masking artifact.
    /// Returns the input unchanged (empty artifact) when masking is disabled.
    pub async fn mask(&self, input: &Value, policy: &ResolvedMaskingPolicy, llm_config: Option<&MaskingLlmConfig>) -> MaskArtifact {
        if !policy.enabled {
            return MaskArtifact { transformed: input.clone(), fields: Vec::new(), restoration_map: HashMap::new() };
        }

        let patterns = match applicable_patterns(&policy.kinds, &policy.custom_patterns) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "custom PII pattern failed to compile at mask time, skipping masking");
                return MaskArtifact { transformed: input.clone(), fields: Vec::new(), restoration_map: HashMap::new() };
            }
        };

        let mut alloc = PlaceholderAllocator::new();
        let mut restoration_map = HashMap::new();
        let mut fields = Vec::new();
        let transformed = self.mask_value(input, policy, llm_config, &patterns, String::new(), &mut alloc, &mut restoration_map, &mut fields).await;

        MaskArtifact { transformed, fields, restoration_map }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpx_domain::pii::Confidence;
    use serde_json::json;

    fn policy(kinds: Vec<PiiKind>) -> ResolvedMaskingPolicy {
        ResolvedMaskingPolicy { enabled: true, kinds, custom_patterns: Vec::new(), llm_fallback: false, llm_fallback_threshold: Confidence::Low }
    }

    #[tokio::test]
    async fn masks_nested_email_and_phone_and_restores() {
        let masker = Masker::new();
        let input = json!({
            "user": {"contact": {"email": "a@b.com"}},
            "notes": ["a@b.com and 555-123-4567"],
        });
        let artifact = masker.mask(&input, &policy(vec![PiiKind::Email, PiiKind::Phone]), None).await;

        assert_eq!(artifact.transformed["user"]["contact"]["email"], json!("[EMAIL_1]"));
        assert_eq!(artifact.restoration_map.len(), 3);

        let note = artifact.transformed["notes"][0].as_str().unwrap();
        assert!(note.contains("[EMAIL_2]"));
        assert!(note.contains("[PHONE_1]"));

        let downstream_text = "[EMAIL_1] sent [EMAIL_2] to [PHONE_1]";
        assert_eq!(restore(downstream_text, &artifact.restoration_map), "a@b.com sent a@b.com to 555-123-4567");
    }

    #[tokio::test]
    async fn disabled_policy_is_a_no_op() {
        let masker = Masker::new();
        let input = json!({"email": "a@b.com"});
        let mut disabled = policy(vec![PiiKind::Email]);
        disabled.enabled = false;
        let artifact = masker.mask(&input, &disabled, None).await;
        assert_eq!(artifact.transformed, input);
        assert!(artifact.restoration_map.is_empty());
    }

    #[tokio::test]
    async fn non_string_primitives_pass_through() {
        let masker = Masker::new();
        let input = json!({"count": 5, "active": true, "tag": null});
        let artifact = masker.mask(&input, &policy(vec![PiiKind::Email]), None).await;
        assert_eq!(artifact.transformed, input);
    }

    #[test]
    fn restore_handles_repeated_placeholder_occurrences() {
        let mut map = HashMap::new();
        map.insert("[EMAIL_1]".to_string(), "a@b.com".to_string());
        let text = "[EMAIL_1] and again [EMAIL_1]";
        assert_eq!(restore(text, &map), "a@b.com and again a@b.com");
    }
}
