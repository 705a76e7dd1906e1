//! Component I: strategy detection, the LLM-backed compression call,
//! `<think>` stripping, and the tool/resource result wrappers around it.

use std::time::Duration;

use mcpx_domain::config::{CompressionEndpointConfig, ResolvedCompressionPolicy};
use mcpx_upstream::protocol::{ToolCallContent, ToolCallResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;

use crate::tokenizer;

const LLM_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionStrategy {
    Json,
    Code,
    Default,
}

impl CompressionStrategy {
    fn label(self) -> &'static str {
        match self {
            CompressionStrategy::Json => "json",
            CompressionStrategy::Code => "code",
            CompressionStrategy::Default => "default",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompressResult {
    pub original: String,
    pub compressed: String,
    pub was_compressed: bool,
    pub strategy: CompressionStrategy,
}

fn code_heuristics() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"\b(function|class)\s+\w+",
            r"\b(import|require|export)\b",
            r"[{};]\s*$",
            r"\w+\.\w+\(",
            r"=>\s*[{(]?",
            r"\b(string|number|boolean|void|const|let)\b\s*[:=]",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("code heuristic pattern is valid"))
        .collect()
    })
}

fn detect_strategy(content: &str) -> CompressionStrategy {
    let trimmed = content.trim_start();
    if (trimmed.starts_with('{') || trimmed.starts_with('['))
        && serde_json::from_str::<Value>(content).is_ok()
    {
        return CompressionStrategy::Json;
    }
    let matches = code_heuristics().iter().filter(|re| re.is_match(content)).count();
    if matches >= 2 {
        CompressionStrategy::Code
    } else {
        CompressionStrategy::Default
    }
}

/// Extracts `<think>...</think>` spans. Returns `(main, think)` where `main`
/// is the response with every span removed and trimmed, and `think` is the
/// concatenation of the span contents, trimmed.
fn extract_think(response: &str) -> (String, String) {
    static THINK_RE: OnceLock<Regex> = OnceLock::new();
    let re = THINK_RE.get_or_init(|| Regex::new(r"(?s)<think>(.*?)</think>").expect("think regex is valid"));

    let mut think_parts = Vec::new();
    for cap in re.captures_iter(response) {
        think_parts.push(cap[1].to_string());
    }
    let main = re.replace_all(response, "").trim().to_string();
    let think = think_parts.join("").trim().to_string();
    (main, think)
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: usize,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: String,
}

/// Calls an OpenAI-compatible chat endpoint to compress (or goal-extract
/// from) oversized textual results.
pub struct Compressor {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl Compressor {
    pub fn new(config: &CompressionEndpointConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(LLM_TIMEOUT)
            .build()
            .expect("reqwest client with static config always builds");
        Compressor {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }
    }

    pub fn count_tokens(&self, text: &str) -> usize {
        tokenizer::count(text)
    }

    fn build_prompt(&self, content: &str, goal: Option<&str>, strategy: CompressionStrategy, policy: &ResolvedCompressionPolicy) -> (String, String) {
        let task = if goal.map(|g| !g.is_empty()).unwrap_or(false) {
            "Extract only the information relevant to the stated goal from the document below.".to_string()
        } else {
            "Compress the document below, preserving the information a caller is most likely to need.".to_string()
        };
        let mut system = format!(
            "You are a {strategy} compression assistant embedded in an MCP proxy. {task} \
             Respond with the compressed content only, no preamble.",
            strategy = strategy.label(),
        );
        if let Some(custom) = &policy.custom_instructions {
            system.push_str("\n\n");
            system.push_str(custom);
        }
        system.push_str(&format!("\n\nStay within approximately {} output tokens.", policy.max_output_tokens));

        let mut user = format!("<document>\n{content}\n</document>");
        if let Some(goal) = goal.filter(|g| !g.is_empty()) {
            user.push_str(&format!("\n<goal>\n{goal}\n</goal>"));
        }
        (system, user)
    }

    async fn call_llm(&self, system: &str, user: &str, max_output_tokens: usize) -> Result<String, String> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: vec![ChatMessage { role: "system", content: system }, ChatMessage { role: "user", content: user }],
            max_tokens: max_output_tokens,
        };
        let mut req = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await.map_err(|e| e.to_string())?;
        if !resp.status().is_success() {
            return Err(format!("compression endpoint returned HTTP {}", resp.status()));
        }
        let parsed: ChatCompletionResponse = resp.json().await.map_err(|e| e.to_string())?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| "compression endpoint returned no choices".to_string())
    }

    /// `compress(text, policy, goal?)` — §4.I.
    pub async fn compress(&self, text: &str, policy: &ResolvedCompressionPolicy, goal: Option<&str>) -> CompressResult {
        if !policy.enabled || tokenizer::count(text) <= policy.token_threshold {
            return CompressResult {
                original: text.to_string(),
                compressed: text.to_string(),
                was_compressed: false,
                strategy: CompressionStrategy::Default,
            };
        }

        let strategy = detect_strategy(text);
        let (system, user) = self.build_prompt(text, goal, strategy, policy);

        let response = match self.call_llm(&system, &user, policy.max_output_tokens).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "compression LLM call failed, returning original");
                return CompressResult { original: text.to_string(), compressed: text.to_string(), was_compressed: false, strategy };
            }
        };

        let (main, think) = extract_think(&response);
        let compressed_text = if !main.is_empty() { main } else { think };

        if compressed_text.is_empty() {
            tracing::warn!("compression produced an empty result, returning original");
            return CompressResult { original: text.to_string(), compressed: text.to_string(), was_compressed: false, strategy };
        }

        let original_tokens = tokenizer::count(text);
        let compressed_tokens = tokenizer::count(&compressed_text);
        let ratio = 1.0 - (compressed_tokens as f64 / original_tokens.max(1) as f64);
        tracing::info!(original_tokens, compressed_tokens, ratio, strategy = strategy.label(), "compressed result");

        CompressResult { original: text.to_string(), compressed: compressed_text, was_compressed: true, strategy }
    }

    /// `compressToolResult` — §4.I. Combines all text parts, compresses as
    /// one unit, and rewraps into a single text entry with a metadata
    /// header, followed by the non-text entries in original order.
    pub async fn compress_tool_result(
        &self,
        result: ToolCallResult,
        goal: Option<&str>,
        escalation_multiplier: Option<f64>,
        policy: &ResolvedCompressionPolicy,
    ) -> ToolCallResult {
        if !policy.enabled || !result.content.iter().any(|c| c.is_text()) {
            return result;
        }

        let text_parts: Vec<&str> = result.content.iter().filter(|c| c.is_text()).filter_map(|c| c.text.as_deref()).collect();
        let combined = text_parts.join("\n");

        let mut effective_policy = policy.clone();
        if let Some(multiplier) = escalation_multiplier.filter(|m| *m > 1.0) {
            effective_policy.max_output_tokens = (effective_policy.max_output_tokens as f64 * multiplier).ceil() as usize;
        }

        let outcome = self.compress(&combined, &effective_policy, goal).await;

        let non_text: Vec<ToolCallContent> = result.content.into_iter().filter(|c| !c.is_text()).collect();

        if !outcome.was_compressed {
            let mut content = vec![ToolCallContent::text(combined)];
            content.extend(non_text);
            return ToolCallResult { content, is_error: result.is_error };
        }

        let original_tokens = tokenizer::count(&outcome.original);
        let compressed_tokens = tokenizer::count(&outcome.compressed);
        let mut header = format!(
            "[Compressed: {original_tokens}\u{2192}{compressed_tokens} tokens, strategy: {}",
            outcome.strategy.label()
        );
        if let Some(m) = escalation_multiplier.filter(|m| *m > 1.0) {
            header.push_str(&format!(", escalation: {m}x"));
        }
        header.push(']');

        let mut content = vec![ToolCallContent::text(format!("{header}\n{}", outcome.compressed))];
        content.extend(non_text);
        ToolCallResult { content, is_error: result.is_error }
    }

    /// `compressResourceResult` — §4.I. Each text entry whose token count
    /// exceeds the threshold is compressed individually; other entries pass
    /// through unchanged.
    pub async fn compress_resource_result(
        &self,
        result: mcpx_upstream::session::ReadResourceResult,
        policy: &ResolvedCompressionPolicy,
    ) -> mcpx_upstream::session::ReadResourceResult {
        if !policy.enabled {
            return result;
        }
        let mut contents = Vec::with_capacity(result.contents.len());
        for mut entry in result.contents {
            if let Some(text) = entry.text.clone() {
                if tokenizer::count(&text) > policy.token_threshold {
                    let outcome = self.compress(&text, policy, None).await;
                    entry.text = Some(outcome.compressed);
                }
            }
            contents.push(entry);
        }
        mcpx_upstream::session::ReadResourceResult { contents }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(enabled: bool, threshold: usize) -> ResolvedCompressionPolicy {
        ResolvedCompressionPolicy { enabled, token_threshold: threshold, max_output_tokens: 100, custom_instructions: None, goal_aware: false }
    }

    fn compressor() -> Compressor {
        Compressor::new(&CompressionEndpointConfig { base_url: "http://localhost:1".into(), api_key: None, model: "test".into(), bypass_enabled: None, retry_escalation: None })
    }

    #[tokio::test]
    async fn short_circuits_under_threshold() {
        let c = compressor();
        let result = c.compress("short", &policy(true, 1000), None).await;
        assert!(!result.was_compressed);
        assert_eq!(result.compressed, "short");
    }

    #[tokio::test]
    async fn short_circuits_when_disabled() {
        let c = compressor();
        let long = "word ".repeat(5000);
        let result = c.compress(&long, &policy(false, 10), None).await;
        assert!(!result.was_compressed);
    }

    #[test]
    fn think_extraction_multiple_spans() {
        let (main, _think) = extract_think("<think>step 1</think><think>step 2</think>Final");
        assert_eq!(main, "Final");
    }

    #[test]
    fn think_extraction_only_thought() {
        let (main, think) = extract_think("<think>only thought</think>");
        assert!(main.is_empty());
        assert_eq!(think, "only thought");
    }

    #[test]
    fn think_extraction_empty_response() {
        let (main, think) = extract_think("");
        assert!(main.is_empty());
        assert!(think.is_empty());
    }

    #[test]
    fn detects_json_strategy() {
        assert_eq!(detect_strategy("{\"a\": 1}"), CompressionStrategy::Json);
    }

    #[test]
    fn detects_code_strategy() {
        let code = "function foo() {\n  return bar.baz();\n}\nexport default foo;";
        assert_eq!(detect_strategy(code), CompressionStrategy::Code);
    }

    #[test]
    fn detects_default_strategy() {
        assert_eq!(detect_strategy("just some plain prose about a topic"), CompressionStrategy::Default);
    }
}
