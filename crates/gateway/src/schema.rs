//! Component G: lazily transforms an aggregated tool's exposed name,
//! description, and JSON-Schema at `listTools` time (§4.G). Never mutates
//! the catalog entry itself — every call recomputes from the raw aggregated
//! tool plus the current resolver.

use serde_json::Value;

use crate::aggregator::AggregatedTool;
use crate::resolver::Resolver;

#[derive(Debug, Clone)]
pub struct ExposedTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

fn ensure_object_map(schema: &mut Value, key: &str) -> &mut serde_json::Map<String, Value> {
    if !schema.get(key).is_some_and(Value::is_object) {
        schema[key] = Value::Object(serde_json::Map::new());
    }
    schema[key].as_object_mut().expect("just ensured object")
}

fn ensure_required_array(schema: &mut Value) -> &mut Vec<Value> {
    if !schema.get("required").is_some_and(Value::is_array) {
        schema["required"] = Value::Array(Vec::new());
    }
    schema["required"].as_array_mut().expect("just ensured array")
}

/// Applies the schema transform in its fixed order (§4.G steps 1-4).
pub fn transform_tool(tool: &AggregatedTool, resolver: &Resolver) -> ExposedTool {
    let mut description = tool.description.clone();
    if let Some(overridden) = resolver.description_override(&tool.namespaced_name) {
        description = overridden;
    }

    let mut schema = tool.input_schema.clone();
    if !schema.is_object() {
        schema = serde_json::json!({"type": "object", "properties": {}});
    }

    for hidden in resolver.hidden_parameters(&tool.namespaced_name) {
        ensure_object_map(&mut schema, "properties").remove(&hidden);
        ensure_required_array(&mut schema).retain(|v| v.as_str() != Some(hidden.as_str()));
    }

    let policy = resolver.resolved_policy(&tool.namespaced_name);

    if policy.goal_aware_enabled {
        let goal_field = resolver.goal_field_name();
        ensure_object_map(&mut schema, "properties").insert(
            goal_field.clone(),
            serde_json::json!({
                "type": "string",
                "description": "The specific search term or information you are seeking from this tool's result.",
            }),
        );
        let required = ensure_required_array(&mut schema);
        if !required.iter().any(|v| v.as_str() == Some(goal_field.as_str())) {
            required.push(Value::String(goal_field.clone()));
        }
        description.push_str(&format!(" Pass `{goal_field}` to focus the result on what you actually need."));
    }

    if policy.bypass_enabled {
        let bypass_field = resolver.bypass_field_name();
        ensure_object_map(&mut schema, "properties").insert(
            bypass_field.clone(),
            serde_json::json!({
                "type": "boolean",
                "description": "Set true to bypass compression and caching for this call.",
            }),
        );
        description.push_str(&format!(" Set `{bypass_field}` true to receive the raw, uncompressed result."));
    }

    ExposedTool { name: tool.namespaced_name.clone(), description, input_schema: schema }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::Resolver;
    use mcpx_domain::config::{
        CompressionEndpointConfig, CompressionPolicyOverride, Config, MaskingPolicyOverride, PolicyDefaults, ToolConfig, TransportKind,
        UpstreamSpec,
    };
    use std::collections::HashMap;

    fn tool() -> AggregatedTool {
        AggregatedTool {
            namespaced_name: "us__hello".into(),
            original_name: "hello".into(),
            upstream_id: "us".into(),
            description: "Say hi".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {"who": {"type": "string"}},
                "required": ["who"],
            }),
        }
    }

    fn resolver_for_scenario_1() -> Resolver {
        let mut overrides = HashMap::new();
        overrides.insert("who".to_string(), serde_json::json!("world"));
        let tool_config = ToolConfig {
            description: Some("Greet a person.".into()),
            hide_parameters: vec!["who".into()],
            parameter_overrides: overrides,
            ..Default::default()
        };
        let upstream = UpstreamSpec {
            id: "us".into(),
            name: None,
            transport: TransportKind::Stdio,
            command: Some("echo".into()),
            args: vec![],
            env: HashMap::new(),
            url: None,
            enabled: true,
            tools: [("hello".to_string(), tool_config)].into_iter().collect(),
            defaults: None,
        };
        let defaults = PolicyDefaults {
            compression: Some(CompressionPolicyOverride { goal_aware: Some(true), ..Default::default() }),
            masking: Some(MaskingPolicyOverride::default()),
            ..Default::default()
        };
        let config = Config {
            upstreams: vec![upstream],
            defaults,
            compression: CompressionEndpointConfig { bypass_enabled: Some(true), ..Default::default() },
            ..Default::default()
        };
        Resolver::new(config)
    }

    #[test]
    fn scenario_1_schema_transform() {
        let resolver = resolver_for_scenario_1();
        let exposed = transform_tool(&tool(), &resolver);

        assert_eq!(exposed.name, "us__hello");
        assert!(exposed.description.starts_with("Greet a person."));
        assert!(exposed.description.contains("_mcp_goal"));
        assert!(exposed.description.contains("_mcp_bypass"));

        let props = exposed.input_schema["properties"].as_object().unwrap();
        let mut keys: Vec<&str> = props.keys().map(String::as_str).collect();
        keys.sort();
        assert_eq!(keys, vec!["_mcp_bypass", "_mcp_goal"]);

        let required: Vec<&str> = exposed.input_schema["required"].as_array().unwrap().iter().map(|v| v.as_str().unwrap()).collect();
        assert_eq!(required, vec!["_mcp_goal"]);
    }

    #[test]
    fn absent_properties_and_required_are_created() {
        let mut t = tool();
        t.input_schema = serde_json::json!({"type": "object"});
        let resolver = Resolver::new(Config::default());
        let exposed = transform_tool(&t, &resolver);
        assert!(exposed.input_schema["properties"].is_object());
    }
}
