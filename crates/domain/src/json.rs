//! Deterministic serialization helpers used for cache key construction.

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Serializes `value` with object keys sorted lexicographically at every
/// level; array element order is preserved. Two deeply-equal values (as maps
/// of maps/arrays/primitives) produce byte-identical output regardless of the
/// original map key insertion order.
pub fn stable_json(value: &Value) -> String {
    let mut out = String::new();
    write_stable(value, &mut out);
    out
}

fn write_stable(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            let _ = write!(out, "{n}");
        }
        Value::String(s) => {
            out.push_str(&serde_json::to_string(s).expect("string always serializes"));
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_stable(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            out.push('{');
            for (i, (key, val)) in sorted.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).expect("string always serializes"));
                out.push(':');
                write_stable(val, out);
            }
            out.push('}');
        }
    }
}

/// Lower-cases, strips punctuation, collapses internal whitespace, and trims
/// a goal string so equivalent goals hash to the same cache key. An absent
/// goal and an empty-after-normalization goal are encoded identically.
pub fn normalize_goal(goal: Option<&str>) -> Option<String> {
    let goal = goal?;
    let cleaned: String = goal
        .chars()
        .map(|c| if c.is_ascii_punctuation() { ' ' } else { c })
        .collect::<String>()
        .to_lowercase();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stable_json_ignores_key_order() {
        let a = json!({"a": 1, "b": 2});
        let b = json!({"b": 2, "a": 1});
        assert_eq!(stable_json(&a), stable_json(&b));
    }

    #[test]
    fn stable_json_preserves_array_order() {
        let a = json!({"items": [1, 2]});
        let b = json!({"items": [2, 1]});
        assert_ne!(stable_json(&a), stable_json(&b));
    }

    #[test]
    fn stable_json_nested_maps() {
        let a = json!({"outer": {"z": 1, "a": 2}, "list": [{"y": 1, "x": 2}]});
        let b = json!({"list": [{"x": 2, "y": 1}], "outer": {"a": 2, "z": 1}});
        assert_eq!(stable_json(&a), stable_json(&b));
    }

    #[test]
    fn normalize_goal_case_and_punctuation() {
        assert_eq!(
            normalize_goal(Some("Find Endpoints!")),
            normalize_goal(Some("find endpoints"))
        );
    }

    #[test]
    fn normalize_goal_empty_is_none() {
        assert_eq!(normalize_goal(Some("   ")), None);
        assert_eq!(normalize_goal(None), None);
        assert_eq!(normalize_goal(Some("")), None);
    }

    #[test]
    fn normalize_goal_collapses_whitespace() {
        assert_eq!(
            normalize_goal(Some("find   the   thing")),
            Some("find the thing".to_string())
        );
    }
}
