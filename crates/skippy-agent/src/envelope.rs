//! The control envelope the model must emit, and the normalization rules
//! that coerce near-miss shapes into it.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ControlEnvelope {
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub final_answer: String,
    #[serde(rename = "continue", default)]
    pub continue_: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Action {
    #[serde(rename = "type", default = "tool_call")]
    pub action_type: String,
    #[serde(default)]
    pub tool: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
    #[serde(default)]
    pub reasoning: String,
}

fn tool_call() -> String {
    "tool_call".to_string()
}

const ACTION_META_KEYS: &[&str] = &["type", "tool", "arguments", "reasoning"];
const ENVELOPE_KEYS: &[&str] = &["actions", "final_answer", "continue"];

/// Coerce a parsed JSON value into the canonical envelope.
///
/// Accepted: the envelope itself, a bare action array, and a bare flat
/// action object. Returns `None` when the value carries none of the control
/// fields — the caller injects a format-retry system result and loops.
pub fn normalize_envelope(value: serde_json::Value) -> Option<ControlEnvelope> {
    match value {
        // Bare array of actions.
        serde_json::Value::Array(items) => {
            let actions: Vec<Action> = items.into_iter().filter_map(normalize_action).collect();
            if actions.is_empty() {
                return None;
            }
            Some(finish(ControlEnvelope {
                actions,
                continue_: true,
                ..Default::default()
            }))
        }
        serde_json::Value::Object(map) => {
            // A single flat {tool, arguments} object.
            if map.contains_key("tool") && !map.contains_key("actions") {
                let action = normalize_action(serde_json::Value::Object(map))?;
                return Some(finish(ControlEnvelope {
                    actions: vec![action],
                    continue_: true,
                    ..Default::default()
                }));
            }

            if !ENVELOPE_KEYS.iter().any(|k| map.contains_key(*k)) {
                return None;
            }

            let reasoning = string_field(&map, "reasoning");
            let final_answer = string_field(&map, "final_answer");
            let continue_ = map.get("continue").and_then(|v| v.as_bool()).unwrap_or(false);
            let actions = match map.get("actions") {
                Some(serde_json::Value::Array(items)) => items
                    .iter()
                    .cloned()
                    .filter_map(normalize_action)
                    .collect(),
                // A lone action object where the array should be.
                Some(obj @ serde_json::Value::Object(_)) => {
                    normalize_action(obj.clone()).into_iter().collect()
                }
                _ => Vec::new(),
            };

            Some(finish(ControlEnvelope {
                reasoning,
                actions,
                final_answer,
                continue_,
            }))
        }
        _ => None,
    }
}

/// A model that emits actions but neither a final answer nor `continue`
/// clearly is not done; force another turn.
fn finish(mut env: ControlEnvelope) -> ControlEnvelope {
    if !env.actions.is_empty() && !env.continue_ && env.final_answer.is_empty() {
        env.continue_ = true;
    }
    env
}

/// Normalize one action: default the type, and promote any flattened meta
/// keys (fields sitting beside `tool` instead of under `arguments`).
fn normalize_action(value: serde_json::Value) -> Option<Action> {
    let serde_json::Value::Object(map) = value else {
        return None;
    };
    let tool = map.get("tool").and_then(|v| v.as_str())?.to_string();
    let action_type = map
        .get("type")
        .and_then(|v| v.as_str())
        .unwrap_or("tool_call")
        .to_string();
    let reasoning = string_field(&map, "reasoning");

    let mut arguments = match map.get("arguments") {
        Some(serde_json::Value::Object(args)) => serde_json::Value::Object(args.clone()),
        Some(other) if !other.is_null() => other.clone(),
        _ => serde_json::json!({}),
    };

    // Flattened meta keys: {"tool": "file", "filepath": "/tmp/a"}.
    if let serde_json::Value::Object(args_map) = &mut arguments {
        for (key, val) in &map {
            if !ACTION_META_KEYS.contains(&key.as_str()) && !args_map.contains_key(key) {
                args_map.insert(key.clone(), val.clone());
            }
        }
    }

    Some(Action {
        action_type,
        tool,
        arguments,
        reasoning,
    })
}

fn string_field(map: &serde_json::Map<String, serde_json::Value>, key: &str) -> String {
    map.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}
