//! Argument normalization at the registry boundary.
//!
//! Models emit tool arguments in four shapes: a plain object, a positional
//! array, a nested array with a leading operation string, or meta keys
//! flattened onto the action itself (the orchestrator promotes those before
//! dispatch). Everything converges on a single JSON object here; tools then
//! deserialize into their own `deny_unknown_fields` structs so an unknown
//! field produces a message the model can act on.

use serde::de::DeserializeOwned;

/// Convert any accepted argument shape into a canonical object.
pub fn normalize(args: serde_json::Value) -> serde_json::Value {
    match args {
        serde_json::Value::Object(map) => unwrap_nested(serde_json::Value::Object(map)),
        serde_json::Value::Array(items) => normalize_array(items),
        serde_json::Value::Null => serde_json::json!({}),
        scalar => serde_json::json!({ "value": scalar }),
    }
}

fn normalize_array(items: Vec<serde_json::Value>) -> serde_json::Value {
    // ["op"] and ["op", {…}] are operation envelopes; anything else is a
    // positional argument list.
    match items.as_slice() {
        [serde_json::Value::String(op)] => serde_json::json!({ "op": op }),
        [serde_json::Value::String(op), serde_json::Value::Object(fields)] => {
            let mut map = fields.clone();
            map.entry("op".to_string())
                .or_insert(serde_json::Value::String(op.clone()));
            serde_json::Value::Object(map)
        }
        _ => serde_json::json!({ "args": items }),
    }
}

/// Unwrap `{arguments: {…}}` / `{args: {…}}` single-wrapper objects.
fn unwrap_nested(value: serde_json::Value) -> serde_json::Value {
    let serde_json::Value::Object(ref map) = value else {
        return value;
    };
    if map.len() == 1 {
        for key in ["arguments", "args"] {
            if let Some(inner) = map.get(key) {
                if inner.is_object() || inner.is_array() {
                    return normalize(inner.clone());
                }
            }
        }
    }
    value
}

/// Deserialize normalized arguments into a tool's argument struct,
/// turning serde's diagnostics into a model-actionable message.
pub fn parse<T: DeserializeOwned>(args: &serde_json::Value) -> Result<T, String> {
    serde_json::from_value(args.clone()).map_err(|e| format!("invalid arguments: {e}"))
}

/// Required-string accessor with a uniform error message.
pub fn require_str<'a>(args: &'a serde_json::Value, field: &str) -> Result<&'a str, String> {
    args.get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("missing required parameter: {field}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn object_passes_through() {
        let v = normalize(json!({"path": "/tmp/a"}));
        assert_eq!(v, json!({"path": "/tmp/a"}));
    }

    #[test]
    fn op_envelope_array_flattens() {
        let v = normalize(json!(["get_global", {"key": "k"}]));
        assert_eq!(v, json!({"op": "get_global", "key": "k"}));
    }

    #[test]
    fn lone_op_string() {
        assert_eq!(normalize(json!(["list"])), json!({"op": "list"}));
    }

    #[test]
    fn positional_array_is_preserved() {
        let v = normalize(json!([1, 2, 3]));
        assert_eq!(v, json!({"args": [1, 2, 3]}));
    }

    #[test]
    fn wrapper_objects_unwrap() {
        let v = normalize(json!({"arguments": {"key": "k"}}));
        assert_eq!(v, json!({"key": "k"}));
        // Double wrapping collapses too.
        let v = normalize(json!({"args": {"arguments": {"key": "k"}}}));
        assert_eq!(v, json!({"key": "k"}));
    }

    #[test]
    fn explicit_op_wins_over_envelope() {
        let v = normalize(json!(["list", {"op": "remove", "id": "x"}]));
        assert_eq!(v["op"], "remove");
    }

    #[test]
    fn unknown_fields_are_rejected_with_context() {
        #[derive(Debug, serde::Deserialize)]
        #[serde(deny_unknown_fields)]
        struct Args {
            #[allow(dead_code)]
            path: String,
        }
        let err = parse::<Args>(&json!({"path": "x", "bogus": 1})).unwrap_err();
        assert!(err.contains("bogus"), "message should name the field: {err}");
    }
}
