//! Deep-merge with deletion sentinels.
//!
//! Incoming JSON from the model overloads `null`; internally each leaf is
//! classified into an explicit operation before it touches stored data.

use serde_json::Value;

/// What an incoming field means for the stored counterpart.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOp {
    /// Replace (scalars, arrays) or recurse (objects).
    Set(Value),
    /// `null` leaf: remove this field.
    Delete,
    /// `{skill_data: null}` at the container level: reset to `{}`.
    ClearContainer,
}

impl MergeOp {
    /// Leaf position: `null` deletes the field.
    pub fn classify(v: Value) -> Self {
        match v {
            Value::Null => MergeOp::Delete,
            other => MergeOp::Set(other),
        }
    }

    /// Container position (`skill_data`): `null` resets to `{}`.
    pub fn for_container(v: Value) -> Self {
        match v {
            Value::Null => MergeOp::ClearContainer,
            other => MergeOp::Set(other),
        }
    }
}

/// Merge `patch` into `base`. Nested objects merge recursively, arrays and
/// scalars replace, `null` deletes the field. `base` becomes an object if it
/// was not one already.
pub fn deep_merge(base: &mut Value, patch: Value) {
    let Value::Object(patch_map) = patch else {
        *base = patch;
        return;
    };
    if !base.is_object() {
        *base = Value::Object(serde_json::Map::new());
    }
    let base_map = base.as_object_mut().unwrap();

    for (key, incoming) in patch_map {
        match MergeOp::classify(incoming) {
            MergeOp::Delete => {
                base_map.remove(&key);
            }
            MergeOp::ClearContainer => {
                base_map.insert(key, Value::Object(serde_json::Map::new()));
            }
            MergeOp::Set(Value::Object(obj)) => {
                let slot = base_map
                    .entry(key)
                    .or_insert_with(|| Value::Object(serde_json::Map::new()));
                deep_merge(slot, Value::Object(obj));
            }
            MergeOp::Set(other) => {
                base_map.insert(key, other);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_objects_merge() {
        let mut base = json!({"a": {"b": 1}});
        deep_merge(&mut base, json!({"a": {"c": 2}}));
        assert_eq!(base, json!({"a": {"b": 1, "c": 2}}));
    }

    #[test]
    fn null_deletes_the_field() {
        let mut base = json!({"a": {"b": 1, "c": 2}});
        deep_merge(&mut base, json!({"a": {"b": null}}));
        assert_eq!(base, json!({"a": {"c": 2}}));
    }

    #[test]
    fn arrays_replace_instead_of_merging() {
        let mut base = json!({"list": [1, 2, 3]});
        deep_merge(&mut base, json!({"list": [9]}));
        assert_eq!(base, json!({"list": [9]}));
    }

    #[test]
    fn scalars_replace() {
        let mut base = json!({"n": 1, "s": "old"});
        deep_merge(&mut base, json!({"n": 2, "s": "new"}));
        assert_eq!(base, json!({"n": 2, "s": "new"}));
    }

    #[test]
    fn merging_into_a_scalar_promotes_to_object() {
        let mut base = json!({"a": 5});
        deep_merge(&mut base, json!({"a": {"b": 1}}));
        assert_eq!(base, json!({"a": {"b": 1}}));
    }
}
