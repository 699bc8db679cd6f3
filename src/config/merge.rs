//! Settings merge logic
//!
//! Tables merge by key, everything else is replaced by the later layer.
//! A later `remote = ...` therefore replaces the host while leaving the
//! rest of `[attributes]` untouched.

use serde_json::Value;

/// Deep merge two settings values; `overlay` wins on conflicts.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value,
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        // Arrays are not concatenated
        (_, overlay) => overlay,
    }
}

/// Merge settings layers in order (first is base, last has highest precedence)
pub fn merge_layers(layers: Vec<Value>) -> Value {
    layers.into_iter().fold(Value::Null, deep_merge)
}
