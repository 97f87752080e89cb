//! Three-way merge between persisted client preferences, server-broadcast
//! policy, and (implicitly) prior user mutations already reflected in the
//! persisted store.

use super::descriptor::{persisted_to_value, value_to_persisted, SettingDescriptor};
use crate::persist::PersistentStore;
use serde_json::Value;
use std::collections::HashMap;

/// Whether the rendering geometry controller should switch to manual mode
/// as a side effect of this reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManualResolutionDecision {
    Manual { width: u32, height: u32 },
    Auto,
}

pub struct ReconcileOutcome {
    /// Keys whose persisted value changed during this pass.
    pub delta: HashMap<String, Value>,
    pub manual_resolution: ManualResolutionDecision,
}

/// Reconcile the server's settings map against `store`, mutating `store`
/// in place and returning the delta plus the manual-resolution-mode
/// decision.
pub fn reconcile(
    server_map: &HashMap<String, SettingDescriptor>,
    store: &dyn PersistentStore,
) -> ReconcileOutcome {
    let mut delta = HashMap::new();
    let mut resolved: HashMap<String, Value> = HashMap::new();

    for (key, desc) in server_map {
        let persisted_raw = store.get(key);
        let persisted_value = persisted_raw
            .as_deref()
            .map(|raw| persisted_to_value(raw, &desc.value));

        let (final_value, emit_delta) = resolve_one(desc, persisted_raw.as_deref(), persisted_value.as_ref());

        if emit_delta {
            store.set(key, &value_to_persisted(&final_value));
            delta.insert(key.clone(), final_value.clone());
        }
        resolved.insert(key.clone(), final_value);
    }

    let manual_resolution = manual_resolution_decision(&resolved);

    ReconcileOutcome {
        delta,
        manual_resolution,
    }
}

fn resolve_one(
    desc: &SettingDescriptor,
    persisted_raw: Option<&str>,
    persisted_value: Option<&Value>,
) -> (Value, bool) {
    if desc.is_range_bound() {
        let min = desc.min.unwrap();
        let max = desc.max.unwrap();
        let in_range = persisted_value
            .and_then(|v| v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
            .map(|n| n >= min && n <= max)
            .unwrap_or(false);

        if in_range {
            (persisted_value.cloned().unwrap(), false)
        } else {
            let default = desc.default.clone().unwrap_or_else(|| desc.value.clone());
            (default, true)
        }
    } else if desc.is_enum_bound() {
        let allowed = desc.allowed.as_ref().unwrap();
        let is_member = persisted_value
            .map(|v| {
                let as_str = v.as_str().map(str::to_string).unwrap_or_else(|| value_to_persisted(v));
                allowed.iter().any(|a| value_to_persisted(a) == as_str)
            })
            .unwrap_or(false);

        if is_member {
            (persisted_value.cloned().unwrap(), false)
        } else {
            (desc.value.clone(), true)
        }
    } else if desc.is_locked() {
        let differed = persisted_value.map(|v| v != &desc.value).unwrap_or(true);
        (desc.value.clone(), differed)
    } else if persisted_raw.is_none() {
        (desc.value.clone(), true)
    } else {
        (persisted_value.cloned().unwrap(), false)
    }
}

fn manual_resolution_decision(resolved: &HashMap<String, Value>) -> ManualResolutionDecision {
    let manual_mode = resolved
        .get("is_manual_resolution_mode")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    if !manual_mode {
        return ManualResolutionDecision::Auto;
    }

    let width = resolved.get("manual_width").and_then(Value::as_u64);
    let height = resolved.get("manual_height").and_then(Value::as_u64);

    match (width, height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => ManualResolutionDecision::Manual {
            width: w as u32,
            height: h as u32,
        },
        _ => ManualResolutionDecision::Auto,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemoryStore;
    use serde_json::json;

    fn descriptor(value: Value) -> SettingDescriptor {
        serde_json::from_value(json!({ "value": value })).unwrap()
    }

    #[test]
    fn range_bound_out_of_range_resets_to_default() {
        let store = MemoryStore::new();
        store.set("video_bitrate", "12000");

        let mut server_map = HashMap::new();
        server_map.insert(
            "video_bitrate".to_string(),
            serde_json::from_value::<SettingDescriptor>(json!({
                "value": 4000, "min": 500, "max": 8000, "default": 4000
            }))
            .unwrap(),
        );

        let outcome = reconcile(&server_map, &store);
        assert_eq!(outcome.delta.get("video_bitrate"), Some(&json!(4000)));
        assert_eq!(store.get("video_bitrate"), Some("4000".to_string()));
    }

    #[test]
    fn range_bound_in_range_is_untouched() {
        let store = MemoryStore::new();
        store.set("video_bitrate", "4500");

        let mut server_map = HashMap::new();
        server_map.insert(
            "video_bitrate".to_string(),
            serde_json::from_value::<SettingDescriptor>(json!({
                "value": 4000, "min": 500, "max": 8000, "default": 4000
            }))
            .unwrap(),
        );

        let outcome = reconcile(&server_map, &store);
        assert!(outcome.delta.is_empty());
        assert_eq!(store.get("video_bitrate"), Some("4500".to_string()));
    }

    #[test]
    fn locked_boolean_always_wins() {
        let store = MemoryStore::new();
        store.set("enable_binary_clipboard", "true");

        let mut server_map = HashMap::new();
        server_map.insert(
            "enable_binary_clipboard".to_string(),
            serde_json::from_value::<SettingDescriptor>(json!({
                "value": false, "locked": true
            }))
            .unwrap(),
        );

        let outcome = reconcile(&server_map, &store);
        assert_eq!(outcome.delta.get("enable_binary_clipboard"), Some(&json!(false)));
    }

    #[test]
    fn unlocked_boolean_first_contact_seeds_and_deltas() {
        let store = MemoryStore::new();

        let mut server_map = HashMap::new();
        server_map.insert("debug".to_string(), descriptor(json!(true)));

        let outcome = reconcile(&server_map, &store);
        assert_eq!(outcome.delta.get("debug"), Some(&json!(true)));
        assert_eq!(store.get("debug"), Some("true".to_string()));
    }

    #[test]
    fn unlocked_boolean_existing_value_is_preserved() {
        let store = MemoryStore::new();
        store.set("debug", "false");

        let mut server_map = HashMap::new();
        server_map.insert("debug".to_string(), descriptor(json!(true)));

        let outcome = reconcile(&server_map, &store);
        assert!(outcome.delta.is_empty());
        assert_eq!(store.get("debug"), Some("false".to_string()));
    }

    #[test]
    fn manual_resolution_mode_drives_decision() {
        let store = MemoryStore::new();

        let mut server_map = HashMap::new();
        server_map.insert(
            "is_manual_resolution_mode".to_string(),
            descriptor(json!(true)),
        );
        server_map.insert("manual_width".to_string(), descriptor(json!(1920)));
        server_map.insert("manual_height".to_string(), descriptor(json!(1080)));

        let outcome = reconcile(&server_map, &store);
        assert_eq!(
            outcome.manual_resolution,
            ManualResolutionDecision::Manual {
                width: 1920,
                height: 1080
            }
        );
    }
}
