//! Settings Map descriptor shape: `{ value, default?, min?, max?,
//! allowed?[], locked? }`. Mirrors the range/enum/locked-boolean
//! distinctions a narrower, env-derived set of knobs would use.

use serde::Deserialize;
use serde_json::Value;

/// One entry of the server-broadcast settings map.
#[derive(Debug, Clone, Deserialize)]
pub struct SettingDescriptor {
    pub value: Value,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub allowed: Option<Vec<Value>>,
    #[serde(default)]
    pub locked: Option<bool>,
}

impl SettingDescriptor {
    pub fn is_range_bound(&self) -> bool {
        self.min.is_some() && self.max.is_some()
    }

    pub fn is_enum_bound(&self) -> bool {
        self.allowed.is_some()
    }

    pub fn is_locked(&self) -> bool {
        self.locked.unwrap_or(false)
    }
}

/// Convert a JSON value to the decimal/boolean string representation the
/// persisted store keeps.
pub fn value_to_persisted(value: &Value) -> String {
    match value {
        Value::Bool(b) => if *b { "true" } else { "false" }.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parse a persisted string back into a JSON value shaped like `template`,
/// preserving numeric vs string representation.
pub fn persisted_to_value(raw: &str, template: &Value) -> Value {
    match template {
        Value::Bool(_) => Value::Bool(matches!(raw, "true" | "1")),
        Value::Number(n) if n.is_i64() || n.is_u64() => raw
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(raw.to_string())),
        Value::Number(_) => raw
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(raw.to_string())),
        _ => Value::String(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn range_bound_detection() {
        let d: SettingDescriptor = serde_json::from_value(json!({
            "value": 4000, "min": 500, "max": 8000, "default": 4000
        }))
        .unwrap();
        assert!(d.is_range_bound());
        assert!(!d.is_enum_bound());
    }

    #[test]
    fn persisted_roundtrip_preserves_numeric_type() {
        let template = json!(4000);
        let value = persisted_to_value("4000", &template);
        assert_eq!(value, json!(4000));
        assert_eq!(value_to_persisted(&value), "4000");
    }

    #[test]
    fn persisted_roundtrip_preserves_bool() {
        let template = json!(true);
        assert_eq!(persisted_to_value("true", &template), json!(true));
        assert_eq!(value_to_persisted(&json!(false)), "false");
    }
}
