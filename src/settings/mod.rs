//! Settings Reconciler.

pub mod descriptor;
pub mod reconcile;

use crate::persist::PersistentStore;
use descriptor::SettingDescriptor;
use reconcile::ReconcileOutcome;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug)]
pub enum SettingsError {
    MalformedServerMap(String),
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsError::MalformedServerMap(msg) => write!(f, "malformed server_settings: {}", msg),
        }
    }
}

impl std::error::Error for SettingsError {}

/// Sole mutator of persisted settings keys in the session's namespace.
pub struct SettingsReconciler {
    store: Arc<dyn PersistentStore>,
}

impl SettingsReconciler {
    pub fn new(store: Arc<dyn PersistentStore>) -> Self {
        Self { store }
    }

    /// Parse the `server_settings` JSON payload and reconcile it against
    /// the persisted store, returning the delta to send back as `SETTINGS`.
    pub fn reconcile_json(&self, server_settings_json: &str) -> Result<ReconcileOutcome, SettingsError> {
        let server_map: HashMap<String, SettingDescriptor> = serde_json::from_str(server_settings_json)
            .map_err(|e| SettingsError::MalformedServerMap(e.to_string()))?;
        Ok(reconcile::reconcile(&server_map, self.store.as_ref()))
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.store.get(key)
    }

    /// Record a user/dashboard-initiated mutation directly (bypassing
    /// server reconciliation), e.g. from a `settings` dashboard message.
    pub fn set_user_value(&self, key: &str, value: &str) {
        self.store.set(key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemoryStore;

    #[test]
    fn reconcile_json_rejects_malformed_payload() {
        let reconciler = SettingsReconciler::new(Arc::new(MemoryStore::new()));
        assert!(reconciler.reconcile_json("not json").is_err());
    }

    #[test]
    fn reconcile_json_parses_and_reconciles() {
        let reconciler = SettingsReconciler::new(Arc::new(MemoryStore::new()));
        let outcome = reconciler
            .reconcile_json(r#"{"debug": {"value": true}}"#)
            .unwrap();
        assert_eq!(outcome.delta.get("debug"), Some(&serde_json::json!(true)));
    }
}
