//! ==============================================================================
//! store.rs - controller state store
//! ==============================================================================
//!
//! purpose:
//!     the in-memory projection of one rig's latest known status. it starts
//!     empty, takes the first snapshot from the controller REST endpoint and
//!     is then patched field by field by every live channel message.
//!
//! rules:
//!     - patches are merged key by key; keys absent from a patch are untouched
//!     - set_local is an optimistic write; the next patch carrying the same
//!       field overwrites it (last patch wins, no conflict detection)
//!     - formatted readings are projections, never stored
//!
//! relationships:
//!     - owned by: view.rs (one store per mounted rig)
//!
//! ==============================================================================

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::domain::{ControlField, ControllerKind, FieldValue, Metric};
use crate::error::{DashError, Result};

/// key carrying the live channel address in the controller snapshot
pub const WS_URL_KEY: &str = "wsUrl";

#[derive(Clone, Debug, Default)]
pub struct ControllerStateStore {
    fields: BTreeMap<String, FieldValue>,
    ws_url: Option<String>,
}

impl ControllerStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// merge a raw json payload into the store
    ///
    /// the payload must be an object; anything else is a MalformedPayload.
    /// a null clears the field (the controller has no reading for it);
    /// strings, arrays and objects are skipped so the rest of the patch still
    /// lands. returns the number of fields written or cleared.
    pub fn apply_json(&mut self, payload: &Value) -> Result<usize> {
        let object = payload.as_object().ok_or_else(|| {
            DashError::MalformedPayload(format!("expected object, got {}", json_kind(payload)))
        })?;
        Ok(self.apply_patch(object))
    }

    /// non-destructive merge of a patch object
    pub fn apply_patch(&mut self, patch: &Map<String, Value>) -> usize {
        let mut applied = 0;
        for (key, value) in patch {
            if key == WS_URL_KEY {
                match value.as_str() {
                    Some(url) => self.ws_url = Some(url.to_string()),
                    None => warn!(value = %value, "ignoring non-string wsUrl"),
                }
                continue;
            }
            if value.is_null() {
                if self.fields.remove(key).is_some() {
                    applied += 1;
                }
                continue;
            }
            match FieldValue::from_json(value) {
                Some(v) => {
                    self.fields.insert(key.clone(), v);
                    applied += 1;
                }
                None => debug!(key = %key, "skipping non-scalar field"),
            }
        }
        applied
    }

    pub fn get(&self, field: &str) -> Option<FieldValue> {
        self.fields.get(field).copied()
    }

    pub fn get_f64(&self, field: &str) -> Option<f64> {
        self.get(field).and_then(|v| v.as_f64())
    }

    /// optimistic write ahead of the round trip
    pub fn set_local(&mut self, field: &str, value: impl Into<FieldValue>) {
        self.fields.insert(field.to_string(), value.into());
    }

    pub fn ws_url(&self) -> Option<&str> {
        self.ws_url.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    /// current value of a chartable metric, None when unknown or not numeric
    pub fn metric(&self, metric: Metric) -> Option<f64> {
        self.get_f64(metric.key())
    }

    // --------------------------------------------------------------------------
    // formatted read views
    // --------------------------------------------------------------------------

    pub fn formatted_temperature(&self) -> Option<String> {
        self.get_f64("temperature").map(|t| format!("{:.1}\u{00B0}F", t))
    }

    pub fn formatted_w1_temperature(&self) -> Option<String> {
        self.get_f64("w1temperature").map(|t| format!("{:.1}\u{00B0}F", t))
    }

    pub fn formatted_gravity(&self) -> Option<String> {
        self.get_f64("gravity").map(|g| format!("{:.4} SG", g))
    }

    pub fn formatted_abv(&self) -> Option<String> {
        self.get_f64("abv").map(|a| format!("{:.2}%", a))
    }

    pub fn formatted_atten(&self) -> Option<String> {
        self.get_f64("atten").map(|a| format!("{:.2}%", a))
    }

    /// power indicator: lit only at full power
    pub fn power_on(&self, kind: ControllerKind) -> bool {
        self.get_f64(kind.store_key(ControlField::Power)) == Some(100.0)
    }

    pub fn is_enabled(&self, kind: ControllerKind) -> bool {
        self.get(kind.store_key(ControlField::Enabled))
            .map(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn is_automatic(&self, kind: ControllerKind) -> bool {
        self.get(kind.store_key(ControlField::Automatic))
            .map(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn enabled_label(&self, kind: ControllerKind) -> &'static str {
        if self.is_enabled(kind) {
            "On"
        } else {
            "Off"
        }
    }

    pub fn automatic_label(&self, kind: ControllerKind) -> &'static str {
        if self.is_automatic(kind) {
            "Auto"
        } else {
            "Manual"
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn patch(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_patches_merge_non_destructively() {
        let mut store = ControllerStateStore::new();
        store.apply_patch(&patch(json!({"a": 1})));
        store.apply_patch(&patch(json!({"b": 2})));

        assert_eq!(store.get("a"), Some(FieldValue::Number(1.0)));
        assert_eq!(store.get("b"), Some(FieldValue::Number(2.0)));
    }

    #[test]
    fn test_last_patch_wins_over_optimistic_write() {
        let mut store = ControllerStateStore::new();
        store.set_local("power", 100.0);
        store.apply_patch(&patch(json!({"power": 100})));
        assert_eq!(store.get_f64("power"), Some(100.0));

        store.set_local("power", 100.0);
        store.apply_patch(&patch(json!({"power": 0})));
        assert_eq!(store.get_f64("power"), Some(0.0));
    }

    #[test]
    fn test_null_clears_a_reading() {
        let mut store = ControllerStateStore::new();
        store.apply_patch(&patch(json!({"gravity": 1.05, "abv": 4.1})));
        let applied = store.apply_patch(&patch(json!({"gravity": null})));

        assert_eq!(applied, 1);
        assert_eq!(store.get("gravity"), None);
        assert_eq!(store.metric(Metric::Gravity), None);
        assert_eq!(store.formatted_gravity(), None);
        assert_eq!(store.get_f64("abv"), Some(4.1));
    }

    #[test]
    fn test_non_object_payload_is_malformed() {
        let mut store = ControllerStateStore::new();
        store.apply_patch(&patch(json!({"temperature": 64.2})));

        let err = store.apply_json(&json!([1, 2, 3])).unwrap_err();
        assert!(matches!(err, DashError::MalformedPayload(_)));
        assert_eq!(store.get_f64("temperature"), Some(64.2));
    }

    #[test]
    fn test_unrecognized_values_are_skipped() {
        let mut store = ControllerStateStore::new();
        let applied = store
            .apply_json(&json!({
                "name": "Fermenter",
                "gravity": null,
                "nested": {"x": 1},
                "abv": 4.5,
                "wsUrl": "/rigs/Fermenter/ws"
            }))
            .unwrap();

        assert_eq!(applied, 1);
        assert_eq!(store.get_f64("abv"), Some(4.5));
        assert!(store.get("name").is_none());
        assert!(store.get("gravity").is_none());
        assert_eq!(store.ws_url(), Some("/rigs/Fermenter/ws"));
    }

    #[test]
    fn test_formatted_views() {
        let mut store = ControllerStateStore::new();
        assert_eq!(store.formatted_temperature(), None);

        store.apply_patch(&patch(json!({
            "temperature": 64.26,
            "w1temperature": 38.0,
            "gravity": 1.0123,
            "abv": 5.0,
            "atten": 72.456,
            "power": 100,
            "heater_power": 0,
            "enabled": true,
            "heater_automatic": false
        })));

        assert_eq!(store.formatted_temperature().as_deref(), Some("64.3\u{00B0}F"));
        assert_eq!(store.formatted_w1_temperature().as_deref(), Some("38.0\u{00B0}F"));
        assert_eq!(store.formatted_gravity().as_deref(), Some("1.0123 SG"));
        assert_eq!(store.formatted_abv().as_deref(), Some("5.00%"));
        assert_eq!(store.formatted_atten().as_deref(), Some("72.46%"));
        assert!(store.power_on(ControllerKind::Fridge));
        assert!(!store.power_on(ControllerKind::Heater));
        assert_eq!(store.enabled_label(ControllerKind::Fridge), "On");
        assert_eq!(store.enabled_label(ControllerKind::Heater), "Off");
        assert_eq!(store.automatic_label(ControllerKind::Heater), "Manual");
    }
}
