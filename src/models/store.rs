//! Model store implementation
//!
//! The store holds every open model and applies protocol events to it in
//! the order they arrive.

use std::collections::{HashMap, HashSet, VecDeque};

use bytes::Bytes;
use serde_json::Value;

use super::config::StoreConfig;
use super::model::Model;
use super::payload::ModelPayload;

/// Mapping from model id to synchronized model
#[derive(Debug, Default)]
pub struct ModelStore {
    /// Open models by id
    models: HashMap<String, Model>,

    /// Configuration
    config: StoreConfig,
}

impl ModelStore {
    /// Create an empty store with default configuration
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// Create an empty store with custom configuration
    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            models: HashMap::new(),
            config,
        }
    }

    /// Get the store configuration
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Create (or replace) the model opened under `id`
    pub fn on_open(&mut self, id: &str, payload: ModelPayload, buffers: Option<Vec<Bytes>>) {
        let model = Model::from_open(id, payload, buffers);

        tracing::info!(
            model_id = %id,
            module = %model.module(),
            name = %model.name(),
            "Model opened"
        );

        if self.models.insert(id.to_string(), model).is_some() {
            tracing::debug!(model_id = %id, "Model replaced by a new open");
        }
    }

    /// Merge a delta into the model `id`
    ///
    /// Returns `false` when no such model is open. That is not an error: a
    /// late update racing a close is expected.
    pub fn on_message(&mut self, id: &str, payload: ModelPayload, buffers: Option<Vec<Bytes>>) -> bool {
        match self.models.get_mut(id) {
            Some(model) => {
                model.apply_delta(payload, buffers);
                true
            }
            None => {
                tracing::trace!(model_id = %id, "Update for unknown model dropped");
                false
            }
        }
    }

    /// Remove the model `id`
    pub fn on_close(&mut self, id: &str) -> Option<Model> {
        let removed = self.models.remove(id);
        if removed.is_some() {
            tracing::info!(model_id = %id, "Model closed");
        } else {
            tracing::trace!(model_id = %id, "Close for unknown model ignored");
        }
        removed
    }

    /// Remove every model
    pub fn reset(&mut self) {
        let count = self.models.len();
        self.models.clear();
        tracing::info!(models = count, "Model store reset");
    }

    /// Get a model
    pub fn get(&self, id: &str) -> Option<&Model> {
        self.models.get(id)
    }

    /// Whether a model is open under `id`
    pub fn contains(&self, id: &str) -> bool {
        self.models.contains_key(id)
    }

    /// Number of open models
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Whether no model is open
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Reference closure of `id`
    ///
    /// Returns the model itself followed by every open model reachable
    /// through the declared reference fields, breadth first, each once.
    /// References to models that are not open are skipped. Empty when `id`
    /// itself is not open.
    pub fn lookup(&self, id: &str) -> Vec<&Model> {
        let Some(root) = self.models.get(id) else {
            return Vec::new();
        };

        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&Model> = VecDeque::new();
        let mut closure = Vec::new();

        seen.insert(root.id());
        queue.push_back(root);

        while let Some(model) = queue.pop_front() {
            closure.push(model);

            for field in &self.config.reference_fields {
                let Some(value) = model.state().get(field) else {
                    continue;
                };

                let mut refs = Vec::new();
                self.collect_references(value, &mut refs);

                for ref_id in refs {
                    if let Some(target) = self.models.get(ref_id) {
                        if seen.insert(target.id()) {
                            queue.push_back(target);
                        }
                    }
                }
            }
        }

        closure
    }

    fn collect_references<'a>(&self, value: &'a Value, out: &mut Vec<&'a str>) {
        match value {
            Value::String(s) => {
                if let Some(id) = self.config.referenced_id(s) {
                    out.push(id);
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.collect_references(item, out);
                }
            }
            Value::Object(map) => {
                for item in map.values() {
                    self.collect_references(item, out);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn payload(value: Value) -> ModelPayload {
        ModelPayload::from_value(&value).unwrap()
    }

    fn ids(models: Vec<&Model>) -> Vec<&str> {
        models.into_iter().map(Model::id).collect()
    }

    #[test]
    fn test_open_update_close() {
        let mut store = ModelStore::new();

        store.on_open("m1", payload(json!({"state": {"a": 1, "b": 2}})), None);
        assert!(store.on_message("m1", payload(json!({"state": {"b": 3, "c": 4}})), None));

        let model = store.get("m1").unwrap();
        assert_eq!(Value::Object(model.state().clone()), json!({"a": 1, "b": 3, "c": 4}));

        assert!(store.on_close("m1").is_some());
        assert!(!store.on_message("m1", payload(json!({"state": {"a": 9}})), None));
        assert!(!store.contains("m1"));
        assert!(store.lookup("m1").is_empty());
    }

    #[test]
    fn test_unknown_ids_are_ignored() {
        let mut store = ModelStore::new();

        assert!(!store.on_message("nope", payload(json!({"state": {"a": 1}})), None));
        assert!(store.on_close("nope").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_last_open_wins() {
        let mut store = ModelStore::new();

        store.on_open("m1", payload(json!({"state": {"a": 1, "b": 2}})), None);
        store.on_open("m1", payload(json!({"state": {"c": 3}})), None);

        assert_eq!(store.len(), 1);
        assert_eq!(
            Value::Object(store.get("m1").unwrap().state().clone()),
            json!({"c": 3})
        );
    }

    #[test]
    fn test_reset() {
        let mut store = ModelStore::new();
        store.on_open("m1", ModelPayload::default(), None);
        store.on_open("m2", ModelPayload::default(), None);

        store.reset();

        assert!(store.is_empty());
    }

    #[test]
    fn test_lookup_without_reference_fields() {
        let mut store = ModelStore::new();
        store.on_open("m1", payload(json!({"state": {"layout": "IPY_MODEL_m2"}})), None);
        store.on_open("m2", ModelPayload::default(), None);

        assert_eq!(ids(store.lookup("m1")), vec!["m1"]);
    }

    #[test]
    fn test_lookup_follows_references_once() {
        let config = StoreConfig::default().reference_fields(["children", "layout"]);
        let mut store = ModelStore::with_config(config);

        store.on_open(
            "box",
            payload(json!({"state": {
                "children": ["IPY_MODEL_a", "IPY_MODEL_b", "IPY_MODEL_missing"],
                "layout": "IPY_MODEL_layout",
            }})),
            None,
        );
        store.on_open("a", payload(json!({"state": {"layout": "IPY_MODEL_layout"}})), None);
        store.on_open("b", payload(json!({"state": {"children": ["IPY_MODEL_box"]}})), None);
        store.on_open("layout", payload(json!({"state": {"width": "10px"}})), None);
        store.on_open("unrelated", ModelPayload::default(), None);

        assert_eq!(ids(store.lookup("box")), vec!["box", "a", "b", "layout"]);
        assert_eq!(ids(store.lookup("a")), vec!["a", "layout"]);
    }

    #[test]
    fn test_lookup_ignores_undeclared_and_unprefixed_values() {
        let config = StoreConfig::default().reference_field("layout");
        let mut store = ModelStore::with_config(config);

        store.on_open(
            "m1",
            payload(json!({"state": {"layout": "m2", "style": "IPY_MODEL_m3"}})),
            None,
        );
        store.on_open("m2", ModelPayload::default(), None);
        store.on_open("m3", ModelPayload::default(), None);

        assert_eq!(ids(store.lookup("m1")), vec!["m1"]);
    }
}
