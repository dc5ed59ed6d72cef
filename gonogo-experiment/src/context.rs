//! Experiment parameter store.
//!
//! The state machine reads parameters through [`Context`]. Operators stage
//! edits from any thread through [`StagedChanges`]; staged values stay
//! invisible until the state machine calls `apply_changes` at a trial
//! boundary.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use gonogo_core::{GoNogoError, Result, Selector};
use serde_json::{Map, Value};
use tracing::{debug, trace};

pub trait Context: Send {
    fn get_value(&self, name: &str) -> Result<Value>;
    fn get_values(&self) -> Map<String, Value>;
    fn set_values(&mut self, values: &Map<String, Value>);
    /// Promotes staged changes to current values.
    fn apply_changes(&mut self);
    /// Loads the next setting of `selector`, optionally snapshotting the
    /// values it replaces.
    fn next_setting(&mut self, selector: Selector, save_prior: bool);

    fn get_f64(&self, name: &str) -> Result<f64> {
        let value = self.get_value(name)?;
        value.as_f64().ok_or_else(|| GoNogoError::InvalidParameter {
            name: name.to_string(),
            message: format!("expected a number, got {value}"),
        })
    }

    fn get_u64(&self, name: &str) -> Result<u64> {
        let value = self.get_value(name)?;
        value.as_u64().ok_or_else(|| GoNogoError::InvalidParameter {
            name: name.to_string(),
            message: format!("expected a non-negative integer, got {value}"),
        })
    }
}

/// Thread-safe queue of parameter edits awaiting `apply_changes`.
#[derive(Debug, Clone, Default)]
pub struct StagedChanges {
    inner: Arc<Mutex<Map<String, Value>>>,
}

impl StagedChanges {
    fn lock(&self) -> MutexGuard<'_, Map<String, Value>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn set(&self, name: &str, value: impl Into<Value>) {
        self.lock().insert(name.to_string(), value.into());
    }

    pub fn set_values(&self, values: Map<String, Value>) {
        self.lock().extend(values);
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn take(&self) -> Map<String, Value> {
        std::mem::take(&mut *self.lock())
    }
}

/// Ordered list of settings a selector cycles through.
#[derive(Debug, Clone, Default)]
pub struct SequenceSelector {
    settings: Vec<Map<String, Value>>,
    cursor: usize,
}

impl SequenceSelector {
    pub fn new(settings: Vec<Map<String, Value>>) -> Self {
        Self {
            settings,
            cursor: 0,
        }
    }

    fn next_setting(&mut self) -> Option<&Map<String, Value>> {
        if self.settings.is_empty() {
            return None;
        }
        let index = self.cursor % self.settings.len();
        self.cursor += 1;
        self.settings.get(index)
    }
}

#[derive(Debug, Default)]
pub struct ParameterStore {
    values: Map<String, Value>,
    staged: StagedChanges,
    selectors: HashMap<Selector, SequenceSelector>,
    prior: Vec<Map<String, Value>>,
}

impl ParameterStore {
    pub fn new(values: Map<String, Value>) -> Self {
        Self {
            values,
            ..Self::default()
        }
    }

    pub fn add_sequence(&mut self, selector: Selector, settings: Vec<Map<String, Value>>) {
        self.selectors
            .insert(selector, SequenceSelector::new(settings));
    }

    /// Handle for staging edits from other threads.
    pub fn staged(&self) -> StagedChanges {
        self.staged.clone()
    }

    /// Snapshots saved by `next_setting(.., save_prior = true)`, oldest first.
    pub fn prior_settings(&self) -> &[Map<String, Value>] {
        &self.prior
    }
}

impl Context for ParameterStore {
    fn get_value(&self, name: &str) -> Result<Value> {
        self.values
            .get(name)
            .cloned()
            .ok_or_else(|| GoNogoError::MissingParameter(name.to_string()))
    }

    fn get_values(&self) -> Map<String, Value> {
        self.values.clone()
    }

    fn set_values(&mut self, values: &Map<String, Value>) {
        for (name, value) in values {
            self.values.insert(name.clone(), value.clone());
        }
    }

    fn apply_changes(&mut self) {
        let changes = self.staged.take();
        if !changes.is_empty() {
            debug!(count = changes.len(), "applying staged parameter changes");
        }
        self.values.extend(changes);
    }

    fn next_setting(&mut self, selector: Selector, save_prior: bool) {
        if save_prior {
            self.prior.push(self.values.clone());
        }
        if let Some(setting) = self
            .selectors
            .get_mut(&selector)
            .and_then(SequenceSelector::next_setting)
        {
            trace!(%selector, ?setting, "loading next setting");
            for (name, value) in setting {
                self.values.insert(name.clone(), value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn missing_value_is_missing_parameter() {
        let store = ParameterStore::default();
        assert_eq!(
            store.get_value("max_nogo").unwrap_err(),
            GoNogoError::MissingParameter("max_nogo".into())
        );
    }

    #[test]
    fn typed_getters_reject_wrong_types() {
        let store = ParameterStore::new(map(json!({"max_nogo": "three", "go_probability": 0.5})));
        assert!(matches!(
            store.get_u64("max_nogo"),
            Err(GoNogoError::InvalidParameter { .. })
        ));
        assert_eq!(store.get_f64("go_probability").unwrap(), 0.5);
    }

    #[test]
    fn staged_changes_apply_only_on_request() {
        let mut store = ParameterStore::new(map(json!({"go_probability": 0.5})));
        let staged = store.staged();
        let writer = std::thread::spawn(move || staged.set("go_probability", 0.8));
        writer.join().unwrap();

        assert_eq!(store.get_f64("go_probability").unwrap(), 0.5);
        store.apply_changes();
        assert_eq!(store.get_f64("go_probability").unwrap(), 0.8);
        assert!(store.staged().is_empty());
    }

    #[test]
    fn next_setting_cycles_and_saves_prior() {
        let mut store = ParameterStore::new(map(json!({"level": 0.0})));
        store.add_sequence(
            Selector::Go,
            vec![map(json!({"level": 40.0})), map(json!({"level": 50.0}))],
        );

        store.next_setting(Selector::Go, false);
        assert_eq!(store.get_f64("level").unwrap(), 40.0);
        store.next_setting(Selector::Go, true);
        assert_eq!(store.get_f64("level").unwrap(), 50.0);
        store.next_setting(Selector::Go, true);
        assert_eq!(store.get_f64("level").unwrap(), 40.0);

        let prior: Vec<f64> = store
            .prior_settings()
            .iter()
            .map(|s| s["level"].as_f64().unwrap())
            .collect();
        assert_eq!(prior, vec![40.0, 50.0]);
    }

    #[test]
    fn selector_without_sequence_keeps_values() {
        let mut store = ParameterStore::new(map(json!({"level": 1.0})));
        store.next_setting(Selector::Remind, false);
        assert_eq!(store.get_f64("level").unwrap(), 1.0);
    }
}
