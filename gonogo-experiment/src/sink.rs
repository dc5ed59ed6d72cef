//! Outbound collaborators: where trial data goes and what the hardware is
//! asked to do.

use std::sync::{Arc, Mutex, MutexGuard};

use gonogo_core::{Event, TrialType};
use serde_json::{Map, Value};
use tracing::debug;

/// Receives raw events and completed trial records.
pub trait DataSink: Send {
    fn prepare(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
    fn process_event(&mut self, event: Event, timestamp: f64) -> anyhow::Result<()>;
    fn process_trial(&mut self, results: &Map<String, Value>) -> anyhow::Result<()>;
    fn finalize(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Fire-and-forget, name-indexed hardware actions (reward pump, house
/// light, ...).
pub trait Actuator: Send {
    fn invoke_actions(&mut self, name: &str);

    /// Presents the target of a trial that has just started. Only output
    /// that depends on the trial type needs this.
    fn present_target(&mut self, _trial_type: TrialType) {}
}

#[derive(Debug, Default, Clone)]
pub struct Recording {
    pub prepared: bool,
    pub finalized: bool,
    pub events: Vec<(Event, f64)>,
    pub trials: Vec<Map<String, Value>>,
}

/// Sink that keeps everything in memory. Clones share the same recording.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    inner: Arc<Mutex<Recording>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Recording> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn snapshot(&self) -> Recording {
        self.lock().clone()
    }

    pub fn trials(&self) -> Vec<Map<String, Value>> {
        self.lock().trials.clone()
    }

    pub fn events(&self) -> Vec<(Event, f64)> {
        self.lock().events.clone()
    }
}

impl DataSink for MemorySink {
    fn prepare(&mut self) -> anyhow::Result<()> {
        self.lock().prepared = true;
        Ok(())
    }

    fn process_event(&mut self, event: Event, timestamp: f64) -> anyhow::Result<()> {
        self.lock().events.push((event, timestamp));
        Ok(())
    }

    fn process_trial(&mut self, results: &Map<String, Value>) -> anyhow::Result<()> {
        self.lock().trials.push(results.clone());
        Ok(())
    }

    fn finalize(&mut self) -> anyhow::Result<()> {
        self.lock().finalized = true;
        Ok(())
    }
}

/// Actuator for setups without output hardware; actions are only logged.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingActuator;

impl Actuator for LoggingActuator {
    fn invoke_actions(&mut self, name: &str) {
        debug!(target: "gonogo::output", action = name, "invoking actions");
    }

    fn present_target(&mut self, trial_type: TrialType) {
        debug!(target: "gonogo::output", %trial_type, "presenting target");
    }
}

/// Actuator that remembers every action name it was asked to run. Clones
/// share the same log.
#[derive(Debug, Default, Clone)]
pub struct ActionLog {
    inner: Arc<Mutex<Vec<String>>>,
}

impl ActionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn actions(&self) -> Vec<String> {
        match self.inner.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn count(&self, name: &str) -> usize {
        self.actions().iter().filter(|a| a.as_str() == name).count()
    }
}

impl Actuator for ActionLog {
    fn invoke_actions(&mut self, name: &str) {
        match self.inner.lock() {
            Ok(mut guard) => guard.push(name.to_string()),
            Err(poisoned) => poisoned.into_inner().push(name.to_string()),
        }
    }
}
