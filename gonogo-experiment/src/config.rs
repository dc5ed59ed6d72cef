use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::context::ParameterStore;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to convert parameters: {0}")]
    Convert(#[from] serde_json::Error),
}

/// Session configuration: clock, RNG seed, initial context values and the
/// per-selector setting sequences.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Clock units per second.
    pub sample_rate: f64,
    pub seed: Option<u64>,
    pub parameters: Parameters,
    pub selectors: SelectorSettings,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            sample_rate: 100_000.0,
            seed: None,
            parameters: Parameters::default(),
            selectors: SelectorSettings::default(),
        }
    }
}

/// Durations are in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Parameters {
    pub np_duration: f64,
    pub hold_duration: f64,
    pub response_duration: f64,
    pub to_duration: f64,
    pub iti_duration: f64,
    pub max_nogo: u64,
    pub go_probability: f64,
    /// Any further values the stimulus side reads from the context.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            np_duration: 0.2,
            hold_duration: 0.2,
            response_duration: 3.0,
            to_duration: 5.0,
            iti_duration: 0.5,
            max_nogo: 3,
            go_probability: 0.5,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorSettings {
    pub go: Vec<Map<String, Value>>,
    pub nogo: Vec<Map<String, Value>>,
    pub remind: Vec<Map<String, Value>>,
}

impl ExperimentConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.sample_rate > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "sample_rate must be positive, got {}",
                self.sample_rate
            )));
        }
        let p = &self.parameters;
        for (name, value) in [
            ("np_duration", p.np_duration),
            ("hold_duration", p.hold_duration),
            ("response_duration", p.response_duration),
            ("to_duration", p.to_duration),
            ("iti_duration", p.iti_duration),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be a non-negative number of seconds, got {value}"
                )));
            }
        }
        if !(0.0..=1.0).contains(&p.go_probability) {
            return Err(ConfigError::Invalid(format!(
                "go_probability must lie in [0, 1], got {}",
                p.go_probability
            )));
        }
        Ok(())
    }

    /// Builds the context store holding the initial parameter values.
    pub fn parameter_store(&self) -> Result<ParameterStore, ConfigError> {
        let values = match serde_json::to_value(&self.parameters)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let mut store = ParameterStore::new(values);
        store.add_sequence(gonogo_core::Selector::Go, self.selectors.go.clone());
        store.add_sequence(gonogo_core::Selector::Nogo, self.selectors.nogo.clone());
        store.add_sequence(gonogo_core::Selector::Remind, self.selectors.remind.clone());
        Ok(store)
    }
}
