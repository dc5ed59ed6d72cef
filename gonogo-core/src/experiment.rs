use serde::{Deserialize, Serialize};
use std::fmt;

/// Run state of the session, orthogonal to the trial state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentState {
    Running,
    Paused,
    #[default]
    Stopped,
}

impl ExperimentState {
    /// Whether delivered events may drive trial transitions.
    pub fn interprets_events(&self) -> bool {
        matches!(self, ExperimentState::Running)
    }

    /// Whether delivered events are still forwarded to the data sink.
    pub fn records_events(&self) -> bool {
        !matches!(self, ExperimentState::Stopped)
    }
}

impl fmt::Display for ExperimentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExperimentState::Running => "running",
            ExperimentState::Paused => "paused",
            ExperimentState::Stopped => "stopped",
        })
    }
}
