//! Error taxonomy shared by every gonogo crate.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GoNogoError {
    #[error("unrecognized event tag: {0}")]
    InvalidEvent(String),

    #[error("invalid timer duration: {0} s")]
    InvalidDuration(f64),

    #[error("missing parameter: {0}")]
    MissingParameter(String),

    #[error("invalid value for parameter '{name}': {message}")]
    InvalidParameter { name: String, message: String },

    #[error("no score defined for trial type '{trial_type}' with response '{response}'")]
    UnknownOutcome { trial_type: String, response: String },

    #[error("event dispatcher is closed")]
    DispatcherClosed,

    #[error("phase timer worker is not running")]
    TimerStopped,
}

impl GoNogoError {
    /// Whether the error halts the experiment when raised while an event is
    /// being interpreted. `InvalidEvent` and `DispatcherClosed` only ever
    /// fail the submitting call.
    pub fn is_fatal(&self) -> bool {
        match self {
            GoNogoError::InvalidEvent(_) | GoNogoError::DispatcherClosed => false,
            GoNogoError::InvalidDuration(_)
            | GoNogoError::MissingParameter(_)
            | GoNogoError::InvalidParameter { .. }
            | GoNogoError::UnknownOutcome { .. }
            | GoNogoError::TimerStopped => true,
        }
    }
}

pub type Result<T> = std::result::Result<T, GoNogoError>;
