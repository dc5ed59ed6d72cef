pub mod config;
pub mod context;
pub mod dispatch;
pub mod selector;
pub mod sink;
pub mod state;

pub use config::{ConfigError, ExperimentConfig, Parameters, SelectorSettings};
pub use context::{Context, ParameterStore, SequenceSelector, StagedChanges};
pub use dispatch::{Command, DispatchHandle, Dispatcher, Envelope, EventHandler, channel};
pub use selector::{Selection, SelectorInputs, SelectorPolicy};
pub use sink::{ActionLog, Actuator, DataSink, LoggingActuator, MemorySink, Recording};
pub use state::TrialStateMachine;
