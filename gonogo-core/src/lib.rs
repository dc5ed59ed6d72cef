pub mod error;
pub mod event;
pub mod experiment;
pub mod score;
pub mod trial;

pub use error::{GoNogoError, Result};
pub use event::{Edge, Event, NOSE_POKE_LINE, REWARD_CONTACT_LINE, event_for_edge};
pub use experiment::ExperimentState;
pub use score::{score, score_outcome};
pub use trial::{Response, Selector, TrialInfo, TrialKind, TrialScore, TrialState, TrialType};
