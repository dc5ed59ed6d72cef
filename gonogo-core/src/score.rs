//! Outcome table for completed trials.

use crate::error::GoNogoError;
use crate::trial::{Response, TrialKind, TrialScore};

/// Scores a trial from its go/nogo prefix and the response. The match is
/// exhaustive, so a new response or trial kind cannot compile without a
/// table entry.
pub fn score_outcome(kind: TrialKind, response: Response) -> TrialScore {
    match (kind, response) {
        (TrialKind::Nogo, Response::Reward) => TrialScore::FalseAlarm,
        (TrialKind::Nogo, Response::Poke) => TrialScore::CorrectReject,
        (TrialKind::Nogo, Response::NoResponse) => TrialScore::CorrectReject,
        (TrialKind::Go, Response::Reward) => TrialScore::Hit,
        (TrialKind::Go, Response::Poke) => TrialScore::Miss,
        (TrialKind::Go, Response::NoResponse) => TrialScore::Miss,
    }
}

/// String-keyed lookup for callers that hold raw trial-type prefixes and
/// response names, e.g. values read back from a stored record.
pub fn score(trial_type: &str, response: &str) -> Result<TrialScore, GoNogoError> {
    match (trial_type.parse::<TrialKind>(), response.parse::<Response>()) {
        (Ok(kind), Ok(response)) => Ok(score_outcome(kind, response)),
        _ => Err(GoNogoError::UnknownOutcome {
            trial_type: trial_type.to_string(),
            response: response.to_string(),
        }),
    }
}
