use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::GoNogoError;

/// Where the trial state machine currently is. Exactly one is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialState {
    WaitingForResume,
    WaitingForNpStart,
    WaitingForNpDuration,
    WaitingForHoldPeriod,
    WaitingForResponse,
    WaitingForReward,
    WaitingForTo,
    WaitingForIti,
}

impl TrialState {
    pub fn label(&self) -> &'static str {
        match self {
            TrialState::WaitingForResume => "waiting for resume",
            TrialState::WaitingForNpStart => "waiting for nose-poke start",
            TrialState::WaitingForNpDuration => "waiting for nose-poke duration",
            TrialState::WaitingForHoldPeriod => "waiting for hold period",
            TrialState::WaitingForResponse => "waiting for response",
            TrialState::WaitingForReward => "waiting for reward retrieval",
            TrialState::WaitingForTo => "waiting for timeout",
            TrialState::WaitingForIti => "waiting for intertrial interval",
        }
    }
}

impl fmt::Display for TrialState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Outcome category of a completed trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrialScore {
    #[serde(rename = "HIT")]
    Hit,
    #[serde(rename = "MISS")]
    Miss,
    #[serde(rename = "CR")]
    CorrectReject,
    #[serde(rename = "FA")]
    FalseAlarm,
}

impl TrialScore {
    /// Short code recorded in the trial log.
    pub fn code(&self) -> &'static str {
        match self {
            TrialScore::Hit => "HIT",
            TrialScore::Miss => "MISS",
            TrialScore::CorrectReject => "CR",
            TrialScore::FalseAlarm => "FA",
        }
    }

    pub fn is_correct(&self) -> bool {
        matches!(self, TrialScore::Hit | TrialScore::CorrectReject)
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "HIT" => Some(TrialScore::Hit),
            "MISS" => Some(TrialScore::Miss),
            "CR" => Some(TrialScore::CorrectReject),
            "FA" => Some(TrialScore::FalseAlarm),
            _ => None,
        }
    }
}

/// How the animal ended the response window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Response {
    #[serde(rename = "reward")]
    Reward,
    #[serde(rename = "poke")]
    Poke,
    #[serde(rename = "no response")]
    NoResponse,
}

impl Response {
    pub fn as_str(&self) -> &'static str {
        match self {
            Response::Reward => "reward",
            Response::Poke => "poke",
            Response::NoResponse => "no response",
        }
    }
}

impl FromStr for Response {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reward" => Ok(Response::Reward),
            "poke" => Ok(Response::Poke),
            "no response" => Ok(Response::NoResponse),
            _ => Err(()),
        }
    }
}

/// The go/nogo prefix of a trial type, the part scoring cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrialKind {
    Go,
    Nogo,
}

impl TrialKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrialKind::Go => "go",
            TrialKind::Nogo => "nogo",
        }
    }
}

impl FromStr for TrialKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "go" => Ok(TrialKind::Go),
            "nogo" => Ok(TrialKind::Nogo),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialType {
    Go,
    GoRemind,
    GoForced,
    Nogo,
    NogoRepeat,
}

impl TrialType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrialType::Go => "go",
            TrialType::GoRemind => "go_remind",
            TrialType::GoForced => "go_forced",
            TrialType::Nogo => "nogo",
            TrialType::NogoRepeat => "nogo_repeat",
        }
    }

    pub fn kind(&self) -> TrialKind {
        match self {
            TrialType::Go | TrialType::GoRemind | TrialType::GoForced => TrialKind::Go,
            TrialType::Nogo | TrialType::NogoRepeat => TrialKind::Nogo,
        }
    }
}

impl fmt::Display for TrialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name of the context selector that supplies the next trial's setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selector {
    Go,
    Nogo,
    Remind,
}

impl Selector {
    pub fn as_str(&self) -> &'static str {
        match self {
            Selector::Go => "go",
            Selector::Nogo => "nogo",
            Selector::Remind => "remind",
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Selector {
    type Err = GoNogoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "go" => Ok(Selector::Go),
            "nogo" => Ok(Selector::Nogo),
            "remind" => Ok(Selector::Remind),
            other => Err(GoNogoError::InvalidParameter {
                name: "selector".into(),
                message: format!("unknown selector '{other}'"),
            }),
        }
    }
}

/// Per-trial accumulator. Timestamps that were never observed stay NaN so
/// that derived metrics propagate NaN instead of failing.
#[derive(Debug, Clone)]
pub struct TrialInfo {
    pub np_start: f64,
    pub np_end: f64,
    pub response_ts: f64,
    pub target_start: f64,
    pub response: Option<Response>,
    pub trial_type: Option<TrialType>,
    pub score: Option<TrialScore>,
    pub correct: Option<bool>,
    pub response_time: f64,
    pub reaction_time: f64,
}

impl Default for TrialInfo {
    fn default() -> Self {
        Self {
            np_start: f64::NAN,
            np_end: f64::NAN,
            response_ts: f64::NAN,
            target_start: f64::NAN,
            response: None,
            trial_type: None,
            score: None,
            correct: None,
            response_time: f64::NAN,
            reaction_time: f64::NAN,
        }
    }
}

impl TrialInfo {
    /// Fills in the outcome fields and the two derived latencies.
    pub fn complete(&mut self, trial_type: TrialType, response: Response, score: TrialScore) {
        self.response = Some(response);
        self.trial_type = Some(trial_type);
        self.score = Some(score);
        self.correct = Some(score.is_correct());
        self.response_time = self.response_ts - self.target_start;
        self.reaction_time = self.np_end - self.np_start;
    }

    /// Flattens the accumulator into the record handed to the data sink.
    /// NaN timestamps become JSON nulls.
    pub fn to_record(&self) -> Map<String, Value> {
        let mut record = Map::new();
        record.insert("np_start".into(), Value::from(self.np_start));
        record.insert("np_end".into(), Value::from(self.np_end));
        record.insert("response_ts".into(), Value::from(self.response_ts));
        record.insert("target_start".into(), Value::from(self.target_start));
        record.insert(
            "response".into(),
            self.response.map_or(Value::Null, |r| Value::from(r.as_str())),
        );
        record.insert(
            "trial_type".into(),
            self.trial_type
                .map_or(Value::Null, |t| Value::from(t.as_str())),
        );
        record.insert(
            "score".into(),
            self.score.map_or(Value::Null, |s| Value::from(s.code())),
        );
        record.insert(
            "correct".into(),
            self.correct.map_or(Value::Null, Value::from),
        );
        record.insert("response_time".into(), Value::from(self.response_time));
        record.insert("reaction_time".into(), Value::from(self.reaction_time));
        record
    }
}
