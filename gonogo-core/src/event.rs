use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::GoNogoError;

/// Everything that can happen during an appetitive go/nogo session, whether
/// produced by the hardware or by an expiring phase timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Event {
    NpStart,
    NpEnd,
    NpDurationElapsed,
    HoldDurationElapsed,
    ResponseDurationElapsed,
    RewardStart,
    RewardEnd,
    ToDurationElapsed,
    ItiDurationElapsed,
    TrialStart,
}

impl Event {
    pub const ALL: [Event; 10] = [
        Event::NpStart,
        Event::NpEnd,
        Event::NpDurationElapsed,
        Event::HoldDurationElapsed,
        Event::ResponseDurationElapsed,
        Event::RewardStart,
        Event::RewardEnd,
        Event::ToDurationElapsed,
        Event::ItiDurationElapsed,
        Event::TrialStart,
    ];

    /// Stable tag used on the submit boundary and as the action name.
    pub fn name(&self) -> &'static str {
        match self {
            Event::NpStart => "np_start",
            Event::NpEnd => "np_end",
            Event::NpDurationElapsed => "np_duration_elapsed",
            Event::HoldDurationElapsed => "hold_duration_elapsed",
            Event::ResponseDurationElapsed => "response_duration_elapsed",
            Event::RewardStart => "reward_start",
            Event::RewardEnd => "reward_end",
            Event::ToDurationElapsed => "to_duration_elapsed",
            Event::ItiDurationElapsed => "iti_duration_elapsed",
            Event::TrialStart => "trial_start",
        }
    }

    /// Description written to the event log.
    pub fn label(&self) -> &'static str {
        match self {
            Event::NpStart => "initiated nose poke",
            Event::NpEnd => "withdrew from nose poke",
            Event::NpDurationElapsed => "nose poke duration met",
            Event::HoldDurationElapsed => "hold period over",
            Event::ResponseDurationElapsed => "response timed out",
            Event::RewardStart => "reward contact",
            Event::RewardEnd => "withdrew from reward",
            Event::ToDurationElapsed => "timeout over",
            Event::ItiDurationElapsed => "ITI over",
            Event::TrialStart => "trial start",
        }
    }

    /// True for events that only a phase timer produces.
    pub fn is_timer_event(&self) -> bool {
        matches!(
            self,
            Event::NpDurationElapsed
                | Event::HoldDurationElapsed
                | Event::ResponseDurationElapsed
                | Event::ToDurationElapsed
                | Event::ItiDurationElapsed
        )
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Event {
    type Err = GoNogoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Event::ALL
            .iter()
            .copied()
            .find(|e| e.name() == s)
            .ok_or_else(|| GoNogoError::InvalidEvent(s.to_string()))
    }
}

/// Direction of a digital line transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Edge {
    Rising,
    Falling,
}

pub const NOSE_POKE_LINE: &str = "nose_poke";
pub const REWARD_CONTACT_LINE: &str = "reward_contact";

/// Maps an edge on a named input line to the event it signals.
pub fn event_for_edge(edge: Edge, line: &str) -> Result<Event, GoNogoError> {
    match (edge, line) {
        (Edge::Rising, NOSE_POKE_LINE) => Ok(Event::NpStart),
        (Edge::Falling, NOSE_POKE_LINE) => Ok(Event::NpEnd),
        (Edge::Rising, REWARD_CONTACT_LINE) => Ok(Event::RewardStart),
        (Edge::Falling, REWARD_CONTACT_LINE) => Ok(Event::RewardEnd),
        (edge, line) => Err(GoNogoError::InvalidEvent(format!("{edge:?} on {line}"))),
    }
}
