use gonogo_core::{Result, Selector, TrialScore, TrialType};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use crate::context::Context;

/// Values the selector needs from the context.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectorInputs {
    pub max_nogo: u64,
    pub go_probability: f64,
    /// Score of the previous trial; `None` before the first trial.
    pub last_score: Option<TrialScore>,
}

impl SelectorInputs {
    /// Reads the configured limits. The previous score is passed in by the
    /// caller so that a score left in the context by an earlier session
    /// never leaks into a new one.
    pub fn from_context<C: Context + ?Sized>(
        context: &C,
        last_score: Option<TrialScore>,
    ) -> Result<Self> {
        let max_nogo = context.get_u64("max_nogo")?;
        let go_probability = context.get_f64("go_probability")?;
        Ok(Self {
            max_nogo,
            go_probability,
            last_score,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub selector: Selector,
    pub trial_type: TrialType,
}

impl Selection {
    const REMIND: Selection = Selection {
        selector: Selector::Remind,
        trial_type: TrialType::GoRemind,
    };
}

/// Picks the next trial type. Random draws come from a seeded generator so
/// a session replays exactly for a fixed seed.
#[derive(Debug, Clone)]
pub struct SelectorPolicy {
    seed: u64,
    rng: StdRng,
}

impl SelectorPolicy {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Restarts the random sequence from the seed.
    pub fn reseed(&mut self) {
        self.rng = StdRng::seed_from_u64(self.seed);
    }

    pub fn next_selector(
        &mut self,
        inputs: Result<SelectorInputs>,
        consecutive_nogo: u64,
        remind_requested: bool,
    ) -> Selection {
        let inputs = match inputs {
            Ok(inputs) => inputs,
            Err(e) => {
                warn!(error = %e, "selector inputs unavailable, falling back to remind");
                return Selection::REMIND;
            }
        };

        let selection = if remind_requested {
            Selection::REMIND
        } else if consecutive_nogo >= inputs.max_nogo {
            Selection {
                selector: Selector::Go,
                trial_type: TrialType::GoForced,
            }
        } else if inputs.last_score == Some(TrialScore::FalseAlarm) {
            Selection {
                selector: Selector::Nogo,
                trial_type: TrialType::NogoRepeat,
            }
        } else if self.rng.random::<f64>() <= inputs.go_probability {
            Selection {
                selector: Selector::Go,
                trial_type: TrialType::Go,
            }
        } else {
            Selection {
                selector: Selector::Nogo,
                trial_type: TrialType::Nogo,
            }
        };
        debug!(trial_type = %selection.trial_type, consecutive_nogo, "selected next trial");
        selection
    }
}
