//! Simulated animal standing in for the nose-poke and reward-contact lines.

use std::thread::JoinHandle;
use std::time::Duration;

use flume::{Receiver, RecvTimeoutError, Sender};
use gonogo_core::{Edge, NOSE_POKE_LINE, REWARD_CONTACT_LINE, TrialKind, TrialType};
use gonogo_experiment::{Actuator, DispatchHandle, Parameters};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace};

/// Behavioural tendencies of the simulated animal.
#[derive(Debug, Clone, Copy)]
pub struct SubjectProfile {
    /// Chance of going to the reward port on a go trial.
    pub hit_rate: f64,
    /// Chance of going to the reward port on a nogo trial.
    pub false_alarm_rate: f64,
    /// Chance of withdrawing before the nose-poke duration is met.
    pub early_withdrawal_rate: f64,
}

impl Default for SubjectProfile {
    fn default() -> Self {
        Self {
            hit_rate: 0.85,
            false_alarm_rate: 0.2,
            early_withdrawal_rate: 0.1,
        }
    }
}

/// Session timing the subject paces itself by.
#[derive(Debug, Clone, Copy)]
struct Pacing {
    np: Duration,
    hold: Duration,
    response: Duration,
}

impl Pacing {
    fn from_parameters(p: &Parameters) -> Self {
        let secs = |s: f64| Duration::try_from_secs_f64(s).unwrap_or_default();
        Self {
            np: secs(p.np_duration),
            hold: secs(p.hold_duration),
            response: secs(p.response_duration),
        }
    }
}

/// Actuator that shows each trial's target to the simulated subject and
/// logs everything else.
pub struct CueActuator {
    cues: Sender<TrialKind>,
}

impl CueActuator {
    pub fn new(cues: Sender<TrialKind>) -> Self {
        Self { cues }
    }
}

impl Actuator for CueActuator {
    fn invoke_actions(&mut self, name: &str) {
        debug!(target: "gonogo::output", action = name, "invoking actions");
    }

    fn present_target(&mut self, trial_type: TrialType) {
        trace!(target: "gonogo::output", %trial_type, "presenting target");
        let _ = self.cues.send(trial_type.kind());
    }
}

pub struct SimulatedSubject {
    handle: DispatchHandle,
    cues: Receiver<TrialKind>,
    profile: SubjectProfile,
    pacing: Pacing,
    rng: StdRng,
}

impl SimulatedSubject {
    pub fn new(
        handle: DispatchHandle,
        cues: Receiver<TrialKind>,
        profile: SubjectProfile,
        parameters: &Parameters,
        seed: u64,
    ) -> Self {
        Self {
            handle,
            cues,
            profile,
            pacing: Pacing::from_parameters(parameters),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Runs the subject on its own producer thread until `stop` fires or
    /// its sender is dropped.
    pub fn spawn(self, stop: Receiver<()>) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("subject".into())
            .spawn(move || self.run(&stop))
    }

    fn run(mut self, stop: &Receiver<()>) {
        loop {
            let idle = self.jitter(Duration::from_millis(100));
            if !wait(stop, idle) {
                break;
            }
            // Cues from a trial we already gave up on are stale.
            self.cues.drain().for_each(drop);

            if !self.edge(Edge::Rising, NOSE_POKE_LINE) {
                break;
            }
            if self.rng.random::<f64>() < self.profile.early_withdrawal_rate {
                let short = self.pacing.np.mul_f64(0.5);
                if !wait(stop, short) || !self.edge(Edge::Falling, NOSE_POKE_LINE) {
                    break;
                }
                continue;
            }

            let patience = self.pacing.np + self.pacing.hold + Duration::from_millis(500);
            let kind = match self.cues.recv_timeout(patience) {
                Ok(kind) => kind,
                Err(RecvTimeoutError::Timeout) => {
                    // Paused or stopped; nothing to respond to.
                    if !self.edge(Edge::Falling, NOSE_POKE_LINE) {
                        break;
                    }
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            };

            let hold = self.jitter(self.pacing.hold);
            if !wait(stop, hold) || !self.edge(Edge::Falling, NOSE_POKE_LINE) {
                break;
            }

            let rate = match kind {
                TrialKind::Go => self.profile.hit_rate,
                TrialKind::Nogo => self.profile.false_alarm_rate,
            };
            if self.rng.random::<f64>() < rate {
                // Respond well inside the window, after the hold has ended.
                let reaction = self.pacing.hold + self.pacing.response.mul_f64(0.2);
                if !wait(stop, reaction) || !self.edge(Edge::Rising, REWARD_CONTACT_LINE) {
                    break;
                }
                if !wait(stop, Duration::from_millis(200))
                    || !self.edge(Edge::Falling, REWARD_CONTACT_LINE)
                {
                    break;
                }
            } else if !wait(stop, self.pacing.hold + self.pacing.response) {
                break;
            }
        }
        debug!("simulated subject stopped");
    }

    /// Sends an edge; false once the dispatcher is gone.
    fn edge(&self, edge: Edge, line: &str) -> bool {
        self.handle.submit_edge(edge, line, None).is_ok()
    }

    /// Scales a base duration by a random factor in [0.5, 1.5).
    fn jitter(&mut self, base: Duration) -> Duration {
        base.mul_f64(0.5 + self.rng.random::<f64>())
    }
}

/// Sleeps for `duration` unless `stop` fires first. Returns whether the
/// subject should carry on.
fn wait(stop: &Receiver<()>, duration: Duration) -> bool {
    matches!(stop.recv_timeout(duration), Err(RecvTimeoutError::Timeout))
}
