use std::mem;

use gonogo_core::{
    Event, ExperimentState, GoNogoError, Response, Result, TrialInfo, TrialKind, TrialScore,
    TrialState, TrialType, score_outcome,
};
use gonogo_timing::PhaseTimer;
use serde_json::Value;
use tracing::{debug, error, info, trace, warn};

use crate::context::Context;
use crate::dispatch::{Command, Envelope, EventHandler};
use crate::selector::{Selection, SelectorInputs, SelectorPolicy};
use crate::sink::{Actuator, DataSink};

/// Appetitive go/nogo trial controller.
///
/// Owns the trial state and the per-trial accumulator. It is only ever
/// driven from the dispatcher's consumer thread, so none of its fields are
/// locked.
pub struct TrialStateMachine<C, T>
where
    C: Context,
    T: PhaseTimer,
{
    context: C,
    timer: T,
    selector: SelectorPolicy,
    sink: Box<dyn DataSink>,
    actuator: Box<dyn Actuator>,

    trial_state: TrialState,
    experiment_state: ExperimentState,
    trial: u64,
    consecutive_nogo: u64,
    trial_type: TrialType,
    trial_info: TrialInfo,
    last_trial: Option<TrialInfo>,

    pause_requested: bool,
    apply_requested: bool,
    remind_requested: bool,
    sink_failures: u64,
}

impl<C, T> TrialStateMachine<C, T>
where
    C: Context,
    T: PhaseTimer,
{
    pub fn new(
        context: C,
        timer: T,
        sink: Box<dyn DataSink>,
        actuator: Box<dyn Actuator>,
        seed: u64,
    ) -> Self {
        Self {
            context,
            timer,
            selector: SelectorPolicy::new(seed),
            sink,
            actuator,
            trial_state: TrialState::WaitingForResume,
            experiment_state: ExperimentState::Stopped,
            trial: 0,
            consecutive_nogo: 0,
            trial_type: TrialType::GoRemind,
            trial_info: TrialInfo::default(),
            last_trial: None,
            pause_requested: false,
            apply_requested: false,
            remind_requested: false,
            sink_failures: 0,
        }
    }

    pub fn start_experiment(&mut self) {
        if self.experiment_state != ExperimentState::Stopped {
            warn!(state = %self.experiment_state, "experiment already started");
            return;
        }
        self.trial = 1;
        self.consecutive_nogo = 0;
        self.trial_info = TrialInfo::default();
        self.last_trial = None;
        self.remind_requested = false;
        self.pause_requested = false;
        self.context.apply_changes();
        self.apply_requested = false;
        if let Err(e) = self.sink.prepare() {
            self.sink_failed("prepare", &e);
        }
        self.selector.reseed();
        let selection = self.select_next();
        self.context.next_setting(selection.selector, false);

        self.set_experiment_state(ExperimentState::Running);
        self.set_trial_state(TrialState::WaitingForNpStart);
        self.actuator.invoke_actions("experiment_start");
        info!(seed = self.selector.seed(), trial_type = %self.trial_type, "experiment started");
    }

    /// Cancels any pending timer and closes the data sink. Safe to call at
    /// any time, any number of times.
    pub fn stop_experiment(&mut self) {
        if self.experiment_state == ExperimentState::Stopped {
            return;
        }
        self.timer.stop();
        self.pause_requested = false;
        self.set_experiment_state(ExperimentState::Stopped);
        self.actuator.invoke_actions("experiment_end");
        if let Err(e) = self.sink.finalize() {
            self.sink_failed("finalize", &e);
        }
        info!(trials = self.trial, "experiment stopped");
    }

    /// Pauses right away between trials; mid-trial the request is held until
    /// the animal is back at the nose-poke boundary.
    pub fn request_pause(&mut self) {
        if self.experiment_state != ExperimentState::Running {
            return;
        }
        if self.trial_state == TrialState::WaitingForNpStart {
            self.pause();
        } else {
            debug!(state = %self.trial_state, "pause deferred until trial end");
            self.pause_requested = true;
        }
    }

    /// Leaves a pause and waits for the next nose-poke. Ignored unless the
    /// experiment is paused.
    pub fn request_resume(&mut self) {
        if self.experiment_state != ExperimentState::Paused {
            warn!(state = %self.experiment_state, "resume requested while not paused");
            return;
        }
        self.timer.stop();
        self.pause_requested = false;
        self.set_experiment_state(ExperimentState::Running);
        self.set_trial_state(TrialState::WaitingForNpStart);
    }

    pub fn request_apply_changes(&mut self) {
        if matches!(
            self.trial_state,
            TrialState::WaitingForNpStart | TrialState::WaitingForResume
        ) {
            self.apply_changes();
        } else {
            debug!(state = %self.trial_state, "parameter changes deferred to intertrial interval");
            self.apply_requested = true;
        }
    }

    pub fn request_remind(&mut self) {
        self.remind_requested = true;
    }

    pub fn handle_event(&mut self, envelope: Envelope) -> Result<()> {
        let Envelope {
            event,
            timestamp,
            timer_generation,
        } = envelope;

        if let Some(generation) = timer_generation {
            if !self.timer.is_current(generation) {
                debug!(%event, generation, "discarding stale timer event");
                return Ok(());
            }
        }
        if !self.experiment_state.records_events() {
            trace!(%event, "experiment stopped, ignoring event");
            return Ok(());
        }

        trace!(target: "gonogo::input", %event, timestamp, state = %self.trial_state, "handling event");
        if let Err(e) = self.sink.process_event(event, timestamp) {
            self.sink_failed("process_event", &e);
        }
        self.actuator.invoke_actions(event.name());

        if !self.experiment_state.interprets_events() {
            return Ok(());
        }

        match (self.trial_state, event) {
            (TrialState::WaitingForNpStart, Event::NpStart) => {
                self.start_timer("np_duration", Event::NpDurationElapsed)?;
                // Overwritten by the next poke if this one is too short.
                self.trial_info.np_start = timestamp;
                self.trial_info.np_end = f64::NAN;
                self.set_trial_state(TrialState::WaitingForNpDuration);
            }

            (TrialState::WaitingForNpDuration, Event::NpEnd) => {
                debug!("animal withdrew too early");
                self.timer.stop();
                self.set_trial_state(TrialState::WaitingForNpStart);
                if self.pause_requested {
                    self.pause();
                }
            }
            (TrialState::WaitingForNpDuration, Event::NpDurationElapsed) => {
                debug!("animal initiated trial");
                self.start_trial(timestamp)?;
            }

            (TrialState::WaitingForHoldPeriod | TrialState::WaitingForResponse, Event::NpEnd) => {
                if self.trial_info.np_end.is_nan() {
                    debug!(timestamp, "recording nose-poke withdrawal");
                    self.trial_info.np_end = timestamp;
                }
            }
            (TrialState::WaitingForHoldPeriod, Event::HoldDurationElapsed) => {
                debug!("animal maintained poke through hold period");
                self.start_timer("response_duration", Event::ResponseDurationElapsed)?;
                self.set_trial_state(TrialState::WaitingForResponse);
            }

            (TrialState::WaitingForResponse, Event::NpStart) => {
                debug!("animal repoked");
                self.end_trial(Response::Poke, timestamp)?;
            }
            (TrialState::WaitingForResponse, Event::RewardStart) => {
                debug!("animal went to reward");
                self.end_trial(Response::Reward, timestamp)?;
            }
            (TrialState::WaitingForResponse, Event::ResponseDurationElapsed) => {
                debug!("animal provided no response");
                self.end_trial(Response::NoResponse, f64::NAN)?;
            }

            (TrialState::WaitingForTo, Event::ToDurationElapsed) => {
                self.start_timer("iti_duration", Event::ItiDurationElapsed)?;
                self.actuator.invoke_actions("timeout_end");
                self.set_trial_state(TrialState::WaitingForIti);
            }
            (TrialState::WaitingForTo, Event::RewardStart | Event::NpStart) => {
                debug!("resetting timeout duration");
                self.start_timer("to_duration", Event::ToDurationElapsed)?;
            }

            (TrialState::WaitingForIti, Event::ItiDurationElapsed) => {
                self.advance_trial();
            }

            (state, event) => {
                trace!(%event, %state, "no transition for event");
            }
        }
        Ok(())
    }

    fn start_trial(&mut self, timestamp: f64) -> Result<()> {
        self.start_timer("hold_duration", Event::HoldDurationElapsed)?;
        self.actuator.invoke_actions("trial_start");
        self.actuator.present_target(self.trial_type);
        self.trial_info.target_start = timestamp;
        self.set_trial_state(TrialState::WaitingForHoldPeriod);
        Ok(())
    }

    fn end_trial(&mut self, response: Response, response_ts: f64) -> Result<()> {
        let kind = self.trial_type.kind();
        let score = score_outcome(kind, response);
        let (variable, next_event, next_state) = if score == TrialScore::FalseAlarm {
            ("to_duration", Event::ToDurationElapsed, TrialState::WaitingForTo)
        } else {
            ("iti_duration", Event::ItiDurationElapsed, TrialState::WaitingForIti)
        };
        // Arming the next phase timer also cancels the response timer.
        self.start_timer(variable, next_event)?;

        debug!(response = response.as_str(), score = score.code(), "ending trial");
        self.consecutive_nogo = match kind {
            TrialKind::Nogo => self.consecutive_nogo + 1,
            TrialKind::Go => 0,
        };
        self.trial_info.response_ts = response_ts;
        self.trial_info.complete(self.trial_type, response, score);

        match score {
            TrialScore::FalseAlarm => self.actuator.invoke_actions("timeout_start"),
            TrialScore::Hit => self.actuator.invoke_actions("deliver_reward"),
            TrialScore::Miss | TrialScore::CorrectReject => {}
        }
        self.set_trial_state(next_state);
        self.flush_trial();
        Ok(())
    }

    fn flush_trial(&mut self) {
        let mut record = self.trial_info.to_record();
        record.insert("trial".into(), Value::from(self.trial));
        self.context.set_values(&record);
        let results = self.context.get_values();
        if let Err(e) = self.sink.process_trial(&results) {
            self.sink_failed("process_trial", &e);
        }
        let score = record.get("score").and_then(Value::as_str).unwrap_or("");
        info!(trial = self.trial, trial_type = %self.trial_type, score, "trial complete");
        self.last_trial = Some(mem::take(&mut self.trial_info));
    }

    fn advance_trial(&mut self) {
        debug!("setting up for next trial");
        // Applied first so that go_probability or max_nogo edits count for
        // this selection.
        if self.apply_requested {
            self.apply_changes();
        }
        let selection = self.select_next();
        self.context.next_setting(selection.selector, true);
        self.trial += 1;

        if self.pause_requested {
            self.pause();
            self.set_trial_state(TrialState::WaitingForResume);
        } else {
            self.set_trial_state(TrialState::WaitingForNpStart);
        }
    }

    fn select_next(&mut self) -> Selection {
        let last_score = self.last_trial.as_ref().and_then(|t| t.score);
        let inputs = SelectorInputs::from_context(&self.context, last_score);
        let selection =
            self.selector
                .next_selector(inputs, self.consecutive_nogo, self.remind_requested);
        if selection.trial_type == TrialType::GoRemind {
            self.remind_requested = false;
        }
        self.trial_type = selection.trial_type;
        selection
    }

    fn start_timer(&mut self, variable: &str, event: Event) -> Result<u64> {
        let duration = self.context.get_f64(variable)?;
        debug!(%event, variable, duration, "starting timer");
        self.timer.start(duration, event)
    }

    fn apply_changes(&mut self) {
        self.context.apply_changes();
        self.apply_requested = false;
        debug!("applied changes");
    }

    fn pause(&mut self) {
        self.pause_requested = false;
        self.set_experiment_state(ExperimentState::Paused);
    }

    fn sink_failed(&mut self, operation: &str, error: &anyhow::Error) {
        self.sink_failures += 1;
        warn!(operation, error = %error, failures = self.sink_failures, "data sink failed");
    }

    fn set_trial_state(&mut self, state: TrialState) {
        if self.trial_state != state {
            debug!(from = %self.trial_state, to = %state, "trial state changed");
        }
        self.trial_state = state;
    }

    fn set_experiment_state(&mut self, state: ExperimentState) {
        if self.experiment_state != state {
            debug!(from = %self.experiment_state, to = %state, "experiment state changed");
        }
        self.experiment_state = state;
    }

    pub fn trial_state(&self) -> TrialState {
        self.trial_state
    }

    pub fn experiment_state(&self) -> ExperimentState {
        self.experiment_state
    }

    /// 1-based number of the current trial; 0 before the experiment starts.
    pub fn trial(&self) -> u64 {
        self.trial
    }

    pub fn consecutive_nogo(&self) -> u64 {
        self.consecutive_nogo
    }

    pub fn trial_type(&self) -> TrialType {
        self.trial_type
    }

    pub fn trial_info(&self) -> &TrialInfo {
        &self.trial_info
    }

    /// Accumulator of the most recently completed trial.
    pub fn last_trial(&self) -> Option<&TrialInfo> {
        self.last_trial.as_ref()
    }

    pub fn pause_requested(&self) -> bool {
        self.pause_requested
    }

    pub fn sink_failures(&self) -> u64 {
        self.sink_failures
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut C {
        &mut self.context
    }

    pub fn timer(&self) -> &T {
        &self.timer
    }

    pub fn timer_mut(&mut self) -> &mut T {
        &mut self.timer
    }
}

impl<C, T> EventHandler for TrialStateMachine<C, T>
where
    C: Context,
    T: PhaseTimer,
{
    fn handle(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Deliver(envelope) => self.handle_event(envelope)?,
            Command::Start => self.start_experiment(),
            Command::Pause => self.request_pause(),
            Command::Resume => self.request_resume(),
            Command::ApplyChanges => self.request_apply_changes(),
            Command::Remind => self.request_remind(),
            Command::Stop | Command::Shutdown => self.stop_experiment(),
        }
        Ok(())
    }

    fn halt(&mut self, error: &GoNogoError) {
        error!(error = %error, state = %self.trial_state, trial = self.trial, "stopping experiment");
        self.stop_experiment();
    }
}
