use std::sync::Arc;
use std::time::Duration;

use gonogo_core::{Event, ExperimentState, GoNogoError, TrialState};
use gonogo_experiment::{
    ActionLog, Context, ExperimentConfig, MemorySink, ParameterStore, TrialStateMachine, channel,
};
use gonogo_timing::{SampleClock, TimerService};

fn config(go_probability: f64) -> ExperimentConfig {
    let mut config = ExperimentConfig::default();
    config.sample_rate = 1.0;
    config.seed = Some(11);
    let p = &mut config.parameters;
    p.np_duration = 0.01;
    p.hold_duration = 0.01;
    p.response_duration = 0.05;
    p.to_duration = 0.05;
    p.iti_duration = 0.01;
    p.go_probability = go_probability;
    config
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

fn saw(sink: &MemorySink, event: Event) -> usize {
    sink.events().iter().filter(|(e, _)| *e == event).count()
}

struct Session {
    handle: gonogo_experiment::DispatchHandle,
    sink: MemorySink,
    actions: ActionLog,
    staged: gonogo_experiment::StagedChanges,
    worker: std::thread::JoinHandle<(
        TrialStateMachine<ParameterStore, TimerService>,
        gonogo_core::Result<()>,
    )>,
}

fn launch(go_probability: f64) -> Session {
    let config = config(go_probability);
    let (handle, dispatcher) = channel(Arc::new(SampleClock::new(config.sample_rate)));
    let timer = TimerService::new(Arc::new(handle.clone())).unwrap();
    let store = config.parameter_store().unwrap();
    let staged = store.staged();
    let sink = MemorySink::new();
    let actions = ActionLog::new();
    let machine = TrialStateMachine::new(
        store,
        timer,
        Box::new(sink.clone()),
        Box::new(actions.clone()),
        config.seed.unwrap_or_default(),
    );
    let worker = dispatcher.spawn(machine).unwrap();
    handle.start_experiment().unwrap();
    Session {
        handle,
        sink,
        actions,
        staged,
        worker,
    }
}

#[test]
fn go_trial_runs_to_the_next_trial_in_real_time() {
    let session = launch(1.0);
    session.handle.submit("np_start", None).unwrap();
    assert!(wait_until(|| saw(&session.sink, Event::HoldDurationElapsed) == 1));
    session.handle.submit("reward_start", None).unwrap();
    assert!(wait_until(|| saw(&session.sink, Event::ItiDurationElapsed) == 1));

    session.handle.shutdown().unwrap();
    let (machine, outcome) = session.worker.join().unwrap();
    outcome.unwrap();

    assert_eq!(machine.trial(), 2);
    assert_eq!(machine.trial_state(), TrialState::WaitingForNpStart);
    let trials = session.sink.trials();
    assert_eq!(trials.len(), 1);
    assert_eq!(trials[0]["score"], "HIT");
    assert!(trials[0]["response_time"].as_f64().unwrap() >= 0.0);
    assert_eq!(session.actions.count("deliver_reward"), 1);
}

#[test]
fn early_withdrawal_never_delivers_np_duration() {
    let session = launch(1.0);
    session.handle.submit("np_start", None).unwrap();
    session.handle.submit("np_end", None).unwrap();
    std::thread::sleep(Duration::from_millis(60));

    session.handle.shutdown().unwrap();
    let (machine, outcome) = session.worker.join().unwrap();
    outcome.unwrap();
    assert_eq!(saw(&session.sink, Event::NpDurationElapsed), 0);
    assert_eq!(machine.trial_state(), TrialState::WaitingForNpStart);
    assert_eq!(machine.trial(), 1);
}

#[test]
fn unanswered_nogo_is_a_correct_reject() {
    let session = launch(0.0);
    session.handle.submit("np_start", None).unwrap();
    assert!(wait_until(|| session.sink.trials().len() == 1));
    assert_eq!(session.sink.trials()[0]["score"], "CR");
    assert_eq!(session.sink.trials()[0]["trial_type"], "nogo");

    session.handle.stop_experiment().unwrap();
    session.handle.shutdown().unwrap();
    let (machine, outcome) = session.worker.join().unwrap();
    outcome.unwrap();
    assert_eq!(machine.experiment_state(), ExperimentState::Stopped);
    assert!(session.sink.snapshot().finalized);
}

#[test]
fn invalid_duration_halts_the_session() {
    let session = launch(1.0);
    session.staged.set("np_duration", -1.0);
    session.handle.request_apply_changes().unwrap();
    session.handle.submit("np_start", None).unwrap();

    let (machine, outcome) = session.worker.join().unwrap();
    assert_eq!(outcome.unwrap_err(), GoNogoError::InvalidDuration(-1.0));
    assert_eq!(machine.experiment_state(), ExperimentState::Stopped);
    assert_eq!(machine.context().get_f64("np_duration").unwrap(), -1.0);
    assert!(session.handle.submit("np_end", None).is_err());
}

fn zero_np_duration_machine() -> (
    gonogo_experiment::DispatchHandle,
    gonogo_experiment::Dispatcher,
    TrialStateMachine<ParameterStore, TimerService>,
    MemorySink,
) {
    let mut config = config(1.0);
    config.parameters.np_duration = 0.0;
    let (handle, dispatcher) = channel(Arc::new(SampleClock::new(config.sample_rate)));
    let timer = TimerService::new(Arc::new(handle.clone())).unwrap();
    let sink = MemorySink::new();
    let mut machine = TrialStateMachine::new(
        config.parameter_store().unwrap(),
        timer,
        Box::new(sink.clone()),
        Box::new(ActionLog::new()),
        3,
    );
    machine.start_experiment();
    (handle, dispatcher, machine, sink)
}

#[test]
fn zero_np_duration_fires_after_the_poke_is_handled() {
    let (handle, dispatcher, mut machine, sink) = zero_np_duration_machine();
    handle.submit("np_start", None).unwrap();
    // The expiry comes back through the queue, after the poke was handled.
    assert!(wait_until(|| {
        dispatcher.drain(&mut machine).unwrap();
        machine.trial_state() == TrialState::WaitingForHoldPeriod
    }));
    let events: Vec<Event> = sink.events().into_iter().map(|(e, _)| e).collect();
    assert_eq!(events, vec![Event::NpStart, Event::NpDurationElapsed]);
}

#[test]
fn zero_np_duration_queues_behind_earlier_events() {
    let (handle, dispatcher, mut machine, sink) = zero_np_duration_machine();
    handle.submit("np_start", None).unwrap();
    handle.submit("np_end", None).unwrap();
    assert!(dispatcher.drain(&mut machine).unwrap() >= 2);
    assert_eq!(machine.trial_state(), TrialState::WaitingForNpStart);

    // The withdrawal cancelled the zero-length timer; its expiry is stale.
    std::thread::sleep(Duration::from_millis(30));
    dispatcher.drain(&mut machine).unwrap();
    assert_eq!(machine.trial_state(), TrialState::WaitingForNpStart);
    let events: Vec<Event> = sink.events().into_iter().map(|(e, _)| e).collect();
    assert_eq!(events, vec![Event::NpStart, Event::NpEnd]);
}
