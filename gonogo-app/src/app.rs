use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use flume::RecvTimeoutError;
use gonogo_core::TrialScore;
use gonogo_experiment::{DataSink, ExperimentConfig, TrialStateMachine, channel};
use gonogo_timing::{SampleClock, TimerService};
use tracing::{info, warn};

use crate::Args;
use crate::recorder::{JsonLinesRecorder, TrialSummary};
use crate::subject::{CueActuator, SimulatedSubject, SubjectProfile};

pub struct App {
    config: ExperimentConfig,
    trials: u64,
    seed: u64,
    output: Option<PathBuf>,
}

impl App {
    pub fn new(args: Args) -> Result<Self> {
        let config = match &args.config {
            Some(path) => ExperimentConfig::load(path)?,
            None => ExperimentConfig::default(),
        };

        let seed = match args.seed.or(config.seed) {
            Some(seed) => seed,
            None => {
                let seed = rand::random::<u64>();
                info!(seed, "no seed configured, drew one (pass --seed {seed} to replay)");
                seed
            }
        };

        Ok(Self {
            config,
            trials: args.trials,
            seed,
            output: args.output,
        })
    }

    pub fn run(self) -> Result<()> {
        info!(
            platform = std::env::consts::OS,
            arch = std::env::consts::ARCH,
            trials = self.trials,
            seed = self.seed,
            "starting go/nogo session"
        );

        let clock = Arc::new(SampleClock::new(self.config.sample_rate));
        let (handle, dispatcher) = channel(clock);
        let timer = TimerService::new(Arc::new(handle.clone()))
            .context("failed to start phase timer")?;
        let context = self.config.parameter_store()?;

        let (progress_tx, progress_rx) = flume::unbounded();
        let recorder = match &self.output {
            Some(path) => JsonLinesRecorder::create(path)?,
            None => JsonLinesRecorder::new(std::io::stdout()),
        };
        let sink: Box<dyn DataSink> = Box::new(recorder.with_progress(progress_tx));

        let (cue_tx, cue_rx) = flume::unbounded();
        let machine = TrialStateMachine::new(
            context,
            timer,
            sink,
            Box::new(CueActuator::new(cue_tx)),
            self.seed,
        );
        let worker = dispatcher
            .spawn(machine)
            .context("failed to start dispatch thread")?;
        handle.start_experiment()?;

        let (stop_tx, stop_rx) = flume::bounded(1);
        let subject = SimulatedSubject::new(
            handle.clone(),
            cue_rx,
            SubjectProfile::default(),
            &self.config.parameters,
            self.seed.wrapping_add(1),
        )
        .spawn(stop_rx)
        .context("failed to start simulated subject")?;

        let mut tally: BTreeMap<&'static str, u64> = BTreeMap::new();
        let mut completed = 0;
        while completed < self.trials {
            match progress_rx.recv_timeout(Duration::from_millis(250)) {
                Ok(TrialSummary { trial, score }) => {
                    completed += 1;
                    let code = score.map_or("none", |s| s.code());
                    *tally.entry(code).or_default() += 1;
                    info!(trial, score = code, "{completed}/{} trials", self.trials);
                }
                Err(RecvTimeoutError::Timeout) if worker.is_finished() => break,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        // Both sends fail only if the dispatch thread already halted.
        let _ = handle.stop_experiment();
        let _ = handle.shutdown();
        let _ = stop_tx.send(());
        if subject.join().is_err() {
            warn!("simulated subject panicked");
        }
        let (machine, outcome) = worker
            .join()
            .map_err(|_| anyhow::anyhow!("dispatch thread panicked"))?;

        let stats = machine.timer().stats();
        let correct: u64 = tally
            .iter()
            .filter(|(code, _)| TrialScore::from_code(code).is_some_and(|s| s.is_correct()))
            .map(|(_, n)| n)
            .sum();
        info!(
            completed,
            correct,
            scores = ?tally,
            sink_failures = machine.sink_failures(),
            "session complete"
        );
        info!(
            fired = stats.fired,
            discarded = stats.discarded,
            mean_lateness_us = stats.mean_lateness_ns / 1e3,
            jitter_us = stats.jitter_ns / 1e3,
            "phase timer"
        );
        drop(machine);

        outcome.context("experiment halted")?;
        Ok(())
    }
}
