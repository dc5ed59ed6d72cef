use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use flume::{Receiver, RecvTimeoutError, Sender};
use gonogo_core::{Event, GoNogoError, Result};
use tracing::{debug, trace, warn};

/// Receives the synthetic "duration elapsed" events of a phase timer.
pub trait TimerTarget: Send + Sync + 'static {
    fn timer_elapsed(&self, event: Event, generation: u64);
}

/// Single-shot, cancelable trial-phase timer. At most one timer is armed:
/// `start` replaces whatever was pending.
pub trait PhaseTimer: Send {
    /// Arms the timer and returns the generation its expiry will carry.
    fn start(&mut self, duration_s: f64, event: Event) -> Result<u64>;
    fn stop(&mut self);
    /// Whether an expiry tagged with `generation` is still wanted.
    fn is_current(&self, generation: u64) -> bool;
}

pub fn validate_duration(duration_s: f64) -> Result<Duration> {
    if duration_s < 0.0 {
        return Err(GoNogoError::InvalidDuration(duration_s));
    }
    Duration::try_from_secs_f64(duration_s).map_err(|_| GoNogoError::InvalidDuration(duration_s))
}

#[derive(Debug, Clone, Copy)]
struct Arming {
    generation: u64,
    deadline: Instant,
    event: Event,
}

enum TimerCommand {
    Arm(Arming),
    Disarm,
    Shutdown,
}

/// Lateness of timer expiries relative to their deadline.
#[derive(Debug, Clone, Default)]
pub struct TimerStats {
    pub fired: u64,
    pub discarded: u64,
    pub mean_lateness_ns: f64,
    pub jitter_ns: f64,
    pub min_lateness_ns: f64,
    pub max_lateness_ns: f64,
}

#[derive(Debug)]
struct LatencyLog {
    lateness: Vec<Duration>,
    max_samples: usize,
    fired: u64,
    discarded: u64,
}

impl LatencyLog {
    fn new(max_samples: usize) -> Self {
        Self {
            lateness: Vec::with_capacity(max_samples),
            max_samples,
            fired: 0,
            discarded: 0,
        }
    }

    fn record(&mut self, d: Duration) {
        if self.lateness.len() >= self.max_samples {
            self.lateness.remove(0);
        }
        self.lateness.push(d);
        self.fired += 1;
    }

    fn stats(&self) -> TimerStats {
        let times: Vec<f64> = self.lateness.iter().map(|d| d.as_nanos() as f64).collect();
        if times.is_empty() {
            return TimerStats {
                fired: self.fired,
                discarded: self.discarded,
                ..TimerStats::default()
            };
        }
        let avg = times.iter().sum::<f64>() / times.len() as f64;
        let var = times.iter().map(|x| (x - avg).powi(2)).sum::<f64>() / times.len() as f64;
        TimerStats {
            fired: self.fired,
            discarded: self.discarded,
            mean_lateness_ns: avg,
            jitter_ns: var.sqrt(),
            min_lateness_ns: times.iter().copied().fold(f64::INFINITY, f64::min),
            max_lateness_ns: times.iter().copied().fold(0.0, f64::max),
        }
    }
}

/// Phase timer backed by a dedicated worker thread.
///
/// Each `start` bumps a generation counter; an expiry is only forwarded when
/// its generation is still the current one, so a timer replaced or stopped
/// after its deadline passed never reaches the target. The worker hands the
/// event to the target and returns, which means even a zero duration fires
/// after the caller's current event handling has finished.
pub struct TimerService {
    generation: Arc<AtomicU64>,
    tx: Sender<TimerCommand>,
    worker: Option<JoinHandle<()>>,
    log: Arc<Mutex<LatencyLog>>,
}

impl TimerService {
    pub fn new(target: Arc<dyn TimerTarget>) -> std::io::Result<Self> {
        let (tx, rx) = flume::unbounded();
        let generation = Arc::new(AtomicU64::new(0));
        let log = Arc::new(Mutex::new(LatencyLog::new(1000)));

        let worker = {
            let generation = Arc::clone(&generation);
            let log = Arc::clone(&log);
            std::thread::Builder::new()
                .name("phase-timer".into())
                .spawn(move || run_worker(rx, target, generation, log))?
        };

        Ok(Self {
            generation,
            tx,
            worker: Some(worker),
            log,
        })
    }

    pub fn stats(&self) -> TimerStats {
        match self.log.lock() {
            Ok(log) => log.stats(),
            Err(poisoned) => poisoned.into_inner().stats(),
        }
    }
}

impl PhaseTimer for TimerService {
    fn start(&mut self, duration_s: f64, event: Event) -> Result<u64> {
        let duration = validate_duration(duration_s)?;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(%event, duration_s, generation, "arming phase timer");
        self.tx
            .send(TimerCommand::Arm(Arming {
                generation,
                deadline: Instant::now() + duration,
                event,
            }))
            .map_err(|_| GoNogoError::TimerStopped)?;
        Ok(generation)
    }

    fn stop(&mut self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        trace!(generation, "phase timer stopped");
        let _ = self.tx.send(TimerCommand::Disarm);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let _ = self.tx.send(TimerCommand::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("phase timer worker panicked");
            }
        }
    }
}

fn run_worker(
    rx: Receiver<TimerCommand>,
    target: Arc<dyn TimerTarget>,
    generation: Arc<AtomicU64>,
    log: Arc<Mutex<LatencyLog>>,
) {
    let mut pending: Option<Arming> = None;
    loop {
        let command = match pending {
            Some(arming) => match rx.recv_deadline(arming.deadline) {
                Ok(command) => Some(command),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => return,
            },
            None => match rx.recv() {
                Ok(command) => Some(command),
                Err(_) => return,
            },
        };

        match command {
            Some(TimerCommand::Arm(arming)) => pending = Some(arming),
            Some(TimerCommand::Disarm) => pending = None,
            Some(TimerCommand::Shutdown) => return,
            None => {
                let Some(arming) = pending.take() else {
                    continue;
                };
                let current = generation.load(Ordering::SeqCst) == arming.generation;
                let mut log = match log.lock() {
                    Ok(log) => log,
                    Err(poisoned) => poisoned.into_inner(),
                };
                if current {
                    log.record(Instant::now().saturating_duration_since(arming.deadline));
                    drop(log);
                    trace!(event = %arming.event, generation = arming.generation, "phase timer fired");
                    target.timer_elapsed(arming.event, arming.generation);
                } else {
                    log.discarded += 1;
                    trace!(generation = arming.generation, "discarding stale timer");
                }
            }
        }
    }
}

/// Armed timer as seen by [`ManualTimer`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArmedTimer {
    pub duration: f64,
    pub event: Event,
    pub generation: u64,
}

/// Timer that never fires on its own. Tests (and replays) inspect what is
/// armed and expire it explicitly.
#[derive(Debug, Default)]
pub struct ManualTimer {
    generation: u64,
    armed: Option<ArmedTimer>,
    history: Vec<ArmedTimer>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn armed(&self) -> Option<&ArmedTimer> {
        self.armed.as_ref()
    }

    /// Every timer ever armed, oldest first.
    pub fn history(&self) -> &[ArmedTimer] {
        &self.history
    }

    /// Disarms the pending timer and returns it so the caller can deliver
    /// its event.
    pub fn expire(&mut self) -> Option<ArmedTimer> {
        self.armed.take()
    }
}

impl PhaseTimer for ManualTimer {
    fn start(&mut self, duration_s: f64, event: Event) -> Result<u64> {
        validate_duration(duration_s)?;
        self.generation += 1;
        let armed = ArmedTimer {
            duration: duration_s,
            event,
            generation: self.generation,
        };
        self.armed = Some(armed);
        self.history.push(armed);
        Ok(self.generation)
    }

    fn stop(&mut self) {
        self.generation += 1;
        self.armed = None;
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_and_nan_durations_are_rejected() {
        assert_eq!(
            validate_duration(-0.5).unwrap_err(),
            GoNogoError::InvalidDuration(-0.5)
        );
        assert!(validate_duration(f64::NAN).is_err());
        assert!(validate_duration(f64::INFINITY).is_err());
        assert_eq!(validate_duration(0.0).unwrap(), Duration::ZERO);
    }

    #[test]
    fn manual_timer_replaces_pending_timer() {
        let mut timer = ManualTimer::new();
        let first = timer.start(1.0, Event::ToDurationElapsed).unwrap();
        let second = timer.start(1.0, Event::ToDurationElapsed).unwrap();
        assert!(!timer.is_current(first));
        assert!(timer.is_current(second));
        assert_eq!(timer.armed().map(|a| a.generation), Some(second));
        assert_eq!(timer.history().len(), 2);
    }

    #[test]
    fn manual_timer_stop_twice_leaves_nothing_armed() {
        let mut timer = ManualTimer::new();
        let generation = timer.start(0.2, Event::HoldDurationElapsed).unwrap();
        timer.stop();
        timer.stop();
        assert!(timer.armed().is_none());
        assert!(!timer.is_current(generation));
    }

    #[test]
    fn manual_timer_rejects_negative_without_disturbing_armed() {
        let mut timer = ManualTimer::new();
        let generation = timer.start(0.2, Event::HoldDurationElapsed).unwrap();
        assert!(timer.start(-1.0, Event::ItiDurationElapsed).is_err());
        assert!(timer.is_current(generation));
        assert_eq!(timer.armed().map(|a| a.event), Some(Event::HoldDurationElapsed));
    }

    #[test]
    fn stats_of_empty_log_are_zero() {
        let log = LatencyLog::new(4);
        let stats = log.stats();
        assert_eq!(stats.fired, 0);
        assert_eq!(stats.mean_lateness_ns, 0.0);
    }

    #[test]
    fn stats_keep_a_bounded_window() {
        let mut log = LatencyLog::new(2);
        log.record(Duration::from_nanos(100));
        log.record(Duration::from_nanos(200));
        log.record(Duration::from_nanos(400));
        let stats = log.stats();
        assert_eq!(stats.fired, 3);
        assert_eq!(stats.mean_lateness_ns, 300.0);
        assert_eq!(stats.min_lateness_ns, 200.0);
        assert_eq!(stats.max_lateness_ns, 400.0);
        assert_eq!(stats.jitter_ns, 100.0);
    }
}
