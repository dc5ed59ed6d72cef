//! Event queue feeding the trial state machine.
//!
//! Hardware callbacks, timer threads and operator controls may submit from
//! any thread. Everything lands in one FIFO channel that a single consumer
//! drains, so the handler sees one command at a time, in arrival order, on
//! the consumer's thread.

use std::sync::Arc;
use std::thread::JoinHandle;

use flume::{Receiver, Sender, TryRecvError};
use gonogo_core::{Edge, Event, GoNogoError, Result, event_for_edge};
use gonogo_timing::{Clock, TimerTarget};
use tracing::{debug, error, trace, warn};

/// An event with the time it happened. Timer expiries also carry the
/// generation of the timer that produced them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    pub event: Event,
    pub timestamp: f64,
    pub timer_generation: Option<u64>,
}

impl Envelope {
    pub fn new(event: Event, timestamp: f64) -> Self {
        Self {
            event,
            timestamp,
            timer_generation: None,
        }
    }

    pub fn from_timer(event: Event, timestamp: f64, generation: u64) -> Self {
        Self {
            event,
            timestamp,
            timer_generation: Some(generation),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Deliver(Envelope),
    Start,
    Pause,
    Resume,
    ApplyChanges,
    Remind,
    Stop,
    Shutdown,
}

/// Consumer side of the queue.
pub trait EventHandler {
    fn handle(&mut self, command: Command) -> Result<()>;
    /// Called once with the error that ends the session.
    fn halt(&mut self, error: &GoNogoError);
}

/// Producer side. Cheap to clone; hand one to every callback source.
#[derive(Clone)]
pub struct DispatchHandle {
    tx: Sender<Command>,
    clock: Arc<dyn Clock>,
}

impl DispatchHandle {
    /// Submits an event by tag. Without a timestamp the clock is read now,
    /// at submission, not when the event is eventually processed.
    pub fn submit(&self, tag: &str, timestamp: Option<f64>) -> Result<()> {
        let event = tag.parse::<Event>().inspect_err(|e| {
            warn!(target: "gonogo::input", error = %e, "rejecting event");
        })?;
        self.submit_event(event, timestamp)
    }

    pub fn submit_event(&self, event: Event, timestamp: Option<f64>) -> Result<()> {
        let timestamp = timestamp.unwrap_or_else(|| self.clock.get_timestamp());
        debug!(target: "gonogo::input", %event, timestamp, "received event");
        self.send(Command::Deliver(Envelope::new(event, timestamp)))
    }

    /// Entry point for digital-line edge callbacks.
    pub fn submit_edge(&self, edge: Edge, line: &str, timestamp: Option<f64>) -> Result<()> {
        let event = event_for_edge(edge, line).inspect_err(|e| {
            warn!(target: "gonogo::input", error = %e, "rejecting edge");
        })?;
        trace!(target: "gonogo::input", ?edge, line, "detected edge");
        self.submit_event(event, timestamp)
    }

    pub fn start_experiment(&self) -> Result<()> {
        self.send(Command::Start)
    }

    pub fn request_pause(&self) -> Result<()> {
        self.send(Command::Pause)
    }

    pub fn request_resume(&self) -> Result<()> {
        self.send(Command::Resume)
    }

    pub fn request_apply_changes(&self) -> Result<()> {
        self.send(Command::ApplyChanges)
    }

    pub fn request_remind(&self) -> Result<()> {
        self.send(Command::Remind)
    }

    pub fn stop_experiment(&self) -> Result<()> {
        self.send(Command::Stop)
    }

    /// Stops the consumer loop once everything queued before it is handled.
    pub fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| GoNogoError::DispatcherClosed)
    }
}

impl TimerTarget for DispatchHandle {
    fn timer_elapsed(&self, event: Event, generation: u64) {
        let timestamp = self.clock.get_timestamp();
        if self
            .send(Command::Deliver(Envelope::from_timer(event, timestamp, generation)))
            .is_err()
        {
            debug!(%event, "dispatcher closed, dropping timer expiry");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

pub struct Dispatcher {
    rx: Receiver<Command>,
}

/// Creates a connected producer handle and consumer.
pub fn channel(clock: Arc<dyn Clock>) -> (DispatchHandle, Dispatcher) {
    let (tx, rx) = flume::unbounded();
    (DispatchHandle { tx, clock }, Dispatcher { rx })
}

impl Dispatcher {
    /// Commands waiting to be delivered.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Delivers commands until `Shutdown` or until the handler reports a
    /// fatal error. A handler that owns a `TimerService` keeps a handle
    /// alive itself, so in practice only those two end the loop.
    pub fn run<H: EventHandler>(&self, handler: &mut H) -> Result<()> {
        while let Ok(command) = self.rx.recv() {
            if self.deliver(handler, command)? == Flow::Exit {
                break;
            }
        }
        Ok(())
    }

    /// Delivers whatever is queued right now without blocking and returns
    /// how many commands were handled.
    pub fn drain<H: EventHandler>(&self, handler: &mut H) -> Result<usize> {
        let mut delivered = 0;
        loop {
            match self.rx.try_recv() {
                Ok(command) => {
                    delivered += 1;
                    if self.deliver(handler, command)? == Flow::Exit {
                        return Ok(delivered);
                    }
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {
                    return Ok(delivered);
                }
            }
        }
    }

    /// Moves the handler onto a dedicated processing thread. Joining yields
    /// the handler back together with the outcome of the run.
    pub fn spawn<H>(self, mut handler: H) -> std::io::Result<JoinHandle<(H, Result<()>)>>
    where
        H: EventHandler + Send + 'static,
    {
        std::thread::Builder::new()
            .name("trial-dispatch".into())
            .spawn(move || {
                let outcome = self.run(&mut handler);
                (handler, outcome)
            })
    }

    fn deliver<H: EventHandler>(&self, handler: &mut H, command: Command) -> Result<Flow> {
        trace!(
            thread = std::thread::current().name().unwrap_or("unnamed"),
            ?command,
            "delivering"
        );
        if command == Command::Shutdown {
            debug!("dispatcher shutting down");
            return Ok(Flow::Exit);
        }
        match handler.handle(command) {
            Ok(()) => Ok(Flow::Continue),
            Err(e) if e.is_fatal() => {
                error!(error = %e, "halting experiment");
                handler.halt(&e);
                Err(e)
            }
            Err(e) => {
                warn!(error = %e, "command failed");
                Ok(Flow::Continue)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gonogo_timing::ManualClock;

    #[derive(Default)]
    struct Collect {
        seen: Vec<Command>,
        halted: Option<GoNogoError>,
        fail_on: Option<Event>,
    }

    impl EventHandler for Collect {
        fn handle(&mut self, command: Command) -> Result<()> {
            if let Command::Deliver(envelope) = &command {
                if Some(envelope.event) == self.fail_on {
                    return Err(GoNogoError::InvalidDuration(-1.0));
                }
            }
            self.seen.push(command);
            Ok(())
        }

        fn halt(&mut self, error: &GoNogoError) {
            self.halted = Some(error.clone());
        }
    }

    fn delivered(handler: &Collect) -> Vec<(Event, f64)> {
        handler
            .seen
            .iter()
            .filter_map(|c| match c {
                Command::Deliver(e) => Some((e.event, e.timestamp)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn stamps_missing_timestamps_at_submission() {
        let clock = ManualClock::new(10.0);
        let (handle, dispatcher) = channel(Arc::new(clock.clone()));
        handle.submit("np_start", None).unwrap();
        clock.set(99.0);
        handle.submit("np_end", Some(12.5)).unwrap();

        let mut handler = Collect::default();
        assert_eq!(dispatcher.drain(&mut handler).unwrap(), 2);
        assert_eq!(
            delivered(&handler),
            vec![(Event::NpStart, 10.0), (Event::NpEnd, 12.5)]
        );
    }

    #[test]
    fn unknown_tag_is_rejected_before_queueing() {
        let (handle, dispatcher) = channel(Arc::new(ManualClock::default()));
        assert_eq!(
            handle.submit("lever_press", None).unwrap_err(),
            GoNogoError::InvalidEvent("lever_press".into())
        );
        assert_eq!(dispatcher.pending(), 0);
    }

    #[test]
    fn edges_are_translated() {
        let (handle, dispatcher) = channel(Arc::new(ManualClock::default()));
        handle.submit_edge(Edge::Rising, "reward_contact", Some(1.0)).unwrap();
        assert!(handle.submit_edge(Edge::Rising, "light", Some(1.0)).is_err());
        let mut handler = Collect::default();
        dispatcher.drain(&mut handler).unwrap();
        assert_eq!(delivered(&handler), vec![(Event::RewardStart, 1.0)]);
    }

    #[test]
    fn shutdown_stops_delivery() {
        let (handle, dispatcher) = channel(Arc::new(ManualClock::default()));
        handle.submit("np_start", Some(1.0)).unwrap();
        handle.shutdown().unwrap();
        handle.submit("np_end", Some(2.0)).unwrap();
        let mut handler = Collect::default();
        dispatcher.run(&mut handler).unwrap();
        assert_eq!(delivered(&handler), vec![(Event::NpStart, 1.0)]);
        assert_eq!(dispatcher.pending(), 1);
    }

    #[test]
    fn fatal_error_halts_and_surfaces() {
        let (handle, dispatcher) = channel(Arc::new(ManualClock::default()));
        handle.submit("np_start", Some(1.0)).unwrap();
        handle.submit("np_end", Some(2.0)).unwrap();
        let mut handler = Collect {
            fail_on: Some(Event::NpStart),
            ..Collect::default()
        };
        let err = dispatcher.run(&mut handler).unwrap_err();
        assert_eq!(err, GoNogoError::InvalidDuration(-1.0));
        assert_eq!(handler.halted, Some(err));
        assert!(handler.seen.is_empty());
    }

    #[test]
    fn per_producer_order_is_preserved_across_threads() {
        let (handle, dispatcher) = channel(Arc::new(ManualClock::default()));
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let handle = handle.clone();
                std::thread::spawn(move || {
                    for i in 0..250 {
                        handle
                            .submit_event(Event::NpStart, Some((p * 1000 + i) as f64))
                            .unwrap();
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }
        drop(handle);

        let mut handler = Collect::default();
        dispatcher.run(&mut handler).unwrap();
        let stamps: Vec<f64> = delivered(&handler).into_iter().map(|(_, t)| t).collect();
        assert_eq!(stamps.len(), 1000);
        for p in 0..4 {
            let own: Vec<f64> = stamps
                .iter()
                .copied()
                .filter(|t| (*t as usize) / 1000 == p)
                .collect();
            let mut sorted = own.clone();
            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
            assert_eq!(own, sorted);
        }
    }
}
