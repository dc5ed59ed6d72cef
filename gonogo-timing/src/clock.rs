use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Monotonic time source, in acquisition sample-clock units.
pub trait Clock: Send + Sync {
    fn get_timestamp(&self) -> f64;
}

/// Counts samples of a free-running acquisition clock from the moment it
/// was created.
#[derive(Debug, Clone)]
pub struct SampleClock {
    start: Instant,
    sample_rate: f64,
}

impl SampleClock {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            start: Instant::now(),
            sample_rate,
        }
    }
}

impl Default for SampleClock {
    fn default() -> Self {
        Self::new(100_000.0)
    }
}

impl Clock for SampleClock {
    fn get_timestamp(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * self.sample_rate
    }
}

/// Clock that only moves when told to. Clones share the same reading.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    bits: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            bits: Arc::new(AtomicU64::new(start.to_bits())),
        }
    }

    pub fn set(&self, timestamp: f64) {
        self.bits.store(timestamp.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, delta: f64) {
        let _ = self
            .bits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |bits| {
                Some((f64::from_bits(bits) + delta).to_bits())
            });
    }
}

impl Clock for ManualClock {
    fn get_timestamp(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn sample_clock_is_monotonic() {
        let clock = SampleClock::new(1000.0);
        let a = clock.get_timestamp();
        std::thread::sleep(Duration::from_millis(5));
        let b = clock.get_timestamp();
        assert!(b > a);
        assert!(b >= 5.0);
    }

    #[test]
    fn manual_clock_shared_between_clones() {
        let clock = ManualClock::new(1.0);
        let other = clock.clone();
        other.advance(0.5);
        assert_eq!(clock.get_timestamp(), 1.5);
        clock.set(10.0);
        assert_eq!(other.get_timestamp(), 10.0);
    }
}
