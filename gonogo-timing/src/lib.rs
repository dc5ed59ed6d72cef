pub mod clock;
pub mod timer;

pub use clock::{Clock, ManualClock, SampleClock};
pub use timer::{
    validate_duration, ArmedTimer, ManualTimer, PhaseTimer, TimerService, TimerStats, TimerTarget,
};
