//! Deterministic virtual time for testing time-dependent code.
//!
//! A [`VirtualClock`] owns a simulated millisecond clock and a queue of
//! timers. It drives the queue with a single real deferred callback at a
//! time, so scheduling a timer 100 seconds out fires it on the next host
//! turn while the clock jumps forward to the timer's due time.
//!
//! The [`ambient`] module installs a clock as the thread's time source for
//! code that reads time and schedules timers through free functions.

pub mod ambient;
pub mod clock;

pub use clock::{
    ClockConfig, ClockError, Deferrer, DroppedCyclePolicy, InstantProbe, ManualDeferrer,
    ManualProbe, RealTimeProbe, TimerId, TokioDeferrer, VirtualClock, WeakClock,
};
