//! Virtual clock and its timer scheduling engine.

mod config;
mod deferrer;
mod error;
mod probe;
mod queue;
mod simulator;
mod timer;

pub use config::{ClockConfig, DroppedCyclePolicy};
pub use deferrer::{Deferrer, ManualDeferrer, ManualHandle, TokioDeferrer};
pub use error::ClockError;
pub use probe::{InstantProbe, ManualProbe, RealTimeProbe};
pub use simulator::{VirtualClock, WeakClock};
pub use timer::TimerId;
