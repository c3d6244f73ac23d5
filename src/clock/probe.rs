//! Monotonic real-time sources used for accrual.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

/// Supplies elapsed real time between two sampling points.
///
/// The clock never reads absolute real time; it only asks how many
/// milliseconds passed since a marker it sampled earlier.
pub trait RealTimeProbe {
    type Marker;

    fn sample(&self) -> Self::Marker;

    /// Milliseconds elapsed since `since`, with sub-millisecond precision.
    fn elapsed_ms(&self, since: &Self::Marker) -> f64;
}

/// Probe backed by `std::time::Instant`.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstantProbe;

impl RealTimeProbe for InstantProbe {
    type Marker = Instant;

    fn sample(&self) -> Instant {
        Instant::now()
    }

    fn elapsed_ms(&self, since: &Instant) -> f64 {
        since.elapsed().as_secs_f64() * 1_000.0
    }
}

/// Hand-driven probe. Clones share the same counter, so a test can keep one
/// handle and advance the real time a clock observes.
#[derive(Debug, Clone, Default)]
pub struct ManualProbe {
    elapsed_ms: Rc<Cell<f64>>,
}

impl ManualProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lets `ms` of real time pass.
    pub fn advance(&self, ms: f64) {
        assert!(ms >= 0.0, "real time cannot move backwards");
        self.elapsed_ms.set(self.elapsed_ms.get() + ms);
    }

    /// Total real time elapsed since creation, in ms.
    pub fn elapsed(&self) -> f64 {
        self.elapsed_ms.get()
    }
}

impl RealTimeProbe for ManualProbe {
    type Marker = f64;

    fn sample(&self) -> f64 {
        self.elapsed_ms.get()
    }

    fn elapsed_ms(&self, since: &f64) -> f64 {
        self.elapsed_ms.get() - since
    }
}
