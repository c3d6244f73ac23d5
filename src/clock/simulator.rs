//! Virtual clock driving a software timer queue from one real deferred callback.
//!
//! ## Time domains
//!
//! | Quantity      | Unit | Description                                           |
//! |---------------|------|-------------------------------------------------------|
//! | virtual time  | ms   | What `now()` returns; never moves backwards           |
//! | real elapsed  | ms   | Measured by the probe between two reads of `now()`    |
//! | delay/period  | ms   | Added to virtual time to compute a timer's due time   |
//!
//! When accrual is on, every `now()` adds the real time elapsed since the
//! previous read, rounded to whole milliseconds. Processing a timer jumps
//! virtual time straight to its due time.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use log::{debug, trace, warn};

use super::config::{ClockConfig, DroppedCyclePolicy};
use super::deferrer::{Deferrer, TokioDeferrer};
use super::error::ClockError;
use super::probe::{InstantProbe, RealTimeProbe};
use super::queue::TimerQueue;
use super::timer::{RecurringCallback, Timer, TimerId, TimerKind};

/// Deterministic stand-in for wall-clock time and timers.
///
/// Cloning yields another handle to the same clock. A clock is tied to the
/// thread that created it, and dropping its last handle releases the armed
/// host callback.
///
/// Timer callbacks that schedule or cancel further timers should capture a
/// [`WeakClock`] from [`VirtualClock::downgrade`]. A strong clone captured by
/// a queued callback keeps the clock alive until that timer fires or is
/// cancelled, so a recurring timer holding one runs until it is cancelled.
///
/// Timers fire one per host turn, in ascending due-time order, with ties
/// broken by registration order.
pub struct VirtualClock<D: Deferrer = TokioDeferrer, P: RealTimeProbe = InstantProbe> {
    inner: Rc<Inner<D, P>>,
}

/// Non-owning handle to a [`VirtualClock`], for capture in timer callbacks.
pub struct WeakClock<D: Deferrer = TokioDeferrer, P: RealTimeProbe = InstantProbe> {
    inner: Weak<Inner<D, P>>,
}

struct Inner<D: Deferrer, P: RealTimeProbe> {
    state: RefCell<ClockState<D::Handle, P::Marker>>,
    deferrer: D,
    probe: P,
    accrue_real_time: bool,
    dropped_cycle_policy: DroppedCyclePolicy,
}

struct ClockState<H, M> {
    /// Authoritative virtual time in ms
    current_time: u64,
    /// Probe sample taken when `current_time` was last set or read
    real_time_anchor: M,
    queue: TimerQueue,
    /// The one armed host callback, if any
    pending: Option<H>,
    next_timer_id: u64,
    /// Set while a timer callback is running
    firing: bool,
}

enum Invocation {
    Once(Box<dyn FnOnce()>),
    Recurring(RecurringCallback),
}

impl VirtualClock {
    /// Creates a clock driven by tokio tasks on the current `LocalSet` and
    /// measuring real time with `Instant`.
    pub fn new(config: &ClockConfig) -> Self {
        Self::with_parts(config, TokioDeferrer, InstantProbe)
    }
}

impl<D, P> VirtualClock<D, P>
where
    D: Deferrer + 'static,
    P: RealTimeProbe + 'static,
{
    /// Creates a clock with an explicit host deferrer and real-time probe.
    pub fn with_parts(config: &ClockConfig, deferrer: D, probe: P) -> Self {
        let real_time_anchor = probe.sample();
        debug!(
            "Virtual clock created at {}ms (accrue_real_time={}, dropped_cycle_policy={:?})",
            config.time, config.accrue_real_time, config.dropped_cycle_policy
        );
        Self {
            inner: Rc::new(Inner {
                state: RefCell::new(ClockState {
                    current_time: config.time,
                    real_time_anchor,
                    queue: TimerQueue::new(),
                    pending: None,
                    next_timer_id: 0,
                    firing: false,
                }),
                deferrer,
                probe,
                accrue_real_time: config.accrue_real_time,
                dropped_cycle_policy: config.dropped_cycle_policy,
            }),
        }
    }

    /// Returns current virtual time in ms.
    ///
    /// With accrual on this is not idempotent: each read folds the real time
    /// elapsed since the previous read into the clock.
    pub fn now(&self) -> u64 {
        let mut state = self.inner.state.borrow_mut();
        self.inner.accrue(&mut state)
    }

    /// Schedules `callback` to run once, `delay` ms of virtual time from now.
    ///
    /// A zero delay fires on the next processing pass, never synchronously.
    pub fn schedule_once<F>(&self, callback: F, delay: u64) -> Result<TimerId, ClockError>
    where
        F: FnOnce() + 'static,
    {
        self.inner.admit(TimerKind::Once(Box::new(callback)), delay)
    }

    /// Schedules `callback` to run every `period` ms of virtual time, first
    /// one period from now.
    pub fn schedule_recurring<F>(&self, callback: F, period: u64) -> Result<TimerId, ClockError>
    where
        F: FnMut() + 'static,
    {
        if period == 0 {
            return Err(ClockError::ZeroPeriod);
        }
        let callback: RecurringCallback = Rc::new(RefCell::new(callback));
        self.inner
            .admit(TimerKind::Recurring { period, callback }, period)
    }

    /// Cancels a timer. Unknown, fired or already cancelled ids are ignored.
    ///
    /// Cancelling the last pending timer releases the armed host callback.
    pub fn cancel(&self, id: TimerId) {
        let released = {
            let mut state = self.inner.state.borrow_mut();
            if state.queue.remove(id) > 0 {
                debug!("Cancelled {id}");
            }
            if state.queue.is_empty() {
                state.pending.take()
            } else {
                None
            }
        };
        if let Some(handle) = released {
            debug!("Timer queue empty, releasing host callback");
            self.inner.deferrer.cancel(handle);
        }
    }

    /// Number of timers waiting to fire.
    pub fn pending_timers(&self) -> usize {
        self.inner.state.borrow().queue.len()
    }

    /// Due time of the timer that fires next.
    pub fn next_due_time(&self) -> Option<u64> {
        self.inner.state.borrow().queue.peek_due_time()
    }

    /// Returns true when no host callback is armed.
    pub fn is_idle(&self) -> bool {
        self.inner.state.borrow().pending.is_none()
    }

    /// Creates a handle that does not keep the clock alive.
    pub fn downgrade(&self) -> WeakClock<D, P> {
        WeakClock {
            inner: Rc::downgrade(&self.inner),
        }
    }
}

impl<D: Deferrer, P: RealTimeProbe> WeakClock<D, P> {
    /// Returns the clock, or `None` once every `VirtualClock` handle is gone.
    pub fn upgrade(&self) -> Option<VirtualClock<D, P>> {
        self.inner.upgrade().map(|inner| VirtualClock { inner })
    }
}

impl<D, P> Inner<D, P>
where
    D: Deferrer + 'static,
    P: RealTimeProbe + 'static,
{
    fn accrue(&self, state: &mut ClockState<D::Handle, P::Marker>) -> u64 {
        if self.accrue_real_time {
            let elapsed_ms = self.probe.elapsed_ms(&state.real_time_anchor);
            state.real_time_anchor = self.probe.sample();
            // Whole-unit rounding; `as` saturates negative drift to zero.
            state.current_time = state
                .current_time
                .saturating_add(elapsed_ms.round() as u64);
        }
        state.current_time
    }

    fn set_now(&self, state: &mut ClockState<D::Handle, P::Marker>, time: u64) {
        state.current_time = time;
        state.real_time_anchor = self.probe.sample();
    }

    fn admit(self: &Rc<Self>, kind: TimerKind, delay: u64) -> Result<TimerId, ClockError> {
        let id = {
            let mut state = self.state.borrow_mut();
            let now = self.accrue(&mut state);
            let due_time = now
                .checked_add(delay)
                .ok_or(ClockError::DueTimeOverflow { now, delay })?;
            state.next_timer_id += 1;
            let id = TimerId::from_raw(state.next_timer_id);
            let timer = Timer { id, due_time, kind };
            trace!("Admitted {timer:?} at {now}ms");
            state.queue.insert(timer);
            id
        };
        self.arm();
        Ok(id)
    }

    /// Arms the host callback unless one is armed already or there is no work.
    fn arm(self: &Rc<Self>) {
        let mut state = self.state.borrow_mut();
        if state.pending.is_some() || state.queue.is_empty() {
            return;
        }
        let clock: Weak<Self> = Rc::downgrade(self);
        let handle = self.deferrer.defer(Box::new(move || {
            if let Some(clock) = clock.upgrade() {
                clock.process_next();
            }
        }));
        state.pending = Some(handle);
    }

    /// Fires the earliest due timer. Runs once per armed host callback.
    fn process_next(self: &Rc<Self>) {
        let invocation = {
            let mut state = self.state.borrow_mut();
            state.pending = None;
            if state.firing {
                // Driven from inside a callback; the outer step re-arms.
                warn!("Timer processing re-entered from a timer callback, deferring");
                return;
            }
            let Some(timer) = state.queue.pop_earliest() else {
                return;
            };
            let fire_time = state.current_time.max(timer.due_time);
            self.set_now(&mut state, fire_time);
            trace!("Firing {timer:?} at {fire_time}ms");

            let invocation = match timer.kind {
                TimerKind::Once(callback) => Invocation::Once(callback),
                TimerKind::Recurring { period, callback } => {
                    let due_time = self.next_occurrence(&mut state, timer.due_time, period);
                    state.queue.insert(Timer {
                        id: timer.id,
                        due_time,
                        kind: TimerKind::Recurring {
                            period,
                            callback: callback.clone(),
                        },
                    });
                    Invocation::Recurring(callback)
                }
            };
            state.firing = true;
            invocation
        };

        // Clears `firing` and re-arms even if the callback panics.
        let _step = StepGuard { clock: self };
        match invocation {
            Invocation::Once(callback) => callback(),
            Invocation::Recurring(callback) => (&mut *callback.borrow_mut())(),
        }
    }

    /// Due time of a recurring timer's next occurrence, skipping the cycles
    /// that processing lag caused it to miss.
    fn next_occurrence(
        &self,
        state: &mut ClockState<D::Handle, P::Marker>,
        due_time: u64,
        period: u64,
    ) -> u64 {
        let overshoot = self.accrue(state).saturating_sub(due_time);
        let dropped_cycles = match self.dropped_cycle_policy {
            DroppedCyclePolicy::Absolute => overshoot,
            DroppedCyclePolicy::PeriodScaled => overshoot / period,
        };
        if dropped_cycles > 0 {
            debug!("Recurring timer late by {overshoot}ms, dropping {dropped_cycles} cycles");
        }
        dropped_cycles
            .saturating_add(1)
            .saturating_mul(period)
            .saturating_add(due_time)
    }
}

impl<D: Deferrer, P: RealTimeProbe> Drop for Inner<D, P> {
    fn drop(&mut self) {
        if let Some(handle) = self.state.get_mut().pending.take() {
            self.deferrer.cancel(handle);
        }
    }
}

struct StepGuard<'a, D, P>
where
    D: Deferrer + 'static,
    P: RealTimeProbe + 'static,
{
    clock: &'a Rc<Inner<D, P>>,
}

impl<D, P> Drop for StepGuard<'_, D, P>
where
    D: Deferrer + 'static,
    P: RealTimeProbe + 'static,
{
    fn drop(&mut self) {
        if std::thread::panicking() {
            warn!("Timer callback panicked, continuing with remaining timers");
        }
        self.clock.state.borrow_mut().firing = false;
        self.clock.arm();
    }
}

impl<D: Deferrer, P: RealTimeProbe> Clone for VirtualClock<D, P> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<D: Deferrer, P: RealTimeProbe> Clone for WeakClock<D, P> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<D: Deferrer, P: RealTimeProbe> std::fmt::Debug for WeakClock<D, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakClock")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl<D: Deferrer, P: RealTimeProbe> std::fmt::Debug for VirtualClock<D, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("VirtualClock");
        match self.inner.state.try_borrow() {
            Ok(state) => s
                .field("current_time", &state.current_time)
                .field("pending_timers", &state.queue.len())
                .field("armed", &state.pending.is_some()),
            Err(_) => s.field("state", &"<borrowed>"),
        };
        s.field("accrue_real_time", &self.inner.accrue_real_time)
            .finish()
    }
}
