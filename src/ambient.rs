//! Thread-wide time source that code under test reads instead of the
//! system clock.
//!
//! Installing a [`VirtualClock`] redirects [`now`], [`now_utc`] and the
//! `set_*`/`clear_*` timer functions to that clock until the returned
//! [`Installation`] is dropped or [`uninstall`] is called. Without an
//! installation, time comes from the system clock and timers are real tokio
//! timers on the current `LocalSet`.
//!
//! ```
//! use virtual_time::{ambient, ClockConfig};
//!
//! let _installed = ambient::install_with_config(&ClockConfig::frozen_at(12_345));
//! assert_eq!(ambient::now(), 12_345);
//! ```

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::debug;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};

use crate::clock::{ClockConfig, ClockError, Deferrer, RealTimeProbe, TimerId, VirtualClock};

/// Object-safe view of a virtual clock's public operations.
pub trait TimeSource {
    /// Current time in ms.
    fn now(&self) -> u64;

    fn set_timeout(&self, callback: Box<dyn FnOnce()>, delay: u64) -> Result<TimerId, ClockError>;

    fn set_interval(&self, callback: Box<dyn FnMut()>, period: u64) -> Result<TimerId, ClockError>;

    fn clear(&self, id: TimerId);
}

impl<D, P> TimeSource for VirtualClock<D, P>
where
    D: Deferrer + 'static,
    P: RealTimeProbe + 'static,
{
    fn now(&self) -> u64 {
        VirtualClock::now(self)
    }

    fn set_timeout(&self, callback: Box<dyn FnOnce()>, delay: u64) -> Result<TimerId, ClockError> {
        self.schedule_once(callback, delay)
    }

    fn set_interval(&self, callback: Box<dyn FnMut()>, period: u64) -> Result<TimerId, ClockError> {
        self.schedule_recurring(callback, period)
    }

    fn clear(&self, id: TimerId) {
        self.cancel(id);
    }
}

thread_local! {
    static INSTALLED: RefCell<Option<Rc<dyn TimeSource>>> = const { RefCell::new(None) };
}

fn installed() -> Option<Rc<dyn TimeSource>> {
    INSTALLED.with(|installed| installed.borrow().clone())
}

fn replace(source: Option<Rc<dyn TimeSource>>) -> Option<Rc<dyn TimeSource>> {
    INSTALLED.with(|installed| installed.replace(source))
}

/// Guard for an installed time source. Dropping it reinstates whatever was
/// installed before, or the system clock.
#[must_use = "the time source is uninstalled when the guard is dropped"]
pub struct Installation {
    source: Rc<dyn TimeSource>,
    previous: Option<Rc<dyn TimeSource>>,
}

impl Installation {
    /// The installed time source.
    pub fn source(&self) -> &Rc<dyn TimeSource> {
        &self.source
    }
}

impl Drop for Installation {
    fn drop(&mut self) {
        // A later install or an explicit uninstall already took over.
        let current = installed();
        if current.is_some_and(|current| Rc::ptr_eq(&current, &self.source)) {
            debug!("Restoring previous time source");
            replace(self.previous.take());
        }
    }
}

/// Makes `source` this thread's time source.
pub fn install<S: TimeSource + 'static>(source: S) -> Installation {
    let source: Rc<dyn TimeSource> = Rc::new(source);
    let previous = replace(Some(source.clone()));
    debug!("Installed virtual time source (replaced existing: {})", previous.is_some());
    Installation { source, previous }
}

/// Installs a fresh tokio-driven [`VirtualClock`] built from `config`.
pub fn install_with_config(config: &ClockConfig) -> Installation {
    install(VirtualClock::new(config))
}

/// Restores the system clock and real timers, whatever is installed.
pub fn uninstall() {
    if replace(None).is_some() {
        debug!("Uninstalled virtual time source");
    }
}

pub fn is_installed() -> bool {
    INSTALLED.with(|installed| installed.borrow().is_some())
}

/// Milliseconds since the Unix epoch, virtual when a source is installed.
pub fn now() -> u64 {
    match installed() {
        Some(source) => source.now(),
        None => Utc::now().timestamp_millis().max(0) as u64,
    }
}

/// Current time as a UTC timestamp.
pub fn now_utc() -> DateTime<Utc> {
    let millis = i64::try_from(now()).unwrap_or(i64::MAX);
    DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// A timer scheduled through this module.
///
/// Virtual handles hold on to the source that created them, so clearing
/// still reaches the right clock after it was uninstalled or replaced.
pub enum TimerHandle {
    Virtual {
        id: TimerId,
        source: Rc<dyn TimeSource>,
    },
    Real(JoinHandle<()>),
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerHandle::Virtual { id, .. } => f.debug_tuple("Virtual").field(id).finish(),
            TimerHandle::Real(_) => f.write_str("Real"),
        }
    }
}

/// Runs `callback` once after `delay` ms.
///
/// # Panics
///
/// Without an installed source, panics when called outside of a `LocalSet`.
pub fn set_timeout<F>(callback: F, delay: u64) -> Result<TimerHandle, ClockError>
where
    F: FnOnce() + 'static,
{
    match installed() {
        Some(source) => {
            let id = source.set_timeout(Box::new(callback), delay)?;
            Ok(TimerHandle::Virtual { id, source })
        }
        None => Ok(TimerHandle::Real(tokio::task::spawn_local(async move {
            sleep(Duration::from_millis(delay)).await;
            callback();
        }))),
    }
}

/// Runs `callback` every `period` ms.
///
/// Real intervals skip the ticks they miss rather than bursting to catch up.
///
/// # Panics
///
/// Without an installed source, panics when called outside of a `LocalSet`.
pub fn set_interval<F>(mut callback: F, period: u64) -> Result<TimerHandle, ClockError>
where
    F: FnMut() + 'static,
{
    if period == 0 {
        return Err(ClockError::ZeroPeriod);
    }
    match installed() {
        Some(source) => {
            let id = source.set_interval(Box::new(callback), period)?;
            Ok(TimerHandle::Virtual { id, source })
        }
        None => {
            let period = Duration::from_millis(period);
            Ok(TimerHandle::Real(tokio::task::spawn_local(async move {
                let mut ticks = interval_at(Instant::now() + period, period);
                ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    ticks.tick().await;
                    callback();
                }
            })))
        }
    }
}

/// Cancels a timeout. Clearing a fired or cleared timer does nothing.
pub fn clear_timeout(handle: &TimerHandle) {
    match handle {
        TimerHandle::Virtual { id, source } => source.clear(*id),
        TimerHandle::Real(task) => task.abort(),
    }
}

/// Cancels an interval. Clearing a cleared interval does nothing.
pub fn clear_interval(handle: &TimerHandle) {
    clear_timeout(handle);
}
