use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Identity of a scheduled timer, unique within one clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

impl TimerId {
    pub(crate) fn from_raw(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw timer number.
    pub fn as_raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer:{}", self.0)
    }
}

pub(crate) type RecurringCallback = Rc<RefCell<dyn FnMut()>>;

pub(crate) enum TimerKind {
    Once(Box<dyn FnOnce()>),
    /// The callback is shared between the queued next occurrence and the
    /// invocation in flight.
    Recurring {
        period: u64,
        callback: RecurringCallback,
    },
}

/// A pending unit of work in the timer queue.
pub(crate) struct Timer {
    pub id: TimerId,
    /// Virtual time (ms) at which the timer becomes eligible to fire
    pub due_time: u64,
    pub kind: TimerKind,
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Timer");
        s.field("id", &self.id).field("due_time", &self.due_time);
        if let TimerKind::Recurring { period, .. } = &self.kind {
            s.field("period", period);
        }
        s.finish_non_exhaustive()
    }
}
