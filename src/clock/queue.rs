//! Ordered queue of pending timers.
//!
//! Timers are kept sorted ascending by due time. Timers with equal due
//! times stay in insertion order, so the earliest registered fires first.

use std::collections::VecDeque;

use super::timer::{Timer, TimerId};

#[derive(Debug, Default)]
pub(crate) struct TimerQueue {
    timers: VecDeque<Timer>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts before the first timer with a strictly greater due time.
    pub fn insert(&mut self, timer: Timer) {
        let index = self.timers.partition_point(|queued| queued.due_time <= timer.due_time);
        self.timers.insert(index, timer);
    }

    /// Removes every timer with `id`, returning how many were removed.
    pub fn remove(&mut self, id: TimerId) -> usize {
        let before = self.timers.len();
        self.timers.retain(|timer| timer.id != id);
        before - self.timers.len()
    }

    pub fn pop_earliest(&mut self) -> Option<Timer> {
        self.timers.pop_front()
    }

    pub fn peek_due_time(&self) -> Option<u64> {
        self.timers.front().map(|timer| timer.due_time)
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}
