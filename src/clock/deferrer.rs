//! Host primitives for running a one-shot callback "as soon as possible".
//!
//! The clock keeps at most one deferred callback armed at a time and uses it
//! to process its own queue, so the number of outstanding host callbacks
//! stays constant however many virtual timers are pending.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use tokio::task::JoinHandle;

/// Schedules and cancels real deferred callbacks.
///
/// `defer` must never run the task synchronously: the task runs on a later
/// host turn, after callbacks deferred before it.
pub trait Deferrer {
    type Handle;

    fn defer(&self, task: Box<dyn FnOnce()>) -> Self::Handle;

    /// Cancelling a handle whose task already ran is a no-op.
    fn cancel(&self, handle: Self::Handle);
}

/// Runs deferred callbacks as tasks on the current `tokio::task::LocalSet`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioDeferrer;

impl Deferrer for TokioDeferrer {
    type Handle = JoinHandle<()>;

    /// # Panics
    ///
    /// Panics when called outside of a `LocalSet`.
    fn defer(&self, task: Box<dyn FnOnce()>) -> JoinHandle<()> {
        tokio::task::spawn_local(async move { task() })
    }

    fn cancel(&self, handle: JoinHandle<()>) {
        handle.abort();
    }
}

/// Handle to a callback queued on a [`ManualDeferrer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ManualHandle(u64);

#[derive(Default)]
struct ManualQueue {
    next_id: u64,
    tasks: VecDeque<(ManualHandle, Box<dyn FnOnce()>)>,
}

/// Deterministic host event loop: deferred callbacks run in FIFO order, one
/// per call to [`ManualDeferrer::run_next`].
///
/// Clones share the same queue. Tests hand one clone to the clock and keep
/// another to drive it, and may `defer` their own callbacks to model host
/// work interleaved with the clock's processing.
#[derive(Clone, Default)]
pub struct ManualDeferrer {
    queue: Rc<RefCell<ManualQueue>>,
}

impl ManualDeferrer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a host callback of its own, behind everything deferred so far.
    pub fn defer_task<F>(&self, task: F) -> ManualHandle
    where
        F: FnOnce() + 'static,
    {
        self.defer(Box::new(task))
    }

    /// Number of callbacks waiting to run.
    pub fn pending(&self) -> usize {
        self.queue.borrow().tasks.len()
    }

    /// Runs the oldest pending callback. Returns `false` if none was pending.
    ///
    /// A panicking callback unwinds out of this call; it has already been
    /// removed from the queue.
    pub fn run_next(&self) -> bool {
        // The borrow must end before the task runs: tasks defer more tasks.
        let task = self.queue.borrow_mut().tasks.pop_front();
        match task {
            Some((_, task)) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Runs callbacks until the queue is empty, returning how many ran.
    ///
    /// Never returns while a recurring timer is still scheduled; use
    /// [`ManualDeferrer::run_steps`] for those.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        ran
    }

    /// Runs at most `limit` callbacks, returning how many ran.
    pub fn run_steps(&self, limit: usize) -> usize {
        let mut ran = 0;
        while ran < limit && self.run_next() {
            ran += 1;
        }
        ran
    }
}

impl Deferrer for ManualDeferrer {
    type Handle = ManualHandle;

    fn defer(&self, task: Box<dyn FnOnce()>) -> ManualHandle {
        let mut queue = self.queue.borrow_mut();
        queue.next_id += 1;
        let handle = ManualHandle(queue.next_id);
        queue.tasks.push_back((handle, task));
        handle
    }

    fn cancel(&self, handle: ManualHandle) {
        self.queue
            .borrow_mut()
            .tasks
            .retain(|(queued, _)| *queued != handle);
    }
}

impl std::fmt::Debug for ManualDeferrer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualDeferrer")
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_in_fifo_order() {
        let host = ManualDeferrer::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        for n in 1..=3 {
            let log = log.clone();
            host.defer(Box::new(move || log.borrow_mut().push(n)));
        }
        assert_eq!(host.pending(), 3);
        assert!(host.run_next());
        assert_eq!(*log.borrow(), vec![1]);
        assert_eq!(host.run_until_idle(), 2);
        assert_eq!(*log.borrow(), vec![1, 2, 3]);
        assert!(!host.run_next());
    }

    #[test]
    fn cancelled_task_never_runs() {
        let host = ManualDeferrer::new();
        let ran = Rc::new(RefCell::new(false));
        let flag = ran.clone();
        let handle = host.defer(Box::new(move || *flag.borrow_mut() = true));
        host.cancel(handle);
        host.cancel(handle);
        assert_eq!(host.run_until_idle(), 0);
        assert!(!*ran.borrow());
    }

    #[test]
    fn task_may_defer_from_inside() {
        let host = ManualDeferrer::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let inner_host = host.clone();
        let inner_log = log.clone();
        host.defer(Box::new(move || {
            inner_log.borrow_mut().push("outer");
            let inner_log = inner_log.clone();
            inner_host.defer(Box::new(move || inner_log.borrow_mut().push("inner")));
        }));
        assert_eq!(host.run_until_idle(), 2);
        assert_eq!(*log.borrow(), vec!["outer", "inner"]);
    }

    #[test]
    fn run_steps_stops_at_limit() {
        let host = ManualDeferrer::new();
        for _ in 0..5 {
            host.defer(Box::new(|| {}));
        }
        assert_eq!(host.run_steps(2), 2);
        assert_eq!(host.pending(), 3);
        assert_eq!(host.run_steps(10), 3);
    }
}
