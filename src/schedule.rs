//! Scheduling tick - single-threaded cooperative task queue.
//!
//! The execution scheduler and the subscription lifecycle manager both defer
//! work by one "scheduling tick": all synchronous mutations that happen
//! before the deferral are guaranteed visible when the deferred task runs.
//! This is the mechanism behind execution coalescing - any number of
//! synchronous triggers collapse into one deferred remote call that reads
//! its reactive inputs exactly once, in their final state.
//!
//! The queue is thread-local, matching the single-threaded reactive model.
//! A host driving a real event loop calls [`tick`] once per loop turn;
//! tests call [`run_until_idle`].
//!
//! # Example
//!
//! ```ignore
//! use spark_rpc::schedule::{defer_one_step, tick};
//!
//! defer_one_step(|| println!("runs on the next tick"));
//! tick(); // drains the tasks queued above
//! ```

use std::cell::RefCell;
use std::collections::VecDeque;

/// A deferred unit of work.
pub type Task = Box<dyn FnOnce()>;

thread_local! {
    /// Tasks awaiting the next scheduling tick.
    static TASK_QUEUE: RefCell<VecDeque<Task>> = RefCell::new(VecDeque::new());
}

/// Upper bound for [`run_until_idle`] so a task that re-queues itself
/// forever fails a test instead of hanging it.
const MAX_IDLE_TICKS: usize = 1024;

/// Queue a task for the next scheduling tick.
///
/// Tasks queued during a [`tick`] run on the following tick, never the
/// current one.
pub fn defer_one_step(task: impl FnOnce() + 'static) {
    TASK_QUEUE.with(|queue| {
        queue.borrow_mut().push_back(Box::new(task));
    });
}

/// Run one scheduling tick.
///
/// Drains exactly the tasks that were queued before this call. Returns
/// `true` if any task ran.
pub fn tick() -> bool {
    // Snapshot the count first: tasks queued by the tasks we run here
    // belong to the next tick.
    let count = TASK_QUEUE.with(|queue| queue.borrow().len());
    if count == 0 {
        return false;
    }

    for _ in 0..count {
        let task = TASK_QUEUE.with(|queue| queue.borrow_mut().pop_front());
        match task {
            Some(task) => task(),
            None => break,
        }
    }
    true
}

/// Tick until the queue is empty.
///
/// Panics after [`MAX_IDLE_TICKS`] ticks - a binding that keeps re-queueing
/// itself is a bug, not a workload.
pub fn run_until_idle() {
    for _ in 0..MAX_IDLE_TICKS {
        if !tick() {
            return;
        }
    }
    panic!("scheduler did not become idle within {MAX_IDLE_TICKS} ticks");
}

/// Number of tasks currently queued.
pub fn pending_tasks() -> usize {
    TASK_QUEUE.with(|queue| queue.borrow().len())
}

/// Drop all queued tasks. Test isolation helper.
pub fn reset_scheduler() {
    TASK_QUEUE.with(|queue| queue.borrow_mut().clear());
}
