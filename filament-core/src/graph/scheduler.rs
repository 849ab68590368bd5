//! Update Scheduler
//!
//! The scheduler coalesces work triggered during a synchronous turn into a
//! single deferred pass, the equivalent of a microtask checkpoint.
//!
//! # Algorithm
//!
//! 1. Producers (batched subscribers, the property store) call
//!    [`queue_microtask`] at most once per pending batch; they keep their own
//!    deduplicated pending sets and only need one job to drain them.
//! 2. The host calls [`flush`] when its synchronous turn completes (or wraps
//!    the turn in [`batch`], which flushes on exit).
//! 3. `flush` runs jobs in rounds: every job queued before the round starts
//!    runs in FIFO order; jobs queued while running go to the next round.
//!    Rounds repeat until the queue is empty or the configured round limit is
//!    hit.
//!
//! There is no event loop here: nothing runs until `flush` is called.

use std::cell::RefCell;
use std::collections::VecDeque;

use tracing::{trace, warn};

use crate::config::config;

/// A deferred unit of work.
pub type Job = Box<dyn FnOnce()>;

#[derive(Default)]
struct SchedulerState {
    queue: VecDeque<Job>,
    flushing: bool,
    batch_depth: usize,
}

thread_local! {
    static SCHEDULER: RefCell<SchedulerState> = RefCell::new(SchedulerState::default());
}

/// Queue a job for the next flush.
pub fn queue_microtask<F>(job: F)
where
    F: FnOnce() + 'static,
{
    SCHEDULER.with(|s| s.borrow_mut().queue.push_back(Box::new(job)));
}

/// Whether any job is waiting for a flush.
pub fn has_pending() -> bool {
    SCHEDULER.with(|s| !s.borrow().queue.is_empty())
}

/// Whether a flush is currently running on this thread.
pub fn is_flushing() -> bool {
    SCHEDULER.with(|s| s.borrow().flushing)
}

/// Resets the `flushing` flag even if a job unwinds.
struct FlushGuard;

impl Drop for FlushGuard {
    fn drop(&mut self) {
        SCHEDULER.with(|s| s.borrow_mut().flushing = false);
    }
}

/// Run every queued job, including jobs queued by those jobs.
///
/// Returns the number of jobs executed. A nested call made from inside a
/// running job returns `0` immediately; the outer flush will pick up
/// anything newly queued.
pub fn flush() -> usize {
    let entered = SCHEDULER.with(|s| {
        let mut s = s.borrow_mut();
        if s.flushing {
            false
        } else {
            s.flushing = true;
            true
        }
    });
    if !entered {
        return 0;
    }
    let _guard = FlushGuard;

    let max_rounds = config().max_flush_rounds;
    let mut executed = 0;
    let mut rounds = 0;

    loop {
        let round: VecDeque<Job> = SCHEDULER.with(|s| std::mem::take(&mut s.borrow_mut().queue));
        if round.is_empty() {
            break;
        }

        rounds += 1;
        if rounds > max_rounds {
            warn!(
                rounds = max_rounds,
                remaining = round.len(),
                "flush round limit reached; deferring remaining jobs"
            );
            SCHEDULER.with(|s| {
                let mut s = s.borrow_mut();
                let newer = std::mem::replace(&mut s.queue, round);
                s.queue.extend(newer);
            });
            break;
        }

        trace!(round = rounds, jobs = round.len(), "flush round");
        for job in round {
            job();
            executed += 1;
        }
    }

    executed
}

/// Exits the batch and flushes when leaving the outermost batch.
struct BatchGuard;

impl Drop for BatchGuard {
    fn drop(&mut self) {
        let depth = SCHEDULER.with(|s| {
            let mut s = s.borrow_mut();
            s.batch_depth -= 1;
            s.batch_depth
        });

        if depth == 0 && !std::thread::panicking() {
            flush();
        }
    }
}

/// Run `f`, then flush pending work once the outermost batch completes.
pub fn batch<T>(f: impl FnOnce() -> T) -> T {
    SCHEDULER.with(|s| s.borrow_mut().batch_depth += 1);
    let _guard = BatchGuard;
    f()
}

/// Whether the current code runs inside [`batch`].
pub fn is_batching() -> bool {
    SCHEDULER.with(|s| s.borrow().batch_depth > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{configure, RuntimeConfig};
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn jobs_wait_for_flush() {
        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        queue_microtask(move || h.set(h.get() + 1));

        assert!(has_pending());
        assert_eq!(hits.get(), 0);

        assert_eq!(flush(), 1);
        assert_eq!(hits.get(), 1);
        assert!(!has_pending());
    }

    #[test]
    fn jobs_queued_during_flush_run_in_the_same_flush() {
        let order = Rc::new(RefCell::new(Vec::new()));

        let o = order.clone();
        queue_microtask(move || {
            o.borrow_mut().push(1);
            let o2 = o.clone();
            queue_microtask(move || o2.borrow_mut().push(3));
        });
        let o = order.clone();
        queue_microtask(move || o.borrow_mut().push(2));

        assert_eq!(flush(), 3);
        assert_eq!(*order.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn nested_flush_is_a_no_op() {
        let inner = Rc::new(Cell::new(usize::MAX));
        let i = inner.clone();
        queue_microtask(move || i.set(flush()));
        flush();
        assert_eq!(inner.get(), 0);
        assert!(!is_flushing());
    }

    #[test]
    fn batch_flushes_on_exit() {
        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();

        let value = batch(|| {
            assert!(is_batching());
            queue_microtask(move || h.set(h.get() + 1));
            batch(|| queue_microtask(|| {}));
            42
        });

        assert_eq!(value, 42);
        assert_eq!(hits.get(), 1);
        assert!(!has_pending());
        assert!(!is_batching());
    }

    #[test]
    fn round_limit_defers_runaway_jobs() {
        fn requeue(counter: Rc<Cell<usize>>) {
            counter.set(counter.get() + 1);
            queue_microtask(move || requeue(counter));
        }

        let previous = configure(RuntimeConfig {
            max_flush_rounds: 5,
            ..RuntimeConfig::default()
        });

        let counter = Rc::new(Cell::new(0));
        let c = counter.clone();
        queue_microtask(move || requeue(c));

        assert_eq!(flush(), 5);
        assert_eq!(counter.get(), 5);
        assert!(has_pending());

        configure(previous);
        // Drain by hand so the thread-local queue does not leak into other tests.
        SCHEDULER.with(|s| s.borrow_mut().queue.clear());
    }
}
