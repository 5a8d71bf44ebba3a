use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

/// Deferred unit of work run by a [`Scheduler`]
pub type Task = Box<dyn FnOnce()>;

/// One-shot timer service of the host event loop.
///
/// Tasks run on the same logical thread as everything else; a task is never
/// run from inside `schedule_after`.
pub trait Scheduler {
    fn schedule_after(&self, delay: Duration, task: Task);
}

impl<T: Scheduler + ?Sized> Scheduler for Rc<T> {
    fn schedule_after(&self, delay: Duration, task: Task) {
        (**self).schedule_after(delay, task)
    }
}

struct Scheduled {
    due: Duration,
    seq: u64,
    task: Task,
}

/// Scheduler driven by hand, with its own virtual clock.
///
/// Tasks due at the same instant run in scheduling order.
///
/// # Examples
///
/// ```rust
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use std::time::Duration;
/// use edfstream::{ManualScheduler, Scheduler};
///
/// let scheduler = ManualScheduler::new();
/// let fired = Rc::new(Cell::new(false));
/// let flag = fired.clone();
/// scheduler.schedule_after(Duration::from_millis(50), Box::new(move || flag.set(true)));
///
/// assert_eq!(scheduler.advance(Duration::from_millis(49)), 0);
/// assert_eq!(scheduler.advance(Duration::from_millis(1)), 1);
/// assert!(fired.get());
/// ```
#[derive(Default)]
pub struct ManualScheduler {
    now: Cell<Duration>,
    seq: Cell<u64>,
    queue: RefCell<Vec<Scheduled>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Virtual time elapsed since creation
    pub fn now(&self) -> Duration {
        self.now.get()
    }

    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }

    pub fn next_due(&self) -> Option<Duration> {
        self.queue.borrow().iter().map(|s| s.due).min()
    }

    /// Moves the clock forward by `by`, running every task that falls due.
    ///
    /// Tasks scheduled by running tasks also run if they fall due before the
    /// new time. Returns the number of tasks run.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.now.get() + by;
        let mut ran = 0;

        while let Some(scheduled) = self.pop_due(target) {
            if scheduled.due > self.now.get() {
                self.now.set(scheduled.due);
            }
            (scheduled.task)();
            ran += 1;
        }

        if target > self.now.get() {
            self.now.set(target);
        }
        ran
    }

    /// Runs the tasks already due without moving the clock
    pub fn run_due(&self) -> usize {
        self.advance(Duration::ZERO)
    }

    fn pop_due(&self, target: Duration) -> Option<Scheduled> {
        let mut queue = self.queue.borrow_mut();
        let index = queue
            .iter()
            .enumerate()
            .filter(|(_, s)| s.due <= target)
            .min_by_key(|(_, s)| (s.due, s.seq))
            .map(|(i, _)| i)?;
        Some(queue.swap_remove(index))
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_after(&self, delay: Duration, task: Task) {
        let seq = self.seq.get();
        self.seq.set(seq + 1);
        self.queue.borrow_mut().push(Scheduled {
            due: self.now.get() + delay,
            seq,
            task,
        });
    }
}
