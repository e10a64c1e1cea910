//! Scheduler core
//!
//! A scheduler owns a priority queue of timed calls and an arming
//! relationship with a [`TimeDriver`]: whenever the earliest deadline
//! changes, the driver's single wake-up is re-armed to match. When the
//! wake-up fires, every call whose deadline has passed runs, in
//! (deadline, insertion-id) order, including calls scheduled reentrantly
//! from inside a running one.

use crate::driver::TimeDriver;
use crate::queue::{HeapQueue, PriorityQueue};
use crate::time::{le, Moment};
use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::rc::Rc;
use tracing::trace;

/// A unit of work that a scheduler can perform.
///
/// Blanket-implemented for closures; implement it directly for work types
/// that carry extra capability (for example
/// [`PersistableWork`](crate::persist::PersistableWork)).
pub trait Invocable: 'static {
    fn run(&mut self);
}

impl<F: FnMut() + 'static> Invocable for F {
    fn run(&mut self) {
        self()
    }
}

/// The ordinary work type: a boxed closure.
pub type BoxWork = Box<dyn FnMut()>;

/// A scheduler over physical (float-seconds) time and boxed closures.
pub type PhysicalScheduler = Scheduler<f64, BoxWork>;

/// Lifecycle of a scheduled call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallState {
    /// Waiting in the queue.
    Pending,
    /// Invoked by the scheduler.
    Called,
    /// Cancelled before it could run.
    Cancelled,
}

/// Queue payload for one scheduled call. Opaque to queue implementations.
pub struct CallRecord<W> {
    work: W,
    state: Rc<Cell<CallState>>,
}

pub(crate) struct SchedulerCore<T, W, Q>
where
    T: Moment,
    W: Invocable,
    Q: PriorityQueue<T, CallRecord<W>>,
{
    pub(crate) driver: Rc<dyn TimeDriver<T>>,
    pub(crate) queue: Q,
    next_id: u64,
    armed_for: Option<T>,
    firing: bool,
    _work: std::marker::PhantomData<W>,
}

/// A collection of timed calls connected to a [`TimeDriver`].
///
/// Cloning yields another handle to the same scheduler. All handles must
/// stay on the thread that drives the root driver; nothing here is `Send`.
pub struct Scheduler<T, W = BoxWork, Q = HeapQueue<T, CallRecord<W>>>
where
    T: Moment,
    W: Invocable,
    Q: PriorityQueue<T, CallRecord<W>>,
{
    pub(crate) core: Rc<RefCell<SchedulerCore<T, W, Q>>>,
}

impl<T, W, Q> Clone for Scheduler<T, W, Q>
where
    T: Moment,
    W: Invocable,
    Q: PriorityQueue<T, CallRecord<W>>,
{
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<T, W> Scheduler<T, W>
where
    T: Moment,
    W: Invocable,
{
    /// A scheduler over the given driver with the default heap queue.
    pub fn new(driver: impl TimeDriver<T> + 'static) -> Self {
        Self::with_queue(driver, HeapQueue::new())
    }
}

impl<T, W, Q> Scheduler<T, W, Q>
where
    T: Moment,
    W: Invocable,
    Q: PriorityQueue<T, CallRecord<W>> + 'static,
{
    /// A scheduler with a custom queue backing.
    pub fn with_queue(driver: impl TimeDriver<T> + 'static, queue: Q) -> Self {
        Self {
            core: Rc::new(RefCell::new(SchedulerCore {
                driver: Rc::new(driver),
                queue,
                next_id: 0,
                armed_for: None,
                firing: false,
                _work: std::marker::PhantomData,
            })),
        }
    }

    /// The current time according to this scheduler's driver.
    pub fn now(&self) -> T {
        let driver = self.core.borrow().driver.clone();
        driver.now()
    }

    /// Schedule `work` to run at `when`.
    ///
    /// Deadlines in the past are not an error; the call fires at the next
    /// wake-up. Scheduling from inside a running call is supported: a new
    /// call due at or before the current pass's timestamp runs in the same
    /// pass, in (deadline, id) order with everything else.
    pub fn call_at(&self, when: T, work: W) -> FutureCall<T> {
        let state = Rc::new(Cell::new(CallState::Pending));
        let id = {
            let mut core = self.core.borrow_mut();
            let id = core.next_id;
            core.next_id += 1;
            core.queue.add(
                id,
                when,
                CallRecord {
                    work,
                    state: state.clone(),
                },
            );
            id
        };
        sync_driver(&self.core);

        let weak = Rc::downgrade(&self.core);
        let canceller = Rc::new(move || {
            if let Some(core) = weak.upgrade() {
                core.borrow_mut().queue.remove(id);
                sync_driver(&core);
            }
        });
        FutureCall {
            id,
            when,
            state,
            canceller,
        }
    }

    /// Number of pending calls.
    pub fn len(&self) -> usize {
        self.core.borrow().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Re-insert calls in order, assigning fresh ids. Used when reloading a
    /// persisted scheduler; insertion order becomes the tie-break order.
    pub(crate) fn bulk_insert(&self, items: impl IntoIterator<Item = (T, W)>) {
        for (when, work) in items {
            self.call_at(when, work);
        }
    }
}

/// Re-arm or disarm the driver so it matches the queue head. No-op while a
/// fire pass is running; the pass syncs once on exit.
fn sync_driver<T, W, Q>(core: &Rc<RefCell<SchedulerCore<T, W, Q>>>)
where
    T: Moment,
    W: Invocable,
    Q: PriorityQueue<T, CallRecord<W>> + 'static,
{
    enum Action<T> {
        Arm(T),
        Disarm,
    }

    let action = {
        let mut c = core.borrow_mut();
        if c.firing {
            return;
        }
        match (c.queue.peek_min(), c.armed_for) {
            (Some((_, head)), Some(armed)) if head.total_cmp(&armed) == Ordering::Equal => return,
            (Some((_, head)), _) => {
                c.armed_for = Some(head);
                Action::Arm(head)
            }
            (None, Some(_)) => {
                c.armed_for = None;
                Action::Disarm
            }
            (None, None) => return,
        }
    };

    // The driver call happens with the core borrow released: a branch's
    // synthetic driver schedules onto its trunk from inside reschedule.
    let driver = core.borrow().driver.clone();
    match action {
        Action::Arm(deadline) => {
            let weak = Rc::downgrade(core);
            driver.reschedule(
                deadline,
                Box::new(move || {
                    if let Some(core) = weak.upgrade() {
                        fire(&core);
                    }
                }),
            );
        }
        Action::Disarm => driver.unschedule(),
    }
}

/// Restores `firing = false` and re-arms the driver when the fire pass
/// exits, whether normally or by a panic unwinding out of user work.
struct FireGuard<T, W, Q>
where
    T: Moment,
    W: Invocable,
    Q: PriorityQueue<T, CallRecord<W>> + 'static,
{
    core: Rc<RefCell<SchedulerCore<T, W, Q>>>,
}

impl<T, W, Q> Drop for FireGuard<T, W, Q>
where
    T: Moment,
    W: Invocable,
    Q: PriorityQueue<T, CallRecord<W>> + 'static,
{
    fn drop(&mut self) {
        self.core.borrow_mut().firing = false;
        sync_driver(&self.core);
    }
}

/// The driver wake-up handler: run everything due at the current time.
fn fire<T, W, Q>(core: &Rc<RefCell<SchedulerCore<T, W, Q>>>)
where
    T: Moment,
    W: Invocable,
    Q: PriorityQueue<T, CallRecord<W>> + 'static,
{
    {
        let mut c = core.borrow_mut();
        debug_assert!(!c.firing, "driver invoked the wake-up reentrantly");
        c.firing = true;
        c.armed_for = None;
    }
    let driver = core.borrow().driver.clone();
    let now = driver.now();
    let guard = FireGuard { core: core.clone() };

    let mut fired = 0u32;
    loop {
        // The queue borrow is released before running user work, so the
        // work may call back into this scheduler.
        let popped = {
            let mut c = core.borrow_mut();
            match c.queue.peek_min() {
                Some((_, deadline)) if le(&deadline, &now) => c.queue.remove_min(),
                _ => None,
            }
        };
        let Some((id, _, record)) = popped else { break };
        record.state.set(CallState::Called);
        trace!(id, "running scheduled call");
        let mut work = record.work;
        work.run();
        fired += 1;
    }
    trace!(fired, "fire pass complete");
    drop(guard);
}

/// A handle to a pending call, usable for deadline inspection and
/// cancellation.
///
/// The handle keeps only a weak reference to its scheduler: it never keeps
/// the scheduler alive, and every operation is a no-op once the call has
/// run, been cancelled, or outlived its scheduler.
pub struct FutureCall<T: Moment> {
    id: u64,
    when: T,
    state: Rc<Cell<CallState>>,
    canceller: Rc<dyn Fn()>,
}

impl<T: Moment> Clone for FutureCall<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            when: self.when,
            state: self.state.clone(),
            canceller: self.canceller.clone(),
        }
    }
}

impl<T: Moment> FutureCall<T> {
    /// The time this call is scheduled for.
    pub fn when(&self) -> T {
        self.when
    }

    /// The scheduler-unique id of this call.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> CallState {
        self.state.get()
    }

    /// Cancel the call so it never runs. Idempotent; cancelling a call that
    /// has already run (including from inside its own work) does nothing.
    pub fn cancel(&self) {
        if self.state.get() != CallState::Pending {
            return;
        }
        self.state.set(CallState::Cancelled);
        (self.canceller)();
    }
}

// Queue payload accessors for persistence (same-crate only).
impl<W> CallRecord<W> {
    pub(crate) fn work(&self) -> &W {
        &self.work
    }
}
