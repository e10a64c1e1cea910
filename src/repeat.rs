//! Repeated calls
//!
//! A repeater schedules a single trampoline call for the next recurrence
//! boundary. When the trampoline fires, on time or arbitrarily late, the
//! work receives the number of boundaries that elapsed since the previous
//! invocation, then the trampoline is re-scheduled for the first boundary
//! still in the future. However late individual firings are, the step
//! counts always sum to the number of boundaries passed: the recurrence
//! never drifts.

use crate::queue::PriorityQueue;
use crate::rules::RecurrenceRule;
use crate::scheduler::{BoxWork, CallRecord, FutureCall, Invocable, Scheduler};
use crate::time::Moment;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;
use tracing::debug;

/// Stops a repetition. Cloneable and idempotent; usable both from inside
/// the repeating work and from outside between invocations.
pub struct Stopper<T: Moment> {
    inner: Rc<RefCell<StopInner<T>>>,
}

struct StopInner<T: Moment> {
    stopped: bool,
    pending: Option<FutureCall<T>>,
}

impl<T: Moment> Clone for Stopper<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Moment> Stopper<T> {
    fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(StopInner {
                stopped: false,
                pending: None,
            })),
        }
    }

    /// Stop the repetition. Any outstanding trampoline call is cancelled
    /// and the work is never invoked again.
    pub fn cancel(&self) {
        let pending = {
            let mut inner = self.inner.borrow_mut();
            inner.stopped = true;
            inner.pending.take()
        };
        if let Some(call) = pending {
            call.cancel();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.borrow().stopped
    }

    fn set_pending(&self, call: FutureCall<T>) {
        self.inner.borrow_mut().pending = Some(call);
    }
}

struct RepeatCore<T, W, Q, R, F>
where
    T: Moment,
    W: Invocable,
    Q: PriorityQueue<T, CallRecord<W>>,
{
    scheduler: Scheduler<T, W, Q>,
    rule: R,
    work: F,
    reference: T,
    /// The boundary the outstanding trampoline was scheduled for.
    next_at: T,
    stopper: Stopper<T>,
}

/// Repeat `work` on `scheduler` according to `rule`, anchored at the
/// scheduler's current time.
///
/// `work` receives the count of boundaries elapsed since its previous
/// invocation (always at least 1) and a [`Stopper`]. The first invocation
/// happens at the first boundary strictly after now, not immediately.
pub fn repeatedly<T, W, Q, R, F>(scheduler: &Scheduler<T, W, Q>, rule: R, work: F) -> Stopper<T>
where
    T: Moment,
    W: Invocable + From<BoxWork>,
    Q: PriorityQueue<T, CallRecord<W>> + 'static,
    R: RecurrenceRule<T>,
    F: FnMut(u64, &Stopper<T>) + 'static,
{
    let reference = scheduler.now();
    repeatedly_from(scheduler, rule, reference, work)
}

/// Like [`repeatedly`], with an explicit anchor for the recurrence.
pub fn repeatedly_from<T, W, Q, R, F>(
    scheduler: &Scheduler<T, W, Q>,
    rule: R,
    reference: T,
    work: F,
) -> Stopper<T>
where
    T: Moment,
    W: Invocable + From<BoxWork>,
    Q: PriorityQueue<T, CallRecord<W>> + 'static,
    R: RecurrenceRule<T>,
    F: FnMut(u64, &Stopper<T>) + 'static,
{
    let now = scheduler.now();
    let next_at = rule.next_boundary(now, reference);
    let stopper = Stopper::new();
    let core = Rc::new(RefCell::new(RepeatCore {
        scheduler: scheduler.clone(),
        rule,
        work,
        reference,
        next_at,
        stopper: stopper.clone(),
    }));
    schedule(&core);
    stopper
}

/// Install the trampoline for the core's current `next_at`.
fn schedule<T, W, Q, R, F>(core: &Rc<RefCell<RepeatCore<T, W, Q, R, F>>>)
where
    T: Moment,
    W: Invocable + From<BoxWork>,
    Q: PriorityQueue<T, CallRecord<W>> + 'static,
    R: RecurrenceRule<T>,
    F: FnMut(u64, &Stopper<T>) + 'static,
{
    let (scheduler, next_at, stopper) = {
        let c = core.borrow();
        (c.scheduler.clone(), c.next_at, c.stopper.clone())
    };
    let rc = core.clone();
    let trampoline: BoxWork = Box::new(move || tick(&rc));
    let call = scheduler.call_at(next_at, W::from(trampoline));
    stopper.set_pending(call);
}

fn tick<T, W, Q, R, F>(core: &Rc<RefCell<RepeatCore<T, W, Q, R, F>>>)
where
    T: Moment,
    W: Invocable + From<BoxWork>,
    Q: PriorityQueue<T, CallRecord<W>> + 'static,
    R: RecurrenceRule<T>,
    F: FnMut(u64, &Stopper<T>) + 'static,
{
    let stopper = core.borrow().stopper.clone();
    if stopper.is_stopped() {
        return;
    }
    {
        let mut c = core.borrow_mut();
        let now = c.scheduler.now();
        let steps = 1 + c.rule.steps_between(c.next_at, now);
        if steps > 1 {
            debug!(steps, "repeater catching up after late firing");
        }
        let next_at = c.rule.next_boundary(now, c.reference);
        assert!(
            now.total_cmp(&next_at) == Ordering::Less,
            "recurrence rule produced a boundary that does not advance"
        );
        c.next_at = next_at;
        (c.work)(steps, &stopper);
    }
    if !stopper.is_stopped() {
        schedule(core);
    }
}
