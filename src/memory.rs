//! In-memory driver
//!
//! A virtual clock that only moves when told to. This is the driver used by
//! nearly every test in the crate: advancing it is deterministic, so
//! tie-break and reentrancy behavior can be asserted exactly.

use crate::driver::{TimeDriver, Wake};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::trace;

struct MemoryInner {
    now: f64,
    wakeup: Option<(f64, Wake)>,
}

/// Manually-advanced [`TimeDriver`] over `f64` seconds.
///
/// Cloning yields another handle to the same clock, so a test can keep one
/// handle for `advance` while the scheduler owns another.
#[derive(Clone)]
pub struct MemoryDriver {
    inner: Rc<RefCell<MemoryInner>>,
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDriver {
    /// A driver whose clock reads 0.0.
    pub fn new() -> Self {
        Self::starting_at(0.0)
    }

    pub fn starting_at(now: f64) -> Self {
        Self {
            inner: Rc::new(RefCell::new(MemoryInner { now, wakeup: None })),
        }
    }

    /// Does the driver currently have a wake-up armed?
    pub fn is_scheduled(&self) -> bool {
        self.inner.borrow().wakeup.is_some()
    }

    /// Pop the armed wake-up if its deadline is at or before `limit`.
    fn due_wakeup(&self, limit: f64) -> Option<(f64, Wake)> {
        let mut inner = self.inner.borrow_mut();
        let due = matches!(&inner.wakeup, Some((deadline, _)) if *deadline <= limit);
        if due {
            inner.wakeup.take()
        } else {
            None
        }
    }

    /// Advance to the next armed deadline and fire everything due there.
    ///
    /// Returns the amount of time advanced, or None if nothing was armed.
    pub fn advance(&self) -> Option<f64> {
        let deadline = self.inner.borrow().wakeup.as_ref().map(|(d, _)| *d)?;
        let from = self.inner.borrow().now;
        let delta = (deadline - from).max(0.0);
        self.run_until(deadline);
        Some(delta)
    }

    /// Advance the clock by `delta`, firing everything due along the way.
    ///
    /// The clock steps to each armed deadline in turn (so work observes the
    /// time it was scheduled for), then settles at `now + delta`.
    pub fn advance_by(&self, delta: f64) -> f64 {
        let delta = if delta.is_finite() && delta > 0.0 { delta } else { 0.0 };
        let target = self.inner.borrow().now + delta;
        self.run_until(target);
        self.inner.borrow_mut().now = target;
        delta
    }

    /// Move the clock by `delta` in one jump, then fire whatever is due.
    ///
    /// Unlike [`advance_by`](Self::advance_by), work fires with the clock
    /// already at the destination, the way a wall-clock driver behaves when
    /// the machine slept past a deadline. A repeater driven through a jump
    /// observes the whole gap as a single multi-step invocation.
    pub fn jump_by(&self, delta: f64) {
        let delta = if delta.is_finite() && delta > 0.0 { delta } else { 0.0 };
        let target = self.inner.borrow().now + delta;
        self.inner.borrow_mut().now = target;
        while let Some((deadline, wake)) = self.due_wakeup(target) {
            trace!(deadline, now = target, "memory driver firing after jump");
            wake();
        }
    }

    /// Step the clock to each due deadline up to `target`, firing at each.
    fn run_until(&self, target: f64) {
        while let Some((deadline, wake)) = self.due_wakeup(target) {
            {
                let mut inner = self.inner.borrow_mut();
                if deadline > inner.now {
                    inner.now = deadline;
                }
            }
            trace!(deadline, "memory driver firing");
            wake();
        }
    }
}

impl TimeDriver<f64> for MemoryDriver {
    fn now(&self) -> f64 {
        self.inner.borrow().now
    }

    fn reschedule(&self, deadline: f64, wake: Wake) {
        let mut inner = self.inner.borrow_mut();
        // Never arm at or before the current instant: time must always move,
        // or work scheduled in the past would spin the clock in place.
        let floor = inner.now.next_up();
        inner.wakeup = Some((deadline.max(floor), wake));
    }

    fn unschedule(&self) {
        self.inner.borrow_mut().wakeup = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_advance_without_work() {
        let driver = MemoryDriver::new();
        assert_eq!(driver.advance(), None);
        assert_eq!(driver.now(), 0.0);
    }

    #[test]
    fn test_advance_to_deadline() {
        let driver = MemoryDriver::new();
        let fired = Rc::new(Cell::new(false));
        let f = fired.clone();

        driver.reschedule(2.5, Box::new(move || f.set(true)));
        assert!(driver.is_scheduled());

        let advanced = driver.advance().unwrap();
        assert!((advanced - 2.5).abs() < 1e-10);
        assert!((driver.now() - 2.5).abs() < 1e-10);
        assert!(fired.get());
        assert!(!driver.is_scheduled());
    }

    #[test]
    fn test_advance_by_stops_short() {
        let driver = MemoryDriver::new();
        let fired = Rc::new(Cell::new(false));
        let f = fired.clone();

        driver.reschedule(1.0, Box::new(move || f.set(true)));
        driver.advance_by(0.5);
        assert!(!fired.get());
        assert!((driver.now() - 0.5).abs() < 1e-10);

        driver.advance_by(0.6);
        assert!(fired.get());
        assert!((driver.now() - 1.1).abs() < 1e-10);
    }

    #[test]
    fn test_work_observes_own_deadline() {
        let driver = MemoryDriver::new();
        let seen = Rc::new(Cell::new(0.0));
        let s = seen.clone();
        let d = driver.clone();

        driver.reschedule(1.0, Box::new(move || s.set(d.now())));
        driver.advance_by(5.0);
        assert!((seen.get() - 1.0).abs() < 1e-10);
        assert!((driver.now() - 5.0).abs() < 1e-10);
    }

    #[test]
    fn test_jump_fires_at_destination() {
        let driver = MemoryDriver::new();
        let seen = Rc::new(Cell::new(0.0));
        let s = seen.clone();
        let d = driver.clone();

        driver.reschedule(1.0, Box::new(move || s.set(d.now())));
        driver.jump_by(5.0);
        assert!((seen.get() - 5.0).abs() < 1e-10);
    }

    #[test]
    fn test_past_deadline_clamped_forward() {
        let driver = MemoryDriver::new();
        driver.advance_by(10.0);

        let fired = Rc::new(Cell::new(false));
        let f = fired.clone();
        driver.reschedule(3.0, Box::new(move || f.set(true)));

        // Clamped to just above now, so it fires on the next advance.
        driver.advance().unwrap();
        assert!(fired.get());
        assert!(driver.now() > 10.0);
    }

    #[test]
    fn test_reschedule_replaces() {
        let driver = MemoryDriver::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let l = log.clone();
        driver.reschedule(1.0, Box::new(move || l.borrow_mut().push("old")));
        let l = log.clone();
        driver.reschedule(2.0, Box::new(move || l.borrow_mut().push("new")));

        driver.advance_by(3.0);
        assert_eq!(*log.borrow(), vec!["new"]);
    }

    #[test]
    fn test_unschedule_idempotent() {
        let driver = MemoryDriver::new();
        driver.reschedule(1.0, Box::new(|| {}));
        driver.unschedule();
        driver.unschedule();
        assert!(!driver.is_scheduled());
        assert_eq!(driver.advance(), None);
    }
}
