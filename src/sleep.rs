//! Blocking driver
//!
//! Runs timers by blocking the calling thread until each armed deadline,
//! suitable for batch scripts that have no event loop. Uses spin_sleep for
//! precise waits; the clock and sleep facility are injectable so the driver
//! itself can be tested without real sleeping.

use crate::driver::{TimeDriver, Wake};
use spin_sleep::SpinSleeper;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn system_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// A [`TimeDriver`] over POSIX-timestamp seconds that sleeps until each
/// deadline and runs the work inline.
#[derive(Clone)]
pub struct SleepDriver {
    pending: Rc<RefCell<Option<(f64, Wake)>>>,
    clock: Rc<dyn Fn() -> f64>,
    sleep: Rc<RefCell<Box<dyn FnMut(f64)>>>,
}

impl Default for SleepDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl SleepDriver {
    /// A driver over the system clock, sleeping with [`SpinSleeper`].
    pub fn new() -> Self {
        let sleeper = SpinSleeper::default();
        Self::with_clock(system_now, move |secs| {
            sleeper.sleep(Duration::from_secs_f64(secs))
        })
    }

    /// A driver with a custom clock and sleep facility, for tests.
    pub fn with_clock(
        clock: impl Fn() -> f64 + 'static,
        sleep: impl FnMut(f64) + 'static,
    ) -> Self {
        Self {
            pending: Rc::new(RefCell::new(None)),
            clock: Rc::new(clock),
            sleep: Rc::new(RefCell::new(Box::new(sleep))),
        }
    }

    /// While any wake-up is armed, sleep until its deadline and run it.
    /// Returns the number of wake-ups run. An idle driver returns
    /// immediately.
    pub fn block(&self) -> usize {
        self.block_with_timeout(f64::INFINITY)
    }

    /// Like [`block`](Self::block), but sleeps at most `timeout` seconds in
    /// total, leaving any not-yet-due wake-up armed.
    pub fn block_with_timeout(&self, timeout: f64) -> usize {
        let mut worked = 0;
        let max_time = (self.clock)() + timeout;
        loop {
            let Some(deadline) = self.pending.borrow().as_ref().map(|(t, _)| *t) else {
                break;
            };
            let now = (self.clock)();
            let wait = (deadline.min(max_time) - now).max(0.0);
            {
                let mut sleep = self.sleep.borrow_mut();
                (*sleep)(wait);
            }
            if deadline > max_time {
                break;
            }
            let Some((_, wake)) = self.pending.borrow_mut().take() else {
                break;
            };
            wake();
            worked += 1;
        }
        worked
    }
}

impl TimeDriver<f64> for SleepDriver {
    fn now(&self) -> f64 {
        (self.clock)()
    }

    fn reschedule(&self, deadline: f64, wake: Wake) {
        *self.pending.borrow_mut() = Some((deadline, wake));
    }

    fn unschedule(&self) {
        *self.pending.borrow_mut() = None;
    }
}
