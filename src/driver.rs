//! Time driver contract
//!
//! A driver owns a clock and at most one pending wake-up. The scheduler
//! arms the wake-up at its earliest deadline and the driver calls back when
//! that time arrives. Everything else (queues, handles, branching) is built
//! on this seam, so any host timer facility can drive a scheduler by
//! implementing these three methods.

use crate::time::Moment;

/// The callback installed by [`TimeDriver::reschedule`]. Fired at most once
/// per installation.
pub type Wake = Box<dyn FnOnce()>;

/// An abstraction over an external clock.
///
/// Contract:
/// - `now` is non-decreasing between successive calls on one thread.
/// - `reschedule` installs exactly one pending wake-up, replacing any prior
///   one; the wake fires once at or after the deadline unless `unschedule`
///   or another `reschedule` intervenes.
/// - The driver never invokes the wake reentrantly (before `reschedule`
///   returns); a deadline at or before `now` still fires only after control
///   returns to the driver.
/// - `unschedule` removes any pending wake-up and is idempotent.
pub trait TimeDriver<T: Moment> {
    fn now(&self) -> T;

    fn reschedule(&self, deadline: T, wake: Wake);

    fn unschedule(&self);
}
