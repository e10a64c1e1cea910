//! Recurrence rules
//!
//! A recurrence rule is a pure description of an infinite series of
//! boundaries anchored at a reference time. The repeater asks it two
//! questions: where is the next boundary after some instant, and how many
//! boundaries fell inside an interval. Civil-calendar rules live in the
//! civil module; this module has the physical-time fixed interval.

use crate::error::{FritterError, Result};
use crate::time::Moment;

/// Pure computation of recurrence boundaries.
pub trait RecurrenceRule<T: Moment>: 'static {
    /// The smallest boundary strictly greater than `after`, for the series
    /// anchored at `reference`. In particular, if `after` lies exactly on a
    /// boundary, the result is the one after it.
    fn next_boundary(&self, after: T, reference: T) -> T;

    /// The count of boundaries in the half-open interval `(earlier, later]`.
    ///
    /// `earlier` must itself lie on a boundary of the series; the repeater
    /// only ever passes boundaries it got from
    /// [`next_boundary`](Self::next_boundary).
    fn steps_between(&self, earlier: T, later: T) -> u64;
}

/// A fixed physical-time interval: boundaries at `reference + k * period`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EverySeconds {
    period: f64,
}

impl EverySeconds {
    /// A rule recurring every `period` seconds. The period must be finite
    /// and positive; a zero-length recurrence would never advance.
    pub fn new(period: f64) -> Result<Self> {
        if !period.is_finite() || period <= 0.0 {
            return Err(FritterError::InvalidInterval(period));
        }
        Ok(Self { period })
    }

    pub fn period(&self) -> f64 {
        self.period
    }
}

/// Shorthand for [`EverySeconds::new`].
pub fn every(seconds: f64) -> Result<EverySeconds> {
    EverySeconds::new(seconds)
}

impl RecurrenceRule<f64> for EverySeconds {
    fn next_boundary(&self, after: f64, reference: f64) -> f64 {
        let elapsed = after - reference;
        let mut k = (elapsed / self.period).floor() + 1.0;
        let mut candidate = reference + k * self.period;
        // Float guard: division can round down far enough that the
        // candidate is not strictly after `after`.
        while candidate <= after {
            k += 1.0;
            candidate = reference + k * self.period;
        }
        candidate
    }

    fn steps_between(&self, earlier: f64, later: f64) -> u64 {
        if later < earlier {
            return 0;
        }
        ((later - earlier) / self.period).floor() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_bad_periods() {
        assert_eq!(every(0.0), Err(FritterError::InvalidInterval(0.0)));
        assert_eq!(every(-1.0), Err(FritterError::InvalidInterval(-1.0)));
        assert!(every(f64::NAN).is_err());
        assert!(every(f64::INFINITY).is_err());
        assert!(every(0.25).is_ok());
    }

    #[test]
    fn test_next_boundary() {
        let rule = every(5.0).unwrap();

        // Mid-interval: round up to the next boundary.
        assert!((rule.next_boundary(7.0, 0.0) - 10.0).abs() < 1e-10);
        // Exactly on a boundary: strictly after, so skip to the next one.
        assert!((rule.next_boundary(10.0, 0.0) - 15.0).abs() < 1e-10);
        // The reference itself is a boundary too.
        assert!((rule.next_boundary(0.0, 0.0) - 5.0).abs() < 1e-10);
        // Before the reference.
        assert!((rule.next_boundary(-12.0, 0.0) + 10.0).abs() < 1e-10);
        // Non-zero anchor.
        assert!((rule.next_boundary(3.0, 1.0) - 6.0).abs() < 1e-10);
    }

    #[test]
    fn test_steps_between() {
        let rule = every(1.0).unwrap();

        assert_eq!(rule.steps_between(1.0, 3.2), 2);
        assert_eq!(rule.steps_between(1.0, 1.0), 0);
        assert_eq!(rule.steps_between(1.0, 2.0), 1);
        assert_eq!(rule.steps_between(3.0, 1.0), 0);
    }

    #[test]
    fn test_boundaries_consistent() {
        // Walking next_boundary and counting with steps_between agree.
        let rule = every(2.5).unwrap();
        let reference = 1.0;

        let mut boundary = rule.next_boundary(reference, reference);
        let mut count = 0;
        while boundary <= 20.0 {
            count += 1;
            boundary = rule.next_boundary(boundary, reference);
        }
        assert_eq!(rule.steps_between(reference, 20.0), count);
    }
}
