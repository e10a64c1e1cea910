//! Time values
//!
//! The scheduler core is generic over any temporal coordinate that is
//! totally ordered and supports delta arithmetic. The default coordinate is
//! `f64` seconds since an arbitrary epoch; the civil module adds an
//! implementation for zone-aware datetimes.

use std::cmp::Ordering;

/// A temporal coordinate in some timekeeping system.
///
/// `total_cmp` must be a total order (for floats this means the
/// `f64::total_cmp` ordering rather than `PartialOrd`, so that NaN and -0.0
/// cannot corrupt the queue).
pub trait Moment: Copy + 'static {
    /// The difference between two moments.
    type Delta: Copy + 'static;

    /// Total-order comparison.
    fn total_cmp(&self, other: &Self) -> Ordering;

    /// This moment shifted forward by `delta`.
    fn add(&self, delta: Self::Delta) -> Self;

    /// The delta from `earlier` to `self`.
    fn sub(&self, earlier: &Self) -> Self::Delta;

    /// The zero-length delta.
    fn zero_delta() -> Self::Delta;
}

/// A moment whose deltas can be multiplied by a real factor.
///
/// Required by the branch subsystem, where a child clock runs at a linear
/// scale of its parent's. Only physical (float) time is scalable; civil
/// time is not.
pub trait ScalableMoment: Moment {
    /// `delta` scaled by `factor`.
    fn scale_delta(delta: Self::Delta, factor: f64) -> Self::Delta;
}

impl Moment for f64 {
    type Delta = f64;

    fn total_cmp(&self, other: &Self) -> Ordering {
        f64::total_cmp(self, other)
    }

    fn add(&self, delta: f64) -> f64 {
        self + delta
    }

    fn sub(&self, earlier: &f64) -> f64 {
        self - earlier
    }

    fn zero_delta() -> f64 {
        0.0
    }
}

impl ScalableMoment for f64 {
    fn scale_delta(delta: f64, factor: f64) -> f64 {
        delta * factor
    }
}

/// Convenience: `a <= b` under the total order.
pub(crate) fn le<T: Moment>(a: &T, b: &T) -> bool {
    a.total_cmp(b) != Ordering::Greater
}
