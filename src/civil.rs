//! Civil time
//!
//! Adapts the physical-time core to zone-aware datetimes: a `Moment`
//! implementation for `DateTime<Tz>`, a driver adapter that converts civil
//! deadlines to POSIX timestamps for any underlying float driver, and
//! calendar recurrence rules (every N weeks / months / years in a named
//! IANA zone).
//!
//! Boundary arithmetic happens in naive local time and is then re-localized
//! with a fixed policy for daylight-saving anomalies: a local time that
//! does not exist (spring-forward gap) resolves to the instant just after
//! the gap, and a local time that occurs twice (fall-back overlap) resolves
//! to the earlier instant.

use crate::driver::{TimeDriver, Wake};
use crate::error::{FritterError, Result};
use crate::rules::RecurrenceRule;
use crate::scheduler::{BoxWork, Scheduler};
use crate::time::Moment;
use chrono::{DateTime, LocalResult, Months, NaiveDateTime, TimeDelta, TimeZone};
use chrono_tz::Tz;
use std::cmp::Ordering;

/// A scheduler over zone-aware civil time.
pub type CivilScheduler = Scheduler<DateTime<Tz>, BoxWork>;

impl Moment for DateTime<Tz> {
    type Delta = TimeDelta;

    fn total_cmp(&self, other: &Self) -> Ordering {
        Ord::cmp(self, other)
    }

    fn add(&self, delta: TimeDelta) -> Self {
        *self + delta
    }

    fn sub(&self, earlier: &Self) -> TimeDelta {
        *self - *earlier
    }

    fn zero_delta() -> TimeDelta {
        TimeDelta::zero()
    }
}

fn from_unix(secs: f64, zone: Tz) -> DateTime<Tz> {
    let whole = secs.floor();
    let mut seconds = whole as i64;
    let mut nanos = ((secs - whole) * 1e9).round() as i64;
    if nanos >= 1_000_000_000 {
        seconds += 1;
        nanos = 0;
    }
    DateTime::from_timestamp(seconds, nanos as u32)
        .unwrap_or(DateTime::UNIX_EPOCH)
        .with_timezone(&zone)
}

fn to_unix(when: &DateTime<Tz>) -> f64 {
    when.timestamp() as f64 + f64::from(when.timestamp_subsec_nanos()) / 1e9
}

/// Re-localize a naive local time under the DST policy above.
fn resolve_local(zone: Tz, naive: NaiveDateTime) -> DateTime<Tz> {
    match zone.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(earlier, _) => earlier,
        LocalResult::None => {
            // Inside a gap: scan forward to its end, minute by minute.
            let mut probe = naive + TimeDelta::minutes(1);
            for _ in 0..48 * 60 {
                match zone.from_local_datetime(&probe) {
                    LocalResult::Single(dt) => return dt,
                    LocalResult::Ambiguous(earlier, _) => return earlier,
                    LocalResult::None => probe += TimeDelta::minutes(1),
                }
            }
            // No real zone has a two-day gap; fall back to UTC reading.
            zone.from_utc_datetime(&naive)
        }
    }
}

/// Driver adapter: civil deadlines over any POSIX-timestamp driver.
#[derive(Clone)]
pub struct CivilDriver<D> {
    inner: D,
    zone: Tz,
}

impl<D> CivilDriver<D> {
    pub fn new(inner: D, zone: Tz) -> Self {
        Self { inner, zone }
    }

    pub fn zone(&self) -> Tz {
        self.zone
    }
}

impl<D: TimeDriver<f64>> TimeDriver<DateTime<Tz>> for CivilDriver<D> {
    fn now(&self) -> DateTime<Tz> {
        from_unix(self.inner.now(), self.zone)
    }

    fn reschedule(&self, deadline: DateTime<Tz>, wake: Wake) {
        self.inner.reschedule(to_unix(&deadline), wake);
    }

    fn unschedule(&self) {
        self.inner.unschedule();
    }
}

/// Calendar unit for civil recurrence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CivilUnit {
    Weeks,
    Months,
    Years,
}

/// Recur every N calendar units, anchored at the recurrence reference.
///
/// Boundaries keep the reference's local wall-clock time; month and year
/// boundaries clamp to the end of shorter months (Jan 31 + 1 month is the
/// last day of February).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EveryCivil {
    count: u32,
    unit: CivilUnit,
}

impl EveryCivil {
    fn new(count: u32, unit: CivilUnit) -> Result<Self> {
        if count == 0 {
            return Err(FritterError::InvalidInterval(0.0));
        }
        Ok(Self { count, unit })
    }

    /// The k-th boundary of the series anchored at `reference`.
    fn boundary(&self, reference: &DateTime<Tz>, k: u32) -> DateTime<Tz> {
        let naive = reference.naive_local();
        let steps = k.saturating_mul(self.count);
        let shifted = match self.unit {
            CivilUnit::Weeks => naive + TimeDelta::weeks(i64::from(steps)),
            CivilUnit::Months => naive + Months::new(steps),
            CivilUnit::Years => naive + Months::new(steps.saturating_mul(12)),
        };
        resolve_local(reference.timezone(), shifted)
    }

    /// An undershooting guess for the first boundary index past `after`.
    fn estimate(&self, reference: &DateTime<Tz>, after: &DateTime<Tz>) -> u32 {
        if after <= reference {
            return 0;
        }
        let secs = (*after - *reference).num_seconds().max(0) as u64;
        // Upper bounds on one recurrence span, so division undershoots.
        let span = u64::from(self.count)
            * match self.unit {
                CivilUnit::Weeks => 7 * 86_400 + 7_200,
                CivilUnit::Months => 31 * 86_400 + 7_200,
                CivilUnit::Years => 366 * 86_400 + 7_200,
            };
        (secs / span).min(u64::from(u32::MAX)) as u32
    }
}

/// Every week, anchored at the reference's weekday and wall-clock time.
pub fn weekly() -> EveryCivil {
    EveryCivil {
        count: 1,
        unit: CivilUnit::Weeks,
    }
}

pub fn every_weeks(count: u32) -> Result<EveryCivil> {
    EveryCivil::new(count, CivilUnit::Weeks)
}

/// Every month, on the reference's day-of-month (clamped) and time.
pub fn monthly() -> EveryCivil {
    EveryCivil {
        count: 1,
        unit: CivilUnit::Months,
    }
}

pub fn every_months(count: u32) -> Result<EveryCivil> {
    EveryCivil::new(count, CivilUnit::Months)
}

/// Every year, on the reference's date (Feb 29 clamps) and time.
pub fn yearly() -> EveryCivil {
    EveryCivil {
        count: 1,
        unit: CivilUnit::Years,
    }
}

pub fn every_years(count: u32) -> Result<EveryCivil> {
    EveryCivil::new(count, CivilUnit::Years)
}

impl RecurrenceRule<DateTime<Tz>> for EveryCivil {
    fn next_boundary(&self, after: DateTime<Tz>, reference: DateTime<Tz>) -> DateTime<Tz> {
        let mut k = self.estimate(&reference, &after);
        loop {
            let candidate = self.boundary(&reference, k);
            if candidate > after {
                return candidate;
            }
            k += 1;
        }
    }

    fn steps_between(&self, earlier: DateTime<Tz>, later: DateTime<Tz>) -> u64 {
        if later <= earlier {
            return 0;
        }
        let mut count = 0u64;
        let mut k = 1u32;
        loop {
            if self.boundary(&earlier, k) > later {
                return count;
            }
            count += 1;
            k += 1;
        }
    }
}
