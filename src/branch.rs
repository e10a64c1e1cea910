//! Branched schedulers
//!
//! A branch is a child scheduler whose clock is a linear function of its
//! parent's ("trunk's"): branch_now = anchor_branch + (trunk_now −
//! anchor_trunk) · scale. The branch owns no real driver; it is driven by a
//! single trampoline call on the trunk that fires the branch's next due
//! work, re-installed whenever the branch's head deadline changes. Pausing,
//! resuming and re-scaling recalibrate the anchors so the branch clock
//! never jumps.

use crate::driver::{TimeDriver, Wake};
use crate::error::{FritterError, Result};
use crate::scheduler::{BoxWork, FutureCall, Scheduler};
use crate::time::ScalableMoment;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::debug;

struct BranchState<T: ScalableMoment> {
    trunk: Scheduler<T, BoxWork>,
    anchor_trunk: T,
    anchor_branch: T,
    /// Current scale; 0.0 exactly while paused.
    scale: f64,
    /// The scale to restore on unpause.
    scale_saved: f64,
    paused: bool,
    /// Epsilon keeping down(up(t)) from landing before t, so a due branch
    /// call always fires in the trunk pass that was armed for it.
    fudge: T::Delta,
    /// The branch-side wake-up request, kept across pause/unpause so the
    /// trampoline can be re-derived from it.
    pending: Option<(T, Wake)>,
    /// The single trunk-level call currently driving this branch.
    trampoline: Option<FutureCall<T>>,
}

impl<T: ScalableMoment> BranchState<T> {
    fn branch_now(&self) -> T {
        if self.paused {
            self.anchor_branch
        } else {
            self.down(self.trunk.now())
        }
    }

    fn down_raw(&self, trunk_time: T) -> T {
        let delta = trunk_time.sub(&self.anchor_trunk);
        self.anchor_branch.add(T::scale_delta(delta, self.scale))
    }

    /// Trunk time → branch time.
    fn down(&self, trunk_time: T) -> T {
        self.down_raw(trunk_time).add(self.fudge)
    }

    /// Branch time → trunk time, recording the round-trip fudge.
    fn up(&mut self, branch_time: T) -> T {
        let delta = branch_time.sub(&self.anchor_branch);
        let trunk_time = self.anchor_trunk.add(T::scale_delta(delta, 1.0 / self.scale));
        self.fudge = branch_time.sub(&self.down_raw(trunk_time));
        trunk_time
    }
}

/// Install the trunk trampoline for the current pending branch wake-up,
/// replacing any previous trampoline.
fn install<T: ScalableMoment>(state: &Rc<RefCell<BranchState<T>>>) {
    let (trunk, deadline, old) = {
        let mut s = state.borrow_mut();
        debug_assert!(!s.paused, "trampoline installed while paused");
        let Some((branch_deadline, _)) = s.pending.as_ref() else {
            return;
        };
        let branch_deadline = *branch_deadline;
        let deadline = s.up(branch_deadline);
        (s.trunk.clone(), deadline, s.trampoline.take())
    };
    if let Some(old) = old {
        old.cancel();
    }
    let weak = Rc::downgrade(state);
    let call = trunk.call_at(
        deadline,
        Box::new(move || {
            if let Some(state) = weak.upgrade() {
                tick(&state);
            }
        }) as BoxWork,
    );
    state.borrow_mut().trampoline = Some(call);
}

/// The trampoline body: hand control to the branch scheduler's wake-up.
fn tick<T: ScalableMoment>(state: &Rc<RefCell<BranchState<T>>>) {
    let wake = {
        let mut s = state.borrow_mut();
        s.trampoline = None;
        if s.paused {
            return;
        }
        match s.pending.take() {
            Some((_, wake)) => wake,
            None => return,
        }
    };
    wake();
}

/// The synthetic [`TimeDriver`] a branch scheduler runs on.
struct BranchDriver<T: ScalableMoment> {
    state: Rc<RefCell<BranchState<T>>>,
}

impl<T: ScalableMoment> TimeDriver<T> for BranchDriver<T> {
    fn now(&self) -> T {
        self.state.borrow().branch_now()
    }

    fn reschedule(&self, deadline: T, wake: Wake) {
        {
            let mut s = self.state.borrow_mut();
            s.pending = Some((deadline, wake));
            if s.paused {
                return;
            }
        }
        install(&self.state);
    }

    fn unschedule(&self) {
        let trampoline = {
            let mut s = self.state.borrow_mut();
            s.pending = None;
            s.trampoline.take()
        };
        if let Some(call) = trampoline {
            call.cancel();
        }
    }
}

/// Control surface for a branch: pause, unpause, re-scale, read its clock.
///
/// Dropping the manager abandons the branch: the trunk trampoline is
/// cancelled and no further branch work fires.
pub struct BranchManager<T: ScalableMoment> {
    state: Rc<RefCell<BranchState<T>>>,
}

impl<T: ScalableMoment> BranchManager<T> {
    /// The branch clock's current reading.
    pub fn now(&self) -> T {
        self.state.borrow().branch_now()
    }

    /// The branch's rate of progress relative to its trunk. While paused
    /// this reports the scale that `unpause` will restore.
    pub fn scale(&self) -> f64 {
        let s = self.state.borrow();
        if s.paused {
            s.scale_saved
        } else {
            s.scale
        }
    }

    pub fn is_paused(&self) -> bool {
        self.state.borrow().paused
    }

    /// Freeze the branch clock. Branch work stops firing; the clock reads
    /// the same value until `unpause`. Idempotent.
    pub fn pause(&self) {
        let trampoline = {
            let mut s = self.state.borrow_mut();
            if s.paused {
                return;
            }
            let now_branch = s.branch_now();
            s.anchor_branch = now_branch;
            s.anchor_trunk = s.trunk.now();
            s.scale_saved = s.scale;
            s.scale = 0.0;
            s.fudge = T::zero_delta();
            s.paused = true;
            s.trampoline.take()
        };
        if let Some(call) = trampoline {
            call.cancel();
        }
        debug!("branch paused");
    }

    /// Resume the branch clock from where it stopped, at the scale it had
    /// when paused. Idempotent.
    pub fn unpause(&self) {
        {
            let mut s = self.state.borrow_mut();
            if !s.paused {
                return;
            }
            // The branch clock resumes from the pause snapshot; only the
            // trunk anchor moves, skipping over the paused span.
            s.anchor_trunk = s.trunk.now();
            s.scale = s.scale_saved;
            s.fudge = T::zero_delta();
            s.paused = false;
        }
        debug!("branch unpaused");
        install(&self.state);
    }

    /// Change the branch's rate of progress. The clock reads the same value
    /// immediately before and after. While paused, only the restore scale
    /// changes. Rejects non-finite and non-positive factors; `pause` is the
    /// only way to a stopped clock.
    pub fn change_scale(&self, factor: f64) -> Result<()> {
        if !factor.is_finite() || factor <= 0.0 {
            return Err(FritterError::InvalidScale(factor));
        }
        let reinstall = {
            let mut s = self.state.borrow_mut();
            if s.paused {
                s.scale_saved = factor;
                false
            } else {
                let now_branch = s.branch_now();
                s.anchor_branch = now_branch;
                s.anchor_trunk = s.trunk.now();
                s.scale = factor;
                s.fudge = T::zero_delta();
                s.pending.is_some()
            }
        };
        debug!(factor, "branch scale changed");
        if reinstall {
            install(&self.state);
        }
        Ok(())
    }
}

impl<T: ScalableMoment> Drop for BranchManager<T> {
    fn drop(&mut self) {
        let trampoline = {
            let mut s = self.state.borrow_mut();
            s.pending = None;
            s.trampoline.take()
        };
        if let Some(call) = trampoline {
            call.cancel();
        }
    }
}

/// Derive a branch scheduler from `trunk`, running `scale` times faster,
/// with its clock initially reading `offset`.
///
/// The trunk may itself be a branch; transforms compose.
pub fn branch<T: ScalableMoment>(
    trunk: &Scheduler<T, BoxWork>,
    scale: f64,
    offset: T,
) -> Result<(BranchManager<T>, Scheduler<T, BoxWork>)> {
    if !scale.is_finite() || scale <= 0.0 {
        return Err(FritterError::InvalidScale(scale));
    }
    let state = Rc::new(RefCell::new(BranchState {
        trunk: trunk.clone(),
        anchor_trunk: trunk.now(),
        anchor_branch: offset,
        scale,
        scale_saved: scale,
        paused: false,
        fudge: T::zero_delta(),
        pending: None,
        trampoline: None,
    }));
    let scheduler = Scheduler::new(BranchDriver {
        state: state.clone(),
    });
    Ok((BranchManager { state }, scheduler))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDriver;
    use crate::scheduler::PhysicalScheduler;

    type Calls = Rc<RefCell<Vec<(f64, f64)>>>;

    fn recorder(trunk: &PhysicalScheduler, branch: &Scheduler<f64, BoxWork>, calls: &Calls) -> BoxWork {
        let trunk = trunk.clone();
        let branch = branch.clone();
        let calls = calls.clone();
        Box::new(move || calls.borrow_mut().push((trunk.now(), branch.now())))
    }

    fn one_scaled_call(scale: f64) -> Vec<(f64, f64)> {
        let driver = MemoryDriver::new();
        let trunk: PhysicalScheduler = Scheduler::new(driver.clone());
        let (_mgr, b) = branch(&trunk, scale, 0.0).unwrap();
        let calls: Calls = Rc::new(RefCell::new(Vec::new()));
        b.call_at(1.0, recorder(&trunk, &b, &calls));
        driver.advance();
        let result = calls.borrow().clone();
        result
    }

    #[test]
    fn test_scaling() {
        let calls = one_scaled_call(1.0);
        assert_eq!(calls.len(), 1);
        assert!((calls[0].0 - 1.0).abs() < 1e-9);
        assert!((calls[0].1 - 1.0).abs() < 1e-9);

        let calls = one_scaled_call(3.0);
        assert!((calls[0].0 - 1.0 / 3.0).abs() < 1e-9);
        assert!((calls[0].1 - 1.0).abs() < 1e-9);

        let calls = one_scaled_call(1.0 / 3.0);
        assert!((calls[0].0 - 3.0).abs() < 1e-9);
        assert!((calls[0].1 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_scale_rejected() {
        let driver = MemoryDriver::new();
        let trunk: PhysicalScheduler = Scheduler::new(driver.clone());

        assert!(branch(&trunk, 0.0, 0.0).is_err());
        assert!(branch(&trunk, -2.0, 0.0).is_err());
        assert!(branch(&trunk, f64::NAN, 0.0).is_err());

        let (mgr, _b) = branch(&trunk, 1.0, 0.0).unwrap();
        assert_eq!(mgr.change_scale(0.0), Err(FritterError::InvalidScale(0.0)));
        assert_eq!(
            mgr.change_scale(f64::INFINITY),
            Err(FritterError::InvalidScale(f64::INFINITY))
        );
        // Rejection leaves state untouched.
        assert!((mgr.scale() - 1.0).abs() < 1e-12);
        assert!(!mgr.is_paused());
    }

    #[test]
    fn test_change_scale_retimes_pending_call() {
        let driver = MemoryDriver::new();
        let trunk: PhysicalScheduler = Scheduler::new(driver.clone());
        let (mgr, b) = branch(&trunk, 2.0, 0.0).unwrap();
        let calls: Calls = Rc::new(RefCell::new(Vec::new()));

        b.call_at(1.0, recorder(&trunk, &b, &calls));
        driver.advance_by(0.25);
        mgr.change_scale(4.0).unwrap();

        // 0.5 branch-seconds remain; at 4x that is 1/8 trunk-seconds.
        let advanced = driver.advance().unwrap();
        assert!((advanced - 1.0 / 8.0).abs() < 1e-9);
        assert_eq!(calls.borrow().len(), 1);
        assert!((calls.borrow()[0].0 - (0.25 + 0.125)).abs() < 1e-9);
        assert!((calls.borrow()[0].1 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_pausing() {
        let driver = MemoryDriver::new();
        let trunk: PhysicalScheduler = Scheduler::new(driver.clone());
        let (mgr, b) = branch(&trunk, 1.0, 0.0).unwrap();
        let calls: Calls = Rc::new(RefCell::new(Vec::new()));

        b.call_at(1.0, recorder(&trunk, &b, &calls));
        b.call_at(2.0, recorder(&trunk, &b, &calls));

        driver.advance_by(1.5);
        assert_eq!(*calls.borrow(), vec![(1.0, 1.0)]);
        calls.borrow_mut().clear();

        mgr.pause();
        driver.advance_by(2.7);
        assert!(calls.borrow().is_empty());
        assert!((driver.now() - 4.2).abs() < 1e-9);
        assert!((b.now() - 1.5).abs() < 1e-9);

        mgr.unpause();
        driver.advance_by(0.5);
        assert!((b.now() - 2.0).abs() < 1e-9);
        assert_eq!(calls.borrow().len(), 1);
        assert!((calls.borrow()[0].0 - 4.7).abs() < 1e-9);
        assert!((calls.borrow()[0].1 - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_unpause_pause_unpause() {
        let driver = MemoryDriver::new();
        let trunk: PhysicalScheduler = Scheduler::new(driver.clone());
        let (mgr, b) = branch(&trunk, 2.0, 0.0).unwrap();

        mgr.pause();
        assert!((b.now() - 0.0).abs() < 1e-12);
        driver.advance_by(500.0);
        assert!((b.now() - 0.0).abs() < 1e-12);

        mgr.unpause();
        assert!((b.now() - 0.0).abs() < 1e-12);
        driver.advance_by(10.0);
        assert!((b.now() - 20.0).abs() < 1e-9);

        mgr.unpause(); // no-op while running
        assert!((b.now() - 20.0).abs() < 1e-9);
        driver.advance_by(10.0);
        assert!((b.now() - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_double_unpause_does_not_shift_pending_work() {
        let driver = MemoryDriver::new();
        let trunk: PhysicalScheduler = Scheduler::new(driver.clone());
        let (mgr, b) = branch(&trunk, 2.0, 0.0).unwrap();
        let calls: Calls = Rc::new(RefCell::new(Vec::new()));

        mgr.pause();
        driver.advance_by(1000.0);
        b.call_at(b.now() + 5.0, recorder(&trunk, &b, &calls));

        mgr.unpause();
        driver.advance_by(1.0);
        assert!(calls.borrow().is_empty());
        mgr.unpause();
        driver.advance_by(1.0);
        assert!(calls.borrow().is_empty());
        mgr.unpause();
        driver.advance_by(0.5);
        assert_eq!(calls.borrow().len(), 1);
        assert!((calls.borrow()[0].0 - 1002.5).abs() < 1e-9);
        assert!((calls.borrow()[0].1 - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_cancel_only_call_disarms_everything() {
        let driver = MemoryDriver::new();
        let trunk: PhysicalScheduler = Scheduler::new(driver.clone());
        let (_mgr, b) = branch(&trunk, 1.0, 0.0).unwrap();

        let only = b.call_at(1.0, Box::new(|| {}) as BoxWork);
        assert!(driver.is_scheduled());
        only.cancel();
        assert!(!driver.is_scheduled());
        assert!(trunk.is_empty());
    }

    #[test]
    fn test_continuity_across_state_changes() {
        let driver = MemoryDriver::new();
        let trunk: PhysicalScheduler = Scheduler::new(driver.clone());
        let (mgr, b) = branch(&trunk, 2.0, 0.0).unwrap();
        b.call_at(100.0, Box::new(|| {}) as BoxWork);

        driver.advance_by(3.7);

        // Continuous up to the round-trip epsilon kept for the trampoline.
        let close = |a: f64, b: f64| (a - b).abs() < 1e-9;
        let before = b.now();
        mgr.pause();
        assert!(close(b.now(), before));
        mgr.unpause();
        assert!(close(b.now(), before));
        mgr.change_scale(0.5).unwrap();
        assert!(close(b.now(), before));
        mgr.pause();
        mgr.change_scale(8.0).unwrap();
        assert!(close(b.now(), before));
        mgr.unpause();
        assert!(close(b.now(), before));
        assert!((mgr.scale() - 8.0).abs() < 1e-12);
    }

    #[test]
    fn test_nested_branches_compose() {
        let driver = MemoryDriver::new();
        let trunk: PhysicalScheduler = Scheduler::new(driver.clone());
        let (_mgr1, mid) = branch(&trunk, 2.0, 0.0).unwrap();
        let (_mgr2, leaf) = branch(&mid, 3.0, 0.0).unwrap();
        let calls: Calls = Rc::new(RefCell::new(Vec::new()));

        // 6x faster overall: leaf 3.0 is trunk 0.5.
        leaf.call_at(3.0, recorder(&trunk, &leaf, &calls));
        driver.advance();

        assert_eq!(calls.borrow().len(), 1);
        assert!((calls.borrow()[0].0 - 0.5).abs() < 1e-9);
        assert!((calls.borrow()[0].1 - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_dropping_manager_abandons_branch() {
        let driver = MemoryDriver::new();
        let trunk: PhysicalScheduler = Scheduler::new(driver.clone());
        let fired = Rc::new(RefCell::new(false));

        let (mgr, b) = branch(&trunk, 1.0, 0.0).unwrap();
        let f = fired.clone();
        b.call_at(1.0, Box::new(move || *f.borrow_mut() = true) as BoxWork);
        assert!(driver.is_scheduled());

        drop(mgr);
        assert!(trunk.is_empty());
        driver.advance_by(5.0);
        assert!(!*fired.borrow());
    }

    #[test]
    fn test_offset_start() {
        // A branch can start its clock at an arbitrary offset.
        let driver = MemoryDriver::new();
        let trunk: PhysicalScheduler = Scheduler::new(driver.clone());
        driver.advance_by(10.0);

        let (_mgr, b) = branch(&trunk, 1.0, 100.0).unwrap();
        assert!((b.now() - 100.0).abs() < 1e-9);

        let calls: Calls = Rc::new(RefCell::new(Vec::new()));
        b.call_at(101.0, recorder(&trunk, &b, &calls));
        driver.advance();
        assert!((calls.borrow()[0].0 - 11.0).abs() < 1e-9);
        assert!((calls.borrow()[0].1 - 101.0).abs() < 1e-9);
    }
}
