//! Fritter
//!
//! Scheduling future work against an abstract clock:
//! - A generic scheduler engine (`callAt`-style timed calls with cancelable
//!   handles, FIFO among equal deadlines, reentrancy-safe firing)
//! - Pluggable time drivers (in-memory virtual clock, blocking sleep,
//!   civil-time adapter; bring your own event loop via the driver contract)
//! - Drift-free repeated calls (each invocation learns how many recurrence
//!   boundaries elapsed, however late it ran)
//! - Branches: child schedulers on a linear time transform that can be
//!   paused, resumed, and re-scaled together
//!
//! The whole tree is single-threaded cooperative: one driver wakes one
//! scheduler at a time, and nothing here is `Send`.

pub mod branch;
pub mod civil;
pub mod driver;
pub mod error;
pub mod memory;
pub mod persist;
pub mod queue;
pub mod repeat;
pub mod rules;
pub mod scheduler;
pub mod sleep;
pub mod time;


pub use branch::{branch, BranchManager};
pub use civil::{CivilDriver, CivilScheduler};
pub use driver::{TimeDriver, Wake};
pub use error::{FritterError, Result};
pub use memory::MemoryDriver;
pub use persist::{PersistableWork, PersistedCall};
pub use queue::{HeapQueue, PriorityQueue};
pub use repeat::{repeatedly, repeatedly_from, Stopper};
pub use rules::{every, EverySeconds, RecurrenceRule};
pub use scheduler::{BoxWork, CallState, FutureCall, Invocable, PhysicalScheduler, Scheduler};
pub use sleep::SleepDriver;
pub use time::{Moment, ScalableMoment};
