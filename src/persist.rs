//! Persistable work
//!
//! The scheduler itself never serializes anything; formats and type-code
//! registries belong to the layer above. What lives here is the minimum
//! surface that layer needs: a work item that can name its type and encode
//! itself into a flat map, an enumeration of live calls in insertion order,
//! and a bulk re-insert that hands out fresh ids.

use crate::queue::PriorityQueue;
use crate::scheduler::{CallRecord, Scheduler};
use crate::time::Moment;
use serde::Serialize;
use serde_json::{Map, Value};

/// The encoded form of one work item: a key-value map with primitive
/// leaves.
pub type Payload = Map<String, Value>;

/// Work that can round-trip through persistence.
///
/// Decoding receives a caller-supplied context so reconstructed work can be
/// re-wired to live application objects.
pub trait PersistableWork: crate::scheduler::Invocable + Sized {
    type Context;

    /// A stable identifier for this kind of work, used to find the decoder
    /// on load.
    fn type_code(&self) -> String;

    fn encode(&self) -> Payload;

    /// Reconstruct a work item. Returns None for unknown type codes or
    /// malformed payloads.
    fn decode(type_code: &str, payload: &Payload, ctx: &mut Self::Context) -> Option<Self>;
}

/// One live call as seen by the persistence layer.
#[derive(Clone, Debug, Serialize)]
pub struct PersistedCall<T> {
    pub when: T,
    pub type_code: String,
    pub payload: Payload,
}

impl<T, W, Q> Scheduler<T, W, Q>
where
    T: Moment,
    W: PersistableWork,
    Q: PriorityQueue<T, CallRecord<W>> + 'static,
{
    /// All live (pending) calls, in original insertion order. Cancelled and
    /// already-fired calls do not appear.
    pub fn snapshot(&self) -> Vec<PersistedCall<T>> {
        let core = self.core.borrow();
        let mut items = core.queue.items();
        items.sort_by_key(|(id, _, _)| *id);
        items
            .into_iter()
            .map(|(_, when, record)| PersistedCall {
                when,
                type_code: record.work().type_code(),
                payload: record.work().encode(),
            })
            .collect()
    }

    /// Re-insert previously-snapshotted calls, assigning fresh ids.
    ///
    /// Iteration order becomes insertion order, so the (deadline, order)
    /// tie-break of the snapshot is preserved across a save/load cycle.
    pub fn restore(&self, items: impl IntoIterator<Item = (T, W)>) {
        self.bulk_insert(items);
    }
}
