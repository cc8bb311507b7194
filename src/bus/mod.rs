//! Update Bus (spec §4.I): single writer, multiple readers. The
//! accounting worker is the bus's only publisher; every other subsystem
//! that cares about committed usage (today: the Association Tree, for
//! fair-share) subscribes and applies what it's told, atomically, under
//! the same writer lock that already guards its own invariants.
//!
//! Modeled the way a single leader commits and followers observe: one
//! `tokio::sync::broadcast` channel, one designated writer. A lagging
//! subscriber that misses entries finds out via `RecvError::Lagged` and
//! must resynchronize from a fresh state snapshot rather than assume it
//! saw every update — the bus makes no redelivery guarantee beyond its
//! buffer.

use crate::assoc::AssociationTree;
use crate::error::ClusterResult;
use crate::wire::{Reader, UpdateKind, UpdateObject, WireRecord, Writer};
use tokio::sync::broadcast;

/// One committed usage delta, the payload shape carried inside a
/// `ModifyAssoc` `UpdateObject` (spec §4.I: "typed update objects...
/// applied atomically"). Encoded with the same `WireRecord` machinery as
/// every other wire record, so a delta can also be logged to the
/// accounting-store transport without a second representation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssocUsageDelta {
    pub assoc_id: u32,
    pub raw_delta: f64,
}

impl WireRecord for AssocUsageDelta {
    fn encode(&self, w: &mut Writer) {
        w.put_u32(self.assoc_id);
        w.put_f64(self.raw_delta);
    }

    fn decode(r: &mut Reader) -> ClusterResult<Self> {
        Ok(Self { assoc_id: r.get_u32()?, raw_delta: r.get_f64()? })
    }
}

fn encode_delta(delta: &AssocUsageDelta) -> Vec<u8> {
    let mut w = Writer::new();
    delta.encode(&mut w);
    w.into_bytes()
}

fn decode_delta(bytes: &[u8]) -> ClusterResult<AssocUsageDelta> {
    let mut r = Reader::new(bytes);
    AssocUsageDelta::decode(&mut r)
}

/// The bus itself: a broadcast sender plus the capacity it was built with
/// (subscribers need to know how far behind they can fall before
/// `Lagged`).
pub struct UpdateBus {
    sender: broadcast::Sender<UpdateObject>,
}

impl UpdateBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UpdateObject> {
        self.sender.subscribe()
    }

    /// Publish a batch of committed association-usage deltas. The only
    /// writer calling this should be the accounting worker (spec §5's
    /// concurrency model); nothing here enforces that at the type level,
    /// it is a documented single-writer discipline like the tree's own.
    pub fn publish_assoc_usage(&self, deltas: &[AssocUsageDelta]) {
        let payloads = deltas.iter().map(encode_delta).collect();
        let _ = self.sender.send(UpdateObject::new(UpdateKind::ModifyAssoc, payloads));
    }
}

/// Apply one received `UpdateObject` to the Association Tree under its own
/// writer lock. Unknown kinds are dropped silently — forward
/// compatibility, not an error (spec §4.H).
pub fn apply(tree: &AssociationTree, obj: &UpdateObject) -> ClusterResult<()> {
    match obj.kind() {
        UpdateKind::ModifyAssoc => {
            for payload in &obj.payloads {
                let delta = decode_delta(payload)?;
                tree.add_usage_raw(delta.assoc_id, delta.raw_delta)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}
