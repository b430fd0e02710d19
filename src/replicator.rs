//! Converts primary-side mutations into the ordered, retried snapshot stream
//! consumed by one secondary.
//!
//! Each secondary gets its own `Replicator`, owned by the primary. Every
//! mutation destined for the secondary is assigned the next sequence number
//! and parked in an outbox until the matching [`KvMsg::SnapshotAck`] arrives;
//! the primary retransmits the whole outbox on its periodic resend tick. The
//! secondary applies snapshots strictly in sequence order, so the stream may
//! be pipelined freely and retransmission is always safe.

use crate::actor::Id;
use crate::msg::{Key, KvMsg, OpId, Seq, Value};
use std::collections::BTreeMap;

/// A snapshot the secondary has not yet acknowledged.
#[derive(Clone, Debug, Eq, PartialEq)]
struct Unacked {
    key: Key,
    value: Option<Value>,
    id: OpId,
}

/// The replication stream state for one secondary.
///
/// Dropping a `Replicator` is how a departing secondary's stream shuts down:
/// whatever remains in the outbox is discarded, which is safe because the
/// primary stops awaiting the departed secondary in the same reconfiguration
/// step.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Replicator {
    secondary: Id,
    next_seq: Seq,
    outbox: BTreeMap<Seq, Unacked>,
}

impl Replicator {
    pub fn new(secondary: Id) -> Self {
        Self {
            secondary,
            next_seq: 0,
            outbox: BTreeMap::new(),
        }
    }

    /// The secondary this stream feeds.
    pub fn secondary(&self) -> Id {
        self.secondary
    }

    /// Queues a mutation on the stream and returns the snapshot to send now.
    /// A second mutation on the same key gets its own sequence number; the
    /// outbox is keyed by sequence, never by key.
    pub fn replicate(&mut self, key: Key, value: Option<Value>, id: OpId) -> KvMsg {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.outbox.insert(seq, Unacked { key: key.clone(), value: value.clone(), id });
        KvMsg::Snapshot { key, value, seq }
    }

    /// Handles an ack from the secondary. Returns the key and operation id of
    /// the completed mutation, or `None` if the sequence number was not
    /// outstanding (a duplicate ack, or one for a superseded retransmission).
    pub fn acknowledge(&mut self, seq: Seq) -> Option<(Key, OpId)> {
        self.outbox.remove(&seq).map(|unacked| (unacked.key, unacked.id))
    }

    /// The snapshots to retransmit, lowest sequence number first.
    pub fn unacknowledged(&self) -> impl Iterator<Item = KvMsg> + '_ {
        self.outbox.iter().map(|(seq, unacked)| KvMsg::Snapshot {
            key: unacked.key.clone(),
            value: unacked.value.clone(),
            seq: *seq,
        })
    }
}
