//! The message vocabulary shared by every actor in the store: clients,
//! replicas, the arbiter, and the persistence collaborator all speak
//! [`KvMsg`], so one wire format covers the whole cluster.

use crate::actor::Id;

/// Map keys are opaque strings, unique within the store.
pub type Key = String;
/// Values are arbitrary UTF-8 text.
pub type Value = String;
/// Client-chosen correlation token, echoed in replies. Unique per client
/// session, not globally. Also carries snapshot sequence numbers on the
/// persistence channel.
pub type OpId = i64;
/// Position in a replication stream. Assigned per secondary, starting at 0,
/// contiguous.
pub type Seq = u64;

/// Operation id attached to snapshots replicated without a requesting client,
/// e.g. when bringing a newly joined secondary up to date.
pub const SYNC_OP_ID: OpId = -1;

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub enum KvMsg {
    // Client requests, served by the primary. Secondaries answer `Get` only.
    Insert { key: Key, value: Value, id: OpId },
    Remove { key: Key, id: OpId },
    Get { key: Key, id: OpId },

    // Replies to clients.
    /// The mutation was persisted locally and confirmed by every secondary
    /// that was a member when it completed.
    OperationAck { id: OpId },
    /// The mutation did not complete within its deadline. Local primary state
    /// is not rolled back.
    OperationFailed { id: OpId },
    /// Always answered, immediately; a missing key carries `value: None`.
    GetResult { key: Key, value: Option<Value>, id: OpId },

    // Membership, between replicas and the arbiter.
    Join,
    JoinedPrimary,
    JoinedSecondary,
    /// The current replica set, primary included. Sent to the primary.
    Replicas { replicas: Vec<Id> },

    // The replication stream, from a primary's replicator to its secondary.
    /// `value: None` replicates a removal.
    Snapshot { key: Key, value: Option<Value>, seq: Seq },
    SnapshotAck { key: Key, seq: Seq },

    // The persistence channel. `id` carries the operation id on the primary
    // and the snapshot sequence number on a secondary.
    Persist { key: Key, value: Option<Value>, id: OpId },
    Persisted { key: Key, id: OpId },
}
