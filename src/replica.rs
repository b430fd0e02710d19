//! The replica actor.
//!
//! A replica starts by joining the arbiter and is then assigned one of two
//! roles for the rest of its life.
//!
//! The **primary** owns the authoritative map. Each `Insert`/`Remove` is
//! applied locally at once, then held as a [`PendingAck`] until the local
//! journal confirms it *and* every secondary in the current replica set has
//! acknowledged the corresponding snapshot; only then does the client get
//! `OperationAck`. A mutation that cannot complete within its one-second
//! deadline fails with `OperationFailed` instead (the local map is not rolled
//! back).
//! Replica-set changes from the arbiter retire departed secondaries, and with
//! them any acknowledgements still being awaited, and stream the current map
//! to joiners.
//!
//! A **secondary** consumes its snapshot stream strictly in sequence order,
//! persisting each snapshot with unbounded retry before acknowledging it, and
//! answers `Get` from whatever it has applied so far.

use crate::actor::{Actor, Id, Out};
use crate::msg::{Key, KvMsg, OpId, Seq, Value, SYNC_OP_ID};
use crate::replicator::Replicator;
use ahash::{AHashMap, AHashSet};
use std::ops::Range;
use std::time::Duration;

/// Window for a mutation to persist locally and replicate to every secondary.
const OP_DEADLINE: Duration = Duration::from_millis(1000);

fn op_deadline() -> Range<Duration> {
    OP_DEADLINE..OP_DEADLINE
}

/// Cadence for retransmitting unacknowledged snapshots, reissuing unpersisted
/// writes on the primary, and retrying the journal on a secondary.
fn resend_interval() -> Range<Duration> {
    Duration::from_millis(80)..Duration::from_millis(100)
}

pub struct Replica {
    pub arbiter: Id,
    pub persistence: Id,
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum ReplicaTimer {
    /// Retry the join handshake until the arbiter assigns a role.
    Join,
    /// Primary: periodic retransmission tick.
    Resend,
    /// Primary: the mutation pending on this key ran out of time.
    Deadline(Key),
    /// Secondary: retry persisting the snapshot being applied.
    PersistRetry,
}

/// Book-keeping for one in-flight mutation on the primary. There is at most
/// one of these per key; a newer mutation on the same key replaces the older
/// entry, whose client then receives no reply at all.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PendingAck {
    pub id: OpId,
    /// Absent for mutations synthesized during reconfiguration.
    pub reply_to: Option<Id>,
    /// True once the local journal confirmed the write.
    pub persisted: bool,
    /// Secondaries whose snapshot acknowledgement is still outstanding.
    pub awaiting: AHashSet<Id>,
}

#[derive(Debug)]
pub enum ReplicaState {
    /// Waiting for the arbiter to assign a role.
    Joining,
    Primary(PrimaryState),
    Secondary(SecondaryState),
}

#[derive(Debug, Default)]
pub struct PrimaryState {
    store: AHashMap<Key, Value>,
    /// One replication stream per current secondary.
    secondaries: AHashMap<Id, Replicator>,
    /// In-flight mutations, keyed by key.
    acks: AHashMap<Key, PendingAck>,
}

#[derive(Debug, Default)]
pub struct SecondaryState {
    store: AHashMap<Key, Value>,
    /// The next sequence number this secondary will apply.
    expected_seq: Seq,
    /// The snapshot applied locally but not yet journaled. While this is set
    /// the stream is blocked and incoming snapshots are ignored; the
    /// replicator's retransmission covers them.
    applying: Option<Applying>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
struct Applying {
    key: Key,
    value: Option<Value>,
    seq: Seq,
    replicator: Id,
}

impl Actor for Replica {
    type Msg = KvMsg;
    type State = ReplicaState;
    type Timer = ReplicaTimer;

    fn on_start(&self, _id: Id, o: &mut Out<Self>) -> Self::State {
        o.send(self.arbiter, KvMsg::Join);
        o.set_timer(ReplicaTimer::Join, resend_interval());
        ReplicaState::Joining
    }

    fn on_msg(&self, id: Id, state: &mut Self::State, src: Id, msg: Self::Msg, o: &mut Out<Self>) {
        match state {
            ReplicaState::Joining => match msg {
                KvMsg::JoinedPrimary => {
                    o.cancel_timer(ReplicaTimer::Join);
                    o.set_timer(ReplicaTimer::Resend, resend_interval());
                    *state = ReplicaState::Primary(PrimaryState::default());
                }
                KvMsg::JoinedSecondary => {
                    o.cancel_timer(ReplicaTimer::Join);
                    *state = ReplicaState::Secondary(SecondaryState::default());
                }
                _ => {}
            },
            ReplicaState::Primary(primary) => self.on_primary_msg(id, primary, src, msg, o),
            ReplicaState::Secondary(secondary) => self.on_secondary_msg(secondary, src, msg, o),
        }
    }

    fn on_timeout(&self, _id: Id, state: &mut Self::State, timer: &Self::Timer, o: &mut Out<Self>) {
        match (state, timer) {
            (ReplicaState::Joining, ReplicaTimer::Join) => {
                o.send(self.arbiter, KvMsg::Join);
                o.set_timer(ReplicaTimer::Join, resend_interval());
            }
            (ReplicaState::Primary(primary), ReplicaTimer::Resend) => {
                o.set_timer(ReplicaTimer::Resend, resend_interval());
                for replicator in primary.secondaries.values() {
                    for snapshot in replicator.unacknowledged() {
                        o.send(replicator.secondary(), snapshot);
                    }
                }
                for (key, pending) in &primary.acks {
                    if !pending.persisted {
                        o.send(self.persistence, KvMsg::Persist {
                            key: key.clone(),
                            value: primary.store.get(key).cloned(),
                            id: pending.id,
                        });
                    }
                }
            }
            (ReplicaState::Primary(primary), ReplicaTimer::Deadline(key)) => {
                if let Some(pending) = primary.acks.remove(key) {
                    if let Some(client) = pending.reply_to {
                        o.send(client, KvMsg::OperationFailed { id: pending.id });
                    }
                }
            }
            (ReplicaState::Secondary(secondary), ReplicaTimer::PersistRetry) => {
                if let Some(applying) = &secondary.applying {
                    o.set_timer(ReplicaTimer::PersistRetry, resend_interval());
                    o.send(self.persistence, KvMsg::Persist {
                        key: applying.key.clone(),
                        value: applying.value.clone(),
                        id: applying.seq as OpId,
                    });
                }
            }
            _ => {}
        }
    }
}

impl Replica {
    fn on_primary_msg(
        &self,
        id: Id,
        primary: &mut PrimaryState,
        src: Id,
        msg: KvMsg,
        o: &mut Out<Self>,
    ) {
        match msg {
            KvMsg::Insert { key, value, id: op } => {
                self.mutate(primary, src, key, Some(value), op, o);
            }
            KvMsg::Remove { key, id: op } => {
                self.mutate(primary, src, key, None, op, o);
            }
            KvMsg::Get { key, id: op } => {
                let value = primary.store.get(&key).cloned();
                o.send(src, KvMsg::GetResult { key, value, id: op });
            }
            KvMsg::Persisted { key, id: _ } => {
                if let Some(pending) = primary.acks.get_mut(&key) {
                    pending.persisted = true;
                    self.try_ack(primary, &key, o);
                }
            }
            KvMsg::SnapshotAck { key: _, seq } => {
                let Some(replicator) = primary.secondaries.get_mut(&src) else { return };
                let Some((key, _)) = replicator.acknowledge(seq) else { return };
                if let Some(pending) = primary.acks.get_mut(&key) {
                    pending.awaiting.remove(&src);
                    self.try_ack(primary, &key, o);
                }
            }
            KvMsg::Replicas { replicas } => self.reconfigure(id, primary, &replicas, o),
            _ => {}
        }
    }

    /// Applies a mutation locally, opens its pending entry (replacing any
    /// older one on the same key), and fans out replication and persistence.
    fn mutate(
        &self,
        primary: &mut PrimaryState,
        client: Id,
        key: Key,
        value: Option<Value>,
        op: OpId,
        o: &mut Out<Self>,
    ) {
        match &value {
            Some(value) => {
                primary.store.insert(key.clone(), value.clone());
            }
            None => {
                primary.store.remove(&key);
            }
        }
        primary.acks.insert(key.clone(), PendingAck {
            id: op,
            reply_to: Some(client),
            persisted: false,
            awaiting: primary.secondaries.keys().copied().collect(),
        });
        o.set_timer(ReplicaTimer::Deadline(key.clone()), op_deadline());
        for replicator in primary.secondaries.values_mut() {
            let snapshot = replicator.replicate(key.clone(), value.clone(), op);
            o.send(replicator.secondary(), snapshot);
        }
        o.send(self.persistence, KvMsg::Persist { key, value, id: op });
    }

    /// Replies to the client and retires the pending entry once both the
    /// journal and every awaited secondary have confirmed.
    fn try_ack(&self, primary: &mut PrimaryState, key: &Key, o: &mut Out<Self>) {
        let complete = primary
            .acks
            .get(key)
            .is_some_and(|pending| pending.persisted && pending.awaiting.is_empty());
        if !complete {
            return;
        }
        if let Some(pending) = primary.acks.remove(key) {
            o.cancel_timer(ReplicaTimer::Deadline(key.clone()));
            if let Some(client) = pending.reply_to {
                o.send(client, KvMsg::OperationAck { id: pending.id });
            }
        }
    }

    /// Adopts a new replica set from the arbiter: departed secondaries stop
    /// being awaited (their streams are dropped, outboxes and all), and each
    /// joiner gets a fresh stream preloaded with the current map. Deadlines of
    /// in-flight mutations are deliberately left untouched.
    fn reconfigure(&self, self_id: Id, primary: &mut PrimaryState, replicas: &[Id], o: &mut Out<Self>) {
        let departed: Vec<Id> = primary
            .secondaries
            .keys()
            .filter(|secondary| !replicas.contains(secondary))
            .copied()
            .collect();
        for secondary in &departed {
            primary.secondaries.remove(secondary);
        }
        if !departed.is_empty() {
            for pending in primary.acks.values_mut() {
                for secondary in &departed {
                    pending.awaiting.remove(secondary);
                }
            }
            for key in primary.acks.keys().cloned().collect::<Vec<_>>() {
                self.try_ack(primary, &key, o);
            }
        }

        for &secondary in replicas {
            if secondary == self_id || primary.secondaries.contains_key(&secondary) {
                continue;
            }
            let mut replicator = Replicator::new(secondary);
            for (key, value) in &primary.store {
                let op = match primary.acks.get_mut(key) {
                    Some(pending) => {
                        pending.awaiting.insert(secondary);
                        pending.id
                    }
                    None => SYNC_OP_ID,
                };
                let snapshot = replicator.replicate(key.clone(), Some(value.clone()), op);
                o.send(secondary, snapshot);
            }
            primary.secondaries.insert(secondary, replicator);
        }
    }

    fn on_secondary_msg(
        &self,
        secondary: &mut SecondaryState,
        src: Id,
        msg: KvMsg,
        o: &mut Out<Self>,
    ) {
        match msg {
            KvMsg::Get { key, id: op } => {
                let value = secondary.store.get(&key).cloned();
                o.send(src, KvMsg::GetResult { key, value, id: op });
            }
            KvMsg::Snapshot { key, value, seq } => {
                if secondary.applying.is_some() {
                    return;
                }
                if seq < secondary.expected_seq {
                    // Already applied; the earlier ack must have been lost.
                    o.send(src, KvMsg::SnapshotAck { key, seq });
                    return;
                }
                if seq > secondary.expected_seq {
                    return;
                }
                match &value {
                    Some(value) => {
                        secondary.store.insert(key.clone(), value.clone());
                    }
                    None => {
                        secondary.store.remove(&key);
                    }
                }
                o.send(self.persistence, KvMsg::Persist {
                    key: key.clone(),
                    value: value.clone(),
                    id: seq as OpId,
                });
                o.set_timer(ReplicaTimer::PersistRetry, resend_interval());
                secondary.applying = Some(Applying { key, value, seq, replicator: src });
            }
            KvMsg::Persisted { key: _, id: op } => {
                let Some(applying) = &secondary.applying else { return };
                if op != applying.seq as OpId {
                    return;
                }
                o.send(applying.replicator, KvMsg::SnapshotAck {
                    key: applying.key.clone(),
                    seq: applying.seq,
                });
                o.cancel_timer(ReplicaTimer::PersistRetry);
                secondary.expected_seq = applying.seq + 1;
                secondary.applying = None;
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::actor::sim::Sim;
    use crate::arbiter::Arbiter;
    use crate::persistence::{FailureMode, Persistence, PersistenceProxy};
    use choice::{choice, Choice};

    /// Everything a store cluster is made of, composed for the simulator.
    type Node = choice![Replica, Arbiter, PersistenceProxy, Persistence];

    const ARBITER: usize = 1;
    const CLIENT: usize = 900;
    /// An id nobody answers for; useful as an unreachable secondary or a fake
    /// replicator.
    const GHOST: usize = 901;

    fn add_node(sim: &mut Sim<Node>, slot: usize, mode: FailureMode) -> Id {
        let replica = Id::from(10 * slot);
        let proxy = Id::from(10 * slot + 1);
        let journal = Id::from(10 * slot + 2);
        sim.add(journal, Choice::new(Persistence { mode }).or().or().or());
        sim.add(
            proxy,
            Choice::new(PersistenceProxy { child: journal, client: replica }).or().or(),
        );
        sim.add(
            replica,
            Choice::new(Replica { arbiter: Id::from(ARBITER), persistence: proxy }),
        );
        replica
    }

    /// One node per failure mode; the first becomes primary. Runs until the
    /// join handshakes settle.
    fn cluster(modes: &[FailureMode]) -> (Sim<Node>, Vec<Id>) {
        let mut sim = Sim::new();
        sim.add(ARBITER, Choice::new(Arbiter).or());
        let replicas = modes
            .iter()
            .enumerate()
            .map(|(i, mode)| add_node(&mut sim, i + 1, *mode))
            .collect();
        sim.run();
        (sim, replicas)
    }

    /// Drains everything addressed to the test client.
    fn client_replies(sim: &mut Sim<Node>) -> Vec<KvMsg> {
        sim.take_egress()
            .into_iter()
            .filter(|envelope| envelope.dst == Id::from(CLIENT))
            .map(|envelope| envelope.msg)
            .collect()
    }

    /// Drains SnapshotAcks addressed to the ghost replicator.
    fn ghost_acks(sim: &mut Sim<Node>) -> Vec<KvMsg> {
        sim.take_egress()
            .into_iter()
            .filter(|envelope| {
                envelope.dst == Id::from(GHOST)
                    && matches!(envelope.msg, KvMsg::SnapshotAck { .. })
            })
            .map(|envelope| envelope.msg)
            .collect()
    }

    /// Issues a Get and returns its result, draining any other egress.
    fn get(sim: &mut Sim<Node>, replica: Id, key: &str, op: OpId) -> Option<Value> {
        sim.send(CLIENT, replica, KvMsg::Get { key: key.into(), id: op });
        sim.run();
        for msg in client_replies(sim) {
            if let KvMsg::GetResult { value, id, .. } = msg {
                if id == op {
                    return value;
                }
            }
        }
        panic!("no GetResult for operation {op}");
    }

    fn primary(sim: &Sim<Node>, id: Id) -> &PrimaryState {
        match sim.state(id) {
            Choice::L(ReplicaState::Primary(primary)) => primary,
            state => panic!("not a primary: {state:?}"),
        }
    }

    fn secondary(sim: &Sim<Node>, id: Id) -> &SecondaryState {
        match sim.state(id) {
            Choice::L(ReplicaState::Secondary(secondary)) => secondary,
            state => panic!("not a secondary: {state:?}"),
        }
    }

    #[test]
    fn lone_primary_acks_once_persisted() {
        let (mut sim, replicas) = cluster(&[FailureMode::Reliable]);
        sim.send(CLIENT, replicas[0], KvMsg::Insert { key: "a".into(), value: "1".into(), id: 1 });
        sim.run();
        assert_eq!(client_replies(&mut sim), vec![KvMsg::OperationAck { id: 1 }]);
        assert_eq!(get(&mut sim, replicas[0], "a", 2), Some("1".into()));
    }

    #[test]
    fn replicated_insert_reaches_the_secondary() {
        let (mut sim, replicas) = cluster(&[FailureMode::Reliable, FailureMode::Reliable]);
        sim.send(CLIENT, replicas[0], KvMsg::Insert { key: "k".into(), value: "v".into(), id: 10 });
        sim.run();
        assert_eq!(client_replies(&mut sim), vec![KvMsg::OperationAck { id: 10 }]);
        assert_eq!(get(&mut sim, replicas[1], "k", 11), Some("v".into()));
    }

    #[test]
    fn ack_waits_for_the_secondary_and_survives_a_dropped_persist() {
        // The secondary's journal drops the first request, so the snapshot
        // acknowledgement only goes out after the persist retry.
        let (mut sim, replicas) = cluster(&[FailureMode::Reliable, FailureMode::DropFirst(1)]);
        sim.send(CLIENT, replicas[0], KvMsg::Insert { key: "k".into(), value: "v".into(), id: 10 });
        sim.run();
        assert_eq!(client_replies(&mut sim), vec![]);
        sim.elapse(Duration::from_millis(200));
        assert_eq!(client_replies(&mut sim), vec![KvMsg::OperationAck { id: 10 }]);
        assert_eq!(get(&mut sim, replicas[1], "k", 11), Some("v".into()));
    }

    #[test]
    fn failed_persistence_times_out_but_keeps_local_state() {
        let (mut sim, replicas) = cluster(&[FailureMode::DropEvery(1)]);
        sim.send(CLIENT, replicas[0], KvMsg::Insert { key: "x".into(), value: "y".into(), id: 20 });
        sim.run();
        assert_eq!(client_replies(&mut sim), vec![]);
        sim.elapse(Duration::from_millis(1100));
        assert_eq!(client_replies(&mut sim), vec![KvMsg::OperationFailed { id: 20 }]);
        assert_eq!(get(&mut sim, replicas[0], "x", 21), Some("y".into()));
    }

    #[test]
    fn departing_replica_unblocks_pending_operations() {
        // The secondary applies the snapshot but can never persist it, so its
        // acknowledgement is outstanding until the arbiter drops it.
        let (mut sim, replicas) = cluster(&[FailureMode::Reliable, FailureMode::DropEvery(1)]);
        sim.send(CLIENT, replicas[0], KvMsg::Insert { key: "k".into(), value: "v".into(), id: 30 });
        sim.run();
        assert_eq!(client_replies(&mut sim), vec![]);

        sim.send(ARBITER, replicas[0], KvMsg::Replicas { replicas: vec![replicas[0]] });
        sim.run();
        assert_eq!(client_replies(&mut sim), vec![KvMsg::OperationAck { id: 30 }]);
        let primary = primary(&sim, replicas[0]);
        assert!(primary.acks.is_empty());
        assert!(primary.secondaries.is_empty());
    }

    #[test]
    fn new_secondary_catches_up_from_the_current_map() {
        let (mut sim, replicas) = cluster(&[FailureMode::Reliable]);
        sim.send(CLIENT, replicas[0], KvMsg::Insert { key: "a".into(), value: "1".into(), id: 1 });
        sim.send(CLIENT, replicas[0], KvMsg::Insert { key: "b".into(), value: "2".into(), id: 2 });
        sim.run();
        assert_eq!(
            client_replies(&mut sim),
            vec![KvMsg::OperationAck { id: 1 }, KvMsg::OperationAck { id: 2 }]
        );

        // A new node joins through the arbiter; no client action involved.
        let joiner = add_node(&mut sim, 2, FailureMode::Reliable);
        sim.run();
        assert_eq!(get(&mut sim, joiner, "a", 3), Some("1".into()));
        assert_eq!(get(&mut sim, joiner, "b", 4), Some("2".into()));
        assert_eq!(secondary(&sim, joiner).expected_seq, 2);
    }

    #[test]
    fn superseding_mutation_silences_the_first_reply() {
        let (mut sim, replicas) = cluster(&[FailureMode::Reliable, FailureMode::DropEvery(1)]);
        sim.send(CLIENT, replicas[0], KvMsg::Insert { key: "k".into(), value: "a".into(), id: 1 });
        sim.run();
        sim.send(CLIENT, replicas[0], KvMsg::Insert { key: "k".into(), value: "b".into(), id: 2 });
        sim.run();
        assert_eq!(client_replies(&mut sim), vec![]);

        // Dropping the stuck secondary completes the surviving mutation. The
        // superseded one is gone: no ack, no failure, not even at deadline.
        sim.send(ARBITER, replicas[0], KvMsg::Replicas { replicas: vec![replicas[0]] });
        sim.run();
        sim.elapse(Duration::from_millis(1500));
        assert_eq!(client_replies(&mut sim), vec![KvMsg::OperationAck { id: 2 }]);
        assert_eq!(get(&mut sim, replicas[0], "k", 3), Some("b".into()));
    }

    #[test]
    fn deadline_is_not_reset_by_reconfiguration() {
        let (mut sim, replicas) = cluster(&[FailureMode::DropEvery(1)]);
        sim.send(CLIENT, replicas[0], KvMsg::Insert { key: "x".into(), value: "y".into(), id: 40 });
        sim.run();
        sim.elapse(Duration::from_millis(600));
        assert_eq!(client_replies(&mut sim), vec![]);

        // A joiner that never acknowledges now shares the blame, but the
        // mutation's clock started at receipt and keeps running.
        let ghost = Id::from(GHOST);
        sim.send(ARBITER, replicas[0], KvMsg::Replicas { replicas: vec![replicas[0], ghost] });
        sim.run();
        let awaiting = &primary(&sim, replicas[0]).acks["x"].awaiting;
        assert_eq!(awaiting.iter().copied().collect::<Vec<_>>(), vec![ghost]);

        sim.elapse(Duration::from_millis(300));
        assert_eq!(client_replies(&mut sim), vec![]);
        sim.elapse(Duration::from_millis(200));
        assert_eq!(client_replies(&mut sim), vec![KvMsg::OperationFailed { id: 40 }]);
    }

    #[test]
    fn remove_clears_the_key_everywhere() {
        let (mut sim, replicas) = cluster(&[FailureMode::Reliable, FailureMode::Reliable]);
        sim.send(CLIENT, replicas[0], KvMsg::Insert { key: "k".into(), value: "v".into(), id: 1 });
        sim.send(CLIENT, replicas[0], KvMsg::Remove { key: "k".into(), id: 2 });
        sim.run();
        assert_eq!(
            client_replies(&mut sim),
            vec![KvMsg::OperationAck { id: 1 }, KvMsg::OperationAck { id: 2 }]
        );
        assert_eq!(get(&mut sim, replicas[0], "k", 3), None);
        assert_eq!(get(&mut sim, replicas[1], "k", 4), None);
    }

    #[test]
    fn gets_never_fail() {
        let (mut sim, replicas) = cluster(&[FailureMode::Reliable]);
        assert_eq!(get(&mut sim, replicas[0], "missing", 1), None);
    }

    #[test]
    fn secondary_ignores_client_mutations() {
        let (mut sim, replicas) = cluster(&[FailureMode::Reliable, FailureMode::Reliable]);
        sim.send(CLIENT, replicas[1], KvMsg::Insert { key: "k".into(), value: "v".into(), id: 1 });
        sim.run();
        assert_eq!(client_replies(&mut sim), vec![]);
        assert_eq!(get(&mut sim, replicas[1], "k", 2), None);
    }

    #[test]
    fn out_of_order_snapshots_wait_for_the_gap_to_fill() {
        let (mut sim, replicas) = cluster(&[FailureMode::Reliable, FailureMode::Reliable]);
        let follower = replicas[1];

        // Sequence 1 ahead of sequence 0: ignored, not even acknowledged.
        sim.send(GHOST, follower, KvMsg::Snapshot { key: "k".into(), value: Some("v1".into()), seq: 1 });
        sim.run();
        assert_eq!(ghost_acks(&mut sim), vec![]);
        assert_eq!(get(&mut sim, follower, "k", 1), None);

        sim.send(GHOST, follower, KvMsg::Snapshot { key: "k".into(), value: Some("v0".into()), seq: 0 });
        sim.run();
        assert_eq!(ghost_acks(&mut sim), vec![KvMsg::SnapshotAck { key: "k".into(), seq: 0 }]);
        assert_eq!(get(&mut sim, follower, "k", 2), Some("v0".into()));

        // The retransmission of sequence 1 now lands.
        sim.send(GHOST, follower, KvMsg::Snapshot { key: "k".into(), value: Some("v1".into()), seq: 1 });
        sim.run();
        assert_eq!(ghost_acks(&mut sim), vec![KvMsg::SnapshotAck { key: "k".into(), seq: 1 }]);
        assert_eq!(get(&mut sim, follower, "k", 3), Some("v1".into()));
        assert_eq!(secondary(&sim, follower).expected_seq, 2);
    }

    #[test]
    fn stale_snapshots_are_reacked_without_reapplying() {
        let (mut sim, replicas) = cluster(&[FailureMode::Reliable, FailureMode::Reliable]);
        let follower = replicas[1];
        sim.send(GHOST, follower, KvMsg::Snapshot { key: "k".into(), value: Some("v0".into()), seq: 0 });
        sim.run();
        sim.take_egress();

        for _ in 0..2 {
            sim.send(GHOST, follower, KvMsg::Snapshot { key: "k".into(), value: Some("stale".into()), seq: 0 });
            sim.run();
            assert_eq!(ghost_acks(&mut sim), vec![KvMsg::SnapshotAck { key: "k".into(), seq: 0 }]);
        }
        assert_eq!(get(&mut sim, follower, "k", 1), Some("v0".into()));
        assert_eq!(secondary(&sim, follower).expected_seq, 1);
    }

    #[test]
    fn in_flight_snapshot_blocks_the_stream_until_persisted() {
        let (mut sim, replicas) = cluster(&[FailureMode::Reliable, FailureMode::DropFirst(1)]);
        let follower = replicas[1];
        sim.send(GHOST, follower, KvMsg::Snapshot { key: "k".into(), value: Some("v0".into()), seq: 0 });
        sim.run();
        // Applied locally, but the journal dropped the write: reads see the
        // value while the acknowledgement stays pending.
        assert_eq!(ghost_acks(&mut sim), vec![]);
        assert_eq!(get(&mut sim, follower, "k", 1), Some("v0".into()));

        // Retransmissions and successors are both ignored while blocked.
        sim.send(GHOST, follower, KvMsg::Snapshot { key: "k".into(), value: Some("v0".into()), seq: 0 });
        sim.send(GHOST, follower, KvMsg::Snapshot { key: "k".into(), value: Some("v1".into()), seq: 1 });
        sim.run();
        assert_eq!(ghost_acks(&mut sim), vec![]);
        assert_eq!(secondary(&sim, follower).expected_seq, 0);

        // The persist retry gets through and unblocks the stream.
        sim.elapse(Duration::from_millis(200));
        assert_eq!(ghost_acks(&mut sim), vec![KvMsg::SnapshotAck { key: "k".into(), seq: 0 }]);
        sim.send(GHOST, follower, KvMsg::Snapshot { key: "k".into(), value: Some("v1".into()), seq: 1 });
        sim.run();
        assert_eq!(ghost_acks(&mut sim), vec![KvMsg::SnapshotAck { key: "k".into(), seq: 1 }]);
        assert_eq!(get(&mut sim, follower, "k", 2), Some("v1".into()));
    }
}
