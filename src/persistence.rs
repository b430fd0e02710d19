//! The persistence collaborator and its supervising proxy.
//!
//! [`Persistence`] stands in for a storage device: it journals each persist
//! request and confirms it, except when its configured [`FailureMode`] makes
//! it drop the request or crash outright. Replicas never address it directly;
//! they talk to a [`PersistenceProxy`], which keeps a stable address in front
//! of a child that may be torn down and restarted at any time (see
//! [`spawn_supervised`](crate::actor::spawn_supervised)).
//!
//! Callers own the retry story: a request the journal dropped is simply
//! reissued on the caller's next retry tick.

use crate::actor::{Actor, Id, Out};
use crate::msg::{Key, KvMsg, Value};
use ahash::AHashMap;

/// How the journal misbehaves. Counters are 1-based and `n` must be nonzero
/// for the `Every` modes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailureMode {
    /// Every request is journaled and confirmed.
    Reliable,
    /// The first `n` requests are silently dropped; later ones succeed.
    DropFirst(u64),
    /// Every `n`th request is silently dropped. `DropEvery(1)` drops all.
    DropEvery(u64),
    /// Every `n`th request panics the actor. Under a supervised runtime the
    /// journal restarts empty, with its request counter reset.
    CrashEvery(u64),
}

/// The flaky journal itself.
pub struct Persistence {
    pub mode: FailureMode,
}

#[derive(Debug, Default)]
pub struct PersistenceState {
    journal: AHashMap<Key, Option<Value>>,
    requests: u64,
}

impl PersistenceState {
    /// The most recently journaled value per key (`None` records a removal).
    pub fn journal(&self) -> &AHashMap<Key, Option<Value>> {
        &self.journal
    }
}

impl Actor for Persistence {
    type Msg = KvMsg;
    type State = PersistenceState;
    type Timer = ();

    fn on_start(&self, _id: Id, _o: &mut Out<Self>) -> Self::State {
        PersistenceState::default()
    }

    fn on_msg(&self, _id: Id, state: &mut Self::State, src: Id, msg: Self::Msg, o: &mut Out<Self>) {
        let KvMsg::Persist { key, value, id } = msg else { return };
        state.requests += 1;
        match self.mode {
            FailureMode::DropFirst(n) if state.requests <= n => return,
            FailureMode::DropEvery(n) if state.requests % n == 0 => return,
            FailureMode::CrashEvery(n) if state.requests % n == 0 => {
                panic!("injected journal fault on request {}", state.requests);
            }
            _ => {}
        }
        state.journal.insert(key.clone(), value);
        o.send(src, KvMsg::Persisted { key, id });
    }
}

/// Stands between a replica and its journal. Requests from the replica side
/// are forwarded down to the child; everything the child says is forwarded up
/// to the configured client. Neither direction alters the message, so the
/// proxy can be restarted around a failed child without the replica noticing.
pub struct PersistenceProxy {
    pub child: Id,
    pub client: Id,
}

impl Actor for PersistenceProxy {
    type Msg = KvMsg;
    type State = ();
    type Timer = ();

    fn on_start(&self, _id: Id, _o: &mut Out<Self>) -> Self::State {}

    fn on_msg(&self, _id: Id, _state: &mut Self::State, src: Id, msg: Self::Msg, o: &mut Out<Self>) {
        if src == self.child {
            o.send(self.client, msg);
        } else {
            o.send(self.child, msg);
        }
    }
}
