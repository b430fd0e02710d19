//! A minimal membership authority for demos and end-to-end tests.
//!
//! The first replica to [`KvMsg::Join`] is told [`KvMsg::JoinedPrimary`];
//! every later joiner becomes a secondary. After each join the arbiter sends
//! the full replica set (primary included) to the primary, which reconfigures
//! its replication fan-out accordingly. Departures are not client-initiated
//! here; tests exercise them by sending [`KvMsg::Replicas`] to the primary
//! directly.

use crate::actor::{Actor, Id, Out};
use crate::msg::KvMsg;

pub struct Arbiter;

#[derive(Debug, Default)]
pub struct ArbiterState {
    primary: Option<Id>,
    /// Join order, primary first.
    replicas: Vec<Id>,
}

impl Actor for Arbiter {
    type Msg = KvMsg;
    type State = ArbiterState;
    type Timer = ();

    fn on_start(&self, _id: Id, _o: &mut Out<Self>) -> Self::State {
        ArbiterState::default()
    }

    fn on_msg(&self, _id: Id, state: &mut Self::State, src: Id, msg: Self::Msg, o: &mut Out<Self>) {
        let KvMsg::Join = msg else { return };
        if !state.replicas.contains(&src) {
            state.replicas.push(src);
        }
        match state.primary {
            None => {
                state.primary = Some(src);
                o.send(src, KvMsg::JoinedPrimary);
            }
            Some(primary) if primary == src => o.send(src, KvMsg::JoinedPrimary),
            Some(_) => o.send(src, KvMsg::JoinedSecondary),
        }
        if let Some(primary) = state.primary {
            o.send(primary, KvMsg::Replicas { replicas: state.replicas.clone() });
        }
    }
}
