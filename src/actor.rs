//! This module provides an [`Actor`] trait along with two ways to execute
//! actors: [`spawn()`] runs one actor per thread with JSON-over-UDP messaging,
//! while [`sim::Sim`] executes a whole system deterministically in-process,
//! which is how the protocol tests in this crate drive multi-actor scenarios.
//!
//! An actor initializes its state in [`Actor::on_start`], then reacts to
//! messages and named timers by mutating that state and emitting [`Command`]s
//! through an [`Out`] buffer. Actors never touch sockets, clocks, or threads
//! directly; those effects belong to whichever runtime hosts them.
//!
//! ## Example
//!
//! ```
//! use replikv::actor::*;
//! use replikv::actor::sim::Sim;
//!
//! /// Bounces a counter between two peers, incrementing it on each hop.
//! struct Counter { peer: Option<Id> }
//!
//! impl Actor for Counter {
//!     type Msg = u32;
//!     type State = u32;
//!     type Timer = ();
//!
//!     fn on_start(&self, _id: Id, o: &mut Out<Self>) -> Self::State {
//!         if let Some(peer) = self.peer {
//!             o.send(peer, 1);
//!         }
//!         0
//!     }
//!
//!     fn on_msg(&self, _id: Id, state: &mut Self::State, src: Id, msg: Self::Msg, o: &mut Out<Self>) {
//!         if msg > *state && msg < 3 {
//!             o.send(src, msg + 1);
//!         }
//!         *state = msg.max(*state);
//!     }
//! }
//!
//! let mut sim = Sim::new();
//! sim.add(0, Counter { peer: None });
//! sim.add(1, Counter { peer: Some(Id::from(0)) });
//! sim.run();
//! assert_eq!(*sim.state(0), 3);
//! assert_eq!(*sim.state(1), 2);
//! ```

use choice::{Choice, Never};
use std::fmt::{Debug, Display, Formatter};
use std::hash::Hash;
use std::net::SocketAddrV4;
use std::ops::Range;
use std::time::Duration;

pub mod sim;
mod spawn;
pub use spawn::*;

/// Uniquely identifies an [`Actor`]. Encodes the socket address for spawned
/// actors and a plain index for simulated ones.
#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct Id(pub(crate) u64);

impl Debug for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("Id({})", self.0))
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&SocketAddrV4::from(*self), f)
    }
}

impl From<Id> for usize {
    fn from(id: Id) -> Self {
        id.0 as usize
    }
}

impl From<usize> for Id {
    fn from(u: usize) -> Self {
        Id(u as u64)
    }
}

/// Commands with which an actor can respond.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Command<Msg, Timer> {
    /// Send a message to a destination.
    Send(Id, Msg),
    /// Set/reset the named timer. The hosting runtime picks a duration within
    /// the given range.
    SetTimer(Timer, Range<Duration>),
    /// Cancel the named timer if it is set.
    CancelTimer(Timer),
}

/// Holds [`Command`]s output by an actor.
pub struct Out<A: Actor>(Vec<Command<A::Msg, A::Timer>>);

impl<A: Actor> Out<A> {
    /// Constructs an empty `Out`. Runtimes (and tests that drive an actor by
    /// hand) pass one of these into each callback.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Records the need to send a message. See [`Actor::on_msg`].
    pub fn send(&mut self, recipient: Id, msg: A::Msg) {
        self.0.push(Command::Send(recipient, msg));
    }

    /// Records the need to send a message to multiple recipients.
    pub fn broadcast<'a>(&mut self, recipients: impl IntoIterator<Item = &'a Id>, msg: &A::Msg) {
        for recipient in recipients {
            self.send(*recipient, msg.clone());
        }
    }

    /// Records the need to set the named timer. See [`Actor::on_timeout`].
    pub fn set_timer(&mut self, timer: A::Timer, within: Range<Duration>) {
        self.0.push(Command::SetTimer(timer, within));
    }

    /// Records the need to cancel the named timer.
    pub fn cancel_timer(&mut self, timer: A::Timer) {
        self.0.push(Command::CancelTimer(timer));
    }
}

impl<A: Actor> Default for Out<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Actor> Debug for Out<A> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl<A: Actor> std::ops::Deref for Out<A> {
    type Target = [Command<A::Msg, A::Timer>];
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<A: Actor> IntoIterator for Out<A> {
    type Item = Command<A::Msg, A::Timer>;
    type IntoIter = std::vec::IntoIter<Command<A::Msg, A::Timer>>;
    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// An actor initializes internal state optionally emitting [outputs]; then it
/// waits for incoming events, responding by updating its internal state and
/// optionally emitting [outputs].
///
/// [outputs]: Out
pub trait Actor: Sized {
    /// The type of messages sent and received by the actor.
    type Msg: Clone + Debug;

    /// The type of state maintained by the actor.
    type State: Debug;

    /// Identifies the timers the actor can arm. Each named timer is a single
    /// slot: setting it again reschedules it.
    type Timer: Clone + Debug + Eq + Hash;

    /// Indicates the initial state and commands.
    fn on_start(&self, id: Id, o: &mut Out<Self>) -> Self::State;

    /// Indicates the next state and commands when a message is received.
    fn on_msg(&self, id: Id, state: &mut Self::State, src: Id, msg: Self::Msg, o: &mut Out<Self>);

    /// Indicates the next state and commands when a timer fires. The timer is
    /// disarmed before this is called; re-arm it for periodic behavior.
    fn on_timeout(
        &self,
        _id: Id,
        _state: &mut Self::State,
        _timer: &Self::Timer,
        _o: &mut Out<Self>,
    ) {
        // no-op by default
    }
}

/// Moves commands produced by an inner actor into an outer actor's buffer,
/// lifting timer names with `lift`.
fn relay<A, B>(from: Out<A>, to: &mut Out<B>, lift: impl Fn(A::Timer) -> B::Timer)
where
    A: Actor,
    B: Actor<Msg = A::Msg>,
{
    for command in from {
        match command {
            Command::Send(dst, msg) => to.0.push(Command::Send(dst, msg)),
            Command::SetTimer(timer, within) => to.0.push(Command::SetTimer(lift(timer), within)),
            Command::CancelTimer(timer) => to.0.push(Command::CancelTimer(lift(timer))),
        }
    }
}

impl<A> Actor for Choice<A, Never>
where
    A: Actor,
{
    type Msg = A::Msg;
    type State = Choice<A::State, Never>;
    type Timer = Choice<A::Timer, Never>;

    fn on_start(&self, id: Id, o: &mut Out<Self>) -> Self::State {
        let mut inner = Out::new();
        let state = self.get().on_start(id, &mut inner);
        relay(inner, o, Choice::new);
        Choice::new(state)
    }

    fn on_msg(&self, id: Id, state: &mut Self::State, src: Id, msg: Self::Msg, o: &mut Out<Self>) {
        let Choice::L(state) = state else { unreachable!() };
        let mut inner = Out::new();
        self.get().on_msg(id, state, src, msg, &mut inner);
        relay(inner, o, Choice::new);
    }

    fn on_timeout(&self, id: Id, state: &mut Self::State, timer: &Self::Timer, o: &mut Out<Self>) {
        let (Choice::L(state), Choice::L(timer)) = (state, timer) else { unreachable!() };
        let mut inner = Out::new();
        self.get().on_timeout(id, state, timer, &mut inner);
        relay(inner, o, Choice::new);
    }
}

impl<Msg, A1, A2> Actor for Choice<A1, A2>
where
    Msg: Clone + Debug,
    A1: Actor<Msg = Msg>,
    A2: Actor<Msg = Msg>,
{
    type Msg = Msg;
    type State = Choice<A1::State, A2::State>;
    type Timer = Choice<A1::Timer, A2::Timer>;

    fn on_start(&self, id: Id, o: &mut Out<Self>) -> Self::State {
        match self {
            Choice::L(actor) => {
                let mut inner = Out::new();
                let state = actor.on_start(id, &mut inner);
                relay(inner, o, Choice::L);
                Choice::L(state)
            }
            Choice::R(actor) => {
                let mut inner = Out::new();
                let state = actor.on_start(id, &mut inner);
                relay(inner, o, Choice::R);
                Choice::R(state)
            }
        }
    }

    fn on_msg(&self, id: Id, state: &mut Self::State, src: Id, msg: Self::Msg, o: &mut Out<Self>) {
        match (self, state) {
            (Choice::L(actor), Choice::L(state)) => {
                let mut inner = Out::new();
                actor.on_msg(id, state, src, msg, &mut inner);
                relay(inner, o, Choice::L);
            }
            (Choice::R(actor), Choice::R(state)) => {
                let mut inner = Out::new();
                actor.on_msg(id, state, src, msg, &mut inner);
                relay(inner, o, Choice::R);
            }
            _ => unreachable!(),
        }
    }

    fn on_timeout(&self, id: Id, state: &mut Self::State, timer: &Self::Timer, o: &mut Out<Self>) {
        match (self, state, timer) {
            (Choice::L(actor), Choice::L(state), Choice::L(timer)) => {
                let mut inner = Out::new();
                actor.on_timeout(id, state, timer, &mut inner);
                relay(inner, o, Choice::L);
            }
            (Choice::R(actor), Choice::R(state), Choice::R(timer)) => {
                let mut inner = Out::new();
                actor.on_timeout(id, state, timer, &mut inner);
                relay(inner, o, Choice::R);
            }
            _ => unreachable!(),
        }
    }
}
