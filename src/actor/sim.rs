//! A deterministic, single-threaded executor for a system of actors.
//!
//! Where the UDP runtime gives each actor a thread and a socket, `Sim` keeps
//! every actor in one process with a FIFO in-flight queue and a virtual clock.
//! [`Sim::run`] delivers queued messages until the system is quiet;
//! [`Sim::elapse`] advances the clock, firing timers at their scheduled
//! instants (and delivering whatever those firings send). Messages addressed
//! to ids with no actor behind them (typically test clients) are captured
//! for inspection instead of being dropped.
//!
//! Scheduling is deterministic: one delivery order, timers resolved lowest
//! deadline first (ties broken by actor insertion order), and `SetTimer`
//! ranges pinned to their lower bound.

use crate::actor::{Actor, Command, Id, Out};
use ahash::AHashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// A message in flight.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Envelope<Msg> {
    pub src: Id,
    pub dst: Id,
    pub msg: Msg,
}

struct Node<A: Actor> {
    id: Id,
    actor: A,
    state: A::State,
    timers: Vec<(A::Timer, Instant)>,
}

/// A simulated actor system.
pub struct Sim<A: Actor> {
    nodes: Vec<Node<A>>,
    index: AHashMap<Id, usize>,
    queue: VecDeque<Envelope<A::Msg>>,
    egress: Vec<Envelope<A::Msg>>,
    now: Instant,
}

impl<A: Actor> Sim<A> {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            index: AHashMap::new(),
            queue: VecDeque::new(),
            egress: Vec::new(),
            now: Instant::now(),
        }
    }

    /// Adds an actor under the given id, running its `on_start` immediately.
    /// Anything it sends sits in the queue until [`Sim::run`].
    pub fn add(&mut self, id: impl Into<Id>, actor: A) {
        let id = id.into();
        assert!(!self.index.contains_key(&id), "duplicate actor id {id:?}");
        let mut o = Out::new();
        let state = actor.on_start(id, &mut o);
        self.index.insert(id, self.nodes.len());
        self.nodes.push(Node { id, actor, state, timers: Vec::new() });
        let added = self.nodes.len() - 1;
        self.apply(added, o);
    }

    /// Injects a message, e.g. from a simulated client.
    pub fn send(&mut self, src: impl Into<Id>, dst: impl Into<Id>, msg: A::Msg) {
        self.queue.push_back(Envelope { src: src.into(), dst: dst.into(), msg });
    }

    /// Delivers queued messages in FIFO order until none remain. Message
    /// delivery takes no virtual time; use [`Sim::elapse`] for timers.
    pub fn run(&mut self) {
        while let Some(envelope) = self.queue.pop_front() {
            let Some(&i) = self.index.get(&envelope.dst) else {
                self.egress.push(envelope);
                continue;
            };
            let mut o = Out::new();
            let node = &mut self.nodes[i];
            node.actor.on_msg(node.id, &mut node.state, envelope.src, envelope.msg, &mut o);
            self.apply(i, o);
        }
    }

    /// Advances the virtual clock, firing every timer that comes due within
    /// the window and delivering all messages those firings produce.
    pub fn elapse(&mut self, duration: Duration) {
        let end = self.now + duration;
        self.run();
        loop {
            let due = self
                .nodes
                .iter()
                .enumerate()
                .flat_map(|(i, node)| node.timers.iter().map(move |(timer, at)| (*at, i, timer.clone())))
                .filter(|(at, _, _)| *at <= end)
                .min_by_key(|(at, i, _)| (*at, *i));
            let Some((at, i, timer)) = due else { break };
            self.now = self.now.max(at);
            self.nodes[i].timers.retain(|(t, _)| *t != timer);
            let mut o = Out::new();
            let node = &mut self.nodes[i];
            node.actor.on_timeout(node.id, &mut node.state, &timer, &mut o);
            self.apply(i, o);
            self.run();
        }
        self.now = end;
    }

    /// The state of the actor registered under `id`.
    pub fn state(&self, id: impl Into<Id>) -> &A::State {
        let id = id.into();
        let i = *self.index.get(&id).unwrap_or_else(|| panic!("no actor with id {id:?}"));
        &self.nodes[i].state
    }

    /// Drains the messages that left the system (their destination had no
    /// actor behind it).
    pub fn take_egress(&mut self) -> Vec<Envelope<A::Msg>> {
        std::mem::take(&mut self.egress)
    }

    fn apply(&mut self, from: usize, o: Out<A>) {
        let src = self.nodes[from].id;
        for command in o {
            match command {
                Command::Send(dst, msg) => self.queue.push_back(Envelope { src, dst, msg }),
                Command::SetTimer(timer, within) => {
                    let at = self.now + within.start;
                    let timers = &mut self.nodes[from].timers;
                    timers.retain(|(t, _)| *t != timer);
                    timers.push((timer, at));
                }
                Command::CancelTimer(timer) => {
                    self.nodes[from].timers.retain(|(t, _)| *t != timer);
                }
            }
        }
    }
}

impl<A: Actor> Default for Sim<A> {
    fn default() -> Self {
        Self::new()
    }
}
