//! A replicated in-memory key-value store built from message-passing actors.
//!
//! One [`replica::Replica`] acts as primary: it owns the authoritative map,
//! journals every mutation through a [`persistence::PersistenceProxy`], and
//! streams per-key snapshots to each secondary through an embedded
//! [`replicator::Replicator`]. Clients are acknowledged only once a mutation
//! is both journaled locally and confirmed by every current secondary, under
//! a one-second deadline. Secondaries apply their snapshot stream strictly in
//! sequence order and serve reads locally. Membership is dictated by an
//! external [`arbiter::Arbiter`].
//!
//! The [`actor`] module holds the machinery: the `Actor` trait the components
//! are written against, a JSON-over-UDP runtime for real deployments, and a
//! deterministic simulator the protocol tests run on.

pub mod actor;
pub mod arbiter;
pub mod msg;
pub mod persistence;
pub mod replica;
pub mod replicator;
