//! A runtime for executing an actor by mapping messages to JSON over UDP.
//!
//! Each spawned actor owns one socket and one thread. Named timers are driven
//! by the socket read timeout, so a quiet actor consumes no CPU. For actors
//! that are allowed to fail (the persistence collaborator, by design of its
//! fault injection), [`spawn_supervised`] adds a restart policy: a panic tears
//! the actor down and brings a fresh one up under the same address.

use crate::actor::{Actor, Command, Id, Out};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Debug;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::{Duration, Instant};

impl From<Id> for SocketAddrV4 {
    fn from(id: Id) -> Self {
        let ip = Ipv4Addr::from(((id.0 >> 16) & 0xFFFF_FFFF) as u32);
        SocketAddrV4::new(ip, (id.0 & 0xFFFF) as u16)
    }
}

impl From<SocketAddrV4> for Id {
    fn from(addr: SocketAddrV4) -> Self {
        Id((u64::from(u32::from(*addr.ip())) << 16) | u64::from(addr.port()))
    }
}

/// Runs an actor on the current thread. Never returns normally; panics on an
/// unrecoverable socket fault or when the actor itself panics.
fn run<A>(actor: &A, id: Id)
where
    A: Actor,
    A::Msg: Debug + DeserializeOwned + Serialize,
    A::State: Debug,
{
    let addr = SocketAddrV4::from(id);
    let socket = UdpSocket::bind(addr).unwrap(); // panic if unable to bind
    let mut in_buf = [0; 65_535];
    let mut timers: HashMap<A::Timer, Instant> = HashMap::new();

    let mut state = {
        let mut o = Out::new();
        let state = actor.on_start(id, &mut o);
        log::info!("Actor started. id={}, state={:?}, commands={:?}", addr, state, o);
        apply::<A>(&socket, addr, o, &mut timers);
        state
    };
    loop {
        // Fire a due timer, if any, before waiting on the socket again.
        let now = Instant::now();
        if let Some(timer) = timers
            .iter()
            .filter(|(_, at)| **at <= now)
            .min_by_key(|(_, at)| **at)
            .map(|(timer, _)| timer.clone())
        {
            timers.remove(&timer);
            let mut o = Out::new();
            actor.on_timeout(id, &mut state, &timer, &mut o);
            log::debug!("Timed out. id={}, timer={:?}, state={:?}, commands={:?}", addr, timer, state, o);
            apply::<A>(&socket, addr, o, &mut timers);
            continue;
        }

        // Wait for a message, but no longer than the nearest timer allows.
        let wait = timers
            .values()
            .min()
            .map(|at| at.saturating_duration_since(now).max(Duration::from_millis(1)));
        socket.set_read_timeout(wait).expect("set_read_timeout failed");
        let (count, src_addr) = match socket.recv_from(&mut in_buf) {
            Ok(received) => received,
            Err(e) => {
                use std::io::ErrorKind;
                // Timeouts are expected; the next iteration fires the timer.
                if !matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) {
                    log::warn!("Unable to read socket. Ignoring. id={}, err={:?}", addr, e);
                }
                continue;
            }
        };
        let SocketAddr::V4(src_addr) = src_addr else {
            log::debug!("Received non-IPv4 message. Ignoring. id={}, src={}", addr, src_addr);
            continue;
        };
        let msg: A::Msg = match serde_json::from_slice(&in_buf[..count]) {
            Ok(msg) => msg,
            Err(e) => {
                log::debug!(
                    "Unable to parse message. Ignoring. id={}, src={}, buf={:?}, err={:?}",
                    addr, src_addr, &in_buf[..count], e
                );
                continue;
            }
        };
        log::debug!("Received message. id={}, src={}, msg={:?}", addr, src_addr, msg);
        let mut o = Out::new();
        actor.on_msg(id, &mut state, Id::from(src_addr), msg, &mut o);
        apply::<A>(&socket, addr, o, &mut timers);
    }
}

/// The effects to perform in response to actor outputs.
fn apply<A: Actor>(
    socket: &UdpSocket,
    addr: SocketAddrV4,
    o: Out<A>,
    timers: &mut HashMap<A::Timer, Instant>,
) where
    A::Msg: Debug + Serialize,
{
    for command in o {
        match command {
            Command::Send(dst, msg) => {
                let dst_addr = SocketAddrV4::from(dst);
                match serde_json::to_vec(&msg) {
                    Ok(out_buf) => {
                        if let Err(e) = socket.send_to(&out_buf, dst_addr) {
                            log::warn!(
                                "Unable to send. Ignoring. src={}, dst={}, msg={:?}, err={}",
                                addr, dst_addr, msg, e
                            );
                        }
                    }
                    Err(e) => {
                        log::warn!(
                            "Unable to serialize. Ignoring. src={}, dst={}, msg={:?}, err={}",
                            addr, dst_addr, msg, e
                        );
                    }
                }
            }
            Command::SetTimer(timer, within) => {
                let duration = if within.start < within.end {
                    use rand::Rng;
                    rand::thread_rng().gen_range(within)
                } else {
                    within.start
                };
                timers.insert(timer, Instant::now() + duration);
            }
            Command::CancelTimer(timer) => {
                timers.remove(&timer);
            }
        }
    }
}

/// Runs an actor by mapping messages to JSON over UDP. Note that panics are
/// returned as `Err` when `join`ing.
pub fn spawn<A>(actor: A, id: impl Into<Id>) -> thread::JoinHandle<()>
where
    A: 'static + Send + Actor,
    A::Msg: Debug + DeserializeOwned + Serialize,
    A::State: Debug,
{
    let id = id.into();
    thread::spawn(move || run(&actor, id))
}

/// Like [`spawn`], but restarts the actor (fresh state, same address) if it
/// panics. The brief pause between attempts keeps a crash loop from spinning.
pub fn spawn_supervised<A>(actor: A, id: impl Into<Id>) -> thread::JoinHandle<()>
where
    A: 'static + Send + Actor,
    A::Msg: Debug + DeserializeOwned + Serialize,
    A::State: Debug,
{
    let id = id.into();
    thread::spawn(move || loop {
        if panic::catch_unwind(AssertUnwindSafe(|| run(&actor, id))).is_err() {
            log::error!("Actor crashed. Restarting. id={}", SocketAddrV4::from(id));
            thread::sleep(Duration::from_millis(10));
        }
    })
}
