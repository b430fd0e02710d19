//! Brings up a replicated key-value store on loopback UDP so the protocol can
//! be poked by hand with netcat.

use replikv::actor::{spawn, spawn_supervised, Id};
use replikv::arbiter::Arbiter;
use replikv::msg::KvMsg;
use replikv::persistence::{FailureMode, Persistence, PersistenceProxy};
use replikv::replica::Replica;
use std::net::{Ipv4Addr, SocketAddrV4};

fn localhost(port: u16) -> SocketAddrV4 {
    SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)
}

fn main() -> Result<(), pico_args::Error> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info")); // `RUST_LOG=${LEVEL}` env variable to override

    let mut args = pico_args::Arguments::from_env();
    match args.subcommand()?.as_deref() {
        Some("spawn") => {
            let node_count: u16 = args.opt_free_from_str()?.unwrap_or(2);
            let port: u16 = args.opt_free_from_str()?.unwrap_or(3000);
            let drop_every: Option<u64> = args.opt_value_from_str("--drop-every")?;
            let mode = match drop_every {
                Some(n) => FailureMode::DropEvery(n),
                None => FailureMode::Reliable,
            };

            let arbiter = localhost(port);
            println!("  An arbiter and {node_count} store nodes, messaging over UDP.");
            println!("  The first node to join the arbiter serves as primary. Try:");
            println!("$ nc -u 127.0.0.1 {}", port + 1);
            println!(
                "{}",
                serde_json::to_string(&KvMsg::Insert { key: "a".into(), value: "1".into(), id: 0 })
                    .unwrap()
            );
            println!(
                "{}",
                serde_json::to_string(&KvMsg::Get { key: "a".into(), id: 1 }).unwrap()
            );
            println!();

            let mut handles = vec![spawn(Arbiter, arbiter)];
            for node in 0..node_count {
                let replica = localhost(port + 1 + 3 * node);
                let proxy = localhost(port + 2 + 3 * node);
                let journal = localhost(port + 3 + 3 * node);
                handles.push(spawn_supervised(Persistence { mode }, journal));
                handles.push(spawn(
                    PersistenceProxy { child: Id::from(journal), client: Id::from(replica) },
                    proxy,
                ));
                handles.push(spawn(
                    Replica { arbiter: Id::from(arbiter), persistence: Id::from(proxy) },
                    replica,
                ));
            }
            for handle in handles {
                handle.join().unwrap();
            }
        }
        _ => {
            println!("USAGE:");
            println!("  replikv spawn [NODE_COUNT] [PORT] [--drop-every N]");
        }
    }
    Ok(())
}
