use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::net::TcpListener;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time;

use crate::config::Config;
use crate::connection;
use crate::discovery::Discovery;
use crate::game::GameEvent;
use crate::host::{Host, HostEvent};
use crate::net;
use crate::service;
use crate::util::error::{quit_error, ErrorHints};

/// Monotonic connection identifiers across all games.
static CONN_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Start warhost.
///
/// Main entrypoint that runs the host controller and all its games on a
/// single-threaded cooperative runtime. Socket readers and writers are the
/// only other tasks; every state mutation happens on the controller loop.
pub fn service(config: Config) -> Result<(), ()> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| {
            crate::util::error::print_error(anyhow::anyhow!(err).context("Failed to build runtime"));
        })?;
    rt.block_on(run(Arc::new(config)))
}

async fn run(cfg: Arc<Config>) -> Result<(), ()> {
    let now = Instant::now();
    let (events_tx, mut events_rx) = unbounded_channel::<HostEvent>();

    // Discovery socket; a bind failure is fatal at startup
    let udp = match net::bind_discovery(cfg.net.bind_addr, cfg.net.udp_port).await {
        Ok(socket) => Arc::new(socket),
        Err(err) => {
            quit_error(
                anyhow::anyhow!(err).context("Failed to bind discovery socket"),
                ErrorHints::default(),
            );
        }
    };

    // Datagram intake for LAN searches
    {
        let udp = udp.clone();
        let events = events_tx.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1024];
            loop {
                match udp.recv_from(&mut buf).await {
                    Ok((len, from)) => {
                        let _ = events.send(HostEvent::Search {
                            data: buf[..len].to_vec(),
                            from,
                        });
                    }
                    Err(err) => {
                        debug!(target: "warhost::discovery", "UDP receive error: {}", err);
                    }
                }
            }
        });
    }

    // Spawn services: signal handler, console intake
    tokio::spawn(service::signal::service(events_tx.clone()));
    tokio::spawn(service::stdin::service(events_tx.clone()));

    let discovery = Discovery::new(cfg.clone(), Some(udp), now);
    let mut host = Host::new(cfg.clone(), discovery, now);

    // Ban list reloads on a blocking thread
    tokio::task::spawn_blocking({
        let cfg = cfg.clone();
        let bans = host.bans.clone();
        move || service::file_watcher::service(cfg, bans)
    });

    info!(target: "warhost", "warhost is ready");

    // One accept task per live game listener
    let mut listeners: HashMap<u16, JoinHandle<()>> = HashMap::new();

    loop {
        // Bind a listener whenever the controller wants a fresh lobby
        if host.wants_lobby && !host.shutdown {
            match net::bind_game_port(
                cfg.net.bind_addr,
                cfg.net.game_port_start,
                cfg.net.game_port_end,
            )
            .await
            {
                Ok((listener, port)) => {
                    if host.create_game(port, Instant::now()) {
                        listeners.insert(port, spawn_accept(listener, port, events_tx.clone()));
                    }
                }
                Err(err) => {
                    error!(target: "warhost", "No free game port: {}", err);
                    host.wants_lobby = false;
                }
            }
        }

        let deadline = host.next_deadline(Instant::now());
        tokio::select! {
            event = events_rx.recv() => match event {
                Some(event) => host.handle_event(event, Instant::now()),
                None => break,
            },
            _ = time::sleep_until(deadline.into()) => {}
        }

        host.tick(Instant::now());

        // Tear down listeners whose game is gone
        listeners.retain(|port, handle| {
            let alive = host.games.iter().any(|g| g.host_port == *port);
            if !alive {
                handle.abort();
            }
            alive
        });

        if host.done() {
            break;
        }
    }

    info!(target: "warhost", "Bye");
    Ok(())
}

/// Accept loop for one game's TCP listener.
fn spawn_accept(
    listener: TcpListener,
    port: u16,
    events: UnboundedSender<HostEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let (game_tx, mut game_rx) = unbounded_channel::<GameEvent>();

        // Funnel this game's connection events into the host stream
        let funnel = {
            let events = events.clone();
            tokio::spawn(async move {
                while let Some(event) = game_rx.recv().await {
                    if events.send(HostEvent::Net { port, event }).is_err() {
                        break;
                    }
                }
            })
        };

        while let Ok((stream, peer)) = listener.accept().await {
            let conn_id = CONN_COUNTER.fetch_add(1, Ordering::Relaxed);
            connection::spawn_peer(conn_id, stream, peer, game_tx.clone());
        }

        funnel.abort();
    })
}
