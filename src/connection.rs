use std::net::SocketAddr;

use bytes::BytesMut;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};

use crate::game::GameEvent;
use crate::proto::packet;

/// Event stream from all sockets of one game to its session.
pub type EventSender = UnboundedSender<GameEvent>;

/// Take ownership of an accepted socket.
///
/// Spawns a reader task that parses frames into session events and a writer
/// task that drains the per-peer send queue, then announces the connection.
/// The session decides whether this peer becomes a player.
pub fn spawn_peer(conn_id: u64, stream: TcpStream, peer: SocketAddr, events: EventSender) {
    let (reader, mut writer) = stream.into_split();
    let (tx, mut to_send) = unbounded_channel::<Vec<u8>>();

    if events
        .send(GameEvent::Connect {
            conn_id,
            addr: peer,
            tx,
        })
        .is_err()
    {
        return;
    }

    // Writer: push the send queue onto the socket in order
    tokio::spawn(async move {
        while let Some(bytes) = to_send.recv().await {
            if writer.write_all(&bytes).await.is_err() {
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    // Reader: frame the byte stream into packets
    tokio::spawn(async move {
        let mut reader = reader;
        let mut buf = BytesMut::new();
        loop {
            match packet::read_packet(&mut buf, &mut reader).await {
                Ok(Some(packet)) => {
                    if events.send(GameEvent::Packet { conn_id, packet }).is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    debug!(target: "warhost", "protocol violation from {}: {}", peer, err);
                    break;
                }
            }
        }
        let _ = events.send(GameEvent::Disconnect { conn_id });
    });
}
