use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Instant;

use tokio::sync::mpsc::UnboundedSender;

use crate::proto::packet::RawPacket;

/// Ping samples kept per player.
const PING_WINDOW: usize = 8;

/// Where a player's outbound bytes go.
///
/// Live players write into the per-socket send queue; tests capture frames in
/// memory instead.
#[derive(Debug)]
pub enum Outbox {
    Socket(UnboundedSender<Vec<u8>>),
    Sink(Vec<Vec<u8>>),

    /// The socket is gone; bytes go nowhere until a reconnect binds a new one.
    Detached,
}

impl Outbox {
    fn push(&mut self, bytes: Vec<u8>) {
        match self {
            Self::Socket(tx) => {
                // A dead receiver means the writer task stopped; the
                // disconnect event will clean this player up
                let _ = tx.send(bytes);
            }
            Self::Sink(frames) => frames.push(bytes),
            Self::Detached => {}
        }
    }
}

/// A fully admitted participant, bound to a slot and a UID.
#[derive(Debug)]
pub struct Player {
    pub name: String,

    /// Identifier of the TCP connection feeding this player.
    pub conn_id: u64,

    /// Origin realm internal id, 0 for LAN.
    pub realm_id: u8,

    pub addr: SocketAddr,
    pub uid: u8,
    pub sid: u8,

    /// Arena generation; weak handles compare this before acting.
    pub generation: u32,

    pub verified: bool,
    pub reserved: bool,
    pub observer: bool,

    /// Referee observers keep full chat and pause rights.
    pub referee: bool,

    pub muted: bool,
    pub map_ready: bool,

    /// Finished loading the map at game start.
    pub loaded: bool,

    pub lagging: bool,
    pub lag_started: Option<Instant>,

    /// Marked for removal at the end of the iteration.
    pub left: bool,
    pub leave_reason: String,

    // Reconnect proxy state
    pub gproxy: bool,
    pub gproxy_extended: bool,
    pub reconnect_key: u32,
    pub packets_sent: u32,
    pub packets_received: u32,
    pub reconnect_queue: VecDeque<Vec<u8>>,
    pub disconnected_since: Option<Instant>,
    pub disconnect_notice_sent: bool,
    pub last_gproxy_ack: Option<Instant>,

    // Counters
    pub sync_counter: u32,
    pub sync_counter_offset: u32,
    pub pings: VecDeque<u32>,
    pub checksums: VecDeque<u32>,
    pub pauses_used: u8,

    // Map transfer state
    pub needs_map: bool,
    pub download_started: Option<Instant>,
    pub bytes_acked: u32,
    pub bytes_sent: u32,
    pub kick_deadline: Option<Instant>,

    pub joined_at: Instant,
    pub finished_loading_at: Option<Instant>,
    pub last_activity: Instant,

    outbox: Outbox,

    /// Whether outbound frames are recorded for reconnect replay.
    buffering: bool,
}

impl Player {
    pub fn new(
        name: String,
        realm_id: u8,
        addr: SocketAddr,
        uid: u8,
        sid: u8,
        generation: u32,
        reserved: bool,
        observer: bool,
        outbox: Outbox,
        now: Instant,
    ) -> Self {
        Self {
            name,
            conn_id: 0,
            realm_id,
            addr,
            uid,
            sid,
            generation,
            verified: false,
            reserved,
            observer,
            referee: false,
            muted: false,
            map_ready: false,
            loaded: false,
            lagging: false,
            lag_started: None,
            left: false,
            leave_reason: String::new(),
            gproxy: false,
            gproxy_extended: false,
            reconnect_key: 0,
            packets_sent: 0,
            packets_received: 0,
            reconnect_queue: VecDeque::new(),
            disconnected_since: None,
            disconnect_notice_sent: false,
            last_gproxy_ack: None,
            sync_counter: 0,
            sync_counter_offset: 0,
            pings: VecDeque::new(),
            checksums: VecDeque::new(),
            pauses_used: 0,
            needs_map: false,
            download_started: None,
            bytes_acked: 0,
            bytes_sent: 0,
            kick_deadline: None,
            joined_at: now,
            finished_loading_at: None,
            last_activity: now,
            outbox,
            buffering: false,
        }
    }

    /// Send a packet to this player.
    pub fn send(&mut self, packet: &RawPacket) {
        let bytes = packet.encode();
        if self.buffering && !packet.is_gps() {
            self.reconnect_queue.push_back(bytes.clone());
            self.packets_sent = self.packets_sent.wrapping_add(1);
        }
        self.outbox.push(bytes);
    }

    /// Start recording outbound W3GS frames for reconnect replay.
    pub fn start_buffering(&mut self) {
        if self.gproxy {
            self.buffering = true;
        }
    }

    /// Drop frames the proxy has confirmed.
    pub fn ack_packets(&mut self, received: u32) {
        let unacked = self.packets_sent.wrapping_sub(received) as usize;
        while self.reconnect_queue.len() > unacked {
            self.reconnect_queue.pop_front();
        }
    }

    /// Bind a fresh socket after a reconnect and replay unseen frames.
    pub fn rebind(&mut self, outbox: Outbox, last_received: u32) {
        self.outbox = outbox;
        self.disconnected_since = None;
        self.disconnect_notice_sent = false;
        self.ack_packets(last_received);
        let backlog: Vec<Vec<u8>> = self.reconnect_queue.iter().cloned().collect();
        for bytes in backlog {
            self.outbox.push(bytes);
        }
    }

    /// Detach the socket, keeping the player alive for a reconnect window.
    pub fn detach(&mut self, now: Instant) {
        self.outbox = Outbox::Detached;
        self.disconnected_since = Some(now);
    }

    /// Whether the player currently has no socket.
    pub fn is_detached(&self) -> bool {
        matches!(self.outbox, Outbox::Detached)
    }

    /// Record a ping sample in the sliding window.
    pub fn add_ping(&mut self, rtt_ms: u32) {
        if self.pings.len() == PING_WINDOW {
            self.pings.pop_front();
        }
        self.pings.push_back(rtt_ms);
    }

    /// Mean ping over the window.
    pub fn avg_ping(&self) -> Option<u32> {
        if self.pings.is_empty() {
            return None;
        }
        Some(self.pings.iter().sum::<u32>() / self.pings.len() as u32)
    }

    /// Download progress percentage for slot snapshots.
    pub fn download_progress(&self, map_size: u32) -> u8 {
        if self.map_ready {
            return 100;
        }
        if self.download_started.is_none() || map_size == 0 {
            return 255;
        }
        ((self.bytes_acked as u64 * 100) / map_size as u64).min(100) as u8
    }

    /// Frames captured by a test sink.
    #[cfg(test)]
    pub fn sink_frames(&self) -> Vec<RawPacket> {
        match &self.outbox {
            Outbox::Sink(frames) => frames
                .iter()
                .map(|bytes| RawPacket::decode(bytes).unwrap())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Clear the test sink.
    #[cfg(test)]
    pub fn clear_sink(&mut self) {
        if let Outbox::Sink(frames) = &mut self.outbox {
            frames.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::id;
    use std::net::{IpAddr, Ipv4Addr};

    fn player() -> Player {
        Player::new(
            "tester".into(),
            0,
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 6112),
            1,
            0,
            0,
            false,
            false,
            Outbox::Sink(Vec::new()),
            Instant::now(),
        )
    }

    #[test]
    fn send_reaches_sink() {
        let mut p = player();
        p.send(&RawPacket::w3gs(id::COUNTDOWN_START, vec![]));
        assert_eq!(p.sink_frames().len(), 1);
    }

    #[test]
    fn buffering_requires_gproxy() {
        let mut p = player();
        p.start_buffering();
        p.send(&RawPacket::w3gs(id::PING_FROM_HOST, vec![0; 4]));
        assert!(p.reconnect_queue.is_empty());

        p.gproxy = true;
        p.start_buffering();
        p.send(&RawPacket::w3gs(id::PING_FROM_HOST, vec![0; 4]));
        assert_eq!(p.reconnect_queue.len(), 1);
        assert_eq!(p.packets_sent, 1);
    }

    #[test]
    fn gps_frames_not_buffered() {
        let mut p = player();
        p.gproxy = true;
        p.start_buffering();
        p.send(&crate::proto::gps::Ack { received: 0 }.encode());
        assert!(p.reconnect_queue.is_empty());
    }

    #[test]
    fn ack_trims_queue() {
        let mut p = player();
        p.gproxy = true;
        p.start_buffering();
        for _ in 0..5 {
            p.send(&RawPacket::w3gs(id::PING_FROM_HOST, vec![0; 4]));
        }
        p.ack_packets(3);
        assert_eq!(p.reconnect_queue.len(), 2);
    }

    #[test]
    fn rebind_replays_backlog() {
        let mut p = player();
        p.gproxy = true;
        p.start_buffering();
        for _ in 0..4 {
            p.send(&RawPacket::w3gs(id::PING_FROM_HOST, vec![0; 4]));
        }
        p.detach(Instant::now());
        assert!(p.is_detached());

        p.rebind(Outbox::Sink(Vec::new()), 2);
        // Two unacked frames replayed onto the fresh sink
        assert_eq!(p.sink_frames().len(), 2);
        assert!(!p.is_detached());
    }

    #[test]
    fn ping_window_slides() {
        let mut p = player();
        for i in 0..20 {
            p.add_ping(i);
        }
        assert_eq!(p.pings.len(), PING_WINDOW);
        assert_eq!(p.avg_ping(), Some((12..20).sum::<u32>() / 8));
    }
}
