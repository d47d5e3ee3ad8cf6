use std::time::{Duration, Instant};

use rand::Rng;

use crate::game::{Game, GameState};
use crate::player::Outbox;
use crate::proto::gps::{change_key, reject, Ack, Init, Reconnect, SupportExtended};
use crate::proto::join::LeaveReason;
use crate::proto::packet::RawPacket;
use crate::proto::{gps_id, id};

/// Cadence of cumulative ACKs towards reconnect proxies.
const GPROXY_ACK_INTERVAL: Duration = Duration::from_secs(5);

impl Game {
    /// GPS sub-protocol traffic from an admitted player.
    pub(super) fn handle_gps_packet(&mut self, idx: usize, packet: RawPacket, _now: Instant) {
        match packet.id {
            gps_id::INIT => {
                if !self.cfg.reconnect.enabled {
                    return;
                }
                let version = Init::decode_version(&packet.data).unwrap_or(0);
                let uid = self.players[idx].uid;
                let key: u32 = rand::thread_rng().gen();
                let empty_actions = self.gproxy_empty_actions();
                let port = self.host_port;
                {
                    let player = &mut self.players[idx];
                    player.gproxy = true;
                    player.reconnect_key = key;
                    player.send(
                        &Init {
                            port,
                            uid,
                            reconnect_key: key,
                            empty_actions,
                        }
                        .encode(),
                    );
                }
                info!(target: "warhost::gps", "[{}] player [{}] (proxy v{}) will reconnect at port {} if dropped",
                    self.game_name, self.players[idx].name, version, port);

                if self.cfg.reconnect.extended {
                    let wait_secs = self.cfg.reconnect.wait_secs as u32;
                    let game_id = self.game_id;
                    self.players[idx].send(
                        &SupportExtended {
                            wait_secs,
                            game_id,
                        }
                        .encode(),
                    );
                }
            }
            gps_id::SUPPORT_EXTENDED => {
                if self.players[idx].gproxy && self.cfg.reconnect.extended {
                    self.players[idx].gproxy_extended = true;
                    debug!(target: "warhost::gps", "[{}] extended reconnect confirmed for [{}]",
                        self.game_name, self.players[idx].name);
                }
            }
            gps_id::ACK => {
                if let Ok(ack) = Ack::decode(&packet.data) {
                    self.players[idx].ack_packets(ack.received);
                }
            }
            other => {
                trace!(target: "warhost::gps", "unhandled GPS packet 0x{:02X}", other);
            }
        }
    }

    /// Periodic cumulative ACK so proxies can trim their own queues.
    pub(super) fn tick_gproxy_acks(&mut self, now: Instant) {
        for player in self
            .players
            .iter_mut()
            .filter(|p| !p.left && p.gproxy && !p.is_detached())
        {
            let due = player
                .last_gproxy_ack
                .map(|at| now.duration_since(at) >= GPROXY_ACK_INTERVAL)
                .unwrap_or(true);
            if due {
                player.last_gproxy_ack = Some(now);
                let received = player.packets_received;
                player.send(&Ack { received }.encode());
            }
        }
    }

    /// A reconnect-capable player's socket dropped mid-game.
    ///
    /// No leave is emitted; the seat is held for the reconnect window.
    pub(super) fn start_reconnect_wait(&mut self, idx: usize, now: Instant) {
        self.players[idx].detach(now);
        let name = self.players[idx].name.clone();
        if !self.players[idx].disconnect_notice_sent {
            self.players[idx].disconnect_notice_sent = true;
            info!(target: "warhost::gps", "[{}] {} dropped, holding for reconnect", self.game_name, name);
            self.announce(&format!("{} has disconnected but may reconnect.", name));
        }
    }

    /// Expire reconnect windows; the seat opens when the wait runs out.
    pub(super) fn update_reconnect_waits(&mut self, now: Instant) {
        let wait = Duration::from_secs(self.cfg.reconnect.wait_secs);
        let expired: Vec<u8> = self
            .active_players()
            .filter(|p| {
                p.disconnected_since
                    .map(|at| now.duration_since(at) >= wait)
                    .unwrap_or(false)
            })
            .map(|p| p.uid)
            .collect();
        for uid in expired {
            self.mark_leaving(uid, LeaveReason::Gproxy, "failed to reconnect in time", now);
            if let Some(sid) = self.slots.sid_of_uid(uid) {
                let _ = self.slots.vacate(sid);
            }
        }
    }

    /// A fresh connection presented reconnect credentials.
    pub(super) fn handle_reconnect_attempt(
        &mut self,
        pidx: usize,
        packet: &RawPacket,
        now: Instant,
    ) {
        let Ok(attempt) = Reconnect::decode(&packet.data) else {
            self.pending[pidx].delete = true;
            return;
        };

        if self.state != GameState::Playing {
            self.pending[pidx].send(&reject());
            self.pending[pidx].delete = true;
            return;
        }

        let Some(target) = self
            .players
            .iter()
            .position(|p| !p.left && p.gproxy && p.uid == attempt.uid)
        else {
            self.pending[pidx].send(&reject());
            self.pending[pidx].delete = true;
            return;
        };

        // Extended proxies prove they reconnect to the same game
        if self.players[target].gproxy_extended
            && attempt.game_id.map(|gid| gid != self.game_id).unwrap_or(true)
        {
            debug!(target: "warhost::gps", "reconnect to a stale game refused");
            self.pending[pidx].send(&reject());
            self.pending[pidx].delete = true;
            return;
        }

        if attempt.reconnect_key != self.players[target].reconnect_key {
            // Rotate the key after an invalid attempt
            warn!(target: "warhost::gps", "[{}] invalid reconnect key for uid {}", self.game_name, attempt.uid);
            let new_key: u32 = rand::thread_rng().gen();
            self.players[target].reconnect_key = new_key;
            self.players[target].send(&change_key(new_key));
            self.pending[pidx].send(&reject());
            self.pending[pidx].delete = true;
            return;
        }

        // Bind the new socket and replay everything past the client's
        // acknowledged count
        let mut conn = self.pending.remove(pidx);
        let outbox = std::mem::replace(&mut conn.outbox, Outbox::Detached);
        let name = self.players[target].name.clone();
        self.players[target].conn_id = conn.conn_id;
        self.players[target].addr = conn.addr;
        self.players[target].rebind(outbox, attempt.last_received);

        info!(target: "warhost::gps", "[{}] {} reconnected from {}", self.game_name, name, conn.addr);
        self.announce(&format!("{} has reconnected.", name));

        // If the game is on the lag screen, the returning client needs it too
        if self.lag_screen.is_some() {
            let entries: Vec<crate::proto::game::Lagger> = self
                .active_players()
                .filter(|p| p.lagging)
                .map(|p| crate::proto::game::Lagger {
                    uid: p.uid,
                    lag_ms: p
                        .lag_started
                        .map(|at| now.duration_since(at).as_millis() as u32)
                        .unwrap_or(0),
                })
                .collect();
            let packet = crate::proto::game::start_lag(&entries);
            self.players[target].send(&packet);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::testutil::*;
    use crate::game::{GameEvent, PendingConn};
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::sync::Arc;

    fn playing_pair() -> (Game, u8, u8, Instant) {
        let mut cfg = crate::config::Config::default();
        cfg.map.size = 4096;
        cfg.reconnect.wait_secs = 120;
        let mut game = test_game(Arc::new(cfg));
        let now = Instant::now();
        let a = seat_player(&mut game, "alice", now);
        let b = seat_player(&mut game, "bob", now);
        game.virtual_host_uid = None;
        game.state = GameState::Playing;
        for player in game.players.iter_mut() {
            player.loaded = true;
            player.clear_sink();
        }
        (game, a, b, now)
    }

    fn idx_of(game: &Game, uid: u8) -> usize {
        game.players.iter().position(|p| p.uid == uid).unwrap()
    }

    fn enable_gproxy(game: &mut Game, uid: u8) -> u32 {
        let idx = idx_of(game, uid);
        let packet = RawPacket::gps(gps_id::INIT, 1u32.to_le_bytes().to_vec());
        game.handle_gps_packet(idx, packet, Instant::now());
        let key = game.players[idx].reconnect_key;
        game.players[idx].start_buffering();
        game.players[idx].clear_sink();
        key
    }

    #[test]
    fn init_grants_reconnect_support() {
        let (mut game, a, _b, now) = playing_pair();
        let idx = idx_of(&game, a);
        let packet = RawPacket::gps(gps_id::INIT, 1u32.to_le_bytes().to_vec());
        game.handle_gps_packet(idx, packet, now);

        let player = &game.players[idx];
        assert!(player.gproxy);
        let frames = player.sink_frames();
        assert!(frames.iter().any(|f| f.is_gps() && f.id == gps_id::INIT));
        // Extended negotiation follows when enabled
        assert!(frames
            .iter()
            .any(|f| f.is_gps() && f.id == gps_id::SUPPORT_EXTENDED));
    }

    #[test]
    fn disconnect_holds_seat_and_announces_once() {
        let (mut game, a, b, now) = playing_pair();
        enable_gproxy(&mut game, a);
        let conn_id = 77;
        let a_idx = idx_of(&game, a);
        game.players[a_idx].conn_id = conn_id;

        game.handle_event(GameEvent::Disconnect { conn_id }, now);

        let alice = game.players.iter().find(|p| p.uid == a).unwrap();
        assert!(!alice.left, "seat is held");
        assert!(alice.is_detached());

        let bob_frames = game.players[idx_of(&game, b)].sink_frames();
        assert!(
            !bob_frames.iter().any(|f| f.id == id::PLAYERLEAVE_OTHERS),
            "no leave emitted during the wait"
        );
        let chats = bob_frames
            .iter()
            .filter(|f| f.id == id::CHAT_FROM_HOST)
            .count();
        assert_eq!(chats, 1, "exactly one disconnect notice");
    }

    #[test]
    fn reconnect_replays_unacked_packets() {
        let (mut game, a, _b, now) = playing_pair();
        let key = enable_gproxy(&mut game, a);
        let idx = idx_of(&game, a);
        game.players[idx].conn_id = 77;

        // Five buffered frames, client saw three
        for _ in 0..5 {
            let packet = crate::proto::ping::ping_from_host(1);
            game.players[idx].send(&packet);
        }
        game.handle_event(GameEvent::Disconnect { conn_id: 77 }, now);

        // New connection presents the credentials
        game.pending.push(PendingConn {
            conn_id: 99,
            addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 9, 9, 9)), 51000),
            outbox: Outbox::Sink(Vec::new()),
            connected_at: now,
            delete: false,
        });
        let attempt = Reconnect {
            uid: a,
            reconnect_key: key,
            last_received: 3,
            game_id: Some(game.game_id),
        };
        let packet = RawPacket::gps(gps_id::RECONNECT, attempt.encode());
        game.handle_reconnect_attempt(0, &packet, now);

        let alice = &game.players[idx_of(&game, a)];
        assert!(!alice.is_detached());
        assert_eq!(alice.conn_id, 99);
        let replayed = alice
            .sink_frames()
            .iter()
            .filter(|f| f.id == id::PING_FROM_HOST)
            .count();
        assert_eq!(replayed, 2, "frames past the acked index replayed");
    }

    #[test]
    fn wrong_key_rotates_and_rejects() {
        let (mut game, a, _b, now) = playing_pair();
        let key = enable_gproxy(&mut game, a);
        let a_idx = idx_of(&game, a);
        game.players[a_idx].conn_id = 77;
        game.handle_event(GameEvent::Disconnect { conn_id: 77 }, now);

        game.pending.push(PendingConn {
            conn_id: 99,
            addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 9, 9, 9)), 51000),
            outbox: Outbox::Sink(Vec::new()),
            connected_at: now,
            delete: false,
        });
        let attempt = Reconnect {
            uid: a,
            reconnect_key: key.wrapping_add(1),
            last_received: 0,
            game_id: Some(game.game_id),
        };
        let packet = RawPacket::gps(gps_id::RECONNECT, attempt.encode());
        game.handle_reconnect_attempt(0, &packet, now);

        assert!(game.pending[0].delete);
        assert_ne!(game.players[idx_of(&game, a)].reconnect_key, key);
    }

    #[test]
    fn stale_game_id_refused_for_extended() {
        let (mut game, a, _b, now) = playing_pair();
        let key = enable_gproxy(&mut game, a);
        let idx = idx_of(&game, a);
        game.players[idx].gproxy_extended = true;
        game.players[idx].conn_id = 77;
        game.handle_event(GameEvent::Disconnect { conn_id: 77 }, now);

        game.pending.push(PendingConn {
            conn_id: 99,
            addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 9, 9, 9)), 51000),
            outbox: Outbox::Sink(Vec::new()),
            connected_at: now,
            delete: false,
        });
        let attempt = Reconnect {
            uid: a,
            reconnect_key: key,
            last_received: 0,
            game_id: Some(game.game_id.wrapping_add(1)),
        };
        let packet = RawPacket::gps(gps_id::RECONNECT, attempt.encode());
        game.handle_reconnect_attempt(0, &packet, now);

        assert!(game.pending[0].delete);
        assert!(game.players[idx].is_detached(), "seat still held");
    }

    #[test]
    fn wait_expiry_emits_leave_and_opens_slot() {
        let (mut game, a, b, now) = playing_pair();
        enable_gproxy(&mut game, a);
        let a_idx = idx_of(&game, a);
        game.players[a_idx].conn_id = 77;
        let sid = game.slots.sid_of_uid(a).unwrap();
        game.handle_event(GameEvent::Disconnect { conn_id: 77 }, now);

        let later = now + Duration::from_secs(121);
        game.update_reconnect_waits(later);

        assert!(game.players[idx_of(&game, a)].left);
        assert_eq!(
            game.slots.get(sid).unwrap().status,
            crate::slot::SlotStatus::Open
        );
        let bob_frames = game.players[idx_of(&game, b)].sink_frames();
        assert!(bob_frames.iter().any(|f| f.id == id::PLAYERLEAVE_OTHERS));
    }
}
