use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Instant;

use crate::game::{Game, GameState, RealmNotice, VERIFY_WHISPER_DELAY};
use crate::player::{Outbox, Player};
use crate::proto::join::{
    reject_join, LeaveReason, PlayerInfo, RejectReason, ReqJoin, SlotInfoJoin,
};
use crate::proto::map::MapCheck;
use crate::proto::packet::RawPacket;
use crate::proto::{gps_id, id};
use crate::slot::SlotRole;

/// Realm byte of the host counter claiming an information probe.
const REALM_INFO_PROBE: u8 = 0x01;

/// First host counter byte that names a configured realm.
const REALM_FIRST_ID: u8 = 0x10;

impl Game {
    /// Route a packet from a connection that has not joined yet.
    pub(super) fn handle_pending_packet(&mut self, conn_id: u64, packet: RawPacket, now: Instant) {
        let Some(pidx) = self.pending.iter().position(|c| c.conn_id == conn_id) else {
            return;
        };

        if packet.is_gps() {
            if packet.id == gps_id::RECONNECT {
                self.handle_reconnect_attempt(pidx, &packet, now);
            } else {
                self.pending[pidx].delete = true;
            }
            return;
        }

        if packet.id != id::REQJOIN {
            debug!(target: "warhost::game", "expected join request, got 0x{:02X}; dropping {}",
                packet.id, self.pending[pidx].addr);
            self.pending[pidx].delete = true;
            return;
        }

        match ReqJoin::decode(&packet.data) {
            Ok(req) => self.handle_req_join(pidx, req, now),
            Err(err) => {
                debug!(target: "warhost::game", "malformed join request from {}: {}",
                    self.pending[pidx].addr, err);
                self.pending[pidx].delete = true;
            }
        }
    }

    /// The admission protocol.
    fn handle_req_join(&mut self, pidx: usize, req: ReqJoin, now: Instant) {
        let addr = self.pending[pidx].addr;
        let realm_byte = req.realm_index();

        // Realm routing by the host counter's high byte
        let realm_id = match realm_byte {
            0x00 => {
                // LAN clients must echo the entry key
                if req.entry_key != self.entry_key {
                    debug!(target: "warhost::game", "join from {} with wrong entry key", addr);
                    self.reject(pidx, &req.name, RejectReason::WrongPassword, 0);
                    return;
                }
                0
            }
            REALM_INFO_PROBE => {
                // Serve a one-shot slot snapshot and drop the connection
                self.serve_info_probe(pidx);
                return;
            }
            b if b < REALM_FIRST_ID => {
                self.reject(pidx, &req.name, RejectReason::WrongPassword, 0);
                return;
            }
            b => {
                // Unknown realms are treated like the reserved range
                if self.cfg.realms.iter().any(|r| r.internal_id == b) {
                    b
                } else {
                    self.reject(pidx, &req.name, RejectReason::WrongPassword, 0);
                    return;
                }
            }
        };

        if self.state != GameState::Lobby {
            self.reject(pidx, &req.name, RejectReason::Started, realm_id);
            return;
        }

        // Name validity
        if !self.name_acceptable(&req.name) {
            self.reject(pidx, &req.name, RejectReason::Full, realm_id);
            return;
        }

        // Duplicate name
        if self.player_by_name(&req.name).is_some() {
            debug!(target: "warhost::game", "duplicate name [{}] from {}", req.name, addr);
            self.reject(pidx, &req.name, RejectReason::Full, realm_id);
            return;
        }

        // Name and IP bans, session scope and store scope
        let lower = req.name.to_lowercase();
        if self.session_bans.contains(&lower)
            || self.bans.read().unwrap().is_name_banned(&req.name)
        {
            info!(target: "warhost::game", "banned name [{}] tried to join", req.name);
            self.reject(pidx, &req.name, RejectReason::Full, realm_id);
            return;
        }
        let loopback = addr.ip().is_loopback();
        if !loopback && self.bans.read().unwrap().is_ip_banned(&addr.ip()) {
            info!(target: "warhost::game", "banned IP {} tried to join as [{}]", addr.ip(), req.name);
            self.reject(pidx, &req.name, RejectReason::Full, realm_id);
            return;
        }

        // Per-IP concurrency
        let limit = if loopback {
            self.cfg.net.max_connections_loopback
        } else {
            self.cfg.net.max_connections_per_ip
        };
        let from_same_ip = self
            .active_players()
            .filter(|p| p.addr.ip() == addr.ip())
            .count();
        if from_same_ip >= limit {
            self.reject(pidx, &req.name, RejectReason::Full, realm_id);
            return;
        }

        // Reservation requirement
        let reserved = self.reserved.contains(&lower) || self.is_owner_name(&req.name);
        if self.cfg.setup.private && !reserved {
            self.reject(pidx, &req.name, RejectReason::Full, realm_id);
            return;
        }

        if self.locked && !self.is_owner_name(&req.name) {
            self.reject(pidx, &req.name, RejectReason::Full, realm_id);
            return;
        }

        // Find a seat, evicting if the joiner outranks an occupant
        let sid = match self.pick_slot(&req.name, reserved, now) {
            Some(sid) => sid,
            None => {
                self.reject(pidx, &req.name, RejectReason::Full, realm_id);
                return;
            }
        };

        // If this takes the last open slot, the virtual host must leave
        // first so every peer sees its leave before the join
        if self.slots.open_slots() == 1 && self.virtual_host_uid.is_some() {
            self.destroy_virtual_host();
        }

        let Some(uid) = self.new_uid() else {
            self.reject(pidx, &req.name, RejectReason::Full, realm_id);
            return;
        };

        self.admit(pidx, req, realm_id, sid, uid, reserved, now);
    }

    /// Seat the joiner and run the post-join packet sequence.
    fn admit(
        &mut self,
        pidx: usize,
        req: ReqJoin,
        realm_id: u8,
        sid: u8,
        uid: u8,
        reserved: bool,
        now: Instant,
    ) {
        let mut conn = self.pending.remove(pidx);
        let addr = conn.addr;
        self.slots
            .occupy(sid, uid)
            .expect("picked slot must be open");
        let observer =
            self.slots.get(sid).map(|s| s.team) == Some(self.slots.observer_sentinel());

        let generation = self.next_generation();
        let outbox = std::mem::replace(&mut conn.outbox, Outbox::Detached);
        let mut player = Player::new(
            req.name.clone(),
            realm_id,
            addr,
            uid,
            sid,
            generation,
            reserved,
            observer,
            outbox,
            now,
        );
        player.conn_id = conn.conn_id;
        player.referee = observer && self.cfg.map.referees;

        info!(target: "warhost::game", "[{}] player [{}] joined from {} (uid {}, slot {})",
            self.game_name, req.name, addr, uid, sid);

        // 1. Admission reply with the full slot snapshot
        let external = match addr {
            SocketAddr::V4(v4) => v4,
            SocketAddr::V6(_) => SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0),
        };
        player.send(
            &SlotInfoJoin {
                table: &self.slots,
                random_seed: self.random_seed,
                layout_style: self.layout_style,
                uid,
                external_addr: external,
            }
            .encode(),
        );

        // 2. Everyone else learns about the joiner
        let joiner_info = PlayerInfo {
            peer_key: req.peer_key,
            uid,
            name: req.name.clone(),
            external_addr: external,
            internal_addr: req.internal_addr,
        }
        .encode();
        self.broadcast(&joiner_info);

        // 3. The joiner learns about the virtual host, fake users and
        //    everyone already seated
        if let Some(vh) = self.virtual_host_uid {
            player.send(&PlayerInfo::synthetic(vh, &self.cfg.bot.virtual_host_name).encode());
        }
        for &fake in &self.fake_uids {
            player.send(&PlayerInfo::synthetic(fake, &format!("User[{}]", fake)).encode());
        }
        for other in self.players.iter().filter(|p| !p.left) {
            let other_external = match other.addr {
                SocketAddr::V4(v4) => v4,
                SocketAddr::V6(_) => SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0),
            };
            player.send(
                &PlayerInfo {
                    peer_key: 1,
                    uid: other.uid,
                    name: other.name.clone(),
                    external_addr: other_external,
                    internal_addr: other_external,
                }
                .encode(),
            );
        }

        // 4. Map check so the client reports its map state
        player.send(
            &MapCheck {
                path: &self.cfg.map.path,
                size: self.cfg.map.size,
                crc32: self.cfg.map.crc32,
                sha1: self.cfg.map.sha1_bytes(),
            }
            .encode(),
        );

        self.players.push(player);

        // 5. Fresh slot snapshot for everyone, the joiner included
        self.send_slot_snapshot(now);

        self.greet(uid);
        self.relay_pinned(uid);

        // Delayed verification whisper for realms that require it
        if realm_id != 0 {
            let requires = self
                .cfg
                .realms
                .iter()
                .any(|r| r.internal_id == realm_id && r.verify_joiners);
            if requires {
                self.deferred_whispers
                    .push((now + VERIFY_WHISPER_DELAY, realm_id, req.name));
            }
        }
    }

    /// Pick a slot for the joiner.
    fn pick_slot(&mut self, name: &str, reserved: bool, now: Instant) -> Option<u8> {
        if let Some(sid) = self.slots.find_empty_slot(SlotRole::Player) {
            return Some(sid);
        }
        if let Some(sid) = self.slots.find_empty_slot(SlotRole::Observer) {
            return Some(sid);
        }

        if reserved {
            // Evict the least-downloaded occupant that is not reserved
            let victim = self
                .active_players()
                .filter(|p| !p.reserved)
                .min_by_key(|p| p.download_progress(self.cfg.map.size))
                .map(|p| p.uid)?;
            let text = format!("was kicked to make room for a reserved user [{}]", name);
            self.mark_leaving(victim, LeaveReason::Lobby, &text, now);
            return self.slots.find_empty_slot(SlotRole::Any);
        }

        if self.is_owner_name(name) {
            // The owner bumps anyone who is not a computer
            let victim = self
                .active_players()
                .min_by_key(|p| p.download_progress(self.cfg.map.size))
                .map(|p| p.uid)?;
            let text = format!("was kicked to make room for the game owner [{}]", name);
            self.mark_leaving(victim, LeaveReason::Lobby, &text, now);
            return self.slots.find_empty_slot(SlotRole::Any);
        }

        None
    }

    /// Whether the name passes the static validity checks.
    fn name_acceptable(&self, name: &str) -> bool {
        if name.is_empty() || name.len() > 15 {
            return false;
        }
        if name.eq_ignore_ascii_case(&self.cfg.bot.virtual_host_name) {
            return false;
        }
        if is_fake_user_name(name) {
            return false;
        }
        if !self.cfg.map.comm_pseudonym.is_empty()
            && name.eq_ignore_ascii_case(&self.cfg.map.comm_pseudonym)
        {
            return false;
        }
        true
    }

    fn is_owner_name(&self, name: &str) -> bool {
        self.owner
            .as_ref()
            .map(|(owner, _)| owner.eq_ignore_ascii_case(name))
            .unwrap_or(false)
    }

    /// Deny the join, notify the origin channel once per name.
    fn reject(&mut self, pidx: usize, name: &str, reason: RejectReason, realm_id: u8) {
        self.pending[pidx].send(&reject_join(reason));
        self.pending[pidx].delete = true;

        if name.is_empty() {
            return;
        }
        let lower = name.to_lowercase();
        if self.rejected_names.insert(lower) {
            let text = match reason {
                RejectReason::Full => format!("{} cannot join: the game is full", name),
                RejectReason::Started => format!("{} cannot join: the game already started", name),
                RejectReason::WrongPassword => {
                    format!("{} cannot join: entry key mismatch", name)
                }
            };
            self.realm_outbox.push(RealmNotice::RejectionNotice {
                realm_id,
                name: name.to_owned(),
                reason: text,
            });
        }
    }

    /// Serve a one-shot snapshot to an information probe and disconnect it.
    fn serve_info_probe(&mut self, pidx: usize) {
        let addr = match self.pending[pidx].addr {
            SocketAddr::V4(v4) => v4,
            SocketAddr::V6(_) => SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0),
        };
        let packet = SlotInfoJoin {
            table: &self.slots,
            random_seed: self.random_seed,
            layout_style: self.layout_style,
            uid: 255,
            external_addr: addr,
        }
        .encode();
        self.pending[pidx].send(&packet);
        self.pending[pidx].delete = true;
    }

    /// Run the welcome template for a fresh joiner.
    fn greet(&mut self, uid: u8) {
        let Some(player) = self.player_by_uid(uid) else {
            return;
        };
        let mut vars = std::collections::HashMap::new();
        vars.insert("NAME", player.name.clone());
        vars.insert("GAME", self.game_name.clone());
        vars.insert("URL", self.cfg.map.url.clone());
        vars.insert("HCL", self.hcl.clone());
        vars.insert(
            "OWNER",
            self.owner
                .as_ref()
                .map(|(n, _)| n.clone())
                .unwrap_or_default(),
        );
        for line in crate::template::render(&self.cfg.map.greeting, &vars) {
            self.whisper(uid, &line);
        }
    }

    /// Relay messages other players pinned for newcomers.
    fn relay_pinned(&mut self, uid: u8) {
        let pinned = self.pinned_messages.clone();
        for (from, text) in pinned {
            self.whisper(uid, &format!("[{}] {}", from, text));
        }
    }
}

/// Whether the name matches the server-generated `User[N]` pattern.
fn is_fake_user_name(name: &str) -> bool {
    name.strip_prefix("User[")
        .and_then(|rest| rest.strip_suffix(']'))
        .map(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
        .unwrap_or(false)
}
