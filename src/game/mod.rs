pub mod chat;
pub mod join;
pub mod lobby;
pub mod play;
pub mod reconnect;

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::command::CommandRequest;
use crate::config::Config;
use crate::player::{Outbox, Player};
use crate::proto::action::Action;
use crate::proto::join::{player_leave_others, slot_info, LeaveReason, PlayerInfo};
use crate::proto::packet::RawPacket;
use crate::proto::{id, VERSION_EXPANDED_SLOTS};
use crate::slot::{
    melee_table, Slot, SlotTable, OBSERVER_SENTINEL_EXPANDED, OBSERVER_SENTINEL_LEGACY,
};
use crate::stats::GameRecord;

/// Seconds without a join request before a pending connection is dropped.
pub const PING_INTERVAL: Duration = Duration::from_secs(5);

/// Realm refresh cadence.
pub const REALM_REFRESH_INTERVAL: Duration = Duration::from_secs(3);

/// Download pump cadence.
pub const DOWNLOAD_PUMP_INTERVAL: Duration = Duration::from_millis(100);

/// Minimum gap between slot snapshots caused by download progress.
pub const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(1);

/// The lag screen must be refreshed before clients give up on their own.
pub const LAG_SCREEN_REFRESH: Duration = Duration::from_secs(60);

/// A recent leaver blocks the countdown for this long.
pub const LEAVE_COUNTDOWN_BLOCK: Duration = Duration::from_secs(2);

/// Deadline granted to players who must fetch the map elsewhere.
pub const MAP_KICK_DELAY: Duration = Duration::from_secs(30);

/// Delay before the verification whisper goes out to a joiner's realm.
pub const VERIFY_WHISPER_DELAY: Duration = Duration::from_secs(5);

/// Session life cycle.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum GameState {
    Lobby,
    CountingDown,
    Loading,
    Playing,
    Over,
    Destroyed,
}

/// A TCP peer that has not been admitted yet.
#[derive(Debug)]
pub struct PendingConn {
    pub conn_id: u64,
    pub addr: SocketAddr,
    pub outbox: Outbox,
    pub connected_at: Instant,
    pub delete: bool,
}

impl PendingConn {
    pub fn send(&mut self, packet: &RawPacket) {
        match &mut self.outbox {
            Outbox::Socket(tx) => {
                let _ = tx.send(packet.encode());
            }
            Outbox::Sink(frames) => frames.push(packet.encode()),
            Outbox::Detached => {}
        }
    }
}

/// Network event delivered to a session.
#[derive(Debug)]
pub enum GameEvent {
    Connect {
        conn_id: u64,
        addr: SocketAddr,
        tx: tokio::sync::mpsc::UnboundedSender<Vec<u8>>,
    },
    Packet {
        conn_id: u64,
        packet: RawPacket,
    },
    Disconnect {
        conn_id: u64,
    },
}

/// Notice for an external chat realm adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RealmNotice {
    /// Queue a game refresh on every eligible realm.
    RefreshGame { slots_open: usize },

    /// Whisper a verification challenge to a joiner.
    VerifyWhisper { realm_id: u8, name: String },

    /// One-line reply for a rejected joiner, deduplicated per name.
    RejectionNotice { realm_id: u8, name: String, reason: String },

    /// The game is gone.
    Uncreate,
}

/// Countdown progress.
#[derive(Debug)]
struct Countdown {
    remaining: u32,
    next_tick: Instant,
}

/// One hosted game session.
///
/// Owns the slot table, all players and pending connections, the action
/// queue and every per-game timer. All methods take `now` so the state
/// machines are driven the same way by the event loop and by tests.
pub struct Game {
    pub cfg: Arc<Config>,

    pub state: GameState,
    pub version: u8,
    pub game_id: u32,
    pub host_counter: u32,
    pub entry_key: u32,
    pub game_name: String,
    pub host_port: u16,
    pub created_at: Instant,

    pub slots: SlotTable,
    pub random_seed: u32,
    pub layout_style: u8,

    pub players: Vec<Player>,
    generation: u32,
    pub pending: Vec<PendingConn>,

    pub virtual_host_uid: Option<u8>,
    pub fake_uids: Vec<u8>,

    // Relay state
    pub actions: VecDeque<Action>,
    pub sync_counter: u32,
    pub sync_partners: HashMap<u8, HashSet<u8>>,
    pub drop_votes: HashSet<u8>,
    /// Last lag screen build time, while the screen is up.
    lag_screen: Option<Instant>,
    pub paused: bool,
    desync_notified: HashSet<u8>,

    // Ownership
    pub owner: Option<(String, String)>,
    owner_last_seen: Instant,

    countdown: Option<Countdown>,
    pub exiting: bool,

    // Timers
    last_ping: Instant,
    last_realm_refresh: Instant,
    last_download_pump: Instant,
    last_snapshot: Instant,
    last_action: Instant,
    next_action_due: Instant,
    pub last_leave: Option<Instant>,
    gameover_at: Option<Instant>,
    load_started: Option<Instant>,

    // Download budget
    download_bytes_this_window: usize,
    download_window_started: Instant,

    // Deferred work
    pub realm_outbox: Vec<RealmNotice>,
    pub pending_commands: Vec<CommandRequest>,
    deferred_whispers: Vec<(Instant, u8, String)>,
    rejected_names: HashSet<String>,

    // Session scope admission state
    pub reserved: Vec<String>,
    pub session_bans: Vec<String>,
    pub pinned_messages: Vec<(String, String)>,
    pub locked: bool,
    pub mute_all: bool,
    pub hcl: String,

    /// Map bytes served to downloaders, if the file could be read.
    pub map_data: Option<Arc<Vec<u8>>>,

    /// Shared ban store, reloaded by the file watcher service.
    pub bans: Arc<std::sync::RwLock<crate::ban::BanList>>,

    pub record: GameRecord,
}

impl Game {
    pub fn new(
        cfg: Arc<Config>,
        host_counter: u32,
        host_port: u16,
        map_data: Option<Arc<Vec<u8>>>,
        now: Instant,
    ) -> Self {
        let mut rng = rand::thread_rng();
        let version = cfg.game.versions.first().copied().unwrap_or(28);
        let observer_sentinel = if version >= VERSION_EXPANDED_SLOTS {
            OBSERVER_SENTINEL_EXPANDED
        } else {
            OBSERVER_SENTINEL_LEGACY
        };

        let slots = build_table(&cfg, observer_sentinel);
        let layout_style = if cfg.map.custom_forces { 3 } else { 0 };
        let game_name = cfg.setup.game_name.clone();
        let owner = if cfg.setup.owner.is_empty() {
            None
        } else {
            Some((cfg.setup.owner.clone(), cfg.setup.owner_realm.clone()))
        };
        let reserved = cfg
            .setup
            .reserved
            .iter()
            .map(|n| n.to_lowercase())
            .collect();
        let hcl = cfg.setup.hcl.clone();

        let mut game = Self {
            cfg,
            state: GameState::Lobby,
            version,
            game_id: rng.gen(),
            host_counter,
            entry_key: rng.gen(),
            game_name,
            host_port,
            created_at: now,
            slots,
            random_seed: rng.gen(),
            layout_style,
            players: Vec::new(),
            generation: 0,
            pending: Vec::new(),
            virtual_host_uid: None,
            fake_uids: Vec::new(),
            actions: VecDeque::new(),
            sync_counter: 0,
            sync_partners: HashMap::new(),
            drop_votes: HashSet::new(),
            lag_screen: None,
            paused: false,
            desync_notified: HashSet::new(),
            owner,
            owner_last_seen: now,
            countdown: None,
            exiting: false,
            last_ping: now,
            last_realm_refresh: now,
            last_download_pump: now,
            last_snapshot: now,
            last_action: now,
            next_action_due: now,
            last_leave: None,
            gameover_at: None,
            load_started: None,
            download_bytes_this_window: 0,
            download_window_started: now,
            realm_outbox: Vec::new(),
            pending_commands: Vec::new(),
            deferred_whispers: Vec::new(),
            rejected_names: HashSet::new(),
            reserved,
            session_bans: Vec::new(),
            pinned_messages: Vec::new(),
            locked: false,
            mute_all: false,
            hcl,
            map_data,
            bans: Arc::default(),
            record: GameRecord::default(),
        };
        game.create_virtual_host();
        game
    }

    /// Milliseconds since session creation, for ping payloads.
    pub fn uptime_ms(&self, now: Instant) -> u32 {
        now.duration_since(self.created_at).as_millis() as u32
    }

    /// Next arena generation for a new player.
    pub fn next_generation(&mut self) -> u32 {
        self.generation += 1;
        self.generation
    }

    /// Players that are still part of the game.
    pub fn active_players(&self) -> impl Iterator<Item = &Player> {
        self.players.iter().filter(|p| !p.left)
    }

    pub fn player_by_uid(&self, uid: u8) -> Option<&Player> {
        self.players.iter().find(|p| !p.left && p.uid == uid)
    }

    pub fn player_by_uid_mut(&mut self, uid: u8) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| !p.left && p.uid == uid)
    }

    pub fn player_by_conn(&self, conn_id: u64) -> Option<usize> {
        self.players
            .iter()
            .position(|p| !p.left && p.conn_id == conn_id)
    }

    pub fn player_by_name(&self, name: &str) -> Option<&Player> {
        let lower = name.to_lowercase();
        self.players
            .iter()
            .find(|p| !p.left && p.name.to_lowercase() == lower)
    }

    /// Broadcast a packet to every active player.
    pub fn broadcast(&mut self, packet: &RawPacket) {
        for player in self.players.iter_mut().filter(|p| !p.left) {
            player.send(packet);
        }
    }

    /// Broadcast to everyone except one UID.
    pub fn broadcast_except(&mut self, uid: u8, packet: &RawPacket) {
        for player in self.players.iter_mut().filter(|p| !p.left && p.uid != uid) {
            player.send(packet);
        }
    }

    /// Send an informational chat line to every player.
    pub fn announce(&mut self, text: &str) {
        let from = self.chat_source_uid();
        let uids: Vec<u8> = self.active_players().map(|p| p.uid).collect();
        let packet = crate::proto::chat::chat_from_host(from, &uids, text);
        self.broadcast(&packet);
    }

    /// Send a chat line to a single player.
    pub fn whisper(&mut self, uid: u8, text: &str) {
        let from = self.chat_source_uid();
        let packet = crate::proto::chat::chat_from_host(from, &[uid], text);
        if let Some(player) = self.player_by_uid_mut(uid) {
            player.send(&packet);
        }
    }

    /// UID host messages appear to come from.
    ///
    /// The virtual host first, then any fake user, then the first player.
    pub fn chat_source_uid(&self) -> u8 {
        if let Some(uid) = self.virtual_host_uid {
            return uid;
        }
        if let Some(&uid) = self.fake_uids.first() {
            return uid;
        }
        self.active_players().next().map(|p| p.uid).unwrap_or(1)
    }

    /// Allocate a UID no one is using.
    pub fn new_uid(&self) -> Option<u8> {
        (1u8..=254).find(|uid| {
            Some(*uid) != self.virtual_host_uid
                && !self.fake_uids.contains(uid)
                && !self.players.iter().any(|p| !p.left && p.uid == *uid)
        })
    }

    /// Create the virtual host if the lobby has room for it.
    pub fn create_virtual_host(&mut self) {
        if self.virtual_host_uid.is_some() || self.state != GameState::Lobby {
            return;
        }
        let Some(uid) = self.new_uid() else { return };
        self.virtual_host_uid = Some(uid);
        let info = PlayerInfo::synthetic(uid, &self.cfg.bot.virtual_host_name).encode();
        self.broadcast(&info);
    }

    /// Destroy the virtual host so its leave precedes any later join.
    pub fn destroy_virtual_host(&mut self) {
        let Some(uid) = self.virtual_host_uid.take() else {
            return;
        };
        let packet = player_leave_others(uid, LeaveReason::Lobby);
        self.broadcast(&packet);
    }

    /// Seat a fake user in an open slot.
    pub fn create_fake_user(&mut self) -> Option<u8> {
        let sid = self.slots.find_empty_slot(crate::slot::SlotRole::Player)?;
        let uid = self.new_uid()?;
        self.slots.occupy(sid, uid).ok()?;
        let _ = self.slots.set_download_progress(sid, 100);
        self.fake_uids.push(uid);
        let name = format!("User[{}]", uid);
        let info = PlayerInfo::synthetic(uid, &name).encode();
        self.broadcast(&info);
        Some(uid)
    }

    /// Broadcast the current slot table.
    pub fn send_slot_snapshot(&mut self, now: Instant) {
        let packet = slot_info(&self.slots, self.random_seed, self.layout_style);
        self.broadcast(&packet);
        self.slots.clear_dirty();
        self.last_snapshot = now;
    }

    /// Mark a player as leaving; the purge at the end of the iteration
    /// removes the record and frees the slot.
    pub fn mark_leaving(&mut self, uid: u8, reason: LeaveReason, text: &str, now: Instant) {
        let Some(player) = self.player_by_uid_mut(uid) else {
            return;
        };
        if player.left {
            return;
        }
        player.left = true;
        player.leave_reason = text.to_owned();
        let name = player.name.clone();
        info!(target: "warhost::game", "[{}] player [{}] left: {}", self.game_name, name, text);

        self.last_leave = Some(now);
        self.drop_votes.remove(&uid);
        self.remove_sync_partner(uid);

        // Everyone else learns about the departure first
        let packet = player_leave_others(uid, reason);
        self.broadcast_except(uid, &packet);

        if self.state == GameState::Lobby {
            if let Some(sid) = self.slots.sid_of_uid(uid) {
                let _ = self.slots.vacate(sid);
            }
            self.announce(&format!("{} has left the game.", name));
            // With a free seat again, the virtual host may return
            self.create_virtual_host();
        }

        if self.state == GameState::Playing {
            self.maybe_save_on_leave();
            let remaining = self.active_players().count();
            if remaining == 0 || remaining <= self.cfg.game.num_players_to_start_gameover {
                self.arm_gameover(now, "players left");
            }
        }
    }

    /// Drop leavers and expired pending connections; end-of-iteration step.
    pub fn purge(&mut self, now: Instant) {
        self.players.retain(|p| !p.left);
        let grace = Duration::from_secs(self.cfg.game.join_grace_secs);
        for conn in &mut self.pending {
            if now.duration_since(conn.connected_at) > grace {
                debug!(target: "warhost::game", "dropping silent connection from {}", conn.addr);
                conn.delete = true;
            }
        }
        self.pending.retain(|c| !c.delete);
    }

    /// Remove a UID from the sync partner graph, both directions.
    pub fn remove_sync_partner(&mut self, uid: u8) {
        self.sync_partners.remove(&uid);
        for partners in self.sync_partners.values_mut() {
            partners.remove(&uid);
        }
    }

    /// Cut the partnership between two UIDs, both directions.
    pub fn cut_sync_pair(&mut self, a: u8, b: u8) {
        if let Some(partners) = self.sync_partners.get_mut(&a) {
            partners.remove(&b);
        }
        if let Some(partners) = self.sync_partners.get_mut(&b) {
            partners.remove(&a);
        }
    }

    /// Record that the owner was seen in the game or on a realm.
    pub fn touch_owner(&mut self, now: Instant) {
        self.owner_last_seen = now;
    }

    /// Arm the game-over timer if it is not running yet.
    pub fn arm_gameover(&mut self, now: Instant, reason: &str) {
        if self.gameover_at.is_some() {
            return;
        }
        let tolerance = Duration::from_secs(self.cfg.game.gameover_tolerance_secs);
        info!(target: "warhost::game", "[{}] game over timer started: {}", self.game_name, reason);
        self.gameover_at = Some(now + tolerance);
    }

    /// Whether the game-over timer is running.
    pub fn gameover_armed(&self) -> bool {
        self.gameover_at.is_some()
    }

    /// Drive every per-game timer. Returns true when the session is done and
    /// should be deallocated by the host controller.
    pub fn update(&mut self, now: Instant) -> bool {
        match self.state {
            GameState::Lobby => self.update_lobby(now),
            GameState::CountingDown => {
                self.update_lobby(now);
                self.update_countdown(now);
            }
            GameState::Loading => self.update_loading(now),
            GameState::Playing => self.update_playing(now),
            GameState::Over | GameState::Destroyed => {}
        }

        // Deferred verification whispers
        let due: Vec<(u8, String)> = {
            let mut due = Vec::new();
            self.deferred_whispers.retain(|(at, realm, name)| {
                if *at <= now {
                    due.push((*realm, name.clone()));
                    false
                } else {
                    true
                }
            });
            due
        };
        for (realm_id, name) in due {
            self.realm_outbox
                .push(RealmNotice::VerifyWhisper { realm_id, name });
        }

        // Ownership expiry
        self.update_ownership(now);

        // Game over timer
        if let Some(at) = self.gameover_at {
            if now >= at {
                self.finish(now);
            }
        }

        self.purge(now);

        if self.exiting && self.players.is_empty() {
            self.state = GameState::Destroyed;
            self.realm_outbox.push(RealmNotice::Uncreate);
            return true;
        }
        false
    }

    /// The next instant `update` wants to run.
    pub fn next_deadline(&self, now: Instant) -> Instant {
        let mut deadline = self.last_ping + PING_INTERVAL;
        if self.state == GameState::Playing {
            deadline = deadline.min(self.next_action_due);
        }
        if self.state == GameState::Lobby || self.state == GameState::CountingDown {
            deadline = deadline.min(self.last_download_pump + DOWNLOAD_PUMP_INTERVAL);
        }
        if let Some(countdown) = &self.countdown {
            deadline = deadline.min(countdown.next_tick);
        }
        if let Some(at) = self.gameover_at {
            deadline = deadline.min(at);
        }
        deadline.max(now)
    }

    /// Clear ownership when the owner has been away too long, then destroy
    /// lobbies that stayed ownerless.
    fn update_ownership(&mut self, now: Instant) {
        if self.state != GameState::Lobby && self.state != GameState::CountingDown {
            return;
        }
        let owner_name = self.owner.as_ref().map(|(name, _)| name.clone());
        if let Some(name) = owner_name {
            let present = self.player_by_name(&name).is_some();
            if present {
                self.owner_last_seen = now;
            } else if now.duration_since(self.owner_last_seen)
                > Duration::from_secs(self.cfg.game.release_owner_secs)
            {
                info!(target: "warhost::game", "[{}] ownership released", self.game_name);
                self.owner = None;
            }
        } else if now.duration_since(self.owner_last_seen)
            > Duration::from_secs(self.cfg.game.delete_orphan_lobby_secs)
        {
            info!(target: "warhost::game", "[{}] deleting orphan lobby", self.game_name);
            self.exiting = true;
            for uid in self.active_players().map(|p| p.uid).collect::<Vec<_>>() {
                self.mark_leaving(uid, LeaveReason::Lobby, "lobby closed", now);
            }
        }
    }

    /// Final shutdown after the game-over tolerance expired.
    ///
    /// In game, each client is told that everyone else left; no leave is sent
    /// for the client itself, which would force it to the score screen.
    pub fn finish(&mut self, now: Instant) {
        if self.state == GameState::Over || self.state == GameState::Destroyed {
            return;
        }
        info!(target: "warhost::game", "[{}] game over", self.game_name);
        if self.state == GameState::Playing {
            let uids: Vec<u8> = self.active_players().map(|p| p.uid).collect();
            for &uid in &uids {
                for &other in uids.iter().filter(|&&other| other != uid) {
                    let packet = player_leave_others(other, LeaveReason::Lost);
                    if let Some(player) = self.player_by_uid_mut(uid) {
                        player.send(&packet);
                    }
                }
            }
        }
        self.record.duration_secs = now.duration_since(self.created_at).as_secs();
        self.state = GameState::Over;
        self.exiting = true;
        for player in self.players.iter_mut() {
            player.left = true;
        }
    }

    /// Handle one network event.
    pub fn handle_event(&mut self, event: GameEvent, now: Instant) {
        match event {
            GameEvent::Connect { conn_id, addr, tx } => {
                debug!(target: "warhost::game", "new connection {} from {}", conn_id, addr);
                self.pending.push(PendingConn {
                    conn_id,
                    addr,
                    outbox: Outbox::Socket(tx),
                    connected_at: now,
                    delete: false,
                });
            }
            GameEvent::Packet { conn_id, packet } => {
                if let Some(idx) = self.player_by_conn(conn_id) {
                    self.handle_player_packet(idx, packet, now);
                } else {
                    self.handle_pending_packet(conn_id, packet, now);
                }
            }
            GameEvent::Disconnect { conn_id } => {
                if let Some(idx) = self.player_by_conn(conn_id) {
                    self.handle_player_disconnect(idx, now);
                } else if let Some(conn) = self.pending.iter_mut().find(|c| c.conn_id == conn_id) {
                    conn.delete = true;
                }
            }
        }
    }

    /// Route a packet from an admitted player.
    fn handle_player_packet(&mut self, idx: usize, packet: RawPacket, now: Instant) {
        self.players[idx].last_activity = now;
        self.players[idx].packets_received = self.players[idx].packets_received.wrapping_add(1);
        let uid = self.players[idx].uid;

        if packet.is_gps() {
            self.handle_gps_packet(idx, packet, now);
            return;
        }

        match packet.id {
            id::LEAVEREQ => {
                let client_reason = crate::proto::join::LeaveReq::decode(&packet.data)
                    .ok()
                    .and_then(|req| LeaveReason::from_u32(req.reason));
                self.players[idx].send(&crate::proto::join::leave_ack());
                let reason = match (self.state, client_reason) {
                    (GameState::Lobby, _) => LeaveReason::Lobby,
                    (_, Some(reason)) => reason,
                    _ => LeaveReason::Disconnect,
                };
                self.mark_leaving(uid, reason, "left the game voluntarily", now);
            }
            id::MAPSIZE => self.handle_map_size(idx, &packet, now),
            id::PONG_TO_HOST => self.handle_pong(idx, &packet, now),
            id::CHAT_TO_HOST => self.handle_chat(idx, &packet, now),
            id::GAMELOADED_SELF => self.handle_game_loaded(idx, now),
            id::OUTGOING_ACTION => self.handle_outgoing_action(idx, &packet, now),
            id::OUTGOING_KEEPALIVE => self.handle_keepalive(idx, &packet, now),
            id::DROPREQ => self.handle_drop_req(idx, now),
            other => {
                trace!(target: "warhost::game", "unhandled packet 0x{:02X} from {}", other, self.players[idx].name);
            }
        }
    }

    /// A player's socket died.
    pub fn handle_player_disconnect(&mut self, idx: usize, now: Instant) {
        let uid = self.players[idx].uid;
        if self.state == GameState::Playing && self.players[idx].gproxy {
            self.start_reconnect_wait(idx, now);
            return;
        }
        let reason = if self.state == GameState::Lobby {
            LeaveReason::Lobby
        } else {
            LeaveReason::Disconnect
        };
        self.mark_leaving(uid, reason, "connection closed", now);
    }
}

/// Build the initial slot table from the map description.
fn build_table(cfg: &Config, observer_sentinel: u8) -> SlotTable {
    if cfg.map.num_teams == 0 {
        return melee_table(cfg.map.num_slots.max(2), observer_sentinel, cfg.map.observers);
    }
    let mut slots: Vec<Slot> = (0..cfg.map.num_slots)
        .map(|i| {
            Slot::open(
                i % cfg.map.num_teams,
                i,
                crate::slot::RACE_RANDOM | crate::slot::RACE_SELECTABLE,
            )
        })
        .collect();
    if cfg.map.observers {
        for _ in 0..2 {
            slots.push(Slot::open(
                observer_sentinel,
                observer_sentinel,
                crate::slot::RACE_RANDOM,
            ));
        }
    }
    let comm_sid = if cfg.map.comm_pseudonym.is_empty() {
        None
    } else {
        // The map communication seat is the last observer slot
        Some(slots.len() as u8 - 1)
    };
    SlotTable::new(
        slots,
        observer_sentinel,
        cfg.map.num_teams,
        cfg.map.fixed_player_settings,
        cfg.map.custom_forces,
        cfg.map.observers,
        comm_sid,
    )
}

#[cfg(test)]
pub mod testutil {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    /// Config with a known map for session tests.
    pub fn test_config() -> Arc<Config> {
        let mut cfg = Config::default();
        cfg.map.size = 4096;
        cfg.map.crc32 = 0x1111_2222;
        cfg.map.num_slots = 12;
        cfg.setup.game_name = "test game".into();
        Arc::new(cfg)
    }

    pub fn test_game(cfg: Arc<Config>) -> Game {
        Game::new(cfg, 1, 6113, None, Instant::now())
    }

    /// Admit a player directly with a sink outbox.
    pub fn seat_player(game: &mut Game, name: &str, now: Instant) -> u8 {
        let sid = game
            .slots
            .find_empty_slot(crate::slot::SlotRole::Player)
            .expect("no open slot");
        let uid = game.new_uid().expect("no free uid");
        game.slots.occupy(sid, uid).unwrap();
        let generation = game.next_generation();
        let mut player = Player::new(
            name.into(),
            0,
            SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, uid.into())), 6112),
            uid,
            sid,
            generation,
            false,
            false,
            Outbox::Sink(Vec::new()),
            now,
        );
        player.map_ready = true;
        game.players.push(player);
        uid
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::*;
    use super::*;

    #[test]
    fn virtual_host_created_in_lobby() {
        let game = test_game(test_config());
        assert!(game.virtual_host_uid.is_some());
    }

    #[test]
    fn new_uid_skips_taken() {
        let mut game = test_game(test_config());
        let vh = game.virtual_host_uid.unwrap();
        let now = Instant::now();
        let first = seat_player(&mut game, "alice", now);
        assert_ne!(first, vh);
        let next = game.new_uid().unwrap();
        assert_ne!(next, vh);
        assert_ne!(next, first);
    }

    #[test]
    fn leave_vacates_slot_and_restores_virtual_host() {
        let cfg = test_config();
        let mut game = test_game(cfg);
        let now = Instant::now();
        let uid = seat_player(&mut game, "alice", now);
        game.virtual_host_uid = None;

        game.mark_leaving(uid, LeaveReason::Lobby, "test", now);
        game.purge(now);

        assert!(game.player_by_uid(uid).is_none());
        assert!(game.slots.sid_of_uid(uid).is_none());
        assert!(game.virtual_host_uid.is_some(), "virtual host reappears");
    }

    #[test]
    fn leave_message_precedes_later_traffic() {
        let cfg = test_config();
        let mut game = test_game(cfg);
        let now = Instant::now();
        let alice = seat_player(&mut game, "alice", now);
        let bob = seat_player(&mut game, "bob", now);

        game.mark_leaving(alice, LeaveReason::Lobby, "test", now);
        game.send_slot_snapshot(now);

        let frames = game.player_by_uid(bob).unwrap().sink_frames();
        let leave_pos = frames
            .iter()
            .position(|f| f.id == id::PLAYERLEAVE_OTHERS)
            .expect("bob saw the leave");
        let snapshot_pos = frames
            .iter()
            .position(|f| f.id == id::SLOTINFO)
            .expect("bob saw the snapshot");
        assert!(leave_pos < snapshot_pos);
    }

    #[test]
    fn gameover_timer_finishes_game() {
        let cfg = test_config();
        let mut game = test_game(cfg);
        let now = Instant::now();
        seat_player(&mut game, "alice", now);
        game.state = GameState::Playing;

        game.arm_gameover(now, "test");
        assert!(game.gameover_armed());
        let later = now + Duration::from_secs(61);
        game.update(later);
        assert!(game.exiting);
    }

    #[test]
    fn finish_tells_each_client_everyone_else_left() {
        let cfg = test_config();
        let mut game = test_game(cfg);
        let now = Instant::now();
        let alice = seat_player(&mut game, "alice", now);
        let bob = seat_player(&mut game, "bob", now);
        let carol = seat_player(&mut game, "carol", now);
        game.state = GameState::Playing;

        game.finish(now);

        for (me, others) in [(alice, [bob, carol]), (bob, [alice, carol])] {
            let frames = game
                .players
                .iter()
                .find(|p| p.uid == me)
                .unwrap()
                .sink_frames();
            let leaves: Vec<u8> = frames
                .iter()
                .filter(|f| f.id == id::PLAYERLEAVE_OTHERS)
                .map(|f| f.data[0])
                .collect();
            for other in others {
                assert!(leaves.contains(&other));
            }
            assert!(!leaves.contains(&me), "no leave for the client itself");
        }
    }

    #[test]
    fn orphan_lobby_is_deleted() {
        let cfg = test_config();
        let mut game = test_game(cfg);
        let now = Instant::now();
        assert!(game.owner.is_none());
        let later = now + Duration::from_secs(601);
        game.update(later);
        assert!(game.exiting);
    }
}
