use std::time::{Duration, Instant};

use crate::game::{
    Countdown, Game, GameState, RealmNotice, DOWNLOAD_PUMP_INTERVAL, LEAVE_COUNTDOWN_BLOCK,
    MAP_KICK_DELAY, PING_INTERVAL, REALM_REFRESH_INTERVAL, SNAPSHOT_INTERVAL,
};
use crate::proto::game::{countdown_end, countdown_start, game_loaded_others};
use crate::proto::join::LeaveReason;
use crate::proto::map::{map_part, start_download, MapSize};
use crate::proto::packet::RawPacket;
use crate::proto::ping::{ping_from_host, PongToHost};
use crate::proto::MAP_PART_SIZE;

/// Ping samples required before a player may be counted down with.
const MIN_PING_SAMPLES: usize = 3;

impl Game {
    /// Lobby-phase timers: pings, advertisements, downloads, snapshots.
    pub(super) fn update_lobby(&mut self, now: Instant) {
        self.tick_pings(now);

        // Realm refresh queue, every three seconds
        if now.duration_since(self.last_realm_refresh) >= REALM_REFRESH_INTERVAL {
            self.last_realm_refresh = now;
            self.realm_outbox.push(RealmNotice::RefreshGame {
                slots_open: self.slots.open_slots(),
            });
        }

        // Map download pump
        if now.duration_since(self.last_download_pump) >= DOWNLOAD_PUMP_INTERVAL {
            self.last_download_pump = now;
            self.pump_downloads(now);
        }

        // Download progress snapshots, batched to once per second
        if self.slots.dirty() && now.duration_since(self.last_snapshot) >= SNAPSHOT_INTERVAL {
            self.send_slot_snapshot(now);
        }

        // Deadline kicks for players without the map
        let expired: Vec<u8> = self
            .active_players()
            .filter(|p| p.kick_deadline.map(|at| now >= at).unwrap_or(false))
            .map(|p| p.uid)
            .collect();
        for uid in expired {
            self.mark_leaving(
                uid,
                LeaveReason::Lobby,
                "was kicked for not having the map",
                now,
            );
        }

        // Auto start
        if self.state == GameState::Lobby && self.cfg.game.auto_start_players > 0 {
            let enough_players = self.slots.controllers() >= self.cfg.game.auto_start_players;
            let enough_time = now.duration_since(self.created_at)
                >= Duration::from_secs(self.cfg.game.auto_start_secs);
            if enough_players && enough_time && self.try_start(false, now).is_ok() {
                self.announce("Autostart requirements met, starting the game.");
            }
        }
    }

    /// Latency probes, shared by every phase.
    pub(super) fn tick_pings(&mut self, now: Instant) {
        if now.duration_since(self.last_ping) < PING_INTERVAL {
            return;
        }
        self.last_ping = now;
        let packet = ping_from_host(self.uptime_ms(now));
        self.broadcast(&packet);
    }

    pub(super) fn handle_pong(&mut self, idx: usize, packet: &RawPacket, now: Instant) {
        let Ok(pong) = PongToHost::decode(&packet.data) else {
            return;
        };
        let rtt = pong.rtt_ms(self.uptime_ms(now));
        self.players[idx].add_ping(rtt);
    }

    /// A client reported its local map size.
    pub(super) fn handle_map_size(&mut self, idx: usize, packet: &RawPacket, now: Instant) {
        let Ok(report) = MapSize::decode(&packet.data) else {
            debug!(target: "warhost::lobby", "malformed MAPSIZE from {}", self.players[idx].name);
            return;
        };
        let map_size = self.cfg.map.size;
        let uid = self.players[idx].uid;
        let sid = self.players[idx].sid;

        if report.size_flag == 1 && report.map_size == map_size {
            // The client has the full map
            let name = self.players[idx].name.clone();
            let was_downloading = self.players[idx].download_started.is_some();
            self.players[idx].map_ready = true;
            self.players[idx].needs_map = false;
            self.players[idx].kick_deadline = None;
            let _ = self.slots.set_download_progress(sid, 100);
            if let Some(started) = self.players[idx].download_started.take() {
                let secs = now.duration_since(started).as_secs_f32();
                self.announce(&format!(
                    "{} finished downloading the map in {:.1} seconds.",
                    name, secs
                ));
            } else if was_downloading {
                debug!(target: "warhost::lobby", "{} reported the map out of nowhere", name);
            }
            return;
        }

        // Size mismatch: serve the map or queue a kick
        if self.cfg.game.map_transfers && self.cfg.net.max_upload_speed > 0 {
            if self.map_data.is_some() {
                if self.players[idx].download_started.is_none() {
                    self.players[idx].needs_map = true;
                }
                // During a transfer the reports acknowledge received bytes
                if self.players[idx].download_started.is_some() {
                    self.players[idx].bytes_acked = report.map_size.min(map_size);
                    let progress = self.players[idx].download_progress(map_size);
                    let _ = self.slots.set_download_progress(sid, progress);
                }
                return;
            }
            warn!(target: "warhost::lobby", "map transfers enabled but map file is unreadable");
        }

        // No transfer possible; give them a deadline and a pointer
        if self.players[idx].kick_deadline.is_none() {
            self.players[idx].kick_deadline = Some(now + MAP_KICK_DELAY);
            let text = if self.cfg.map.url.is_empty() {
                "You do not have the map and downloads are disabled.".to_owned()
            } else {
                format!(
                    "You do not have the map, get it at {} or you will be kicked.",
                    self.cfg.map.url
                )
            };
            self.whisper(uid, &text);
        }
    }

    /// Feed map chunks to downloaders within the configured windows.
    fn pump_downloads(&mut self, now: Instant) {
        let Some(map_data) = self.map_data.clone() else {
            return;
        };
        let map_size = self.cfg.map.size.min(map_data.len() as u32);

        // Refill the global byte budget once per second
        if now.duration_since(self.download_window_started) >= Duration::from_secs(1) {
            self.download_window_started = now;
            self.download_bytes_this_window = 0;
        }

        // Promote queued downloaders while there is capacity
        let active = self
            .active_players()
            .filter(|p| p.download_started.is_some() && !p.map_ready)
            .count();
        let mut capacity = self.cfg.net.max_downloaders.saturating_sub(active);
        let from_uid = self.chat_source_uid();
        let queued: Vec<u8> = self
            .active_players()
            .filter(|p| p.needs_map && p.download_started.is_none())
            .map(|p| p.uid)
            .collect();
        for uid in queued {
            if capacity == 0 {
                break;
            }
            capacity -= 1;
            info!(target: "warhost::lobby", "starting map transfer to uid {}", uid);
            if let Some(player) = self.player_by_uid_mut(uid) {
                player.download_started = Some(now);
                player.bytes_acked = 0;
                player.bytes_sent = 0;
                player.send(&start_download(from_uid));
            }
        }

        // Window per player, bytes per second globally
        let window = MAP_PART_SIZE * self.cfg.net.max_parallel_map_packets;
        let budget = self.cfg.net.max_upload_speed;
        for player in self
            .players
            .iter_mut()
            .filter(|p| !p.left && p.download_started.is_some() && !p.map_ready)
        {
            while (player.bytes_sent as usize) < player.bytes_acked as usize + window
                && player.bytes_sent < map_size
                && self.download_bytes_this_window < budget
            {
                let start = player.bytes_sent;
                let end = (start as usize + MAP_PART_SIZE).min(map_size as usize);
                let chunk = &map_data[start as usize..end];
                player.send(&map_part(player.uid, from_uid, start, chunk));
                player.bytes_sent = end as u32;
                self.download_bytes_this_window += chunk.len();
            }
        }
    }

    /// Check the countdown preconditions and begin ticking.
    ///
    /// The returned error is the operator-visible explanation.
    pub fn try_start(&mut self, force: bool, now: Instant) -> Result<(), String> {
        if self.state != GameState::Lobby {
            return Err("The game is already starting.".into());
        }

        if !force {
            if self.hcl.len() > self.slots.occupied() {
                return Err(format!(
                    "The HCL string is longer than the occupied slots ({} > {}).",
                    self.hcl.len(),
                    self.slots.occupied()
                ));
            }

            let downloading: Vec<String> = self
                .active_players()
                .filter(|p| !p.map_ready)
                .map(|p| p.name.clone())
                .collect();
            if !downloading.is_empty() {
                return Err(format!(
                    "Players still downloading the map: {}",
                    downloading.join(", ")
                ));
            }

            if self.slots.teams_represented() < 2 {
                return Err("At least two teams must have players.".into());
            }

            let unprobed: Vec<String> = self
                .active_players()
                .filter(|p| !p.reserved && !p.observer && p.pings.len() < MIN_PING_SAMPLES)
                .map(|p| p.name.clone())
                .collect();
            if !unprobed.is_empty() {
                return Err(format!(
                    "Waiting for ping measurements: {}",
                    unprobed.join(", ")
                ));
            }

            let unverified: Vec<String> = self
                .active_players()
                .filter(|p| {
                    p.realm_id != 0
                        && !p.verified
                        && self
                            .cfg
                            .realms
                            .iter()
                            .any(|r| r.internal_id == p.realm_id && r.verify_joiners)
                })
                .map(|p| p.name.clone())
                .collect();
            if !unverified.is_empty() {
                return Err(format!(
                    "Players not yet verified by their realm: {}",
                    unverified.join(", ")
                ));
            }

            if let Some(last) = self.last_leave {
                if now.duration_since(last) < LEAVE_COUNTDOWN_BLOCK {
                    return Err("Someone just left, try again in a moment.".into());
                }
            }
        }

        info!(target: "warhost::game", "[{}] countdown started", self.game_name);
        self.state = GameState::CountingDown;
        self.countdown = Some(Countdown {
            remaining: self.cfg.game.countdown_start,
            next_tick: now,
        });
        Ok(())
    }

    /// Abort a running countdown, back to plain lobby.
    pub fn abort_countdown(&mut self) -> bool {
        if self.state != GameState::CountingDown {
            return false;
        }
        self.state = GameState::Lobby;
        self.countdown = None;
        self.announce("Countdown aborted.");
        true
    }

    pub(super) fn update_countdown(&mut self, now: Instant) {
        let Some(countdown) = &mut self.countdown else {
            return;
        };
        if now < countdown.next_tick {
            return;
        }
        if countdown.remaining > 0 {
            let n = countdown.remaining;
            countdown.remaining -= 1;
            countdown.next_tick = now + Duration::from_millis(self.cfg.game.countdown_tick_ms);
            self.announce(&format!("{}...", n));
            return;
        }
        self.countdown = None;
        self.begin_loading(now);
    }

    /// Countdown hit zero; lock the lobby shape and start loading.
    fn begin_loading(&mut self, now: Instant) {
        // Encode the mode string into the handicaps
        if !self.hcl.is_empty() {
            let hcl = self.hcl.clone();
            if self.slots.encode_hcl(&hcl) {
                info!(target: "warhost::game", "[{}] encoded HCL string [{}]", self.game_name, hcl);
            } else {
                warn!(target: "warhost::game", "[{}] could not encode HCL string [{}], skipping", self.game_name, hcl);
            }
        }

        self.destroy_virtual_host();

        // The client needs at least two seated parties for chat to work
        if self.active_players().count() + self.fake_uids.len() < 2 {
            self.create_fake_user();
        }

        self.send_slot_snapshot(now);
        self.broadcast(&countdown_start());
        self.broadcast(&countdown_end());

        self.state = GameState::Loading;
        self.load_started = Some(now);

        // Start reconnect buffering and seed the sync partner graph
        let uids: Vec<u8> = self.active_players().map(|p| p.uid).collect();
        for &uid in &uids {
            let partners: std::collections::HashSet<u8> =
                uids.iter().copied().filter(|&u| u != uid).collect();
            self.sync_partners.insert(uid, partners);
        }
        for player in self.players.iter_mut().filter(|p| !p.left) {
            player.start_buffering();
        }

        self.record.map = self.cfg.map.path.clone();
        self.record.game_name = self.game_name.clone();
        self.record.players = self
            .active_players()
            .map(|p| p.name.clone())
            .collect();

        info!(target: "warhost::game", "[{}] loading with {} players", self.game_name, uids.len());
    }

    pub(super) fn handle_game_loaded(&mut self, idx: usize, now: Instant) {
        if self.state != GameState::Loading || self.players[idx].loaded {
            return;
        }
        self.players[idx].loaded = true;
        self.players[idx].finished_loading_at = Some(now);
        let uid = self.players[idx].uid;
        self.broadcast(&game_loaded_others(uid));
    }

    pub(super) fn update_loading(&mut self, now: Instant) {
        self.tick_pings(now);

        let all_loaded = self.active_players().all(|p| p.loaded);
        if !all_loaded || self.active_players().count() == 0 {
            return;
        }

        // Record the spread of load times
        if let Some(started) = self.load_started {
            let times: Vec<(String, Duration)> = self
                .active_players()
                .filter_map(|p| {
                    p.finished_loading_at
                        .map(|at| (p.name.clone(), at.duration_since(started)))
                })
                .collect();
            if let Some((name, longest)) = times.iter().max_by_key(|(_, d)| *d) {
                info!(target: "warhost::game", "[{}] slowest load: {} in {:.1}s",
                    self.game_name, name, longest.as_secs_f32());
            }
            if let Some((name, shortest)) = times.iter().min_by_key(|(_, d)| *d) {
                info!(target: "warhost::game", "[{}] fastest load: {} in {:.1}s",
                    self.game_name, name, shortest.as_secs_f32());
            }
        }

        self.state = GameState::Playing;
        self.begin_playing(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::testutil::*;
    use crate::proto::id;
    use std::sync::Arc;

    fn ready_lobby() -> (Game, Vec<u8>, Instant) {
        let mut game = test_game(test_config());
        let now = Instant::now();
        let mut uids = Vec::new();
        for (i, name) in ["alice", "bob", "carol"].iter().enumerate() {
            let uid = seat_player(&mut game, name, now);
            let sid = game.slots.sid_of_uid(uid).unwrap();
            let _ = game.slots.set_team(sid, (i % 2) as u8);
            for _ in 0..3 {
                game.player_by_uid_mut(uid).unwrap().add_ping(40);
            }
            uids.push(uid);
        }
        (game, uids, now)
    }

    #[test]
    fn start_blocked_by_downloader() {
        let (mut game, uids, now) = ready_lobby();
        game.player_by_uid_mut(uids[2]).unwrap().map_ready = false;

        let err = game.try_start(false, now).unwrap_err();
        assert!(err.contains("still downloading"), "got: {err}");
        assert!(err.contains("carol"));
        assert_eq!(game.state, GameState::Lobby);

        // Once the download finishes the countdown proceeds
        game.player_by_uid_mut(uids[2]).unwrap().map_ready = true;
        game.try_start(false, now).unwrap();
        assert_eq!(game.state, GameState::CountingDown);
    }

    #[test]
    fn start_blocked_by_single_team() {
        let (mut game, uids, now) = ready_lobby();
        for &uid in &uids {
            let sid = game.slots.sid_of_uid(uid).unwrap();
            game.slots.set_team(sid, 0).unwrap();
        }
        let err = game.try_start(false, now).unwrap_err();
        assert!(err.contains("two teams"), "got: {err}");
    }

    #[test]
    fn start_blocked_by_recent_leaver() {
        let (mut game, _uids, now) = ready_lobby();
        game.last_leave = Some(now);
        assert!(game.try_start(false, now).is_err());
        assert!(game
            .try_start(false, now + Duration::from_secs(3))
            .is_ok());
    }

    #[test]
    fn force_start_skips_checks() {
        let (mut game, uids, now) = ready_lobby();
        game.player_by_uid_mut(uids[0]).unwrap().map_ready = false;
        game.try_start(true, now).unwrap();
        assert_eq!(game.state, GameState::CountingDown);
    }

    #[test]
    fn countdown_reaches_loading() {
        let (mut game, _uids, now) = ready_lobby();
        game.try_start(false, now).unwrap();
        let mut t = now;
        for _ in 0..=game.cfg.game.countdown_start + 1 {
            game.update_countdown(t);
            t += Duration::from_millis(game.cfg.game.countdown_tick_ms);
        }
        assert_eq!(game.state, GameState::Loading);
        // Countdown end frames went out to everyone
        let frames = game.players[0].sink_frames();
        assert!(frames.iter().any(|f| f.id == id::COUNTDOWN_START));
        assert!(frames.iter().any(|f| f.id == id::COUNTDOWN_END));
    }

    #[test]
    fn loading_completes_when_everyone_loaded() {
        let (mut game, uids, now) = ready_lobby();
        game.try_start(true, now).unwrap();
        let mut t = now;
        for _ in 0..=game.cfg.game.countdown_start + 1 {
            game.update_countdown(t);
            t += Duration::from_millis(500);
        }
        assert_eq!(game.state, GameState::Loading);

        for &uid in &uids {
            let idx = game.players.iter().position(|p| p.uid == uid).unwrap();
            game.handle_game_loaded(idx, t);
        }
        game.update_loading(t);
        assert_eq!(game.state, GameState::Playing);
    }

    #[test]
    fn sync_graph_seeded_at_load() {
        let (mut game, uids, now) = ready_lobby();
        game.try_start(true, now).unwrap();
        let mut t = now;
        for _ in 0..=game.cfg.game.countdown_start + 1 {
            game.update_countdown(t);
            t += Duration::from_millis(500);
        }
        for &uid in &uids {
            assert_eq!(game.sync_partners[&uid].len(), uids.len() - 1);
        }
    }

    #[test]
    fn map_size_match_marks_ready() {
        let mut game = test_game(test_config());
        let now = Instant::now();
        let uid = seat_player(&mut game, "dave", now);
        let idx = game.players.iter().position(|p| p.uid == uid).unwrap();
        game.players[idx].map_ready = false;

        let report = MapSize {
            size_flag: 1,
            map_size: game.cfg.map.size,
        };
        let packet = RawPacket::w3gs(id::MAPSIZE, report.encode());
        game.handle_map_size(idx, &packet, now);
        assert!(game.players[idx].map_ready);
        let sid = game.players[idx].sid;
        assert_eq!(game.slots.get(sid).unwrap().download_progress, 100);
    }

    #[test]
    fn map_mismatch_without_transfers_queues_kick() {
        let cfg = {
            let mut cfg = crate::config::Config::default();
            cfg.map.size = 4096;
            cfg.game.map_transfers = false;
            Arc::new(cfg)
        };
        let mut game = test_game(cfg);
        let now = Instant::now();
        let uid = seat_player(&mut game, "erin", now);
        let idx = game.players.iter().position(|p| p.uid == uid).unwrap();
        game.players[idx].map_ready = false;

        let report = MapSize {
            size_flag: 1,
            map_size: 123,
        };
        let packet = RawPacket::w3gs(id::MAPSIZE, report.encode());
        game.handle_map_size(idx, &packet, now);
        assert!(game.players[idx].kick_deadline.is_some());

        // Deadline enforcement happens in the lobby tick
        game.update_lobby(now + MAP_KICK_DELAY + Duration::from_secs(1));
        assert!(game.players[idx].left);
    }

    #[test]
    fn download_pump_respects_window() {
        let cfg = {
            let mut cfg = crate::config::Config::default();
            cfg.map.size = 100_000;
            cfg.net.max_parallel_map_packets = 2;
            Arc::new(cfg)
        };
        let mut game = test_game(cfg);
        game.map_data = Some(Arc::new(vec![0x42; 100_000]));
        let now = Instant::now();
        let uid = seat_player(&mut game, "frank", now);
        let idx = game.players.iter().position(|p| p.uid == uid).unwrap();
        game.players[idx].map_ready = false;
        game.players[idx].needs_map = true;
        game.players[idx].clear_sink();

        game.pump_downloads(now);

        let frames = game.players[idx].sink_frames();
        assert_eq!(frames[0].id, id::STARTDOWNLOAD);
        let parts = frames.iter().filter(|f| f.id == id::MAPPART).count();
        // Window is 2 packets of 1442 bytes with nothing acknowledged yet
        assert_eq!(parts, 2);

        // Acknowledge one packet worth, one more chunk flows
        game.players[idx].bytes_acked = 1442;
        game.players[idx].clear_sink();
        game.pump_downloads(now + Duration::from_millis(100));
        let parts = game.players[idx]
            .sink_frames()
            .iter()
            .filter(|f| f.id == id::MAPPART)
            .count();
        assert_eq!(parts, 1);
    }
}
