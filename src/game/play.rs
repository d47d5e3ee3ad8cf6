use std::time::{Duration, Instant};

use crate::config::{DesyncPolicy, SaveOnLeave};
use crate::game::{Game, GameState, LAG_SCREEN_REFRESH};
use crate::proto::action::{fragment_actions, incoming_action, Action, OutgoingAction, OutgoingKeepalive};
use crate::proto::game::{start_lag, stop_lag, Lagger};
use crate::proto::join::LeaveReason;
use crate::proto::packet::RawPacket;

/// Game action identifiers the host inspects.
const ACTION_PAUSE: u8 = 0x01;
const ACTION_RESUME: u8 = 0x02;
const ACTION_SAVE: u8 = 0x06;
const ACTION_SAVE_ENDED: u8 = 0x07;

/// Pauses a regular player gets per game; referees are unlimited.
const MAX_PAUSES: u8 = 3;

impl Game {
    /// Enter the playing state after everyone loaded.
    pub(super) fn begin_playing(&mut self, now: Instant) {
        let latency = Duration::from_millis(self.cfg.game.latency_ms);
        self.last_action = now;
        self.next_action_due = now + latency;
        info!(target: "warhost::play", "[{}] game started", self.game_name);
        self.record.started = true;

        if self.active_players().count() <= self.cfg.game.num_players_to_start_gameover {
            self.arm_gameover(now, "not enough players");
        }
    }

    /// Playing-phase timers: the action relay, lag screen upkeep, pings.
    pub(super) fn update_playing(&mut self, now: Instant) {
        self.tick_pings(now);
        self.tick_gproxy_acks(now);
        self.update_reconnect_waits(now);

        // Lag detection
        if self.lag_screen.is_none() {
            let laggers = self.detect_laggers(now);
            if !laggers.is_empty() {
                self.open_lag_screen(laggers, now);
            }
        } else {
            self.update_lag_screen(now);
        }

        // Action relay with pacing feedback
        if self.lag_screen.is_none() && now >= self.next_action_due {
            self.relay_actions(now);
        }
    }

    /// Players whose sync counter fell too far behind.
    fn detect_laggers(&mut self, now: Instant) -> Vec<u8> {
        let limit = self.cfg.game.sync_limit;
        let global = self.sync_counter;
        let laggers: Vec<u8> = self
            .players
            .iter()
            .filter(|p| !p.left && !p.lagging && behind_frames(global, p) > limit)
            .map(|p| p.uid)
            .collect();
        for &uid in &laggers {
            if let Some(player) = self.player_by_uid_mut(uid) {
                player.lagging = true;
                player.lag_started = Some(now);
            }
        }
        laggers
    }

    /// Put up the lag screen for the given players and reset drop votes.
    fn open_lag_screen(&mut self, laggers: Vec<u8>, now: Instant) {
        let names: Vec<String> = laggers
            .iter()
            .filter_map(|&uid| self.player_by_uid(uid).map(|p| p.name.clone()))
            .collect();
        info!(target: "warhost::play", "[{}] lag screen up for: {}", self.game_name, names.join(", "));
        self.drop_votes.clear();
        let entries = self.lag_entries(now);
        let packet = start_lag(&entries);
        self.broadcast(&packet);
        self.lag_screen = Some(now);
    }

    fn lag_entries(&self, now: Instant) -> Vec<Lagger> {
        self.active_players()
            .filter(|p| p.lagging)
            .map(|p| Lagger {
                uid: p.uid,
                lag_ms: p
                    .lag_started
                    .map(|at| now.duration_since(at).as_millis() as u32)
                    .unwrap_or(0),
            })
            .collect()
    }

    /// Refresh and recovery handling while the lag screen is up.
    fn update_lag_screen(&mut self, now: Instant) {
        // Recovery below the safe threshold
        let safe = self.cfg.game.sync_limit_safe;
        let global = self.sync_counter;
        let recovered: Vec<u8> = self
            .active_players()
            .filter(|p| p.lagging && behind_frames(global, p) < safe)
            .map(|p| p.uid)
            .collect();
        for uid in recovered {
            let entry = Lagger {
                uid,
                lag_ms: self
                    .player_by_uid(uid)
                    .and_then(|p| p.lag_started)
                    .map(|at| now.duration_since(at).as_millis() as u32)
                    .unwrap_or(0),
            };
            if let Some(player) = self.player_by_uid_mut(uid) {
                player.lagging = false;
                player.lag_started = None;
            }
            let name = self
                .player_by_uid(uid)
                .map(|p| p.name.clone())
                .unwrap_or_default();
            info!(target: "warhost::play", "[{}] {} stopped lagging", self.game_name, name);
            self.broadcast(&stop_lag(entry));
        }

        let still_lagging = self.active_players().any(|p| p.lagging);
        if !still_lagging {
            self.lag_screen = None;
            return;
        }

        // The client drops the connection when no action arrives for too
        // long, so the screen is torn down and rebuilt periodically
        let needs_refresh = self
            .lag_screen
            .map(|refreshed| now.duration_since(refreshed) >= LAG_SCREEN_REFRESH)
            .unwrap_or(false);
        if needs_refresh {
            self.refresh_lag_screen(now);
        }
    }

    /// Tear down and rebuild the lag screen to keep clients connected.
    fn refresh_lag_screen(&mut self, now: Instant) {
        debug!(target: "warhost::play", "[{}] refreshing lag screen", self.game_name);
        let entries = self.lag_entries(now);
        let empty_actions = self.gproxy_empty_actions();
        let any_legacy_gproxy = self
            .active_players()
            .any(|p| p.gproxy && !p.gproxy_extended);

        for player in self.players.iter_mut().filter(|p| !p.left) {
            for entry in &entries {
                player.send(&stop_lag(*entry));
            }

            // Empty actions reset the client's action timeout; proxies for
            // the extended variant insert their own
            if any_legacy_gproxy && !player.gproxy {
                player.sync_counter_offset += empty_actions as u32;
                for _ in 0..empty_actions {
                    player.send(&incoming_action(&[], 0));
                }
            }
            player.sync_counter_offset += 1;
            player.send(&incoming_action(&[], 0));
        }

        let packet = start_lag(&entries);
        self.broadcast(&packet);
        self.lag_screen = Some(now);
    }

    /// Empty-action budget for legacy reconnect proxies.
    pub(super) fn gproxy_empty_actions(&self) -> u8 {
        let minutes = self.cfg.reconnect.wait_secs / 60;
        (minutes.saturating_sub(1)).min(9) as u8
    }

    /// Flush the action queue to every player as one relay tick.
    fn relay_actions(&mut self, now: Instant) {
        let latency = Duration::from_millis(self.cfg.game.latency_ms);

        // Legacy proxies get their reconnect budget client-side; everyone
        // else needs the padding from us
        let any_legacy_gproxy = self
            .active_players()
            .any(|p| p.gproxy && !p.gproxy_extended);
        if any_legacy_gproxy {
            let empty_actions = self.gproxy_empty_actions();
            for player in self.players.iter_mut().filter(|p| !p.left && !p.gproxy) {
                player.sync_counter_offset += empty_actions as u32;
                for _ in 0..empty_actions {
                    player.send(&incoming_action(&[], 0));
                }
            }
        }

        let drained: Vec<Action> = self.actions.drain(..).collect();
        let frames = fragment_actions(&drained, self.cfg.game.latency_ms as u16);
        for frame in &frames {
            self.broadcast(frame);
        }
        self.sync_counter = self.sync_counter.wrapping_add(1);

        // Pacing feedback: subtract how late this tick ran from the next
        // interval so the average cadence stays at the configured latency
        let late = now
            .duration_since(self.last_action)
            .saturating_sub(latency)
            .min(latency);
        self.last_action = now;
        self.next_action_due = now + latency - late;
    }

    /// An action batch arrived from a client.
    pub(super) fn handle_outgoing_action(&mut self, idx: usize, packet: &RawPacket, now: Instant) {
        if self.state != GameState::Playing && self.state != GameState::Loading {
            return;
        }
        let uid = self.players[idx].uid;
        let action = match OutgoingAction::decode(&packet.data) {
            Ok(action) => action,
            Err(err) => {
                // Oversized or malformed batches kill the peer, nothing is
                // forwarded
                warn!(target: "warhost::play", "bad action from {}: {}", self.players[idx].name, err);
                self.mark_leaving(uid, LeaveReason::Disconnect, "sent a malformed action", now);
                return;
            }
        };

        if let Some(&kind) = action.data.first() {
            if !self.action_allowed(idx, kind) {
                return;
            }
            match kind {
                ACTION_PAUSE => {
                    self.players[idx].pauses_used += 1;
                    self.paused = true;
                    let name = self.players[idx].name.clone();
                    self.announce(&format!("{} paused the game.", name));
                }
                ACTION_RESUME => {
                    self.paused = false;
                    let name = self.players[idx].name.clone();
                    self.announce(&format!("{} resumed the game.", name));
                }
                _ => {}
            }
        }

        self.actions.push_back(Action {
            uid,
            data: action.data,
        });
    }

    /// Whether this player may perform a pause or save right now.
    fn action_allowed(&self, idx: usize, kind: u8) -> bool {
        let player = &self.players[idx];
        match kind {
            ACTION_PAUSE => {
                if player.observer && !player.referee {
                    return false;
                }
                player.referee || player.pauses_used < MAX_PAUSES
            }
            ACTION_SAVE | ACTION_SAVE_ENDED => !player.observer || player.referee,
            _ => true,
        }
    }

    /// Inject a save attributed to a fake user, unblocking the client state
    /// machine with a save-ended per fake user.
    pub fn inject_save(&mut self) {
        let Some(&fake) = self.fake_uids.first() else {
            return;
        };
        self.actions.push_back(Action {
            uid: fake,
            data: vec![ACTION_SAVE, 0],
        });
        for &uid in self.fake_uids.clone().iter() {
            self.actions.push_back(Action {
                uid,
                data: vec![ACTION_SAVE_ENDED],
            });
        }
    }

    /// Save-on-leave policy hook, called before a leaver is purged.
    pub(super) fn maybe_save_on_leave(&mut self) {
        let wanted = match self.cfg.game.save_on_leave {
            SaveOnLeave::Never => false,
            SaveOnLeave::Always => true,
            SaveOnLeave::Auto => {
                self.active_players().count() <= self.cfg.game.num_players_to_start_gameover + 1
            }
        };
        if wanted && self.state == GameState::Playing {
            self.inject_save();
        }
    }

    /// Keepalive checksum from a client; drives lag and desync detection.
    pub(super) fn handle_keepalive(&mut self, idx: usize, packet: &RawPacket, _now: Instant) {
        let Ok(keepalive) = OutgoingKeepalive::decode(&packet.data) else {
            return;
        };
        self.players[idx].sync_counter = self.players[idx].sync_counter.wrapping_add(1);
        self.players[idx].checksums.push_back(keepalive.checksum);
        self.check_desync();
    }

    /// Compare queued checksums across all synchronized pairs.
    fn check_desync(&mut self) {
        loop {
            let participants: Vec<u8> = self
                .active_players()
                .filter(|p| p.loaded)
                .map(|p| p.uid)
                .collect();
            if participants.len() < 2 {
                return;
            }
            let all_have = participants.iter().all(|&uid| {
                self.player_by_uid(uid)
                    .map(|p| !p.checksums.is_empty())
                    .unwrap_or(false)
            });
            if !all_have {
                return;
            }

            // Pop one frame's checksum from everyone
            let mut sums: Vec<(u8, u32)> = Vec::with_capacity(participants.len());
            for &uid in &participants {
                let sum = self
                    .player_by_uid_mut(uid)
                    .and_then(|p| p.checksums.pop_front())
                    .unwrap_or(0);
                sums.push((uid, sum));
            }

            // Cut partnerships where the checksums disagree
            for i in 0..sums.len() {
                for j in i + 1..sums.len() {
                    let (a, sum_a) = sums[i];
                    let (b, sum_b) = sums[j];
                    if sum_a != sum_b && self.are_sync_partners(a, b) {
                        self.cut_sync_pair(a, b);
                    }
                }
            }

            // Whoever fell below the majority is desynced
            let others = participants.len() - 1;
            let desynced: Vec<u8> = participants
                .iter()
                .copied()
                .filter(|&uid| {
                    let partners = self
                        .sync_partners
                        .get(&uid)
                        .map(|set| set.len())
                        .unwrap_or(0);
                    partners * 2 < others
                })
                .collect();
            for uid in desynced {
                self.handle_desynced(uid);
            }
        }
    }

    fn are_sync_partners(&self, a: u8, b: u8) -> bool {
        self.sync_partners
            .get(&a)
            .map(|set| set.contains(&b))
            .unwrap_or(false)
    }

    fn handle_desynced(&mut self, uid: u8) {
        if !self.desync_notified.insert(uid) {
            return;
        }
        let name = self
            .player_by_uid(uid)
            .map(|p| p.name.clone())
            .unwrap_or_default();
        warn!(target: "warhost::play", "[{}] {} desynced", self.game_name, name);
        match self.cfg.game.desync_policy {
            DesyncPolicy::Notify => {
                self.announce(&format!("Warning: {} has desynced from the game.", name));
            }
            DesyncPolicy::Drop => {
                // Purged on the next update
                if let Some(player) = self.player_by_uid_mut(uid) {
                    player.left = true;
                    player.leave_reason = "was automatically dropped after desync".into();
                }
                let packet =
                    crate::proto::join::player_leave_others(uid, LeaveReason::Disconnect);
                self.broadcast_except(uid, &packet);
                self.remove_sync_partner(uid);
                self.announce(&format!("{} was automatically dropped after desync.", name));
            }
        }
    }

    /// A vote to drop the current laggers.
    pub(super) fn handle_drop_req(&mut self, idx: usize, now: Instant) {
        if self.lag_screen.is_none() {
            return;
        }
        let uid = self.players[idx].uid;
        if !self.drop_votes.insert(uid) {
            return;
        }
        let voters = self.drop_votes.len();
        let total = self.active_players().filter(|p| !p.lagging).count();
        debug!(target: "warhost::play", "[{}] drop votes: {}/{}", self.game_name, voters, total);
        if voters * 2 >= total.max(1) {
            let victims: Vec<u8> = self
                .active_players()
                .filter(|p| p.lagging)
                .map(|p| p.uid)
                .collect();
            for victim in victims {
                self.mark_leaving(victim, LeaveReason::Disconnect, "lagged out", now);
            }
            self.lag_screen = None;
            self.drop_votes.clear();
        }
    }
}

/// How many frames a player trails the global sync counter.
///
/// Modular subtraction; a player that ran ahead through empty-action
/// padding counts as zero behind.
fn behind_frames(global: u32, player: &crate::player::Player) -> u32 {
    let behind = global.wrapping_sub(player.sync_counter.wrapping_add(player.sync_counter_offset));
    if behind > u32::MAX / 2 {
        0
    } else {
        behind
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::testutil::*;
    use crate::proto::id;
    use std::sync::Arc;

    /// Game in playing state with three synchronized players.
    fn playing_game() -> (Game, Vec<u8>, Instant) {
        playing_game_with(|_| {})
    }

    fn playing_game_with(tweak: impl Fn(&mut crate::config::Config)) -> (Game, Vec<u8>, Instant) {
        let mut cfg = crate::config::Config::default();
        cfg.map.size = 4096;
        tweak(&mut cfg);
        let mut game = test_game(Arc::new(cfg));
        let now = Instant::now();
        let mut uids = Vec::new();
        for name in ["alice", "bob", "carol"] {
            let uid = seat_player(&mut game, name, now);
            uids.push(uid);
        }
        game.virtual_host_uid = None;
        game.state = GameState::Playing;
        for player in game.players.iter_mut() {
            player.loaded = true;
        }
        let all: Vec<u8> = uids.clone();
        for &uid in &all {
            let partners: std::collections::HashSet<u8> =
                all.iter().copied().filter(|&u| u != uid).collect();
            game.sync_partners.insert(uid, partners);
        }
        game.last_action = now;
        game.next_action_due = now + Duration::from_millis(100);
        for player in game.players.iter_mut() {
            player.clear_sink();
        }
        (game, uids, now)
    }

    fn keepalive_packet(checksum: u32) -> RawPacket {
        let mut data = vec![0u8];
        data.extend_from_slice(&checksum.to_le_bytes());
        RawPacket::w3gs(id::OUTGOING_KEEPALIVE, data)
    }

    fn idx_of(game: &Game, uid: u8) -> usize {
        game.players.iter().position(|p| p.uid == uid).unwrap()
    }

    #[test]
    fn relay_emits_tick_and_paces() {
        let (mut game, _uids, now) = playing_game();
        game.actions.push_back(Action {
            uid: 2,
            data: vec![1, 2, 3],
        });

        // Tick runs 20ms late; the next interval shrinks by as much
        let late = now + Duration::from_millis(120);
        game.update_playing(late);
        assert_eq!(game.sync_counter, 1);
        assert!(game.actions.is_empty());
        assert_eq!(game.next_action_due, late + Duration::from_millis(80));

        let frames = game.players[0].sink_frames();
        assert!(frames.iter().any(|f| f.id == id::INCOMING_ACTION));
    }

    #[test]
    fn pacing_clamps_to_latency() {
        let (mut game, _uids, now) = playing_game();
        // A full second late must not push the next tick into the past
        let very_late = now + Duration::from_secs(1);
        game.update_playing(very_late);
        assert_eq!(game.next_action_due, very_late);
    }

    #[test]
    fn lag_screen_opens_for_behind_player() {
        let (mut game, uids, now) = playing_game();
        game.sync_counter = 40;
        for &uid in &uids[..2] {
            game.player_by_uid_mut(uid).unwrap().sync_counter = 39;
        }
        game.player_by_uid_mut(uids[2]).unwrap().sync_counter = 2;

        game.update_playing(now);

        assert!(game.player_by_uid(uids[2]).unwrap().lagging);
        let frames = game.players[0].sink_frames();
        let lag_frame = frames.iter().find(|f| f.id == id::START_LAG).unwrap();
        let entries = crate::proto::game::decode_start_lag(&lag_frame.data).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].uid, uids[2]);
    }

    #[test]
    fn lag_screen_refreshes_before_client_timeout() {
        let (mut game, uids, now) = playing_game();
        game.sync_counter = 40;
        game.player_by_uid_mut(uids[2]).unwrap().sync_counter = 2;
        game.update_playing(now);
        for player in game.players.iter_mut() {
            player.clear_sink();
        }

        // 61 seconds later the screen must have been torn down and rebuilt
        let later = now + Duration::from_secs(61);
        game.update_playing(later);

        let frames = game.players[0].sink_frames();
        let stop = frames.iter().position(|f| f.id == id::STOP_LAG).unwrap();
        let action = frames
            .iter()
            .position(|f| f.id == id::INCOMING_ACTION)
            .unwrap();
        let start = frames.iter().position(|f| f.id == id::START_LAG).unwrap();
        assert!(stop < action && action < start, "stop, empty action, start");
    }

    #[test]
    fn lagger_recovers_at_safe_threshold() {
        let (mut game, uids, now) = playing_game();
        game.sync_counter = 40;
        game.player_by_uid_mut(uids[2]).unwrap().sync_counter = 2;
        game.update_playing(now);
        assert!(game.lag_screen.is_some());

        game.player_by_uid_mut(uids[2]).unwrap().sync_counter = 39;
        game.update_playing(now + Duration::from_millis(200));

        assert!(game.lag_screen.is_none());
        assert!(!game.player_by_uid(uids[2]).unwrap().lagging);
        let frames = game.players[0].sink_frames();
        assert!(frames.iter().any(|f| f.id == id::STOP_LAG));
    }

    #[test]
    fn desync_cuts_partners_symmetrically() {
        let (mut game, uids, now) = playing_game();
        let (a, b, c) = (uids[0], uids[1], uids[2]);

        game.handle_keepalive(idx_of(&game, a), &keepalive_packet(1), now);
        game.handle_keepalive(idx_of(&game, b), &keepalive_packet(1), now);
        game.handle_keepalive(idx_of(&game, c), &keepalive_packet(2), now);

        assert!(!game.are_sync_partners(a, c));
        assert!(!game.are_sync_partners(c, a));
        assert!(!game.are_sync_partners(b, c));
        assert!(game.are_sync_partners(a, b));
    }

    #[test]
    fn desync_notify_policy_warns_and_continues() {
        let (mut game, uids, now) = playing_game();
        let c = uids[2];
        game.handle_keepalive(idx_of(&game, uids[0]), &keepalive_packet(1), now);
        game.handle_keepalive(idx_of(&game, uids[1]), &keepalive_packet(1), now);
        game.handle_keepalive(idx_of(&game, c), &keepalive_packet(2), now);

        assert!(!game.player_by_uid(c).unwrap().left);
        let frames = game.players[0].sink_frames();
        assert!(frames.iter().any(|f| f.id == id::CHAT_FROM_HOST));
    }

    #[test]
    fn desync_drop_policy_kicks() {
        let (mut game, uids, now) =
            playing_game_with(|cfg| cfg.game.desync_policy = DesyncPolicy::Drop);
        let c = uids[2];
        game.handle_keepalive(idx_of(&game, uids[0]), &keepalive_packet(1), now);
        game.handle_keepalive(idx_of(&game, uids[1]), &keepalive_packet(1), now);
        game.handle_keepalive(idx_of(&game, c), &keepalive_packet(2), now);

        let player = game.players.iter().find(|p| p.uid == c).unwrap();
        assert!(player.left);
        assert_eq!(player.leave_reason, "was automatically dropped after desync");
    }

    #[test]
    fn drop_vote_kicks_laggers_at_half() {
        let (mut game, uids, now) = playing_game();
        game.sync_counter = 40;
        game.player_by_uid_mut(uids[2]).unwrap().sync_counter = 2;
        game.update_playing(now);
        assert!(game.lag_screen.is_some());

        game.handle_drop_req(idx_of(&game, uids[0]), now);
        let lagger = game.players.iter().find(|p| p.uid == uids[2]).unwrap();
        assert!(lagger.left, "one vote of two non-laggers is half");
        assert_eq!(lagger.leave_reason, "lagged out");
    }

    #[test]
    fn oversized_action_drops_peer() {
        let (mut game, uids, now) = playing_game();
        let mut data = 0u32.to_le_bytes().to_vec();
        data.extend(vec![0u8; 1200]);
        let packet = RawPacket::w3gs(id::OUTGOING_ACTION, data);
        game.handle_outgoing_action(idx_of(&game, uids[0]), &packet, now);

        let player = game.players.iter().find(|p| p.uid == uids[0]).unwrap();
        assert!(player.left);
        assert!(game.actions.is_empty(), "nothing partially forwarded");
    }

    #[test]
    fn observer_cannot_pause() {
        let (mut game, uids, now) = playing_game();
        let idx = idx_of(&game, uids[0]);
        game.players[idx].observer = true;
        let packet = RawPacket::w3gs(
            id::OUTGOING_ACTION,
            [0u32.to_le_bytes().to_vec(), vec![ACTION_PAUSE]].concat(),
        );
        game.handle_outgoing_action(idx, &packet, now);
        assert!(!game.paused);
        assert!(game.actions.is_empty());

        // A referee pauses freely
        game.players[idx].referee = true;
        game.handle_outgoing_action(
            idx,
            &RawPacket::w3gs(
                id::OUTGOING_ACTION,
                [0u32.to_le_bytes().to_vec(), vec![ACTION_PAUSE]].concat(),
            ),
            now,
        );
        assert!(game.paused);
    }

    #[test]
    fn pause_limit_for_regular_players() {
        let (mut game, uids, now) = playing_game();
        let idx = idx_of(&game, uids[0]);
        for _ in 0..MAX_PAUSES {
            let packet = RawPacket::w3gs(
                id::OUTGOING_ACTION,
                [0u32.to_le_bytes().to_vec(), vec![ACTION_PAUSE]].concat(),
            );
            game.handle_outgoing_action(idx, &packet, now);
        }
        let before = game.actions.len();
        let packet = RawPacket::w3gs(
            id::OUTGOING_ACTION,
            [0u32.to_le_bytes().to_vec(), vec![ACTION_PAUSE]].concat(),
        );
        game.handle_outgoing_action(idx, &packet, now);
        assert_eq!(game.actions.len(), before, "fourth pause swallowed");
    }

    #[test]
    fn inject_save_unblocks_with_fake_users() {
        let (mut game, _uids, _now) = playing_game();
        game.fake_uids = vec![200, 201];
        game.inject_save();
        assert_eq!(game.actions.len(), 3);
        assert_eq!(game.actions[0].data[0], ACTION_SAVE);
        assert_eq!(game.actions[1].data[0], ACTION_SAVE_ENDED);
        assert_eq!(game.actions[2].data[0], ACTION_SAVE_ENDED);
    }

    #[test]
    fn legacy_gproxy_padding_goes_to_others() {
        let (mut game, uids, now) = playing_game_with(|cfg| cfg.reconnect.wait_secs = 240);
        let idx = idx_of(&game, uids[2]);
        game.players[idx].gproxy = true;

        let due = now + Duration::from_millis(100);
        game.update_playing(due);

        // wait of 4 minutes = 3 empty actions for non-proxy peers
        let alice_frames = game.players[idx_of(&game, uids[0])].sink_frames();
        let empties = alice_frames
            .iter()
            .filter(|f| f.id == id::INCOMING_ACTION && f.data.len() == 2)
            .count();
        assert!(empties >= 3, "got {} empty frames", empties);

        let proxy_frames = game.players[idx_of(&game, uids[2])].sink_frames();
        let proxy_actions = proxy_frames
            .iter()
            .filter(|f| f.id == id::INCOMING_ACTION)
            .count();
        assert_eq!(proxy_actions, 1, "proxy peer gets only the real tick");
    }
}
