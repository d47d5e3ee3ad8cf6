use std::time::Instant;

use crate::command::CommandRequest;
use crate::game::Game;
use crate::proto::chat::{chat_from_host, chat_from_host_scoped, ChatRequest, ChatScope, ChatToHost};
use crate::proto::packet::RawPacket;

impl Game {
    /// Chat or lobby settings change from a client.
    pub(super) fn handle_chat(&mut self, idx: usize, packet: &RawPacket, now: Instant) {
        let Ok(chat) = ChatToHost::decode(&packet.data) else {
            debug!(target: "warhost::chat", "malformed chat packet from {}", self.players[idx].name);
            return;
        };
        let uid = self.players[idx].uid;

        match chat.request {
            ChatRequest::Message(text) => {
                if self.intercept_command(idx, &text, false) {
                    return;
                }
                self.relay_lobby_chat(idx, &text);
            }
            ChatRequest::MessageExtra(scope, text) => {
                if self.intercept_command(idx, &text, matches!(scope, ChatScope::All)) {
                    return;
                }
                self.relay_game_chat(idx, scope, &text);
            }
            ChatRequest::TeamChange(team) => {
                if let Some(sid) = self.slots.sid_of_uid(uid) {
                    if self.slots.set_team(sid, team).is_ok() {
                        self.send_slot_snapshot(now);
                    }
                }
            }
            ChatRequest::ColorChange(color) => {
                if let Some(sid) = self.slots.sid_of_uid(uid) {
                    if self.slots.set_color(sid, color).is_ok() {
                        self.send_slot_snapshot(now);
                    }
                }
            }
            ChatRequest::RaceChange(race) => {
                if let Some(sid) = self.slots.sid_of_uid(uid) {
                    if self.slots.set_race(sid, race).is_ok() {
                        self.send_slot_snapshot(now);
                    }
                }
            }
            ChatRequest::HandicapChange(handicap) => {
                if let Some(sid) = self.slots.sid_of_uid(uid) {
                    if self.slots.set_handicap(sid, handicap).is_ok() {
                        self.send_slot_snapshot(now);
                    }
                }
            }
        }
    }

    /// Check for the command token; queue a command request on match.
    ///
    /// Returns true when the text was a command and must not be relayed.
    fn intercept_command(&mut self, idx: usize, text: &str, broadcast: bool) -> bool {
        let token = &self.cfg.bot.command_token;
        if token.is_empty() || !text.starts_with(token.as_str()) {
            return false;
        }
        let body = &text[token.len()..];
        let mut parts = body.splitn(2, ' ');
        let Some(name) = parts.next().filter(|n| !n.is_empty()) else {
            return false;
        };
        let args = parts.next().unwrap_or("").trim().to_owned();

        let player = &self.players[idx];
        debug!(target: "warhost::chat", "[{}] command [{}] from [{}]", self.game_name, body, player.name);
        self.pending_commands.push(CommandRequest {
            sender: player.name.clone(),
            sender_uid: player.uid,
            sender_generation: player.generation,
            realm_id: player.realm_id,
            verified: player.verified || player.realm_id == 0,
            name: name.to_lowercase(),
            args,
            broadcast,
        });
        true
    }

    /// Lobby chat goes to every peer, muted senders go nowhere.
    fn relay_lobby_chat(&mut self, idx: usize, text: &str) {
        let sender = &self.players[idx];
        if sender.muted {
            let uid = sender.uid;
            self.whisper(uid, "You are muted.");
            return;
        }
        let from = sender.uid;
        info!(target: "warhost::chat", "[{}] [{}]: {}", self.game_name, sender.name, text);
        let recipients: Vec<u8> = self
            .active_players()
            .filter(|p| p.uid != from)
            .map(|p| p.uid)
            .collect();
        let packet = chat_from_host(from, &recipients, text);
        for player in self
            .players
            .iter_mut()
            .filter(|p| !p.left && p.uid != from)
        {
            player.send(&packet);
        }
    }

    /// In-game chat with a recipient mask.
    fn relay_game_chat(&mut self, idx: usize, scope: ChatScope, text: &str) {
        let sender_uid = self.players[idx].uid;
        let sender_observer = self.players[idx].observer;
        let sender_referee = self.players[idx].referee;
        let sender_muted = self.players[idx].muted;

        if sender_muted {
            self.whisper(sender_uid, "You are muted.");
            return;
        }

        // Observers have restricted reach; referees keep full chat rights
        let effective = if sender_observer && !sender_referee {
            match scope {
                ChatScope::All | ChatScope::Allies => {
                    if self.cfg.map.referees && !self.mute_all {
                        // Referee maps let the bench talk to the floor
                        ChatScope::All
                    } else {
                        ChatScope::Observers
                    }
                }
                ChatScope::Observers => ChatScope::Observers,
                ChatScope::Private(color) => {
                    // No whispering players from the bench
                    let target_is_observer = self
                        .slot_uid_by_color(color)
                        .and_then(|uid| self.player_by_uid(uid))
                        .map(|p| p.observer)
                        .unwrap_or(false);
                    if target_is_observer {
                        ChatScope::Private(color)
                    } else {
                        ChatScope::Observers
                    }
                }
            }
        } else {
            scope
        };

        if matches!(effective, ChatScope::All) && self.mute_all && !sender_referee {
            return;
        }

        let recipients: Vec<u8> = match effective {
            ChatScope::All => self
                .active_players()
                .filter(|p| p.uid != sender_uid)
                .map(|p| p.uid)
                .collect(),
            ChatScope::Allies => {
                let team = self
                    .slots
                    .sid_of_uid(sender_uid)
                    .and_then(|sid| self.slots.get(sid))
                    .map(|s| s.team);
                self.active_players()
                    .filter(|p| p.uid != sender_uid)
                    .filter(|p| {
                        self.slots
                            .sid_of_uid(p.uid)
                            .and_then(|sid| self.slots.get(sid))
                            .map(|s| Some(s.team) == team)
                            .unwrap_or(false)
                    })
                    .map(|p| p.uid)
                    .collect()
            }
            ChatScope::Observers => self
                .active_players()
                .filter(|p| p.uid != sender_uid && (p.observer || p.referee))
                .map(|p| p.uid)
                .collect(),
            ChatScope::Private(color) => self
                .slot_uid_by_color(color)
                .filter(|&uid| uid != sender_uid)
                .into_iter()
                .collect(),
        };

        if recipients.is_empty() {
            return;
        }

        let packet = chat_from_host_scoped(sender_uid, &recipients, effective, text);
        for player in self
            .players
            .iter_mut()
            .filter(|p| !p.left && recipients.contains(&p.uid))
        {
            player.send(&packet);
        }
    }

    /// UID seated in the slot that holds the given color.
    fn slot_uid_by_color(&self, color: u8) -> Option<u8> {
        self.slots
            .slots()
            .iter()
            .find(|s| s.color == color && s.uid != 0)
            .map(|s| s.uid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::testutil::*;
    use crate::game::GameState;
    use crate::proto::id;
    use std::sync::Arc;
    use std::time::Instant;

    fn chat_packet(from_uid: u8, text: &str) -> RawPacket {
        let chat = ChatToHost {
            to_uids: vec![255],
            from_uid,
            request: ChatRequest::Message(text.into()),
        };
        RawPacket::w3gs(id::CHAT_TO_HOST, chat.encode())
    }

    fn scoped_packet(from_uid: u8, scope: ChatScope, text: &str) -> RawPacket {
        let chat = ChatToHost {
            to_uids: vec![255],
            from_uid,
            request: ChatRequest::MessageExtra(scope, text.into()),
        };
        RawPacket::w3gs(id::CHAT_TO_HOST, chat.encode())
    }

    fn idx_of(game: &Game, uid: u8) -> usize {
        game.players.iter().position(|p| p.uid == uid).unwrap()
    }

    fn chat_count(game: &Game, uid: u8) -> usize {
        game.players[idx_of(game, uid)]
            .sink_frames()
            .iter()
            .filter(|f| f.id == id::CHAT_FROM_HOST)
            .count()
    }

    #[test]
    fn lobby_chat_reaches_everyone_else() {
        let mut game = test_game(test_config());
        let now = Instant::now();
        let a = seat_player(&mut game, "alice", now);
        let b = seat_player(&mut game, "bob", now);
        let c = seat_player(&mut game, "carol", now);
        for p in game.players.iter_mut() {
            p.clear_sink();
        }

        game.handle_chat(idx_of(&game, a), &chat_packet(a, "hello"), now);

        assert_eq!(chat_count(&game, b), 1);
        assert_eq!(chat_count(&game, c), 1);
        assert_eq!(chat_count(&game, a), 0, "no echo to the sender");
    }

    #[test]
    fn muted_sender_is_dropped() {
        let mut game = test_game(test_config());
        let now = Instant::now();
        let a = seat_player(&mut game, "alice", now);
        let b = seat_player(&mut game, "bob", now);
        let idx = idx_of(&game, a);
        game.players[idx].muted = true;
        for p in game.players.iter_mut() {
            p.clear_sink();
        }

        game.handle_chat(idx_of(&game, a), &chat_packet(a, "hello"), now);
        assert_eq!(chat_count(&game, b), 0);
        // The sender gets told instead
        assert_eq!(chat_count(&game, a), 1);
    }

    #[test]
    fn command_token_intercepts() {
        let mut game = test_game(test_config());
        let now = Instant::now();
        let a = seat_player(&mut game, "alice", now);
        let b = seat_player(&mut game, "bob", now);
        for p in game.players.iter_mut() {
            p.clear_sink();
        }

        game.handle_chat(idx_of(&game, a), &chat_packet(a, "!kick bob"), now);

        assert_eq!(chat_count(&game, b), 0, "commands are not relayed");
        assert_eq!(game.pending_commands.len(), 1);
        let cmd = &game.pending_commands[0];
        assert_eq!(cmd.name, "kick");
        assert_eq!(cmd.args, "bob");
        assert_eq!(cmd.sender, "alice");
    }

    #[test]
    fn allies_scope_follows_teams() {
        let mut game = test_game(test_config());
        let now = Instant::now();
        let a = seat_player(&mut game, "alice", now);
        let b = seat_player(&mut game, "bob", now);
        let c = seat_player(&mut game, "carol", now);
        // alice and carol on team 0, bob on team 1
        for (uid, team) in [(a, 0u8), (b, 1), (c, 0)] {
            let sid = game.slots.sid_of_uid(uid).unwrap();
            game.slots.set_team(sid, team).unwrap();
        }
        game.state = GameState::Playing;
        for p in game.players.iter_mut() {
            p.clear_sink();
        }

        game.handle_chat(
            idx_of(&game, a),
            &scoped_packet(a, ChatScope::Allies, "push now"),
            now,
        );

        assert_eq!(chat_count(&game, c), 1);
        assert_eq!(chat_count(&game, b), 0);
    }

    #[test]
    fn observer_all_chat_rewritten_to_observers() {
        let cfg = {
            let mut cfg = crate::config::Config::default();
            cfg.map.size = 4096;
            cfg.map.observers = true;
            cfg.map.hidden_players = true;
            Arc::new(cfg)
        };
        let mut game = test_game(cfg);
        let now = Instant::now();
        let a = seat_player(&mut game, "alice", now);
        let b = seat_player(&mut game, "bob", now);
        let o = seat_player(&mut game, "watcher", now);
        let o_idx = idx_of(&game, o);
        game.players[o_idx].observer = true;
        let p2 = seat_player(&mut game, "watcher2", now);
        let p2_idx = idx_of(&game, p2);
        game.players[p2_idx].observer = true;
        game.state = GameState::Playing;
        for p in game.players.iter_mut() {
            p.clear_sink();
        }

        game.handle_chat(
            idx_of(&game, o),
            &scoped_packet(o, ChatScope::All, "nice move"),
            now,
        );

        // Rewritten to the observer bench only
        assert_eq!(chat_count(&game, p2), 1);
        assert_eq!(chat_count(&game, a), 0);
        assert_eq!(chat_count(&game, b), 0);
    }

    #[test]
    fn observer_private_to_player_redirected() {
        let cfg = {
            let mut cfg = crate::config::Config::default();
            cfg.map.size = 4096;
            cfg.map.observers = true;
            Arc::new(cfg)
        };
        let mut game = test_game(cfg);
        let now = Instant::now();
        let a = seat_player(&mut game, "alice", now);
        let o = seat_player(&mut game, "watcher", now);
        let o_idx = idx_of(&game, o);
        game.players[o_idx].observer = true;
        let p2 = seat_player(&mut game, "watcher2", now);
        let p2_idx = idx_of(&game, p2);
        game.players[p2_idx].observer = true;
        game.state = GameState::Playing;
        for p in game.players.iter_mut() {
            p.clear_sink();
        }

        let color = game
            .slots
            .get(game.slots.sid_of_uid(a).unwrap())
            .unwrap()
            .color;
        game.handle_chat(
            idx_of(&game, o),
            &scoped_packet(o, ChatScope::Private(color), "psst"),
            now,
        );

        assert_eq!(chat_count(&game, a), 0, "players unreachable from the bench");
        assert_eq!(chat_count(&game, p2), 1);
    }

    #[test]
    fn settings_change_snapshots_once() {
        let mut game = test_game(test_config());
        let now = Instant::now();
        let a = seat_player(&mut game, "alice", now);
        for p in game.players.iter_mut() {
            p.clear_sink();
        }

        let chat = ChatToHost {
            to_uids: vec![255],
            from_uid: a,
            request: ChatRequest::HandicapChange(80),
        };
        let packet = RawPacket::w3gs(id::CHAT_TO_HOST, chat.encode());
        game.handle_chat(idx_of(&game, a), &packet, now);

        let sid = game.slots.sid_of_uid(a).unwrap();
        assert_eq!(game.slots.get(sid).unwrap().handicap, 80);
        let snapshots = game.players[idx_of(&game, a)]
            .sink_frames()
            .iter()
            .filter(|f| f.id == id::SLOTINFO)
            .count();
        assert_eq!(snapshots, 1);
    }
}
