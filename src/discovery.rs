use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;

use crate::config::Config;
use crate::game::{Game, GameState};
use crate::proto::info::{
    create_game, decreate_game, encode_stat_string, refresh_game, GameInfo, GameInfoTemplate,
    SearchGame, PRODUCT_TFT,
};
use crate::proto::packet::RawPacket;
use crate::proto::put_cstring;

/// Broadcast cadence.
const BROADCAST_INTERVAL: Duration = Duration::from_secs(5);

/// Emits LAN announcements and answers search datagrams.
///
/// Each game gets one `GAMEINFO` template per supported version; broadcasts
/// patch the dynamic fields instead of rebuilding the whole structure.
pub struct Discovery {
    cfg: Arc<Config>,
    socket: Option<Arc<UdpSocket>>,
    templates: HashMap<(u32, u8), GameInfoTemplate>,
    last_broadcast: Instant,
}

impl Discovery {
    pub fn new(cfg: Arc<Config>, socket: Option<Arc<UdpSocket>>, now: Instant) -> Self {
        Self {
            cfg,
            socket,
            templates: HashMap::new(),
            last_broadcast: now,
        }
    }

    /// Periodic advertisement of every joinable lobby.
    pub fn tick(&mut self, games: &[Game], now: Instant) {
        if now.duration_since(self.last_broadcast) < BROADCAST_INTERVAL {
            return;
        }
        self.last_broadcast = now;

        for game in games
            .iter()
            .filter(|g| g.state == GameState::Lobby || g.state == GameState::CountingDown)
        {
            if self.cfg.discovery.strict {
                for &version in &self.cfg.game.versions.clone() {
                    let packet = self.game_info(game, version, now);
                    self.send_everywhere(&packet);
                }
            } else {
                let packet = refresh_game(
                    game.host_counter,
                    game.active_players().count() as u32,
                    game.slots.open_slots() as u32,
                );
                self.send_everywhere(&packet);
            }
        }
    }

    /// Bookend announcement on game creation.
    pub fn announce_create(&mut self, game: &Game) {
        for &version in &self.cfg.game.versions {
            let packet = create_game(PRODUCT_TFT, version as u32, game.host_counter);
            self.send_everywhere(&packet);
        }
    }

    /// Bookend announcement on game destruction.
    pub fn announce_decreate(&mut self, game: &Game) {
        let packet = decreate_game(game.host_counter);
        for _ in &self.cfg.game.versions {
            self.send_everywhere(&packet);
        }
        self.templates.retain(|(hc, _), _| *hc != game.host_counter);
    }

    /// Answer a LAN search with a unicast GAMEINFO.
    pub fn handle_search(&mut self, games: &[Game], data: &[u8], from: SocketAddr, now: Instant) {
        let Ok(packet) = RawPacket::decode(data) else {
            return;
        };
        if packet.id != SearchGame::PACKET_TYPE_ID {
            return;
        }
        let Ok(search) = SearchGame::decode(&packet.data) else {
            return;
        };
        let version = search.version as u8;
        if !self.cfg.game.versions.contains(&version) {
            return;
        }
        for game in games
            .iter()
            .filter(|g| g.state == GameState::Lobby || g.state == GameState::CountingDown)
        {
            let reply = self.game_info(game, version, now);
            self.send_to(&reply, from);
        }
    }

    /// Patched advertisement for one game and version.
    fn game_info(&mut self, game: &Game, version: u8, now: Instant) -> RawPacket {
        let template = self
            .templates
            .entry((game.host_counter, version))
            .or_insert_with(|| build_template(&self.cfg, game, version));
        template.patched(
            version as u32,
            game.slots.open_slots() as u32,
            now.duration_since(game.created_at).as_secs() as u32,
            game.host_port,
        )
    }

    /// Broadcast, loopback and unicast targets.
    fn send_everywhere(&self, packet: &RawPacket) {
        let bytes = packet.encode();
        if self.cfg.discovery.enabled {
            self.try_send(&bytes, self.cfg.discovery.broadcast_addr);
        }
        // Local clients must see the game even when broadcast is filtered
        self.try_send(
            &bytes,
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), self.cfg.net.udp_port),
        );
        for &addr in &self.cfg.discovery.extra_addrs {
            self.try_send(&bytes, addr);
        }
    }

    fn send_to(&self, packet: &RawPacket, addr: SocketAddr) {
        self.try_send(&packet.encode(), addr);
    }

    fn try_send(&self, bytes: &[u8], addr: SocketAddr) {
        if let Some(socket) = &self.socket {
            if let Err(err) = socket.try_send_to(bytes, addr) {
                trace!(target: "warhost::discovery", "UDP send to {} failed: {}", addr, err);
            }
        }
    }
}

/// Build the full GAMEINFO structure once.
fn build_template(cfg: &Config, game: &Game, version: u8) -> GameInfoTemplate {
    // The stat string carries the map settings blob the client shows in the
    // game list; fields mirror what the client sent at host time
    let mut stat = Vec::new();
    stat.extend_from_slice(&0x0001_u32.to_le_bytes());
    stat.push(0);
    stat.extend_from_slice(&cfg.map.crc32.to_le_bytes());
    put_cstring(&mut stat, &cfg.map.path);
    put_cstring(&mut stat, &cfg.bot.virtual_host_name);
    stat.push(0);
    let stat_string = encode_stat_string(&stat);

    GameInfo {
        product: PRODUCT_TFT,
        version: version as u32,
        host_counter: game.host_counter,
        entry_key: game.entry_key,
        game_name: &game.game_name,
        stat_string: &stat_string,
        slots_total: game.slots.len() as u32,
        game_type_flags: 0x0001,
        slots_open: game.slots.open_slots() as u32,
        uptime_secs: 0,
        port: game.host_port,
    }
    .template()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::testutil::*;
    use crate::proto::id;

    #[test]
    fn search_version_gate() {
        let cfg = test_config();
        let mut discovery = Discovery::new(cfg.clone(), None, Instant::now());
        let game = test_game(cfg);
        let now = Instant::now();

        // An unsupported version never builds a template
        let mut data = PRODUCT_TFT.to_le_bytes().to_vec();
        data.extend_from_slice(&99u32.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        let frame = RawPacket::w3gs(id::SEARCHGAME, data).encode();
        discovery.handle_search(
            std::slice::from_ref(&game),
            &frame,
            "127.0.0.1:6112".parse().unwrap(),
            now,
        );
        assert!(discovery.templates.is_empty());
    }

    #[test]
    fn template_reused_across_ticks() {
        let cfg = test_config();
        let mut discovery = Discovery::new(cfg.clone(), None, Instant::now());
        let game = test_game(cfg);
        let now = Instant::now();

        let first = discovery.game_info(&game, 28, now);
        assert_eq!(discovery.templates.len(), 1);
        let second = discovery.game_info(&game, 28, now + Duration::from_secs(7));
        assert_eq!(discovery.templates.len(), 1);

        // Only the dynamic tail differs
        assert_eq!(first.data.len(), second.data.len());
        let n = first.data.len();
        assert_eq!(first.data[..n - 10], second.data[..n - 10]);
        assert_ne!(first.data[n - 6..n - 2], second.data[n - 6..n - 2]);
    }

    #[test]
    fn decreate_drops_templates() {
        let cfg = test_config();
        let mut discovery = Discovery::new(cfg.clone(), None, Instant::now());
        let game = test_game(cfg);
        discovery.game_info(&game, 28, Instant::now());
        assert!(!discovery.templates.is_empty());
        discovery.announce_decreate(&game);
        assert!(discovery.templates.is_empty());
    }
}
